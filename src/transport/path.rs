//! Path aggregation for low-cardinality metric labels.
//!
//! Route templates carry placeholders in one of two syntaxes: inbound
//! endpoints use `:name`, outbound backends use `{{.Name}}`. Both are
//! normalized to a lowercase `{name}` marker.

use crate::config::{parse_backend_config, parse_endpoint_config, BackendConfig, EndpointConfig, PathAggregation};

/// Placeholder syntax of a route template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// `:name`
    Endpoint,
    /// `{{.Name}}`
    Backend,
}

impl Syntax {
    fn normalize(self, path: &str) -> String {
        let normalized = match self {
            Syntax::Endpoint => replace_colon_params(path),
            Syntax::Backend => replace_template_params(path),
        };
        normalized.to_lowercase()
    }

    fn is_placeholder(self, segment: &str) -> bool {
        match self {
            Syntax::Endpoint => segment.starts_with(':'),
            Syntax::Backend => segment.len() > 3 && segment.starts_with("{{."),
        }
    }
}

/// Maps a live request path to the label reported in metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathAggregator {
    /// The live path, untouched.
    Identity,
    /// A constant label computed once from the route template.
    Fixed(String),
    /// The live path with its final segment replaced by the template's placeholder.
    LastParam { last_segment: String, syntax: Syntax },
}

impl PathAggregator {
    /// Aggregator for an inbound endpoint. No endpoint means identity.
    pub fn for_endpoint(cfg: Option<&EndpointConfig>) -> Self {
        let Some(cfg) = cfg else {
            return PathAggregator::Identity;
        };
        let strategy = parse_endpoint_config(Some(cfg))
            .map(|extra| extra.path_aggregation)
            .unwrap_or_default();
        Self::build(&cfg.endpoint, strategy, Syntax::Endpoint)
    }

    /// Aggregator for an outbound backend. No backend means identity.
    pub fn for_backend(cfg: Option<&BackendConfig>) -> Self {
        let Some(cfg) = cfg else {
            return PathAggregator::Identity;
        };
        let strategy = parse_backend_config(Some(cfg))
            .map(|extra| extra.path_aggregation)
            .unwrap_or_default();
        Self::build(&cfg.url_pattern, strategy, Syntax::Backend)
    }

    fn build(template: &str, strategy: PathAggregation, syntax: Syntax) -> Self {
        match strategy {
            PathAggregation::Off => PathAggregator::Identity,
            PathAggregation::LastParam => {
                let last_segment = last_segment(template);
                if syntax.is_placeholder(last_segment) {
                    PathAggregator::LastParam {
                        last_segment: last_segment.to_string(),
                        syntax,
                    }
                } else {
                    // Trailing literal segment: nothing to mask, use the template.
                    PathAggregator::Fixed(syntax.normalize(template))
                }
            }
            PathAggregation::Pattern => PathAggregator::Fixed(syntax.normalize(template)),
        }
    }

    /// Label for a live request path.
    pub fn aggregate(&self, path: &str) -> String {
        match self {
            PathAggregator::Identity => path.to_string(),
            PathAggregator::Fixed(label) => label.clone(),
            PathAggregator::LastParam {
                last_segment,
                syntax,
            } => {
                let prefix_end = path.rfind('/').map(|i| i + 1).unwrap_or(0);
                let mut masked = String::with_capacity(prefix_end + last_segment.len());
                masked.push_str(&path[..prefix_end]);
                masked.push_str(last_segment);
                syntax.normalize(&masked)
            }
        }
    }
}

fn last_segment(template: &str) -> &str {
    template
        .rfind('/')
        .map(|i| &template[i + 1..])
        .unwrap_or(template)
}

/// `:name` (one or more non-`/` characters) becomes `{name}`.
fn replace_colon_params(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    let mut rest = path;
    while let Some(start) = rest.find(':') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('/').unwrap_or(after.len());
        if end == 0 {
            out.push(':');
        } else {
            out.push('{');
            out.push_str(&after[..end]);
            out.push('}');
        }
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

/// `{{` + any one character + shortest capture + `}}` becomes `{capture}`.
fn replace_template_params(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let open = &rest[start + 2..];
        let matched = open.chars().next().and_then(|skipped| {
            let body = &open[skipped.len_utf8()..];
            body.find("}}").map(|end| (&body[..end], &body[end + 2..]))
        });
        match matched {
            Some((name, tail)) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
                rest = tail;
            }
            None => {
                out.push('{');
                rest = &rest[start + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
