//! Sampling policy derived from the configured sample rate.

use opentelemetry_sdk::trace::Sampler;

/// Sampler for a percentage rate; values outside 0..=100 are clamped.
///
/// Intermediate rates are keyed on the trace id and follow a sampled
/// parent, so every stage of one request agrees.
pub fn sampler_for_rate(rate: i64) -> Sampler {
    match rate.clamp(0, 100) {
        0 => Sampler::AlwaysOff,
        100 => Sampler::AlwaysOn,
        rate => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate as f64 / 100.0))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span as _, SpanContext, SpanId, SpanKind, TraceFlags, TraceId};
    use opentelemetry_sdk::trace::SdkTracerProvider;

    use crate::trace::Tracer;

    fn sampled_out_of(rate: i64, trials: usize) -> usize {
        let provider = SdkTracerProvider::builder()
            .with_sampler(sampler_for_rate(rate))
            .build();
        let tracer = Tracer::with_provider(provider);
        (0..trials)
            .filter(|_| {
                tracer
                    .start("trial", SpanKind::Internal, None, Vec::new())
                    .span_context()
                    .is_sampled()
            })
            .count()
    }

    #[test]
    fn test_rate_is_clamped() {
        assert!(matches!(sampler_for_rate(-5), Sampler::AlwaysOff));
        assert!(matches!(sampler_for_rate(0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for_rate(100), Sampler::AlwaysOn));
        assert!(matches!(sampler_for_rate(250), Sampler::AlwaysOn));
        assert!(matches!(sampler_for_rate(30), Sampler::ParentBased(_)));
    }

    #[test]
    fn test_never_and_always() {
        assert_eq!(sampled_out_of(0, 200), 0);
        assert_eq!(sampled_out_of(100, 200), 200);
    }

    #[test]
    fn test_probability_approximates_rate() {
        let sampled = sampled_out_of(25, 10_000);
        assert!((2_000..3_000).contains(&sampled), "sampled {}", sampled);
    }

    #[test]
    fn test_sampled_parent_wins() {
        let provider = SdkTracerProvider::builder()
            .with_sampler(sampler_for_rate(1))
            .build();
        let tracer = Tracer::with_provider(provider);

        let parent = SpanContext::new(
            TraceId::from_hex("463ac35c9f6413ad48485a3953bb6124").unwrap(),
            SpanId::from_hex("a2fb4a1d1a96d312").unwrap(),
            TraceFlags::SAMPLED,
            true,
            Default::default(),
        );
        let span = tracer.start("child", SpanKind::Server, Some(&parent), Vec::new());
        assert!(span.span_context().is_sampled());
    }
}
