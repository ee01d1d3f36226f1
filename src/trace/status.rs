//! Canonical status codes and their mapping onto span status.

use opentelemetry::trace::Status;

/// Canonical RPC status codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl CanonicalCode {
    /// Upper-case name, used as the status description.
    pub fn name(self) -> &'static str {
        match self {
            CanonicalCode::Ok => "OK",
            CanonicalCode::Cancelled => "CANCELLED",
            CanonicalCode::Unknown => "UNKNOWN",
            CanonicalCode::InvalidArgument => "INVALID_ARGUMENT",
            CanonicalCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            CanonicalCode::NotFound => "NOT_FOUND",
            CanonicalCode::AlreadyExists => "ALREADY_EXISTS",
            CanonicalCode::PermissionDenied => "PERMISSION_DENIED",
            CanonicalCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            CanonicalCode::FailedPrecondition => "FAILED_PRECONDITION",
            CanonicalCode::Aborted => "ABORTED",
            CanonicalCode::OutOfRange => "OUT_OF_RANGE",
            CanonicalCode::Unimplemented => "UNIMPLEMENTED",
            CanonicalCode::Internal => "INTERNAL",
            CanonicalCode::Unavailable => "UNAVAILABLE",
            CanonicalCode::DataLoss => "DATA_LOSS",
            CanonicalCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Map an HTTP status code to the closest canonical code.
    pub fn from_http(status: u16) -> Self {
        match status {
            200 => CanonicalCode::Ok,
            400 | 422 => CanonicalCode::InvalidArgument,
            401 => CanonicalCode::Unauthenticated,
            403 => CanonicalCode::PermissionDenied,
            404 => CanonicalCode::NotFound,
            429 => CanonicalCode::ResourceExhausted,
            499 => CanonicalCode::Cancelled,
            501 => CanonicalCode::Unimplemented,
            503 => CanonicalCode::Unavailable,
            504 => CanonicalCode::DeadlineExceeded,
            200..=399 => CanonicalCode::Ok,
            _ => CanonicalCode::Unknown,
        }
    }

    /// `Ok` stays `Ok`; every other code becomes an error described by its name.
    pub fn to_status(self) -> Status {
        match self {
            CanonicalCode::Ok => Status::Ok,
            code => Status::error(code.name()),
        }
    }
}
