//! Error types for data parsing in safetrail-types.

use thiserror::Error;

/// Errors that can occur when validating or decoding SafeTrail data.
///
/// This error type is platform-agnostic and does not include
/// storage or position-source errors (those belong in safetrail-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Coordinates outside the valid latitude/longitude range, or not finite.
    #[error("Invalid coordinates: ({latitude}, {longitude})")]
    InvalidCoordinates {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    /// A document path that is empty or contains empty segments.
    #[error("Invalid document path: '{0}'")]
    InvalidPath(String),

    /// A user key that cannot be used as a path segment.
    #[error("Invalid user key: '{0}'")]
    InvalidKey(String),

    /// A stored document that does not decode into a shared-location record.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type alias using safetrail-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
