//! Unified error type for the admission and accounting layer.
//!
//! `GateError` is returned by every fallible operation in the crate. Admission
//! rejections are *not* errors; they are ordinary [`Decision`](crate::core::Decision)
//! values. The error serializes as `{ "kind": "...", "message": "..." }` so
//! operator tooling can programmatically distinguish failure categories.

use serde::ser::SerializeStruct;

/// Crate-wide error.
///
/// Each variant maps to a distinct failure domain.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The transport directory or accounting store could not answer.
    /// No admission decision is produced when this is returned.
    #[error("{0}")]
    Unavailable(String),

    /// Caller supplied a malformed value (negative byte count, bad CIDR, ...).
    #[error("{0}")]
    InvalidInput(String),

    /// Query range with `start > end`.
    #[error("{0}")]
    InvalidRange(String),

    /// Configuration file missing fields or holding out-of-range values.
    #[error("{0}")]
    Config(String),

    /// I/O and OS-level errors.
    #[error("{0}")]
    Io(String),
}

impl GateError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::Unavailable(_) => "Unavailable",
            GateError::InvalidInput(_) => "InvalidInput",
            GateError::InvalidRange(_) => "InvalidRange",
            GateError::Config(_) => "Config",
            GateError::Io(_) => "Io",
        }
    }
}

impl serde::Serialize for GateError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("GateError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        GateError::Unavailable(format!("{err:#}"))
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(err: rusqlite::Error) -> Self {
        GateError::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::Config(err.to_string())
    }
}
