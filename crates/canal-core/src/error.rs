//! Unified error types for the canal workspace
//!
//! Only structural problems abort a call. Numerical non-convergence,
//! infeasibility, unreachable destinations and timeouts are reported as flags
//! on the returned solutions instead of errors.
//!
//! # Example
//!
//! ```ignore
//! use canal_core::{CanalResult, Network, NetworkSnapshot};
//!
//! fn load(snapshot: NetworkSnapshot) -> CanalResult<Network> {
//!     let network = Network::from_snapshot(snapshot)?;
//!     network.ensure_valid()?;
//!     Ok(network)
//! }
//! ```

use thiserror::Error;

use crate::Diagnostics;

/// Unified error type for all canal operations.
#[derive(Error, Debug)]
pub enum CanalError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Structurally invalid input, rejected before any optimization starts
    #[error("Validation error: {}", .0.summary())]
    Validation(Diagnostics),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network structure errors (dangling references, duplicate ids)
    #[error("Network error: {0}")]
    Network(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using CanalError.
pub type CanalResult<T> = Result<T, CanalError>;

impl CanalError {
    /// Build a validation error carrying a single message.
    pub fn validation(category: &str, message: &str) -> Self {
        let mut diag = Diagnostics::new();
        diag.add_error(category, message);
        CanalError::Validation(diag)
    }

    /// Diagnostics attached to a validation error, if any.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            CanalError::Validation(diag) => Some(diag),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CanalError {
    fn from(err: anyhow::Error) -> Self {
        CanalError::Other(err.to_string())
    }
}

impl From<String> for CanalError {
    fn from(s: String) -> Self {
        CanalError::Other(s)
    }
}

impl From<&str> for CanalError {
    fn from(s: &str) -> Self {
        CanalError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CanalError {
    fn from(err: serde_json::Error) -> Self {
        CanalError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = CanalError::validation("geometry", "negative bed width");
        let text = err.to_string();
        assert!(text.contains("Validation error"));
        assert!(text.contains("1 error"));
        assert_eq!(err.diagnostics().map(|d| d.error_count()), Some(1));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CanalError = io_err.into();
        assert!(matches!(err, CanalError::Io(_)));
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> CanalResult<()> {
            Err(CanalError::Network("channel 3 references unknown node 9".into()))
        }

        fn outer() -> CanalResult<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert!(err.to_string().contains("unknown node 9"));
    }

    #[test]
    fn test_json_error_is_parse() {
        let err: CanalError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, CanalError::Parse(_)));
    }
}
