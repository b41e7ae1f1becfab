//! Error types for the gating engine.

use std::time::Duration;

/// Errors surfaced by gate components
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The OS random source failed; tokens must never fall back to a weaker RNG
    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response from {service}: {detail}")]
    MalformedResponse { service: &'static str, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Infrastructure failures are the ones a local fallback may paper over
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            GateError::Remote(_) | GateError::Timeout(_) | GateError::MalformedResponse { .. }
        )
    }
}

impl From<reqwest::Error> for GateError {
    fn from(e: reqwest::Error) -> Self {
        GateError::Remote(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_classification() {
        assert!(GateError::Remote("connection refused".into()).is_infrastructure());
        assert!(GateError::Timeout(Duration::from_secs(3)).is_infrastructure());
        assert!(GateError::MalformedResponse {
            service: "rate_limit",
            detail: "missing allowed".into()
        }
        .is_infrastructure());
        assert!(!GateError::EntropyUnavailable("no rng".into()).is_infrastructure());
        assert!(!GateError::Storage("disk full".into()).is_infrastructure());
    }
}
