//! Provider error taxonomy.
//!
//! The retry loop branches on these classes: transient errors are retried
//! with backoff, validation errors fail the batch immediately, and
//! configuration errors consume no attempt at all.

use thiserror::Error;

/// Errors surfaced by a provider backend or by output validation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, rate-limit, or backend-availability failure. Retried.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Backend returned an observation range outside the batch span.
    #[error(
        "observation range [{start_secs:.1}s, {end_secs:.1}s] outside batch span [0s, {duration_secs:.1}s]"
    )]
    TimestampOutOfBounds {
        start_secs: f64,
        end_secs: f64,
        duration_secs: f64,
    },

    /// Union of observation ranges covers too little of the batch.
    #[error("observations cover {covered_pct:.0}% of the batch, below the {required_pct:.0}% threshold")]
    InsufficientCoverage {
        covered_pct: f64,
        required_pct: f64,
    },

    /// Backend response could not be parsed into the expected shape.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Missing credential or endpoint. Surfaced to the operator; the
    /// owning batch stays pending and no attempt is recorded.
    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether the retry loop should try again with the same input.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether this is a validation failure (bad backend output).
    /// Not retried with the same input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::TimestampOutOfBounds { .. }
                | Self::InsufficientCoverage { .. }
                | Self::MalformedResponse(_)
        )
    }

    /// Whether this is an operator-facing configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
