//! Typed error taxonomy for the correlation core.
//!
//! Internal plumbing (HTTP calls, JSON parsing) uses `anyhow::Result` with
//! `.context(...)`, matching how the backend clients in this crate talk to
//! their wire dialects. `CoreError` is the match-able type surfaced at the
//! public `Source` / `CorrelationEngine` boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("upstream error calling {url}: {detail}")]
    Upstream {
        url: String,
        detail: String,
        body_snippet: Option<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn upstream(url: impl Into<String>, detail: impl Into<String>, body: Option<String>) -> Self {
        const MAX_SNIPPET: usize = 512;
        CoreError::Upstream {
            url: url.into(),
            detail: detail.into(),
            body_snippet: body.map(|b| b.chars().take(MAX_SNIPPET).collect()),
        }
    }

    /// True when this error should never be wrapped or retried further.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
