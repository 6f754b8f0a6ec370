// SPDX-License-Identifier: MIT

//! Error taxonomy shared across crates (spec §7).

use thiserror::Error;

/// The closed set of error kinds the engine can surface to a caller.
///
/// Every crate boundary converts its local error type into one of these
/// variants rather than leaking `String`s or panics across the line.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("engine timeout: {0}")]
    EngineTimeout(String),

    #[error("session error: {0}")]
    SessionError(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("logical failure: {0}")]
    LogicalFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// HTTP-like status code derived from the kind, per spec §7.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::Forbidden(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Busy(_) => 409,
            EngineError::EngineUnavailable(_) | EngineError::EngineTimeout(_) => 503,
            EngineError::SessionError(_)
            | EngineError::SpawnFailed(_)
            | EngineError::StreamError(_)
            | EngineError::LogicalFailure(_) => 502,
            EngineError::Internal(_) => 500,
        }
    }

    /// Whether this kind should be logged with full context server-side
    /// (as opposed to being a routine, caller-actionable rejection).
    pub fn is_logged_at_error(&self) -> bool {
        matches!(
            self,
            EngineError::Internal(_) | EngineError::StreamError(_) | EngineError::SpawnFailed(_)
        )
    }

    /// A `{ success: false, error }` envelope message, matching spec §6's HTTP envelope.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(EngineError::Validation("x".into()).status_code(), 400);
        assert_eq!(EngineError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(EngineError::NotFound("x".into()).status_code(), 404);
        assert_eq!(EngineError::Busy("x".into()).status_code(), 409);
        assert_eq!(EngineError::Internal("x".into()).status_code(), 500);
    }
}
