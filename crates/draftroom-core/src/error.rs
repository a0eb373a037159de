// Error types shared by the engine, the session layer, and the wire protocol.

use thiserror::Error;

use crate::draft::roster::RosterError;

/// A claim that failed validation. Nothing changed and nothing was
/// broadcast; the same request can be retried once the precondition holds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickError {
    #[error("draft {draft_id} is not active")]
    DraftNotActive { draft_id: String },

    #[error("it is not {participant_id}'s turn")]
    NotYourTurn { participant_id: String },

    #[error("item {item_id} is not available")]
    ItemUnavailable { item_id: String },
}

impl PickError {
    pub fn code(&self) -> &'static str {
        match self {
            PickError::DraftNotActive { .. } => "draft-not-active",
            PickError::NotYourTurn { .. } => "not-your-turn",
            PickError::ItemUnavailable { .. } => "item-unavailable",
        }
    }
}

/// Errors surfaced by [`crate::engine::DraftEngine`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("draft {0} not found")]
    NotFound(String),

    #[error("draft {draft_id} is in an invalid state: {reason}")]
    InvalidState { draft_id: String, reason: String },

    #[error(transparent)]
    Rejected(#[from] PickError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("draft {0} is unavailable")]
    Unavailable(String),
}

impl EngineError {
    /// Stable error code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not-found",
            EngineError::InvalidState { .. } => "invalid-state",
            EngineError::Rejected(e) => e.code(),
            EngineError::BadRequest(_) => "bad-request",
            EngineError::Persistence(_) => "unavailable",
            EngineError::Unavailable(_) => "unavailable",
        }
    }

    pub(crate) fn invalid_state(draft_id: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidState {
            draft_id: draft_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<RosterError> for EngineError {
    fn from(e: RosterError) -> Self {
        EngineError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_errors_keep_pick_codes() {
        let err: EngineError = PickError::NotYourTurn {
            participant_id: "b".into(),
        }
        .into();
        assert_eq!(err.code(), "not-your-turn");
        assert_eq!(err.to_string(), "it is not b's turn");
    }

    #[test]
    fn roster_errors_become_bad_requests() {
        let err: EngineError = RosterError::NoParticipants.into();
        assert_eq!(err.code(), "bad-request");
    }
}
