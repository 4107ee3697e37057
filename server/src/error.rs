use common::{ErrorKind, Tokens};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Every rejection the engine can produce. A rejected operation leaves all
/// state exactly as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    State(#[from] StateError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Authorization(_) => ErrorKind::Authorization,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::State(_) => ErrorKind::State,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Title is required")]
    MissingTitle,
    #[error("Description is required")]
    MissingDescription,
    #[error("End date is required")]
    MissingEndTime,
    #[error("End date must be in the future")]
    EndTimeNotInFuture,
    #[error("A poll must have at least 2 options")]
    TooFewOptions,
    #[error("All options must have text")]
    EmptyOptionText,
    #[error("Options must be unique: {0:?} appears more than once")]
    DuplicateOption(String),
    #[error("Bet amount must be greater than 0")]
    NonPositiveAmount,
    #[error("User name is required")]
    MissingUserName,
    #[error("Invalid wallet address format. Must be 34 characters starting with \"x\"")]
    InvalidWalletAddress,
    #[error("Poll creation fee must be a non-negative amount, got {0}")]
    InvalidCreationFee(Tokens),
    #[error("Invalid seed data: {0}")]
    InvalidSeed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthorizationError {
    #[error("User must be logged in")]
    NotLoggedIn,
    #[error("Insufficient balance: {available} < {required}")]
    InsufficientBalance { available: Tokens, required: Tokens },
    #[error("Only administrators may {0}")]
    AdminOnly(&'static str),
    #[error("User {0} already exists")]
    UserExists(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotFoundError {
    #[error("No such user: {0}")]
    User(String),
    #[error("No such poll: {0}")]
    Poll(String),
    #[error("Poll {poll_id} has no option {option_id}")]
    Option { poll_id: String, option_id: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Poll {0} is not active")]
    PollNotActive(String),
    #[error("Betting on poll {0} has closed")]
    BettingClosed(String),
    #[error("Poll {0} has already been resolved")]
    AlreadyResolved(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_wire_kinds() {
        let err: EngineError = ValidationError::MissingTitle.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: EngineError = AuthorizationError::InsufficientBalance {
            available: 100.0,
            required: 5_000_000.0,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(err.to_string().contains("Insufficient balance"));

        let err: EngineError = StateError::AlreadyResolved("poll_1".into()).into();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.to_string(), "Poll poll_1 has already been resolved");
    }
}
