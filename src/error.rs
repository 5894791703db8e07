//! Crate-level error type.
//!
//! The first five variants mirror how the front-end reacts to a failure:
//! validation problems never reach the network, model failures stay inside
//! one slot, auth failures end the session, transport failures end the
//! primary stream, and submission failures leave ratings in place.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    /// Bad local input: empty text, too few models, nothing rated.
    #[error("{0}")]
    Validation(String),

    /// One model's generation failed. Retryable.
    #[error("{model}: {message}")]
    Model { model: String, message: String },

    /// The backend wants the user to log in again.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Connection-level failure (dropped stream, refused connection, timeout).
    #[error("connection error: {0}")]
    Transport(String),

    /// The vote POST failed.
    #[error("vote submission failed: {0}")]
    Submission(String),

    /// The backend answered with a body we could not make sense of.
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ArenaError {
    fn from(err: reqwest::Error) -> Self {
        ArenaError::Transport(err.to_string())
    }
}

impl ArenaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ArenaError::Validation(msg.into())
    }

    /// True for errors that end a session and need a fresh login.
    pub fn is_auth(&self) -> bool {
        matches!(self, ArenaError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_is_bare_message() {
        let err = ArenaError::validation("Please enter some text");
        assert_eq!(err.to_string(), "Please enter some text");
    }

    #[test]
    fn test_model_error_display_names_model() {
        let err = ArenaError::Model {
            model: "gemini-2.5-pro".to_string(),
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "gemini-2.5-pro: rate limited");
    }

    #[test]
    fn test_is_auth() {
        assert!(ArenaError::Auth("login".into()).is_auth());
        assert!(!ArenaError::Transport("reset".into()).is_auth());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ArenaError = io.into();
        assert!(matches!(err, ArenaError::Io(_)));
    }
}
