use thiserror::Error;

/// Exceptional failures of the validator and its collaborators.
///
/// Validation findings are never reported through this type; they are
/// collected as [`ValidationIssue`](crate::types::ValidationIssue)s.
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Load error: {message}")]
    Load { message: String },

    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ValidatorError>;

impl ValidatorError {
    pub fn load<S: Into<String>>(message: S) -> Self {
        Self::Load {
            message: message.into(),
        }
    }

    pub fn schema<S: Into<String>>(message: S) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
