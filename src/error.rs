use thiserror::Error;

#[derive(Debug, Error)]
pub enum KitchenPaError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("{0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl KitchenPaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<diesel::result::Error> for KitchenPaError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

pub use crate::Result;
