use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum TabulaError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl fmt::Display for TabulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabulaError::NotFound(id) => write!(f, "issue not found: {id}"),
            TabulaError::BadRequest(msg) => write!(f, "{msg}"),
            TabulaError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for TabulaError {}

/// JSON body for every failure reply, logical or not.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            id: None,
        }
    }

    pub fn with_id(error: impl Into<String>, id: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            id: Some(id.into()),
        }
    }
}

impl From<&TabulaError> for ErrorResponse {
    fn from(err: &TabulaError) -> Self {
        ErrorResponse::new(err.to_string())
    }
}
