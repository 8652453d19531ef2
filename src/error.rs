use reqwest::StatusCode;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

const RETRY_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("word {word_id} is locked")]
    WordLocked { word_id: String },
    #[error("no active child selected")]
    NoActiveChild,
    #[error("no active domain selected")]
    NoActiveDomain,
    #[error("no word is currently displayed")]
    NoCurrentWord,
    #[error("result discarded: selection context changed")]
    Superseded,
    #[error("chat message is empty")]
    EmptyMessage,
    #[error("local store error: {0}")]
    Store(String),
}

impl ClientError {
    /// Transport and backend failures; the caller may offer a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Request(_) | ClientError::HttpStatus { .. } | ClientError::Json(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Request(_) => "NETWORK_ERROR",
            ClientError::HttpStatus { status, .. } => match *status {
                StatusCode::NOT_FOUND => "NOT_FOUND",
                StatusCode::UNAUTHORIZED => "UNAUTHORIZED",
                StatusCode::FORBIDDEN => "FORBIDDEN",
                StatusCode::CONFLICT => "CONFLICT",
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => "BAD_REQUEST",
                s if s.is_server_error() => "BACKEND_ERROR",
                _ => "HTTP_ERROR",
            },
            ClientError::Json(_) => "INVALID_RESPONSE",
            ClientError::WordLocked { .. } => "WORD_LOCKED",
            ClientError::NoActiveChild => "NO_ACTIVE_CHILD",
            ClientError::NoActiveDomain => "NO_ACTIVE_DOMAIN",
            ClientError::NoCurrentWord => "NO_CURRENT_WORD",
            ClientError::Superseded => "SUPERSEDED",
            ClientError::EmptyMessage => "EMPTY_MESSAGE",
            ClientError::Store(_) => "STORE_ERROR",
        }
    }

    /// Short text for the presentation layer. Internal detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::HttpStatus { status, .. } if *status == StatusCode::UNAUTHORIZED => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ClientError::HttpStatus { status, .. } if *status == StatusCode::NOT_FOUND => {
                "That item could not be found. Please try again.".to_string()
            }
            e if e.is_retryable() => RETRY_MESSAGE.to_string(),
            ClientError::WordLocked { .. } => "This word is not ready yet.".to_string(),
            ClientError::NoActiveChild => "Choose a child to continue.".to_string(),
            ClientError::NoActiveDomain => "Select a domain to start learning words.".to_string(),
            ClientError::NoCurrentWord => "Select a domain to start learning words.".to_string(),
            ClientError::Superseded => String::new(),
            ClientError::EmptyMessage => "Type a message first.".to_string(),
            ClientError::Store(_) => "Settings could not be saved.".to_string(),
            _ => RETRY_MESSAGE.to_string(),
        }
    }
}
