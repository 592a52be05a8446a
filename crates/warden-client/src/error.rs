use std::fmt;

use reqwest::StatusCode;

use crate::conversions::ErrorBody;

#[derive(Debug)]
pub enum ClientError {
    InvalidEndpoint(String),
    Connection(String),
    Timeout,
    Decode(String),
    Unexpected { status: u16, message: String },
    Cancelled,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::InvalidEndpoint(msg) => write!(f, "invalid endpoint: {msg}"),
            ClientError::Connection(msg) => write!(f, "connection error: {msg}"),
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::Decode(msg) => write!(f, "invalid response body: {msg}"),
            ClientError::Unexpected { status, message } => {
                write!(f, "unexpected status {status}: {message}")
            }
            ClientError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::Unexpected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ClientError::Connection(err.to_string())
        }
    }
}

impl ClientError {
    /// Maps a non-success response, preferring the backend's own error message.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string()
            });

        ClientError::Unexpected {
            status: status.as_u16(),
            message,
        }
    }
}
