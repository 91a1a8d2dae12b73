use thiserror::Error;

/// Shown to the user for every unreachable/timeout failure.
pub const NETWORK_ERROR_MESSAGE: &str =
    "Unable to reach the server. Check your connection and try again.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response: unreachable host, timeout or aborted request.
    #[error("Network error: {}", NETWORK_ERROR_MESSAGE)]
    Network { detail: String },

    /// 401 carrying a terminal code; refreshing cannot help.
    #[error("Session ended by server ({code}) - please sign in again")]
    AuthStop { code: String },

    /// Ordinary 401.
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Request failed with status {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Classify a non-success status. 401 is handled by the dispatcher.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 => ApiError::Unauthorized,
            500..=599 => ApiError::Server {
                status,
                body: truncated,
            },
            _ => ApiError::Client {
                status,
                body: truncated,
            },
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthStop { .. } | ApiError::Unauthorized)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, ApiError::Server { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthStop { .. } | ApiError::Unauthorized => Some(401),
            ApiError::Client { status, .. } | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
