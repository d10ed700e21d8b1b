use reqwest::StatusCode;

/// Fallback text when neither the backend nor the transport gave us anything to show.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// An error from a call to the testbed backend.
///
/// The `Display` implementation is the normalized message shown to the user. In order of
/// preference it is the backend's own `error` field, then the transport-level message, then
/// [UNKNOWN_ERROR].
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The backend answered with a structured `{"error": ...}` payload.
    #[error("{message}")]
    Backend {
        status: StatusCode,
        message: String,
    },
    /// Non-success status without a structured error payload.
    #[error("Request failed with status code {}", .0.as_u16())]
    Status(StatusCode),
    /// A chart draw request was rejected.
    #[error("draw {chart} HTTP {}", .status.as_u16())]
    Draw { chart: String, status: StatusCode },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The normalized message, never empty.
    pub fn message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Backend { status, .. }
            | ApiError::Status(status)
            | ApiError::Draw { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            ApiError::Decode(_) => None,
        }
    }

    /// Build the error for a non-success response from its status and raw body.
    pub fn from_response_body(status: StatusCode, body: &[u8]) -> ApiError {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            error: serde_json::Value,
        }
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(ErrorBody {
                error: serde_json::Value::String(message),
            }) if !message.is_empty() => ApiError::Backend { status, message },
            Ok(ErrorBody { error }) if !error.is_null() && error != "" => ApiError::Backend {
                status,
                message: error.to_string(),
            },
            _ => ApiError::Status(status),
        }
    }
}
