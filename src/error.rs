use thiserror::Error;

/// Everything a mail operation can fail with.
///
/// Decode problems inside message bodies never show up here; they are
/// absorbed by `email_content`.
#[derive(Debug, Error)]
pub enum GmailError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("remote call failed{}: {message}", status_suffix(.status))]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("no such message: {0}")]
    NotFound(String),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GmailError {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        GmailError::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        GmailError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status of a failed remote call, if the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GmailError::Remote { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GmailError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return GmailError::Decode(e.to_string());
        }
        GmailError::remote(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

impl From<serde_json::Error> for GmailError {
    fn from(e: serde_json::Error) -> Self {
        GmailError::Decode(e.to_string())
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, GmailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_display_includes_status() {
        let err = GmailError::remote(Some(503), "backend unavailable");
        assert_eq!(
            err.to_string(),
            "remote call failed (503): backend unavailable"
        );
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_remote_display_without_status() {
        let err = GmailError::remote(None, "connection reset");
        assert_eq!(err.to_string(), "remote call failed: connection reset");
    }

    #[test]
    fn test_validation_names_field() {
        let err = GmailError::validation("to", "missing '@'");
        assert_eq!(err.to_string(), "invalid to: missing '@'");
    }
}
