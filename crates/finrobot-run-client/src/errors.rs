/// Top-level error type for the run client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty script name, missing timestamp, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// The network layer failed or the connection was closed underneath us.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },
    /// The history service answered `success: false`.
    #[error("history error: {0}")]
    History(String),
    /// A response body could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// The operation is not available while a run is in progress.
    #[error("a run is in progress")]
    Busy,
    /// No script has been selected yet.
    #[error("no active script selected")]
    NoActiveScript,
    /// The requested history record is not in the loaded list.
    #[error("history record not found: {0}")]
    UnknownRecord(String),
}

impl ClientError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Returns the human-readable message without the category prefix.
    ///
    /// This is the string surfaced as a component-local error in the console.
    pub fn message(&self) -> String {
        match self {
            Self::Config(message)
            | Self::Validation(message)
            | Self::Transport(message)
            | Self::History(message)
            | Self::Decode(message) => message.clone(),
            Self::Service { message, .. } => message.clone(),
            Self::UnknownRecord(id) => format!("history record not found: {id}"),
            Self::Busy | Self::NoActiveScript => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// Extracts the most specific message from a non-2xx error body.
///
/// The backend uses `{detail: string | object}` for framework errors and
/// `{message: string}` for its own; anything else falls back to the raw body.
pub(crate) fn service_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    match value.get("detail") {
        Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => {
            return detail.clone();
        }
        Some(detail @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            return detail.to_string();
        }
        _ => {}
    }
    if let Some(message) = value.get("message").and_then(|v| v.as_str())
        && !message.trim().is_empty()
    {
        return message.to_string();
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_prefers_string_detail() {
        let body = r#"{"detail":"OAI_CONFIG_LIST not found","message":"ignored"}"#;
        assert_eq!(service_error_message(body), "OAI_CONFIG_LIST not found");
    }

    #[test]
    fn service_error_renders_object_detail_as_json() {
        let body = r#"{"detail":[{"loc":["query","script_path"],"msg":"field required"}]}"#;
        let message = service_error_message(body);
        assert!(message.contains("field required"));
        assert!(message.starts_with('['));
    }

    #[test]
    fn service_error_falls_back_to_message_then_raw_body() {
        assert_eq!(service_error_message(r#"{"message":"bad lang"}"#), "bad lang");
        assert_eq!(
            service_error_message("Internal Server Error\n"),
            "Internal Server Error"
        );
    }

    #[test]
    fn message_strips_category_prefix() {
        let err = ClientError::History("locked".into());
        assert_eq!(err.to_string(), "history error: locked");
        assert_eq!(err.message(), "locked");
    }
}
