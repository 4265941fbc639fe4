use std::time::Duration;

use crate::errors::ClientError;

/// Backend address used when `FINROBOT_API_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Log lines kept by the default presentation tail.
pub const DEFAULT_LOG_TAIL: usize = 2000;

/// How a history delete without a timestamp is handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Reject the request locally; a timestamp is required.
    #[default]
    RequireTimestamp,
    /// Forward the request without a timestamp (the backend drops every
    /// record of the script).
    AllowDeleteAll,
}

/// Configuration shared by the API client, the stream transport and the
/// renderer.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Timeout for plain request/response endpoints.
    ///
    /// Streaming runs are never cut off by this; only the connect phase of
    /// a stream is bounded (by `connect_timeout`).
    pub request_timeout: Duration,
    /// Connect timeout for every request, streaming included.
    pub connect_timeout: Duration,
    /// Number of most recent log lines a view shows.
    pub log_tail: usize,
    /// Policy for deletes issued without a timestamp.
    pub delete_policy: DeletePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            log_tail: DEFAULT_LOG_TAIL,
            delete_policy: DeletePolicy::RequireTimestamp,
        }
    }
}

impl ClientConfig {
    /// Creates a config pointing at `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().base_url(base_url)
    }

    /// Builds a config from the environment.
    ///
    /// Environment variables:
    /// - `FINROBOT_API_BASE_URL`: backend address (default `http://localhost:8000`).
    /// - `FINROBOT_REQUEST_TIMEOUT_SECS`: timeout for non-streaming requests.
    /// - `FINROBOT_LOG_TAIL`: number of log lines shown.
    /// - `FINROBOT_HISTORY_DELETE_ALL`: allow deletes without a timestamp.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Some(base_url) = read_env("FINROBOT_API_BASE_URL") {
            config = config.base_url(base_url);
        }
        if let Some(raw) = read_env("FINROBOT_REQUEST_TIMEOUT_SECS") {
            let secs = raw.parse::<u64>().map_err(|e| {
                ClientError::Config(format!("invalid FINROBOT_REQUEST_TIMEOUT_SECS {raw:?}: {e}"))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = read_env("FINROBOT_LOG_TAIL") {
            config.log_tail = raw.parse::<usize>().map_err(|e| {
                ClientError::Config(format!("invalid FINROBOT_LOG_TAIL {raw:?}: {e}"))
            })?;
        }
        if let Some(raw) = read_env("FINROBOT_HISTORY_DELETE_ALL")
            && parse_bool(&raw).unwrap_or(false)
        {
            config.delete_policy = DeletePolicy::AllowDeleteAll;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the backend base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the request timeout for non-streaming endpoints.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the presentation log tail.
    pub fn log_tail(mut self, lines: usize) -> Self {
        self.log_tail = lines;
        self
    }

    /// Overrides the delete policy.
    pub fn delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Checks that the base URL is an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base url {:?}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "base url must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Joins an API path (`/api/...`) onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Resolves a server-provided artifact path against the base URL.
    ///
    /// Relative paths are appended verbatim; absolute `http(s)` URLs are
    /// returned untouched.
    pub fn resolve_asset(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.log_tail, 2000);
        assert_eq!(config.delete_policy, DeletePolicy::RequireTimestamp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = ClientConfig::new("http://finrobot.local:9000/");
        assert_eq!(config.base_url, "http://finrobot.local:9000");
        assert_eq!(
            config.endpoint("/api/history"),
            "http://finrobot.local:9000/api/history"
        );
    }

    #[test]
    fn resolve_asset_concatenates_relative_paths_unchanged() {
        let config = ClientConfig::new("http://localhost:8000");
        assert_eq!(
            config.resolve_asset("/static/output/agent/20250501/report 1.pdf"),
            "http://localhost:8000/static/output/agent/20250501/report 1.pdf"
        );
        assert_eq!(
            config.resolve_asset("https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let err = ClientConfig::new("ftp://host").validate().expect_err("ftp");
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("http or https")));
        assert!(ClientConfig::new("not a url").validate().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
