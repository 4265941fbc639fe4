use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, service_error_message};
use crate::history::{DeleteOutcome, HistoryListing, HistoryService, HistorySummary};
use crate::model::{ModelEntry, RunRequest, ScriptInfo, ScriptListing};

/// Client for the plain request/response backend endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build api client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /api/models`: configured models with secrets stripped.
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>, ClientError> {
        let url = self.url(&["api", "models"])?;
        self.send_json(self.client.get(url)).await
    }

    /// `GET /api/tutorial-scripts`: runnable scripts and their parameters.
    pub async fn list_scripts(&self) -> Result<Vec<ScriptInfo>, ClientError> {
        let url = self.url(&["api", "tutorial-scripts"])?;
        let listing: ScriptListing = self.send_json(self.client.get(url)).await?;
        Ok(listing.tutorials_wrapper)
    }

    /// `POST /api/run-script`: runs a script to completion without streaming.
    ///
    /// Returns the backend's `result` value.
    pub async fn run_script(&self, request: &RunRequest) -> Result<serde_json::Value, ClientError> {
        request.validate()?;
        let url = self.url(&["api", "run-script"])?;
        let body = serde_json::json!({
            "script_path": request.script_path(),
            "params": request.params,
            "lang": request.lang,
        });
        let mut response: serde_json::Value =
            self.send_json(self.client.post(url).json(&body)).await?;
        Ok(response
            .get_mut("result")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Downloads a generated text artifact (markdown, logs, ...).
    ///
    /// `url` is resolved against the base URL like any file descriptor.
    pub async fn fetch_asset_text(&self, url: &str) -> Result<String, ClientError> {
        let url = self.config.resolve_asset(url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("failed to fetch {url}: {e}")))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Service {
                status: status.as_u16(),
                message: service_error_message(&body),
            });
        }
        Ok(body)
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("request failed: {e}")))?;
        let status = response.status();
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::transport(format!("failed to read response body: {e}")))?;
        debug!(%url, status = status.as_u16(), bytes = body.len(), "api response");
        if !status.is_success() {
            return Err(ClientError::Service {
                status: status.as_u16(),
                message: service_error_message(&body),
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| ClientError::decode(format!("unexpected response from {}: {e}", url.path())))
    }
}

#[async_trait::async_trait]
impl HistoryService for ApiClient {
    async fn list_history(&self, script: &str) -> Result<HistoryListing, ClientError> {
        let url = self.url(&["api", "history", script])?;
        self.send_json(self.client.get(url)).await
    }

    async fn delete_history(
        &self,
        script: &str,
        timestamp: Option<&str>,
    ) -> Result<DeleteOutcome, ClientError> {
        let mut url = self.url(&["api", "history", script])?;
        if let Some(timestamp) = timestamp {
            url.query_pairs_mut().append_pair("timestamp", timestamp);
        }
        self.send_json(self.client.delete(url)).await
    }

    async fn history_summary(&self) -> Result<HistorySummary, ClientError> {
        let url = self.url(&["api", "history"])?;
        self.send_json(self.client.get(url)).await
    }
}
