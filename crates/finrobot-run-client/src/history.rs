//! Persisted run history and the selection state kept on top of it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DeletePolicy;
use crate::errors::ClientError;

/// Pointer to a server-hosted artifact produced by a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub size_human: String,
    #[serde(default)]
    pub modified_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFiles {
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// A persisted snapshot of a completed run. Read-only on the client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[serde(default)]
    pub script_name: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_files: Option<GeneratedFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

// Record keys arrive as strings from the file store but may be numeric.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

impl HistoryRecord {
    /// Label for lists: the server's display name, or one derived from the
    /// timestamp when the server sent none.
    pub fn label(&self) -> String {
        if !self.display_name.trim().is_empty() {
            return self.display_name.clone();
        }
        let when = chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            })
            .unwrap_or_else(|_| "Unknown time".to_string());
        format!("{when} ({} messages)", self.message_count)
    }
}

/// `GET /api/history/{script}` body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HistoryListing {
    pub success: bool,
    #[serde(default)]
    pub script_name: String,
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `DELETE /api/history/{script}` body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ScriptHistorySummary {
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub latest_timestamp: String,
    #[serde(default)]
    pub latest_display_name: String,
}

/// `GET /api/history` body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HistorySummary {
    pub success: bool,
    #[serde(default)]
    pub scripts: BTreeMap<String, ScriptHistorySummary>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Remote store of run history.
#[async_trait::async_trait]
pub trait HistoryService: Send + Sync {
    async fn list_history(&self, script: &str) -> Result<HistoryListing, ClientError>;

    async fn delete_history(
        &self,
        script: &str,
        timestamp: Option<&str>,
    ) -> Result<DeleteOutcome, ClientError>;

    async fn history_summary(&self) -> Result<HistorySummary, ClientError>;
}

/// Which history record, if any, is being displayed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Unselected,
    /// Picked by the reconciler (newest record).
    Auto(String),
    /// Picked by the user.
    User(String),
}

impl Selection {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Unselected => None,
            Self::Auto(id) | Self::User(id) => Some(id),
        }
    }
}

/// What the renderer is handed: the live result or one history record.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayDocument {
    Current(Option<serde_json::Value>),
    Historical(HistoryRecord),
}

/// Keeps the history list of the active script and a consistent selection.
pub struct HistoryReconciler {
    service: Arc<dyn HistoryService>,
    delete_policy: DeletePolicy,
    script: Option<String>,
    records: Vec<HistoryRecord>,
    selection: Selection,
    auto_select_pending: bool,
    error: Option<String>,
}

impl HistoryReconciler {
    pub fn new(service: Arc<dyn HistoryService>, delete_policy: DeletePolicy) -> Self {
        Self {
            service,
            delete_policy,
            script: None,
            records: Vec::new(),
            selection: Selection::Unselected,
            auto_select_pending: true,
            error: None,
        }
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Records of the active script, newest first as served.
    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_record(&self) -> Option<&HistoryRecord> {
        let id = self.selection.id()?;
        self.records.iter().find(|r| r.id == id)
    }

    /// Last history-service error; cleared by the next successful call.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Drops every record and selection of the previous script.
    pub fn switch_script(&mut self, script: &str) {
        if self.script.as_deref() != Some(script) {
            debug!(script, "switching history scope");
        }
        self.script = Some(script.to_string());
        self.records.clear();
        self.selection = Selection::Unselected;
        self.error = None;
        self.auto_select_pending = true;
    }

    /// Makes the next load select the newest record.
    pub fn arm_auto_select(&mut self) {
        self.auto_select_pending = true;
    }

    /// Fetches and installs the records of `script`, then repairs the selection.
    ///
    /// `has_live_result` tells the repair policy whether a live result can
    /// be shown instead of a vanished selection.
    pub async fn load_history(
        &mut self,
        script: &str,
        has_live_result: bool,
    ) -> Result<(), ClientError> {
        if self.script.as_deref() != Some(script) {
            self.switch_script(script);
        }
        let listing = match self.service.list_history(script).await {
            Ok(listing) => listing,
            Err(err) => return Err(self.fail(err)),
        };
        if !listing.success {
            let message = listing
                .error
                .unwrap_or_else(|| "failed to load history".to_string());
            return Err(self.fail(ClientError::History(message)));
        }
        self.error = None;
        self.install(listing.records, has_live_result);
        Ok(())
    }

    /// Deletes one record (or all, when the policy allows omitting the
    /// timestamp) and reloads on success.
    ///
    /// A failed delete leaves the list and selection untouched.
    pub async fn delete_history(
        &mut self,
        script: &str,
        timestamp: Option<&str>,
        has_live_result: bool,
    ) -> Result<(), ClientError> {
        if timestamp.is_none() && self.delete_policy == DeletePolicy::RequireTimestamp {
            return Err(self.fail(ClientError::Validation(
                "a timestamp is required to delete a history record".into(),
            )));
        }
        let outcome = match self.service.delete_history(script, timestamp).await {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.fail(err)),
        };
        if !outcome.success {
            let message = outcome
                .error
                .unwrap_or_else(|| "failed to delete history".to_string());
            return Err(self.fail(ClientError::History(message)));
        }
        debug!(script, timestamp, "history deleted");
        self.selection = Selection::Unselected;
        self.auto_select_pending = true;
        self.load_history(script, has_live_result).await
    }

    /// Marks `id` as the user's pick.
    pub fn select(&mut self, id: &str) -> Result<&HistoryRecord, ClientError> {
        let Some(index) = self.records.iter().position(|r| r.id == id) else {
            return Err(ClientError::UnknownRecord(id.to_string()));
        };
        self.selection = Selection::User(id.to_string());
        Ok(&self.records[index])
    }

    /// Falls back to the live result.
    pub fn clear_selection(&mut self) {
        self.selection = Selection::Unselected;
    }

    /// The historical record when one is selected, otherwise the live result.
    pub fn display_document(&self, live_result: Option<&serde_json::Value>) -> DisplayDocument {
        match self.selected_record() {
            Some(record) => DisplayDocument::Historical(record.clone()),
            None => DisplayDocument::Current(live_result.cloned()),
        }
    }

    /// All-scripts overview.
    pub async fn summary(&mut self) -> Result<HistorySummary, ClientError> {
        let summary = match self.service.history_summary().await {
            Ok(summary) => summary,
            Err(err) => return Err(self.fail(err)),
        };
        if !summary.success {
            let message = summary
                .error
                .unwrap_or_else(|| "failed to load history summary".to_string());
            return Err(self.fail(ClientError::History(message)));
        }
        Ok(summary)
    }

    fn install(&mut self, records: Vec<HistoryRecord>, has_live_result: bool) {
        self.records = records;
        let newest = self.records.first().map(|r| r.id.clone());
        let Some(newest) = newest else {
            self.selection = Selection::Unselected;
            self.auto_select_pending = false;
            return;
        };
        if std::mem::take(&mut self.auto_select_pending) {
            self.selection = Selection::Auto(newest);
            return;
        }
        let still_present = self
            .selection
            .id()
            .is_some_and(|id| self.records.iter().any(|r| r.id == id));
        if self.selection == Selection::Unselected || still_present {
            return;
        }
        self.selection = if has_live_result {
            Selection::Unselected
        } else {
            Selection::Auto(newest)
        };
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        warn!(error = %err, "history service call failed");
        self.error = Some(err.message());
        err
    }
}
