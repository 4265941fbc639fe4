use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ClientError;

/// Parameters passed to a script run, keyed by parameter name.
pub type RunParams = serde_json::Map<String, serde_json::Value>;

/// Identifies a tutorial script by folder (`beginner`, `advanced`, ...) and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptRef {
    pub folder: String,
    pub script: String,
}

impl ScriptRef {
    pub fn new(folder: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            script: script.into(),
        }
    }

    /// Parses `folder/script` or a bare `script`.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let raw = raw.trim().trim_matches('/');
        let (folder, script) = match raw.rsplit_once('/') {
            Some((folder, script)) => (folder, script),
            None => ("", raw),
        };
        let script = script.trim_end_matches(".py");
        if script.trim().is_empty() {
            return Err(ClientError::Validation(
                "script identifier must not be empty".into(),
            ));
        }
        Ok(Self::new(folder, script))
    }

    /// Path sent to the backend: `folder/script`, or the bare script name.
    pub fn script_path(&self) -> String {
        if self.folder.is_empty() {
            self.script.clone()
        } else {
            format!("{}/{}", self.folder, self.script)
        }
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.script_path())
    }
}

/// A single run submission. Immutable once a stream starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub script: String,
    pub folder: String,
    pub lang: String,
    pub params: RunParams,
}

impl RunRequest {
    pub fn new(script: &ScriptRef, lang: impl Into<String>, params: RunParams) -> Self {
        Self {
            script: script.script.clone(),
            folder: script.folder.clone(),
            lang: lang.into(),
            params,
        }
    }

    pub fn script_ref(&self) -> ScriptRef {
        ScriptRef::new(self.folder.clone(), self.script.clone())
    }

    /// Path sent to the backend as `script_path`.
    pub fn script_path(&self) -> String {
        self.script_ref().script_path()
    }

    /// JSON form of the parameters, as passed in the stream query string.
    pub fn params_json(&self) -> String {
        serde_json::Value::Object(self.params.clone()).to_string()
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.script.trim().is_empty() {
            return Err(ClientError::Validation(
                "script identifier must not be empty".into(),
            ));
        }
        if self.lang.trim().is_empty() {
            return Err(ClientError::Validation("lang must not be empty".into()));
        }
        Ok(())
    }
}

/// Monotonic identifier of a stream session inside one controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub generation: u64,
    pub run_id: uuid::Uuid,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.run_id, self.generation)
    }
}

/// Parameter description discovered from a script's source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "defaultValue", default)]
    pub default_value: serde_json::Value,
}

/// Entry of the tutorial-script listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub script_name: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
}

impl ScriptInfo {
    pub fn script_ref(&self) -> ScriptRef {
        ScriptRef::new(self.folder.clone(), self.script_name.clone())
    }

    /// Merges `overrides` on top of the advertised default values.
    pub fn params_with_defaults(&self, overrides: &RunParams) -> RunParams {
        let mut params: RunParams = self
            .params
            .iter()
            .filter(|(_, spec)| !spec.default_value.is_null())
            .map(|(key, spec)| (key.clone(), spec.default_value.clone()))
            .collect();
        for (key, value) in overrides {
            params.insert(key.clone(), value.clone());
        }
        params
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScriptListing {
    #[serde(default)]
    pub tutorials_wrapper: Vec<ScriptInfo>,
}

/// Sanitized model configuration entry (the backend strips API keys).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub model: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_ref_parses_folder_and_name() {
        let script = ScriptRef::parse("beginner/agent_rag_qa.py").expect("parse");
        assert_eq!(script, ScriptRef::new("beginner", "agent_rag_qa"));
        assert_eq!(script.script_path(), "beginner/agent_rag_qa");

        let bare = ScriptRef::parse("sma_strategy").expect("bare");
        assert_eq!(bare.script_path(), "sma_strategy");
        assert!(ScriptRef::parse(" / ").is_err());
    }

    #[test]
    fn run_request_serializes_params_as_json_object() {
        let mut params = RunParams::new();
        params.insert("company".into(), json!("apple"));
        let request = RunRequest::new(&ScriptRef::new("advanced", "agent_annual_report"), "en", params);
        assert_eq!(request.script_path(), "advanced/agent_annual_report");
        assert_eq!(request.params_json(), r#"{"company":"apple"}"#);
    }

    #[test]
    fn run_request_validation_rejects_blank_script() {
        let request = RunRequest::new(&ScriptRef::new("beginner", " "), "en", RunParams::new());
        assert!(matches!(request.validate(), Err(ClientError::Validation(_))));
    }

    #[test]
    fn script_listing_decodes_param_defaults() {
        let listing: ScriptListing = serde_json::from_value(json!({
            "tutorials_wrapper": [{
                "script_name": "agent_fingpt_forecaster",
                "folder": "beginner",
                "params": {
                    "company": {"type": "string", "defaultValue": "apple"},
                    "date": {"type": "date", "defaultValue": "2025-05-01"}
                }
            }]
        }))
        .expect("decode");
        let info = &listing.tutorials_wrapper[0];
        assert_eq!(info.params["date"].kind, "date");

        let mut overrides = RunParams::new();
        overrides.insert("company".into(), json!("nvidia"));
        let params = info.params_with_defaults(&overrides);
        assert_eq!(params["company"], json!("nvidia"));
        assert_eq!(params["date"], json!("2025-05-01"));
    }

    #[test]
    fn model_entry_keeps_unknown_keys() {
        let entry: ModelEntry =
            serde_json::from_value(json!({"model": "gpt-4o", "base_url": "http://proxy"}))
                .expect("decode");
        assert_eq!(entry.model, "gpt-4o");
        assert_eq!(entry.extra["base_url"], json!("http://proxy"));
    }
}
