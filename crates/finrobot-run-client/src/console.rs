//! Run console: one active script, its live run and its history.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::aggregate::{ResultStamp, RunViewState};
use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::controller::RunController;
use crate::errors::ClientError;
use crate::history::{DisplayDocument, HistoryRecord, HistoryReconciler, HistoryService};
use crate::model::{RunParams, RunRequest, ScriptRef, SessionId};
use crate::render::{RenderedDocument, render};
use crate::transport::{HttpRunTransport, RunTransport};

/// Language used when none is set.
pub const DEFAULT_LANG: &str = "en";

#[derive(Debug, Default)]
struct Observed {
    running: bool,
    stamp: Option<ResultStamp>,
}

/// Ties the stream controller to the history reconciler for the active script.
pub struct RunConsole {
    controller: RunController,
    history: HistoryReconciler,
    config: ClientConfig,
    script: Option<ScriptRef>,
    lang: String,
    observed: Observed,
}

impl RunConsole {
    pub fn new(
        transport: Arc<dyn RunTransport>,
        history: Arc<dyn HistoryService>,
        config: ClientConfig,
    ) -> Self {
        Self {
            controller: RunController::new(transport),
            history: HistoryReconciler::new(history, config.delete_policy),
            config,
            script: None,
            lang: DEFAULT_LANG.to_string(),
            observed: Observed::default(),
        }
    }

    /// Console backed by the HTTP transport and API client for `config`.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(HttpRunTransport::new(config.clone())?);
        let api = Arc::new(ApiClient::new(config.clone())?);
        Ok(Self::new(transport, api, config))
    }

    /// Sets the language passed to subsequent runs.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn active_script(&self) -> Option<&ScriptRef> {
        self.script.as_ref()
    }

    pub fn history(&self) -> &HistoryReconciler {
        &self.history
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Switches to `script`: the live run is stopped, the view cleared and
    /// the history scoped to the new script.
    pub async fn select_script(&mut self, script: ScriptRef) -> Result<(), ClientError> {
        debug!(script = %script, "selecting script");
        self.controller.stop();
        self.controller.reset()?;
        self.observed = Observed::default();
        self.history.switch_script(&script.script);
        let name = script.script.clone();
        self.script = Some(script);
        self.history.load_history(&name, false).await
    }

    /// Starts a run of the active script.
    pub fn submit(&mut self, params: RunParams) -> Result<SessionId, ClientError> {
        let script = self.script.as_ref().ok_or(ClientError::NoActiveScript)?;
        let request = RunRequest::new(script, self.lang.clone(), params);
        let id = self.controller.start(request)?;
        self.history.clear_selection();
        self.observed = Observed {
            running: true,
            stamp: None,
        };
        Ok(id)
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    /// Clears the view of a finished run; [`ClientError::Busy`] mid-run.
    pub fn reset(&mut self) -> Result<(), ClientError> {
        self.controller.reset()
    }

    pub fn view(&self) -> RunViewState {
        self.controller.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunViewState> {
        self.controller.subscribe()
    }

    /// Reloads history when the run has just stopped or a new result arrived.
    ///
    /// Returns whether a reload happened.
    pub async fn sync(&mut self) -> Result<bool, ClientError> {
        let view = self.controller.snapshot();
        let stamp = view.result_stamp();
        let finished = self.observed.running && !view.running;
        let new_result = stamp.is_some() && stamp != self.observed.stamp;
        self.observed = Observed {
            running: view.running,
            stamp,
        };
        if !finished && !new_result {
            return Ok(false);
        }
        let Some(name) = self.script.as_ref().map(|s| s.script.clone()) else {
            return Ok(false);
        };
        if finished {
            self.history.arm_auto_select();
        }
        debug!(script = %name, finished, new_result, "refreshing history");
        self.history.load_history(&name, view.has_result()).await?;
        Ok(true)
    }

    /// History cannot be browsed mid-run.
    pub fn history_visible(&self) -> bool {
        !self.controller.is_running()
    }

    pub fn select_history(&mut self, id: &str) -> Result<&HistoryRecord, ClientError> {
        if self.controller.is_running() {
            return Err(ClientError::Busy);
        }
        self.history.select(id)
    }

    pub fn clear_history_selection(&mut self) {
        self.history.clear_selection();
    }

    pub async fn delete_history(&mut self, timestamp: Option<&str>) -> Result<(), ClientError> {
        if self.controller.is_running() {
            return Err(ClientError::Busy);
        }
        let name = self
            .script
            .as_ref()
            .map(|s| s.script.clone())
            .ok_or(ClientError::NoActiveScript)?;
        let has_live_result = self.controller.snapshot().has_result();
        self.history
            .delete_history(&name, timestamp, has_live_result)
            .await
    }

    /// Live result while running, otherwise the reconciled selection.
    pub fn display_document(&self) -> DisplayDocument {
        let view = self.controller.snapshot();
        if view.running {
            return DisplayDocument::Current(view.result);
        }
        self.history.display_document(view.result.as_ref())
    }

    pub fn rendered(&self) -> RenderedDocument {
        render(&self.display_document(), &self.config)
    }

    /// Follows the live run until it stops, passing every observed view to
    /// `on_update` and keeping history in sync.
    ///
    /// History errors are kept on the reconciler and do not end the wait.
    pub async fn wait_for_completion(
        &mut self,
        mut on_update: impl FnMut(&RunViewState),
    ) -> RunViewState {
        let mut rx = self.controller.subscribe();
        loop {
            let view = rx.borrow_and_update().clone();
            on_update(&view);
            if let Err(err) = self.sync().await {
                warn!(error = %err, "history refresh failed");
            }
            if !view.running {
                return view;
            }
            if rx.changed().await.is_err() {
                return self.controller.snapshot();
            }
        }
    }
}
