//! Reducer that folds stream events into the view state of one run.

use crate::event::{Phase, StreamEvent, value_to_text};

/// Message recorded when the connection drops before `exit`.
pub const CONNECTION_ERROR: &str = "connection error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogKind {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LogKind,
    pub text: String,
}

impl LogLine {
    fn stdout(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Stdout,
            text: text.into(),
        }
    }

    fn stderr(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Stderr,
            text: text.into(),
        }
    }
}

/// Value compared between snapshots to detect a newly received result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultStamp {
    pub revision: u64,
    pub timestamp: Option<String>,
}

/// Aggregated state of the current run.
///
/// `logs` is unbounded and strictly in arrival order; use [`RunViewState::tail`]
/// for a display window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunViewState {
    pub logs: Vec<LogLine>,
    pub phase: Option<Phase>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub running: bool,
    terminated: bool,
    result_revision: u64,
}

impl RunViewState {
    /// Empty state of a run that has just been started.
    pub fn started() -> Self {
        Self {
            running: true,
            ..Self::default()
        }
    }

    /// True once `exit` or a connection error has been applied.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// True when a result payload with something in it has been received.
    pub fn has_result(&self) -> bool {
        self.result.as_ref().is_some_and(has_content)
    }

    /// Stamp of the last result: payload `timestamp` plus a local revision.
    pub fn result_stamp(&self) -> Option<ResultStamp> {
        let result = self.result.as_ref()?;
        Some(ResultStamp {
            revision: self.result_revision,
            timestamp: result
                .get("timestamp")
                .filter(|v| !v.is_null())
                .map(value_to_text),
        })
    }

    /// The most recent `n` log lines, order preserved.
    pub fn tail(&self, n: usize) -> &[LogLine] {
        let start = self.logs.len().saturating_sub(n);
        &self.logs[start..]
    }

    /// Applies one event. Returns whether the state changed.
    ///
    /// A terminated state is frozen: every event, including a repeated
    /// `exit`, is a no-op.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.terminated {
            return false;
        }
        match event {
            StreamEvent::Stdout { text } => self.logs.push(LogLine::stdout(text.clone())),
            StreamEvent::Stderr { text } => self.logs.push(LogLine::stderr(text.clone())),
            StreamEvent::Phase(phase) => {
                self.logs.push(LogLine::stdout(phase.log_line()));
                self.phase = Some(phase.clone());
            }
            StreamEvent::Signal { .. } => {
                let Some(message) = event.exception_message() else {
                    return false;
                };
                self.record_error(message.clone());
                self.logs.push(LogLine::stderr(message));
            }
            StreamEvent::Result { result } => {
                if let Some(embedded) = embedded_error(result) {
                    self.record_error(embedded.clone());
                    self.logs.push(LogLine::stderr(embedded));
                }
                self.result = Some(result.clone());
                self.result_revision += 1;
            }
            StreamEvent::Error { error } => {
                self.record_error(error.clone());
                self.logs.push(LogLine::stderr(error.clone()));
            }
            StreamEvent::Exit => {
                self.running = false;
                self.terminated = true;
            }
        }
        true
    }

    /// Marks the run as ended by a transport failure.
    ///
    /// The generic message is only recorded when no more specific error
    /// exists; `detail` always lands in the log as a stderr line.
    pub fn connection_lost(&mut self, detail: Option<&str>) -> bool {
        if self.terminated {
            return false;
        }
        self.record_error(CONNECTION_ERROR.to_string());
        if let Some(detail) = detail.filter(|d| !d.trim().is_empty()) {
            self.logs.push(LogLine::stderr(format!("{CONNECTION_ERROR}: {detail}")));
        }
        self.running = false;
        self.terminated = true;
        true
    }

    /// Abandons the run without recording a result or an error.
    pub fn stopped(&mut self) -> bool {
        let changed = self.running;
        self.running = false;
        changed
    }

    // First error seen wins; later ones only show up in the log.
    fn record_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

// `{result: [...], generated_files: {files: [...]}}` counts as empty when
// both lists are.
fn has_content(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.trim().is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) if map.contains_key("result") => {
            map.get("result").is_some_and(has_content)
                || map
                    .get("generated_files")
                    .and_then(|g| g.get("files"))
                    .is_some_and(has_content)
        }
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn embedded_error(result: &serde_json::Value) -> Option<String> {
    result
        .get("error")
        .filter(|v| !v.is_null())
        .map(value_to_text)
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stdout(text: &str) -> StreamEvent {
        StreamEvent::Stdout { text: text.into() }
    }

    fn stderr(text: &str) -> StreamEvent {
        StreamEvent::Stderr { text: text.into() }
    }

    #[test]
    fn successful_run_scenario() {
        let mut state = RunViewState::started();
        for event in [
            stdout("building"),
            StreamEvent::Phase(Phase {
                step: Some("fetch".into()),
                msg: Some("loading data".into()),
            }),
            StreamEvent::Result {
                result: json!({"result": [{"content": "ok"}]}),
            },
            StreamEvent::Exit,
        ] {
            state.apply(&event);
        }
        assert_eq!(state.logs.len(), 2);
        assert_eq!(state.logs[0], LogLine::stdout("building"));
        assert_eq!(state.logs[1], LogLine::stdout("[fetch] loading data"));
        assert!(!state.running);
        assert_eq!(state.result.as_ref().expect("result")["result"][0]["content"], "ok");
        assert_eq!(state.error, None);
        assert_eq!(state.phase.as_ref().and_then(|p| p.step.as_deref()), Some("fetch"));
    }

    #[test]
    fn error_run_scenario() {
        let mut state = RunViewState::started();
        state.apply(&StreamEvent::Error {
            error: "boom".into(),
        });
        state.apply(&StreamEvent::Exit);
        assert!(!state.running);
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert_eq!(state.result, None);
        assert_eq!(state.logs, vec![LogLine::stderr("boom")]);
    }

    #[test]
    fn output_order_is_preserved_across_streams() {
        let mut state = RunViewState::started();
        let events: Vec<StreamEvent> = (0..50)
            .map(|i| {
                if i % 3 == 0 {
                    stderr(&format!("e{i}"))
                } else {
                    stdout(&format!("o{i}"))
                }
            })
            .collect();
        for event in &events {
            state.apply(event);
        }
        let texts: Vec<&str> = state.logs.iter().map(|l| l.text.as_str()).collect();
        let expected: Vec<String> = (0..50)
            .map(|i| if i % 3 == 0 { format!("e{i}") } else { format!("o{i}") })
            .collect();
        assert_eq!(texts, expected);
        assert_eq!(state.tail(3).iter().map(|l| l.text.as_str()).collect::<Vec<_>>(), ["o47", "e48", "o49"]);
        assert_eq!(state.tail(500).len(), 50);
    }

    #[test]
    fn exit_freezes_state_and_is_idempotent() {
        let mut state = RunViewState::started();
        assert!(state.apply(&StreamEvent::Exit));
        let frozen = state.clone();
        assert!(!state.apply(&StreamEvent::Exit));
        assert!(!state.apply(&stdout("late")));
        assert!(!state.apply(&StreamEvent::Result { result: json!({"result": []}) }));
        assert!(!state.connection_lost(Some("reset by peer")));
        assert_eq!(state, frozen);
        assert!(!state.running);
    }

    #[test]
    fn only_exit_stop_or_connection_loss_clear_running() {
        let mut state = RunViewState::started();
        state.apply(&StreamEvent::Result { result: json!({"result": []}) });
        state.apply(&StreamEvent::Error { error: "x".into() });
        state.apply(&StreamEvent::Signal {
            name: "exception".into(),
            payload: json!({"msg": "y"}),
        });
        assert!(state.running);
        assert!(state.stopped());
        assert!(!state.running);
        assert!(!state.is_terminated());
    }

    #[test]
    fn first_seen_error_wins_and_every_error_is_logged() {
        let mut state = RunViewState::started();
        state.apply(&StreamEvent::Signal {
            name: "exception".into(),
            payload: json!({"msg": "quota exceeded"}),
        });
        state.apply(&StreamEvent::Error {
            error: "Traceback ...".into(),
        });
        state.apply(&StreamEvent::Result {
            result: json!({"result": [], "error": "embedded"}),
        });
        assert_eq!(state.error.as_deref(), Some("quota exceeded"));
        assert_eq!(
            state.logs,
            vec![
                LogLine::stderr("quota exceeded"),
                LogLine::stderr("Traceback ..."),
                LogLine::stderr("embedded"),
            ]
        );
    }

    #[test]
    fn result_embedded_error_is_lifted_and_logged() {
        let mut state = RunViewState::started();
        state.apply(&StreamEvent::Result {
            result: json!({"result": [], "error": "no filings found"}),
        });
        assert_eq!(state.error.as_deref(), Some("no filings found"));
        assert_eq!(state.logs, vec![LogLine::stderr("no filings found")]);
    }

    #[test]
    fn non_exception_signals_change_nothing() {
        let mut state = RunViewState::started();
        assert!(!state.apply(&StreamEvent::Signal {
            name: "heartbeat".into(),
            payload: json!({}),
        }));
        assert_eq!(state, RunViewState::started());
    }

    #[test]
    fn connection_loss_keeps_specific_error() {
        let mut state = RunViewState::started();
        state.apply(&StreamEvent::Error { error: "boom".into() });
        assert!(state.connection_lost(Some("stream closed")));
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert_eq!(state.logs.last().map(|l| l.kind), Some(LogKind::Stderr));

        let mut fresh = RunViewState::started();
        fresh.connection_lost(None);
        assert_eq!(fresh.error.as_deref(), Some(CONNECTION_ERROR));
        assert!(fresh.logs.is_empty());
        assert!(fresh.is_terminated());
    }

    #[test]
    fn result_stamp_tracks_revision_and_payload_timestamp() {
        let mut state = RunViewState::started();
        assert_eq!(state.result_stamp(), None);
        state.apply(&StreamEvent::Result {
            result: json!({"result": [], "timestamp": "2025-05-01T10:00:00"}),
        });
        let first = state.result_stamp().expect("stamp");
        assert_eq!(first.timestamp.as_deref(), Some("2025-05-01T10:00:00"));
        state.apply(&StreamEvent::Result {
            result: json!({"result": []}),
        });
        let second = state.result_stamp().expect("stamp");
        assert_ne!(first, second);
        assert_eq!(second.revision, 2);
        assert!(!state.has_result());
    }
}
