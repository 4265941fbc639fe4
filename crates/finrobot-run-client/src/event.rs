//! Typed events carried by the run stream and the tolerant decoder for them.

use tracing::{debug, warn};

/// Coarse progress marker emitted mid-run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Phase {
    pub step: Option<String>,
    pub msg: Option<String>,
}

impl Phase {
    /// Single-line form used when a phase is mirrored into the log timeline.
    pub fn log_line(&self) -> String {
        match (self.step.as_deref(), self.msg.as_deref()) {
            (Some(step), Some(msg)) => format!("[{step}] {msg}"),
            (Some(step), None) => format!("[{step}]"),
            (None, Some(msg)) => format!("[phase] {msg}"),
            (None, None) => "[phase]".to_string(),
        }
    }
}

/// One decoded event of a run stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A line the script wrote to stdout.
    Stdout { text: String },
    /// A line the script wrote to stderr.
    Stderr { text: String },
    /// Progress marker.
    Phase(Phase),
    /// Out-of-band signal (wire type `event`).
    Signal {
        name: String,
        payload: serde_json::Value,
    },
    /// Terminal success payload.
    Result { result: serde_json::Value },
    /// Terminal failure payload.
    Error { error: String },
    /// Always the last event of a run.
    Exit,
}

impl StreamEvent {
    /// Error message carried by an `exception` signal, if this is one.
    pub fn exception_message(&self) -> Option<String> {
        match self {
            Self::Signal { name, payload } if name == "exception" => Some(
                payload
                    .get("msg")
                    .map(value_to_text)
                    .unwrap_or_else(|| value_to_text(payload)),
            ),
            _ => None,
        }
    }
}

/// Decodes one event-stream payload.
///
/// Returns `None` for unknown event types (forward compatibility) and for
/// malformed payloads, which are logged and dropped.
pub fn parse_event(data: &str) -> Option<StreamEvent> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, payload = %truncate(data, 200), "dropping malformed stream payload");
            return None;
        }
    };
    let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
        debug!(payload = %truncate(data, 200), "stream payload without type");
        return None;
    };
    let event = match event_type {
        "stdout" => required_text(&value, "text").map(|text| StreamEvent::Stdout { text }),
        "stderr" => required_text(&value, "text").map(|text| StreamEvent::Stderr { text }),
        "phase" => Some(StreamEvent::Phase(Phase {
            step: optional_text(&value, "step"),
            msg: optional_text(&value, "msg"),
        })),
        "event" => required_text(&value, "name").map(|name| StreamEvent::Signal {
            name,
            payload: value
                .get("payload")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        }),
        "result" => Some(StreamEvent::Result {
            result: value
                .get("result")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        }),
        "error" => Some(StreamEvent::Error {
            error: value
                .get("error")
                .filter(|v| !v.is_null())
                .map(value_to_text)
                .unwrap_or_else(|| "unknown error".to_string()),
        }),
        "exit" => Some(StreamEvent::Exit),
        other => {
            debug!(event_type = other, "ignoring unrecognized stream event type");
            return None;
        }
    };
    if event.is_none() {
        warn!(event_type, "dropping stream event with missing fields");
    }
    event
}

fn required_text(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).filter(|v| !v.is_null()).map(value_to_text)
}

fn optional_text(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .map(value_to_text)
        .filter(|s| !s.trim().is_empty())
}

/// Strings pass through; any other JSON value is rendered compactly.
pub(crate) fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_every_known_event_type() {
        assert_eq!(
            parse_event(r#"{"type":"stdout","text":"building"}"#),
            Some(StreamEvent::Stdout {
                text: "building".into()
            })
        );
        assert_eq!(
            parse_event(r#"{"type":"stderr","text":"warn: slow"}"#),
            Some(StreamEvent::Stderr {
                text: "warn: slow".into()
            })
        );
        assert_eq!(
            parse_event(r#"{"type":"phase","step":"fetch","msg":"loading data"}"#),
            Some(StreamEvent::Phase(Phase {
                step: Some("fetch".into()),
                msg: Some("loading data".into()),
            }))
        );
        assert_eq!(
            parse_event(r#"{"type":"result","result":{"result":[{"content":"ok"}]}}"#),
            Some(StreamEvent::Result {
                result: json!({"result":[{"content":"ok"}]})
            })
        );
        assert_eq!(
            parse_event(r#"{"type":"error","error":"boom"}"#),
            Some(StreamEvent::Error {
                error: "boom".into()
            })
        );
        assert_eq!(parse_event(r#"{"type":"exit"}"#), Some(StreamEvent::Exit));
    }

    #[test]
    fn exception_signal_exposes_message() {
        let event = parse_event(r#"{"type":"event","name":"exception","payload":{"msg":"rate limited"}}"#)
            .expect("signal");
        assert_eq!(event.exception_message().as_deref(), Some("rate limited"));

        let other = parse_event(r#"{"type":"event","name":"heartbeat","payload":{}}"#)
            .expect("signal");
        assert_eq!(other.exception_message(), None);
    }

    #[test]
    fn unknown_types_and_malformed_payloads_are_dropped() {
        assert_eq!(parse_event(r#"{"type":"progress","pct":40}"#), None);
        assert_eq!(parse_event(r#"{"text":"no type"}"#), None);
        assert_eq!(parse_event(r#"{"type":"stdout","text":"unterminated"#), None);
        assert_eq!(parse_event(r#"{"type":"stdout"}"#), None);
        assert_eq!(parse_event("   "), None);
    }

    #[test]
    fn non_string_error_payload_is_rendered_as_json() {
        assert_eq!(
            parse_event(r#"{"type":"error","error":{"code":500}}"#),
            Some(StreamEvent::Error {
                error: r#"{"code":500}"#.into()
            })
        );
    }

    #[test]
    fn phase_log_line_covers_partial_fields() {
        let both = Phase {
            step: Some("fetch".into()),
            msg: Some("loading data".into()),
        };
        assert_eq!(both.log_line(), "[fetch] loading data");
        let msg_only = Phase {
            step: None,
            msg: Some("thinking".into()),
        };
        assert_eq!(msg_only.log_line(), "[phase] thinking");
        assert_eq!(Phase::default().log_line(), "[phase]");
    }
}
