//! Client-side orchestration of FinRobot script runs.
//!
//! A run is started against the backend's event-stream endpoint, its events
//! are folded into a [`RunViewState`], and the persisted history of the
//! script is kept in step with it. [`RunConsole`] ties the pieces together.
//!
//! # Usage
//!
//! ```no_run
//! use finrobot_run_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let mut console = RunConsole::connect(ClientConfig::from_env()?)?.lang("en");
//! console.select_script(ScriptRef::parse("beginner/agent_rag_qa")?).await?;
//! console.submit(RunParams::new())?;
//!
//! let view = console
//!     .wait_for_completion(|view| {
//!         if let Some(line) = view.logs.last() {
//!             println!("{}", line.text);
//!         }
//!     })
//!     .await;
//! println!("{}", console.rendered().to_terminal());
//! # let _ = view;
//! # Ok(())
//! # }
//! ```

/// Run state reducer.
pub mod aggregate;
/// Request/response backend endpoints.
pub mod api;
/// Client configuration.
pub mod config;
/// Controller plus history for one active script.
pub mod console;
/// Stream session controller.
pub mod controller;
/// Public error type.
pub mod errors;
/// Stream event types and decoding.
pub mod event;
/// Run history types and selection reconciliation.
pub mod history;
/// Scripts, run requests and session identifiers.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Result rendering.
pub mod render;
/// `text/event-stream` framing.
pub mod sse;
/// Live run connections.
pub mod transport;

pub use aggregate::{CONNECTION_ERROR, LogKind, LogLine, ResultStamp, RunViewState};
pub use api::ApiClient;
pub use config::{ClientConfig, DeletePolicy};
pub use console::RunConsole;
pub use controller::RunController;
pub use errors::ClientError;
pub use event::{Phase, StreamEvent, parse_event};
pub use history::{
    DisplayDocument, FileDescriptor, GeneratedFiles, HistoryReconciler, HistoryRecord,
    HistoryService, HistorySummary, Selection,
};
pub use model::{ModelEntry, ParamSpec, RunParams, RunRequest, ScriptInfo, ScriptRef, SessionId};
pub use observability::init_observability;
pub use render::{ContentBlock, FileKind, FilePreview, PreviewToggles, RenderedDocument, render};
pub use transport::{HttpRunTransport, PayloadStream, RunTransport};
