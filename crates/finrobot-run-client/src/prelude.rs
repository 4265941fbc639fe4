//! Common imports for typical run client usage.
pub use crate::{
    ApiClient, ClientConfig, ClientError, DisplayDocument, RenderedDocument, RunConsole,
    RunController, RunParams, RunRequest, RunViewState, ScriptRef, StreamEvent,
};
