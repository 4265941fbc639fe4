use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, service_error_message};
use crate::model::RunRequest;
use crate::sse::SseDecoder;

/// Raw `data` payloads of one live run connection, in arrival order.
pub type PayloadStream =
    Pin<Box<dyn futures::Stream<Item = Result<String, ClientError>> + Send + 'static>>;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Opens live event connections for runs.
///
/// The stream controller is the only caller; dropping the returned stream
/// closes the connection.
#[async_trait::async_trait]
pub trait RunTransport: Send + Sync {
    async fn open(&self, request: &RunRequest) -> Result<PayloadStream, ClientError>;
}

/// Server-sent-events transport against `/api/run-script/stream`.
pub struct HttpRunTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpRunTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        // no overall timeout: a run lasts until the server sends `exit`
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build stream client: {e}")))?;
        Ok(Self { client, config })
    }
}

/// Builds the stream URL with `script_path`, `lang` and JSON `params` query values.
pub fn stream_url(config: &ClientConfig, request: &RunRequest) -> Result<reqwest::Url, ClientError> {
    let mut url = reqwest::Url::parse(&config.endpoint("/api/run-script/stream"))
        .map_err(|e| ClientError::Config(format!("invalid stream url: {e}")))?;
    url.query_pairs_mut()
        .append_pair("script_path", &request.script_path())
        .append_pair("lang", &request.lang)
        .append_pair("params", &request.params_json());
    Ok(url)
}

#[async_trait::async_trait]
impl RunTransport for HttpRunTransport {
    async fn open(&self, request: &RunRequest) -> Result<PayloadStream, ClientError> {
        let url = stream_url(&self.config, request)?;
        debug!(script_path = %request.script_path(), lang = %request.lang, "opening run stream");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("run stream request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Service {
                status: status.as_u16(),
                message: service_error_message(&body),
            });
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(payload_stream(bytes_stream)))
    }
}

fn payload_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<String, ClientError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(data) = state.pending.pop_front() {
                    return Ok(Some((data, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            state.pending.push_back(frame.data);
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::transport(format!(
                            "run stream read failed: {e}"
                        )));
                    }
                    None => {
                        if state.decoder.pending_len() > 0 {
                            debug!(
                                bytes = state.decoder.pending_len(),
                                "run stream closed with an incomplete frame"
                            );
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}
