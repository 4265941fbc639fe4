//! Stream session controller: owns the single live run connection.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregate::RunViewState;
use crate::errors::ClientError;
use crate::event::{StreamEvent, parse_event};
use crate::model::{RunRequest, SessionId};
use crate::transport::RunTransport;

/// Handle used to request teardown of a running session.
#[derive(Clone)]
struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

struct ActiveSession {
    id: SessionId,
    abort: AbortHandle,
}

struct Inner {
    generation: u64,
    view: RunViewState,
}

/// View state plus the generation that is allowed to mutate it.
struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<RunViewState>,
}

enum Applied {
    Current,
    Stale,
}

impl Shared {
    fn new() -> Self {
        let (updates, _) = watch::channel(RunViewState::default());
        Self {
            inner: Mutex::new(Inner {
                generation: 0,
                view: RunViewState::default(),
            }),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.view.clone());
    }

    /// Invalidates every outstanding session.
    fn bump_generation(&self) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.generation
    }

    /// Starts a new generation with `view` as its initial state.
    fn begin(&self, view: RunViewState) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.view = view;
        self.publish(&inner);
        inner.generation
    }

    fn update(&self, f: impl FnOnce(&mut RunViewState) -> bool) {
        let mut inner = self.lock();
        if f(&mut inner.view) {
            self.publish(&inner);
        }
    }

    fn apply_if_current(
        &self,
        generation: u64,
        f: impl FnOnce(&mut RunViewState) -> bool,
    ) -> Applied {
        let mut inner = self.lock();
        if inner.generation != generation {
            return Applied::Stale;
        }
        if f(&mut inner.view) {
            self.publish(&inner);
        }
        Applied::Current
    }

    fn snapshot(&self) -> RunViewState {
        self.lock().view.clone()
    }
}

/// Owns at most one live run connection and the view state it feeds.
///
/// Starting a new run, stopping, and dropping the controller all dispose of
/// the previous session before anything else happens; events a disposed
/// session still delivers are discarded.
pub struct RunController {
    transport: Arc<dyn RunTransport>,
    shared: Arc<Shared>,
    active: Option<ActiveSession>,
}

impl RunController {
    pub fn new(transport: Arc<dyn RunTransport>) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared::new()),
            active: None,
        }
    }

    /// Starts a run, replacing any session in progress.
    ///
    /// The view state is reset to an empty running state before this
    /// returns. Must be called from within a tokio runtime.
    pub fn start(&mut self, request: RunRequest) -> Result<SessionId, ClientError> {
        request.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::Config("run sessions must be started inside a tokio runtime".into())
        })?;

        self.dispose();
        let generation = self.shared.begin(RunViewState::started());
        let id = SessionId {
            generation,
            run_id: uuid::Uuid::new_v4(),
        };
        let (abort_tx, abort_rx) = watch::channel(false);
        info!(session = %id, script_path = %request.script_path(), lang = %request.lang, "starting run session");
        runtime.spawn(session_task(
            self.transport.clone(),
            self.shared.clone(),
            id,
            request,
            abort_rx,
        ));
        self.active = Some(ActiveSession {
            id,
            abort: AbortHandle { tx: abort_tx },
        });
        Ok(id)
    }

    /// Closes the live connection (if any) and marks the run as not running.
    ///
    /// No result or error is synthesized.
    pub fn stop(&mut self) {
        self.dispose();
        self.shared.update(RunViewState::stopped);
    }

    /// Clears the view state of a finished run.
    ///
    /// Refused with [`ClientError::Busy`] while a run is in progress; call
    /// [`RunController::stop`] first.
    pub fn reset(&mut self) -> Result<(), ClientError> {
        let mut inner = self.shared.lock();
        if inner.view.running {
            return Err(ClientError::Busy);
        }
        inner.view = RunViewState::default();
        self.shared.publish(&inner);
        Ok(())
    }

    /// Copy of the current view state.
    pub fn snapshot(&self) -> RunViewState {
        self.shared.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().view.running
    }

    /// Receiver that observes every published view state.
    pub fn subscribe(&self) -> watch::Receiver<RunViewState> {
        self.shared.updates.subscribe()
    }

    /// The session currently owning the connection, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(|session| session.id)
    }

    /// Waits until the view state reports `running == false`.
    pub async fn wait_until_idle(&self) -> RunViewState {
        let mut rx = self.subscribe();
        match rx.wait_for(|view| !view.running).await {
            Ok(view) => view.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn dispose(&mut self) {
        // Bumping the generation first guarantees nothing the old task
        // delivers from here on can reach the view state.
        self.shared.bump_generation();
        if let Some(session) = self.active.take() {
            debug!(session = %session.id, "disposing run session");
            session.abort.abort();
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            session.abort.abort();
        }
    }
}

async fn session_task(
    transport: Arc<dyn RunTransport>,
    shared: Arc<Shared>,
    id: SessionId,
    request: RunRequest,
    mut abort_rx: watch::Receiver<bool>,
) {
    let generation = id.generation;
    let opened = tokio::select! {
        biased;
        _ = abort_rx.wait_for(|aborted| *aborted) => {
            debug!(session = %id, "run session aborted while connecting");
            return;
        }
        opened = transport.open(&request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            warn!(session = %id, error = %err, "failed to open run stream");
            let detail = err.to_string();
            shared.apply_if_current(generation, |view| view.connection_lost(Some(&detail)));
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = abort_rx.wait_for(|aborted| *aborted) => {
                debug!(session = %id, "run session aborted");
                return;
            }
            next = stream.next() => {
                match next {
                    Some(Ok(data)) => {
                        let Some(event) = parse_event(&data) else {
                            continue;
                        };
                        let is_exit = matches!(event, StreamEvent::Exit);
                        if let Applied::Stale = shared.apply_if_current(generation, |view| view.apply(&event)) {
                            debug!(session = %id, "discarding event from superseded session");
                            return;
                        }
                        if is_exit {
                            debug!(session = %id, "run stream finished");
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(session = %id, error = %err, "run stream failed");
                        let detail = err.to_string();
                        shared.apply_if_current(generation, |view| view.connection_lost(Some(&detail)));
                        return;
                    }
                    None => {
                        warn!(session = %id, "run stream closed before exit");
                        shared.apply_if_current(generation, |view| {
                            view.connection_lost(Some("stream closed before exit"))
                        });
                        return;
                    }
                }
            }
        }
    }
}
