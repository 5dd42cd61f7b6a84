use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use common::{CommandRecord, CommandRecorder, Decode, RemoteStore, SharedDiagnostics, StoreError};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActuatorCommandState {
    Idle,
    InFlight,
    CoolingDown,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("reading current state failed: {0}")]
    Read(StoreError),

    #[error("writing new state failed: {0}")]
    Write(StoreError),

    #[error("{path} holds a non-boolean value: {found}")]
    NotBoolean { path: String, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggled {
    pub previous: bool,
    pub written: bool,
}

pub type CommandResult = Result<Toggled, CommandError>;

/// Answer to a toggle request.
#[derive(Debug)]
pub enum ToggleRequest {
    /// The command is running detached; awaiting the handle is optional.
    Accepted(JoinHandle<CommandResult>),
    /// Another command owns the actuator; nothing was sent to the store.
    Rejected(ActuatorCommandState),
    /// Called outside a tokio runtime; the actuator was left Idle.
    NoRuntime,
}

impl ToggleRequest {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ToggleRequest::Accepted(_))
    }

    /// Waits for an accepted command. `None` when rejected or the task died.
    pub async fn outcome(self) -> Option<CommandResult> {
        match self {
            ToggleRequest::Accepted(handle) => handle.await.ok(),
            ToggleRequest::Rejected(_) | ToggleRequest::NoRuntime => None,
        }
    }
}

struct ControllerInner {
    path: String,
    store: Arc<dyn RemoteStore>,
    state: watch::Sender<ActuatorCommandState>,
    cooldown: Duration,
    diagnostics: Arc<SharedDiagnostics>,
    recorder: Option<CommandRecorder>,
}

/// Toggles one boolean path with at most one command in flight.
///
/// The read and the write are separate store calls. A writer that lands
/// between them is overwritten with the negation of the stale read; the
/// store offers no compare-and-swap to close that window.
///
/// Clones share the same state machine.
#[derive(Clone)]
pub struct ActuatorController {
    inner: Arc<ControllerInner>,
}

impl ActuatorController {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        path: &str,
        cooldown: Duration,
        diagnostics: Arc<SharedDiagnostics>,
        recorder: Option<CommandRecorder>,
    ) -> Self {
        let (state, _) = watch::channel(ActuatorCommandState::Idle);
        Self {
            inner: Arc::new(ControllerInner {
                path: path.to_string(),
                store,
                state,
                cooldown,
                diagnostics,
                recorder,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn state(&self) -> ActuatorCommandState {
        *self.inner.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ActuatorCommandState> {
        self.inner.state.subscribe()
    }

    pub fn cooldown(&self) -> Duration {
        self.inner.cooldown
    }

    /// Starts a toggle if the actuator is idle.
    pub fn toggle(&self) -> ToggleRequest {
        let Ok(runtime) = Handle::try_current() else {
            warn!(path = %self.inner.path, "toggle needs a tokio runtime, ignored");
            return ToggleRequest::NoRuntime;
        };

        let acquired = self.inner.state.send_if_modified(|state| {
            if *state == ActuatorCommandState::Idle {
                *state = ActuatorCommandState::InFlight;
                true
            } else {
                false
            }
        });

        if !acquired {
            let current = self.state();
            self.inner.diagnostics.record_command_rejected();
            debug!(
                path = %self.inner.path,
                state = ?current,
                "toggle ignored, command already active"
            );
            return ToggleRequest::Rejected(current);
        }

        self.inner.diagnostics.record_command_accepted();
        let controller = self.clone();
        ToggleRequest::Accepted(runtime.spawn(async move { controller.run_command().await }))
    }

    async fn run_command(self) -> CommandResult {
        let started_at = Utc::now();
        let started = Instant::now();
        let path = &self.inner.path;

        let result = self.read_then_write().await;
        match &result {
            Ok(toggled) => {
                self.inner.diagnostics.record_command_completed();
                info!(path = %path, written = toggled.written, "actuator toggled");
            }
            Err(error) => {
                self.inner.diagnostics.record_command_failed();
                warn!(path = %path, %error, "toggle abandoned");
            }
        }

        if let Some(recorder) = &self.inner.recorder {
            recorder.record(CommandRecord {
                path: path.clone(),
                started_at,
                previous: result.as_ref().ok().map(|t| t.previous),
                written: result.as_ref().ok().map(|t| t.written),
                succeeded: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
                latency_us: started.elapsed().as_micros() as u64,
            });
        }

        self.enter_cooldown();
        result
    }

    async fn read_then_write(&self) -> CommandResult {
        let path = &self.inner.path;
        let current = self.inner.store.get(path).await.map_err(CommandError::Read)?;

        // Never-written actuators read as off
        let previous = match current {
            None => false,
            Some(raw) => bool::decode(&raw).ok_or_else(|| CommandError::NotBoolean {
                path: path.clone(),
                found: raw.to_string(),
            })?,
        };

        let written = !previous;
        self.inner
            .store
            .set(path, Value::Bool(written))
            .await
            .map_err(CommandError::Write)?;

        Ok(Toggled { previous, written })
    }

    fn enter_cooldown(&self) {
        self.inner.state.send_replace(ActuatorCommandState::CoolingDown);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.cooldown).await;
            inner.state.send_replace(ActuatorCommandState::Idle);
            debug!(path = %inner.path, "actuator ready");
        });
    }
}
