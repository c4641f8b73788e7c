//! Engine lifecycle
//!
//! ```text
//! Starting ─► Recovering ─► Open ─► Closing ─► Closed
//!     │            │          │        │
//!     └────────────┴──────────┴────────┴─────► Failed
//! ```
//!
//! `Closed` and `Failed` are terminal. Once failed, every call returns
//! `Error::EngineFailed` with the recorded reason.

use parking_lot::RwLock;
use seqstore_core::{Error, Origin, Result};
use std::fmt;
use tracing::{error, info};

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Files are being opened
    Starting,
    /// Opened; accepts replayed and replicated operations only
    Recovering,
    /// Accepts every operation
    Open,
    /// Shutting down
    Closing,
    /// Shut down cleanly
    Closed,
    /// Hit a fatal error
    Failed,
}

impl EngineState {
    /// No transitions leave a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Closed | EngineState::Failed)
    }

    /// Check if transition from current to target is valid
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        match (self, target) {
            (s, _) if s.is_terminal() => false,
            (_, EngineState::Failed) => true,
            (EngineState::Starting, EngineState::Recovering) => true,
            (EngineState::Starting, EngineState::Closing) => true,
            (EngineState::Recovering, EngineState::Open) => true,
            (EngineState::Recovering, EngineState::Closing) => true,
            (EngineState::Open, EngineState::Closing) => true,
            (EngineState::Closing, EngineState::Closed) => true,
            _ => false,
        }
    }

    /// Name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Starting => "starting",
            EngineState::Recovering => "recovering",
            EngineState::Open => "open",
            EngineState::Closing => "closing",
            EngineState::Closed => "closed",
            EngineState::Failed => "failed",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct LifecycleInner {
    state: EngineState,
    failure: Option<String>,
}

/// Current state plus the failure reason, guarded together
pub(crate) struct Lifecycle {
    inner: RwLock<LifecycleInner>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Lifecycle {
            inner: RwLock::new(LifecycleInner {
                state: EngineState::Starting,
                failure: None,
            }),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        self.inner.read().state
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.inner.read().failure.clone()
    }

    /// Move to `target`, rejecting illegal transitions.
    pub(crate) fn transition(&self, target: EngineState) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.state.can_transition_to(target) {
            return Err(match inner.state {
                EngineState::Failed => Error::engine_failed(inner.failure.clone().unwrap_or_default()),
                from => Error::illegal_state(format!("cannot move engine from {} to {}", from, target)),
            });
        }
        info!(target: "seqstore::engine", from = %inner.state, to = %target, "Engine state change");
        inner.state = target;
        Ok(())
    }

    /// Record a failure. Returns false if the engine was already terminal.
    pub(crate) fn fail(&self, reason: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        error!(target: "seqstore::engine", from = %inner.state, reason, "Engine failed");
        inner.state = EngineState::Failed;
        inner.failure = Some(reason.to_string());
        true
    }

    /// Fail fast unless an operation from `origin` may be applied now.
    ///
    /// Only `Open` accepts writes. Local translog recovery never comes
    /// through here: replay applies operations directly while `Recovering`.
    pub(crate) fn ensure_writable(&self, origin: Origin) -> Result<()> {
        let inner = self.inner.read();
        match inner.state {
            EngineState::Open if origin == Origin::LocalTranslogRecovery => Err(Error::illegal_state(
                "local translog recovery operations are only applied by translog replay",
            )),
            EngineState::Open => Ok(()),
            other => Err(self.reject(&inner, other, origin.name())),
        }
    }

    /// Fail fast unless the engine serves reads and maintenance calls.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        let inner = self.inner.read();
        match inner.state {
            EngineState::Open | EngineState::Recovering => Ok(()),
            other => Err(self.reject(&inner, other, "read")),
        }
    }

    /// Fail fast unless the engine is `Open`.
    pub(crate) fn ensure_fully_open(&self, what: &str) -> Result<()> {
        let inner = self.inner.read();
        match inner.state {
            EngineState::Open => Ok(()),
            other => Err(self.reject(&inner, other, what)),
        }
    }

    fn reject(&self, inner: &LifecycleInner, state: EngineState, what: &str) -> Error {
        match state {
            EngineState::Failed => Error::engine_failed(inner.failure.clone().unwrap_or_default()),
            EngineState::Closing | EngineState::Closed => Error::EngineClosed,
            other => Error::illegal_state(format!("{} not allowed while engine is {}", what, other)),
        }
    }
}
