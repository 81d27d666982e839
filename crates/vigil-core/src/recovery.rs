//! Recovery signals and the control-flow type every automation step returns.
//!
//! Automation against a live application fails at unpredictable depth. Instead
//! of retry/cleanup logic at every call site, failures are funnelled into two
//! signals that travel up the call chain as the `Err` side of [`Flow`] and are
//! caught in exactly one place: the supervisor loop.

use crate::capability::OverlayHandle;
use crate::error::VigilError;
use std::fmt;

/// The two non-local exits of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySignal {
    /// Tear the session down and start the driven application again.
    Restart,
    /// The task goal was reached. The overlay stays on screen until a new
    /// identity is assigned.
    Finish(OverlayHandle),
}

impl fmt::Display for RecoverySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoverySignal::Restart => write!(f, "restart"),
            RecoverySignal::Finish(handle) => write!(f, "finish (overlay {})", handle.0),
        }
    }
}

/// Everything that can end an automation step early.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// A recovery signal for the supervisor.
    Signal(RecoverySignal),
    /// A newer agent binary was started; this process should exit cleanly.
    Superseded { version: u64 },
    /// Not recoverable here. Terminates the process.
    Fatal(VigilError),
}

impl Interrupt {
    pub fn is_restart(&self) -> bool {
        matches!(self, Interrupt::Signal(RecoverySignal::Restart))
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Interrupt::Signal(RecoverySignal::Finish(_)))
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Signal(signal) => write!(f, "{}", signal),
            Interrupt::Superseded { version } => write!(f, "superseded by version {}", version),
            Interrupt::Fatal(err) => write!(f, "fatal: {}", err),
        }
    }
}

impl From<RecoverySignal> for Interrupt {
    fn from(signal: RecoverySignal) -> Self {
        Interrupt::Signal(signal)
    }
}

impl From<VigilError> for Interrupt {
    fn from(err: VigilError) -> Self {
        Interrupt::Fatal(err)
    }
}

/// Result type of every automation step.
pub type Flow<T> = std::result::Result<T, Interrupt>;

/// Logs `reason` and returns the `Restart` interrupt.
///
/// `Restart` deliberately carries no payload, so the reason only lives in the
/// log line emitted at the raise site.
pub fn restart(reason: impl fmt::Display) -> Interrupt {
    tracing::warn!("[Recovery] restart requested: {}", reason);
    Interrupt::Signal(RecoverySignal::Restart)
}

/// Convenience for `Err(restart(reason))`.
pub fn restart_with<T>(reason: impl fmt::Display) -> Flow<T> {
    Err(restart(reason))
}
