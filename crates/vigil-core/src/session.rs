//! Per-run session state owned by the supervisor.

use crate::capability::{Size, WindowHandle};
use crate::identity::TaskProgress;
use crate::phase::{Mode, Phase};
use std::time::Duration;
use tokio::time::Instant;

/// Time since the last recognized signature.
///
/// Built on `tokio::time::Instant` so paused-clock tests can advance it.
#[derive(Debug, Clone, Copy)]
pub struct PhaseClock {
    last_seen: Instant,
}

impl PhaseClock {
    pub fn start() -> Self {
        Self {
            last_seen: Instant::now(),
        }
    }

    /// Heartbeat: a signature was recognized.
    pub fn refresh(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn exceeded(&self, limit: Duration) -> bool {
        self.elapsed() > limit
    }
}

impl Default for PhaseClock {
    fn default() -> Self {
        Self::start()
    }
}

/// The window the probes and clicks are currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowContext {
    pub handle: WindowHandle,
    pub size: Size,
}

/// One run of the driven application between two restarts.
#[derive(Debug, Clone)]
pub struct Session {
    pub mode: Mode,
    pub window: Option<WindowContext>,
    pub clock: PhaseClock,
    /// Task rounds entered during this session.
    pub rounds: u32,
    pub last_phase: Option<Phase>,
    pub progress: TaskProgress,
    pub wrong_secret_count: u32,
}

impl Session {
    pub fn new(progress: TaskProgress) -> Self {
        Self {
            mode: Mode::OutOfTask,
            window: None,
            clock: PhaseClock::start(),
            rounds: 0,
            last_phase: None,
            progress,
            wrong_secret_count: 0,
        }
    }

    pub fn bind(&mut self, window: WindowContext, mode: Mode) {
        self.window = Some(window);
        self.mode = mode;
        self.clock.refresh();
    }

    pub fn in_task(&self) -> bool {
        self.mode == Mode::InTask
    }
}
