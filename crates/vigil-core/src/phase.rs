//! Phase tags produced by the detectors.

use std::fmt;

/// Coarse mode of the driven application. Each mode has its own detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    OutOfTask,
    InTask,
}

/// A recognized operational phase. Every variant has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Login,
    AreaSelection,
    Lobby,
    ModeSelection,
    InRoom,
    InTask,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Login => "login",
            Phase::AreaSelection => "area_selection",
            Phase::Lobby => "lobby",
            Phase::ModeSelection => "mode_selection",
            Phase::InRoom => "in_room",
            Phase::InTask => "in_task",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one detector invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Run the handler for this phase.
    Phase(Phase),
    /// Nothing to dispatch; the string is logged.
    Status(String),
}

impl Detection {
    pub fn status(text: impl Into<String>) -> Self {
        Detection::Status(text.into())
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Detection::Phase(phase) => Some(*phase),
            Detection::Status(_) => None,
        }
    }
}
