//! Application layer for vigil.
//!
//! Owns the control loop: phase detection, the phase handlers, remote
//! commands, telemetry, evidence uploads and self-update. Everything outside
//! the process is reached through the traits in `vigil-core`.

pub mod commands;
pub mod context;
pub mod desktop;
pub mod detector;
pub mod handlers;
pub mod runtime;
pub mod supervisor;
pub mod telemetry;
pub mod updater;
pub mod uploader;

/// Scriptable in-memory stand-ins for every outside collaborator.
#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use context::AgentContext;
pub use desktop::{Capabilities, Desktop};
pub use handlers::{IdlePlaybook, PhaseHandler, StandardHandlers, TaskPlaybook};
pub use runtime::AgentRuntime;
pub use supervisor::{Exit, Supervisor};
pub use telemetry::Telemetry;
pub use uploader::ResumableUploader;
