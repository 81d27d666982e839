//! Phase handlers.
//!
//! The detector names a [`Phase`]; the supervisor hands it to a
//! [`PhaseHandler`]. [`StandardHandlers`] drives the stock flow and delegates
//! the in-task decisions to a [`TaskPlaybook`].

mod client;
mod login;
mod room;
mod task;

use crate::desktop::Desktop;
use crate::runtime::AgentRuntime;
use async_trait::async_trait;
use vigil_core::phase::Phase;
use vigil_core::recovery::Flow;
use vigil_core::session::WindowContext;

/// Drives the application through one detected phase.
#[async_trait]
pub trait PhaseHandler: Send {
    async fn handle(&mut self, phase: Phase, agent: &mut AgentRuntime) -> Flow<()>;
}

/// Domain decisions taken while a task is running.
#[async_trait]
pub trait TaskPlaybook: Send + Sync {
    async fn step(&self, desktop: &Desktop, window: &WindowContext) -> Flow<()>;
}

/// Plays nothing; the task runs to its natural end.
pub struct IdlePlaybook;

#[async_trait]
impl TaskPlaybook for IdlePlaybook {
    async fn step(&self, _desktop: &Desktop, _window: &WindowContext) -> Flow<()> {
        Ok(())
    }
}

pub struct StandardHandlers {
    playbook: Box<dyn TaskPlaybook>,
}

impl StandardHandlers {
    pub fn new(playbook: Box<dyn TaskPlaybook>) -> Self {
        Self { playbook }
    }
}

impl Default for StandardHandlers {
    fn default() -> Self {
        Self::new(Box::new(IdlePlaybook))
    }
}

#[async_trait]
impl PhaseHandler for StandardHandlers {
    async fn handle(&mut self, phase: Phase, agent: &mut AgentRuntime) -> Flow<()> {
        tracing::debug!("[Handlers] {}", phase);
        match phase {
            Phase::Login => login::login(agent).await,
            Phase::AreaSelection => client::area_selection(agent).await,
            Phase::Lobby => client::lobby(agent).await,
            Phase::ModeSelection => client::mode_selection(agent).await,
            Phase::InRoom => room::in_room(agent).await,
            Phase::InTask => task::in_task(agent, self.playbook.as_ref()).await,
        }
    }
}
