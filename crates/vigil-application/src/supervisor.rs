//! The main loop and the single catch point of the recovery signals.

use crate::commands::poll_commands;
use crate::detector;
use crate::handlers::PhaseHandler;
use crate::runtime::AgentRuntime;
use vigil_core::capability::OverlayHandle;
use vigil_core::phase::{Detection, Mode};
use vigil_core::record::RecordPatch;
use vigil_core::recovery::{Flow, Interrupt, RecoverySignal};
use vigil_core::status::label;
use vigil_core::{Result, VigilError};

/// How [`Supervisor::run`] ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// A newer agent binary took over.
    Superseded { version: u64 },
}

pub struct Supervisor {
    agent: AgentRuntime,
    handlers: Box<dyn PhaseHandler>,
    /// Completion banner still on screen; closed with the next identity grant.
    pending_overlay: Option<OverlayHandle>,
}

impl Supervisor {
    pub fn new(agent: AgentRuntime, handlers: Box<dyn PhaseHandler>) -> Self {
        Self {
            agent,
            handlers,
            pending_overlay: None,
        }
    }

    pub fn agent(&self) -> &AgentRuntime {
        &self.agent
    }

    /// Runs until superseded or a fatal error.
    pub async fn run(mut self) -> Result<Exit> {
        tracing::info!(
            "[Supervisor] starting (version {})",
            self.agent.settings.controller.version_id
        );
        let mut pending = self.startup().await.err();

        loop {
            let outcome = match pending.take() {
                Some(interrupt) => Err(interrupt),
                None => self.step().await,
            };

            match outcome {
                Ok(()) => tokio::time::sleep(self.agent.settings.timing.tick()).await,
                Err(Interrupt::Signal(RecoverySignal::Restart)) => {
                    pending = self.restart().await.err();
                }
                Err(Interrupt::Signal(RecoverySignal::Finish(overlay))) => {
                    pending = self.finish(overlay).await.err();
                }
                Err(Interrupt::Superseded { version }) => {
                    tracing::info!("[Supervisor] superseded by version {}", version);
                    return Ok(Exit::Superseded { version });
                }
                Err(Interrupt::Fatal(e)) => {
                    tracing::error!("[Supervisor] fatal: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// One detect-and-dispatch pass.
    pub async fn step(&mut self) -> Flow<()> {
        match detector::detect(&mut self.agent).await? {
            Detection::Phase(phase) => {
                if self.agent.session.last_phase != Some(phase) {
                    tracing::info!("[Supervisor] phase {}", phase);
                }
                self.agent.session.last_phase = Some(phase);
                self.handlers.handle(phase, &mut self.agent).await
            }
            Detection::Status(status) => {
                tracing::debug!("[Supervisor] {}", status);
                Ok(())
            }
        }
    }

    /// Attaches to whatever window of the application is open, or launches it.
    async fn startup(&mut self) -> Flow<()> {
        self.agent.ctx.reload()?;
        self.ensure_identity().await?;
        self.agent.reset_session();

        let target = self.agent.settings.target.clone();
        let candidates = [
            (&target.task_window, Mode::InTask),
            (&target.client_window, Mode::OutOfTask),
            (&target.login_window, Mode::OutOfTask),
        ];
        for (window, mode) in candidates {
            if let Some(handle) = self.agent.desktop.find_window(window).await? {
                tracing::info!("[Supervisor] attaching to running {}", window.title);
                let bound = self.agent.desktop.bind(handle).await?;
                self.agent.session.bind(bound, mode);
                return Ok(());
            }
        }
        self.launch().await
    }

    /// Tears the session down and starts the application again.
    async fn restart(&mut self) -> Flow<()> {
        tracing::info!("[Supervisor] restarting");
        self.agent.report(label::RESTARTING).await;
        self.agent.desktop.process().terminate_target().await?;
        self.agent.ctx.reload()?;
        self.ensure_identity().await?;
        self.agent.reset_session();
        self.launch().await
    }

    /// Task goal reached: park until the controller hands out a new identity.
    async fn finish(&mut self, overlay: OverlayHandle) -> Flow<()> {
        tracing::info!("[Supervisor] goal reached, waiting for a new identity");
        self.pending_overlay = Some(overlay);
        self.agent.ctx.reload()?;
        self.ensure_identity().await?;
        self.restart().await
    }

    async fn launch(&mut self) -> Flow<()> {
        let path = self.agent.ctx.record().target_path.clone();
        if path.is_empty() {
            return Err(Interrupt::Fatal(VigilError::config(
                "target_path is not set in the agent record",
            )));
        }
        self.agent.desktop.process().launch_target(&path).await?;

        let login = self
            .agent
            .desktop
            .acquire(&self.agent.settings.target.login_window)
            .await?;
        self.agent.session.bind(login, Mode::OutOfTask);
        poll_commands(&mut self.agent).await
    }

    /// Blocks until the record holds a usable identity.
    ///
    /// Commands are polled between requests, so a restart or rotation still
    /// gets through while waiting. A pending completion banner is closed once
    /// an identity is granted, even if the wait was interrupted by a restart.
    async fn ensure_identity(&mut self) -> Flow<()> {
        while self.agent.ctx.record().needs_identity() {
            let prefix = self.agent.ctx.record().machine_prefix().to_string();
            match self.agent.controller.request_identity(&prefix).await {
                Ok(Some(grant)) => {
                    if let Some(handle) = self.pending_overlay.take() {
                        self.agent.desktop.close_overlay(handle).await?;
                    }
                    tracing::info!("[Supervisor] granted identity {}", grant.identity.id);
                    self.agent.ctx.apply(RecordPatch::Assign(grant))?;
                    self.agent.report(label::IDENTITY_GRANTED).await;
                    return Ok(());
                }
                Ok(None) => {
                    self.agent.report(label::WAITING_IDENTITY).await;
                }
                Err(e) => tracing::warn!("[Supervisor] identity request failed: {}", e),
            }
            poll_commands(&mut self.agent).await?;
            tokio::time::sleep(self.agent.settings.timing.identity_poll()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeController, FakeScreen, FakeUploadApi, MemoryRecordStore};
    use crate::handlers::StandardHandlers;
    use crate::handlers::test_support::record;
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_core::command::{CommandBatch, RawCommand};
    use vigil_core::controller::ReleaseInfo;
    use vigil_core::identity::{Identity, IdentityGrant};
    use vigil_core::record::AgentRecord;
    use vigil_core::settings::AgentSettings;

    struct Rig {
        store: Arc<MemoryRecordStore>,
        controller: Arc<FakeController>,
        screen: Arc<FakeScreen>,
        settings: Arc<AgentSettings>,
        supervisor: Supervisor,
    }

    fn rig_with(record: AgentRecord) -> Rig {
        let settings = Arc::new(AgentSettings::default());
        let store = Arc::new(MemoryRecordStore::with(record));
        let controller = Arc::new(FakeController::default());
        let screen = Arc::new(FakeScreen::default());
        let agent = AgentRuntime::new(
            settings.clone(),
            store.clone(),
            controller.clone(),
            Arc::new(FakeUploadApi::default()),
            screen.capabilities(),
        )
        .unwrap();
        screen.open_on_launch(&settings.target.login_window, 1);
        Rig {
            store,
            controller,
            screen,
            settings,
            supervisor: Supervisor::new(agent, Box::new(StandardHandlers::default())),
        }
    }

    fn launchable() -> AgentRecord {
        AgentRecord {
            target_path: "C:/game/launcher.exe".to_string(),
            ..record()
        }
    }

    fn grant(id: &str) -> IdentityGrant {
        IdentityGrant {
            identity: Identity {
                id: id.to_string(),
                secret: "fresh".to_string(),
                region: "男爵领域".to_string(),
                origin: "pool".to_string(),
            },
            required_delta: 200,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_attaches_to_running_client() {
        let mut rig = rig_with(launchable());
        rig.screen.open_window(&rig.settings.target.client_window, 4);

        rig.supervisor.startup().await.unwrap();
        assert_eq!(rig.supervisor.agent().window().unwrap().handle.0, 4);
        assert!(rig.screen.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_launches_when_nothing_runs() {
        let mut rig = rig_with(launchable());
        rig.supervisor.startup().await.unwrap();
        assert_eq!(rig.screen.launches(), vec!["C:/game/launcher.exe"]);
        assert_eq!(rig.supervisor.agent().window().unwrap().handle.0, 1);
        assert_eq!(rig.controller.command_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_target_path_is_fatal() {
        let rig = rig_with(record());
        let err = rig.supervisor.run().await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_terminates_reports_and_relaunches() {
        let mut rig = rig_with(launchable());
        rig.supervisor.restart().await.unwrap();
        assert_eq!(rig.screen.terminations(), 1);
        assert_eq!(rig.screen.launches().len(), 1);
        assert_eq!(rig.controller.labels(), vec![label::RESTARTING]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_waits_for_identity_then_restarts() {
        let mut rig = rig_with(AgentRecord {
            completed: true,
            ..launchable()
        });
        rig.controller.queue_identity(grant("20002"));

        rig.supervisor.finish(OverlayHandle(3)).await.unwrap();

        assert_eq!(rig.screen.closed_overlays(), vec![OverlayHandle(3)]);
        let stored = rig.store.snapshot();
        assert_eq!(stored.identity_id.as_deref(), Some("20002"));
        assert!(!stored.completed);
        assert_eq!(stored.start_counter, None);
        assert_eq!(
            rig.controller.labels(),
            vec![label::IDENTITY_GRANTED, label::RESTARTING]
        );
        assert_eq!(rig.screen.launches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_banner_closed_when_restart_interrupts_identity_wait() {
        let mut rig = rig_with(AgentRecord {
            completed: true,
            ..launchable()
        });
        rig.controller.queue_batch(CommandBatch::new(vec![RawCommand {
            command: "new_pwd".to_string(),
            data: serde_json::json!({"pwd": "newpass"}),
        }]));

        let interrupted = rig.supervisor.finish(OverlayHandle(3)).await;
        assert!(matches!(interrupted, Err(ref i) if i.is_restart()));
        assert!(rig.screen.closed_overlays().is_empty());

        rig.controller.queue_identity(grant("20002"));
        rig.supervisor.restart().await.unwrap();

        assert_eq!(rig.screen.closed_overlays(), vec![OverlayHandle(3)]);
        assert_eq!(rig.store.snapshot().identity_id.as_deref(), Some("20002"));
        assert_eq!(
            rig.controller.labels(),
            vec![
                label::WAITING_IDENTITY,
                label::RESTARTING,
                label::IDENTITY_GRANTED
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_wait_reports_between_polls() {
        let mut rig = rig_with(AgentRecord {
            completed: true,
            ..launchable()
        });

        let waited = tokio::time::timeout(
            Duration::from_secs(95),
            rig.supervisor.ensure_identity(),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(rig.controller.identity_requests(), 4);
        assert!(
            rig.controller
                .labels()
                .iter()
                .all(|l| l == label::WAITING_IDENTITY)
        );
        assert!(rig.screen.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_release_in_room_supersedes() {
        let rig = rig_with(launchable());
        rig.screen.show("img/status5.bmp");
        rig.screen.open_window(&rig.settings.target.client_window, 4);
        rig.controller.publish_release(ReleaseInfo {
            version_id: 99,
            url: "http://example.invalid/99.exe".to_string(),
        });
        rig.controller.serve_artifact(b"MZ".to_vec());

        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = (*rig.settings).clone();
        settings.target.install_dir = dir.path().to_path_buf();
        let Supervisor {
            mut agent,
            handlers,
            ..
        } = rig.supervisor;
        agent.settings = Arc::new(settings);
        let supervisor = Supervisor::new(agent, handlers);

        let exit = supervisor.run().await.unwrap();
        assert_eq!(exit, Exit::Superseded { version: 99 });
        assert_eq!(rig.screen.agent_launches().len(), 1);
    }
}
