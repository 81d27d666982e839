//! Remote command processing.
//!
//! A batch is interpreted into a [`CommandPlan`] first, then applied: record
//! patches in order, then the forced update (if any), then the restart.

use crate::runtime::AgentRuntime;
use crate::updater;
use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tokio::time::Instant;
use vigil_core::command::{CommandBatch, RemoteCommand};
use vigil_core::record::RecordPatch;
use vigil_core::recovery::{Flow, Interrupt, restart_with};
use vigil_core::status::label;

/// What a batch asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPlan {
    pub patches: Vec<RecordPatch>,
    /// Target of the last `force_update` in the batch.
    pub update_at: Option<NaiveDateTime>,
    pub restart: bool,
}

impl CommandPlan {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.update_at.is_none() && !self.restart
    }
}

/// Interprets a batch. Unknown and malformed commands are logged and skipped.
pub fn plan_batch(batch: &CommandBatch) -> CommandPlan {
    let mut plan = CommandPlan::default();
    for raw in &batch.commands {
        match RemoteCommand::parse(raw) {
            Ok(Some(RemoteCommand::RotateSecret { secret })) => {
                plan.patches.push(RecordPatch::Secret(secret));
                plan.restart = true;
            }
            Ok(Some(RemoteCommand::ReleaseIdentity)) => {
                plan.patches.push(RecordPatch::Release);
                plan.restart = true;
            }
            Ok(Some(RemoteCommand::ForceUpdate { at })) => {
                plan.update_at = Some(at);
                plan.restart = true;
            }
            Ok(None) => tracing::warn!("[Commands] skipping unknown command {:?}", raw.command),
            Err(e) => tracing::warn!("[Commands] skipping {:?}: {}", raw.command, e),
        }
    }
    plan
}

/// Polls the controller once and applies whatever arrived.
///
/// A failed poll counts as an empty batch.
pub async fn poll_commands(agent: &mut AgentRuntime) -> Flow<()> {
    let machine_tag = agent.ctx.record().machine_tag.clone();
    match agent.controller.fetch_commands(&machine_tag).await {
        Ok(batch) => apply_batch(agent, &batch).await,
        Err(e) => {
            tracing::warn!("[Commands] poll failed: {}", e);
            Ok(())
        }
    }
}

pub async fn apply_batch(agent: &mut AgentRuntime, batch: &CommandBatch) -> Flow<()> {
    let plan = plan_batch(batch);
    if plan.is_empty() {
        return Ok(());
    }

    for patch in &plan.patches {
        tracing::info!("[Commands] applying {:?}", patch);
        agent.ctx.apply(patch.clone())?;
    }

    if let Some(at) = plan.update_at {
        force_update(agent, at).await?;
    }

    if plan.restart {
        return restart_with("remote command");
    }
    Ok(())
}

/// Blocks until a command interrupts the wait.
///
/// Used where nothing but the controller can unblock the agent, e.g. a
/// suspended or frozen identity.
pub async fn await_commands(agent: &mut AgentRuntime) -> Interrupt {
    loop {
        if let Err(interrupt) = poll_commands(agent).await {
            return interrupt;
        }
        tokio::time::sleep(agent.settings.timing.command_wait()).await;
    }
}

/// Stops the driven application until `at` (local time), then restarts.
async fn force_update(agent: &mut AgentRuntime, at: NaiveDateTime) -> Flow<()> {
    tracing::info!("[Commands] forced update at {}", at);
    agent.desktop.process().terminate_target().await?;
    agent.report(label::UPDATE_PENDING).await;

    let deadline = Instant::now() + until(at, Local::now().naive_local());
    let step = agent.settings.timing.update_wait();
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(step.min(deadline - now)).await;
        heartbeat(agent).await?;
    }

    agent.report(label::UPDATING).await;
    restart_with("application update")
}

/// Keeps the loop alive while it is parked.
async fn heartbeat(agent: &mut AgentRuntime) -> Flow<()> {
    agent.session.clock.refresh();
    updater::check_for_update(agent).await
}

/// Time from `now` until `at`; zero when `at` already passed.
fn until(at: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeController, FakeScreen, FakeUploadApi, MemoryRecordStore};
    use serde_json::json;
    use std::sync::Arc;
    use vigil_core::command::RawCommand;
    use vigil_core::record::AgentRecord;
    use vigil_core::settings::AgentSettings;

    fn raw(command: &str, data: serde_json::Value) -> RawCommand {
        RawCommand {
            command: command.to_string(),
            data,
        }
    }

    struct Rig {
        store: Arc<MemoryRecordStore>,
        controller: Arc<FakeController>,
        screen: Arc<FakeScreen>,
        agent: AgentRuntime,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryRecordStore::with(AgentRecord {
            identity_id: Some("10001".to_string()),
            secret: "old".to_string(),
            machine_tag: "m1|a".to_string(),
            ..AgentRecord::default()
        }));
        let controller = Arc::new(FakeController::default());
        let screen = Arc::new(FakeScreen::default());
        let agent = AgentRuntime::new(
            Arc::new(AgentSettings::default()),
            store.clone(),
            controller.clone(),
            Arc::new(FakeUploadApi::default()),
            screen.capabilities(),
        )
        .unwrap();
        Rig {
            store,
            controller,
            screen,
            agent,
        }
    }

    #[test]
    fn test_plan_skips_unknown_and_malformed() {
        let batch = CommandBatch::new(vec![
            raw("reboot_vm", json!({})),
            raw("new_pwd", json!({})),
            raw("close_qq", json!(null)),
        ]);
        let plan = plan_batch(&batch);
        assert_eq!(plan.patches, vec![RecordPatch::Release]);
        assert!(plan.restart);
    }

    #[test]
    fn test_last_force_update_wins() {
        let batch = CommandBatch::new(vec![
            raw("update", json!({"update_time": "2030-01-01T03:00"})),
            raw("force_update", json!({"update_time": "2030-01-01T04:30"})),
        ]);
        let plan = plan_batch(&batch);
        assert_eq!(
            plan.update_at.map(|at| at.to_string()),
            Some("2030-01-01 04:30:00".to_string())
        );
    }

    #[test]
    fn test_until_past_target_is_zero() {
        let at = NaiveDateTime::parse_from_str("2024-01-01T00:00", "%Y-%m-%dT%H:%M").unwrap();
        let now = NaiveDateTime::parse_from_str("2024-01-01T00:10", "%Y-%m-%dT%H:%M").unwrap();
        assert_eq!(until(at, now), Duration::ZERO);
        assert_eq!(until(now, at), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotating_twice_leaves_last_secret() {
        let mut rig = rig();
        let batch = CommandBatch::new(vec![
            raw("rotate_secret", json!({"pwd": "A"})),
            raw("new_pwd", json!({"pwd": "B"})),
        ]);

        for _ in 0..2 {
            let interrupt = apply_batch(&mut rig.agent, &batch).await.unwrap_err();
            assert!(interrupt.is_restart());
        }
        assert_eq!(rig.store.snapshot().secret, "B");
        assert_eq!(rig.agent.ctx.record().secret, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_is_empty_batch() {
        let mut rig = rig();
        rig.controller.queue_poll_failure();
        assert!(poll_commands(&mut rig.agent).await.is_ok());
        assert_eq!(rig.store.snapshot().secret, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_commands_returns_first_interrupt() {
        let mut rig = rig();
        rig.controller.queue_batch(CommandBatch::default());
        rig.controller.queue_poll_failure();
        rig.controller
            .queue_batch(CommandBatch::new(vec![raw("close_qq", json!({}))]));

        let started = Instant::now();
        let interrupt = await_commands(&mut rig.agent).await;
        assert!(interrupt.is_restart());
        assert_eq!(rig.controller.command_polls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert!(rig.store.snapshot().completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_force_update_terminates_reports_and_restarts() {
        let mut rig = rig();
        let batch = CommandBatch::new(vec![raw(
            "update",
            json!({"update_time": "2000-01-01T00:00"}),
        )]);

        let interrupt = apply_batch(&mut rig.agent, &batch).await.unwrap_err();
        assert!(interrupt.is_restart());
        assert_eq!(rig.screen.terminations(), 1);
        assert_eq!(
            rig.controller.labels(),
            vec![label::UPDATE_PENDING, label::UPDATING]
        );
    }
}
