//! Phase detection.
//!
//! Each mode has an ordered rule list; the first rule that matches decides
//! the outcome. Blocking conditions come before ordinary phase probes.

use crate::commands::{await_commands, poll_commands};
use crate::runtime::AgentRuntime;
use vigil_core::capability::Region;
use vigil_core::phase::{Detection, Mode, Phase};
use vigil_core::recovery::{Flow, restart_with};
use vigil_core::session::WindowContext;
use vigil_core::status::label;

/// Runs the detector of the current mode.
pub async fn detect(agent: &mut AgentRuntime) -> Flow<Detection> {
    match agent.session.mode {
        Mode::OutOfTask => detect_out_of_task(agent).await,
        Mode::InTask => detect_in_task(agent).await,
    }
}

async fn detect_out_of_task(agent: &mut AgentRuntime) -> Flow<Detection> {
    let window = agent.window()?;
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;

    if agent.seen(&window, &sigs.suspended).await?.is_some() {
        tracing::warn!("[Detector] identity suspended, waiting for the controller");
        agent.report(label::SUSPENDED).await;
        return Err(await_commands(agent).await);
    }

    let confirm_region = Region::client(window.size).grow_down(sigs.confirm_overhang);
    if agent
        .desktop
        .click_match_in(confirm_region, &sigs.confirm_dialog, sigs.confirm_offset)
        .await?
    {
        agent.session.clock.refresh();
        return Ok(Detection::status("confirmed dialog"));
    }

    if agent.seen(&window, &sigs.login_stage).await?.is_some() {
        return Ok(Detection::Phase(Phase::Login));
    }
    if agent.seen(&window, &sigs.area_stage).await?.is_some() {
        return Ok(Detection::Phase(Phase::AreaSelection));
    }

    if let Some(detection) = check_client_window(agent, &window).await? {
        return Ok(detection);
    }

    if agent.seen(&window, &sigs.queue_waiting).await?.is_some() {
        return Ok(Detection::status("waiting in login queue"));
    }
    if agent.seen(&window, &sigs.lobby_stage).await?.is_some() {
        return Ok(Detection::Phase(Phase::Lobby));
    }
    if agent.seen(&window, &sigs.mode_stage).await?.is_some() {
        return Ok(Detection::Phase(Phase::ModeSelection));
    }
    if agent.seen(&window, &sigs.room_stage).await?.is_some() {
        return Ok(Detection::Phase(Phase::InRoom));
    }

    if agent.seen(&window, &sigs.wrong_mode).await?.is_some() {
        agent.desktop.click_match(&window, &sigs.close_queue).await?;
        return Ok(Detection::status("left wrong mode"));
    }
    if agent.seen(&window, &sigs.client_loading).await?.is_some() {
        return Ok(Detection::status("client loading"));
    }
    if agent.desktop.click_match(&window, &sigs.play_again).await? {
        agent.session.clock.refresh();
        return Ok(Detection::status("next round"));
    }

    if agent.seen(&window, &sigs.match_problem).await?.is_some() {
        return rejoin_task(agent, &window).await;
    }

    if agent.desktop.click_match(&window, &sigs.reconnect).await? {
        agent.session.clock.refresh();
        return Ok(Detection::status("reconnecting"));
    }

    if agent.session.clock.exceeded(settings.timing.lobby_timeout()) {
        return restart_with(format!(
            "no known phase for {}s",
            agent.session.clock.elapsed().as_secs()
        ));
    }
    Ok(Detection::status("unrecognized"))
}

/// Reconciles the bound window with the application's top-level windows.
///
/// `None` means the client window is the bound one and detection continues.
async fn check_client_window(
    agent: &mut AgentRuntime,
    window: &WindowContext,
) -> Flow<Option<Detection>> {
    let target = agent.settings.target.clone();

    if agent.desktop.find_window(&target.task_window).await?.is_some() {
        let task = agent.desktop.acquire(&target.task_window).await?;
        agent.session.bind(task, Mode::InTask);
        agent.report(label::IN_TASK).await;
        return Ok(Some(Detection::status("task window appeared")));
    }

    let Some(client) = agent.desktop.find_window(&target.client_window).await? else {
        if agent
            .session
            .clock
            .exceeded(agent.settings.timing.lobby_timeout())
        {
            return restart_with("client window missing");
        }
        return Ok(Some(Detection::status("client window missing")));
    };

    if client != window.handle {
        let bound = agent.desktop.bind(client).await?;
        agent.session.bind(bound, Mode::OutOfTask);
        agent.report(label::CLIENT).await;
        poll_commands(agent).await?;
        return Ok(Some(Detection::status("client window bound")));
    }
    Ok(None)
}

/// After a match problem: keep asking to reconnect until the task window is
/// back or the poll budget is spent.
async fn rejoin_task(agent: &mut AgentRuntime, window: &WindowContext) -> Flow<Detection> {
    let task_window = agent.settings.target.task_window.clone();
    let reconnect = agent.settings.signatures.reconnect.clone();
    for _ in 0..agent.settings.timing.reconnect_polls {
        agent.desktop.click_match(window, &reconnect).await?;
        if agent.desktop.find_window(&task_window).await?.is_some() {
            let task = agent.desktop.acquire(&task_window).await?;
            agent.session.bind(task, Mode::InTask);
            agent.report(label::IN_TASK).await;
            return Ok(Detection::status("rejoined task"));
        }
        tokio::time::sleep(agent.settings.timing.tick()).await;
    }
    restart_with("could not rejoin the task")
}

async fn detect_in_task(agent: &mut AgentRuntime) -> Flow<Detection> {
    let task_window = agent.settings.target.task_window.clone();
    if agent.desktop.find_window(&task_window).await?.is_none() {
        tracing::info!("[Detector] task window closed, back to the client");
        agent.session.mode = Mode::OutOfTask;
        agent.session.clock.refresh();
        return Ok(Detection::status("task ended"));
    }

    let window = agent.window()?;
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;

    if agent.seen(&window, &sigs.task_loading).await?.is_some() {
        return Ok(Detection::status("task loading"));
    }

    if agent.seen(&window, &sigs.task_active).await?.is_some() {
        await_connection(agent, &window).await?;
        return Ok(Detection::Phase(Phase::InTask));
    }

    if agent.session.clock.exceeded(settings.timing.task_timeout()) {
        return restart_with(format!(
            "no known task state for {}s",
            agent.session.clock.elapsed().as_secs()
        ));
    }
    Ok(Detection::status("transition"))
}

/// Waits out a visible disconnect indicator. Raises `Restart` when it stays
/// up past the grace period.
async fn await_connection(agent: &mut AgentRuntime, window: &WindowContext) -> Flow<()> {
    let timing = agent.settings.timing.clone();
    let indicator = agent.settings.signatures.disconnect.clone();
    let since = tokio::time::Instant::now();
    while agent.desktop.find(window, &indicator).await?.is_some() {
        if since.elapsed() > timing.disconnect_grace() {
            return restart_with("connection lost");
        }
        tokio::time::sleep(timing.tick()).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeController, FakeScreen, FakeUploadApi, MemoryRecordStore};
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_core::record::AgentRecord;
    use vigil_core::settings::AgentSettings;

    struct Rig {
        screen: Arc<FakeScreen>,
        controller: Arc<FakeController>,
        settings: Arc<AgentSettings>,
        agent: AgentRuntime,
    }

    const CLIENT: u64 = 7;

    fn rig() -> Rig {
        let settings = Arc::new(AgentSettings::default());
        let screen = Arc::new(FakeScreen::default());
        let controller = Arc::new(FakeController::default());
        let mut agent = AgentRuntime::new(
            settings.clone(),
            Arc::new(MemoryRecordStore::with(AgentRecord {
                identity_id: Some("10001".to_string()),
                ..AgentRecord::default()
            })),
            controller.clone(),
            Arc::new(FakeUploadApi::default()),
            screen.capabilities(),
        )
        .unwrap();
        screen.open_window(&settings.target.client_window, CLIENT);
        agent
            .session
            .bind(screen.window_context(CLIENT), Mode::OutOfTask);
        Rig {
            screen,
            controller,
            settings,
            agent,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_conditions_win_over_phases() {
        let mut rig = rig();
        rig.screen.show("img/status1.bmp");
        rig.screen.show("img/sure3.bmp");

        let first = detect(&mut rig.agent).await.unwrap();
        assert_eq!(first, Detection::status("confirmed dialog"));
        assert_eq!(rig.screen.clicks().len(), 1);

        rig.screen.hide("img/sure3.bmp");
        let second = detect(&mut rig.agent).await.unwrap();
        assert_eq!(second, Detection::Phase(Phase::Login));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_alternation_matches_room() {
        let mut rig = rig();
        rig.screen.show("img/room.bmp");
        rig.screen.show("img/status4.bmp");
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::Phase(Phase::Lobby)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_until_timeout_then_one_restart() {
        let mut rig = rig();
        tokio::time::advance(Duration::from_secs(150)).await;
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::status("unrecognized")
        );

        tokio::time::advance(Duration::from_secs(51)).await;
        assert!(detect(&mut rig.agent).await.unwrap_err().is_restart());

        rig.agent.reset_session();
        rig.agent
            .session
            .bind(rig.screen.window_context(CLIENT), Mode::OutOfTask);
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::status("unrecognized")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognized_signature_is_heartbeat() {
        let mut rig = rig();
        rig.screen.show("img/loading.bmp");
        tokio::time::advance(Duration::from_secs(199)).await;
        detect(&mut rig.agent).await.unwrap();
        assert!(rig.agent.session.clock.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_client_window_restarts_after_lobby_timeout() {
        let mut rig = rig();
        rig.screen.close_window(&rig.settings.target.client_window);
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::status("client window missing")
        );
        tokio::time::advance(Duration::from_secs(201)).await;
        assert!(detect(&mut rig.agent).await.unwrap_err().is_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_client_handle_is_rebound() {
        let mut rig = rig();
        rig.screen.open_window(&rig.settings.target.client_window, 99);
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::status("client window bound")
        );
        assert_eq!(rig.agent.window().unwrap().handle.0, 99);
        assert_eq!(rig.controller.labels(), vec![label::CLIENT]);
        assert_eq!(rig.controller.command_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_window_switches_mode() {
        let mut rig = rig();
        rig.screen.open_window(&rig.settings.target.task_window, 3);
        detect(&mut rig.agent).await.unwrap();
        assert!(rig.agent.session.in_task());
        assert_eq!(rig.controller.labels(), vec![label::IN_TASK]);

        rig.screen.show("img/in_gaming.bmp");
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::Phase(Phase::InTask)
        );

        rig.screen.close_window(&rig.settings.target.task_window);
        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::status("task ended")
        );
        assert!(!rig.agent.session.in_task());
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_problem_exhausts_reconnect_polls() {
        let mut rig = rig();
        rig.screen.show("img/dj.bmp");
        let started = tokio::time::Instant::now();
        assert!(detect(&mut rig.agent).await.unwrap_err().is_restart());
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_disconnect_restarts() {
        let mut rig = rig();
        rig.screen.open_window(&rig.settings.target.task_window, 3);
        rig.agent
            .session
            .bind(rig.screen.window_context(3), Mode::InTask);
        rig.screen.show("img/in_gaming.bmp");
        rig.screen.show("img/rec.bmp");

        assert!(detect(&mut rig.agent).await.unwrap_err().is_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_task_transition_times_out() {
        let mut rig = rig();
        rig.screen.open_window(&rig.settings.target.task_window, 3);
        rig.agent
            .session
            .bind(rig.screen.window_context(3), Mode::InTask);

        assert_eq!(
            detect(&mut rig.agent).await.unwrap(),
            Detection::status("transition")
        );
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(detect(&mut rig.agent).await.unwrap_err().is_restart());
    }
}
