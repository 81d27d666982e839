use crate::runtime::{AgentRuntime, Evidence};
use crate::updater;
use vigil_core::capability::Region;
use vigil_core::identity::Observation;
use vigil_core::phase::Mode;
use vigil_core::record::RecordPatch;
use vigil_core::recovery::{Flow, RecoverySignal, restart_with};
use vigil_core::status::label;

const COUNTER_ATTEMPTS: u32 = 15;
const LOBBY_ROUNDS: u32 = 60;
const SEARCH_ATTEMPTS: u32 = 40;
const ACCEPT_POLLS: u32 = 300;
/// Accept polls after which a fall-back to the lobby ends the wait.
const LOBBY_FALLBACK_AFTER: u32 = 120;
const OVERLAY_TEXT: &str = "完成";

pub(super) async fn in_room(agent: &mut AgentRuntime) -> Flow<()> {
    read_counter(agent).await?;
    updater::check_for_update(agent).await?;

    let settings = agent.settings.clone();
    let sigs = &settings.signatures;

    let mut ready = false;
    for _ in 0..LOBBY_ROUNDS {
        let window = agent.window()?;
        agent.desktop.click_match(&window, &sigs.lobby_stage).await?;
        tokio::time::sleep(settings.timing.tick()).await;
        if agent.desktop.find(&window, &sigs.find_match).await?.is_some() {
            ready = true;
            break;
        }
    }
    if !ready {
        return restart_with("matchmaking screen never showed");
    }

    let window = agent.window()?;
    if agent.desktop.click_match(&window, &sigs.close_team).await? {
        tracing::info!("[Room] team closed");
    }

    let mut queued = false;
    for _ in 0..SEARCH_ATTEMPTS {
        agent.desktop.click_match(&window, &sigs.find_match).await?;
        tokio::time::sleep(settings.timing.tick()).await;
        if agent.desktop.find(&window, &sigs.in_queue).await?.is_some() {
            queued = true;
            break;
        }
    }
    if !queued {
        agent.desktop.click_match(&window, &sigs.close_queue).await?;
        return restart_with("match search never started");
    }
    tracing::info!("[Room] searching for a match");

    for poll in 0..ACCEPT_POLLS {
        agent.desktop.click_match(&window, &sigs.accept_match).await?;
        if agent
            .desktop
            .find_window(&settings.target.task_window)
            .await?
            .is_some()
        {
            agent.session.rounds += 1;
            tracing::info!("[Room] round {} started", agent.session.rounds);
            agent.report(label::COUNTER_READ).await;
            let task = agent.desktop.acquire(&settings.target.task_window).await?;
            agent.session.bind(task, Mode::InTask);
            agent.report(label::IN_TASK).await;
            return Ok(());
        }
        if poll > LOBBY_FALLBACK_AFTER
            && agent.desktop.find(&window, &sigs.lobby_stage).await?.is_some()
        {
            tracing::info!("[Room] dropped back to the lobby");
            agent.session.clock.refresh();
            return Ok(());
        }
        tokio::time::sleep(settings.timing.tick()).await;
    }
    restart_with("match never started")
}

/// Reads the progress counter and acts on it.
///
/// The first reading for an identity becomes the persisted start counter.
/// Reaching the goal marks the record complete and raises `Finish`.
pub(super) async fn read_counter(agent: &mut AgentRuntime) -> Flow<()> {
    let Some(reading) = ocr_counter(agent).await? else {
        tracing::info!("[Room] counter not readable");
        return Ok(());
    };

    let baseline = match agent.session.progress.observe(reading) {
        Observation::Baseline => {
            tracing::info!("[Room] start counter {}", reading);
            agent.ctx.apply(RecordPatch::StartCounter(reading))?;
            agent.upload_evidence(Evidence::Start).await;
            true
        }
        Observation::Advanced { gained } => {
            tracing::info!(
                "[Room] counter {} ({} of {})",
                reading,
                gained,
                agent.session.progress.required_delta
            );
            false
        }
        Observation::Rejected { current, reading } => {
            tracing::warn!("[Room] ignoring reading {} below {}", reading, current);
            return Ok(());
        }
    };

    if agent.session.progress.is_complete() {
        agent.ctx.apply(RecordPatch::Complete)?;
        agent.report(label::COMPLETE).await;
        agent.upload_evidence(Evidence::End).await;
        let overlay = agent.desktop.show_overlay(OVERLAY_TEXT).await?;
        return Err(RecoverySignal::Finish(overlay).into());
    }

    if !baseline {
        agent.upload_evidence(Evidence::Progress).await;
    }
    Ok(())
}

async fn ocr_counter(agent: &mut AgentRuntime) -> Flow<Option<i64>> {
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;
    for _ in 0..COUNTER_ATTEMPTS {
        let window = agent.window()?;
        agent.desktop.click_match(&window, &sigs.loot_panel).await?;
        let confirm = Region::client(window.size).grow_down(sigs.confirm_overhang);
        agent
            .desktop
            .click_match_in(confirm, &sigs.confirm_dialog, sigs.confirm_offset)
            .await?;

        if let Some(icon) = agent.desktop.find(&window, &sigs.counter_icon).await? {
            let area = Region::around(icon.point, sigs.counter_width, sigs.counter_height);
            let text = agent.desktop.ocr(area, &sigs.counter_text).await?;
            if let Some(value) = text.as_deref().and_then(parse_counter) {
                return Ok(Some(value));
            }
        }
        tokio::time::sleep(settings.timing.tick()).await;
    }
    Ok(None)
}

fn parse_counter(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{record, rig, rig_with};
    use vigil_core::record::AgentRecord;
    use vigil_core::recovery::Interrupt;

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("1,250"), Some(1250));
        assert_eq!(parse_counter(" 42 "), Some(42));
        assert_eq!(parse_counter(""), None);
        assert_eq!(parse_counter("--"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reading_is_persisted_with_start_evidence() {
        let mut rig = rig();
        rig.screen.show("img/db.bmp");
        rig.screen.queue_ocr("40");

        read_counter(&mut rig.agent).await.unwrap();
        assert_eq!(rig.store.snapshot().start_counter, Some(40));
        assert_eq!(
            rig.uploads.uploaded_paths(),
            vec!["/云顶截图/10001/start-10001.png"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_raises_finish_once() {
        let mut rig = rig_with(AgentRecord {
            start_counter: Some(10),
            ..record()
        });
        rig.screen.show("img/db.bmp");
        rig.screen.queue_ocr("60");
        rig.screen.queue_ocr("110");

        read_counter(&mut rig.agent).await.unwrap();
        assert!(!rig.store.snapshot().completed);

        let interrupt = read_counter(&mut rig.agent).await.unwrap_err();
        assert!(matches!(interrupt, Interrupt::Signal(RecoverySignal::Finish(_))));
        assert!(rig.store.snapshot().completed);
        assert!(rig.controller.labels().contains(&label::COMPLETE.to_string()));
        assert_eq!(rig.screen.overlays(), vec![OVERLAY_TEXT]);
        assert!(
            rig.uploads
                .uploaded_paths()
                .contains(&"/云顶截图/10001/end-10001.png".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lower_reading_is_rejected() {
        let mut rig = rig_with(AgentRecord {
            start_counter: Some(10),
            ..record()
        });
        rig.screen.show("img/db.bmp");
        rig.screen.queue_ocr("50");
        rig.screen.queue_ocr("30");

        read_counter(&mut rig.agent).await.unwrap();
        read_counter(&mut rig.agent).await.unwrap();
        assert_eq!(rig.agent.session.progress.gained(), Some(40));
        assert_eq!(rig.uploads.uploaded_paths().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_evidence_is_reported() {
        let mut rig = rig();
        rig.uploads.refuse_negotiation("errno 2");
        rig.screen.show("img/db.bmp");
        rig.screen.queue_ocr("40");

        read_counter(&mut rig.agent).await.unwrap();
        assert_eq!(rig.store.snapshot().start_counter, Some(40));
        assert_eq!(rig.controller.labels(), vec![label::START_EVIDENCE_FAILED]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_reaches_task_window() {
        let mut rig = rig();
        rig.screen.show("img/play.bmp");
        rig.screen.show("img/find_game.bmp");
        rig.screen.on_click("img/find_game.bmp", &["img/in_queue.bmp"], &[]);
        rig.screen.show("img/start_game.bmp");
        rig.screen
            .on_click_open("img/start_game.bmp", &rig.settings.target.task_window, 11);

        in_room(&mut rig.agent).await.unwrap();
        assert!(rig.agent.session.in_task());
        assert_eq!(rig.agent.session.rounds, 1);
        assert_eq!(rig.agent.window().unwrap().handle.0, 11);
        assert_eq!(
            rig.controller.labels(),
            vec![label::COUNTER_READ, label::IN_TASK]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_exhaustion_closes_queue_and_restarts() {
        let mut rig = rig();
        rig.screen.show("img/find_game.bmp");
        rig.screen.show("img/close_queue.bmp");

        assert!(in_room(&mut rig.agent).await.unwrap_err().is_restart());
        // 40 search clicks plus the queue close
        assert_eq!(rig.screen.clicks().len(), 41);
    }
}
