use crate::commands::poll_commands;
use crate::runtime::AgentRuntime;
use vigil_core::phase::Mode;
use vigil_core::recovery::{Flow, restart_with};
use vigil_core::status::label;

const AREA_ATTEMPTS: u32 = 10;
const PLAY_ATTEMPTS: u32 = 10;
const MODE_ROUNDS: u32 = 15;

/// Picks the identity's region, enters it and moves over to the client
/// window.
pub(super) async fn area_selection(agent: &mut AgentRuntime) -> Flow<()> {
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;
    let region = agent.ctx.record().region.clone();
    let style = sigs.area_style(&region);

    let mut picked = false;
    for _ in 0..AREA_ATTEMPTS {
        let window = agent.window()?;
        if let Some(found) = agent.desktop.find_text(&window, &region, style).await? {
            agent.desktop.click(found.point).await?;
            picked = true;
            break;
        }
        // the list collapses after a miss
        agent.desktop.click(sigs.area_list_anchor).await?;
        tokio::time::sleep(settings.timing.tick()).await;
    }
    if !picked {
        return restart_with(format!("region {} not found", region));
    }
    tracing::info!("[Client] picked region {}", region);

    let window = agent.window()?;
    agent.desktop.click_match(&window, &sigs.enter_area).await?;
    agent.desktop.settle().await;
    if agent
        .desktop
        .find_window(&settings.target.login_window)
        .await?
        .is_some()
    {
        agent.desktop.click_match(&window, &sigs.waiting_prompt).await?;
    }

    let client = agent.desktop.acquire(&settings.target.client_window).await?;
    agent.session.bind(client, Mode::OutOfTask);
    agent.report(label::CLIENT).await;
    poll_commands(agent).await
}

pub(super) async fn lobby(agent: &mut AgentRuntime) -> Flow<()> {
    let settings = agent.settings.clone();
    for _ in 0..PLAY_ATTEMPTS {
        let window = agent.window()?;
        if agent
            .desktop
            .click_match(&window, &settings.signatures.lobby_stage)
            .await?
        {
            return Ok(());
        }
        tokio::time::sleep(settings.timing.tick()).await;
    }
    tracing::debug!("[Client] play button did not respond");
    Ok(())
}

/// pvp, then the mode, then matchmaking, then confirm.
pub(super) async fn mode_selection(agent: &mut AgentRuntime) -> Flow<()> {
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;
    for _ in 0..MODE_ROUNDS {
        let window = agent.window()?;
        agent.desktop.click_match(&window, &sigs.pvp).await?;
        agent.desktop.click_match(&window, &sigs.mode).await?;
        agent.desktop.click_match(&window, &sigs.matchmaking).await?;
        if agent.desktop.click_match(&window, &sigs.confirm_mode).await? {
            tracing::info!("[Client] mode confirmed");
            return Ok(());
        }
        tokio::time::sleep(settings.timing.tick()).await;
    }
    restart_with("mode selection did not complete")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeScreen;
    use crate::handlers::test_support::rig;
    use vigil_core::capability::Point;

    #[tokio::test(start_paused = true)]
    async fn test_area_selection_moves_to_client() {
        let mut rig = rig();
        rig.screen.show("艾欧尼亚");
        rig.screen.show("img/intogame.bmp");
        rig.screen
            .on_click_open("img/intogame.bmp", &rig.settings.target.client_window, 8);

        area_selection(&mut rig.agent).await.unwrap();

        assert_eq!(rig.screen.clicks(), vec![FakeScreen::HIT; 2]);
        assert_eq!(rig.agent.window().unwrap().handle.0, 8);
        assert_eq!(rig.controller.labels(), vec![label::CLIENT]);
        assert_eq!(rig.controller.command_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_region_raises_restart() {
        let mut rig = rig();
        assert!(area_selection(&mut rig.agent).await.unwrap_err().is_restart());
        assert_eq!(rig.screen.clicks(), vec![Point::new(84, 671); 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_selection_exhaustion() {
        let mut rig = rig();
        rig.screen.show("img/pvp.bmp");
        assert!(mode_selection(&mut rig.agent).await.unwrap_err().is_restart());
        assert_eq!(rig.screen.clicks(), vec![FakeScreen::HIT; 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_gives_up_quietly() {
        let mut rig = rig();
        assert!(lobby(&mut rig.agent).await.is_ok());
        rig.screen.show("img/play.bmp");
        assert!(lobby(&mut rig.agent).await.is_ok());
        assert_eq!(rig.screen.clicks().len(), 1);
    }
}
