use crate::commands::await_commands;
use crate::runtime::AgentRuntime;
use vigil_core::recovery::{Flow, restart_with};
use vigil_core::status::label;

const METHOD_ATTEMPTS: u32 = 10;
const OBSERVATION_ROUNDS: u32 = 15;
/// Wrong secrets tolerated in one session before waiting for the controller.
const WRONG_SECRET_LIMIT: u32 = 8;

pub(super) async fn login(agent: &mut AgentRuntime) -> Flow<()> {
    agent.report(label::LOGIN).await;
    enter_credentials(agent).await?;
    observe(agent).await
}

/// Picks a login method: quick login if offered, otherwise the credential
/// form.
async fn enter_credentials(agent: &mut AgentRuntime) -> Flow<()> {
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;
    let Some(id) = agent.ctx.record().identity_id.clone() else {
        return restart_with("login without an identity");
    };
    let secret = agent.ctx.record().secret.clone();

    for _ in 0..METHOD_ATTEMPTS {
        let window = agent.window()?;
        if agent.desktop.click_match(&window, &sigs.quick_login).await? {
            tracing::info!("[Login] quick login");
            return Ok(());
        }

        if let Some(field) = agent.desktop.find(&window, &sigs.id_field).await? {
            agent.desktop.fill_field(field.point, &id).await?;
            if let Some(field) = agent.desktop.find(&window, &sigs.secret_field).await? {
                agent.desktop.fill_field(field.point, &secret).await?;
            }
            agent.desktop.click_match(&window, &sigs.agreement).await?;
            agent.desktop.click_match(&window, &sigs.submit_login).await?;
            tracing::info!("[Login] submitted credentials for {}", id);
            return Ok(());
        }

        tokio::time::sleep(settings.timing.tick()).await;
    }
    restart_with("no login method found")
}

/// Watches the login outcome for a bounded number of rounds.
async fn observe(agent: &mut AgentRuntime) -> Flow<()> {
    let settings = agent.settings.clone();
    let sigs = &settings.signatures;

    for _ in 0..OBSERVATION_ROUNDS {
        let window = agent.window()?;

        if agent.desktop.find(&window, &sigs.captcha_prompt).await?.is_some() {
            let image = agent.desktop.capture(sigs.captcha_region).await?;
            match agent.desktop.captcha().solve(&image).await {
                Ok(answer) => {
                    if let Some(input) = agent.desktop.find(&window, &sigs.captcha_input).await? {
                        agent.desktop.fill_field(input.point, &answer).await?;
                    } else {
                        agent.desktop.type_text(&answer).await?;
                    }
                    agent.desktop.click_match(&window, &sigs.captcha_submit).await?;
                }
                Err(e) => tracing::warn!("[Login] captcha not solved: {}", e),
            }
        } else if agent.desktop.find(&window, &sigs.wrong_secret).await?.is_some() {
            agent.session.wrong_secret_count += 1;
            let count = agent.session.wrong_secret_count;
            tracing::warn!("[Login] wrong secret ({})", count);
            agent.report(&label::wrong_secret(count)).await;
            agent.desktop.click_match(&window, &sigs.wrong_secret_ok).await?;
            if count > WRONG_SECRET_LIMIT {
                return Err(await_commands(agent).await);
            }
            enter_credentials(agent).await?;
        } else if agent.desktop.find(&window, &sigs.frozen).await?.is_some() {
            tracing::warn!("[Login] identity frozen");
            agent.report(label::FROZEN).await;
            return Err(await_commands(agent).await);
        } else if agent.seen(&window, &sigs.login_ok).await?.is_some() {
            tracing::info!("[Login] logged in");
            return Ok(());
        }

        tokio::time::sleep(settings.timing.tick()).await;
    }
    restart_with("login did not complete")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{record, rig, rig_with};
    use serde_json::json;
    use vigil_core::command::{CommandBatch, RawCommand};
    use vigil_core::record::AgentRecord;

    #[tokio::test(start_paused = true)]
    async fn test_credentials_then_success() {
        let mut rig = rig();
        rig.screen.show("img/qq_number.bmp");
        rig.screen.show("img/qq_pwd.bmp");
        rig.screen.show("img/logincg.bmp");

        login(&mut rig.agent).await.unwrap();
        assert_eq!(rig.screen.typed(), vec!["10001", "hunter2"]);
        assert_eq!(rig.controller.labels(), vec![label::LOGIN]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_method_raises_restart() {
        let mut rig = rig();
        let err = login(&mut rig.agent).await.unwrap_err();
        assert!(err.is_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unassigned_identity_raises_restart() {
        let mut rig = rig_with(AgentRecord::default());
        rig.screen.show("img/qq_login.bmp");
        assert!(login(&mut rig.agent).await.unwrap_err().is_restart());
        assert!(rig.screen.clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_captcha_is_solved_and_submitted() {
        let mut rig = rig();
        rig.screen.show("img/qq_login.bmp");
        rig.screen.show("img/yz.bmp");
        rig.screen.on_click("img/yzmqd.bmp", &["img/logincg.bmp"], &["img/yz.bmp"]);
        rig.screen.show("img/yzmqd.bmp");

        login(&mut rig.agent).await.unwrap();
        assert_eq!(rig.screen.captchas_solved(), 1);
        assert!(
            rig.screen
                .typed()
                .contains(&crate::fakes::FakeScreen::CAPTCHA_ANSWER.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_observation_rounds_are_bounded() {
        let mut rig = rig();
        rig.screen.show("img/qq_login.bmp");
        rig.screen.show("img/yz.bmp");

        assert!(login(&mut rig.agent).await.unwrap_err().is_restart());
        assert_eq!(rig.screen.captchas_solved(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_secret_is_counted_and_reported() {
        let mut rig = rig();
        rig.screen.show("img/qq_login.bmp");
        rig.screen.show("img/pwderror.bmp");
        rig.screen
            .on_click("img/pwderrorqd.bmp", &["img/logincg.bmp"], &["img/pwderror.bmp"]);
        rig.screen.show("img/pwderrorqd.bmp");

        login(&mut rig.agent).await.unwrap();
        assert_eq!(rig.agent.session.wrong_secret_count, 1);
        assert_eq!(
            rig.controller.labels(),
            vec![label::LOGIN.to_string(), label::wrong_secret(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_wrong_secrets_wait_for_controller() {
        let mut rig = rig();
        rig.agent.session.wrong_secret_count = 8;
        rig.screen.show("img/qq_login.bmp");
        rig.screen.show("img/pwderror.bmp");
        rig.controller.queue_batch(CommandBatch::new(vec![RawCommand {
            command: "new_pwd".to_string(),
            data: json!({"pwd": "fixed"}),
        }]));

        assert!(login(&mut rig.agent).await.unwrap_err().is_restart());
        assert_eq!(rig.store.snapshot().secret, "fixed");
        assert_eq!(rig.agent.session.wrong_secret_count, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_identity_waits_for_release() {
        let mut rig = rig_with(record());
        rig.screen.show("img/qq_login.bmp");
        rig.screen.show("img/dj1.bmp");
        rig.controller.queue_batch(CommandBatch::default());
        rig.controller.queue_batch(CommandBatch::new(vec![RawCommand {
            command: "close_qq".to_string(),
            data: json!({}),
        }]));

        assert!(login(&mut rig.agent).await.unwrap_err().is_restart());
        assert!(rig.controller.labels().contains(&label::FROZEN.to_string()));
        assert!(rig.store.snapshot().completed);
    }
}
