//! End-to-end runs of the supervisor against scripted fakes.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vigil_application::fakes::{FakeController, FakeScreen, FakeUploadApi, MemoryRecordStore};
use vigil_application::{AgentRuntime, StandardHandlers, Supervisor};
use vigil_core::capability::OverlayHandle;
use vigil_core::command::{CommandBatch, RawCommand};
use vigil_core::identity::{Identity, IdentityGrant};
use vigil_core::record::AgentRecord;
use vigil_core::settings::AgentSettings;
use vigil_core::status::label;

struct Harness {
    store: Arc<MemoryRecordStore>,
    controller: Arc<FakeController>,
    screen: Arc<FakeScreen>,
    settings: Arc<AgentSettings>,
}

impl Harness {
    fn new(record: AgentRecord) -> Self {
        let settings = Arc::new(AgentSettings::default());
        let screen = Arc::new(FakeScreen::default());
        screen.open_on_launch(&settings.target.login_window, 1);
        Self {
            store: Arc::new(MemoryRecordStore::with(record)),
            controller: Arc::new(FakeController::default()),
            screen,
            settings,
        }
    }

    fn supervisor(&self) -> Supervisor {
        let agent = AgentRuntime::new(
            self.settings.clone(),
            self.store.clone(),
            self.controller.clone(),
            Arc::new(FakeUploadApi::default()),
            self.screen.capabilities(),
        )
        .unwrap();
        Supervisor::new(agent, Box::new(StandardHandlers::default()))
    }

    /// Runs the supervisor for `secs` of virtual time.
    async fn run_for(&self, secs: u64) {
        let outcome =
            tokio::time::timeout(Duration::from_secs(secs), self.supervisor().run()).await;
        assert!(outcome.is_err(), "supervisor stopped early: {:?}", outcome);
    }

    /// A login screen that accepts credentials on submit.
    fn script_login(&self) {
        self.screen.show_on_launch("img/status1.bmp");
        self.screen.show("img/qq_number.bmp");
        self.screen.show("img/qq_pwd.bmp");
        self.screen.show("img/login.bmp");
        self.screen
            .on_click("img/login.bmp", &["img/logincg.bmp"], &["img/status1.bmp"]);
    }

    fn count(&self, status: &str) -> usize {
        self.controller
            .labels()
            .iter()
            .filter(|l| l.as_str() == status)
            .count()
    }
}

fn record() -> AgentRecord {
    AgentRecord {
        identity_id: Some("10001".to_string()),
        secret: "hunter2".to_string(),
        region: "艾欧尼亚".to_string(),
        target_path: "C:/game/launcher.exe".to_string(),
        required_delta: 100,
        machine_tag: "m1|a".to_string(),
        ..AgentRecord::default()
    }
}

#[tokio::test(start_paused = true)]
async fn login_then_silence_restarts_and_logs_in_again() {
    let harness = Harness::new(record());
    harness.script_login();

    harness.run_for(260).await;

    let labels = harness.controller.labels();
    assert_eq!(
        labels[..3],
        [
            label::LOGIN.to_string(),
            label::RESTARTING.to_string(),
            label::LOGIN.to_string()
        ]
    );
    assert_eq!(harness.count(label::RESTARTING), 1);
    assert_eq!(harness.screen.terminations(), 1);
    assert_eq!(harness.screen.launches().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rotated_secret_is_used_after_restart() {
    let harness = Harness::new(record());
    harness.script_login();
    harness
        .controller
        .queue_batch(CommandBatch::new(vec![RawCommand {
            command: "new_pwd".to_string(),
            data: json!({"pwd": "newpass"}),
        }]));

    harness.run_for(30).await;

    assert_eq!(harness.store.snapshot().secret, "newpass");
    let typed = harness.screen.typed();
    assert!(typed.contains(&"newpass".to_string()));
    assert!(!typed.contains(&"hunter2".to_string()));
    assert_eq!(harness.controller.labels()[0], label::RESTARTING);
}

#[tokio::test(start_paused = true)]
async fn reaching_the_goal_finishes_once_and_waits_for_identity() {
    let harness = Harness::new(AgentRecord {
        start_counter: Some(0),
        ..record()
    });
    harness
        .screen
        .open_window(&harness.settings.target.client_window, 4);
    harness.screen.show("img/status5.bmp");
    harness.screen.show("img/db.bmp");
    harness.screen.queue_ocr("150");

    let screen = harness.screen.clone();
    let controller = harness.controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(100)).await;
        screen.hide("img/status5.bmp");
        controller.queue_identity(IdentityGrant {
            identity: Identity {
                id: "20002".to_string(),
                secret: "fresh".to_string(),
                region: "男爵领域".to_string(),
                origin: "pool".to_string(),
            },
            required_delta: 300,
        });
    });

    harness.run_for(300).await;

    assert_eq!(harness.screen.overlays(), vec!["完成"]);
    assert_eq!(harness.screen.closed_overlays(), vec![OverlayHandle(1)]);
    assert_eq!(harness.count(label::COMPLETE), 1);
    assert_eq!(harness.count(label::IDENTITY_GRANTED), 1);
    assert!(harness.count(label::WAITING_IDENTITY) >= 3);

    let labels = harness.controller.labels();
    let granted = labels
        .iter()
        .position(|l| l == label::IDENTITY_GRANTED)
        .unwrap();
    assert!(labels[..granted].iter().all(|l| l != label::LOGIN));
    assert_eq!(harness.screen.launches().len(), 1);

    let stored = harness.store.snapshot();
    assert_eq!(stored.identity_id.as_deref(), Some("20002"));
    assert_eq!(stored.start_counter, None);
    assert!(!stored.completed);
}
