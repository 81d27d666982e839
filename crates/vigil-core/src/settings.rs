//! Agent settings loaded from `settings.toml`.
//!
//! Every field has a default so an empty file is a valid configuration. The
//! retry counts and timeouts are policy, not protocol: they are kept here so
//! deployments can tune them without a rebuild.

use crate::capability::{MatchOptions, Pattern, Point, Region};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AgentSettings {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub captcha: CaptchaSettings,
    #[serde(default)]
    pub timing: TimingPolicy,
    #[serde(default)]
    pub report: ReportPolicy,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub signatures: SignatureSet,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ControllerSettings {
    /// Base URL; endpoint names are appended as path segments.
    pub base_url: String,
    /// Version id reported with every status and compared on update checks.
    pub version_id: u64,
    pub request_timeout_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            version_id: 5,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct UploadSettings {
    pub api_base: String,
    pub transfer_url: String,
    pub token: String,
    pub cookie: String,
    pub user_agent: String,
    pub app_id: String,
    /// Remote directory evidence screenshots are stored under.
    pub evidence_root: String,
    /// Payloads larger than this are split into chunks of this size.
    pub chunk_size_bytes: usize,
    pub chunk_retry_delay_ms: u64,
    /// Upper bound for one whole upload, including chunk retries.
    pub timeout_secs: u64,
}

impl UploadSettings {
    pub fn chunk_retry_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            api_base: "https://pan.baidu.com/api".to_string(),
            transfer_url: "https://nj02ct01.pcs.baidu.com/rest/2.0/pcs/superfile2".to_string(),
            token: String::new(),
            cookie: String::new(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36".to_string(),
            app_id: "250528".to_string(),
            evidence_root: "/云顶截图".to_string(),
            chunk_size_bytes: 4 * 1024 * 1024,
            chunk_retry_delay_ms: 1_000,
            timeout_secs: 300,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct CaptchaSettings {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub soft_id: String,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://api.ttshitu.com/base64".to_string(),
            username: String::new(),
            password: String::new(),
            soft_id: String::new(),
        }
    }
}

/// Timeouts and poll budgets of the control loop.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TimingPolicy {
    pub tick_ms: u64,
    /// No recognized out-of-task phase for this long raises `Restart`.
    pub lobby_timeout_secs: u64,
    /// No recognized in-task phase for this long raises `Restart`.
    pub task_timeout_secs: u64,
    /// One-second polls spent waiting for a window before giving up.
    pub window_poll_attempts: u32,
    pub window_poll_ms: u64,
    /// A disconnect indicator visible longer than this raises `Restart`.
    pub disconnect_grace_secs: u64,
    /// Reconnect checks after a match problem before giving up.
    pub reconnect_polls: u32,
    /// Upper bound for a single vision or window call.
    pub probe_timeout_ms: u64,
    /// Pause between identity requests while none is available.
    pub identity_poll_secs: u64,
    /// Pause between command polls while blocked on the controller.
    pub command_wait_secs: u64,
    /// Step of the wait before a forced application update.
    pub update_wait_secs: u64,
    /// Pause between UI actions so the application can react.
    pub settle_ms: u64,
}

impl TimingPolicy {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn lobby_timeout(&self) -> Duration {
        Duration::from_secs(self.lobby_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn window_poll(&self) -> Duration {
        Duration::from_millis(self.window_poll_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn identity_poll(&self) -> Duration {
        Duration::from_secs(self.identity_poll_secs)
    }

    pub fn command_wait(&self) -> Duration {
        Duration::from_secs(self.command_wait_secs)
    }

    pub fn update_wait(&self) -> Duration {
        Duration::from_secs(self.update_wait_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            lobby_timeout_secs: 200,
            task_timeout_secs: 120,
            window_poll_attempts: 180,
            window_poll_ms: 1_000,
            disconnect_grace_secs: 10,
            reconnect_polls: 60,
            probe_timeout_ms: 10_000,
            identity_poll_secs: 30,
            command_wait_secs: 30,
            update_wait_secs: 30,
            settle_ms: 500,
        }
    }
}

/// Retry policy of status reports.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ReportPolicy {
    /// Attempts made back to back.
    pub burst_attempts: u32,
    /// Further attempts, separated by `pace_ms`.
    pub paced_attempts: u32,
    pub pace_ms: u64,
}

impl ReportPolicy {
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn total_attempts(&self) -> u32 {
        self.burst_attempts + self.paced_attempts
    }
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            burst_attempts: 15,
            paced_attempts: 20,
            pace_ms: 2_000,
        }
    }
}

/// A top-level window of the driven application.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WindowTarget {
    pub class: String,
    pub title: String,
}

impl WindowTarget {
    pub fn new(class: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            title: title.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TargetSettings {
    pub login_window: WindowTarget,
    pub client_window: WindowTarget,
    pub task_window: WindowTarget,
    /// Where the replacement agent binaries are written.
    pub install_dir: PathBuf,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            login_window: WindowTarget::new("TWINCONTROL", "英雄联盟登录程序"),
            client_window: WindowTarget::new("RCLIENT", "League of Legends"),
            task_window: WindowTarget::new("RiotWindowClass", "League of Legends (TM) Client"),
            install_dir: PathBuf::from("."),
        }
    }
}

/// How to start the desktop bridge helper.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct BridgeSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Image names killed by `ProcessControl::terminate_target`.
    pub target_processes: Vec<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("vigil-desktop-bridge"),
            args: Vec::new(),
            target_processes: vec![
                "League of Legends.exe".to_string(),
                "LeagueClient.exe".to_string(),
                "Client.exe".to_string(),
                "TPHelper.exe".to_string(),
            ],
        }
    }
}

/// A pattern plus the tolerance it is matched with.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Signature {
    pub pattern: Pattern,
    #[serde(default)]
    pub options: MatchOptions,
}

impl Signature {
    pub fn template(reference: &str) -> Self {
        Self {
            pattern: Pattern::template(reference),
            options: MatchOptions::default(),
        }
    }

    pub fn exact(reference: &str) -> Self {
        Self {
            pattern: Pattern::template(reference),
            options: MatchOptions::exact(),
        }
    }
}

/// Dictionary and color used to find a rendered string.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TextStyle {
    pub dictionary: u32,
    pub color: String,
}

/// Click offset applied when a given alternative of a multi-pattern matched.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlternativeOffset {
    pub index: usize,
    pub dx: i32,
    pub dy: i32,
}

/// Pattern references for every probe the agent runs.
///
/// The defaults name the asset files shipped with the original deployment;
/// the assets themselves are not part of this crate.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SignatureSet {
    // Out-of-task phase signatures
    pub login_stage: Signature,
    pub area_stage: Signature,
    pub lobby_stage: Signature,
    pub mode_stage: Signature,
    pub room_stage: Signature,
    pub queue_waiting: Signature,
    pub suspended: Signature,
    pub confirm_dialog: Signature,
    pub confirm_offset: Option<AlternativeOffset>,
    /// Extra pixels below the client area searched for confirm dialogs.
    pub confirm_overhang: i32,
    pub wrong_mode: Signature,
    pub client_loading: Signature,
    pub play_again: Signature,
    pub match_problem: Signature,
    pub reconnect: Signature,
    pub close_queue: Signature,

    // In-task signatures
    pub task_loading: Signature,
    pub task_active: Signature,
    pub disconnect: Signature,
    pub end_task: Signature,

    // Login
    pub quick_login: Signature,
    pub id_field: Signature,
    pub secret_field: Signature,
    pub agreement: Signature,
    pub submit_login: Signature,
    pub captcha_prompt: Signature,
    pub captcha_region: Region,
    pub captcha_input: Signature,
    pub captcha_submit: Signature,
    pub wrong_secret: Signature,
    pub wrong_secret_ok: Signature,
    pub frozen: Signature,
    pub login_ok: Signature,

    // Area selection
    pub area_list_anchor: Point,
    pub area_text: TextStyle,
    pub area_text_overrides: BTreeMap<String, TextStyle>,
    pub enter_area: Signature,
    pub waiting_prompt: Signature,

    // Mode selection
    pub pvp: Signature,
    pub mode: Signature,
    pub matchmaking: Signature,
    pub confirm_mode: Signature,

    // Room
    pub loot_panel: Signature,
    pub counter_icon: Signature,
    pub counter_width: i32,
    pub counter_height: i32,
    pub counter_text: TextStyle,
    pub find_match: Signature,
    pub in_queue: Signature,
    pub close_team: Signature,
    pub accept_match: Signature,
}

impl Default for SignatureSet {
    fn default() -> Self {
        let confirm_refs = (1..=9)
            .map(|n| format!("img/sure{}.bmp", n))
            .collect::<Vec<_>>()
            .join("|");

        let mut area_text_overrides = BTreeMap::new();
        area_text_overrides.insert(
            "男爵领域".to_string(),
            TextStyle {
                dictionary: 4,
                color: "cff8fa-181818".to_string(),
            },
        );

        Self {
            login_stage: Signature::template("img/status1.bmp"),
            area_stage: Signature::template("img/status2.bmp"),
            lobby_stage: Signature::template("img/play.bmp|img/room.bmp"),
            mode_stage: Signature::template("img/status4.bmp"),
            room_stage: Signature::template("img/status5.bmp"),
            queue_waiting: Signature::template("img/paidui.bmp"),
            suspended: Signature::template("img/fh.bmp"),
            confirm_dialog: Signature::exact(&confirm_refs),
            confirm_offset: Some(AlternativeOffset {
                index: 4,
                dx: 38,
                dy: 91,
            }),
            confirm_overhang: 150,
            wrong_mode: Signature::template("img/xg.bmp|img/sy.bmp"),
            client_loading: Signature::template("img/loading.bmp"),
            play_again: Signature::template("img/play_again.bmp"),
            match_problem: Signature::template("img/dj.bmp"),
            reconnect: Signature::template("img/cl.bmp"),
            close_queue: Signature::template("img/close_queue.bmp"),

            task_loading: Signature::template("img/load_game.bmp"),
            task_active: Signature::template("img/in_gaming.bmp"),
            disconnect: Signature::template("img/rec.bmp"),
            end_task: Signature::template("img/end_game.bmp"),

            quick_login: Signature::template("img/qq_login.bmp"),
            id_field: Signature::template("img/qq_number.bmp"),
            secret_field: Signature::exact("img/qq_pwd.bmp"),
            agreement: Signature::exact("img/agree.bmp"),
            submit_login: Signature::exact("img/login.bmp"),
            captcha_prompt: Signature::template("img/yz.bmp"),
            captcha_region: Region::new(574, 423, 703, 475),
            captcha_input: Signature::template("img/iyzm.bmp"),
            captcha_submit: Signature::template("img/yzmqd.bmp"),
            wrong_secret: Signature::template("img/pwderror.bmp"),
            wrong_secret_ok: Signature::template("img/pwderrorqd.bmp"),
            frozen: Signature::template("img/dj1.bmp"),
            login_ok: Signature::template("img/logincg.bmp"),

            area_list_anchor: Point::new(84, 671),
            area_text: TextStyle {
                dictionary: 0,
                color: "ccbe8f-181818".to_string(),
            },
            area_text_overrides,
            enter_area: Signature::template("img/intogame.bmp"),
            waiting_prompt: Signature::template("img/waiting.bmp"),

            pvp: Signature::template("img/pvp.bmp"),
            mode: Signature::template("img/yunding.bmp"),
            matchmaking: Signature::template("img/pipei.bmp"),
            confirm_mode: Signature::template("img/confirmgame.bmp"),

            loot_panel: Signature::template("img/zlp.bmp"),
            counter_icon: Signature::template("img/db.bmp"),
            counter_width: 55,
            counter_height: 60,
            counter_text: TextStyle {
                dictionary: 3,
                color: "ddd1a6-000000".to_string(),
            },
            find_match: Signature::template("img/find_game.bmp"),
            in_queue: Signature::template("img/in_queue.bmp"),
            close_team: Signature::template("img/close_team.bmp"),
            accept_match: Signature::template("img/start_game.bmp"),
        }
    }
}

impl SignatureSet {
    /// Text style for a region name, honoring per-region overrides.
    pub fn area_style(&self, region: &str) -> &TextStyle {
        self.area_text_overrides
            .get(region)
            .unwrap_or(&self.area_text)
    }
}
