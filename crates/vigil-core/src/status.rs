//! Status labels and the snapshot reported to the controller.

use crate::record::AgentRecord;
use serde::Serialize;

/// Status labels understood by the controller dashboard.
pub mod label {
    pub const LOGIN: &str = "登录阶段";
    pub const CLIENT: &str = "客户端阶段";
    pub const IN_TASK: &str = "游戏中";
    pub const RESTARTING: &str = "重启游戏";
    pub const WAITING_IDENTITY: &str = "等待账号中...";
    pub const IDENTITY_GRANTED: &str = "获取账号成功";
    pub const COMPLETE: &str = "完成";
    pub const FROZEN: &str = "账号冻结";
    pub const SUSPENDED: &str = "封停";
    pub const UPDATE_PENDING: &str = "等待更新游戏";
    pub const UPDATING: &str = "正在更新游戏";
    pub const START_EVIDENCE_FAILED: &str = "上传首图失败";
    pub const END_EVIDENCE_FAILED: &str = "上传完成图失败";
    pub const SELF_UPDATE_FAILED: &str = "脚本更新失败";
    pub const COUNTER_READ: &str = "获取战利品成功";

    /// `密码错误-N` for the N-th wrong secret in a session.
    pub fn wrong_secret(count: u32) -> String {
        format!("密码错误-{}", count)
    }
}

/// One status report, serialized as the controller's form fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "qq_number")]
    pub identity: String,
    #[serde(rename = "area")]
    pub region: String,
    /// `-1` until known.
    #[serde(rename = "start_coin")]
    pub start_counter: i64,
    #[serde(rename = "now_coin")]
    pub current_counter: i64,
    #[serde(rename = "need_all")]
    pub required_delta: i64,
    #[serde(rename = "status")]
    pub label: String,
    /// Seconds since the Unix epoch.
    #[serde(rename = "upgrade_time")]
    pub timestamp: f64,
    #[serde(rename = "machine_name")]
    pub machine_tag: String,
    #[serde(rename = "pwd")]
    pub secret: String,
    #[serde(rename = "version_id")]
    pub version: u64,
    #[serde(rename = "from")]
    pub origin: String,
}

impl StatusSnapshot {
    pub fn from_record(
        record: &AgentRecord,
        current_counter: Option<i64>,
        label: impl Into<String>,
        version: u64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            identity: record.identity_id.clone().unwrap_or_else(|| "-1".to_string()),
            region: record.region.clone(),
            start_counter: record.start_counter.unwrap_or(-1),
            current_counter: current_counter.unwrap_or(-1),
            required_delta: record.required_delta,
            label: label.into(),
            timestamp: now.timestamp_millis() as f64 / 1000.0,
            machine_tag: record.machine_tag.clone(),
            secret: record.secret.clone(),
            version,
            origin: record.origin.clone(),
        }
    }
}
