//! Remote commands delivered by the controller.

use crate::error::{Result, VigilError};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

/// Wire format of `update_time`, interpreted in local time.
pub const UPDATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// One command as it appears on the wire, before interpretation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommand {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// A recognized remote instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Overwrite the active secret.
    RotateSecret { secret: String },
    /// Mark the identity eligible for replacement.
    ReleaseIdentity,
    /// Stop the driven application and wait until `at` (local time).
    ForceUpdate { at: NaiveDateTime },
}

impl RemoteCommand {
    /// Interprets a wire command. `Ok(None)` for kinds this agent does not know.
    pub fn parse(raw: &RawCommand) -> Result<Option<Self>> {
        let command = match raw.command.as_str() {
            "rotate_secret" | "new_pwd" => {
                let secret = string_field(&raw.data, &["pwd", "secret"])
                    .ok_or_else(|| VigilError::protocol(format!("{} without pwd", raw.command)))?;
                RemoteCommand::RotateSecret { secret }
            }
            "release_identity" | "close_qq" => RemoteCommand::ReleaseIdentity,
            "force_update" | "update" => {
                let text = string_field(&raw.data, &["update_time"]).ok_or_else(|| {
                    VigilError::protocol(format!("{} without update_time", raw.command))
                })?;
                let at = NaiveDateTime::parse_from_str(&text, UPDATE_TIME_FORMAT).map_err(|e| {
                    VigilError::protocol(format!("bad update_time '{}': {}", text, e))
                })?;
                RemoteCommand::ForceUpdate { at }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteCommand::RotateSecret { .. } => "rotate_secret",
            RemoteCommand::ReleaseIdentity => "release_identity",
            RemoteCommand::ForceUpdate { .. } => "force_update",
        }
    }
}

fn string_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| data.get(*key))
        .find_map(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Commands fetched by one poll, in the order the controller sent them.
#[derive(Debug, Clone, Default)]
pub struct CommandBatch {
    pub commands: Vec<RawCommand>,
}

impl CommandBatch {
    pub fn new(commands: Vec<RawCommand>) -> Self {
        Self { commands }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
