//! The persisted agent record and the store that owns it.
//!
//! The record is the only state that survives a process restart. Both the
//! automation loop and remote commands change it, so every change is a
//! [`RecordPatch`] applied by [`RecordStore::update`] against the latest
//! on-disk value.

use crate::error::Result;
use crate::identity::{Identity, IdentityGrant, TaskProgress};
use serde::{Deserialize, Serialize};

/// Persisted configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentRecord {
    /// `None` until the controller assigns an identity.
    #[serde(default)]
    pub identity_id: Option<String>,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub region: String,
    /// Launcher of the driven application.
    #[serde(default)]
    pub target_path: String,
    /// Counter value seen on the first reading for this identity.
    #[serde(default)]
    pub start_counter: Option<i64>,
    #[serde(default)]
    pub required_delta: i64,
    #[serde(default)]
    pub machine_tag: String,
    #[serde(default)]
    pub origin: String,
    /// Set when the goal was reached or the identity was released.
    #[serde(default)]
    pub completed: bool,
}

impl AgentRecord {
    pub fn identity(&self) -> Option<Identity> {
        self.identity_id.as_ref().map(|id| Identity {
            id: id.clone(),
            secret: self.secret.clone(),
            region: self.region.clone(),
            origin: self.origin.clone(),
        })
    }

    /// True when the controller has to provide a (new) identity before any
    /// automation may run.
    pub fn needs_identity(&self) -> bool {
        self.identity_id.is_none() || self.completed
    }

    pub fn progress(&self) -> TaskProgress {
        TaskProgress::new(self.start_counter, self.required_delta)
    }

    /// Part of the machine tag used when asking for identities.
    pub fn machine_prefix(&self) -> &str {
        self.machine_tag
            .split('|')
            .next()
            .unwrap_or(self.machine_tag.as_str())
    }
}

/// A single field-level change to the record.
///
/// Every variant overwrites whole fields, so applying the same patch twice is
/// harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPatch {
    /// Replace the active secret.
    Secret(String),
    /// Give the identity back to the controller.
    Release,
    /// The goal for the current identity was reached.
    Complete,
    /// First counter reading for the current identity.
    StartCounter(i64),
    /// Switch to a newly granted identity.
    Assign(IdentityGrant),
}

impl RecordPatch {
    pub fn apply(&self, record: &mut AgentRecord) {
        match self {
            RecordPatch::Secret(secret) => record.secret = secret.clone(),
            RecordPatch::Release | RecordPatch::Complete => record.completed = true,
            RecordPatch::StartCounter(value) => record.start_counter = Some(*value),
            RecordPatch::Assign(grant) => {
                record.identity_id = Some(grant.identity.id.clone());
                record.secret = grant.identity.secret.clone();
                record.region = grant.identity.region.clone();
                record.origin = grant.identity.origin.clone();
                record.required_delta = grant.required_delta;
                record.start_counter = None;
                record.completed = false;
            }
        }
    }
}

/// Durable home of the [`AgentRecord`].
pub trait RecordStore: Send + Sync {
    /// Reads the latest record. A missing record is the default record.
    fn load(&self) -> Result<AgentRecord>;

    /// Re-reads the record, applies `patch` and writes it back atomically.
    /// Returns the record as written.
    fn update(&self, patch: &RecordPatch) -> Result<AgentRecord>;
}
