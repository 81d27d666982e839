//! Interface to the remote controller.

use crate::command::CommandBatch;
use crate::error::Result;
use crate::identity::IdentityGrant;
use crate::status::StatusSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Latest agent release published by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version_id: u64,
    pub url: String,
}

/// Request/response plumbing for the controller endpoints.
///
/// Implementations perform one request per call and never retry; retry
/// policy lives with the callers.
#[async_trait]
pub trait ControllerTransport: Send + Sync {
    /// Posts a status report and returns the raw response body.
    async fn post_status(&self, snapshot: &StatusSnapshot) -> Result<String>;

    /// Fetches pending commands for `machine_tag`.
    async fn fetch_commands(&self, machine_tag: &str) -> Result<CommandBatch>;

    /// Asks for a fresh identity. `Ok(None)` when the pool is empty.
    async fn request_identity(&self, machine_prefix: &str) -> Result<Option<IdentityGrant>>;

    async fn latest_release(&self) -> Result<ReleaseInfo>;

    /// Downloads a release artifact.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}
