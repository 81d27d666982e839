//! Owned identity/record state with a single update funnel.

use std::sync::Arc;
use vigil_core::Result;
use vigil_core::record::{AgentRecord, RecordPatch, RecordStore};

/// The agent's view of the persisted record.
///
/// All writes go through [`AgentContext::apply`], which performs a locked
/// read-merge-write in the store and then caches the result, so the cached
/// copy is never ahead of or behind what is on disk after a write.
pub struct AgentContext {
    store: Arc<dyn RecordStore>,
    record: AgentRecord,
}

impl AgentContext {
    pub fn load(store: Arc<dyn RecordStore>) -> Result<Self> {
        let record = store.load()?;
        Ok(Self { store, record })
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    pub fn apply(&mut self, patch: RecordPatch) -> Result<&AgentRecord> {
        self.record = self.store.update(&patch)?;
        Ok(&self.record)
    }

    /// Picks up changes written outside this process.
    pub fn reload(&mut self) -> Result<&AgentRecord> {
        self.record = self.store.load()?;
        Ok(&self.record)
    }
}
