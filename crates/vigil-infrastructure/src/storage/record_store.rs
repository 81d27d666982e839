//! TOML-backed [`RecordStore`].

use super::atomic_toml::AtomicTomlFile;
use std::path::PathBuf;
use vigil_core::record::{AgentRecord, RecordPatch, RecordStore};
use vigil_core::Result;

/// Keeps the [`AgentRecord`] in `agent.toml`.
pub struct TomlRecordStore {
    file: AtomicTomlFile<AgentRecord>,
}

impl TomlRecordStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
        }
    }
}

impl RecordStore for TomlRecordStore {
    fn load(&self) -> Result<AgentRecord> {
        Ok(self.file.load()?.unwrap_or_default())
    }

    fn update(&self, patch: &RecordPatch) -> Result<AgentRecord> {
        let record = self.file.update(AgentRecord::default(), |record| {
            patch.apply(record);
            Ok(())
        })?;
        tracing::debug!(
            "[RecordStore] applied {:?} to {}",
            patch_name(patch),
            self.file.path().display()
        );
        Ok(record)
    }
}

fn patch_name(patch: &RecordPatch) -> &'static str {
    match patch {
        RecordPatch::Secret(_) => "secret",
        RecordPatch::Release => "release",
        RecordPatch::Complete => "complete",
        RecordPatch::StartCounter(_) => "start_counter",
        RecordPatch::Assign(_) => "assign",
    }
}
