use anyhow::{Context, Result};
use vigil_core::record::{AgentRecord, RecordStore};
use vigil_infrastructure::{TomlRecordStore, VigilPaths};

pub fn show(paths: &VigilPaths) -> Result<()> {
    let store = TomlRecordStore::new(paths.record_file());
    let record = store.load()?;
    println!("# {}", paths.record_file().display());
    print!("{}", render(&record)?);
    Ok(())
}

fn render(record: &AgentRecord) -> Result<String> {
    toml::to_string_pretty(record).context("Failed to render the agent record")
}
