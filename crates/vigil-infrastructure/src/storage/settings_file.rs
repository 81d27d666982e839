//! Loading of `settings.toml`.

use super::atomic_toml::AtomicTomlFile;
use std::path::PathBuf;
use vigil_core::settings::AgentSettings;
use vigil_core::Result;

/// Loads agent settings. A missing file yields the defaults and is written
/// out so operators have something to edit.
pub fn load_settings(path: PathBuf) -> Result<AgentSettings> {
    let file = AtomicTomlFile::<AgentSettings>::new(path);
    match file.load()? {
        Some(settings) => Ok(settings),
        None => {
            let settings = AgentSettings::default();
            file.save(&settings)?;
            tracing::info!(
                "[Settings] wrote default settings to {}",
                file.path().display()
            );
            Ok(settings)
        }
    }
}
