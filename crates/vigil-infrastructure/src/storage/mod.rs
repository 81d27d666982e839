//! Storage layer for atomic file operations.

mod atomic_toml;
mod record_store;
mod settings_file;

pub use atomic_toml::{AtomicTomlError, AtomicTomlFile};
pub use record_store::TomlRecordStore;
pub use settings_file::load_settings;
