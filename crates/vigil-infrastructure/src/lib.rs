//! Infrastructure for the vigil agent: persistence, HTTP clients, the
//! desktop bridge and process control.

pub mod bridge;
pub mod captcha;
pub mod http_controller;
pub mod pan_upload;
pub mod paths;
pub mod process;
pub mod storage;

pub use bridge::{BridgeError, DesktopBridge};
pub use captcha::HttpCaptchaSolver;
pub use http_controller::HttpController;
pub use pan_upload::PanUploadApi;
pub use paths::VigilPaths;
pub use process::SystemProcessControl;
pub use storage::{AtomicTomlFile, TomlRecordStore, load_settings};
