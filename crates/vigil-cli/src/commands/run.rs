use anyhow::{Context, Result};
use std::sync::Arc;
use vigil_application::{AgentRuntime, Capabilities, Exit, StandardHandlers, Supervisor};
use vigil_core::record::RecordStore;
use vigil_infrastructure::{
    DesktopBridge, HttpCaptchaSolver, HttpController, PanUploadApi, SystemProcessControl,
    TomlRecordStore, VigilPaths, load_settings,
};

/// Wires the infrastructure into a supervisor and runs it to the end.
pub async fn run(paths: &VigilPaths) -> Result<()> {
    let settings = Arc::new(load_settings(paths.settings_file())?);
    let store: Arc<dyn RecordStore> = Arc::new(TomlRecordStore::new(paths.record_file()));

    let controller = Arc::new(HttpController::new(&settings.controller)?);
    let upload_api = Arc::new(PanUploadApi::new(settings.upload.clone())?);
    let captcha = Arc::new(HttpCaptchaSolver::new(settings.captcha.clone())?);
    let process = Arc::new(SystemProcessControl::new(
        settings.bridge.target_processes.clone(),
    ));
    let bridge = Arc::new(
        DesktopBridge::spawn(&settings.bridge).context("Failed to start the desktop bridge")?,
    );

    let caps = Capabilities::from_screen(bridge, process, captcha);
    let agent = AgentRuntime::new(settings, store, controller, upload_api, caps)?;
    let supervisor = Supervisor::new(agent, Box::new(StandardHandlers::default()));

    match supervisor.run().await? {
        Exit::Superseded { version } => {
            tracing::info!("[Supervisor] handing over to version {}", version);
        }
    }
    Ok(())
}
