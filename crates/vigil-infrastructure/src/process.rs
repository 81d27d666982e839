//! Operating-system process control via `tokio::process`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use vigil_core::capability::ProcessControl;
use vigil_core::{Result, VigilError};

/// Kills and launches processes with the platform's own tools.
pub struct SystemProcessControl {
    target_processes: Vec<String>,
}

impl SystemProcessControl {
    pub fn new(target_processes: Vec<String>) -> Self {
        Self { target_processes }
    }

    fn kill_command(image: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("taskkill");
            cmd.args(["/IM", image, "/F"]);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("pkill");
            cmd.args(["-f", image]);
            cmd
        }
    }

    fn spawn_detached(path: &Path) -> Result<()> {
        let mut cmd = Command::new(path);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VigilError::process(format!("Failed to launch {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn terminate_target(&self) -> Result<()> {
        for image in &self.target_processes {
            // A non-zero exit only means nothing was running under that name.
            match Self::kill_command(image).output().await {
                Ok(output) => tracing::debug!(
                    "[Process] kill {} exited with {}",
                    image,
                    output.status
                ),
                Err(e) => tracing::warn!("[Process] could not run kill for {}: {}", image, e),
            }
        }
        Ok(())
    }

    async fn launch_target(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(VigilError::config("target_path is empty in agent record"));
        }
        tracing::info!("[Process] launching target {}", path);
        Self::spawn_detached(Path::new(path))
    }

    async fn launch_agent(&self, path: &Path) -> Result<()> {
        tracing::info!("[Process] launching agent {}", path.display());
        Self::spawn_detached(path)
    }
}
