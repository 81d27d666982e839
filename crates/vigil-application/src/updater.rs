//! Self-update against the controller's release endpoint.

use crate::runtime::AgentRuntime;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_core::recovery::{Flow, Interrupt};
use vigil_core::VigilError;
use vigil_core::status::label;

const DOWNLOAD_ATTEMPTS: u32 = 10;
const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Older binaries removed on every up-to-date check.
const PRUNED_VERSIONS: u64 = 10;

/// Binary name of agent version `version`.
pub fn binary_path(install_dir: &Path, version: u64) -> PathBuf {
    install_dir.join(format!("{}.exe", version))
}

/// Checks for a newer agent release.
///
/// Returns `Interrupt::Superseded` once a newer binary was written and
/// started. Every other outcome, failures included, lets the caller carry on.
pub async fn check_for_update(agent: &mut AgentRuntime) -> Flow<()> {
    let local = agent.settings.controller.version_id;
    let release = match agent.controller.latest_release().await {
        Ok(release) => release,
        Err(e) => {
            tracing::warn!("[Updater] update check failed: {}", e);
            return Ok(());
        }
    };

    if release.version_id <= local {
        prune(&agent.settings.target.install_dir, local).await;
        return Ok(());
    }

    tracing::info!(
        "[Updater] version {} available (running {})",
        release.version_id,
        local
    );
    let Some(bytes) = download(agent, &release.url).await else {
        agent.report(label::SELF_UPDATE_FAILED).await;
        return Ok(());
    };

    let path = binary_path(&agent.settings.target.install_dir, release.version_id);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(VigilError::from)?;

    if let Err(e) = agent.desktop.process().launch_agent(&path).await {
        tracing::error!("[Updater] failed to start {}: {}", path.display(), e);
        agent.report(label::SELF_UPDATE_FAILED).await;
        return Ok(());
    }

    tracing::info!("[Updater] handed over to {}", path.display());
    Err(Interrupt::Superseded {
        version: release.version_id,
    })
}

async fn download(agent: &AgentRuntime, url: &str) -> Option<Vec<u8>> {
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match agent.controller.download(url).await {
            Ok(bytes) => return Some(bytes),
            Err(e) => {
                tracing::warn!(
                    "[Updater] download attempt {}/{} failed: {}",
                    attempt,
                    DOWNLOAD_ATTEMPTS,
                    e
                );
                if attempt < DOWNLOAD_ATTEMPTS {
                    tokio::time::sleep(DOWNLOAD_RETRY_DELAY).await;
                }
            }
        }
    }
    None
}

/// Removes the binaries of the versions right below `current`.
async fn prune(install_dir: &Path, current: u64) {
    for version in current.saturating_sub(PRUNED_VERSIONS)..current {
        let path = binary_path(install_dir, version);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("[Updater] removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[Updater] could not remove {}: {}", path.display(), e),
        }
    }
}
