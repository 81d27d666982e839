use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use vigil_application::ResumableUploader;
use vigil_infrastructure::{PanUploadApi, VigilPaths, load_settings};

pub async fn upload(paths: &VigilPaths, file: &Path, remote_path: &str) -> Result<()> {
    let settings = load_settings(paths.settings_file())?;
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let api = Arc::new(PanUploadApi::new(settings.upload.clone())?);
    let uploader = ResumableUploader::new(api, &settings.upload);
    let session = uploader.upload_within(remote_path, &bytes).await?;

    println!(
        "Uploaded {} ({} bytes in {} chunk(s)) to {}",
        file.display(),
        session.total_size(),
        session.chunk_count(),
        session.path
    );
    Ok(())
}
