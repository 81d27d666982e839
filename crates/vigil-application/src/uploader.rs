//! Resumable chunked uploads with at-least-once delivery per chunk.

use std::sync::Arc;
use std::time::Duration;
use vigil_core::settings::UploadSettings;
use vigil_core::upload::{ChunkPlan, UploadApi, UploadError, UploadSession};

pub struct ResumableUploader {
    api: Arc<dyn UploadApi>,
    chunk_size: usize,
    retry_delay: Duration,
    timeout: Duration,
}

impl ResumableUploader {
    pub fn new(api: Arc<dyn UploadApi>, settings: &UploadSettings) -> Self {
        Self {
            api,
            chunk_size: settings.chunk_size_bytes.max(1),
            retry_delay: settings.chunk_retry_delay(),
            timeout: settings.timeout(),
        }
    }

    /// Negotiates, transfers every chunk and finalizes.
    ///
    /// Negotiation and finalization are attempted once. Each chunk is retried
    /// until the store accepts it, so callers should bound the whole call
    /// with [`ResumableUploader::upload_within`].
    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<UploadSession, UploadError> {
        let plan = if bytes.len() > self.chunk_size {
            ChunkPlan::Split
        } else {
            ChunkPlan::Whole
        };

        let upload_id = self.api.negotiate(path, plan).await?;
        let mut session = UploadSession::new(path, upload_id);
        tracing::debug!(
            "[Upload] negotiated {} ({} bytes, {:?})",
            path,
            bytes.len(),
            plan
        );

        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![bytes]
        } else {
            bytes.chunks(self.chunk_size).collect()
        };

        for (seq, chunk) in chunks.into_iter().enumerate() {
            let seq = seq as u32;
            loop {
                match self
                    .api
                    .transfer(path, &session.upload_id, seq, chunk.to_vec())
                    .await
                {
                    Ok(receipt) => {
                        session.record(seq, receipt);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("[Upload] {}, retrying", e);
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.api
            .finalize(
                path,
                &session.upload_id,
                session.total_size(),
                &session.fingerprints(),
            )
            .await?;
        tracing::info!(
            "[Upload] stored {} in {} chunk(s)",
            path,
            session.chunk_count()
        );
        Ok(session)
    }

    /// [`ResumableUploader::upload`] bounded by the configured timeout.
    pub async fn upload_within(&self, path: &str, bytes: &[u8]) -> Result<UploadSession, UploadError> {
        match tokio::time::timeout(self.timeout, self.upload(path, bytes)).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout {
                path: path.to_string(),
            }),
        }
    }
}
