//! Resumable upload protocol types.
//!
//! An upload is negotiated once, then transferred chunk by chunk, then
//! finalized with the ordered chunk fingerprints.

use crate::error::VigilError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// How the payload will be sent, declared when negotiating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPlan {
    Whole,
    Split,
}

/// What the store reported for one transferred chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub size: u64,
    pub fingerprint: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("failed to negotiate upload of {path}: {detail}")]
    Negotiate { path: String, detail: String },

    #[error("chunk {seq} of {path} failed: {detail}")]
    Transfer { path: String, seq: u32, detail: String },

    #[error("failed to create {path}: {detail}")]
    Create { path: String, detail: String },

    #[error("upload of {path} timed out")]
    Timeout { path: String },
}

impl From<UploadError> for VigilError {
    fn from(err: UploadError) -> Self {
        VigilError::transport(err.to_string())
    }
}

/// Remote object store endpoints.
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// Returns the upload id for `path`.
    async fn negotiate(&self, path: &str, plan: ChunkPlan) -> Result<String, UploadError>;

    /// Sends one chunk. A single attempt; the caller retries.
    async fn transfer(
        &self,
        path: &str,
        upload_id: &str,
        seq: u32,
        bytes: Vec<u8>,
    ) -> Result<ChunkReceipt, UploadError>;

    async fn finalize(
        &self,
        path: &str,
        upload_id: &str,
        total_size: u64,
        fingerprints: &[String],
    ) -> Result<(), UploadError>;
}

/// State of one upload call.
///
/// Receipts are keyed by sequence number so a re-sent chunk replaces its
/// earlier receipt instead of adding a second fingerprint.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub path: String,
    pub upload_id: String,
    receipts: BTreeMap<u32, ChunkReceipt>,
}

impl UploadSession {
    pub fn new(path: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            upload_id: upload_id.into(),
            receipts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, seq: u32, receipt: ChunkReceipt) {
        self.receipts.insert(seq, receipt);
    }

    pub fn total_size(&self) -> u64 {
        self.receipts.values().map(|r| r.size).sum()
    }

    /// Fingerprints ordered by sequence number.
    pub fn fingerprints(&self) -> Vec<String> {
        self.receipts
            .values()
            .map(|r| r.fingerprint.clone())
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.receipts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(size: u64, fp: &str) -> ChunkReceipt {
        ChunkReceipt {
            size,
            fingerprint: fp.to_string(),
        }
    }

    #[test]
    fn test_resent_chunk_does_not_duplicate() {
        let mut session = UploadSession::new("/e/a.png", "u1");
        session.record(0, receipt(10, "aa"));
        session.record(1, receipt(5, "bb"));
        session.record(0, receipt(10, "aa2"));
        assert_eq!(session.chunk_count(), 2);
        assert_eq!(session.fingerprints(), vec!["aa2", "bb"]);
        assert_eq!(session.total_size(), 15);
    }

    #[test]
    fn test_fingerprints_follow_sequence_not_arrival() {
        let mut session = UploadSession::new("/e/a.png", "u1");
        session.record(2, receipt(1, "c"));
        session.record(0, receipt(1, "a"));
        session.record(1, receipt(1, "b"));
        assert_eq!(session.fingerprints(), vec!["a", "b", "c"]);
    }
}
