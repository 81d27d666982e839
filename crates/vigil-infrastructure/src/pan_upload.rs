//! reqwest implementation of [`UploadApi`] for the pan-style object store.
//!
//! `precreate` hands out an upload id, `superfile2` accepts one multipart
//! chunk per `partseq`, and `create` stitches the chunks together from their
//! MD5 list.

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use vigil_core::settings::UploadSettings;
use vigil_core::upload::{ChunkPlan, ChunkReceipt, UploadApi, UploadError};
use vigil_core::{Result, VigilError};

// The store only checks the number of entries at precreate time.
const PLACEHOLDER_BLOCK: &str = "5910a591dd8fc18c32a8f3df4fdc1761";
const PLACEHOLDER_BLOCK_2: &str = "a5fc157d78e6ad1c7e114b056c92821e";

pub struct PanUploadApi {
    client: Client,
    settings: UploadSettings,
}

impl PanUploadApi {
    pub fn new(settings: UploadSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&settings.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        if !settings.cookie.is_empty() {
            let cookie = HeaderValue::from_str(&settings.cookie)
                .map_err(|e| VigilError::config(format!("upload.cookie: {}", e)))?;
            headers.insert(COOKIE, cookie);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VigilError::config(format!("Failed to build upload client: {}", e)))?;
        Ok(Self { client, settings })
    }

    fn api(&self, name: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), name)
    }

    fn with_common_params(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[
            ("app_id", self.settings.app_id.as_str()),
            ("channel", "chunlei"),
            ("clienttype", "0"),
            ("web", "1"),
            ("bdstoken", self.settings.token.as_str()),
        ])
    }
}

/// Directory part of a remote path, with trailing slash.
fn target_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => format!("{}/", &path[..idx]),
        None => "/".to_string(),
    }
}

fn block_list_json(blocks: &[String]) -> String {
    serde_json::to_string(blocks).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Deserialize)]
struct ErrnoResponse {
    errno: i64,
    #[serde(default)]
    uploadid: Option<String>,
}

#[async_trait]
impl UploadApi for PanUploadApi {
    async fn negotiate(&self, path: &str, plan: ChunkPlan) -> std::result::Result<String, UploadError> {
        let negotiate_err = |detail: String| UploadError::Negotiate {
            path: path.to_string(),
            detail,
        };

        let placeholder = match plan {
            ChunkPlan::Whole => vec![PLACEHOLDER_BLOCK.to_string()],
            ChunkPlan::Split => vec![
                PLACEHOLDER_BLOCK.to_string(),
                PLACEHOLDER_BLOCK_2.to_string(),
            ],
        };
        let target = target_dir(path);
        let block_list = block_list_json(&placeholder);
        let form = [
            ("path", path),
            ("target_path", target.as_str()),
            ("autoinit", "1"),
            ("isdir", "0"),
            ("bdstoken", self.settings.token.as_str()),
            ("block_list", block_list.as_str()),
        ];

        let start_log_time = chrono::Utc::now().timestamp_millis().to_string();
        let response = self
            .client
            .post(self.api("precreate"))
            .query(&[("startLogTime", start_log_time.as_str())])
            .form(&form)
            .send()
            .await
            .map_err(|e| negotiate_err(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| negotiate_err(e.to_string()))?;
        let parsed: ErrnoResponse =
            serde_json::from_str(&body).map_err(|e| negotiate_err(format!("{}: {}", e, body)))?;

        if parsed.errno != 0 {
            return Err(negotiate_err(format!("errno {}", parsed.errno)));
        }
        let upload_id = parsed
            .uploadid
            .filter(|id| !id.is_empty())
            .ok_or_else(|| negotiate_err("no uploadid in response".to_string()))?;

        tracing::debug!("[Upload] negotiated {} for {}", upload_id, path);
        Ok(upload_id)
    }

    async fn transfer(
        &self,
        path: &str,
        upload_id: &str,
        seq: u32,
        bytes: Vec<u8>,
    ) -> std::result::Result<ChunkReceipt, UploadError> {
        let transfer_err = |detail: String| UploadError::Transfer {
            path: path.to_string(),
            seq,
            detail,
        };

        let part = Part::bytes(bytes)
            .file_name("blob")
            .mime_str("application/octet-stream")
            .map_err(|e| transfer_err(e.to_string()))?;
        let form = Form::new().part("file", part);
        let seq_text = seq.to_string();

        let request = self.client.post(&self.settings.transfer_url).query(&[
            ("method", "upload"),
            ("type", "tmpfile"),
            ("path", path),
            ("uploadid", upload_id),
            ("uploadsign", "0"),
            ("partseq", seq_text.as_str()),
        ]);
        let response = self
            .with_common_params(request)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transfer_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(transfer_err(format!("HTTP {}", response.status())));
        }

        let headers = response.headers();
        let size = headers
            .get("x-bs-file-size")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let fingerprint = headers
            .get("Content-MD5")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ChunkReceipt { size, fingerprint })
    }

    async fn finalize(
        &self,
        path: &str,
        upload_id: &str,
        total_size: u64,
        fingerprints: &[String],
    ) -> std::result::Result<(), UploadError> {
        let create_err = |detail: String| UploadError::Create {
            path: path.to_string(),
            detail,
        };

        let size = total_size.to_string();
        let target = target_dir(path);
        let block_list = block_list_json(fingerprints);
        let form = [
            ("path", path),
            ("size", size.as_str()),
            ("uploadid", upload_id),
            ("target_path", target.as_str()),
            ("block_list", block_list.as_str()),
        ];

        let request = self
            .client
            .post(self.api("create"))
            .query(&[("isdir", "0"), ("rtype", "1")]);
        let response = self
            .with_common_params(request)
            .form(&form)
            .send()
            .await
            .map_err(|e| create_err(e.to_string()))?;
        let body = response.text().await.map_err(|e| create_err(e.to_string()))?;
        let parsed: ErrnoResponse =
            serde_json::from_str(&body).map_err(|e| create_err(format!("{}: {}", e, body)))?;

        if parsed.errno != 0 {
            return Err(create_err(format!("errno {}", parsed.errno)));
        }
        Ok(())
    }
}
