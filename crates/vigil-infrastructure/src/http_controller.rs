//! reqwest implementation of [`ControllerTransport`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use vigil_core::command::{CommandBatch, RawCommand};
use vigil_core::controller::{ControllerTransport, ReleaseInfo};
use vigil_core::identity::{Identity, IdentityGrant};
use vigil_core::settings::ControllerSettings;
use vigil_core::status::StatusSnapshot;
use vigil_core::{Result, VigilError};

const NO_COMMANDS: &str = "无命令";
const NO_IDENTITY: &str = "无账号";

/// Talks to the controller's form/JSON endpoints under one base URL.
#[derive(Clone)]
pub struct HttpController {
    client: Client,
    base_url: String,
}

impl HttpController {
    pub fn new(settings: &ControllerSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| VigilError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    async fn post_form_text<F: serde::Serialize + ?Sized>(
        &self,
        name: &str,
        form: &F,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint(name))
            .form(form)
            .send()
            .await
            .map_err(|e| VigilError::transport(format!("{} request failed: {}", name, e)))?;
        response
            .text()
            .await
            .map_err(|e| VigilError::transport(format!("{} body unreadable: {}", name, e)))
    }
}

#[async_trait]
impl ControllerTransport for HttpController {
    async fn post_status(&self, snapshot: &StatusSnapshot) -> Result<String> {
        self.post_form_text("get_machine_info_from_vm", snapshot)
            .await
    }

    async fn fetch_commands(&self, machine_tag: &str) -> Result<CommandBatch> {
        let body = self
            .post_form_text("get_command", &[("machine_name", machine_tag)])
            .await?;
        let envelope: Envelope<CommandsData> = serde_json::from_str(&body)
            .map_err(|e| VigilError::protocol(format!("get_command: {} in {:?}", e, body)))?;
        match envelope.data {
            CommandsData::Message(message) => {
                if message != NO_COMMANDS {
                    tracing::debug!("[Controller] get_command said {:?}", message);
                }
                Ok(CommandBatch::default())
            }
            CommandsData::Commands(commands) => Ok(CommandBatch::new(commands)),
        }
    }

    async fn request_identity(&self, machine_prefix: &str) -> Result<Option<IdentityGrant>> {
        let body = self
            .post_form_text("get_qq", &[("machine-pre", machine_prefix)])
            .await?;
        let envelope: Envelope<IdentityData> = serde_json::from_str(&body)
            .map_err(|e| VigilError::protocol(format!("get_qq: {} in {:?}", e, body)))?;
        match envelope.data {
            IdentityData::Message(message) => {
                if message != NO_IDENTITY {
                    tracing::warn!("[Controller] get_qq said {:?}", message);
                }
                Ok(None)
            }
            IdentityData::Grant(payload) => payload.into_grant().map(Some),
        }
    }

    async fn latest_release(&self) -> Result<ReleaseInfo> {
        let response = self
            .client
            .get(self.endpoint("get_version"))
            .send()
            .await
            .map_err(|e| VigilError::transport(format!("get_version request failed: {}", e)))?;
        let payload: ReleasePayload = response
            .json()
            .await
            .map_err(|e| VigilError::protocol(format!("get_version: {}", e)))?;
        let raw = number_field(&payload.version_id, "version_id")?;
        let version_id = u64::try_from(raw)
            .map_err(|_| VigilError::protocol(format!("version_id is negative: {}", raw)))?;
        Ok(ReleaseInfo {
            version_id,
            url: payload.url,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VigilError::transport(format!("download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(VigilError::transport(format!(
                "download returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VigilError::transport(format!("download interrupted: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandsData {
    Message(String),
    Commands(Vec<RawCommand>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityData {
    Message(String),
    Grant(IdentityPayload),
}

#[derive(Deserialize)]
struct IdentityPayload {
    qq_number: Value,
    qq_pwd: Value,
    area: String,
    need: Value,
    #[serde(default)]
    from: Value,
}

impl IdentityPayload {
    fn into_grant(self) -> Result<IdentityGrant> {
        Ok(IdentityGrant {
            identity: Identity {
                id: text_field(&self.qq_number),
                secret: text_field(&self.qq_pwd),
                region: self.area,
                origin: text_field(&self.from),
            },
            required_delta: number_field(&self.need, "need")?,
        })
    }
}

#[derive(Deserialize)]
struct ReleasePayload {
    version_id: Value,
    url: String,
}

fn text_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accepts both `300` and `"300"`; the controller is not consistent.
fn number_field(value: &Value, name: &str) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| VigilError::protocol(format!("{} is not an integer", name))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| VigilError::protocol(format!("{} is not a number: {:?}", name, s))),
        other => Err(VigilError::protocol(format!("{} has type {}", name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::record::AgentRecord;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn controller(server: &MockServer) -> HttpController {
        HttpController::new(&ControllerSettings {
            base_url: format!("{}/", server.uri()),
            ..ControllerSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_post_status_sends_form_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_machine_info_from_vm"))
            .and(body_string_contains("machine_name=rack1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let record = AgentRecord {
            machine_tag: "rack1".into(),
            ..AgentRecord::default()
        };
        let snapshot = StatusSnapshot::from_record(&record, None, "登录阶段", 5);
        let body = controller(&server).await.post_status(&snapshot).await.unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_no_commands_is_empty_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_command"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":"无命令"}"#))
            .mount(&server)
            .await;

        let batch = controller(&server).await.fetch_commands("m").await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_commands_keep_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_command"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data":[{"command":"new_pwd","data":{"pwd":"a"}},{"command":"close_qq"}]}"#,
            ))
            .mount(&server)
            .await;

        let batch = controller(&server).await.fetch_commands("m").await.unwrap();
        let kinds: Vec<_> = batch.commands.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(kinds, vec!["new_pwd", "close_qq"]);
    }

    #[tokio::test]
    async fn test_identity_grant_with_mixed_types() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_qq"))
            .and(body_string_contains("machine-pre=rack1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data":{"qq_number":123456,"qq_pwd":"pw","area":"艾欧尼亚","need":"300","from":"ops"}}"#,
            ))
            .mount(&server)
            .await;

        let grant = controller(&server)
            .await
            .request_identity("rack1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.identity.id, "123456");
        assert_eq!(grant.required_delta, 300);
        assert_eq!(grant.identity.origin, "ops");
    }

    #[tokio::test]
    async fn test_identity_pool_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_qq"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":"无账号"}"#))
            .mount(&server)
            .await;

        assert!(controller(&server).await.request_identity("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_version"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"version_id":"7","url":"http://x/7.exe"}"#),
            )
            .mount(&server)
            .await;

        let release = controller(&server).await.latest_release().await.unwrap();
        assert_eq!(release.version_id, 7);
        assert_eq!(release.url, "http://x/7.exe");
    }

    #[tokio::test]
    async fn test_negative_release_version_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_version"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"version_id":-1,"url":"http://x/bad.exe"}"#),
            )
            .mount(&server)
            .await;

        let err = controller(&server).await.latest_release().await.unwrap_err();
        assert!(matches!(err, VigilError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_garbage_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_command"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = controller(&server).await.fetch_commands("m").await.unwrap_err();
        assert!(matches!(err, VigilError::Protocol(_)));
    }
}
