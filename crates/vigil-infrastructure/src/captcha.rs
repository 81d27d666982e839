//! HTTP CAPTCHA solving service.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vigil_core::capability::CaptchaSolver;
use vigil_core::settings::CaptchaSettings;
use vigil_core::{Result, VigilError};

/// Posts base64 images to a solving service and returns its answer.
pub struct HttpCaptchaSolver {
    client: Client,
    settings: CaptchaSettings,
}

impl HttpCaptchaSolver {
    pub fn new(settings: CaptchaSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VigilError::config(format!("Failed to build captcha client: {}", e)))?;
        Ok(Self { client, settings })
    }
}

#[derive(Serialize)]
struct SolveRequest<'a> {
    username: &'a str,
    password: &'a str,
    softid: &'a str,
    image: String,
}

#[derive(Deserialize)]
struct SolveResponse {
    success: bool,
    #[serde(default)]
    data: Option<SolveData>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SolveData {
    result: String,
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    async fn solve(&self, image: &[u8]) -> Result<String> {
        let request = SolveRequest {
            username: &self.settings.username,
            password: &self.settings.password,
            softid: &self.settings.soft_id,
            image: BASE64_STANDARD.encode(image),
        };

        let response: SolveResponse = self
            .client
            .post(&self.settings.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| VigilError::transport(format!("captcha request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| VigilError::protocol(format!("captcha response: {}", e)))?;

        match (response.success, response.data) {
            (true, Some(data)) => Ok(data.result),
            _ => Err(VigilError::protocol(format!(
                "captcha service refused: {}",
                response.message
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn solver(server: &MockServer) -> HttpCaptchaSolver {
        HttpCaptchaSolver::new(CaptchaSettings {
            endpoint: server.uri(),
            username: "u".into(),
            password: "p".into(),
            soft_id: "1".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_solve_sends_base64_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"username": "u", "image": "AQID"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success":true,"code":"0","message":"","data":{"result":"x7k2","id":"1"}}"#,
            ))
            .mount(&server)
            .await;

        assert_eq!(solver(&server).solve(&[1, 2, 3]).await.unwrap(), "x7k2");
    }

    #[tokio::test]
    async fn test_refusal_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success":false,"message":"余额不足","data":null}"#,
            ))
            .mount(&server)
            .await;

        let err = solver(&server).solve(&[0]).await.unwrap_err();
        assert!(err.to_string().contains("余额不足"));
    }
}
