//! Desktop bridge: a helper process that owns the screen, the input driver
//! and the window APIs, spoken to over newline-delimited JSON.
//!
//! Request: `{"id": 7, "op": "find", ...params}`
//! Response: `{"id": 7, "ok": true, "value": ...}` or
//! `{"id": 7, "ok": false, "error": "..."}`
//!
//! Requests are strictly serialized: the mutex is held from write to read, so
//! only one focus/click sequence is ever in flight. A caller may give up on a
//! request (timeouts); its late reply is skipped by the next request, which
//! waits for its own id.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use vigil_core::capability::{
    InputInjector, Match, MatchOptions, Overlay, OverlayHandle, Pattern, Point, Region, Size,
    VisionProbe, WindowHandle, WindowManager,
};
use vigil_core::settings::BridgeSettings;
use vigil_core::{Result, VigilError};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to start bridge {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("bridge pipe broken: {0}")]
    Pipe(#[from] std::io::Error),

    #[error("bridge closed its output")]
    Closed,

    #[error("bad bridge reply: {0}")]
    Reply(String),

    #[error("bridge refused {op}: {message}")]
    Refused { op: String, message: String },
}

impl From<BridgeError> for VigilError {
    fn from(err: BridgeError) -> Self {
        VigilError::desktop(err.to_string())
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

struct Channel {
    writer: Writer,
    reader: Reader,
    next_id: u64,
    /// Bytes of a reply line read so far. Survives a cancelled read.
    partial: Vec<u8>,
}

impl Channel {
    async fn next_reply(&mut self) -> std::result::Result<Reply, BridgeError> {
        while self.partial.last() != Some(&b'\n') {
            if self.reader.read_until(b'\n', &mut self.partial).await? == 0 {
                return Err(BridgeError::Closed);
            }
        }
        let line = std::mem::take(&mut self.partial);
        let text = String::from_utf8_lossy(&line);
        serde_json::from_str(text.trim())
            .map_err(|e| BridgeError::Reply(format!("{}: {}", e, text.trim())))
    }
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct DesktopBridge {
    channel: Mutex<Channel>,
    // Held so the helper dies with us.
    _child: Option<Child>,
}

impl DesktopBridge {
    /// Starts the helper process described by `settings`.
    pub fn spawn(settings: &BridgeSettings) -> std::result::Result<Self, BridgeError> {
        let program = settings.program.to_string_lossy().to_string();
        tracing::info!("[Bridge] starting {}", program);

        let mut child = Command::new(&settings.program)
            .args(&settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(BridgeError::Closed)?;
        let stdout = child.stdout.take().ok_or(BridgeError::Closed)?;

        let mut bridge = Self::from_io(stdout, stdin);
        bridge._child = Some(child);
        Ok(bridge)
    }

    /// Wraps an already connected byte stream pair.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            channel: Mutex::new(Channel {
                writer: Box::new(writer),
                reader: BufReader::new(reader),
                next_id: 1,
                partial: Vec::new(),
            }),
            _child: None,
        }
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, params: Value) -> Result<T> {
        let value = self.exchange(op, params).await?;
        serde_json::from_value(value)
            .map_err(|e| BridgeError::Reply(format!("{}: {}", op, e)).into())
    }

    async fn call_unit(&self, op: &str, params: Value) -> Result<()> {
        self.exchange(op, params).await?;
        Ok(())
    }

    async fn exchange(&self, op: &str, params: Value) -> std::result::Result<Value, BridgeError> {
        let mut channel = self.channel.lock().await;
        let id = channel.next_id;
        channel.next_id += 1;

        let mut request = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        request.insert("id".into(), json!(id));
        request.insert("op".into(), json!(op));

        let mut line = serde_json::to_string(&request)
            .map_err(|e| BridgeError::Reply(e.to_string()))?;
        line.push('\n');
        channel.writer.write_all(line.as_bytes()).await?;
        channel.writer.flush().await?;

        let reply = loop {
            let reply = channel.next_reply().await?;
            match reply.id {
                Some(stale) if stale < id => {
                    tracing::debug!(
                        "[Bridge] dropping late reply {} while waiting for {}",
                        stale,
                        id
                    );
                }
                Some(other) if other != id => {
                    return Err(BridgeError::Reply(format!(
                        "expected reply {} got {}",
                        id, other
                    )));
                }
                _ => break reply,
            }
        };
        if !reply.ok {
            return Err(BridgeError::Refused {
                op: op.to_string(),
                message: reply.error.unwrap_or_default(),
            });
        }
        Ok(reply.value)
    }
}

#[async_trait]
impl VisionProbe for DesktopBridge {
    async fn find(
        &self,
        region: Region,
        pattern: &Pattern,
        options: &MatchOptions,
    ) -> Result<Option<Match>> {
        self.call(
            "find",
            json!({ "region": region, "pattern": pattern, "options": options }),
        )
        .await
    }

    async fn ocr(&self, region: Region, dictionary: u32, tolerance: &str) -> Result<String> {
        self.call(
            "ocr",
            json!({ "region": region, "dictionary": dictionary, "tolerance": tolerance }),
        )
        .await
    }

    async fn capture(&self, region: Region) -> Result<Vec<u8>> {
        let encoded: String = self.call("capture", json!({ "region": region })).await?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| VigilError::desktop(format!("capture payload: {}", e)))
    }
}

#[async_trait]
impl InputInjector for DesktopBridge {
    async fn move_to(&self, point: Point) -> Result<()> {
        self.call_unit("move_to", json!({ "x": point.x, "y": point.y }))
            .await
    }

    async fn click_left(&self) -> Result<()> {
        self.call_unit("click_left", json!({})).await
    }

    async fn click_right(&self) -> Result<()> {
        self.call_unit("click_right", json!({})).await
    }

    async fn key(&self, code: u32) -> Result<()> {
        self.call_unit("key", json!({ "code": code })).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.call_unit("type_text", json!({ "text": text })).await
    }
}

#[async_trait]
impl WindowManager for DesktopBridge {
    async fn find(&self, class: &str, title: &str) -> Result<Option<WindowHandle>> {
        self.call("find_window", json!({ "class": class, "title": title }))
            .await
    }

    async fn move_to(&self, handle: WindowHandle, x: i32, y: i32) -> Result<()> {
        self.call_unit("move_window", json!({ "handle": handle, "x": x, "y": y }))
            .await
    }

    async fn resize(&self, handle: WindowHandle, width: i32, height: i32) -> Result<()> {
        self.call_unit(
            "resize_window",
            json!({ "handle": handle, "width": width, "height": height }),
        )
        .await
    }

    async fn activate(&self, handle: WindowHandle) -> Result<()> {
        self.call_unit("activate_window", json!({ "handle": handle }))
            .await
    }

    async fn client_size(&self, handle: WindowHandle) -> Result<Option<Size>> {
        self.call("client_size", json!({ "handle": handle })).await
    }
}

#[async_trait]
impl Overlay for DesktopBridge {
    async fn show(&self, text: &str) -> Result<OverlayHandle> {
        self.call("show_overlay", json!({ "text": text })).await
    }

    async fn close(&self, handle: OverlayHandle) -> Result<()> {
        self.call_unit("close_overlay", json!({ "handle": handle }))
            .await
    }
}
