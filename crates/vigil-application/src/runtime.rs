//! Everything a handler needs while driving one session.

use crate::context::AgentContext;
use crate::desktop::{Capabilities, Desktop};
use crate::telemetry::Telemetry;
use crate::uploader::ResumableUploader;
use chrono::{DateTime, Local};
use std::sync::Arc;
use vigil_core::Result;
use vigil_core::capability::{Match, Region};
use vigil_core::controller::ControllerTransport;
use vigil_core::record::RecordStore;
use vigil_core::recovery::{Flow, restart_with};
use vigil_core::session::{Session, WindowContext};
use vigil_core::settings::{AgentSettings, Signature};
use vigil_core::status::{StatusSnapshot, label};
use vigil_core::upload::UploadApi;

/// Which screenshot is being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// First counter reading for an identity.
    Start,
    /// Goal reached.
    End,
    /// Any later counter reading.
    Progress,
}

impl Evidence {
    /// Remote path under `root` for identity `id`.
    pub fn remote_path(&self, root: &str, id: &str, now: DateTime<Local>) -> String {
        let name = match self {
            Evidence::Start => format!("start-{}.png", id),
            Evidence::End => format!("end-{}.png", id),
            Evidence::Progress => format!(
                "now-{} {}.png",
                id,
                now.format("%Y年%m月%d日 %H时%M分%S秒")
            ),
        };
        format!("{}/{}/{}", root.trim_end_matches('/'), id, name)
    }

    /// Status reported when the upload fails, if any.
    fn failure_label(&self) -> Option<&'static str> {
        match self {
            Evidence::Start => Some(label::START_EVIDENCE_FAILED),
            Evidence::End => Some(label::END_EVIDENCE_FAILED),
            Evidence::Progress => None,
        }
    }
}

pub struct AgentRuntime {
    pub settings: Arc<AgentSettings>,
    pub ctx: AgentContext,
    pub controller: Arc<dyn ControllerTransport>,
    pub telemetry: Telemetry,
    pub uploader: ResumableUploader,
    pub desktop: Desktop,
    pub session: Session,
}

impl AgentRuntime {
    pub fn new(
        settings: Arc<AgentSettings>,
        store: Arc<dyn RecordStore>,
        controller: Arc<dyn ControllerTransport>,
        upload_api: Arc<dyn UploadApi>,
        caps: Capabilities,
    ) -> Result<Self> {
        let ctx = AgentContext::load(store)?;
        let session = Session::new(ctx.record().progress());
        Ok(Self {
            telemetry: Telemetry::new(controller.clone(), settings.report.clone()),
            uploader: ResumableUploader::new(upload_api, &settings.upload),
            desktop: Desktop::new(caps, settings.timing.clone()),
            settings,
            ctx,
            controller,
            session,
        })
    }

    /// Reports `status` with the current record and progress.
    pub async fn report(&self, status: &str) -> bool {
        let snapshot = StatusSnapshot::from_record(
            self.ctx.record(),
            self.session.progress.current,
            status,
            self.settings.controller.version_id,
        );
        self.telemetry.report(&snapshot).await
    }

    /// The bound window. Losing it is a restart.
    pub fn window(&self) -> Flow<WindowContext> {
        match self.session.window {
            Some(window) => Ok(window),
            None => restart_with("no window bound"),
        }
    }

    /// Starts a fresh session from the persisted record.
    pub fn reset_session(&mut self) {
        self.session = Session::new(self.ctx.record().progress());
    }

    /// Probes `signature` and counts a hit as a heartbeat.
    pub async fn seen(&mut self, window: &WindowContext, signature: &Signature) -> Result<Option<Match>> {
        let found = self.desktop.find(window, signature).await?;
        if found.is_some() {
            self.session.clock.refresh();
        }
        Ok(found)
    }

    /// Captures the bound window and stores it. Failures are reported and
    /// never stop the loop.
    pub async fn upload_evidence(&self, kind: Evidence) -> bool {
        let Some(window) = self.session.window else {
            tracing::warn!("[Upload] no window to capture for {:?}", kind);
            return false;
        };
        let id = self.ctx.record().identity_id.clone().unwrap_or_default();
        let path = kind.remote_path(&self.settings.upload.evidence_root, &id, Local::now());

        let stored = match self.desktop.capture(Region::client(window.size)).await {
            Ok(image) => match self.uploader.upload_within(&path, &image).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!("[Upload] {}", e);
                    false
                }
            },
            Err(e) => {
                tracing::error!("[Upload] capture for {} failed: {}", path, e);
                false
            }
        };

        if !stored {
            if let Some(status) = kind.failure_label() {
                self.report(status).await;
            }
        }
        stored
    }
}
