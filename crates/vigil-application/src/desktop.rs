//! The single entry point for everything that touches the driven
//! application's windows.
//!
//! Every probe is bounded by the probe timeout; a probe that times out is
//! reported as a miss.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use vigil_core::capability::{
    CaptchaSolver, InputInjector, KEY_BACKSPACE, Match, OverlayHandle, Overlay, Pattern, Point,
    ProcessControl, Region, VisionProbe, WindowHandle, WindowManager,
};
use vigil_core::recovery::{Flow, restart};
use vigil_core::session::WindowContext;
use vigil_core::settings::{AlternativeOffset, Signature, TextStyle, TimingPolicy, WindowTarget};
use vigil_core::{Result, VigilError};

/// Backspaces sent before typing into a text field.
const FIELD_CLEAR_KEYS: usize = 20;

/// The capability implementations the agent drives.
#[derive(Clone)]
pub struct Capabilities {
    pub vision: Arc<dyn VisionProbe>,
    pub input: Arc<dyn InputInjector>,
    pub windows: Arc<dyn WindowManager>,
    pub overlay: Arc<dyn Overlay>,
    pub process: Arc<dyn ProcessControl>,
    pub captcha: Arc<dyn CaptchaSolver>,
}

impl Capabilities {
    /// Uses one object for all four screen-facing capabilities.
    pub fn from_screen<S>(
        screen: Arc<S>,
        process: Arc<dyn ProcessControl>,
        captcha: Arc<dyn CaptchaSolver>,
    ) -> Self
    where
        S: VisionProbe + InputInjector + WindowManager + Overlay + 'static,
    {
        Self {
            vision: screen.clone(),
            input: screen.clone(),
            windows: screen.clone(),
            overlay: screen,
            process,
            captcha,
        }
    }
}

#[derive(Clone)]
pub struct Desktop {
    caps: Capabilities,
    timing: TimingPolicy,
}

impl Desktop {
    pub fn new(caps: Capabilities, timing: TimingPolicy) -> Self {
        Self { caps, timing }
    }

    pub fn process(&self) -> &dyn ProcessControl {
        self.caps.process.as_ref()
    }

    pub fn captcha(&self) -> &dyn CaptchaSolver {
        self.caps.captcha.as_ref()
    }

    pub async fn settle(&self) {
        tokio::time::sleep(self.timing.settle()).await;
    }

    /// Runs `probe` under the probe timeout. `None` on timeout.
    async fn bounded<T, F>(&self, what: &str, probe: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.timing.probe_timeout(), probe).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                tracing::warn!("[Desktop] {} timed out, treating as miss", what);
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Vision
    // ------------------------------------------------------------------

    pub async fn find_in(&self, region: Region, signature: &Signature) -> Result<Option<Match>> {
        let found = self
            .bounded(
                signature.pattern.describe(),
                self.caps
                    .vision
                    .find(region, &signature.pattern, &signature.options),
            )
            .await?;
        Ok(found.flatten())
    }

    /// Searches the whole client area of `window`.
    pub async fn find(&self, window: &WindowContext, signature: &Signature) -> Result<Option<Match>> {
        self.find_in(Region::client(window.size), signature).await
    }

    pub async fn find_text(
        &self,
        window: &WindowContext,
        text: &str,
        style: &TextStyle,
    ) -> Result<Option<Match>> {
        let signature = Signature {
            pattern: Pattern::text(text, style.dictionary, style.color.clone()),
            options: Default::default(),
        };
        self.find(window, &signature).await
    }

    pub async fn ocr(&self, region: Region, style: &TextStyle) -> Result<Option<String>> {
        self.bounded(
            "ocr",
            self.caps.vision.ocr(region, style.dictionary, &style.color),
        )
        .await
    }

    pub async fn capture(&self, region: Region) -> Result<Vec<u8>> {
        self.bounded("capture", self.caps.vision.capture(region))
            .await?
            .ok_or_else(|| VigilError::desktop("capture timed out"))
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Clicks at `point` and parks the cursor in the corner afterwards.
    pub async fn click(&self, point: Point) -> Result<()> {
        self.caps.input.move_to(point).await?;
        self.settle().await;
        self.caps.input.click_left().await?;
        self.settle().await;
        self.caps.input.move_to(Point::ORIGIN).await
    }

    /// Clicks the match of `signature` if it is visible.
    pub async fn click_match(&self, window: &WindowContext, signature: &Signature) -> Result<bool> {
        self.click_match_in(Region::client(window.size), signature, None)
            .await
    }

    /// Like [`Desktop::click_match`] inside `region`, shifting the click point
    /// when the given alternative matched.
    pub async fn click_match_in(
        &self,
        region: Region,
        signature: &Signature,
        offset: Option<AlternativeOffset>,
    ) -> Result<bool> {
        let Some(found) = self.find_in(region, signature).await? else {
            return Ok(false);
        };
        let point = match offset {
            Some(off) if off.index == found.index => found.point.offset(off.dx, off.dy),
            _ => found.point,
        };
        self.click(point).await?;
        Ok(true)
    }

    /// Focuses the field at `point`, clears it and types `text`.
    pub async fn fill_field(&self, point: Point, text: &str) -> Result<()> {
        self.click(point).await?;
        for _ in 0..FIELD_CLEAR_KEYS {
            self.caps.input.key(KEY_BACKSPACE).await?;
        }
        self.caps.input.type_text(text).await
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.caps.input.type_text(text).await
    }

    // ------------------------------------------------------------------
    // Windows
    // ------------------------------------------------------------------

    pub async fn find_window(&self, target: &WindowTarget) -> Result<Option<WindowHandle>> {
        let found = self
            .bounded(
                &target.class,
                self.caps.windows.find(&target.class, &target.title),
            )
            .await?;
        Ok(found.flatten())
    }

    /// Brings the bound window to the front at the origin.
    pub async fn focus(&self, window: &WindowContext) -> Result<()> {
        self.caps.windows.move_to(window.handle, 0, 0).await?;
        self.caps.windows.activate(window.handle).await
    }

    /// Waits for a window of `target` to exist, then binds it.
    ///
    /// Raises `Restart` when the poll budget is spent.
    pub async fn acquire(&self, target: &WindowTarget) -> Flow<WindowContext> {
        tracing::info!("[Desktop] waiting for window {}", target.title);
        for _ in 0..self.timing.window_poll_attempts {
            if let Some(handle) = self.find_window(target).await? {
                return self.bind(handle).await;
            }
            tokio::time::sleep(self.timing.window_poll()).await;
        }
        Err(restart(format!("window {} never appeared", target.title)))
    }

    /// Moves the window to the origin and waits for a usable client area.
    pub async fn bind(&self, handle: WindowHandle) -> Flow<WindowContext> {
        for _ in 0..self.timing.window_poll_attempts {
            self.caps.windows.move_to(handle, 0, 0).await?;
            self.caps.windows.activate(handle).await?;
            let size = self
                .bounded("client_size", self.caps.windows.client_size(handle))
                .await?
                .flatten();
            match size {
                Some(size) if size.width > 0 && size.height > 0 => {
                    tracing::debug!(
                        "[Desktop] bound window {:?} ({}x{})",
                        handle,
                        size.width,
                        size.height
                    );
                    return Ok(WindowContext { handle, size });
                }
                _ => tokio::time::sleep(self.timing.window_poll()).await,
            }
        }
        Err(restart(format!("window {:?} has no client area", handle)))
    }

    // ------------------------------------------------------------------
    // Overlay
    // ------------------------------------------------------------------

    pub async fn show_overlay(&self, text: &str) -> Result<OverlayHandle> {
        self.caps.overlay.show(text).await
    }

    pub async fn close_overlay(&self, handle: OverlayHandle) -> Result<()> {
        self.caps.overlay.close(handle).await
    }
}
