//! In-memory doubles for every collaborator the agent talks to.
//!
//! Shared by the unit tests in this crate and the scenario tests under
//! `tests/`.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use vigil_core::capability::{
    CaptchaSolver, InputInjector, Match, MatchOptions, Overlay, OverlayHandle, Pattern, Point,
    ProcessControl, Region, Size, VisionProbe, WindowHandle, WindowManager,
};
use vigil_core::command::CommandBatch;
use vigil_core::controller::{ControllerTransport, ReleaseInfo};
use vigil_core::identity::IdentityGrant;
use vigil_core::record::{AgentRecord, RecordPatch, RecordStore};
use vigil_core::session::WindowContext;
use vigil_core::settings::WindowTarget;
use vigil_core::status::StatusSnapshot;
use vigil_core::upload::{ChunkPlan, ChunkReceipt, UploadApi, UploadError};
use vigil_core::{Result, VigilError};

use crate::desktop::Capabilities;

// ============================================================================
// Record store
// ============================================================================

#[derive(Default)]
pub struct MemoryRecordStore {
    record: Mutex<AgentRecord>,
}

impl MemoryRecordStore {
    pub fn with(record: AgentRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    pub fn snapshot(&self) -> AgentRecord {
        self.record.lock().unwrap().clone()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self) -> Result<AgentRecord> {
        Ok(self.snapshot())
    }

    fn update(&self, patch: &RecordPatch) -> Result<AgentRecord> {
        let mut record = self.record.lock().unwrap();
        patch.apply(&mut record);
        Ok(record.clone())
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Default)]
pub struct FakeController {
    status_script: Mutex<VecDeque<String>>,
    fail_status: Mutex<bool>,
    status_attempts: Mutex<u32>,
    statuses: Mutex<Vec<StatusSnapshot>>,
    batches: Mutex<VecDeque<Result<CommandBatch>>>,
    command_polls: Mutex<u32>,
    identities: Mutex<VecDeque<IdentityGrant>>,
    identity_requests: Mutex<u32>,
    release: Mutex<Option<ReleaseInfo>>,
    artifact: Mutex<Option<Vec<u8>>>,
    downloads: Mutex<u32>,
}

impl FakeController {
    pub fn fail_status_forever(&self) {
        *self.fail_status.lock().unwrap() = true;
    }

    /// Bodies returned by the next status posts; `OK` afterwards.
    pub fn script_status_bodies(&self, bodies: &[&str]) {
        let mut script = self.status_script.lock().unwrap();
        script.extend(bodies.iter().map(|b| b.to_string()));
    }

    pub fn status_attempts(&self) -> u32 {
        *self.status_attempts.lock().unwrap()
    }

    /// Snapshots the controller accepted.
    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.statuses().into_iter().map(|s| s.label).collect()
    }

    pub fn queue_batch(&self, batch: CommandBatch) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn queue_poll_failure(&self) {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(VigilError::transport("connection refused")));
    }

    pub fn command_polls(&self) -> u32 {
        *self.command_polls.lock().unwrap()
    }

    pub fn queue_identity(&self, grant: IdentityGrant) {
        self.identities.lock().unwrap().push_back(grant);
    }

    pub fn identity_requests(&self) -> u32 {
        *self.identity_requests.lock().unwrap()
    }

    pub fn publish_release(&self, release: ReleaseInfo) {
        *self.release.lock().unwrap() = Some(release);
    }

    /// Makes downloads succeed with `bytes`. Downloads fail until set.
    pub fn serve_artifact(&self, bytes: Vec<u8>) {
        *self.artifact.lock().unwrap() = Some(bytes);
    }

    pub fn downloads(&self) -> u32 {
        *self.downloads.lock().unwrap()
    }
}

#[async_trait]
impl ControllerTransport for FakeController {
    async fn post_status(&self, snapshot: &StatusSnapshot) -> Result<String> {
        *self.status_attempts.lock().unwrap() += 1;
        if *self.fail_status.lock().unwrap() {
            return Err(VigilError::transport("controller unreachable"));
        }
        let body = self
            .status_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "OK".to_string());
        if body == "OK" {
            self.statuses.lock().unwrap().push(snapshot.clone());
        }
        Ok(body)
    }

    async fn fetch_commands(&self, _machine_tag: &str) -> Result<CommandBatch> {
        *self.command_polls.lock().unwrap() += 1;
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandBatch::default()))
    }

    async fn request_identity(&self, _machine_prefix: &str) -> Result<Option<IdentityGrant>> {
        *self.identity_requests.lock().unwrap() += 1;
        Ok(self.identities.lock().unwrap().pop_front())
    }

    async fn latest_release(&self) -> Result<ReleaseInfo> {
        self.release
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VigilError::transport("no release endpoint"))
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>> {
        *self.downloads.lock().unwrap() += 1;
        self.artifact
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VigilError::transport("download failed"))
    }
}

// ============================================================================
// Upload API
// ============================================================================

#[derive(Default)]
pub struct FakeUploadApi {
    negotiate_error: Mutex<Option<String>>,
    negotiations: Mutex<Vec<(String, ChunkPlan)>>,
    /// Remaining failures per sequence number.
    flaky: Mutex<HashMap<u32, u32>>,
    stall: Mutex<bool>,
    transfers: Mutex<Vec<(u32, usize)>>,
    finalized: Mutex<Vec<(String, u64, Vec<String>)>>,
}

impl FakeUploadApi {
    pub fn refuse_negotiation(&self, detail: &str) {
        *self.negotiate_error.lock().unwrap() = Some(detail.to_string());
    }

    pub fn fail_chunk(&self, seq: u32, times: u32) {
        self.flaky.lock().unwrap().insert(seq, times);
    }

    /// Transfers never complete.
    pub fn stall_transfers(&self) {
        *self.stall.lock().unwrap() = true;
    }

    pub fn negotiations(&self) -> Vec<(String, ChunkPlan)> {
        self.negotiations.lock().unwrap().clone()
    }

    /// `(seq, len)` of every transfer attempt, failed ones included.
    pub fn transfers(&self) -> Vec<(u32, usize)> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> Vec<(String, u64, Vec<String>)> {
        self.finalized.lock().unwrap().clone()
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        self.finalized().into_iter().map(|(path, _, _)| path).collect()
    }
}

#[async_trait]
impl UploadApi for FakeUploadApi {
    async fn negotiate(&self, path: &str, plan: ChunkPlan) -> std::result::Result<String, UploadError> {
        self.negotiations
            .lock()
            .unwrap()
            .push((path.to_string(), plan));
        match self.negotiate_error.lock().unwrap().clone() {
            Some(detail) => Err(UploadError::Negotiate {
                path: path.to_string(),
                detail,
            }),
            None => Ok(format!("upload-{}", path.len())),
        }
    }

    async fn transfer(
        &self,
        path: &str,
        _upload_id: &str,
        seq: u32,
        bytes: Vec<u8>,
    ) -> std::result::Result<ChunkReceipt, UploadError> {
        self.transfers.lock().unwrap().push((seq, bytes.len()));
        if *self.stall.lock().unwrap() {
            std::future::pending::<()>().await;
        }
        let failing = {
            let mut flaky = self.flaky.lock().unwrap();
            match flaky.get_mut(&seq) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if failing {
            return Err(UploadError::Transfer {
                path: path.to_string(),
                seq,
                detail: "connection reset".to_string(),
            });
        }
        Ok(ChunkReceipt {
            size: bytes.len() as u64,
            fingerprint: format!("md5-{}", seq),
        })
    }

    async fn finalize(
        &self,
        path: &str,
        _upload_id: &str,
        total_size: u64,
        fingerprints: &[String],
    ) -> std::result::Result<(), UploadError> {
        self.finalized
            .lock()
            .unwrap()
            .push((path.to_string(), total_size, fingerprints.to_vec()));
        Ok(())
    }
}

// ============================================================================
// Screen, process and CAPTCHA
// ============================================================================

#[derive(Default)]
struct ScreenState {
    /// Visible pattern alternatives and rendered texts.
    visible: HashSet<String>,
    windows: HashMap<(String, String), u64>,
    /// Windows opened by the next `launch_target`.
    on_launch: Vec<(WindowTarget, u64)>,
    /// Alternatives shown by the next `launch_target`.
    show_on_launch: Vec<String>,
    /// Click reactions keyed by the alternative that was found last.
    reactions: HashMap<String, Reaction>,
    last_found: Option<String>,
    stall_vision: bool,
    ocr: VecDeque<String>,
    cursor: Option<Point>,
    clicks: Vec<Point>,
    keys: Vec<u32>,
    typed: Vec<String>,
    overlays: Vec<String>,
    closed_overlays: Vec<OverlayHandle>,
    terminations: u32,
    launches: Vec<String>,
    agent_launches: Vec<PathBuf>,
    solved: u32,
}

#[derive(Default, Clone)]
struct Reaction {
    show: Vec<String>,
    hide: Vec<String>,
    open: Vec<(WindowTarget, u64)>,
}

/// A scripted stand-in for the driven application's screen.
///
/// Every visible alternative is found at [`FakeScreen::HIT`]. Clicking right
/// after a successful find can trigger a reaction registered with
/// [`FakeScreen::on_click`].
#[derive(Default)]
pub struct FakeScreen {
    state: Mutex<ScreenState>,
}

impl FakeScreen {
    pub const HIT: Point = Point { x: 100, y: 200 };
    pub const SIZE: Size = Size {
        width: 1280,
        height: 720,
    };
    pub const CAPTCHA_ANSWER: &'static str = "x7k2";

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::from_screen(self.clone(), self.clone(), self.clone())
    }

    pub fn window_context(&self, handle: u64) -> WindowContext {
        WindowContext {
            handle: WindowHandle(handle),
            size: Self::SIZE,
        }
    }

    pub fn show(&self, alternative: &str) {
        self.state
            .lock()
            .unwrap()
            .visible
            .insert(alternative.to_string());
    }

    pub fn hide(&self, alternative: &str) {
        self.state.lock().unwrap().visible.remove(alternative);
    }

    pub fn open_window(&self, target: &WindowTarget, handle: u64) {
        self.state
            .lock()
            .unwrap()
            .windows
            .insert((target.class.clone(), target.title.clone()), handle);
    }

    pub fn close_window(&self, target: &WindowTarget) {
        self.state
            .lock()
            .unwrap()
            .windows
            .remove(&(target.class.clone(), target.title.clone()));
    }

    /// Every launch of the driven application opens `target`.
    pub fn open_on_launch(&self, target: &WindowTarget, handle: u64) {
        self.state
            .lock()
            .unwrap()
            .on_launch
            .push((target.clone(), handle));
    }

    /// Every launch of the driven application shows `alternative`.
    pub fn show_on_launch(&self, alternative: &str) {
        self.state
            .lock()
            .unwrap()
            .show_on_launch
            .push(alternative.to_string());
    }

    /// Clicking `alternative` hides and shows the given alternatives.
    pub fn on_click(&self, alternative: &str, show: &[&str], hide: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let reaction = state.reactions.entry(alternative.to_string()).or_default();
        reaction.show.extend(show.iter().map(|s| s.to_string()));
        reaction.hide.extend(hide.iter().map(|s| s.to_string()));
    }

    /// Clicking `alternative` opens a window.
    pub fn on_click_open(&self, alternative: &str, target: &WindowTarget, handle: u64) {
        let mut state = self.state.lock().unwrap();
        let reaction = state.reactions.entry(alternative.to_string()).or_default();
        reaction.open.push((target.clone(), handle));
    }

    pub fn queue_ocr(&self, text: &str) {
        self.state
            .lock()
            .unwrap()
            .ocr
            .push_back(text.to_string());
    }

    /// Vision calls never return.
    pub fn stall_vision(&self) {
        self.state.lock().unwrap().stall_vision = true;
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn keys(&self) -> Vec<u32> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn overlays(&self) -> Vec<String> {
        self.state.lock().unwrap().overlays.clone()
    }

    pub fn closed_overlays(&self) -> Vec<OverlayHandle> {
        self.state.lock().unwrap().closed_overlays.clone()
    }

    pub fn terminations(&self) -> u32 {
        self.state.lock().unwrap().terminations
    }

    pub fn launches(&self) -> Vec<String> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn agent_launches(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().agent_launches.clone()
    }

    pub fn captchas_solved(&self) -> u32 {
        self.state.lock().unwrap().solved
    }

    fn stalled(&self) -> bool {
        self.state.lock().unwrap().stall_vision
    }
}

fn alternatives(pattern: &Pattern) -> Vec<&str> {
    match pattern {
        Pattern::Template { reference } | Pattern::Color { reference } => {
            reference.split('|').collect()
        }
        Pattern::Text { text, .. } => vec![text.as_str()],
    }
}

#[async_trait]
impl VisionProbe for FakeScreen {
    async fn find(
        &self,
        _region: Region,
        pattern: &Pattern,
        _options: &MatchOptions,
    ) -> Result<Option<Match>> {
        if self.stalled() {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        let hit = alternatives(pattern)
            .into_iter()
            .enumerate()
            .find(|(_, alt)| state.visible.contains(*alt))
            .map(|(index, alt)| (index, alt.to_string()));
        Ok(hit.map(|(index, alt)| {
            state.last_found = Some(alt);
            Match {
                index,
                point: Self::HIT,
            }
        }))
    }

    async fn ocr(&self, _region: Region, _dictionary: u32, _tolerance: &str) -> Result<String> {
        if self.stalled() {
            std::future::pending::<()>().await;
        }
        Ok(self.state.lock().unwrap().ocr.pop_front().unwrap_or_default())
    }

    async fn capture(&self, _region: Region) -> Result<Vec<u8>> {
        Ok(b"\x89PNG fake".to_vec())
    }
}

#[async_trait]
impl InputInjector for FakeScreen {
    async fn move_to(&self, point: Point) -> Result<()> {
        self.state.lock().unwrap().cursor = Some(point);
        Ok(())
    }

    async fn click_left(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let at = state.cursor.unwrap_or(Point::ORIGIN);
        state.clicks.push(at);
        if let Some(found) = state.last_found.take() {
            if let Some(reaction) = state.reactions.get(&found).cloned() {
                for alt in reaction.hide {
                    state.visible.remove(&alt);
                }
                for alt in reaction.show {
                    state.visible.insert(alt);
                }
                for (target, handle) in reaction.open {
                    state.windows.insert((target.class, target.title), handle);
                }
            }
        }
        Ok(())
    }

    async fn click_right(&self) -> Result<()> {
        Ok(())
    }

    async fn key(&self, code: u32) -> Result<()> {
        self.state.lock().unwrap().keys.push(code);
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.state.lock().unwrap().typed.push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl WindowManager for FakeScreen {
    async fn find(&self, class: &str, title: &str) -> Result<Option<WindowHandle>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .windows
            .get(&(class.to_string(), title.to_string()))
            .copied()
            .map(WindowHandle))
    }

    async fn move_to(&self, _handle: WindowHandle, _x: i32, _y: i32) -> Result<()> {
        Ok(())
    }

    async fn resize(&self, _handle: WindowHandle, _width: i32, _height: i32) -> Result<()> {
        Ok(())
    }

    async fn activate(&self, _handle: WindowHandle) -> Result<()> {
        Ok(())
    }

    async fn client_size(&self, _handle: WindowHandle) -> Result<Option<Size>> {
        Ok(Some(Self::SIZE))
    }
}

#[async_trait]
impl Overlay for FakeScreen {
    async fn show(&self, text: &str) -> Result<OverlayHandle> {
        let mut state = self.state.lock().unwrap();
        state.overlays.push(text.to_string());
        Ok(OverlayHandle(state.overlays.len() as u64))
    }

    async fn close(&self, handle: OverlayHandle) -> Result<()> {
        self.state.lock().unwrap().closed_overlays.push(handle);
        Ok(())
    }
}

#[async_trait]
impl ProcessControl for FakeScreen {
    async fn terminate_target(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.terminations += 1;
        state.windows.clear();
        Ok(())
    }

    async fn launch_target(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.launches.push(path.to_string());
        for (target, handle) in state.on_launch.clone() {
            state.windows.insert((target.class, target.title), handle);
        }
        for alt in state.show_on_launch.clone() {
            state.visible.insert(alt);
        }
        Ok(())
    }

    async fn launch_agent(&self, path: &Path) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .agent_launches
            .push(path.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl CaptchaSolver for FakeScreen {
    async fn solve(&self, _image: &[u8]) -> Result<String> {
        self.state.lock().unwrap().solved += 1;
        Ok(Self::CAPTCHA_ANSWER.to_string())
    }
}
