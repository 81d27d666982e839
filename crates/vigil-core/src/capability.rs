//! Capability interfaces consumed by the agent.
//!
//! The agent never talks to the screen, the input driver or the operating
//! system directly. Everything goes through these narrow traits so that the
//! control loop can be driven by a real desktop bridge or by test doubles.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Virtual key code for backspace.
pub const KEY_BACKSPACE: u32 = 8;

/// A point in window client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns this point shifted by the given offsets.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Width and height of a window client area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

/// A rectangular search region, inclusive of `left`/`top`, exclusive of
/// `right`/`bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Region {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// The whole client area of a window of the given size.
    pub fn client(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Extends the bottom edge. Some dialogs render below the reported client
    /// area.
    pub fn grow_down(self, extra: i32) -> Self {
        Self {
            bottom: self.bottom + extra,
            ..self
        }
    }

    /// A region of `width` x `height` anchored at `origin`.
    pub fn around(origin: Point, width: i32, height: i32) -> Self {
        Self::new(origin.x, origin.y, origin.x + width, origin.y + height)
    }
}

/// An opaque reference to something the vision engine can search for.
///
/// Template and color references may hold several alternatives separated by
/// `|`; the engine reports which alternative matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    /// One or more template images, e.g. `img/play.bmp|img/room.bmp`.
    Template { reference: String },
    /// One or more color specs, e.g. `59fefe-000000|a4a7a4-000000`.
    Color { reference: String },
    /// A string rendered with a glyph dictionary.
    Text {
        text: String,
        dictionary: u32,
        color: String,
    },
}

impl Pattern {
    pub fn template(reference: impl Into<String>) -> Self {
        Self::Template {
            reference: reference.into(),
        }
    }

    pub fn color(reference: impl Into<String>) -> Self {
        Self::Color {
            reference: reference.into(),
        }
    }

    pub fn text(text: impl Into<String>, dictionary: u32, color: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            dictionary,
            color: color.into(),
        }
    }

    /// Human-readable reference used in log lines.
    pub fn describe(&self) -> &str {
        match self {
            Pattern::Template { reference } | Pattern::Color { reference } => reference,
            Pattern::Text { text, .. } => text,
        }
    }
}

/// Matching tolerance handed to the vision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Per-channel color delta, e.g. `000000`.
    pub tolerance: String,
    /// Similarity threshold in `0.0..=1.0`.
    pub precision: f32,
}

impl MatchOptions {
    pub fn exact() -> Self {
        Self {
            tolerance: "000000".to_string(),
            precision: 1.0,
        }
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            tolerance: "000000".to_string(),
            precision: 0.9,
        }
    }
}

/// A successful vision match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Index of the alternative that matched (0 for single patterns).
    pub index: usize,
    pub point: Point,
}

/// Opaque native window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

/// Opaque handle to an on-screen overlay created by [`Overlay::show`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayHandle(pub u64);

/// Locates patterns and reads text inside the bound window.
#[async_trait]
pub trait VisionProbe: Send + Sync {
    /// Searches `region` for `pattern`. `Ok(None)` is an ordinary miss.
    async fn find(
        &self,
        region: Region,
        pattern: &Pattern,
        options: &MatchOptions,
    ) -> Result<Option<Match>>;

    /// Recognizes text in `region` with the given glyph dictionary.
    async fn ocr(&self, region: Region, dictionary: u32, tolerance: &str) -> Result<String>;

    /// Captures `region` as an encoded PNG image.
    async fn capture(&self, region: Region) -> Result<Vec<u8>>;
}

/// Injects mouse and keyboard input.
#[async_trait]
pub trait InputInjector: Send + Sync {
    async fn move_to(&self, point: Point) -> Result<()>;
    async fn click_left(&self) -> Result<()>;
    async fn click_right(&self) -> Result<()>;
    async fn key(&self, code: u32) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
}

/// Finds and arranges top-level windows.
#[async_trait]
pub trait WindowManager: Send + Sync {
    async fn find(&self, class: &str, title: &str) -> Result<Option<WindowHandle>>;
    async fn move_to(&self, handle: WindowHandle, x: i32, y: i32) -> Result<()>;
    async fn resize(&self, handle: WindowHandle, width: i32, height: i32) -> Result<()>;
    async fn activate(&self, handle: WindowHandle) -> Result<()>;
    /// `Ok(None)` when the window exists but has no usable client area yet.
    async fn client_size(&self, handle: WindowHandle) -> Result<Option<Size>>;
}

/// Draws and removes banner overlays.
#[async_trait]
pub trait Overlay: Send + Sync {
    async fn show(&self, text: &str) -> Result<OverlayHandle>;
    async fn close(&self, handle: OverlayHandle) -> Result<()>;
}

/// Operating-system process management.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Kills every process belonging to the driven application.
    async fn terminate_target(&self) -> Result<()>;
    /// Starts the driven application from `path`.
    async fn launch_target(&self, path: &str) -> Result<()>;
    /// Starts a replacement agent binary.
    async fn launch_agent(&self, path: &std::path::Path) -> Result<()>;
}

/// Opaque CAPTCHA solving service.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_helpers() {
        let size = Size {
            width: 1280,
            height: 720,
        };
        assert_eq!(Region::client(size), Region::new(0, 0, 1280, 720));
        assert_eq!(Region::client(size).grow_down(150).bottom, 870);
        assert_eq!(
            Region::around(Point::new(10, 20), 55, 60),
            Region::new(10, 20, 65, 80)
        );
    }

    #[test]
    fn test_pattern_wire_shape() {
        let json = serde_json::to_value(Pattern::template("img/play.bmp|img/room.bmp")).unwrap();
        assert_eq!(json["kind"], "template");
        assert_eq!(json["reference"], "img/play.bmp|img/room.bmp");
    }
}
