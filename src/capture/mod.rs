//! Screen capture for the emulator window.
//!
//! This module provides:
//! - Window presence probing (`is_emulator_window_present`)
//! - Screen-region capture (`capture_region`)
//! - The `ScreenSource` seam consumed by the polling loop and the tracker

pub mod screenshot;
pub mod window;

use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use screenshot::capture_region;
pub use window::is_emulator_window_present;

/// A rectangle in absolute screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Source of frames and window presence.
///
/// Neither method may fail loudly: a missing frame is `None`, a missing window is `false`.
pub trait ScreenSource: Send + Sync {
    /// Cheap existence probe of the emulator window.
    fn window_exists(&self) -> bool;

    /// Best-effort single screenshot of `region`.
    fn capture_frame(&self, region: &CaptureRegion) -> Option<RgbImage>;
}

/// The real desktop, probed by window title.
pub struct DesktopScreen {
    window_title: String,
}

impl DesktopScreen {
    pub fn new(window_title: impl Into<String>) -> Self {
        Self {
            window_title: window_title.into(),
        }
    }
}

impl ScreenSource for DesktopScreen {
    fn window_exists(&self) -> bool {
        is_emulator_window_present(&self.window_title)
    }

    fn capture_frame(&self, region: &CaptureRegion) -> Option<RgbImage> {
        match capture_region(region) {
            Ok(img) => Some(img),
            Err(e) => {
                log::debug!("capture_frame: {:#}", e);
                None
            }
        }
    }
}
