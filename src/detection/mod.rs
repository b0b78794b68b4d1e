//! Visual game-state detection.
//!
//! This module provides:
//! - The combat state machine states (`CombatState`)
//! - Calibration reference storage (`ReferenceStore`)
//! - Reference-image matching by mean squared error (`MseDetector`)

pub mod mse;
pub mod reference;

use anyhow::Result;
use image::RgbImage;

pub use mse::MseDetector;
pub use reference::ReferenceStore;

/// Phase of a match currently displayed by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombatState {
    /// Anywhere outside a ranked match flow
    Idle,
    /// Ranked queue screen, before the match starts
    PreQueue,
    /// Match in progress
    InCombat,
    /// Win/lose result screen
    EndScreen,
}

impl CombatState {
    pub const ALL: [CombatState; 4] = [
        CombatState::Idle,
        CombatState::PreQueue,
        CombatState::InCombat,
        CombatState::EndScreen,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CombatState::Idle => "idle",
            CombatState::PreQueue => "pre_queue",
            CombatState::InCombat => "in_combat",
            CombatState::EndScreen => "end_screen",
        }
    }
}

impl std::fmt::Display for CombatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// States that have a calibrated reference image. `Idle` never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceState {
    PreQueue,
    InCombat,
    EndScreen,
}

impl ReferenceState {
    pub const ALL: [ReferenceState; 3] = [
        ReferenceState::PreQueue,
        ReferenceState::InCombat,
        ReferenceState::EndScreen,
    ];

    /// Stable name used for reference file names and calibration commands.
    pub fn name(&self) -> &'static str {
        match self {
            ReferenceState::PreQueue => "pre_queue",
            ReferenceState::InCombat => "in_combat",
            ReferenceState::EndScreen => "end_screen",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.name() == name)
    }
}

impl std::fmt::Display for ReferenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame predicates consumed by the polling loop.
///
/// An `Err` means the detector itself failed on this frame; the caller skips the
/// tick without changing state.
pub trait StateDetector: Send + Sync {
    fn is_pre_queue_ranked(&self, img: &RgbImage) -> Result<bool>;
    fn is_in_combat(&self, img: &RgbImage) -> Result<bool>;
    fn is_end_screen(&self, img: &RgbImage) -> Result<bool>;
}
