//! Reference matching by mean squared error.
//!
//! A frame "is" a state when its MSE against that state's calibrated reference
//! falls below the threshold. The candidate is resized to the reference's
//! dimensions first, so calibration and live capture may differ in size.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::{ReferenceState, ReferenceStore, StateDetector};

/// Default MSE threshold on a 0-255 per-channel scale.
pub const DEFAULT_MSE_THRESHOLD: f64 = 2000.0;

pub struct MseDetector {
    references: ReferenceStore,
    threshold: f64,
}

impl MseDetector {
    pub fn new(references: ReferenceStore, threshold: f64) -> Self {
        Self {
            references,
            threshold,
        }
    }

    /// Records `img` as the reference for `state_name`.
    ///
    /// Returns false for an unknown state name (nothing is written) or when the
    /// image cannot be persisted.
    pub fn calibrate(&self, state_name: &str, img: &RgbImage) -> bool {
        let Some(state) = ReferenceState::from_name(state_name) else {
            log::warn!("calibrate: unknown state '{}'", state_name);
            return false;
        };

        match self.references.save(state, img) {
            Ok(()) => {
                log::info!(
                    "Calibrated {} ({}x{}) -> {}",
                    state,
                    img.width(),
                    img.height(),
                    self.references.path_for(state).display()
                );
                true
            }
            Err(e) => {
                log::error!("calibrate {}: {:#}", state, e);
                false
            }
        }
    }

    /// True iff a persisted reference exists for `state_name`.
    pub fn is_calibrated(&self, state_name: &str) -> bool {
        ReferenceState::from_name(state_name)
            .map(|state| self.references.exists(state))
            .unwrap_or(false)
    }

    /// Calibration flag for every reference state, in table order.
    pub fn calibration_status(&self) -> [(ReferenceState, bool); 3] {
        ReferenceState::ALL.map(|state| (state, self.references.exists(state)))
    }

    /// Distance between `img` and the reference for `state`.
    ///
    /// Infinite when the state is uncalibrated or the comparison cannot be made.
    pub fn distance(&self, state: ReferenceState, img: &RgbImage) -> f64 {
        let Some(reference) = self.references.load(state) else {
            return f64::INFINITY;
        };
        if img.width() == 0 || img.height() == 0 {
            return f64::INFINITY;
        }

        let (width, height) = reference.dimensions();
        let mse = if img.dimensions() == (width, height) {
            mean_squared_error(&reference, img)
        } else {
            let resized = imageops::resize(img, width, height, FilterType::Triangle);
            mean_squared_error(&reference, &resized)
        };

        if mse.is_finite() { mse } else { f64::INFINITY }
    }

    /// True iff `img` is within the threshold of the reference for `state`.
    /// Uncalibrated states never match.
    pub fn classify(&self, state: ReferenceState, img: &RgbImage) -> bool {
        let distance = self.distance(state, img);
        log::debug!("classify {}: mse={:.1}", state, distance);
        distance < self.threshold
    }
}

impl StateDetector for MseDetector {
    fn is_pre_queue_ranked(&self, img: &RgbImage) -> Result<bool> {
        Ok(self.classify(ReferenceState::PreQueue, img))
    }

    fn is_in_combat(&self, img: &RgbImage) -> Result<bool> {
        Ok(self.classify(ReferenceState::InCombat, img))
    }

    fn is_end_screen(&self, img: &RgbImage) -> Result<bool> {
        Ok(self.classify(ReferenceState::EndScreen, img))
    }
}

/// Mean of squared per-channel differences over R, G and B.
///
/// Images must share dimensions; mismatched or empty images give infinity.
pub fn mean_squared_error(a: &RgbImage, b: &RgbImage) -> f64 {
    if a.dimensions() != b.dimensions() || a.width() == 0 || a.height() == 0 {
        return f64::INFINITY;
    }

    let total: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();

    total / a.as_raw().len() as f64
}
