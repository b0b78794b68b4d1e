pub mod engine;
pub mod extract;
pub mod setup;

pub use engine::{OcrObservation, TesseractRecognizer, TextRecognizer};
pub use extract::{MatchOutcome, MatchRecord};

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

/// Turns end-of-match screenshots into match records.
///
/// The recognizer is created on first use unless one is injected. Recognizer
/// failures never escape: they produce a record of `"?"` sentinels.
pub struct OcrPipeline {
    recognizer: Mutex<Option<Arc<dyn TextRecognizer>>>,
    confidence_threshold: f32,
}

impl OcrPipeline {
    pub fn new(recognizer: Option<Arc<dyn TextRecognizer>>, confidence_threshold: f32) -> Self {
        Self {
            recognizer: Mutex::new(recognizer),
            confidence_threshold,
        }
    }

    /// Reads the result screen. Always returns a complete record.
    pub fn extract_end_screen_data(&self, img: &RgbImage) -> MatchRecord {
        match self.read_text(img) {
            Ok(observations) => {
                let record = MatchRecord::from_observations(&observations, self.confidence_threshold);
                log::info!(
                    "OCR: outcome={} ({} observation(s))",
                    record.outcome,
                    observations.len()
                );
                record
            }
            Err(e) => {
                log::error!("OCR read error: {:#}", e);
                MatchRecord::unrecognized()
            }
        }
    }

    /// Deck played in the upcoming match.
    ///
    /// Deck icons are not recognized yet, so this returns `fallback_deck_id`
    /// whether or not a pre-queue frame was captured.
    pub fn extract_deck_from_prequeue(
        &self,
        _img: Option<&RgbImage>,
        fallback_deck_id: Option<i64>,
    ) -> Option<i64> {
        log::debug!(
            "extract_deck_from_prequeue: fallback deck {:?}",
            fallback_deck_id
        );
        fallback_deck_id
    }

    fn read_text(&self, img: &RgbImage) -> Result<Vec<OcrObservation>> {
        let recognizer = self.ensure_recognizer()?;
        std::panic::catch_unwind(AssertUnwindSafe(|| recognizer.recognize(img)))
            .unwrap_or_else(|_| Err(anyhow!("recognizer panicked")))
    }

    fn ensure_recognizer(&self) -> Result<Arc<dyn TextRecognizer>> {
        let mut slot = self.recognizer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(recognizer) = slot.as_ref() {
            return Ok(recognizer.clone());
        }

        let recognizer: Arc<dyn TextRecognizer> = Arc::new(TesseractRecognizer::discover()?);
        log::info!("OCR recognizer initialized");
        *slot = Some(recognizer.clone());
        Ok(recognizer)
    }
}
