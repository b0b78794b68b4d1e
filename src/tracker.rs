//! Ties the polling loop to capture, OCR and the match store.
//!
//! Entering `PreQueue` keeps a frame for deck resolution. Entering `EndScreen`
//! reads the result screen and commits one match. All of it runs on the polling
//! thread inside `on_state_changed`.

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::capture::{CaptureRegion, ScreenSource};
use crate::config::{self, SharedConfig};
use crate::detection::{CombatState, MseDetector, ReferenceState};
use crate::ocr::OcrPipeline;
use crate::polling::{Callbacks, PollingLoop};
use crate::store::{SharedStore, StoredMatch};

/// Snapshot for the `status` command.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub window_present: bool,
    pub state: CombatState,
    pub region_configured: bool,
    pub calibration: [(ReferenceState, bool); 3],
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "window: {}",
            if self.window_present { "found" } else { "not found" }
        )?;
        writeln!(f, "state: {}", self.state)?;
        writeln!(
            f,
            "region: {}",
            if self.region_configured { "configured" } else { "not set" }
        )?;
        let calibration: Vec<String> = self
            .calibration
            .iter()
            .map(|(state, ok)| format!("{}={}", state, if *ok { "ok" } else { "missing" }))
            .collect();
        write!(f, "calibration: {}", calibration.join(" "))
    }
}

pub struct MatchTracker {
    config: SharedConfig,
    screen: Arc<dyn ScreenSource>,
    detector: Arc<MseDetector>,
    ocr: Arc<OcrPipeline>,
    store: SharedStore,
    prequeue_frame: Mutex<Option<RgbImage>>,
}

impl MatchTracker {
    pub fn new(
        config: SharedConfig,
        screen: Arc<dyn ScreenSource>,
        detector: Arc<MseDetector>,
        ocr: Arc<OcrPipeline>,
        store: SharedStore,
    ) -> Self {
        Self {
            config,
            screen,
            detector,
            ocr,
            store,
            prequeue_frame: Mutex::new(None),
        }
    }

    pub fn detector(&self) -> Arc<MseDetector> {
        self.detector.clone()
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Registers this tracker as the polling loop's observer.
    pub fn install(self: &Arc<Self>, polling: &PollingLoop) {
        let on_lost = Arc::clone(self);
        let on_changed = Arc::clone(self);
        polling.set_callbacks(Callbacks {
            on_window_found: Some(Arc::new(|| log::debug!("Tracker: window available"))),
            on_window_lost: Some(Arc::new(move || on_lost.on_window_lost())),
            on_state_changed: Some(Arc::new(move |prev, next| {
                on_changed.on_state_changed(prev, next)
            })),
        });
    }

    fn on_window_lost(&self) {
        // A match interrupted by the window closing is not recorded
        if self.lock_prequeue().take().is_some() {
            log::debug!("Tracker: dropped pre-queue frame");
        }
    }

    fn capture_region(&self) -> Option<CaptureRegion> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .capture_region
    }

    pub fn on_state_changed(&self, prev: CombatState, next: CombatState) {
        let Some(region) = self.capture_region() else {
            log::debug!("Tracker: {} -> {} ignored, no capture region", prev, next);
            return;
        };

        match next {
            CombatState::PreQueue => {
                let frame = self.screen.capture_frame(&region);
                if frame.is_none() {
                    log::warn!("Pre-queue capture failed, deck falls back to active deck");
                }
                *self.lock_prequeue() = frame;
            }
            CombatState::EndScreen => {
                self.record_match(&region);
            }
            CombatState::Idle | CombatState::InCombat => {}
        }
    }

    /// Reads the end screen and commits the match. Returns the stored row.
    fn record_match(&self, region: &CaptureRegion) -> Option<StoredMatch> {
        let Some(end_frame) = self.screen.capture_frame(region) else {
            log::warn!("End screen capture failed, match not recorded");
            return None;
        };

        let cfg = config::snapshot(&self.config);
        let prequeue = self.lock_prequeue().take();

        let deck_id = self
            .ocr
            .extract_deck_from_prequeue(prequeue.as_ref(), cfg.active_deck_id);
        let mut record = self.ocr.extract_end_screen_data(&end_frame);
        record.deck_id = deck_id;

        // Only the commit runs under the store lock
        let saved = {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.save_match(&record, cfg.active_season.as_deref())
        };

        match saved {
            Ok(stored) => {
                log::info!(
                    "Match recorded: id={} result={} deck={:?} season={:?}",
                    stored.id,
                    stored.outcome,
                    stored.deck_id,
                    stored.season
                );
                Some(stored)
            }
            Err(e) => {
                log::error!("Failed to save match: {:#}", e);
                None
            }
        }
    }

    /// Captures the current frame as the reference for `state_name`.
    pub fn calibrate(&self, state_name: &str) -> Result<()> {
        if ReferenceState::from_name(state_name).is_none() {
            bail!(
                "Unknown state '{}' (expected pre_queue, in_combat or end_screen)",
                state_name
            );
        }
        let region = self
            .capture_region()
            .ok_or_else(|| anyhow!("No capture region configured"))?;
        let frame = self
            .screen
            .capture_frame(&region)
            .ok_or_else(|| anyhow!("Screen capture failed"))?;

        if !self.detector.calibrate(state_name, &frame) {
            bail!("Failed to save reference for '{}'", state_name);
        }
        Ok(())
    }

    /// Saves one frame of the configured region as PNG, for checking the region
    /// before calibrating. Returns the frame dimensions.
    pub fn capture_test_frame(&self, path: &Path) -> Result<(u32, u32)> {
        let region = self
            .capture_region()
            .ok_or_else(|| anyhow!("No capture region configured"))?;
        let frame = self
            .screen
            .capture_frame(&region)
            .ok_or_else(|| anyhow!("Screen capture failed"))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        frame
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        log::info!("Test frame saved to {}", path.display());
        Ok(frame.dimensions())
    }

    pub fn status(&self, polling: &PollingLoop) -> TrackerStatus {
        TrackerStatus {
            window_present: polling.window_present(),
            state: polling.state(),
            region_configured: self.capture_region().is_some(),
            calibration: self.detector.calibration_status(),
        }
    }

    fn lock_prequeue(&self) -> std::sync::MutexGuard<'_, Option<RgbImage>> {
        self.prequeue_frame.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::detection::{ReferenceStore, StateDetector};
    use crate::ocr::{MatchOutcome, OcrObservation, TextRecognizer};
    use crate::store::MatchStore;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, OnceLock};
    use std::thread;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct FakeScreen {
        frame: Mutex<Option<RgbImage>>,
        captures: AtomicUsize,
    }

    impl FakeScreen {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frame: Mutex::new(Some(solid(0))),
                captures: AtomicUsize::new(0),
            })
        }

        fn show(&self, frame: Option<RgbImage>) {
            *self.frame.lock().unwrap() = frame;
        }
    }

    impl ScreenSource for FakeScreen {
        fn window_exists(&self) -> bool {
            true
        }

        fn capture_frame(&self, _region: &CaptureRegion) -> Option<RgbImage> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            self.frame.lock().unwrap().clone()
        }
    }

    struct FakeRecognizer {
        observations: Option<Vec<OcrObservation>>,
    }

    impl TextRecognizer for FakeRecognizer {
        fn recognize(&self, _img: &RgbImage) -> Result<Vec<OcrObservation>> {
            self.observations
                .clone()
                .ok_or_else(|| anyhow!("backend crashed"))
        }
    }

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([value, value, value]))
    }

    struct Harness {
        dir: TempDir,
        config: SharedConfig,
        screen: Arc<FakeScreen>,
        store: SharedStore,
        tracker: Arc<MatchTracker>,
    }

    fn harness(
        region: bool,
        observations: Option<Vec<OcrObservation>>,
    ) -> Harness {
        harness_with(region, Arc::new(FakeRecognizer { observations }))
    }

    fn harness_with(region: bool, recognizer: Arc<dyn TextRecognizer>) -> Harness {
        let dir = tempdir().unwrap();
        let config = TrackerConfig {
            capture_region: region.then_some(CaptureRegion { x: 0, y: 0, width: 8, height: 8 }),
            active_deck_id: Some(1),
            active_season: Some("A2".to_string()),
            ..TrackerConfig::default()
        }
        .into_shared();
        let screen = FakeScreen::new();
        let detector = Arc::new(MseDetector::new(
            ReferenceStore::new(dir.path().join("references")),
            2000.0,
        ));
        let ocr = Arc::new(OcrPipeline::new(Some(recognizer), 0.5));
        let store = MatchStore::open_in_memory().unwrap().into_shared();
        store.lock().unwrap().create_deck("Starter").unwrap();

        let tracker = Arc::new(MatchTracker::new(
            config.clone(),
            screen.clone(),
            detector,
            ocr,
            store.clone(),
        ));

        Harness {
            dir,
            config,
            screen,
            store,
            tracker,
        }
    }

    fn win() -> Option<Vec<OcrObservation>> {
        Some(vec![OcrObservation::new("YOU WIN!", 0.9)])
    }

    #[test]
    fn test_end_screen_records_match() {
        let h = harness(true, win());

        h.tracker.on_state_changed(CombatState::Idle, CombatState::PreQueue);
        h.tracker.on_state_changed(CombatState::PreQueue, CombatState::InCombat);
        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);

        let store = h.store.lock().unwrap();
        let matches = store.recent_matches(10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].outcome, MatchOutcome::Win);
        assert_eq!(matches[0].deck_id, Some(1));
        assert_eq!(matches[0].season.as_deref(), Some("A2"));
        assert_eq!(matches[0].opponent, "?");
        // pre-queue frame + end frame
        assert_eq!(h.screen.captures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_prequeue_frame_consumed_by_end_screen() {
        let h = harness(true, win());

        h.tracker.on_state_changed(CombatState::Idle, CombatState::PreQueue);
        assert!(h.tracker.lock_prequeue().is_some());

        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);
        assert!(h.tracker.lock_prequeue().is_none());
    }

    #[test]
    fn test_deck_falls_back_to_none() {
        let h = harness(true, win());
        h.config.write().unwrap().active_deck_id = None;

        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);

        let matches = h.store.lock().unwrap().recent_matches(1).unwrap();
        assert_eq!(matches[0].deck_id, None);
    }

    #[test]
    fn test_no_region_records_nothing() {
        let h = harness(false, win());

        h.tracker.on_state_changed(CombatState::Idle, CombatState::PreQueue);
        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);

        assert_eq!(h.screen.captures.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.lock().unwrap().match_count().unwrap(), 0);
    }

    #[test]
    fn test_end_capture_failure_records_nothing() {
        let h = harness(true, win());
        h.screen.show(None);

        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);

        assert_eq!(h.store.lock().unwrap().match_count().unwrap(), 0);
    }

    #[test]
    fn test_recognizer_fault_still_records_sentinels() {
        let h = harness(true, None);

        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);

        let matches = h.store.lock().unwrap().recent_matches(1).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].outcome, MatchOutcome::Unknown);
        assert_eq!(matches[0].first_player, "?");
        assert_eq!(matches[0].raw_ocr_data.as_deref(), Some("[]"));
    }

    #[test]
    fn test_other_transitions_do_nothing() {
        let h = harness(true, win());

        h.tracker.on_state_changed(CombatState::PreQueue, CombatState::InCombat);
        h.tracker.on_state_changed(CombatState::EndScreen, CombatState::Idle);

        assert_eq!(h.screen.captures.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.lock().unwrap().match_count().unwrap(), 0);
    }

    /// Records whether the store mutex was free each time OCR ran.
    struct LockCheckingRecognizer {
        store: OnceLock<SharedStore>,
        store_free: Mutex<Vec<bool>>,
    }

    impl TextRecognizer for LockCheckingRecognizer {
        fn recognize(&self, _img: &RgbImage) -> Result<Vec<OcrObservation>> {
            let free = self
                .store
                .get()
                .map(|store| store.try_lock().is_ok())
                .unwrap_or(false);
            self.store_free.lock().unwrap().push(free);
            Ok(vec![OcrObservation::new("YOU LOSE", 0.9)])
        }
    }

    #[test]
    fn test_ocr_runs_outside_store_lock() {
        let recognizer = Arc::new(LockCheckingRecognizer {
            store: OnceLock::new(),
            store_free: Mutex::new(Vec::new()),
        });
        let h = harness_with(true, recognizer.clone());
        assert!(recognizer.store.set(h.store.clone()).is_ok());

        h.tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen);

        assert_eq!(*recognizer.store_free.lock().unwrap(), vec![true]);
        assert_eq!(h.store.lock().unwrap().match_count().unwrap(), 1);
    }

    /// Blocks inside OCR until released, so the test controls timing.
    struct GatedRecognizer {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl TextRecognizer for GatedRecognizer {
        fn recognize(&self, _img: &RgbImage) -> Result<Vec<OcrObservation>> {
            self.started.lock().unwrap().send(()).unwrap();
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| anyhow!("never released"))?;
            Ok(vec![OcrObservation::new("VICTORY", 0.9)])
        }
    }

    #[test]
    fn test_console_write_during_match_recording() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let h = harness_with(
            true,
            Arc::new(GatedRecognizer {
                started: Mutex::new(started_tx),
                release: Mutex::new(release_rx),
            }),
        );

        let tracker = h.tracker.clone();
        let recording = thread::spawn(move || {
            tracker.on_state_changed(CombatState::InCombat, CombatState::EndScreen)
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Deck creation from another thread while OCR is still in progress
        let store = h.store.clone();
        let (deck_tx, deck_rx) = mpsc::channel();
        thread::spawn(move || {
            let deck = store.lock().unwrap().create_deck("Pikachu ex").unwrap();
            deck_tx.send(deck.id).unwrap();
        });
        let deck_id = deck_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("store blocked while the match was being read");

        release_tx.send(()).unwrap();
        recording.join().unwrap();

        let store = h.store.lock().unwrap();
        assert!(store.get_deck(deck_id).unwrap().is_some());
        let matches = store.recent_matches(10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].outcome, MatchOutcome::Win);
    }

    #[test]
    fn test_calibrate_errors() {
        let h = harness(false, win());
        assert!(h.tracker.calibrate("end_screen").is_err());
        assert!(h.tracker.calibrate("idle").is_err());

        h.config.write().unwrap().capture_region =
            Some(CaptureRegion { x: 0, y: 0, width: 8, height: 8 });
        h.screen.show(None);
        assert!(h.tracker.calibrate("end_screen").is_err());
        assert!(!h.tracker.detector().is_calibrated("end_screen"));
    }

    #[test]
    fn test_calibrate_saves_reference() {
        let h = harness(true, win());
        h.screen.show(Some(solid(200)));

        h.tracker.calibrate("in_combat").unwrap();

        let detector = h.tracker.detector();
        assert!(detector.is_calibrated("in_combat"));
        assert!(detector.is_in_combat(&solid(200)).unwrap());
        assert!(!detector.is_in_combat(&solid(0)).unwrap());
    }

    #[test]
    fn test_capture_test_frame_writes_png() {
        let h = harness(true, win());
        h.screen.show(Some(solid(90)));
        let path = h.dir.path().join("checks").join("frame.png");

        assert_eq!(h.tracker.capture_test_frame(&path).unwrap(), (8, 8));

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved, solid(90));
    }

    #[test]
    fn test_capture_test_frame_errors() {
        let h = harness(false, win());
        let path = h.dir.path().join("frame.png");
        assert!(h.tracker.capture_test_frame(&path).is_err());

        h.config.write().unwrap().capture_region =
            Some(CaptureRegion { x: 0, y: 0, width: 8, height: 8 });
        h.screen.show(None);
        assert!(h.tracker.capture_test_frame(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_status() {
        let h = harness(true, win());
        h.tracker.calibrate("pre_queue").unwrap();
        let polling = PollingLoop::new(Duration::from_millis(10), h.screen.clone(), None, None);

        let status = h.tracker.status(&polling);
        assert_eq!(
            status,
            TrackerStatus {
                window_present: false,
                state: CombatState::Idle,
                region_configured: true,
                calibration: [
                    (ReferenceState::PreQueue, true),
                    (ReferenceState::InCombat, false),
                    (ReferenceState::EndScreen, false),
                ],
            }
        );
        assert!(status.to_string().contains("pre_queue=ok"));
    }

    #[test]
    fn test_full_match_through_polling_loop() {
        let h = harness(true, win());

        // Distinct solid frames per screen
        for (state, value) in [("pre_queue", 60), ("in_combat", 130), ("end_screen", 250)] {
            h.screen.show(Some(solid(value)));
            h.tracker.calibrate(state).unwrap();
        }

        let detector: Arc<dyn StateDetector> = h.tracker.detector();
        let polling = PollingLoop::new(
            Duration::from_millis(10),
            h.screen.clone(),
            Some(h.config.clone()),
            Some(detector),
        );
        h.tracker.install(&polling);

        for value in [0, 60, 60, 130, 130, 250, 250, 0] {
            h.screen.show(Some(solid(value)));
            polling.tick().unwrap();
        }

        assert_eq!(polling.state(), CombatState::Idle);
        let matches = h.store.lock().unwrap().recent_matches(10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].outcome, MatchOutcome::Win);
        assert_eq!(matches[0].deck_id, Some(1));
    }
}
