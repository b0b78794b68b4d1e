//! TCG Match Tracker
//!
//! Watches the MuMu Player emulator window, follows ranked matches through
//! queue, combat and result screens, and records each result in SQLite.

mod capture;
mod config;
mod console;
mod detection;
mod logging;
mod ocr;
mod paths;
mod polling;
mod store;
mod tracker;

use anyhow::{Context, Result};
use std::sync::Arc;

use capture::{DesktopScreen, ScreenSource};
use detection::{MseDetector, ReferenceStore, StateDetector};
use ocr::OcrPipeline;
use polling::PollingLoop;
use store::MatchStore;
use tracker::MatchTracker;

fn main() -> Result<()> {
    logging::install_panic_hook();

    // Ensure output directories exist
    paths::ensure_directories().context("Failed to create data directories")?;
    logging::init_logging(&paths::get_logs_dir());
    log::info!("Data directory: {}", paths::get_data_dir().display());

    let config_path = paths::get_config_path();
    let cfg = config::load_config(&config_path);
    if cfg.capture_region.is_none() {
        log::warn!("No capture region configured, detection is idle until one is set");
    }

    let interval = cfg.polling_interval();
    let screen: Arc<dyn ScreenSource> = Arc::new(DesktopScreen::new(cfg.window_title.clone()));
    let detector = Arc::new(MseDetector::new(
        ReferenceStore::new(paths::get_references_dir()),
        cfg.mse_threshold,
    ));
    // Tesseract is located on the first end screen
    let ocr = Arc::new(OcrPipeline::new(None, cfg.ocr_confidence_threshold));
    let store = MatchStore::open(&paths::get_database_path())?.into_shared();
    let config = cfg.into_shared();

    let tracker = Arc::new(MatchTracker::new(
        config.clone(),
        screen.clone(),
        detector,
        ocr,
        store,
    ));

    let state_detector: Arc<dyn StateDetector> = tracker.detector();
    let polling = Arc::new(PollingLoop::new(
        interval,
        screen,
        Some(config.clone()),
        Some(state_detector),
    ));
    tracker.install(&polling);

    let handle = polling::spawn_polling(polling.clone()).context("Failed to start polling thread")?;

    console::Console {
        config,
        config_path,
        tracker,
        polling: polling.clone(),
    }
    .run();

    polling.stop();
    if handle.join().is_err() {
        log::error!("Polling thread terminated abnormally");
    }
    log::info!("Tracker exited");
    Ok(())
}
