//! Tracker configuration.
//!
//! Loaded from config.json in the data directory at startup. Holds the emulator
//! capture region, the deck/season attached to recorded matches, and the
//! detection tunables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::capture::CaptureRegion;

const MIN_POLLING_INTERVAL: f64 = 0.01;
const MAX_POLLING_INTERVAL: f64 = 60.0;

/// Configuration shared between the polling thread and the console thread.
pub type SharedConfig = Arc<RwLock<TrackerConfig>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Screen rectangle of the emulator. Detection is disabled while unset.
    #[serde(default)]
    pub capture_region: Option<CaptureRegion>,
    /// Exact title of the emulator window probed for presence.
    #[serde(default = "default_window_title")]
    pub window_title: String,
    /// Deck attached to recorded matches when none is recognized on screen.
    #[serde(default)]
    pub active_deck_id: Option<i64>,
    /// Season label stored with recorded matches.
    #[serde(default)]
    pub active_season: Option<String>,
    /// Delay between polling ticks (seconds).
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: f64,
    /// Mean squared error below which a frame matches its reference.
    #[serde(default = "default_mse_threshold")]
    pub mse_threshold: f64,
    /// Minimum OCR confidence (0.0-1.0) for an observation to count.
    #[serde(default = "default_ocr_confidence")]
    pub ocr_confidence_threshold: f32,
}

fn default_window_title() -> String {
    "MuMu Player".to_string()
}

fn default_polling_interval() -> f64 {
    0.1
}

fn default_mse_threshold() -> f64 {
    2000.0
}

fn default_ocr_confidence() -> f32 {
    0.5
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capture_region: None,
            window_title: default_window_title(),
            active_deck_id: None,
            active_season: None,
            polling_interval_secs: default_polling_interval(),
            mse_threshold: default_mse_threshold(),
            ocr_confidence_threshold: default_ocr_confidence(),
        }
    }
}

impl TrackerConfig {
    /// Polling interval as a `Duration`.
    ///
    /// Values outside `MIN_POLLING_INTERVAL..=MAX_POLLING_INTERVAL` seconds, NaN
    /// included, fall back to the default.
    pub fn polling_interval(&self) -> std::time::Duration {
        let secs = self.polling_interval_secs;
        let secs = if (MIN_POLLING_INTERVAL..=MAX_POLLING_INTERVAL).contains(&secs) {
            secs
        } else {
            log::warn!(
                "polling_interval_secs {} out of range ({}-{}), using {}",
                secs,
                MIN_POLLING_INTERVAL,
                MAX_POLLING_INTERVAL,
                default_polling_interval()
            );
            default_polling_interval()
        };
        std::time::Duration::from_secs_f64(secs)
    }

    /// Wraps the config for sharing across threads.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Loads configuration from `path`, or returns defaults if missing or invalid.
pub fn load_config(path: &Path) -> TrackerConfig {
    log::info!("Looking for config at: {}", path.display());

    if !path.exists() {
        log::info!("config.json not found. Using default config.");
        return TrackerConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => {
                log::info!("Config loaded from config.json");
                config
            }
            Err(e) => {
                log::error!("Failed to parse config.json: {}. Using defaults.", e);
                TrackerConfig::default()
            }
        },
        Err(e) => {
            log::error!("Failed to read config.json: {}. Using defaults.", e);
            TrackerConfig::default()
        }
    }
}

/// Writes configuration to `path` as pretty JSON, creating the parent directory.
pub fn save_config(path: &Path, config: &TrackerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Takes a snapshot of the shared configuration.
pub fn snapshot(config: &SharedConfig) -> TrackerConfig {
    config.read().unwrap_or_else(|e| e.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.capture_region, None);
        assert_eq!(config.window_title, "MuMu Player");
        assert_eq!(config.polling_interval(), std::time::Duration::from_millis(100));
        assert_eq!(config.mse_threshold, 2000.0);
        assert_eq!(config.ocr_confidence_threshold, 0.5);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("config.json"));
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"capture_region": {"x": 10, "y": 20, "width": 800, "height": 600}, "active_deck_id": 3}"#,
        )
        .unwrap();

        let config = load_config(&path);
        assert_eq!(
            config.capture_region,
            Some(CaptureRegion { x: 10, y: 20, width: 800, height: 600 })
        );
        assert_eq!(config.active_deck_id, Some(3));
        assert_eq!(config.mse_threshold, 2000.0);
        assert_eq!(config.window_title, "MuMu Player");
    }

    #[test]
    fn test_invalid_json_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_config(&path), TrackerConfig::default());
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = TrackerConfig {
            active_season: Some("A2b".to_string()),
            ..TrackerConfig::default()
        };

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_bad_interval_falls_back() {
        for secs in [f64::NAN, f64::INFINITY, -1.0, 0.0, 0.001, 61.0, 1e20] {
            let config = TrackerConfig {
                polling_interval_secs: secs,
                ..TrackerConfig::default()
            };
            assert_eq!(
                config.polling_interval(),
                std::time::Duration::from_millis(100),
                "interval {}",
                secs
            );
        }
    }

    #[test]
    fn test_interval_bounds_accepted() {
        let config = TrackerConfig {
            polling_interval_secs: 0.01,
            ..TrackerConfig::default()
        };
        assert_eq!(config.polling_interval(), std::time::Duration::from_millis(10));

        let config = TrackerConfig {
            polling_interval_secs: 60.0,
            ..TrackerConfig::default()
        };
        assert_eq!(config.polling_interval(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_huge_interval_in_file_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"polling_interval_secs": 1e20}"#).unwrap();

        let config = load_config(&path);
        assert_eq!(config.polling_interval(), std::time::Duration::from_millis(100));
    }
}
