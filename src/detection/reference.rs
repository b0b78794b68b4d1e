//! Calibration reference images, one PNG per state.
//!
//! Files live at `<dir>/<state_name>.png`. Loaded images are cached per state,
//! including misses, until the state is recalibrated.

use anyhow::{Context, Result};
use image::RgbImage;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::ReferenceState;

pub struct ReferenceStore {
    dir: PathBuf,
    /// `None` entries remember that no reference could be loaded.
    cache: Mutex<HashMap<ReferenceState, Option<Arc<RgbImage>>>>,
}

impl ReferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the reference file for `state`.
    pub fn path_for(&self, state: ReferenceState) -> PathBuf {
        self.dir.join(format!("{}.png", state.name()))
    }

    /// True iff a reference file exists on disk.
    pub fn exists(&self, state: ReferenceState) -> bool {
        self.path_for(state).is_file()
    }

    /// Persists `img` as the reference for `state`, replacing any previous one.
    pub fn save(&self, state: ReferenceState, img: &RgbImage) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(state);
        img.save(&path)
            .with_context(|| format!("Failed to save reference {}", path.display()))?;
        self.invalidate(state);
        Ok(())
    }

    /// Drops the cached entry for `state`; the next `load` reads from disk.
    pub fn invalidate(&self, state: ReferenceState) {
        self.lock_cache().remove(&state);
    }

    /// Returns the reference for `state`, loading it on first use.
    ///
    /// A missing or unreadable file yields `None` and is cached as such.
    pub fn load(&self, state: ReferenceState) -> Option<Arc<RgbImage>> {
        let mut cache = self.lock_cache();
        if let Some(entry) = cache.get(&state) {
            return entry.clone();
        }

        let path = self.path_for(state);
        let loaded = if path.is_file() {
            match image::open(&path) {
                Ok(img) => Some(Arc::new(img.to_rgb8())),
                Err(e) => {
                    log::error!("Failed to load reference {}: {}", path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        cache.insert(state, loaded.clone());
        loaded
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<ReferenceState, Option<Arc<RgbImage>>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
