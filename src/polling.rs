//! Polling loop: window presence tracking and the combat state machine.
//!
//! One background thread calls `start()`, which ticks at a fixed interval until
//! `stop()` is requested. Each tick probes the emulator window, fires presence
//! callbacks on flips, and while the window is present captures one frame and
//! advances the state machine:
//!
//! Idle → PreQueue → InCombat → EndScreen → Idle
//!
//! Callbacks always run after the internal locks are released.

use anyhow::{Context, Result};
use image::RgbImage;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::ScreenSource;
use crate::config::SharedConfig;
use crate::detection::{CombatState, StateDetector};

pub type WindowCallback = Arc<dyn Fn() + Send + Sync>;
pub type StateChangedCallback = Arc<dyn Fn(CombatState, CombatState) + Send + Sync>;

/// Observers of the polling loop. Unset slots are skipped.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_window_found: Option<WindowCallback>,
    pub on_window_lost: Option<WindowCallback>,
    /// Receives `(previous, next)`.
    pub on_state_changed: Option<StateChangedCallback>,
}

/// Fields written only by the tick, read from any thread.
struct SharedState {
    current_state: CombatState,
    window_present: bool,
}

/// Sticky stop request the inter-tick wait can be woken by.
struct StopSignal {
    requested: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            requested: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn request(&self) {
        *self.requested.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.wake.notify_all();
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps up to `timeout`, returning early once a stop is requested.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.requested.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

pub struct PollingLoop {
    interval: Duration,
    screen: Arc<dyn ScreenSource>,
    config: Option<SharedConfig>,
    detector: Option<Arc<dyn StateDetector>>,
    shared: Mutex<SharedState>,
    callbacks: Mutex<Callbacks>,
    stop: StopSignal,
}

impl PollingLoop {
    /// Creates a loop in the `Idle` state with the window considered absent.
    ///
    /// State detection only runs when both `config` and `detector` are provided.
    pub fn new(
        interval: Duration,
        screen: Arc<dyn ScreenSource>,
        config: Option<SharedConfig>,
        detector: Option<Arc<dyn StateDetector>>,
    ) -> Self {
        Self {
            interval,
            screen,
            config,
            detector,
            shared: Mutex::new(SharedState {
                current_state: CombatState::Idle,
                window_present: false,
            }),
            callbacks: Mutex::new(Callbacks::default()),
            stop: StopSignal::new(),
        }
    }

    /// Current combat state.
    pub fn state(&self) -> CombatState {
        self.lock_shared().current_state
    }

    /// Whether the emulator window was present at the last tick.
    pub fn window_present(&self) -> bool {
        self.lock_shared().window_present
    }

    /// Replaces all registered observers.
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.callbacks.lock().unwrap_or_else(|e| e.into_inner()) = callbacks;
    }

    /// Runs the tick loop until `stop()` is requested. Blocking.
    ///
    /// A stop requested before this call makes it return without ticking.
    pub fn start(&self) {
        log::info!(
            "Polling loop started (interval={:.3}s)",
            self.interval.as_secs_f64()
        );

        while !self.stop.is_requested() {
            self.run_tick_isolated();
            if self.stop.wait(self.interval) {
                break;
            }
        }

        log::info!("Polling loop stopped");
    }

    /// Requests termination at the next interval boundary. Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_requested() {
            log::info!("Polling loop stop requested");
        }
        self.stop.request();
    }

    /// Runs one tick, logging errors and containing panics so the loop survives.
    fn run_tick_isolated(&self) {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("polling error: {:#}", e),
            Err(_) => log::error!("polling tick panicked, continuing"),
        }
    }

    /// One polling cycle: presence check, then capture and transition.
    ///
    /// An `Err` means the detector failed; state is left untouched.
    pub fn tick(&self) -> Result<()> {
        let present = self.screen.window_exists();

        let (found, lost) = {
            let mut shared = self.lock_shared();
            let was_present = shared.window_present;
            shared.window_present = present;
            if present && !was_present {
                (true, false)
            } else if !present && was_present {
                shared.current_state = CombatState::Idle;
                (false, true)
            } else {
                (false, false)
            }
        };

        let callbacks = self.callbacks_snapshot();
        if found {
            log::info!("Emulator window found");
            if let Some(on_found) = &callbacks.on_window_found {
                on_found();
            }
        }
        if lost {
            log::info!("Emulator window lost, state reset to idle");
            if let Some(on_lost) = &callbacks.on_window_lost {
                on_lost();
            }
        }

        if !present {
            return Ok(());
        }
        let (Some(config), Some(detector)) = (&self.config, &self.detector) else {
            return Ok(());
        };

        let region = config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .capture_region;
        let Some(region) = region else {
            return Ok(());
        };

        let Some(frame) = self.screen.capture_frame(&region) else {
            log::debug!("No frame this tick");
            return Ok(());
        };

        let current = self.state();
        let next = next_state(current, detector.as_ref(), &frame)
            .with_context(|| format!("state detection failed in {}", current))?;

        if next != current {
            let previous = {
                let mut shared = self.lock_shared();
                std::mem::replace(&mut shared.current_state, next)
            };
            log::info!("State -> {} (was {})", next, previous);
            if let Some(on_changed) = &callbacks.on_state_changed {
                on_changed(previous, next);
            }
        }

        Ok(())
    }

    fn lock_shared(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn callbacks_snapshot(&self) -> Callbacks {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Applies the transition table to one frame.
///
/// Predicates are checked in table order and evaluation stops at the first match.
///
/// | Current   | Condition           | Next      |
/// |-----------|---------------------|-----------|
/// | Idle      | pre-queue ranked    | PreQueue  |
/// | PreQueue  | in combat           | InCombat  |
/// | PreQueue  | not pre-queue       | Idle      |
/// | InCombat  | end screen          | EndScreen |
/// | EndScreen | not end screen      | Idle      |
///
/// Every other case keeps the current state.
pub fn next_state(
    current: CombatState,
    detector: &dyn StateDetector,
    img: &RgbImage,
) -> Result<CombatState> {
    let next = match current {
        CombatState::Idle => {
            if detector.is_pre_queue_ranked(img)? {
                CombatState::PreQueue
            } else {
                CombatState::Idle
            }
        }
        CombatState::PreQueue => {
            if detector.is_in_combat(img)? {
                CombatState::InCombat
            } else if !detector.is_pre_queue_ranked(img)? {
                CombatState::Idle
            } else {
                CombatState::PreQueue
            }
        }
        CombatState::InCombat => {
            if detector.is_end_screen(img)? {
                CombatState::EndScreen
            } else {
                CombatState::InCombat
            }
        }
        CombatState::EndScreen => {
            if detector.is_end_screen(img)? {
                CombatState::EndScreen
            } else {
                CombatState::Idle
            }
        }
    };
    Ok(next)
}

/// Spawns the polling loop on a dedicated named thread.
pub fn spawn_polling(polling: Arc<PollingLoop>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("polling".to_string())
        .spawn(move || polling.start())
}
