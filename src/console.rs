//! Line-oriented command interface on stdin.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capture::CaptureRegion;
use crate::config::{self, SharedConfig};
use crate::polling::PollingLoop;
use crate::store::SharedStore;
use crate::tracker::MatchTracker;

const RECENT_LIMIT: usize = 10;

const HELP: &str = "\
commands:
  status                        window, state, region and calibration
  calibrate <state>             save the current frame as pre_queue | in_combat | end_screen
  region <x> <y> <w> <h>        set the emulator capture region
  capture <path>                save one frame of the region as PNG
  deck <id|none>                set the active deck
  deck add <name>               create a deck
  decks                         list decks
  recent                        show the latest recorded matches
  quit                          stop tracking and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Calibrate(String),
    Region(CaptureRegion),
    Capture(PathBuf),
    SetDeck(Option<i64>),
    AddDeck(String),
    Decks,
    Recent,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let command = match (name.to_lowercase().as_str(), args.as_slice()) {
        ("status", []) => Command::Status,
        ("calibrate", [state]) => Command::Calibrate(state.to_string()),
        ("region", [x, y, w, h]) => Command::Region(CaptureRegion {
            x: x.parse().with_context(|| format!("invalid x: {}", x))?,
            y: y.parse().with_context(|| format!("invalid y: {}", y))?,
            width: w.parse().with_context(|| format!("invalid width: {}", w))?,
            height: h.parse().with_context(|| format!("invalid height: {}", h))?,
        }),
        ("capture", [path]) => Command::Capture(PathBuf::from(*path)),
        ("deck", ["none"]) => Command::SetDeck(None),
        ("deck", ["add", words @ ..]) if !words.is_empty() => Command::AddDeck(words.join(" ")),
        ("deck", [id]) => Command::SetDeck(Some(
            id.parse().with_context(|| format!("invalid deck id: {}", id))?,
        )),
        ("decks", []) => Command::Decks,
        ("recent", []) => Command::Recent,
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        (other, _) => bail!("unrecognized command '{}' (type 'help')", other),
    };
    Ok(Some(command))
}

pub struct Console {
    pub config: SharedConfig,
    pub config_path: PathBuf,
    pub tracker: Arc<MatchTracker>,
    pub polling: Arc<PollingLoop>,
}

impl Console {
    /// Reads commands until `quit` or end of input.
    pub fn run(&self) {
        println!("{}", HELP);
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => return,
                Ok(Some(command)) => {
                    if let Err(e) = self.execute(command) {
                        println!("error: {:#}", e);
                    }
                }
                Err(e) => println!("error: {:#}", e),
            }
            let _ = io::stdout().flush();
        }
        log::info!("stdin closed");
    }

    fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Status => println!("{}", self.tracker.status(&self.polling)),
            Command::Calibrate(state) => {
                self.tracker.calibrate(&state)?;
                println!("calibrated {}", state);
            }
            Command::Region(region) => {
                set_region(&self.config, &self.config_path, region)?;
                println!(
                    "region set to {},{} {}x{}",
                    region.x, region.y, region.width, region.height
                );
            }
            Command::Capture(path) => {
                let (width, height) = self.tracker.capture_test_frame(&path)?;
                println!("saved {}x{} frame to {}", width, height, path.display());
            }
            Command::SetDeck(deck_id) => {
                set_active_deck(&self.config, &self.config_path, &self.tracker.store(), deck_id)?;
                println!("active deck: {}", deck_id.map_or("none".to_string(), |id| id.to_string()));
            }
            Command::AddDeck(name) => {
                let deck = lock_store(&self.tracker.store()).create_deck(&name)?;
                println!("deck {} created: {}", deck.id, deck.name);
            }
            Command::Decks => {
                let decks = lock_store(&self.tracker.store()).decks()?;
                let active = config::snapshot(&self.config).active_deck_id;
                if decks.is_empty() {
                    println!("no decks");
                }
                for deck in decks {
                    let marker = if Some(deck.id) == active { "*" } else { " " };
                    println!("{} {:>4}  {}", marker, deck.id, deck.name);
                }
            }
            Command::Recent => {
                let matches = lock_store(&self.tracker.store()).recent_matches(RECENT_LIMIT)?;
                if matches.is_empty() {
                    println!("no matches recorded");
                }
                for m in matches {
                    println!(
                        "{:>5}  {}  {}  deck={}  season={}",
                        m.id,
                        m.captured_at,
                        m.outcome,
                        m.deck_id.map_or("-".to_string(), |id| id.to_string()),
                        m.season.as_deref().unwrap_or("-")
                    );
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
        Ok(())
    }
}

fn lock_store(store: &SharedStore) -> std::sync::MutexGuard<'_, crate::store::MatchStore> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

/// Updates the capture region and persists the config.
pub fn set_region(config: &SharedConfig, path: &Path, region: CaptureRegion) -> Result<()> {
    if region.is_empty() {
        bail!("region must have a non-zero width and height");
    }
    update_config(config, path, |cfg| cfg.capture_region = Some(region))
}

/// Sets the deck attached to new matches. The deck must exist.
pub fn set_active_deck(
    config: &SharedConfig,
    path: &Path,
    store: &SharedStore,
    deck_id: Option<i64>,
) -> Result<()> {
    if let Some(id) = deck_id {
        lock_store(store)
            .get_deck(id)?
            .ok_or_else(|| anyhow!("no deck with id {}", id))?;
    }
    update_config(config, path, |cfg| cfg.active_deck_id = deck_id)
}

fn update_config(
    config: &SharedConfig,
    path: &Path,
    apply: impl FnOnce(&mut config::TrackerConfig),
) -> Result<()> {
    let updated = {
        let mut cfg = config.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut *cfg);
        cfg.clone()
    };
    config::save_config(path, &updated)?;
    log::info!("Config saved to {}", path.display());
    Ok(())
}
