use std::path::PathBuf;
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Environment variable overriding the data directory.
const DATA_DIR_ENV: &str = "PTCG_DATA_DIR";

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the data directory: `$PTCG_DATA_DIR` if set, otherwise `<exe_dir>/data/`.
pub fn get_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => {
            let dir = PathBuf::from(dir);
            std::path::absolute(&dir).unwrap_or(dir)
        }
        _ => get_exe_dir().join("data"),
    }
}

/// Returns the logs directory: `<data_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Returns the calibration reference directory: `<data_dir>/references/`
pub fn get_references_dir() -> PathBuf {
    get_data_dir().join("references")
}

/// Returns the match database path: `<data_dir>/tracker.db`
pub fn get_database_path() -> PathBuf {
    get_data_dir().join("tracker.db")
}

/// Returns the config file path: `<data_dir>/config.json`
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Returns the local tesseract directory: `<data_dir>/tesseract/`
pub fn get_tesseract_dir() -> PathBuf {
    get_data_dir().join("tesseract")
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    std::fs::create_dir_all(get_references_dir())?;
    Ok(())
}
