use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::paths;

const TESSDATA_PREFIX_ENV: &str = "TESSDATA_PREFIX";
const ENG_TRAINEDDATA: &str = "eng.traineddata";

const WINDOWS_INSTALL_DIRS: [&str; 2] = [
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];

/// Resolved Tesseract installation.
#[derive(Debug, Clone)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` lets Tesseract use its compiled-in default.
    pub tessdata: Option<PathBuf>,
}

/// Directories checked for a bundled Tesseract, in priority order.
fn local_tesseract_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![paths::get_tesseract_dir()];
    if let Some(local) = dirs::data_local_dir() {
        dirs.push(local.join("tcg-match-tracker").join("tesseract"));
    }
    dirs
}

fn executable_name() -> String {
    format!("tesseract{}", std::env::consts::EXE_SUFFIX)
}

/// Locates Tesseract and its English language data.
pub fn find_tesseract() -> Result<TesseractPaths> {
    let local_dirs = local_tesseract_dirs();
    let executable = find_tesseract_executable(&local_dirs)?;
    let tessdata = find_tessdata_dir(
        &local_dirs,
        std::env::var_os(TESSDATA_PREFIX_ENV).map(PathBuf::from),
    );

    match &tessdata {
        Some(dir) => log::info!(
            "Tesseract found: {} (tessdata {})",
            executable.display(),
            dir.display()
        ),
        None => log::info!(
            "Tesseract found: {} (default tessdata)",
            executable.display()
        ),
    }

    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Finds the Tesseract executable: bundled dirs first, then `PATH`, then the
/// standard Windows install locations.
pub fn find_tesseract_executable(local_dirs: &[PathBuf]) -> Result<PathBuf> {
    if let Some(exe) = find_executable_in(local_dirs) {
        return Ok(exe);
    }

    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    let install_dirs: Vec<PathBuf> = WINDOWS_INSTALL_DIRS.iter().map(PathBuf::from).collect();
    if let Some(exe) = find_executable_in(&install_dirs) {
        return Ok(exe);
    }

    Err(anyhow!(
        "Tesseract not found. Install Tesseract-OCR or copy it to {}",
        paths::get_tesseract_dir().display()
    ))
}

fn find_executable_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    let name = executable_name();
    dirs.iter().map(|dir| dir.join(&name)).find(|p| p.is_file())
}

/// Finds a tessdata directory containing `eng.traineddata`.
///
/// Order: `<dir>/tessdata` for each bundled dir, the Windows install dirs, then
/// `prefix` and `prefix/tessdata`.
pub fn find_tessdata_dir(local_dirs: &[PathBuf], prefix: Option<PathBuf>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = local_dirs.iter().map(|d| d.join("tessdata")).collect();
    candidates.extend(
        WINDOWS_INSTALL_DIRS
            .iter()
            .map(|d| Path::new(d).join("tessdata")),
    );
    if let Some(prefix) = prefix {
        let nested = prefix.join("tessdata");
        candidates.push(prefix);
        candidates.push(nested);
    }

    candidates
        .into_iter()
        .find(|dir| dir.join(ENG_TRAINEDDATA).is_file())
}
