use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, RgbImage};
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;

use super::setup::{find_tesseract, TesseractPaths};

/// Pixel box of a recognized line, in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = (self.left + self.width as i32).max(other.left + other.width as i32);
        let bottom = (self.top + self.height as i32).max(other.top + other.height as i32);
        BoundingBox {
            left,
            top,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        }
    }
}

/// One piece of recognized text.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrObservation {
    pub text: String,
    /// 0.0 to 1.0
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

impl OcrObservation {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }
}

/// Text recognition backend used by the OCR pipeline.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, img: &RgbImage) -> Result<Vec<OcrObservation>>;
}

/// Runs the Tesseract CLI in sparse-text mode and reads its TSV output.
pub struct TesseractRecognizer {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl TesseractRecognizer {
    pub fn new(paths: TesseractPaths) -> Self {
        Self {
            executable: paths.executable,
            tessdata: paths.tessdata,
        }
    }

    /// Locates an installed Tesseract.
    pub fn discover() -> Result<Self> {
        Ok(Self::new(find_tesseract()?))
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, img: &RgbImage) -> Result<Vec<OcrObservation>> {
        // Save grayscale image to temporary file
        let gray = DynamicImage::ImageRgb8(img.clone()).to_luma8();
        let temp_input = NamedTempFile::with_suffix(".png")?;
        gray.save(temp_input.path())
            .context("Failed to write OCR input image")?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut command = Command::new(&self.executable);
        command.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        // psm 11: sparse text, result screens scatter words across the frame
        let output = command
            .args(["-l", "eng", "--psm", "11", "tsv"])
            .output()
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;
        let _ = std::fs::remove_file(&tsv_path);

        let observations = parse_tsv_output(&tsv_content);
        log::debug!("Tesseract: {} line(s)", observations.len());
        Ok(observations)
    }
}

struct LineAccumulator {
    key: (i32, i32, i32),
    words: Vec<String>,
    conf_sum: f32,
    bbox: Option<BoundingBox>,
}

/// Parses Tesseract TSV output into one observation per text line.
///
/// Word rows (level 5) are grouped by `(block, paragraph, line)` in order of first
/// appearance. A line's confidence is the mean word confidence scaled to 0..1, and
/// its box is the union of the word boxes.
pub fn parse_tsv_output(tsv: &str) -> Vec<OcrObservation> {
    let mut lines: Vec<LineAccumulator> = Vec::new();

    for row in tsv.lines().skip(1) {
        // level, page_num, block_num, par_num, line_num, word_num,
        // left, top, width, height, conf, text
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != 5 {
            continue;
        }
        let text = fields[11].trim();
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let num = |i: usize| fields[i].trim().parse::<i32>().unwrap_or(-1);
        let key = (num(2), num(3), num(4));
        let bbox = match (num(6), num(7), num(8), num(9)) {
            (left, top, width, height) if width >= 0 && height >= 0 => Some(BoundingBox {
                left,
                top,
                width: width as u32,
                height: height as u32,
            }),
            _ => None,
        };

        let line = match lines.iter_mut().position(|l| l.key == key) {
            Some(i) => &mut lines[i],
            None => {
                lines.push(LineAccumulator {
                    key,
                    words: Vec::new(),
                    conf_sum: 0.0,
                    bbox: None,
                });
                let last = lines.len() - 1;
                &mut lines[last]
            }
        };

        line.words.push(text.to_string());
        line.conf_sum += conf;
        line.bbox = match (line.bbox, bbox) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
    }

    lines
        .into_iter()
        .map(|line| OcrObservation {
            confidence: (line.conf_sum / line.words.len() as f32 / 100.0).clamp(0.0, 1.0),
            text: line.words.join(" "),
            bbox: line.bbox,
        })
        .collect()
}
