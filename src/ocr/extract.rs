use super::engine::OcrObservation;

/// Sentinel for a field that could not be resolved.
pub const UNKNOWN: &str = "?";

/// Default minimum confidence for an observation to count.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

const WIN_PHRASES: [&str; 5] = ["WIN", "WIN!", "YOU WIN", "YOU WIN!", "VICTORY"];
const LOSS_PHRASES: [&str; 5] = ["LOSE", "LOSE!", "YOU LOSE", "YOU LOSE!", "DEFEAT"];

/// Match result as stored: `W`, `L` or `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Win,
    Loss,
    Unknown,
}

impl MatchOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            MatchOutcome::Win => "W",
            MatchOutcome::Loss => "L",
            MatchOutcome::Unknown => UNKNOWN,
        }
    }

    /// Inverse of `code`; anything unrecognized is `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "W" => MatchOutcome::Win,
            "L" => MatchOutcome::Loss,
            _ => MatchOutcome::Unknown,
        }
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Everything read off one end-of-match screen.
///
/// String fields are never empty; unresolved values hold `"?"`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub outcome: MatchOutcome,
    pub opponent: String,
    pub first_player: String,
    /// Local time, ISO-8601
    pub captured_at: String,
    /// JSON list of `[text, confidence]` pairs
    pub raw_ocr_data: String,
    pub deck_id: Option<i64>,
}

impl MatchRecord {
    /// Builds a record from recognizer output.
    pub fn from_observations(observations: &[OcrObservation], confidence_threshold: f32) -> Self {
        Self {
            outcome: parse_outcome(observations, confidence_threshold),
            opponent: parse_opponent(observations),
            first_player: parse_first_player(observations),
            captured_at: now_iso8601(),
            raw_ocr_data: serialize_observations(observations),
            deck_id: None,
        }
    }

    /// Record for a frame the recognizer could not process.
    pub fn unrecognized() -> Self {
        Self::from_observations(&[], DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

/// First observation at or above `confidence_threshold` whose trimmed,
/// upper-cased text is a known win or loss phrase decides the outcome.
pub fn parse_outcome(observations: &[OcrObservation], confidence_threshold: f32) -> MatchOutcome {
    for obs in observations {
        if obs.confidence < confidence_threshold {
            continue;
        }
        let upper = obs.text.trim().to_uppercase();
        if WIN_PHRASES.contains(&upper.as_str()) {
            return MatchOutcome::Win;
        }
        if LOSS_PHRASES.contains(&upper.as_str()) {
            return MatchOutcome::Loss;
        }
    }
    MatchOutcome::Unknown
}

/// Opponent names are not read from the result screen yet.
pub fn parse_opponent(_observations: &[OcrObservation]) -> String {
    UNKNOWN.to_string()
}

/// Who went first is not shown on the result screen.
pub fn parse_first_player(_observations: &[OcrObservation]) -> String {
    UNKNOWN.to_string()
}

/// Serializes observations as `[[text, confidence], ...]`.
pub fn serialize_observations(observations: &[OcrObservation]) -> String {
    let pairs: Vec<(&str, f32)> = observations
        .iter()
        .map(|o| (o.text.as_str(), o.confidence))
        .collect();
    serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
}

fn now_iso8601() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
