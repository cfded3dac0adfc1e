use super::constants::{
    DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_MAX_FRAMES, DEFAULT_WIDTH, MAX_FRAMES_LIMIT,
};
use super::RelayError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Shared canvas and playback configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub max_frames: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl Settings {
    /// Returns a copy with every field present in `patch` replaced.
    pub fn merge(&self, patch: &SettingsPatch) -> Settings {
        Settings {
            width: patch.width.unwrap_or(self.width),
            height: patch.height.unwrap_or(self.height),
            fps: patch.fps.unwrap_or(self.fps),
            max_frames: patch.max_frames.unwrap_or(self.max_frames),
        }
    }
}

/// A partial settings update as submitted by an operator.
///
/// Fields may be JSON numbers or numeric strings (form inputs arrive as
/// strings). Absent, `null` and empty-string fields leave the current value
/// unchanged. Every present field must be a positive integer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, deserialize_with = "positive_field")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "positive_field")]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "positive_field")]
    pub fps: Option<u32>,
    #[serde(default, deserialize_with = "frame_count_field")]
    pub max_frames: Option<u32>,
}

impl SettingsPatch {
    pub fn from_value(value: Value) -> Result<Self, RelayError> {
        serde_json::from_value(value).map_err(|e| RelayError::InvalidSettings(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.fps.is_none() && self.max_frames.is_none()
    }
}

fn positive_field<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::String(text) if text.trim().is_empty() => return Ok(None),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        other => return Err(D::Error::custom(format!("expected a positive integer, got {other}"))),
    };

    match parsed {
        Some(n) if n > 0 && n <= u64::from(u32::MAX) => Ok(Some(n as u32)),
        _ => Err(D::Error::custom("expected a positive integer")),
    }
}

fn frame_count_field<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match positive_field(deserializer)? {
        Some(n) if n > MAX_FRAMES_LIMIT => Err(D::Error::custom(format!(
            "maxFrames must be at most {MAX_FRAMES_LIMIT}, got {n}"
        ))),
        other => Ok(other),
    }
}
