use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_COLOR: &str = "black";
const DEFAULT_STROKE_WIDTH: f64 = 2.0;
const DEFAULT_OPACITY: f64 = 1.0;
const DEFAULT_FILL: &str = "none";

/// One drawn stroke or shape.
///
/// Accepted on the wire as a compact array `[d, color, width, opacity, fill]`,
/// as an object with the same field names, or as a bare geometry string.
/// Always re-encoded as the object form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WirePathRecord")]
pub struct PathRecord {
    pub d: String,
    pub color: String,
    pub width: f64,
    pub opacity: f64,
    pub fill: String,
}

/// An indexed bucket of path records.
pub type Frame = Vec<PathRecord>;

impl PathRecord {
    pub fn new(d: impl Into<String>) -> Self {
        PathRecord {
            d: d.into(),
            color: DEFAULT_COLOR.to_string(),
            width: DEFAULT_STROKE_WIDTH,
            opacity: DEFAULT_OPACITY,
            fill: DEFAULT_FILL.to_string(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePathRecord {
    Bare(String),
    Compact(Vec<Value>),
    Object {
        #[serde(default)]
        d: Option<String>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        width: Option<f64>,
        #[serde(default)]
        opacity: Option<f64>,
        #[serde(default)]
        fill: Option<String>,
    },
}

impl From<WirePathRecord> for PathRecord {
    fn from(wire: WirePathRecord) -> Self {
        match wire {
            WirePathRecord::Bare(d) => PathRecord::new(d),
            WirePathRecord::Compact(items) => {
                let text = |idx: usize| items.get(idx).and_then(Value::as_str).map(str::to_string);
                let number = |idx: usize| items.get(idx).and_then(Value::as_f64);
                build(text(0), text(1), number(2), number(3), text(4))
            }
            WirePathRecord::Object {
                d,
                color,
                width,
                opacity,
                fill,
            } => build(d, color, width, opacity, fill),
        }
    }
}

// Empty strings and a zero width fall back to defaults; an explicit zero opacity is kept.
fn build(
    d: Option<String>,
    color: Option<String>,
    width: Option<f64>,
    opacity: Option<f64>,
    fill: Option<String>,
) -> PathRecord {
    PathRecord {
        d: d.unwrap_or_default(),
        color: color
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        width: width.filter(|w| *w != 0.0).unwrap_or(DEFAULT_STROKE_WIDTH),
        opacity: opacity.unwrap_or(DEFAULT_OPACITY),
        fill: fill
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| DEFAULT_FILL.to_string()),
    }
}
