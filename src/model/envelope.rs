use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable name of an edge node, used only to recognise its own traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender-tagged wrapper around node-originated traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub sender: NodeId,
    pub content: String,
    pub timestamp: u64,
}

#[derive(Deserialize)]
struct WireEnvelope {
    sender: String,
    content: Value,
    #[serde(default)]
    timestamp: Option<u64>,
}

impl Envelope {
    pub fn new(sender: NodeId, content: impl Into<String>, timestamp: u64) -> Self {
        Envelope {
            sender,
            content: content.into(),
            timestamp,
        }
    }

    /// Wrap `content` stamped with the current time.
    pub fn wrap(sender: &NodeId, content: impl Into<String>) -> Self {
        Self::new(sender.clone(), content, now_millis())
    }

    /// Read an envelope off the wire. Anything lacking a string `sender` and a
    /// `content` field is not an envelope. Non-string content is kept as its
    /// JSON text.
    pub fn from_wire(raw: &str) -> Option<Envelope> {
        let wire: WireEnvelope = serde_json::from_str(raw).ok()?;
        let content = match wire.content {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Some(Envelope {
            sender: NodeId(wire.sender),
            content,
            timestamp: wire.timestamp.unwrap_or_default(),
        })
    }

    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_from(&self, node_id: &NodeId) -> bool {
        &self.sender == node_id
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
