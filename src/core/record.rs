//! Log record structure and attribute values

use super::level::LogLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Layer assigned to records logged without an explicit layer.
pub const DEFAULT_LAYER: &str = "DEFAULT";

/// Value type for record attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{}", s),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Float(fl) => write!(f, "{}", fl),
            AttrValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl AttrValue {
    /// Convert a JSON value into an attribute value. Scalars map directly;
    /// arrays and objects are carried as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> serde_json::Result<Self> {
        use serde_json::Value;
        Ok(match value {
            Value::String(s) => AttrValue::String(s.clone()),
            Value::Bool(b) => AttrValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else {
                    AttrValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::Null => AttrValue::String("null".to_string()),
            other => AttrValue::String(serde_json::to_string(other)?),
        })
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<i32> for AttrValue {
    fn from(i: i32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// The immutable unit of logging work. Created once per `log` call and
/// never mutated after it enters a handler queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub layer: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, layer: impl Into<String>, message: impl Into<String>) -> Self {
        let layer = layer.into();
        Self {
            level,
            layer: if layer.is_empty() {
                DEFAULT_LAYER.to_string()
            } else {
                layer
            },
            message: message.into(),
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
            trace_id: None,
            span_id: None,
            correlation_id: None,
        }
    }

    pub fn with_attribute<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<AttrValue>,
    {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_trace(
        mut self,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Render the default single-line text form. The message body is
    /// carried through byte-for-byte; handlers append the trailing newline.
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] [{:<8}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level.to_str(),
            self.layer,
            self.message
        );

        if !self.attributes.is_empty() {
            line.push_str(" | ");
            let fields = self
                .attributes
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            line.push_str(&fields);
        }

        if let Some(ref trace_id) = self.trace_id {
            line.push_str(&format!(" | trace={}", trace_id));
            if let Some(ref span_id) = self.span_id {
                line.push_str(&format!(" span={}", span_id));
            }
            if let Some(ref correlation_id) = self.correlation_id {
                line.push_str(&format!(" corr={}", correlation_id));
            }
        }

        line
    }
}

/// Argument for the level convenience methods: a bare message (layer =
/// `DEFAULT`) or a `(layer, message)` pair.
#[derive(Debug, Clone)]
pub struct LayeredMessage {
    pub layer: String,
    pub message: String,
}

impl From<&str> for LayeredMessage {
    fn from(message: &str) -> Self {
        Self {
            layer: DEFAULT_LAYER.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<String> for LayeredMessage {
    fn from(message: String) -> Self {
        Self {
            layer: DEFAULT_LAYER.to_string(),
            message,
        }
    }
}

impl From<(&str, &str)> for LayeredMessage {
    fn from((layer, message): (&str, &str)) -> Self {
        Self {
            layer: layer.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<(&str, String)> for LayeredMessage {
    fn from((layer, message): (&str, String)) -> Self {
        Self {
            layer: layer.to_string(),
            message,
        }
    }
}

impl From<(String, String)> for LayeredMessage {
    fn from((layer, message): (String, String)) -> Self {
        Self { layer, message }
    }
}
