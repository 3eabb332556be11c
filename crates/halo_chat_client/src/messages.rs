//! WebSocket message types. Client → server: the outbound question payload.
//! Server → client: ping keep-alives and assistant content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::Status;

/// Fixed request fields merged into every outbound question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    #[serde(rename = "type")]
    pub request_type: String,
    pub tenant_name: String,
    pub stage: String,
    pub stage_type: String,
    pub meeting_id: String,
    pub text: String,
    pub page_name: String,
    /// Extra pass-through fields from the config file.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            request_type: "ask_anything".into(),
            tenant_name: "gold_v1.com".into(),
            stage: "01 Nurture (pre-pipeline)".into(),
            stage_type: "Competition".into(),
            meeting_id: "demo_memory_1".into(),
            text: "Trevor (Transform AI's CEO) : Awesome Avinash, let's get started about aviso"
                .into(),
            page_name: "linkedin".into(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigFieldError {
    #[error("unknown request field: {0}")]
    Unknown(String),
}

impl OutboundConfig {
    /// Names accepted by [`OutboundConfig::set_field`], in wire order.
    pub const FIELDS: [&'static str; 7] = [
        "type",
        "tenant_name",
        "stage",
        "stage_type",
        "meeting_id",
        "text",
        "page_name",
    ];

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> Result<(), ConfigFieldError> {
        let slot = match name {
            "type" => &mut self.request_type,
            "tenant_name" => &mut self.tenant_name,
            "stage" => &mut self.stage,
            "stage_type" => &mut self.stage_type,
            "meeting_id" => &mut self.meeting_id,
            "text" => &mut self.text,
            "page_name" => &mut self.page_name,
            other => return Err(ConfigFieldError::Unknown(other.to_string())),
        };
        *slot = value.into();
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "type" => Some(&self.request_type),
            "tenant_name" => Some(&self.tenant_name),
            "stage" => Some(&self.stage),
            "stage_type" => Some(&self.stage_type),
            "meeting_id" => Some(&self.meeting_id),
            "text" => Some(&self.text),
            "page_name" => Some(&self.page_name),
            other => self.extra.get(other).map(String::as_str),
        }
    }
}

/// Shallow-merge `config` with `{ "question": question }`. `question` always wins.
pub fn build_payload(config: &OutboundConfig, question: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    for (k, v) in &config.extra {
        payload.insert(k.clone(), Value::String(v.clone()));
    }
    for name in OutboundConfig::FIELDS {
        if let Some(v) = config.field(name) {
            payload.insert(name.to_string(), Value::String(v.to_string()));
        }
    }
    payload.insert("question".to_string(), Value::String(question.to_string()));
    payload
}

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Keep-alive. `timestamp` is seconds since epoch, `None` if missing or not numeric.
    Ping { timestamp: Option<f64> },
    /// Assistant content to append to the current session.
    Content {
        content: String,
        status: Option<Status>,
    },
}

/// Classify a raw text frame. Never fails: undecodable frames become raw content.
pub fn classify(raw: &str) -> Inbound {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("inbound frame is not JSON ({}), using raw text", e);
            return raw_content(raw);
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("ping") {
        return Inbound::Ping {
            timestamp: value.get("timestamp").and_then(Value::as_f64),
        };
    }

    let success = value.get("status").and_then(Value::as_str) == Some("success");
    if success {
        if let Some(answer) = value.get("answer").and_then(truthy_text) {
            return Inbound::Content {
                content: answer,
                status: Some(Status::Success),
            };
        }
    }
    if let Some(message) = value.get("message").and_then(truthy_text) {
        return Inbound::Content {
            content: message,
            status: None,
        };
    }
    raw_content(raw)
}

fn raw_content(raw: &str) -> Inbound {
    Inbound::Content {
        content: raw.to_string(),
        status: None,
    }
}

/// Display text for a truthy JSON value; `None` for null, false, 0, "".
fn truthy_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}
