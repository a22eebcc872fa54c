use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具描述：名称、说明和输入 schema，启动时构建后不再变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    pub description: String,
}

/// Object schema in the JSON Schema subset MCP clients expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn object() -> Self {
        Self {
            kind: SchemaType::Object,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn property(mut self, name: &str, kind: SchemaType, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertySchema {
                kind,
                description: description.to_string(),
            },
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

/// 统一响应信封。成功与失败都只携带一段文本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Envelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl LogOrder {
    pub fn as_order_by(self) -> &'static str {
        match self {
            LogOrder::NewestFirst => "timestamp desc",
            LogOrder::OldestFirst => "timestamp asc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub project_id: String,
    pub filter: Option<String>,
    pub page_size: u32,
    pub order: LogOrder,
}

/// Cloud Logging entry as returned by `entries:list`. Fields not listed are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub resource: Option<Value>,
    #[serde(default)]
    pub text_payload: Option<String>,
    #[serde(default)]
    pub json_payload: Option<Value>,
    #[serde(default)]
    pub proto_payload: Option<Value>,
}

impl LogEntry {
    /// The entry's payload, whichever of the three payload kinds is set.
    pub fn payload(&self) -> Value {
        if let Some(text) = &self.text_payload {
            return Value::String(text.clone());
        }
        self.json_payload
            .clone()
            .or_else(|| self.proto_payload.clone())
            .unwrap_or(Value::Null)
    }
}

/// 返回给调用方的日志条目。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedLogEntry {
    pub timestamp: Option<String>,
    pub severity: Option<String>,
    pub resource: Option<Value>,
    pub text_payload: Value,
    pub json_payload: Option<Value>,
}

impl From<LogEntry> for MappedLogEntry {
    fn from(entry: LogEntry) -> Self {
        let payload = entry.payload();
        let json_payload = payload.is_object().then(|| payload.clone());
        MappedLogEntry {
            timestamp: entry.timestamp,
            severity: entry.severity,
            resource: entry.resource,
            text_payload: payload,
            json_payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub entries: Vec<MappedLogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsResponse {
    pub projects: Vec<String>,
}
