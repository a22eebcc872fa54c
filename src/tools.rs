//! Static tool catalog and argument validation against the declared schemas.

use serde_json::{Map, Value};

use crate::error::{CloudLoggingError, Result};
use crate::model::{InputSchema, SchemaType, ToolDescriptor};

pub const LIST_PROJECTS: &str = "list-projects";
pub const SELECT_PROJECT: &str = "select-project";
pub const GET_LOGS: &str = "get-logs";

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let tools = vec![
            ToolDescriptor {
                name: LIST_PROJECTS.to_string(),
                description: "List all GCP projects accessible with current credentials".to_string(),
                input_schema: InputSchema::object(),
            },
            ToolDescriptor {
                name: SELECT_PROJECT.to_string(),
                description: "Selects GCP project to use for subsequent logging operations".to_string(),
                input_schema: InputSchema::object().property(
                    "projectId",
                    SchemaType::String,
                    "ID of the GCP project to select",
                    true,
                ),
            },
            ToolDescriptor {
                name: GET_LOGS.to_string(),
                description: "Get Cloud Logging entries for the current project".to_string(),
                input_schema: InputSchema::object()
                    .property(
                        "filter",
                        SchemaType::String,
                        "Filter for the log entries (see Cloud Logging query syntax)",
                        false,
                    )
                    .property(
                        "pageSize",
                        SchemaType::Number,
                        "Maximum number of entries to return (default: 10)",
                        false,
                    ),
            },
        ];
        Self { tools }
    }

    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// 校验参数并返回规范化后的对象；null 或缺省参数视为空对象。
pub fn validate(tool: &ToolDescriptor, args: &Value) -> Result<Map<String, Value>> {
    let obj = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(CloudLoggingError::InvalidArguments(format!(
                "arguments must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let schema = &tool.input_schema;
    for name in &schema.required {
        match obj.get(name) {
            None | Some(Value::Null) => {
                return Err(CloudLoggingError::InvalidArguments(format!(
                    "{name}: required property is missing"
                )))
            }
            Some(_) => {}
        }
    }

    for (name, prop) in &schema.properties {
        let Some(value) = obj.get(name) else { continue };
        if value.is_null() {
            continue;
        }
        if !prop.kind.matches(value) {
            return Err(CloudLoggingError::InvalidArguments(format!(
                "{name}: expected {}, got {}",
                prop.kind.as_str(),
                json_type_name(value)
            )));
        }
    }

    Ok(obj)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
