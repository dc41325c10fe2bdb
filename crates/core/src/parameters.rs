//! Parameter contract for operation templates.
//!
//! A [`ParameterSchema`] is a flat list of typed fields. Validation overlays
//! the caller's parameters on the template defaults and reports every
//! violation at once, one message per field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::Parameters;

// ---------------------------------------------------------------------------
// Schema types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
    /// A string restricted to one of the listed values.
    Choice(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterField {
    pub name: String,
    pub field_type: ParameterType,
    pub required: bool,
    pub description: String,
}

impl ParameterField {
    pub fn required(name: &str, field_type: ParameterType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, field_type: ParameterType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type, description)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub fields: Vec<ParameterField>,
}

impl ParameterSchema {
    pub fn new(fields: Vec<ParameterField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&ParameterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Overlay `supplied` on `defaults` and validate the result.
    ///
    /// Returns the merged snapshot that the operation will carry, or
    /// `CoreError::InvalidParameters` listing every violation.
    pub fn resolve(&self, defaults: &Parameters, supplied: &Value) -> Result<Parameters, CoreError> {
        let supplied = match supplied {
            Value::Null => Parameters::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(CoreError::InvalidParameters(vec![format!(
                    "parameters must be a JSON object, got {}",
                    json_type_name(other)
                )]))
            }
        };

        let mut merged = defaults.clone();
        merged.extend(supplied);

        let messages = self.violations(&merged);
        if messages.is_empty() {
            Ok(merged)
        } else {
            Err(CoreError::InvalidParameters(messages))
        }
    }

    /// Collect one message per violated field.
    pub fn violations(&self, params: &Parameters) -> Vec<String> {
        let mut messages = Vec::new();

        for field in &self.fields {
            match params.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        messages.push(format!("{}: field is required", field.name));
                    }
                }
                Some(value) => {
                    if let Err(msg) = check_type(&field.field_type, value) {
                        messages.push(format!("{}: {msg}", field.name));
                    }
                }
            }
        }

        for name in params.keys() {
            if self.field(name).is_none() {
                messages.push(format!("{name}: unknown parameter"));
            }
        }

        messages
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_type(expected: &ParameterType, value: &Value) -> Result<(), String> {
    match (expected, value) {
        (ParameterType::String, Value::String(_)) => Ok(()),
        (ParameterType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
        (ParameterType::Boolean, Value::Bool(_)) => Ok(()),
        (ParameterType::Choice(values), Value::String(s)) => {
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(format!(
                    "'{s}' is not one of: {}",
                    values.join(", ")
                ))
            }
        }
        (expected, other) => Err(format!(
            "expected {}, got {}",
            type_name(expected),
            json_type_name(other)
        )),
    }
}

fn type_name(t: &ParameterType) -> &'static str {
    match t {
        ParameterType::String | ParameterType::Choice(_) => "string",
        ParameterType::Integer => "integer",
        ParameterType::Boolean => "boolean",
    }
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

/// Build a choice type from string literals.
pub fn choice(values: &[&str]) -> ParameterType {
    ParameterType::Choice(values.iter().map(|v| v.to_string()).collect())
}
