//! Operation Catalog: the registry of operation templates.
//!
//! Templates are immutable once registered. Re-registering a kind replaces
//! the template; operations already created keep the parameter and option
//! snapshot they took at creation time.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::kind::{OperationKind, RiskLevel};
use crate::parameters::{choice, ParameterField, ParameterSchema, ParameterType};
use crate::types::Parameters;

// ---------------------------------------------------------------------------
// OperationTemplate
// ---------------------------------------------------------------------------

/// Catalog entry describing one operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationTemplate {
    pub kind: OperationKind,
    pub display_name: String,
    pub description: String,
    pub parameter_schema: ParameterSchema,
    pub default_parameters: Parameters,
    pub estimated_time_per_item_ms: u64,
    /// When set, created operations stay in `pending` until confirmed.
    pub requires_confirmation: bool,
    pub risk_level: RiskLevel,
    /// When unset, the effective batch size is forced to 1.
    pub supports_batching: bool,
}

impl OperationTemplate {
    pub fn estimated_time_per_item(&self) -> Duration {
        Duration::from_millis(self.estimated_time_per_item_ms)
    }

    /// Estimated wall time for `target_count` items, ignoring batch overlap.
    pub fn estimate_duration(&self, target_count: usize) -> Duration {
        Duration::from_millis(self.estimated_time_per_item_ms.saturating_mul(target_count as u64))
    }
}

// ---------------------------------------------------------------------------
// OperationCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    templates: BTreeMap<OperationKind, OperationTemplate>,
}

impl OperationCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding the built-in template for every [`OperationKind`].
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        for template in default_templates() {
            catalog.register(template);
        }
        catalog
    }

    /// Insert or replace the template for `template.kind`.
    pub fn register(&mut self, template: OperationTemplate) {
        self.templates.insert(template.kind, template);
    }

    pub fn get(&self, kind: OperationKind) -> Result<&OperationTemplate, CoreError> {
        self.templates.get(&kind).ok_or_else(|| CoreError::NotFound {
            entity: "OperationTemplate",
            id: kind.to_string(),
        })
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.templates.contains_key(&kind)
    }

    /// All templates, ordered by kind.
    pub fn list(&self) -> Vec<OperationTemplate> {
        self.templates.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

fn params(value: serde_json::Value) -> Parameters {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

fn default_templates() -> Vec<OperationTemplate> {
    vec![
        OperationTemplate {
            kind: OperationKind::StatusUpdate,
            display_name: "Update Status".to_string(),
            description: "Set the status of every selected entity".to_string(),
            parameter_schema: ParameterSchema::new(vec![
                ParameterField::required(
                    "status",
                    choice(&["active", "inactive", "suspended", "archived"]),
                    "Status to apply",
                ),
                ParameterField::optional("reason", ParameterType::String, "Audit reason"),
            ]),
            default_parameters: Parameters::new(),
            estimated_time_per_item_ms: 200,
            requires_confirmation: false,
            risk_level: RiskLevel::Low,
            supports_batching: true,
        },
        OperationTemplate {
            kind: OperationKind::Approval,
            display_name: "Approve / Reject".to_string(),
            description: "Record an approval decision for every selected entity".to_string(),
            parameter_schema: ParameterSchema::new(vec![
                ParameterField::required(
                    "decision",
                    choice(&["approve", "reject"]),
                    "Decision to record",
                ),
                ParameterField::optional("comment", ParameterType::String, "Reviewer comment"),
            ]),
            default_parameters: Parameters::new(),
            estimated_time_per_item_ms: 300,
            requires_confirmation: false,
            risk_level: RiskLevel::Medium,
            supports_batching: true,
        },
        OperationTemplate {
            kind: OperationKind::Deletion,
            display_name: "Delete".to_string(),
            description: "Delete every selected entity".to_string(),
            parameter_schema: ParameterSchema::new(vec![
                ParameterField::optional(
                    "hard_delete",
                    ParameterType::Boolean,
                    "Remove permanently instead of soft-deleting",
                ),
                ParameterField::optional("reason", ParameterType::String, "Audit reason"),
            ]),
            default_parameters: params(json!({ "hard_delete": false })),
            estimated_time_per_item_ms: 500,
            requires_confirmation: true,
            risk_level: RiskLevel::Critical,
            supports_batching: true,
        },
        OperationTemplate {
            kind: OperationKind::Export,
            display_name: "Export".to_string(),
            description: "Export every selected entity".to_string(),
            parameter_schema: ParameterSchema::new(vec![
                ParameterField::optional("format", choice(&["json", "csv"]), "Output format"),
                ParameterField::optional(
                    "include_metadata",
                    ParameterType::Boolean,
                    "Include entity metadata",
                ),
            ]),
            default_parameters: params(json!({ "format": "json", "include_metadata": true })),
            estimated_time_per_item_ms: 100,
            requires_confirmation: false,
            risk_level: RiskLevel::Low,
            supports_batching: true,
        },
        OperationTemplate {
            kind: OperationKind::Scan,
            display_name: "Scan".to_string(),
            description: "Scan every selected entity, one at a time".to_string(),
            parameter_schema: ParameterSchema::new(vec![ParameterField::optional(
                "scan_type",
                choice(&["quick", "full"]),
                "Scan depth",
            )]),
            default_parameters: params(json!({ "scan_type": "quick" })),
            estimated_time_per_item_ms: 2_000,
            requires_confirmation: false,
            risk_level: RiskLevel::Medium,
            supports_batching: false,
        },
    ]
}
