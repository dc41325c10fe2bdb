//! Per-operation execution options.
//!
//! Callers supply [`OptionOverrides`]; [`OperationOptions::resolve`] merges
//! them over engine defaults and applies the template's constraints.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::catalog::OperationTemplate;
use crate::error::CoreError;
use crate::kind::RiskLevel;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of targets processed concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default upper bound a caller may request for `batch_size`.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default pause between batches. Non-zero to bound throughput.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Defaults supplied by the engine configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionDefaults {
    pub batch_size: usize,
    pub max_batch_size: usize,
    pub delay_between_batches_ms: u64,
    pub item_timeout_ms: Option<u64>,
}

impl Default for OptionDefaults {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            delay_between_batches_ms: DEFAULT_BATCH_DELAY_MS,
            item_timeout_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Caller overrides
// ---------------------------------------------------------------------------

/// Caller-supplied options; `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionOverrides {
    pub continue_on_error: Option<bool>,
    pub batch_size: Option<usize>,
    pub delay_between_batches_ms: Option<u64>,
    pub dry_run: Option<bool>,
    pub require_confirmation: Option<bool>,
    pub create_backup: Option<bool>,
    pub item_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OperationOptions {
    /// Record item failures and keep going instead of failing the operation.
    pub continue_on_error: bool,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub batch_size: usize,
    #[validate(range(max = 3_600_000, message = "must not exceed one hour"))]
    pub delay_between_batches_ms: u64,
    pub dry_run: bool,
    pub require_confirmation: bool,
    pub create_backup: bool,
    #[validate(range(min = 1, message = "must be at least 1 ms"))]
    pub item_timeout_ms: Option<u64>,
}

impl OperationOptions {
    /// Merge `overrides` over `defaults` for an operation of `template`.
    ///
    /// - `batch_size` is forced to 1 when the template does not batch.
    /// - `require_confirmation` cannot be switched off below the template.
    /// - `create_backup` defaults to true for critical-risk templates.
    pub fn resolve(
        template: &OperationTemplate,
        overrides: &OptionOverrides,
        defaults: &OptionDefaults,
    ) -> Result<Self, CoreError> {
        let requested_batch = overrides.batch_size.unwrap_or(defaults.batch_size);
        let options = Self {
            continue_on_error: overrides.continue_on_error.unwrap_or(true),
            batch_size: if template.supports_batching {
                requested_batch
            } else {
                1
            },
            delay_between_batches_ms: overrides
                .delay_between_batches_ms
                .unwrap_or(defaults.delay_between_batches_ms),
            dry_run: overrides.dry_run.unwrap_or(false),
            require_confirmation: template.requires_confirmation
                || overrides.require_confirmation.unwrap_or(false),
            create_backup: overrides
                .create_backup
                .unwrap_or(template.risk_level == RiskLevel::Critical),
            item_timeout_ms: overrides.item_timeout_ms.or(defaults.item_timeout_ms),
        };

        let mut messages = match options.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => validation_messages(&errors),
        };
        // Non-batching templates ignore the requested size entirely.
        if template.supports_batching && requested_batch > defaults.max_batch_size {
            messages.push(format!(
                "options.batch_size: must not exceed {}",
                defaults.max_batch_size
            ));
        }

        if messages.is_empty() {
            Ok(options)
        } else {
            Err(CoreError::InvalidParameters(messages))
        }
    }
}

fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| {
                let detail = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                format!("options.{field}: {detail}")
            })
        })
        .collect();
    messages.sort();
    messages
}
