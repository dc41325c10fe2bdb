use crate::status::OperationStatus;
use crate::types::OperationId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unknown operation kind: '{0}'")]
    UnknownOperationKind(String),

    #[error("Invalid parameters: {}", .0.join("; "))]
    InvalidParameters(Vec<String>),

    #[error("No valid targets: none of the supplied target ids exist")]
    NoValidTargets,

    #[error("Operation {0} requires explicit confirmation before it can start")]
    ConfirmationRequired(OperationId),

    #[error("Cannot {action} operation {id} while it is {status}")]
    InvalidState {
        id: OperationId,
        status: OperationStatus,
        action: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing operation record.
    pub fn operation_not_found(id: OperationId) -> Self {
        Self::NotFound {
            entity: "Operation",
            id: id.to_string(),
        }
    }
}
