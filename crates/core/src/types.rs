/// Operation identifiers are UUIDv7, so sorting by id sorts by creation time.
pub type OperationId = uuid::Uuid;

/// Identifier of an entity targeted by an operation.
pub type TargetId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Free-form JSON object holding operation parameters.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Generate a fresh, time-ordered operation identifier.
pub fn new_operation_id() -> OperationId {
    uuid::Uuid::now_v7()
}
