//! Operation lifecycle event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`OperationEvent`]: the envelope published for every lifecycle
//!   transition and finished batch.

pub mod bus;

pub use bus::{EventBus, OperationEvent, OperationEventKind};
