//! Bulk operation execution engine.
//!
//! Accepts administrative actions targeting many entities at once, queues
//! them, and executes them one operation at a time in bounded-concurrency
//! batches:
//!
//! - [`BulkOperationEngine`]: the facade callers use to create, confirm,
//!   start, pause, resume, cancel and inspect operations.
//! - [`Scheduler`]: background loop that moves queued operations into the
//!   single execution slot.
//! - [`BatchExecutor`]: drives one operation through its batches.
//! - [`EntityGateway`] / [`OperationHandler`]: the seams the surrounding
//!   application plugs its entity store and per-kind logic into.

pub mod config;
pub mod engine;
pub mod executor;
pub mod gateway;
pub mod handler;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use config::EngineConfig;
pub use engine::{BulkOperationEngine, CreateOperation};
pub use executor::BatchExecutor;
pub use gateway::{Entity, EntityGateway, GatewayError, InMemoryGateway};
pub use handler::{HandlerRegistry, ItemContext, OperationHandler};
pub use queue::ExecutionQueue;
pub use scheduler::Scheduler;
pub use store::OperationStore;
