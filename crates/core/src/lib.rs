//! Domain types and pure logic for the bulk operation engine.
//!
//! This crate has zero internal dependencies so it can be shared by the
//! engine, the event bus and any future API or CLI surface. Nothing in
//! here performs I/O or awaits.

pub mod batching;
pub mod catalog;
pub mod error;
pub mod kind;
pub mod options;
pub mod parameters;
pub mod query;
pub mod record;
pub mod status;
pub mod types;
