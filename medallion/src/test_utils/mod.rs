//! Helpers shared by unit and integration tests.
//!
//! [`fixtures::TestPipeline`] wires the Bronze loader, Silver merger and a result sink onto an
//! in-memory store. [`fault_store::FaultInjectingTableStore`] makes selected store operations
//! fail, and [`failpoints::CustomFailScenario`] drives the `fail` failpoints.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod fault_store;
pub mod fixtures;
