//! Deterministic, pure logic of the reconcile loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! snapshots and return deterministic outputs suitable for tests:
//! derivation (`machine`), prediction (`tree`, `predict`) and
//! verification (`verify`).

pub mod action;
pub mod guards;
pub mod invariants;
pub mod machine;
pub mod predict;
pub mod selector;
pub mod signal;
pub mod snapshot;
pub mod tree;
pub mod types;
pub mod verify;
