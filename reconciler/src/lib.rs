//! Reconcile / predict / verify loop for tracked work items.
//!
//! Each pass reacts to one external signal: it derives a transition from an
//! immutable snapshot, predicts every acceptable outcome of the resulting
//! actions, executes them, and on the next pass verifies what actually
//! happened against the recorded prediction. The crate keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (derivation, prediction,
//!   verification). No I/O, fully testable in isolation.
//! - **[`exec`]**: The action runner, dispatching each action to its executor.
//! - **[`io`]**: Side-effecting collaborators (item store, agent process,
//!   expectations and report files). Traits at the seams enable fakes in tests.
//!
//! [`pass`] coordinates the three to implement one loop pass.

pub mod core;
pub mod exec;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pass;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
