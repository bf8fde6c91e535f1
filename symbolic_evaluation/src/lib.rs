//! # Symbolic Evaluation
//!
//! The crate defines a generic symbolic execution algorithm parametrized by
//!
//! - a transition, which expands one evaluation state into an output
//! describing its successors;
//!
//! - a writer, the single place where outputs are recorded and turned back
//! into states to evaluate;
//!
//! - a frontier, which defines the search strategy.
//!
//! States in one batch are expanded in parallel, but the writer sees their
//! outputs in the order the frontier handed the states out, so a run is
//! deterministic for a given frontier and batch width.

pub mod traits;
pub mod evaluation;
