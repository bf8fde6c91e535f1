//! # Symbolic WASM
//!
//! Verification of WebAssembly contracts by fuzzing and by symbolic
//! execution. A module's `test_*` exports are properties: a test passes if
//! it returns a non-zero integer. The [`engine`] runs them on random inputs
//! or explores every path with the z3 solver, and records the exploration
//! as a [`proof::ProofTree`].
pub mod address;
pub mod bytecode;
pub mod config;
pub mod constraint;
pub mod context;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod host;
pub mod manifest;
pub mod module;
pub mod proof;
pub mod registry;
pub mod report;
pub mod solver;
pub mod state;
pub mod term;
pub mod ty;
pub mod value;
pub mod verdict;
