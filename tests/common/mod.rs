#![allow(dead_code)]

use symbolic_wasm::{config::Config, registry::Registry};

pub use symbolic_wasm::registry::ModuleHash;

/// Register modules written in the text format, in order.
pub fn registry(modules: &[&str]) -> (Registry, Vec<ModuleHash>) {
  let mut registry = Registry::new();
  let hashes = modules.iter().map(|m| registry.register(&wat::parse_str(m).unwrap()).unwrap()).collect();
  (registry, hashes)
}

pub fn config() -> Config {
  Config { iterations: 64, jobs: 2, ..Config::default() }
}

/// `add` returns the sum of its arguments widened to 64 bits, so no
/// overflow is reachable.
pub const WIDENED_ADD: &str = r#"(module
  (func $add (param i32 i32) (result i64)
    (i64.add (i64.extend_i32_u (local.get 0)) (i64.extend_i32_u (local.get 1))))
  (func (export "test_add") (param i32 i32) (result i32)
    (local i64)
    (local.set 2 (call $add (local.get 0) (local.get 1)))
    (i32.and
      (i64.ge_u (local.get 2) (i64.extend_i32_u (local.get 0)))
      (i64.ge_u (local.get 2) (i64.extend_i32_u (local.get 1))))))"#;

/// The same sum computed in 32 bits.
pub const NARROW_ADD: &str = r#"(module
  (func $add (param i32 i32) (result i32)
    (i32.add (local.get 0) (local.get 1)))
  (func (export "test_add") (param i32 i32) (result i32)
    (drop (call $add (local.get 0) (local.get 1)))
    (i32.const 1)))"#;

/// The 32-bit sum behind the check a compiler emits for it: a wrapped sum
/// below an operand reaches `unreachable`.
pub const GUARDED_ADD: &str = r#"(module
  (func $add (param i32 i32) (result i32) (local i32)
    (local.set 2 (i32.add (local.get 0) (local.get 1)))
    (if (i32.lt_u (local.get 2) (local.get 0)) (then unreachable))
    (local.get 2))
  (func (export "test_add") (param i32 i32) (result i32)
    (drop (call $add (local.get 0) (local.get 1)))
    (i32.const 1)))"#;

/// A target contract for cross-contract calls.
pub const ADDER: &str = r#"(module
  (func (export "add") (param i64 i64) (result i64)
    (i64.add (local.get 0) (local.get 1))))"#;

/// Deploys the first manifest contract at 0x0101..01 in `init` and calls
/// its `add` through `invoke`.
pub const CALLER: &str = r#"(module
  (import "env" "create_contract" (func $create (param i32 i32)))
  (import "env" "invoke" (func $invoke (param i32 i32 i32 i32 i32) (result i64)))
  (import "env" "storage_set" (func $set (param i64 i64)))
  (import "env" "storage_get" (func $get (param i64) (result i64)))
  (memory 1)
  (data (i32.const 0) "\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01\01")
  (data (i32.const 64) "add")
  (func (export "init") (param i32)
    (call $create (i32.const 0) (local.get 0))
    (call $set (i64.const 1) (i64.const 42)))
  (func (export "test_invoke") (param i64 i64) (result i32)
    (i64.store (i32.const 128) (local.get 0))
    (i64.store (i32.const 136) (local.get 1))
    (i64.eq
      (call $invoke (i32.const 0) (i32.const 64) (i32.const 3) (i32.const 128) (i32.const 2))
      (i64.add (local.get 0) (local.get 1))))
  (func (export "test_storage") (result i32)
    (i64.eq (call $get (i64.const 1)) (i64.const 42))))"#;
