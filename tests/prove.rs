mod common;

use common::{config, registry, ADDER, CALLER, GUARDED_ADD, NARROW_ADD, WIDENED_ADD};
use symbolic_wasm::{
  config::{Config, OverflowPolicy, Strategy},
  engine::{session::TestSession, Engine, Outcome},
  proof::NodeKind,
  state::{termination::StuckReason, Mode},
  verdict::{Guarantee, TestVerdict, Verdict},
};

#[test]
fn widened_add_is_proved() {
  let (registry, hashes) = registry(&[WIDENED_ADD]);
  let (report, trees) = Engine::new(&registry, config()).prove(hashes[0], None, None).unwrap();
  assert_eq!(report.tests[0].verdict, TestVerdict::Passed(Guarantee::Proved));
  assert_eq!(report.tests[0].exhaustive, Some(true));
  let counts = trees[0].counts();
  assert_eq!(counts.failed, 0);
  assert_eq!(counts.stuck, 0);
  assert!(trees[0].leaves().iter().all(|v| matches!(v, Verdict::Passed | Verdict::Infeasible)));
  assert_eq!(trees[0].symbols.len(), 2);
}

#[test]
fn narrow_checked_add_fails_with_a_replayable_witness() {
  let (registry, hashes) = registry(&[NARROW_ADD]);
  let engine = Engine::new(&registry, Config { overflow: OverflowPolicy::Checked, ..config() });
  let (report, _) = engine.prove(hashes[0], Some("test_add"), None).unwrap();
  let TestVerdict::Failed(c) = &report.tests[0].verdict else { panic!("expected a failure, got {}", report.tests[0].verdict) };
  let (a, b) = (c.witness.get("arg0").unwrap(), c.witness.get("arg1").unwrap());
  assert!(a + b >= 1 << 32);
  assert_eq!(c.outcome, "trapped: integer overflow");

  let session = TestSession::new(&engine, hashes[0], Mode::Symbolic).unwrap();
  let replayed = engine.replay(&session, "test_add", &c.witness).unwrap();
  assert_eq!(replayed, Outcome::Failed(c.outcome.clone()));
}

#[test]
fn compiled_overflow_check_fails_with_a_replayable_witness() {
  assert_eq!(config().overflow, OverflowPolicy::Wrapping);
  let (registry, hashes) = registry(&[GUARDED_ADD]);
  let engine = Engine::new(&registry, config());
  let (report, trees) = engine.prove(hashes[0], None, None).unwrap();
  let TestVerdict::Failed(c) = &report.tests[0].verdict else { panic!("expected a failure, got {}", report.tests[0].verdict) };
  let (a, b) = (c.witness.get("arg0").unwrap(), c.witness.get("arg1").unwrap());
  assert!(a + b >= 1 << 32);
  assert_eq!(c.outcome, "trapped: unreachable executed");
  assert_eq!(trees[0].counts().failed, 1);

  let session = TestSession::new(&engine, hashes[0], Mode::Symbolic).unwrap();
  let replayed = engine.replay(&session, "test_add", &c.witness).unwrap();
  assert_eq!(replayed, Outcome::Failed(c.outcome.clone()));
}

#[test]
fn narrow_wrapping_add_passes() {
  let (registry, hashes) = registry(&[NARROW_ADD]);
  let (report, trees) = Engine::new(&registry, config()).prove(hashes[0], None, None).unwrap();
  assert_eq!(report.tests[0].verdict, TestVerdict::Passed(Guarantee::Proved));
  assert_eq!(trees[0].nodes.len(), 1);
}

#[test]
fn repeated_runs_build_the_same_tree() {
  let wat = r#"(module
    (func (export "test_cases") (param i32) (result i32)
      (block (block (block
        (br_table 0 1 2 (local.get 0)))
        (return (i32.const 1)))
        (return (i32.ne (local.get 0) (i32.const 7))))
      (i32.const 1)))"#;
  let (registry, hashes) = registry(&[wat]);
  for strategy in [Strategy::DepthFirst, Strategy::BreadthFirst] {
    let engine = Engine::new(&registry, Config { strategy, ..config() });
    let (_, first) = engine.prove(hashes[0], None, None).unwrap();
    let (_, second) = engine.prove(hashes[0], None, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].verdict, TestVerdict::Passed(Guarantee::Proved));
  }
}

#[test]
fn cross_contract_call_with_symbolic_arguments() {
  let (registry, hashes) = registry(&[CALLER, ADDER]);
  let engine = Engine::new(&registry, config()).with_contracts(vec![("adder".to_string(), hashes[1])]);
  let (report, trees) = engine.prove(hashes[0], None, None).unwrap();
  for t in &report.tests {
    assert_eq!(t.verdict, TestVerdict::Passed(Guarantee::Proved), "{}", t.name);
  }
  let invoke = trees.iter().find(|t| t.id.test == "test_invoke").unwrap();
  let calls = invoke.nodes.iter().find_map(|n| match &n.kind {
    NodeKind::Leaf { verdict: Verdict::Passed, host_calls, .. } => Some(host_calls),
    _ => None,
  });
  let calls = calls.unwrap();
  assert!(calls.iter().any(|c| c.contains("create_contract")));
  assert!(calls.iter().any(|c| c.contains("invoke")));
}

#[test]
fn symbolic_init_inputs() {
  let wat = r#"(module
    (import "env" "storage_set" (func $set (param i64 i64)))
    (import "env" "storage_get" (func $get (param i64) (result i64)))
    (func (export "init") (param i64)
      (call $set (i64.const 0) (local.get 0)))
    (func (export "test_stored") (result i32)
      (i64.lt_u (call $get (i64.const 0)) (i64.const 100)))
    (@custom "domains" "{\"init\": [{\"max\": 99}]}"))"#;
  let (registry, hashes) = registry(&[wat]);
  let (report, trees) = Engine::new(&registry, config()).prove(hashes[0], None, None).unwrap();
  assert_eq!(report.tests[0].verdict, TestVerdict::Passed(Guarantee::Proved));
  assert!(trees[0].symbols[0].starts_with("init.arg0"));
}

#[test]
fn unknown_test_is_an_error() {
  let (registry, hashes) = registry(&[WIDENED_ADD]);
  assert!(Engine::new(&registry, config()).prove(hashes[0], Some("test_missing"), None).is_err());
}

#[test]
fn symbolic_address_is_stuck() {
  let wat = r#"(module
    (import "env" "invoke" (func $invoke (param i32 i32 i32 i32 i32) (result i64)))
    (memory 1)
    (func (export "test_call") (param i32) (result i32)
      (drop (call $invoke (local.get 0) (i32.const 64) (i32.const 3) (i32.const 128) (i32.const 0)))
      (i32.const 1)))"#;
  let (registry, hashes) = registry(&[wat]);
  let (report, trees) = Engine::new(&registry, config()).prove(hashes[0], None, None).unwrap();
  assert_eq!(report.tests[0].verdict, TestVerdict::Stuck(vec![StuckReason::NonConcreteAddress]));
  assert!(matches!(&trees[0].nodes[0].kind, NodeKind::Leaf { witness: Some(_), .. }));
}
