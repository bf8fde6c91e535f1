mod common;

use common::{config, registry, ADDER, CALLER, NARROW_ADD, WIDENED_ADD};
use symbolic_wasm::{
  config::{Config, OverflowPolicy},
  engine::{
    discovery::TestFunction,
    session::TestSession,
    shrink::magnitude,
    Engine,
  },
  state::{termination::StuckReason, Mode},
  verdict::{Guarantee, TestVerdict},
};

const BOUNDED: &str = r#"(module
  (func (export "test_small") (param i32) (result i32)
    (i32.lt_s (local.get 0) (i32.const 1000))))"#;

#[test]
fn passing_test() {
  let (registry, hashes) = registry(&[WIDENED_ADD]);
  let report = Engine::new(&registry, config()).fuzz(hashes[0]).unwrap();
  assert_eq!(report.tests.len(), 1);
  assert_eq!(report.tests[0].verdict, TestVerdict::Passed(Guarantee::Fuzzed { iterations: 64 }));
  assert_eq!(report.exit_code(), 0);
}

#[test]
fn failing_input_is_shrunk_to_the_boundary() {
  let (registry, hashes) = registry(&[BOUNDED]);
  let engine = Engine::new(&registry, config());
  let session = TestSession::new(&engine, hashes[0], Mode::Concrete).unwrap();
  let test = session.discovery.test("test_small").unwrap();
  let res = engine.fuzz_test(&session, test);
  let TestVerdict::Failed(c) = &res.verdict else { panic!("expected a failure, got {}", res.verdict) };
  assert_eq!(c.args, vec!["1000".to_string()]);
  assert_eq!(c.witness.get(&TestFunction::arg_name(0)), Some(1000));
  assert_eq!(c.outcome, "returned 0");

  let shrinking = res.shrinking.unwrap();
  assert!(magnitude(&test.domains, &shrinking.shrunk) <= magnitude(&test.domains, &shrinking.first));
  assert!(shrinking.attempts <= config().shrink_limit);
}

#[test]
fn same_seed_same_result() {
  let (registry, hashes) = registry(&[BOUNDED]);
  let engine = Engine::new(&registry, Config { seed: 99, ..config() });
  let session = TestSession::new(&engine, hashes[0], Mode::Concrete).unwrap();
  let test = session.discovery.test("test_small").unwrap();
  let a = engine.fuzz_test(&session, test);
  let b = engine.fuzz_test(&session, test);
  assert_eq!(a, b);
}

#[test]
fn checked_overflow_fails() {
  let (registry, hashes) = registry(&[NARROW_ADD]);
  let wrapping = Engine::new(&registry, config()).fuzz(hashes[0]).unwrap();
  assert!(wrapping.tests[0].verdict.is_passed());

  let checked = Engine::new(&registry, Config { overflow: OverflowPolicy::Checked, ..config() }).fuzz(hashes[0]).unwrap();
  let TestVerdict::Failed(c) = &checked.tests[0].verdict else { panic!("expected a failure") };
  let (a, b) = (c.witness.get("arg0").unwrap(), c.witness.get("arg1").unwrap());
  assert!(a + b >= 1 << 32);
  assert_eq!(checked.exit_code(), 1);
}

#[test]
fn cross_contract_calls_and_storage() {
  let (registry, hashes) = registry(&[CALLER, ADDER]);
  let engine = Engine::new(&registry, config()).with_contracts(vec![("adder".to_string(), hashes[1])]);
  let report = engine.fuzz(hashes[0]).unwrap();
  let names: Vec<_> = report.tests.iter().map(|t| t.name.as_str()).collect();
  assert_eq!(names, vec!["test_invoke", "test_storage"]);
  for t in &report.tests {
    assert!(t.verdict.is_passed(), "{} {}", t.name, t.verdict);
  }
}

#[test]
fn failed_init_makes_every_test_stuck() {
  let wat = r#"(module
    (func (export "init") unreachable)
    (func (export "test_a") (result i32) (i32.const 1)))"#;
  let (registry, hashes) = registry(&[wat]);
  let report = Engine::new(&registry, config()).fuzz(hashes[0]).unwrap();
  assert!(matches!(&report.tests[0].verdict, TestVerdict::Stuck(r) if matches!(r[..], [StuckReason::InitFailed(_)])));
  assert_eq!(report.exit_code(), 2);
}

#[test]
fn rejected_signatures_are_reported() {
  let wat = r#"(module
    (func (export "test_ok") (result i32) (i32.const 1))
    (func (export "test_void")))"#;
  let (registry, hashes) = registry(&[wat]);
  let report = Engine::new(&registry, config()).fuzz(hashes[0]).unwrap();
  assert_eq!(report.tests.len(), 2);
  assert!(report.tests[0].verdict.is_passed());
  assert_eq!(report.tests[1].verdict, TestVerdict::Stuck(vec![StuckReason::InvalidTestSignature("() -> ()".to_string())]));
}
