//! Fuzzing: concrete runs on random inputs.

use std::collections::BTreeSet;

use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use super::{
  derive_seed,
  discovery::TestFunction,
  session::TestSession,
  shrink::{magnitude, shrink},
  Engine, Outcome,
};
use crate::{
  address::Address,
  constraint::Witness,
  error::Result,
  report::{Report, TestReport},
  state::{termination::StuckReason, EntryCall, Mode, Phase},
  value::Value,
  verdict::{Guarantee, TestVerdict},
};

/// A failing input before and after shrinking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shrinking {
  pub first: Vec<u64>,
  pub shrunk: Vec<u64>,
  pub attempts: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuzzResult {
  pub test: String,
  pub verdict: TestVerdict,
  pub iterations: u64,
  pub shrinking: Option<Shrinking>,
}

impl<'a> Engine<'a> {
  /// Run `test` once on `input`.
  pub fn run_input(&self, session: &TestSession, test: &TestFunction, input: &[u64]) -> Outcome {
    let mut state = session.base.clone();
    let args = test.domains.iter().zip(input).map(|(d, &v)| Value::concrete(d.ty, v)).collect();
    state.entries.push_back(EntryCall { address: Address::TEST, func: test.name.clone(), args, phase: Phase::Test });
    let termination = self.run_concrete(&mut state);
    Outcome::classify(&termination, state.phase)
  }

  pub fn fuzz_test(&self, session: &TestSession, test: &TestFunction) -> FuzzResult {
    let result = |verdict, iterations, shrinking| FuzzResult { test: test.name.clone(), verdict, iterations, shrinking };
    if let Some(failure) = &session.init_failure {
      return result(TestVerdict::Stuck(vec![StuckReason::InitFailed(failure.clone())]), 0, None);
    }

    let mut rng = StdRng::seed_from_u64(derive_seed(self.config().seed, &test.name));
    let mut stuck = BTreeSet::new();
    for iteration in 1..=self.config().iterations {
      let input: Vec<u64> = test.domains.iter().map(|d| d.sample(&mut rng)).collect();
      match self.run_input(session, test, &input) {
        Outcome::Passed => {}
        Outcome::Stuck(reason) => {
          debug!(test = %test.name, iteration, %reason, "stuck iteration");
          stuck.insert(reason);
        }
        Outcome::Failed(_) => {
          info!(test = %test.name, iteration, "found a failing input, shrinking");
          let shrunk = shrink(&test.domains, input.clone(), self.config().shrink_limit, |candidate| {
            self.run_input(session, test, candidate).is_failed()
          });
          debug!(before = magnitude(&test.domains, &input) as u64, after = magnitude(&test.domains, &shrunk.input) as u64, "shrunk");
          let outcome = match self.run_input(session, test, &shrunk.input) {
            Outcome::Failed(outcome) => outcome,
            other => format!("{:?}", other),
          };
          let witness = Witness((0..input.len()).map(TestFunction::arg_name).zip(shrunk.input.iter().copied()).collect());
          let counterexample = Engine::counterexample(test, witness, outcome);
          let shrinking = Shrinking { first: input, shrunk: shrunk.input, attempts: shrunk.attempts };
          return result(TestVerdict::Failed(counterexample), iteration, Some(shrinking));
        }
      }
    }
    let iterations = self.config().iterations;
    if stuck.is_empty() {
      result(TestVerdict::Passed(Guarantee::Fuzzed { iterations }), iterations, None)
    } else {
      result(TestVerdict::Stuck(stuck.into_iter().collect()), iterations, None)
    }
  }

  /// Fuzz every test of the module, in parallel.
  pub fn fuzz(&self, module: crate::registry::ModuleHash) -> Result<Report> {
    let session = TestSession::new(self, module, Mode::Concrete)?;
    let pool = self.pool()?;
    let results: Vec<FuzzResult> = pool.install(|| session.discovery.tests.par_iter().map(|t| self.fuzz_test(&session, t)).collect());
    let mut report = Report::new(Mode::Concrete, module);
    for r in results {
      info!(test = %r.test, verdict = %r.verdict, "fuzzed");
      report.tests.push(TestReport { iterations: Some(r.iterations), ..TestReport::new(r.test, r.verdict) });
    }
    report.reject(&session.discovery.rejected);
    Ok(report)
  }
}
