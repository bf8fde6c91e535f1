//! Running tests: discovery, fuzzing, proving and replay.

use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};
use sha2::{Digest, Sha256};

use crate::{
  address::Address,
  config::Config,
  constraint::Witness,
  dynamic::{Event, Interpreter},
  error::{Error, Result},
  registry::{ModuleHash, Registry},
  solver::Z3Oracle,
  state::{
    termination::{StuckReason, Termination},
    EntryCall, MachineState, Mode, Phase,
  },
  ty::Domain,
  value::Value,
  verdict::Counterexample,
};

pub mod discovery;
pub mod fuzz;
pub mod prove;
pub mod session;
pub mod shrink;

use discovery::{InitFunction, TestFunction};
use session::TestSession;

/// How a single concrete run of a test ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
  Passed,
  Failed(String),
  Stuck(StuckReason),
}

impl Outcome {
  pub fn classify(termination: &Termination, phase: Phase) -> Outcome {
    match termination {
      Termination::Returned(Some(v)) => match v.as_concrete() {
        Some(0) => Outcome::Failed("returned 0".to_string()),
        Some(_) => Outcome::Passed,
        None => Outcome::Stuck(StuckReason::Unsupported(format!("symbolic result {}", v))),
      },
      Termination::Returned(None) => Outcome::Failed("returned no value".to_string()),
      Termination::Stuck(reason) => Outcome::Stuck(reason.clone()),
      t if phase != Phase::Test => Outcome::Stuck(StuckReason::InitFailed(t.to_string())),
      t => Outcome::Failed(t.to_string()),
    }
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, Outcome::Failed(_))
  }
}

/// PRNG seed of a named stream.
pub fn derive_seed(seed: u64, name: &str) -> u64 {
  let digest = Sha256::digest(name.as_bytes());
  let mut bytes = [0; 8];
  bytes.copy_from_slice(&digest[..8]);
  seed ^ u64::from_le_bytes(bytes)
}

pub struct Engine<'a> {
  registry: &'a Registry,
  config: Config,
  /// Manifest contracts whose hashes `init` receives.
  contracts: Vec<(String, ModuleHash)>,
}

impl<'a> Engine<'a> {
  pub fn new(registry: &'a Registry, config: Config) -> Self {
    Engine { registry, config, contracts: Vec::new() }
  }

  pub fn with_contracts(mut self, contracts: Vec<(String, ModuleHash)>) -> Self {
    self.contracts = contracts;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn registry(&self) -> &'a Registry {
    self.registry
  }

  pub fn contracts(&self) -> &[(String, ModuleHash)] {
    &self.contracts
  }

  pub fn pool(&self) -> Result<ThreadPool> {
    ThreadPoolBuilder::new().num_threads(self.config.jobs).build().map_err(|e| Error::Config(e.to_string()))
  }

  /// An oracle whose queries end by `deadline` at the latest.
  pub fn oracle(&self, deadline: Option<Instant>) -> Z3Oracle {
    Z3Oracle::new(self.config.solver_timeout(), deadline)
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.config.deadline().map(|d: Duration| Instant::now() + d)
  }

  /// Run entry calls to completion on a concrete state.
  pub(crate) fn run_concrete(&self, state: &mut MachineState) -> Termination {
    let oracle = self.oracle(None);
    match Interpreter::new(self.registry, &oracle, &self.config).run(state) {
      Event::Halted(t) => t,
      Event::Fork(fork) => Termination::Stuck(StuckReason::Unsupported(format!("fork at pc {} of a concrete run", fork.location.pc))),
    }
  }

  /// Concrete arguments of `test` under `witness`; missing variables take
  /// the domain origin.
  fn witness_args(names: impl Iterator<Item = String>, domains: &[Domain], witness: &Witness) -> Vec<Value> {
    names.zip(domains).map(|(name, d)| Value::concrete(d.ty, witness.get(&name).unwrap_or_else(|| d.origin()))).collect()
  }

  /// Run `test` concretely with inputs read from `witness`, in fuzzing
  /// semantics. Symbolic `init` inputs are read from the witness as well.
  pub fn replay(&self, session: &TestSession, test: &str, witness: &Witness) -> Result<Outcome> {
    let test = session.discovery.test(test).ok_or_else(|| Error::UnknownTest(test.to_string()))?;
    let mut state = session.base.clone();
    state.mode = Mode::Concrete;
    state.symbols.clear();
    if let (Some(init), Some(call)) = (&session.discovery.init, &session.init_call) {
      let names = (0..init.inputs.len()).map(InitFunction::arg_name);
      let inputs = Self::witness_args(names, &init.domains, witness);
      let mut args = call.args[..call.args.len() - inputs.len()].to_vec();
      args.extend(inputs);
      state.entries.push_back(EntryCall { args, ..call.clone() });
    }
    let args = Self::witness_args((0..test.params.len()).map(TestFunction::arg_name), &test.domains, witness);
    state.entries.push_back(EntryCall { address: Address::TEST, func: test.name.clone(), args, phase: Phase::Test });
    let termination = self.run_concrete(&mut state);
    Ok(Outcome::classify(&termination, state.phase))
  }

  /// Render a witness as a counterexample of `test`.
  pub(crate) fn counterexample(test: &TestFunction, witness: Witness, outcome: String) -> Counterexample {
    let args = test
      .domains
      .iter()
      .enumerate()
      .map(|(i, d)| d.display_value(witness.get(&TestFunction::arg_name(i)).unwrap_or_else(|| d.origin())))
      .collect();
    Counterexample { witness, args, outcome }
  }
}
