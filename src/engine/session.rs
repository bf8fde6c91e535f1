//! The state every test of a module starts from.

use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, warn};

use super::{
  derive_seed,
  discovery::{discover, Discovery, InitFunction, INIT},
  Engine,
};
use crate::{
  address::Address,
  error::{Error, Result},
  registry::ModuleHash,
  state::{memory::PAGE_SIZE, termination::Termination, EntryCall, MachineState, Mode, Phase},
  value::Value,
};

pub struct TestSession {
  pub module: ModuleHash,
  pub mode: Mode,
  pub discovery: Discovery,
  /// The test contract deployed at [`Address::TEST`] and, unless
  /// `init_call` is set, `init` run on it.
  pub base: MachineState,
  /// A symbolic `init` call that starts every exploration.
  pub init_call: Option<EntryCall>,
  /// Why the concrete run of `init` failed.
  pub init_failure: Option<String>,
}

impl TestSession {
  /// Deploy the test contract and run `init`: concretely in concrete mode
  /// or when it has no inputs, otherwise symbolically ahead of each test.
  pub fn new(engine: &Engine, module: ModuleHash, mode: Mode) -> Result<Self> {
    let wasm = engine.registry().resolve(&module)?;
    let contracts = engine.contracts();
    let discovery = discover(&wasm, contracts.len())?;
    info!(module = %module.short(), tests = discovery.tests.len(), init = discovery.init.is_some(), "discovered tests");

    let mut base = MachineState::new(mode);
    base.deploy(Address::TEST, module, wasm, engine.config().max_memory_pages).map_err(|e| Error::InitFailed(e.to_string()))?;

    let mut session = TestSession { module, mode, discovery, base, init_call: None, init_failure: None };
    let init = match session.discovery.init.clone() {
      Some(init) => init,
      None => return Ok(session),
    };

    let mut args = session.write_contract_hashes(engine)?;
    if mode == Mode::Symbolic && !init.inputs.is_empty() {
      args.extend(init.domains.iter().enumerate().map(|(i, d)| session.base.declare(&InitFunction::arg_name(i), *d)));
      session.init_call = Some(EntryCall { address: Address::TEST, func: INIT.to_string(), args, phase: Phase::Init });
      return Ok(session);
    }

    let mut rng = StdRng::seed_from_u64(derive_seed(engine.config().seed, INIT));
    args.extend(init.domains.iter().map(|d| Value::concrete(d.ty, d.sample(&mut rng))));
    session.base.entries.push_back(EntryCall { address: Address::TEST, func: INIT.to_string(), args, phase: Phase::Init });
    let termination = engine.run_concrete(&mut session.base);
    match termination {
      Termination::Returned(_) => info!(steps = session.base.steps, "ran init"),
      t => {
        warn!(reason = %t, "init failed");
        session.init_failure = Some(t.to_string());
      }
    }
    session.base.steps = 0;
    session.base.result = None;
    Ok(session)
  }

  /// Write the manifest contracts' hashes into a fresh page of the test
  /// contract's memory, returning a pointer to each.
  fn write_contract_hashes(&mut self, engine: &Engine) -> Result<Vec<Value>> {
    let contracts = engine.contracts();
    if contracts.is_empty() {
      return Ok(Vec::new());
    }
    let instance = self.base.instance_mut(&Address::TEST).ok_or_else(|| Error::InitFailed("test contract missing".to_string()))?;
    let page = instance.memory.grow(1).ok_or_else(|| Error::InitFailed("no memory left for contract hashes".to_string()))?;
    let start = page as u64 * PAGE_SIZE;
    let mut pointers = Vec::new();
    for (i, (_, hash)) in contracts.iter().enumerate() {
      let ptr = start + 32 * i as u64;
      if !instance.memory.write_bytes(ptr, hash.as_bytes()) {
        return Err(Error::InitFailed("too many contracts for one page".to_string()));
      }
      pointers.push(Value::i32(ptr as u32));
    }
    Ok(pointers)
  }
}
