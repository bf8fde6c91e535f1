//! The contract-host ABI.
//!
//! Contracts import these functions from module `env`. An import whose name
//! and signature match an entry of the ABI is bound to a [`HostFunction`] when
//! the module is registered; calls reach the host through [`HostBridge`].

use std::{collections::BTreeMap, fmt};

use itertools::Itertools;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
  address::Address,
  config::Config,
  constraint::Oracle,
  dynamic::concretize,
  module::Callee,
  registry::{ModuleHash, Registry},
  state::{
    memory::ReadError,
    termination::{DeploymentError, InvocationError, StuckReason, Termination, Trap},
    FrameKind, MachineState,
  },
  ty::{FuncType, ValType},
  value::Value,
};

pub const HOST_MODULE: &str = "env";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFunction {
  CreateContract,
  StorageGet,
  StorageSet,
  StorageHas,
  Invoke,
}

static ABI: Lazy<BTreeMap<HostFunction, FuncType>> = Lazy::new(|| {
  use ValType::*;
  vec![
    (HostFunction::CreateContract, FuncType::new(vec![I32, I32], vec![])),
    (HostFunction::StorageGet, FuncType::new(vec![I64], vec![I64])),
    (HostFunction::StorageSet, FuncType::new(vec![I64, I64], vec![])),
    (HostFunction::StorageHas, FuncType::new(vec![I64], vec![I32])),
    (HostFunction::Invoke, FuncType::new(vec![I32, I32, I32, I32, I32], vec![I64])),
  ]
  .into_iter()
  .collect()
});

impl HostFunction {
  pub const ALL: [HostFunction; 5] =
    [HostFunction::CreateContract, HostFunction::StorageGet, HostFunction::StorageSet, HostFunction::StorageHas, HostFunction::Invoke];

  /// Bind an import to the host function of that name, if the signature
  /// matches exactly.
  pub fn resolve(module: &str, name: &str, ty: &FuncType) -> Option<Self> {
    if module != HOST_MODULE {
      return None;
    }
    Self::ALL.iter().copied().find(|f| f.name() == name && f.signature() == ty)
  }

  pub fn name(self) -> &'static str {
    match self {
      HostFunction::CreateContract => "create_contract",
      HostFunction::StorageGet => "storage_get",
      HostFunction::StorageSet => "storage_set",
      HostFunction::StorageHas => "storage_has",
      HostFunction::Invoke => "invoke",
    }
  }

  pub fn signature(self) -> &'static FuncType {
    &ABI[&self]
  }
}

impl fmt::Display for HostFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// One host call made by a contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostCallRecord {
  pub caller: Address,
  pub function: HostFunction,
  pub args: Vec<Value>,
  /// For `invoke`, filled in when the callee returns.
  pub result: Option<Value>,
}

impl fmt::Display for HostCallRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}({})", self.caller.short(), self.function, self.args.iter().format(", "))?;
    if let Some(result) = &self.result {
      write!(f, " -> {}", result)?;
    }
    Ok(())
  }
}

pub enum HostOutcome {
  /// The call completed, with the value to push if any.
  Return(Option<Value>),
  /// A frame was pushed; its return completes the call.
  Enter,
}

/// The only way contract code reaches deployment, storage and other
/// contracts.
pub struct HostBridge<'a> {
  registry: &'a Registry,
  oracle: &'a dyn Oracle,
  config: &'a Config,
}

impl<'a> HostBridge<'a> {
  pub fn new(registry: &'a Registry, oracle: &'a dyn Oracle, config: &'a Config) -> Self {
    HostBridge { registry, oracle, config }
  }

  pub fn call(&self, state: &mut MachineState, function: HostFunction, args: Vec<Value>) -> Result<HostOutcome, Termination> {
    let caller = state.current_address().unwrap_or_default();
    trace!(caller = %caller.short(), %function, args = %args.iter().format(", "), "host call");
    let record = state.host_calls.len();
    state.host_calls.push(HostCallRecord { caller, function, args: args.clone(), result: None });
    let outcome = match function {
      HostFunction::CreateContract => self.create_contract(state, caller, &args)?,
      HostFunction::StorageGet => HostOutcome::Return(Some(state.storage.get(&caller, &args[0]))),
      HostFunction::StorageSet => {
        state.storage.set(caller, &args[0], args[1].clone());
        HostOutcome::Return(None)
      }
      HostFunction::StorageHas => HostOutcome::Return(Some(state.storage.has(&caller, &args[0]))),
      HostFunction::Invoke => self.invoke(state, caller, &args, record)?,
    };
    if let HostOutcome::Return(Some(v)) = &outcome {
      state.host_calls[record].result = Some(v.clone());
    }
    Ok(outcome)
  }

  fn create_contract(&self, state: &mut MachineState, caller: Address, args: &[Value]) -> Result<HostOutcome, Termination> {
    let addr_ptr = concretize(self.oracle, state, &args[0], StuckReason::NonConcreteAddress)?;
    let hash_ptr = concretize(self.oracle, state, &args[1], StuckReason::NonConcreteAddress)?;
    let address = Address(read_word(state, caller, addr_ptr)?);
    let hash = ModuleHash(read_word(state, caller, hash_ptr)?);
    let module = self.registry.resolve(&hash).map_err(|_| Termination::Deployment(DeploymentError::UnknownModule(hash)))?;
    state.deploy(address, hash, module.clone(), self.config.max_memory_pages).map_err(Termination::Deployment)?;
    debug!(address = %address.short(), module = %hash.short(), "deployed contract");
    match module.start {
      Some(start) => {
        state.enter(address, start, Vec::new(), FrameKind::Call, self.config.max_call_depth)?;
        Ok(HostOutcome::Enter)
      }
      None => Ok(HostOutcome::Return(None)),
    }
  }

  fn invoke(&self, state: &mut MachineState, caller: Address, args: &[Value], record: usize) -> Result<HostOutcome, Termination> {
    let addr_ptr = concretize(self.oracle, state, &args[0], StuckReason::NonConcreteAddress)?;
    let name_ptr = concretize(self.oracle, state, &args[1], StuckReason::NonConcreteAddress)?;
    let name_len = concretize(self.oracle, state, &args[2], StuckReason::NonConcreteAddress)?;
    let args_ptr = concretize(self.oracle, state, &args[3], StuckReason::SymbolicPointer)?;
    let args_len = concretize(self.oracle, state, &args[4], StuckReason::SymbolicPointer)?;

    let address = Address(read_word(state, caller, addr_ptr)?);
    let name = String::from_utf8_lossy(&read_bytes(state, caller, name_ptr, name_len)?).into_owned();

    let callee = state.instance(&address).ok_or(Termination::Invocation(InvocationError::NoContract(address)))?;
    let (func, ty) = match callee.module.export(&name) {
      Some((func, ty)) if matches!(callee.module.callee(func), Some(Callee::Defined(_))) => (func, ty.clone()),
      _ => return Err(Termination::Invocation(InvocationError::NoSuchFunction(name))),
    };
    let typed = ty.params.iter().chain(&ty.results).all(|t| t.is_int());
    if !typed || ty.results.len() > 1 || ty.params.len() as u64 != args_len {
      return Err(Termination::Invocation(InvocationError::SignatureMismatch(name)));
    }

    let memory = &instance_of(state, caller)?.memory;
    let mut params = Vec::with_capacity(ty.params.len());
    for (i, param) in ty.params.iter().enumerate() {
      let word = memory.load(args_ptr + 8 * i as u64, ValType::I64, 8, false).ok_or(Termination::Trapped(Trap::MemoryOutOfBounds))?;
      params.push(if *param == ValType::I32 { word.wrap() } else { word });
    }
    debug!(from = %caller.short(), to = %address.short(), function = %name, "invoke");
    state.enter(address, func, params, FrameKind::Invoke { record }, self.config.max_call_depth)?;
    Ok(HostOutcome::Enter)
  }
}

fn instance_of(state: &MachineState, address: Address) -> Result<&crate::state::Instance, Termination> {
  state.instance(&address).ok_or(Termination::Invocation(InvocationError::NoContract(address)))
}

fn read_bytes(state: &MachineState, address: Address, ptr: u64, len: u64) -> Result<Vec<u8>, Termination> {
  instance_of(state, address)?.memory.read_concrete(ptr, len).map_err(|e| match e {
    ReadError::OutOfBounds => Termination::Trapped(Trap::MemoryOutOfBounds),
    ReadError::NonConcrete => Termination::Stuck(StuckReason::NonConcreteAddress),
  })
}

fn read_word(state: &MachineState, address: Address, ptr: u64) -> Result<[u8; 32], Termination> {
  let bytes = read_bytes(state, address, ptr, 32)?;
  let mut word = [0; 32];
  word.copy_from_slice(&bytes);
  Ok(word)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolves_exact_signatures_only() {
    use ValType::*;
    assert_eq!(HostFunction::resolve("env", "storage_get", &FuncType::new(vec![I64], vec![I64])), Some(HostFunction::StorageGet));
    assert_eq!(HostFunction::resolve("env", "storage_get", &FuncType::new(vec![I32], vec![I64])), None);
    assert_eq!(HostFunction::resolve("other", "storage_get", &FuncType::new(vec![I64], vec![I64])), None);
    assert_eq!(
      HostFunction::resolve("env", "invoke", &FuncType::new(vec![I32; 5], vec![I64])),
      Some(HostFunction::Invoke)
    );
  }

  #[test]
  fn record_display() {
    let r = HostCallRecord {
      caller: Address([0xab; 32]),
      function: HostFunction::StorageGet,
      args: vec![Value::i64(1)],
      result: Some(Value::i64(10)),
    };
    assert_eq!(r.to_string(), "abababab storage_get(1:i64) -> 10:i64");
  }
}
