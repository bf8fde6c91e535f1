//! Machine states.

use std::{
  collections::{BTreeMap, VecDeque},
  fmt,
  sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
  address::Address,
  bytecode::CodeOffset,
  constraint::{PathCondition, Symbols},
  host::HostCallRecord,
  module::{Callee, WasmModule},
  registry::ModuleHash,
  ty::Domain,
  value::Value,
};

pub mod memory;
pub mod storage;
pub mod termination;

use memory::Memory;
use storage::Storage;
use termination::{DeploymentError, InvocationError, Termination, Trap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  Concrete,
  Symbolic,
}

/// Which entry call a state is executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Setup,
  Init,
  Test,
}

/// A deployed contract.
#[derive(Clone, Debug)]
pub struct Instance {
  pub hash: ModuleHash,
  pub module: Arc<WasmModule>,
  pub memory: Memory,
  pub globals: Vec<Value>,
}

/// A structured control instruction being executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label {
  /// Values a branch to the label carries.
  pub arity: usize,
  /// Operand stack height below the block's parameters.
  pub height: usize,
  /// For a loop, the loop instruction; otherwise its `end`.
  pub target: CodeOffset,
  pub is_loop: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
  /// Called by the engine; the result becomes the state's result.
  Entry,
  /// Called by `call`, `call_indirect` or a module's start function.
  Call,
  /// Called through the `invoke` host function; the result is returned
  /// to the caller as an `i64` word and written to host call record
  /// `record`.
  Invoke { record: usize },
}

#[derive(Clone, Debug)]
pub struct Frame {
  pub address: Address,
  pub module: Arc<WasmModule>,
  /// Function index.
  pub func: u32,
  /// Index among the module's defined functions.
  pub code: usize,
  pub pc: CodeOffset,
  pub locals: Vec<Value>,
  pub labels: Vec<Label>,
  /// Operand stack height at entry.
  pub height: usize,
  pub arity: usize,
  pub kind: FrameKind,
}

/// A call the engine makes once the call stack is empty.
#[derive(Clone, Debug)]
pub struct EntryCall {
  pub address: Address,
  pub func: String,
  pub args: Vec<Value>,
  pub phase: Phase,
}

#[derive(Clone, Debug)]
pub struct MachineState {
  pub mode: Mode,
  pub instances: BTreeMap<Address, Instance>,
  pub storage: Storage,
  pub stack: Vec<Value>,
  pub frames: Vec<Frame>,
  pub path: PathCondition,
  pub symbols: Symbols,
  pub host_calls: Vec<HostCallRecord>,
  pub entries: VecDeque<EntryCall>,
  pub phase: Phase,
  /// Result of the last entry call that returned.
  pub result: Option<Value>,
  pub steps: u64,
  /// Number of forks along the path.
  pub depth: usize,
  /// Set when resuming an instruction whose trap conditions have been
  /// ruled out by the path condition.
  pub guard_cleared: bool,
}

impl MachineState {
  pub fn new(mode: Mode) -> Self {
    MachineState {
      mode,
      instances: BTreeMap::new(),
      storage: Storage::default(),
      stack: Vec::new(),
      frames: Vec::new(),
      path: PathCondition::new(),
      symbols: Symbols::new(),
      host_calls: Vec::new(),
      entries: VecDeque::new(),
      phase: Phase::Setup,
      result: None,
      steps: 0,
      depth: 0,
      guard_cleared: false,
    }
  }

  /// Instantiate `module` at `address`: fresh memory with its data
  /// segments, globals at their initial values and an empty storage
  /// partition.
  pub fn deploy(&mut self, address: Address, hash: ModuleHash, module: Arc<WasmModule>, page_cap: u32) -> Result<(), DeploymentError> {
    if self.instances.contains_key(&address) {
      return Err(DeploymentError::AddressInUse(address));
    }
    let memory = Memory::instantiate(module.memory.unwrap_or_default(), page_cap, &module.data).ok_or(DeploymentError::DataOutOfBounds)?;
    let globals = module.globals.iter().map(|g| Value::concrete(g.ty, g.init)).collect();
    self.instances.insert(address, Instance { hash, module, memory, globals });
    Ok(())
  }

  pub fn instance(&self, address: &Address) -> Option<&Instance> {
    self.instances.get(address)
  }

  pub fn instance_mut(&mut self, address: &Address) -> Option<&mut Instance> {
    self.instances.get_mut(address)
  }

  /// Address of the executing contract.
  pub fn current_address(&self) -> Option<Address> {
    self.frames.last().map(|f| f.address)
  }

  /// Register a symbolic variable.
  pub fn declare(&mut self, name: &str, domain: Domain) -> Value {
    self.symbols.insert(name.to_string(), domain);
    Value::symbol(name, domain.ty)
  }

  /// The executing frame. Only called while a call is in progress.
  pub fn frame(&self) -> &Frame {
    self.frames.last().expect("no active frame")
  }

  pub fn frame_mut(&mut self) -> &mut Frame {
    self.frames.last_mut().expect("no active frame")
  }

  pub fn push(&mut self, v: Value) {
    self.stack.push(v);
  }

  pub fn pop(&mut self) -> Value {
    self.stack.pop().expect("operand stack underflow in validated code")
  }

  pub fn peek(&self, depth: usize) -> &Value {
    &self.stack[self.stack.len() - 1 - depth]
  }

  /// Pop the top `n` values, in push order.
  pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
    self.stack.split_off(self.stack.len() - n)
  }

  /// Push a frame for function `func` of the contract at `address`.
  pub fn enter(&mut self, address: Address, func: u32, mut args: Vec<Value>, kind: FrameKind, max_call_depth: usize) -> Result<(), Termination> {
    if self.frames.len() >= max_call_depth {
      return Err(Termination::Trapped(Trap::CallStackExhausted));
    }
    let module = match self.instances.get(&address) {
      Some(instance) => instance.module.clone(),
      None => return Err(Termination::Invocation(InvocationError::NoContract(address))),
    };
    let f = match module.callee(func) {
      Some(Callee::Defined(f)) => f,
      _ => return Err(Termination::Trapped(Trap::UndefinedElement)),
    };
    args.extend(f.locals.iter().map(|&ty| Value::zero(ty)));
    let frame = Frame {
      address,
      func,
      code: func as usize - module.imports.len(),
      pc: 0,
      locals: args,
      labels: Vec::new(),
      height: self.stack.len(),
      arity: f.ty.results.len(),
      kind,
      module: module.clone(),
    };
    self.frames.push(frame);
    Ok(())
  }
}

impl fmt::Display for MachineState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    writeln!(f, "phase: {:?}, steps: {}, depth: {}", self.phase, self.steps, self.depth)?;
    writeln!(f, "path: {}", self.path)?;
    for frame in self.frames.iter().rev() {
      writeln!(f, "  at {} func {} pc {}", frame.address.short(), frame.func, frame.pc)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{module::WasmModule, ty::ValType};

  fn module(wat: &str) -> Arc<WasmModule> {
    Arc::new(WasmModule::parse(&wat::parse_str(wat).unwrap()).unwrap())
  }

  #[test]
  fn deploy_and_enter() {
    let m = module(r#"(module (memory 1) (data (i32.const 0) "\01") (global i32 (i32.const 5)) (func (param i32) (local i64)))"#);
    let mut s = MachineState::new(Mode::Concrete);
    let a = Address([1; 32]);
    s.deploy(a, ModuleHash::default(), m.clone(), 16).unwrap();
    assert_eq!(s.deploy(a, ModuleHash::default(), m, 16), Err(DeploymentError::AddressInUse(a)));
    assert_eq!(s.instance(&a).unwrap().globals, vec![Value::i32(5)]);
    assert_eq!(s.instance(&a).unwrap().memory.read_concrete(0, 1), Ok(vec![1]));
    s.enter(a, 0, vec![Value::i32(3)], FrameKind::Entry, 8).unwrap();
    assert_eq!(s.frames[0].locals, vec![Value::i32(3), Value::zero(ValType::I64)]);
    assert_eq!(s.current_address(), Some(a));
    assert_eq!(
      s.enter(Address([2; 32]), 0, vec![], FrameKind::Call, 8),
      Err(Termination::Invocation(InvocationError::NoContract(Address([2; 32]))))
    );
    assert_eq!(s.enter(a, 0, vec![Value::i32(3)], FrameKind::Call, 1), Err(Termination::Trapped(Trap::CallStackExhausted)));
  }
}
