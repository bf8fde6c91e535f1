//! The instruction interpreter.
//!
//! One semantics serves both modes. Values are concrete or symbolic, and
//! every operator dispatches on the tag. Execution runs until the path ends
//! or until a conditional depends on a symbolic value. In that case the
//! interpreter stops before the instruction and reports a [`Fork`]: one
//! [`Branch`] per outcome, each with the constraint that selects it and a
//! [`Resume`] that makes the instruction's outcome concrete when applied to
//! a copy of the state.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
  address::Address,
  bytecode::{CodeOffset, Instr},
  config::Config,
  constraint::{Oracle, Unique},
  host::{HostBridge, HostOutcome},
  module::{Callee, Import, WasmModule},
  registry::Registry,
  state::{
    memory::Memory,
    termination::{Budget, InvocationError, StuckReason, Termination, Trap},
    FrameKind, Label, MachineState,
  },
  term::{BinOp, CmpOp, Term, TermRef},
  ty::ValType,
  value::{Byte, DivisionTrap, Value},
};

/// Where an instruction lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
  pub address: Address,
  pub func: u32,
  pub pc: CodeOffset,
}

/// How to continue a copy of the forked state down one branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resume {
  /// Replace the operand `depth` slots below the top with `value` and
  /// execute the instruction again.
  Replace { depth: usize, value: Value },
  /// Execute the instruction again, its trap conditions excluded.
  Guarded,
  /// The instruction traps.
  Trap(Trap),
}

impl Resume {
  /// Prepare `state` for the branch. `Some` if the branch ends the path.
  pub fn apply(self, state: &mut MachineState) -> Option<Termination> {
    match self {
      Resume::Replace { depth, value } => {
        let i = state.stack.len() - 1 - depth;
        state.stack[i] = value;
        None
      }
      Resume::Guarded => {
        state.guard_cleared = true;
        None
      }
      Resume::Trap(trap) => Some(Termination::Trapped(trap)),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
  pub constraint: TermRef,
  pub resume: Resume,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fork {
  pub location: Location,
  pub branches: Vec<Branch>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
  Fork(Fork),
  Halted(Termination),
}

impl From<Termination> for Event {
  fn from(t: Termination) -> Self {
    Event::Halted(t)
  }
}

type Step = Result<(), Event>;

/// The value of `v` if the path condition allows only one, `reason` if it
/// allows several.
pub fn concretize(oracle: &dyn Oracle, state: &MachineState, v: &Value, reason: StuckReason) -> Result<u64, Termination> {
  match v {
    Value::Concrete { bits, .. } => Ok(*bits),
    Value::Symbolic { term, .. } => match oracle.unique_value(&state.path, &state.symbols, term) {
      Unique::Value(x) => Ok(x),
      Unique::Unknown => Err(Termination::Stuck(StuckReason::SolverTimeout)),
      Unique::Many | Unique::Unsat => Err(Termination::Stuck(reason)),
    },
  }
}

fn trapped(trap: Trap) -> Event {
  Event::Halted(Termination::Trapped(trap))
}

/// The `i64` word an `invoke` returns.
fn to_word(v: &Value) -> Value {
  match v.ty() {
    ValType::I32 | ValType::F32 => v.reinterpret(ValType::I32).extend(false),
    ValType::I64 | ValType::F64 => v.reinterpret(ValType::I64),
  }
}

fn memory<'s>(state: &'s MachineState, address: &Address) -> Result<&'s Memory, Termination> {
  state.instance(address).map(|i| &i.memory).ok_or(Termination::Invocation(InvocationError::NoContract(*address)))
}

fn memory_mut<'s>(state: &'s mut MachineState, address: &Address) -> Result<&'s mut Memory, Termination> {
  state.instance_mut(address).map(|i| &mut i.memory).ok_or(Termination::Invocation(InvocationError::NoContract(*address)))
}

pub struct Interpreter<'a> {
  registry: &'a Registry,
  oracle: &'a dyn Oracle,
  config: &'a Config,
}

impl<'a> Interpreter<'a> {
  pub fn new(registry: &'a Registry, oracle: &'a dyn Oracle, config: &'a Config) -> Self {
    Interpreter { registry, oracle, config }
  }

  /// Run until the state forks or halts.
  pub fn run(&self, state: &mut MachineState) -> Event {
    loop {
      if let Err(event) = self.step(state) {
        return event;
      }
    }
  }

  /// Start the next entry call, or halt with the last entry call's result.
  fn next_entry(&self, state: &mut MachineState) -> Step {
    let entry = match state.entries.pop_front() {
      Some(entry) => entry,
      None => return Err(Event::Halted(Termination::Returned(state.result.take()))),
    };
    trace!(function = %entry.func, phase = ?entry.phase, "entry call");
    state.phase = entry.phase;
    let instance = state.instance(&entry.address).ok_or(Termination::Invocation(InvocationError::NoContract(entry.address)))?;
    let func = match instance.module.export(&entry.func) {
      Some((func, _)) => func,
      None => return Err(Termination::Invocation(InvocationError::NoSuchFunction(entry.func)).into()),
    };
    state.enter(entry.address, func, entry.args, FrameKind::Entry, self.config.max_call_depth)?;
    Ok(())
  }

  /// Execute one instruction.
  pub fn step(&self, state: &mut MachineState) -> Step {
    if state.frames.is_empty() {
      return self.next_entry(state);
    }
    if state.steps >= self.config.max_steps {
      return Err(Termination::Stuck(StuckReason::BudgetExceeded(Budget::Steps)).into());
    }
    let frame = state.frame();
    let module = frame.module.clone();
    let (address, func, pc) = (frame.address, frame.func, frame.pc);
    let instr = match module.functions[frame.code].body.get(pc) {
      Some(instr) => instr,
      None => return self.ret(state),
    };
    state.steps += 1;
    let location = || Location { address, func, pc };

    match instr {
      Instr::Unreachable => return Err(trapped(Trap::Unreachable)),
      Instr::Nop => {}
      Instr::Block { sig, end } => {
        let label = Label { arity: sig.results, height: state.stack.len() - sig.params, target: *end, is_loop: false };
        state.frame_mut().labels.push(label);
      }
      Instr::Loop { sig } => {
        let label = Label { arity: sig.params, height: state.stack.len() - sig.params, target: pc, is_loop: true };
        state.frame_mut().labels.push(label);
      }
      Instr::If { sig, otherwise, end } => {
        if !state.peek(0).is_concrete() {
          return Err(Event::Fork(self.condition_fork(state.peek(0), location())));
        }
        let cond = state.pop();
        let label = Label { arity: sig.results, height: state.stack.len() - sig.params, target: *end, is_loop: false };
        let frame = state.frame_mut();
        match (cond.as_concrete() != Some(0), otherwise) {
          (true, _) => frame.labels.push(label),
          (false, Some(otherwise)) => {
            frame.labels.push(label);
            frame.pc = *otherwise + 1;
            return Ok(());
          }
          (false, None) => {
            frame.pc = *end + 1;
            return Ok(());
          }
        }
      }
      Instr::Else { end } => {
        state.frame_mut().pc = *end;
        return Ok(());
      }
      Instr::End => {
        if state.frame_mut().labels.pop().is_none() {
          return self.ret(state);
        }
      }
      Instr::Br(depth) => return self.branch(state, *depth),
      Instr::BrIf(depth) => {
        if !state.peek(0).is_concrete() {
          return Err(Event::Fork(self.condition_fork(state.peek(0), location())));
        }
        if state.pop().as_concrete() != Some(0) {
          return self.branch(state, *depth);
        }
      }
      Instr::BrTable { targets, default } => {
        if !state.peek(0).is_concrete() {
          return Err(Event::Fork(self.table_fork(state.peek(0), targets, *default, location())));
        }
        let index = state.pop().as_concrete().unwrap_or_default() as usize;
        return self.branch(state, targets.get(index).copied().unwrap_or(*default));
      }
      Instr::Return => return self.ret(state),
      Instr::Call(callee) => {
        let arity = module.func_type(*callee).map_or(0, |ty| ty.params.len());
        let args = state.pop_n(arity);
        state.frame_mut().pc += 1;
        return self.call(state, address, &module, *callee, args);
      }
      Instr::CallIndirect { ty } => {
        let index = state.pop();
        let index = concretize(self.oracle, state, &index, StuckReason::SymbolicPointer)?;
        let callee = match module.table.get(index as usize) {
          Some(Some(callee)) => *callee,
          _ => return Err(trapped(Trap::UndefinedElement)),
        };
        let expected = &module.types[*ty as usize];
        if module.func_type(callee) != Some(expected) {
          return Err(trapped(Trap::IndirectCallTypeMismatch));
        }
        let args = state.pop_n(expected.params.len());
        state.frame_mut().pc += 1;
        return self.call(state, address, &module, callee, args);
      }
      Instr::Drop => {
        state.pop();
      }
      Instr::Select => {
        let cond = state.pop();
        let b = state.pop();
        let a = state.pop();
        state.push(Value::select(&cond, a, b));
      }
      Instr::LocalGet(i) => {
        let v = state.frame().locals[*i as usize].clone();
        state.push(v);
      }
      Instr::LocalSet(i) => {
        let v = state.pop();
        state.frame_mut().locals[*i as usize] = v;
      }
      Instr::LocalTee(i) => {
        let v = state.peek(0).clone();
        state.frame_mut().locals[*i as usize] = v;
      }
      Instr::GlobalGet(i) => {
        let v = state.instance(&address).map(|inst| inst.globals[*i as usize].clone());
        state.push(v.ok_or(Termination::Invocation(InvocationError::NoContract(address)))?);
      }
      Instr::GlobalSet(i) => {
        let v = state.pop();
        let inst = state.instance_mut(&address).ok_or(Termination::Invocation(InvocationError::NoContract(address)))?;
        inst.globals[*i as usize] = v;
      }
      Instr::Load { ty, bytes, signed, offset } => {
        let addr = state.pop();
        let base = concretize(self.oracle, state, &addr, StuckReason::SymbolicPointer)?;
        let v = memory(state, &address)?.load(base + offset, *ty, *bytes, *signed).ok_or_else(|| trapped(Trap::MemoryOutOfBounds))?;
        state.push(v);
      }
      Instr::Store { bytes, offset } => {
        let v = state.pop();
        let addr = state.pop();
        let base = concretize(self.oracle, state, &addr, StuckReason::SymbolicPointer)?;
        if !memory_mut(state, &address)?.store(base + offset, *bytes, &v) {
          return Err(trapped(Trap::MemoryOutOfBounds));
        }
      }
      Instr::MemorySize => {
        let pages = memory(state, &address)?.pages();
        state.push(Value::i32(pages));
      }
      Instr::MemoryGrow => {
        let delta = state.pop();
        let delta = concretize(self.oracle, state, &delta, StuckReason::SymbolicPointer)?;
        let old = memory_mut(state, &address)?.grow(delta as u32);
        state.push(Value::i32(old.unwrap_or(u32::MAX)));
      }
      Instr::MemoryCopy => {
        let [dst, src, len] = self.pointers(state)?;
        if !memory_mut(state, &address)?.copy(dst, src, len) {
          return Err(trapped(Trap::MemoryOutOfBounds));
        }
      }
      Instr::MemoryFill => {
        let len = state.pop();
        let val = state.pop();
        let dst = state.pop();
        let len = concretize(self.oracle, state, &len, StuckReason::SymbolicPointer)?;
        let dst = concretize(self.oracle, state, &dst, StuckReason::SymbolicPointer)?;
        let byte = match val.as_concrete() {
          Some(bits) => Byte::Concrete(bits as u8),
          None => Byte::from_term(Term::extract(7, 0, val.term())),
        };
        if !memory_mut(state, &address)?.fill(dst, byte, len) {
          return Err(trapped(Trap::MemoryOutOfBounds));
        }
      }
      Instr::Const { ty, bits } => state.push(Value::concrete(*ty, *bits)),
      Instr::Eqz(_) => {
        let v = state.pop();
        state.push(v.eqz());
      }
      Instr::Compare { op, .. } => {
        let rhs = state.pop();
        let lhs = state.pop();
        state.push(Value::compare(*op, &lhs, &rhs));
      }
      Instr::Unary { op, .. } => {
        let v = state.pop();
        state.push(Value::unary(*op, &v));
      }
      Instr::Binary { ty, op } => return self.binary(state, *ty, *op, location),
      Instr::Wrap => {
        let v = state.pop();
        state.push(v.wrap());
      }
      Instr::Extend { signed } => {
        let v = state.pop();
        state.push(v.extend(*signed));
      }
      Instr::SignExtend { from, .. } => {
        let v = state.pop();
        state.push(v.sign_extend(*from));
      }
      Instr::Reinterpret { to } => {
        let v = state.pop();
        state.push(v.reinterpret(*to));
      }
      Instr::Unsupported(name) => return Err(Termination::Stuck(StuckReason::Unsupported(name.clone())).into()),
    }
    state.frame_mut().pc += 1;
    Ok(())
  }

  /// Pop `dst`, `src` and `len` of a bulk memory instruction.
  fn pointers(&self, state: &mut MachineState) -> Result<[u64; 3], Termination> {
    let operands = state.pop_n(3);
    let mut res = [0; 3];
    for (slot, v) in res.iter_mut().zip(&operands) {
      *slot = concretize(self.oracle, state, v, StuckReason::SymbolicPointer)?;
    }
    Ok(res)
  }

  fn binary(&self, state: &mut MachineState, ty: ValType, op: BinOp, location: impl Fn() -> Location) -> Step {
    let checked = self.config.overflow.checks();
    let rhs = state.peek(0).clone();
    let lhs = state.peek(1).clone();
    if let (Some(a), Some(b)) = (lhs.as_concrete(), rhs.as_concrete()) {
      if checked.map_or(false, |signed| Value::overflows(op, ty.width(), a, b, signed)) {
        return Err(trapped(Trap::IntegerOverflow));
      }
      let v = match Value::binary(op, &lhs, &rhs) {
        Some(v) => v,
        None if b == 0 => return Err(trapped(Trap::IntegerDivideByZero)),
        None => return Err(trapped(Trap::IntegerOverflow)),
      };
      state.pop_n(2);
      state.push(v);
      state.frame_mut().pc += 1;
      return Ok(());
    }

    if !std::mem::take(&mut state.guard_cleared) {
      let mut guards: Vec<(TermRef, Trap)> = Value::division_traps(op, &lhs, &rhs)
        .into_iter()
        .map(|(c, t)| match t {
          DivisionTrap::ByZero => (c, Trap::IntegerDivideByZero),
          DivisionTrap::Overflow => (c, Trap::IntegerOverflow),
        })
        .collect();
      if let Some(signed) = checked {
        if let Some(c) = Value::overflow_condition(op, &lhs, &rhs, signed).filter(|c| c.as_bool() != Some(false)) {
          guards.push((c, Trap::IntegerOverflow));
        }
      }
      if let Some((_, trap)) = guards.iter().find(|(c, _)| c.as_bool() == Some(true)) {
        return Err(trapped(trap.clone()));
      }
      if !guards.is_empty() {
        let safe = guards.iter().map(|(c, _)| Term::not(c.clone())).reduce(Term::and).unwrap_or_else(Term::tt);
        let mut branches: Vec<Branch> =
          guards.into_iter().map(|(constraint, trap)| Branch { constraint, resume: Resume::Trap(trap) }).collect();
        branches.push(Branch { constraint: safe, resume: Resume::Guarded });
        return Err(Event::Fork(Fork { location: location(), branches }));
      }
    }

    let v = Value::binary(op, &lhs, &rhs).ok_or_else(|| trapped(Trap::IntegerDivideByZero))?;
    state.pop_n(2);
    state.push(v);
    state.frame_mut().pc += 1;
    Ok(())
  }

  /// Two branches on whether `cond` is non-zero.
  fn condition_fork(&self, cond: &Value, location: Location) -> Fork {
    let c = cond.nonzero();
    Fork {
      location,
      branches: vec![
        Branch { constraint: c.clone(), resume: Resume::Replace { depth: 0, value: Value::i32(1) } },
        Branch { constraint: Term::not(c), resume: Resume::Replace { depth: 0, value: Value::i32(0) } },
      ],
    }
  }

  /// One branch per distinct target of a `br_table`, the default covering
  /// every index past the end of the table.
  fn table_fork(&self, index: &Value, targets: &[u32], default: u32, location: Location) -> Fork {
    let idx = index.term();
    let n = targets.len() as u64;
    let mut groups: Vec<(u32, Vec<u64>, bool)> = Vec::new();
    for (i, &target) in targets.iter().enumerate() {
      match groups.iter_mut().find(|g| g.0 == target) {
        Some(g) => g.1.push(i as u64),
        None => groups.push((target, vec![i as u64], false)),
      }
    }
    match groups.iter_mut().find(|g| g.0 == default) {
      Some(g) => g.2 = true,
      None => groups.push((default, Vec::new(), true)),
    }
    let branches = groups
      .into_iter()
      .map(|(_, indices, is_default)| {
        let cases = indices.iter().map(|&i| Term::compare(CmpOp::Eq, idx.clone(), Term::constant(32, i)));
        let past_end = is_default.then(|| Term::compare(CmpOp::GeU, idx.clone(), Term::constant(32, n)));
        let constraint = cases.chain(past_end).reduce(Term::or).unwrap_or_else(Term::ff);
        let representative = indices.first().copied().unwrap_or(n);
        Branch { constraint, resume: Resume::Replace { depth: 0, value: Value::i32(representative as u32) } }
      })
      .collect();
    Fork { location, branches }
  }

  fn branch(&self, state: &mut MachineState, depth: u32) -> Step {
    let depth = depth as usize;
    let labels = state.frame().labels.len();
    if depth >= labels {
      return self.ret(state);
    }
    let index = labels - 1 - depth;
    let label = state.frame().labels[index];
    let carried = state.pop_n(label.arity);
    state.stack.truncate(label.height);
    state.stack.extend(carried);
    let frame = state.frame_mut();
    frame.labels.truncate(if label.is_loop { index + 1 } else { index });
    frame.pc = label.target + 1;
    Ok(())
  }

  fn ret(&self, state: &mut MachineState) -> Step {
    let frame = match state.frames.pop() {
      Some(frame) => frame,
      None => return Ok(()),
    };
    let results = state.pop_n(frame.arity);
    state.stack.truncate(frame.height);
    match frame.kind {
      FrameKind::Entry => state.result = results.into_iter().next(),
      FrameKind::Call => state.stack.extend(results),
      FrameKind::Invoke { record } => {
        let word = results.first().map_or_else(|| Value::i64(0), to_word);
        if let Some(r) = state.host_calls.get_mut(record) {
          r.result = Some(word.clone());
        }
        state.push(word);
      }
    }
    Ok(())
  }

  fn call(&self, state: &mut MachineState, address: Address, module: &WasmModule, func: u32, args: Vec<Value>) -> Step {
    match module.callee(func) {
      Some(Callee::Defined(_)) => state.enter(address, func, args, FrameKind::Call, self.config.max_call_depth)?,
      Some(Callee::Import(Import::Host(host), _)) => {
        let bridge = HostBridge::new(self.registry, self.oracle, self.config);
        if let HostOutcome::Return(Some(v)) = bridge.call(state, *host, args)? {
          state.push(v);
        }
      }
      Some(Callee::Import(Import::Unresolved { module, name }, _)) => {
        return Err(Termination::Invocation(InvocationError::UnresolvedImport { module: module.clone(), name: name.clone() }).into())
      }
      None => return Err(trapped(Trap::UndefinedElement)),
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::{
    config::OverflowPolicy,
    solver::Z3Oracle,
    state::{EntryCall, Mode, Phase},
    ty::Domain,
  };

  fn setup(wat: &str, func: &str, args: Vec<Value>) -> (Registry, MachineState) {
    let mut registry = Registry::new();
    let hash = registry.register(&wat::parse_str(wat).unwrap()).unwrap();
    let mut state = MachineState::new(Mode::Concrete);
    state.deploy(Address::TEST, hash, registry.resolve(&hash).unwrap(), 16).unwrap();
    state.entries.push_back(EntryCall { address: Address::TEST, func: func.to_string(), args, phase: Phase::Test });
    (registry, state)
  }

  fn run_with(config: &Config, wat: &str, func: &str, args: Vec<Value>) -> Event {
    let (registry, mut state) = setup(wat, func, args);
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    Interpreter::new(&registry, &oracle, config).run(&mut state)
  }

  fn run(wat: &str, func: &str, args: Vec<Value>) -> Event {
    run_with(&Config::default(), wat, func, args)
  }

  fn returned(v: Value) -> Event {
    Event::Halted(Termination::Returned(Some(v)))
  }

  const FAC: &str = r#"(module
    (func (export "fac") (param $n i64) (result i64) (local $acc i64)
      (local.set $acc (i64.const 1))
      (block $done
        (loop $l
          (br_if $done (i64.eqz (local.get $n)))
          (local.set $acc (i64.mul (local.get $acc) (local.get $n)))
          (local.set $n (i64.sub (local.get $n) (i64.const 1)))
          (br $l)))
      (local.get $acc)))"#;

  #[test]
  fn loops() {
    assert_eq!(run(FAC, "fac", vec![Value::i64(5)]), returned(Value::i64(120)));
    assert_eq!(run(FAC, "fac", vec![Value::i64(0)]), returned(Value::i64(1)));
  }

  #[test]
  fn recursion_and_if_else() {
    let fib = r#"(module
      (func $fib (export "fib") (param i32) (result i32)
        (if (result i32) (i32.lt_u (local.get 0) (i32.const 2))
          (then (local.get 0))
          (else (i32.add (call $fib (i32.sub (local.get 0) (i32.const 1)))
                         (call $fib (i32.sub (local.get 0) (i32.const 2))))))))"#;
    assert_eq!(run(fib, "fib", vec![Value::i32(10)]), returned(Value::i32(55)));
  }

  #[test]
  fn br_table_selects_targets() {
    let sw = r#"(module
      (func (export "sw") (param i32) (result i32)
        (block $b2 (block $b1 (block $b0 (br_table $b0 $b1 $b2 (local.get 0)))
          (return (i32.const 10)))
          (return (i32.const 11)))
        (i32.const 12)))"#;
    for (arg, res) in [(0, 10), (1, 11), (2, 12), (7, 12)] {
      assert_eq!(run(sw, "sw", vec![Value::i32(arg)]), returned(Value::i32(res)));
    }
  }

  #[test]
  fn traps() {
    let m = r#"(module (memory 1)
      (func (export "div") (param i32) (result i32) (i32.div_u (i32.const 1) (local.get 0)))
      (func (export "unreachable") unreachable)
      (func (export "oob") (result i32) (i32.load (i32.const 65534)))
      (func $rec (export "rec") (call $rec)))"#;
    assert_eq!(run(m, "div", vec![Value::i32(0)]), trapped(Trap::IntegerDivideByZero));
    assert_eq!(run(m, "unreachable", vec![]), trapped(Trap::Unreachable));
    assert_eq!(run(m, "oob", vec![]), trapped(Trap::MemoryOutOfBounds));
    assert_eq!(run(m, "rec", vec![]), trapped(Trap::CallStackExhausted));
    assert_eq!(
      run(m, "missing", vec![]),
      Event::Halted(Termination::Invocation(InvocationError::NoSuchFunction("missing".to_string())))
    );
  }

  #[test]
  fn step_budget() {
    let spin = r#"(module (func (export "spin") (loop $l (br $l))))"#;
    let config = Config { max_steps: 1000, ..Config::default() };
    assert_eq!(run_with(&config, spin, "spin", vec![]), Event::Halted(Termination::Stuck(StuckReason::BudgetExceeded(Budget::Steps))));
  }

  #[test]
  fn overflow_policy() {
    let add = r#"(module (func (export "add") (param i32 i32) (result i32) (i32.add (local.get 0) (local.get 1))))"#;
    let args = vec![Value::i32(u32::MAX), Value::i32(1)];
    assert_eq!(run(add, "add", args.clone()), returned(Value::i32(0)));
    let checked = Config { overflow: OverflowPolicy::Checked, ..Config::default() };
    assert_eq!(run_with(&checked, add, "add", args.clone()), trapped(Trap::IntegerOverflow));
    let signed = Config { overflow: OverflowPolicy::CheckedSigned, ..Config::default() };
    assert_eq!(run_with(&signed, add, "add", args), returned(Value::i32(0)));
    assert_eq!(run_with(&signed, add, "add", vec![Value::i32(i32::MAX as u32), Value::i32(1)]), trapped(Trap::IntegerOverflow));

    let neg = r#"(module (func (export "neg") (param i32) (result i32) (i32.sub (i32.const 0) (local.get 0))))"#;
    assert_eq!(run_with(&checked, neg, "neg", vec![Value::i32(5)]), trapped(Trap::IntegerOverflow));
    assert_eq!(run_with(&signed, neg, "neg", vec![Value::i32(5)]), returned(Value::i32(-5i32 as u32)));
  }

  #[test]
  fn memory_and_globals() {
    let m = r#"(module (memory 1) (global $g (mut i64) (i64.const 0))
      (func (export "f") (result i64)
        (i64.store offset=8 (i32.const 0) (i64.const 0x1122334455667788))
        (memory.fill (i32.const 32) (i32.const 0xab) (i32.const 4))
        (memory.copy (i32.const 64) (i32.const 8) (i32.const 8))
        (global.set $g (i64.load8_u (i32.const 33)))
        (drop (memory.grow (i32.const 1)))
        (i64.add (global.get $g)
          (i64.add (i64.extend_i32_u (memory.size)) (i64.load (i32.const 64))))))"#;
    assert_eq!(run(m, "f", vec![]), returned(Value::i64(0xab + 2 + 0x1122334455667788)));
  }

  #[test]
  fn globals_of_a_missing_instance() {
    let m = r#"(module (global $g (mut i32) (i32.const 0))
      (func (export "f") (global.set $g (i32.const 1))))"#;
    let (registry, mut state) = setup(m, "f", vec![]);
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    let config = Config::default();
    let interpreter = Interpreter::new(&registry, &oracle, &config);
    // enter `f`, push the constant
    assert_eq!(interpreter.step(&mut state), Ok(()));
    assert_eq!(interpreter.step(&mut state), Ok(()));
    state.instances.clear();
    assert_eq!(
      interpreter.step(&mut state),
      Err(Event::Halted(Termination::Invocation(InvocationError::NoContract(Address::TEST))))
    );
  }

  #[test]
  fn indirect_calls() {
    let m = r#"(module (type $t (func (result i32))) (table 3 funcref) (elem (i32.const 0) $a $b)
      (func $a (result i32) (i32.const 7))
      (func $b (param i32) (result i32) (local.get 0))
      (func (export "call") (param i32) (result i32) (call_indirect (type $t) (local.get 0))))"#;
    assert_eq!(run(m, "call", vec![Value::i32(0)]), returned(Value::i32(7)));
    assert_eq!(run(m, "call", vec![Value::i32(1)]), trapped(Trap::IndirectCallTypeMismatch));
    assert_eq!(run(m, "call", vec![Value::i32(2)]), trapped(Trap::UndefinedElement));
    assert_eq!(run(m, "call", vec![Value::i32(9)]), trapped(Trap::UndefinedElement));
  }

  #[test]
  fn floats_are_unsupported() {
    let m = r#"(module (func (export "f") (result f32) (f32.add (f32.const 1) (f32.const 2))))"#;
    assert_eq!(run(m, "f", vec![]), Event::Halted(Termination::Stuck(StuckReason::Unsupported("F32Add".to_string()))));
  }

  #[test]
  fn storage_host_calls() {
    let m = r#"(module
      (import "env" "storage_get" (func $get (param i64) (result i64)))
      (import "env" "storage_set" (func $set (param i64 i64)))
      (import "env" "storage_has" (func $has (param i64) (result i32)))
      (func (export "f") (result i64)
        (call $set (i64.const 1) (i64.const 41))
        (i64.add (call $get (i64.const 1)) (i64.extend_i32_u (call $has (i64.const 2))))))"#;
    let (registry, mut state) = setup(m, "f", vec![]);
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    let event = Interpreter::new(&registry, &oracle, &Config::default()).run(&mut state);
    assert_eq!(event, returned(Value::i64(41)));
    assert_eq!(state.host_calls.len(), 3);
    assert_eq!(state.host_calls[1].result, Some(Value::i64(41)));
  }

  fn symbolic(wat: &str, func: &str) -> (Registry, MachineState) {
    let (registry, mut state) = setup(wat, func, vec![Value::symbol("x", ValType::I32)]);
    state.mode = Mode::Symbolic;
    state.symbols.insert("x".to_string(), Domain::full(ValType::I32));
    (registry, state)
  }

  #[test]
  fn symbolic_condition_forks() {
    let m = r#"(module (func (export "f") (param i32) (result i32)
      (if (result i32) (local.get 0) (then (i32.const 1)) (else (i32.const 2)))))"#;
    let (registry, mut state) = symbolic(m, "f");
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    let config = Config::default();
    let interp = Interpreter::new(&registry, &oracle, &config);
    let fork = match interp.run(&mut state) {
      Event::Fork(fork) => fork,
      other => panic!("expected a fork, got {:?}", other),
    };
    assert_eq!(fork.location, Location { address: Address::TEST, func: 0, pc: 1 });
    assert_eq!(fork.branches.len(), 2);
    let mut results = Vec::new();
    for branch in fork.branches {
      let mut child = state.clone();
      child.path &= branch.constraint;
      assert_eq!(branch.resume.apply(&mut child), None);
      results.push(interp.run(&mut child));
    }
    assert_eq!(results, vec![returned(Value::i32(1)), returned(Value::i32(2))]);
  }

  #[test]
  fn symbolic_divisor_forks_on_trap() {
    let m = r#"(module (func (export "f") (param i32) (result i32) (i32.div_u (i32.const 7) (local.get 0))))"#;
    let (registry, mut state) = symbolic(m, "f");
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    let config = Config::default();
    let interp = Interpreter::new(&registry, &oracle, &config);
    let fork = match interp.run(&mut state) {
      Event::Fork(fork) => fork,
      other => panic!("expected a fork, got {:?}", other),
    };
    let resumes: Vec<_> = fork.branches.iter().map(|b| b.resume.clone()).collect();
    assert_eq!(resumes, vec![Resume::Trap(Trap::IntegerDivideByZero), Resume::Guarded]);
    let mut child = state.clone();
    assert_eq!(Resume::Guarded.apply(&mut child), None);
    assert!(matches!(interp.run(&mut child), Event::Halted(Termination::Returned(Some(Value::Symbolic { .. })))));
  }

  #[test]
  fn symbolic_table_index_groups_targets() {
    let m = r#"(module (func (export "f") (param i32) (result i32)
      (block $b2 (block $b1 (block $b0 (br_table $b0 $b1 $b0 $b2 (local.get 0)))
        (return (i32.const 10)))
        (return (i32.const 11)))
      (i32.const 12)))"#;
    let (registry, mut state) = symbolic(m, "f");
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    let config = Config::default();
    let interp = Interpreter::new(&registry, &oracle, &config);
    let fork = match interp.run(&mut state) {
      Event::Fork(fork) => fork,
      other => panic!("expected a fork, got {:?}", other),
    };
    assert_eq!(fork.branches.len(), 3);
    let x = |v: u64| crate::constraint::Witness(vec![("x".to_string(), v)].into_iter().collect());
    let hits = |b: &Branch, v: u64| x(v).eval(&b.constraint) == Some(1);
    assert!(hits(&fork.branches[0], 0) && hits(&fork.branches[0], 2) && !hits(&fork.branches[0], 1));
    assert!(hits(&fork.branches[1], 1));
    assert!(hits(&fork.branches[2], 3) && hits(&fork.branches[2], 100) && !hits(&fork.branches[2], 2));
  }

  #[test]
  fn symbolic_pointer_with_many_values_is_stuck() {
    let m = r#"(module (memory 1) (func (export "f") (param i32) (result i32) (i32.load (local.get 0))))"#;
    let (registry, mut state) = symbolic(m, "f");
    let oracle = Z3Oracle::new(Duration::from_secs(5), None);
    let event = Interpreter::new(&registry, &oracle, &Config::default()).run(&mut state);
    assert_eq!(event, Event::Halted(Termination::Stuck(StuckReason::SymbolicPointer)));
  }
}
