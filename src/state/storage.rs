//! Contract storage.
//!
//! Storage is partitioned by contract address. While every key written to a
//! partition is concrete, reads are map lookups. Once a symbolic key has been
//! written, later writes are kept in order and a read folds them into an
//! if-then-else term, most recent write outermost, so reading never forks.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
  address::Address,
  term::{CmpOp, Term, TermRef},
  ty::ValType,
  value::Value,
};

#[derive(Clone, Debug, Default)]
pub struct Partition {
  /// Writes with concrete keys made before the first symbolic key.
  cells: BTreeMap<u64, Value>,
  /// Every write from the first symbolic key on, oldest first.
  log: Vec<(TermRef, Value)>,
}

impl Partition {
  fn is_concrete(&self) -> bool {
    self.log.is_empty()
  }

  pub fn set(&mut self, key: &Value, value: Value) {
    match key.as_concrete() {
      Some(k) if self.is_concrete() => {
        self.cells.insert(k, value);
      }
      _ => self.log.push((key.term(), value)),
    }
  }

  /// Fold the log over `base`, which is what the cells give for `key`.
  fn fold(&self, key: &TermRef, base: TermRef, hit: impl Fn(&Value) -> TermRef) -> TermRef {
    self.log.iter().fold(base, |acc, (k, v)| Term::ite(Term::compare(CmpOp::Eq, key.clone(), k.clone()), hit(v), acc))
  }

  fn cells_term(&self, key: &TermRef, hit: impl Fn(&Value) -> TermRef, miss: TermRef) -> TermRef {
    match key.as_const() {
      Some(k) => self.cells.get(&k).map_or(miss, hit),
      None => self.cells.iter().fold(miss, |acc, (k, v)| {
        Term::ite(Term::compare(CmpOp::Eq, key.clone(), Term::constant(64, *k)), hit(v), acc)
      }),
    }
  }

  pub fn get(&self, key: &Value) -> Value {
    if let (Some(k), true) = (key.as_concrete(), self.is_concrete()) {
      return self.cells.get(&k).cloned().unwrap_or_else(|| Value::zero(ValType::I64));
    }
    let key = key.term();
    let base = self.cells_term(&key, Value::term, Term::constant(64, 0));
    Value::from_term(ValType::I64, self.fold(&key, base, Value::term))
  }

  pub fn has(&self, key: &Value) -> Value {
    if let (Some(k), true) = (key.as_concrete(), self.is_concrete()) {
      return Value::bool(self.cells.contains_key(&k));
    }
    let key = key.term();
    let one = |_: &Value| Term::constant(32, 1);
    let base = self.cells_term(&key, one, Term::constant(32, 0));
    Value::from_term(ValType::I32, self.fold(&key, base, one))
  }

  pub fn len(&self) -> usize {
    self.cells.len() + self.log.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Storage of every deployed contract, shared between forked states until
/// written.
#[derive(Clone, Debug, Default)]
pub struct Storage {
  partitions: BTreeMap<Address, Arc<Partition>>,
}

impl Storage {
  pub fn get(&self, addr: &Address, key: &Value) -> Value {
    match self.partitions.get(addr) {
      Some(p) => p.get(key),
      None => Value::zero(ValType::I64),
    }
  }

  pub fn has(&self, addr: &Address, key: &Value) -> Value {
    match self.partitions.get(addr) {
      Some(p) => p.has(key),
      None => Value::bool(false),
    }
  }

  pub fn set(&mut self, addr: Address, key: &Value, value: Value) {
    Arc::make_mut(self.partitions.entry(addr).or_default()).set(key, value);
  }

  pub fn partition(&self, addr: &Address) -> Option<&Partition> {
    self.partitions.get(addr).map(Arc::as_ref)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::term::Evaluated;

  const A: Address = Address([1; 32]);
  const B: Address = Address([2; 32]);

  #[test]
  fn concrete_keys() {
    let mut s = Storage::default();
    s.set(A, &Value::i64(1), Value::i64(10));
    assert_eq!(s.get(&A, &Value::i64(1)), Value::i64(10));
    assert_eq!(s.get(&A, &Value::i64(2)), Value::i64(0));
    assert_eq!(s.has(&A, &Value::i64(1)), Value::i32(1));
    assert_eq!(s.has(&A, &Value::i64(2)), Value::i32(0));
    // partitions are separate
    assert_eq!(s.get(&B, &Value::i64(1)), Value::i64(0));
  }

  #[test]
  fn symbolic_keys_read_as_ite() {
    let mut s = Storage::default();
    let k = Value::symbol("k", ValType::I64);
    s.set(A, &Value::i64(1), Value::i64(10));
    s.set(A, &k, Value::i64(20));
    s.set(A, &Value::i64(2), Value::i64(30));
    let read = |key: u64, kv: u64| {
      let env = vec![("k".to_string(), kv)].into_iter().collect();
      s.get(&A, &Value::i64(key)).term().evaluate(&env)
    };
    assert_eq!(read(1, 5), Some(Evaluated::Bits(10)));
    assert_eq!(read(1, 1), Some(Evaluated::Bits(20)));
    assert_eq!(read(2, 2), Some(Evaluated::Bits(30)));
    assert_eq!(read(3, 3), Some(Evaluated::Bits(20)));
    assert_eq!(read(3, 4), Some(Evaluated::Bits(0)));
    let has = s.has(&A, &k).term();
    let env = vec![("k".to_string(), 9)].into_iter().collect();
    assert_eq!(has.evaluate(&env), Some(Evaluated::Bits(1)));
  }

  #[test]
  fn forked_storage_is_independent() {
    let mut parent = Storage::default();
    parent.set(A, &Value::i64(1), Value::i64(1));
    let mut child = parent.clone();
    child.set(A, &Value::i64(1), Value::i64(2));
    assert_eq!(parent.get(&A, &Value::i64(1)), Value::i64(1));
    assert_eq!(child.get(&A, &Value::i64(1)), Value::i64(2));
  }
}
