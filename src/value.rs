//! Concrete and symbolic WASM values.
//!
//! Every operator dispatches over both tags. When all operands are concrete
//! the result is computed directly with the same semantics the term
//! constructors fold with, so a concrete run and a symbolic run agree on
//! every concrete input.

use std::fmt;

use crate::{
  term::{apply_binary, apply_compare, apply_unary, mask, to_signed, BinOp, CmpOp, Term, TermRef, UnOp},
  ty::ValType,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  Concrete { ty: ValType, bits: u64 },
  Symbolic { ty: ValType, term: TermRef },
}

impl Value {
  pub fn concrete(ty: ValType, bits: u64) -> Self {
    Value::Concrete { ty, bits: bits & mask(ty.width()) }
  }

  pub fn i32(v: u32) -> Self {
    Value::concrete(ValType::I32, v as u64)
  }

  pub fn i64(v: u64) -> Self {
    Value::concrete(ValType::I64, v)
  }

  pub fn bool(b: bool) -> Self {
    Value::i32(b as u32)
  }

  pub fn zero(ty: ValType) -> Self {
    Value::concrete(ty, 0)
  }

  /// A fresh symbolic variable.
  pub fn symbol(name: &str, ty: ValType) -> Self {
    Value::Symbolic { ty, term: Term::var(name, ty.width()) }
  }

  /// Wrap a term, collapsing constants to concrete values.
  pub fn from_term(ty: ValType, term: TermRef) -> Self {
    match term.as_const() {
      Some(bits) => Value::concrete(ty, bits),
      None => Value::Symbolic { ty, term },
    }
  }

  pub fn ty(&self) -> ValType {
    match self {
      Value::Concrete { ty, .. } | Value::Symbolic { ty, .. } => *ty,
    }
  }

  pub fn width(&self) -> u32 {
    self.ty().width()
  }

  pub fn as_concrete(&self) -> Option<u64> {
    match self {
      Value::Concrete { bits, .. } => Some(*bits),
      Value::Symbolic { .. } => None,
    }
  }

  pub fn is_concrete(&self) -> bool {
    self.as_concrete().is_some()
  }

  /// The value as a term of its width.
  pub fn term(&self) -> TermRef {
    match self {
      Value::Concrete { ty, bits } => Term::constant(ty.width(), *bits),
      Value::Symbolic { term, .. } => term.clone(),
    }
  }

  /// The boolean `self != 0`.
  pub fn nonzero(&self) -> TermRef {
    Term::compare(CmpOp::Ne, self.term(), Term::constant(self.width(), 0))
  }

  /// Turn a boolean term into an `i32` 0 or 1.
  pub fn from_bool_term(b: TermRef) -> Self {
    match b.as_bool() {
      Some(b) => Value::bool(b),
      None => Value::Symbolic { ty: ValType::I32, term: Term::ite(b, Term::constant(32, 1), Term::constant(32, 0)) },
    }
  }

  // Operators ////////////////////////////////////////////////////////////

  /// Apply a binary operator. `None` if the operands are concrete and the
  /// operation traps; symbolic trap conditions are checked by the caller
  /// with [`Value::division_traps`].
  pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    let ty = lhs.ty();
    match (lhs, rhs) {
      (Value::Concrete { bits: a, .. }, Value::Concrete { bits: b, .. }) => {
        apply_binary(op, ty.width(), *a, *b).map(|bits| Value::concrete(ty, bits))
      }
      _ => Some(Value::from_term(ty, Term::binary(op, lhs.term(), rhs.term()))),
    }
  }

  pub fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
      (Value::Concrete { bits: a, .. }, Value::Concrete { bits: b, .. }) => Value::bool(apply_compare(op, lhs.width(), *a, *b)),
      _ => Value::from_bool_term(Term::compare(op, lhs.term(), rhs.term())),
    }
  }

  pub fn eqz(&self) -> Value {
    Value::compare(CmpOp::Eq, self, &Value::zero(self.ty()))
  }

  pub fn unary(op: UnOp, arg: &Value) -> Value {
    match arg {
      Value::Concrete { ty, bits } => Value::concrete(*ty, apply_unary(op, ty.width(), *bits)),
      Value::Symbolic { ty, term } => Value::from_term(*ty, Term::unary(op, term.clone())),
    }
  }

  /// `i32.wrap_i64`.
  pub fn wrap(&self) -> Value {
    match self {
      Value::Concrete { bits, .. } => Value::concrete(ValType::I32, *bits),
      Value::Symbolic { term, .. } => Value::from_term(ValType::I32, Term::extract(31, 0, term.clone())),
    }
  }

  /// `i64.extend_i32_s` and `i64.extend_i32_u`.
  pub fn extend(&self, signed: bool) -> Value {
    match self {
      Value::Concrete { bits, .. } if signed => Value::concrete(ValType::I64, to_signed(32, *bits) as u64),
      Value::Concrete { bits, .. } => Value::concrete(ValType::I64, *bits),
      Value::Symbolic { term, .. } if signed => Value::from_term(ValType::I64, Term::sign_ext(32, term.clone())),
      Value::Symbolic { term, .. } => Value::from_term(ValType::I64, Term::zero_ext(32, term.clone())),
    }
  }

  /// Sign-extend the low `from` bits to the full width.
  pub fn sign_extend(&self, from: u32) -> Value {
    let ty = self.ty();
    match self {
      Value::Concrete { bits, .. } => Value::concrete(ty, to_signed(from, *bits) as u64),
      Value::Symbolic { term, .. } => {
        Value::from_term(ty, Term::sign_ext(ty.width() - from, Term::extract(from - 1, 0, term.clone())))
      }
    }
  }

  /// Same bits, another type of the same width.
  pub fn reinterpret(&self, to: ValType) -> Value {
    match self {
      Value::Concrete { bits, .. } => Value::concrete(to, *bits),
      Value::Symbolic { term, .. } => Value::Symbolic { ty: to, term: term.clone() },
    }
  }

  /// `select`: `a` if `cond` is non-zero, else `b`. A symbolic condition
  /// gives an if-then-else term rather than a fork.
  pub fn select(cond: &Value, a: Value, b: Value) -> Value {
    match cond.as_concrete() {
      Some(c) => {
        if c != 0 {
          a
        } else {
          b
        }
      }
      None => Value::from_term(a.ty(), Term::ite(cond.nonzero(), a.term(), b.term())),
    }
  }

  // Trap conditions //////////////////////////////////////////////////////

  /// Conditions under which `op` traps on symbolic operands, with the trap
  /// raised. Conditions that fold to false are omitted.
  pub fn division_traps(op: BinOp, lhs: &Value, rhs: &Value) -> Vec<(TermRef, DivisionTrap)> {
    if !op.is_division() {
      return Vec::new();
    }
    let w = lhs.width();
    let mut res = Vec::new();
    let zero = Term::compare(CmpOp::Eq, rhs.term(), Term::constant(w, 0));
    if zero.as_bool() != Some(false) {
      res.push((zero, DivisionTrap::ByZero));
    }
    if op == BinOp::DivS {
      let overflow = Term::and(
        Term::compare(CmpOp::Eq, lhs.term(), Term::constant(w, 1 << (w - 1))),
        Term::compare(CmpOp::Eq, rhs.term(), Term::constant(w, mask(w))),
      );
      if overflow.as_bool() != Some(false) {
        res.push((overflow, DivisionTrap::Overflow));
      }
    }
    res
  }

  /// Whether concrete `add`, `sub` or `mul` of `width`-bit operands leaves
  /// the range of `width`-bit integers, reading operands and result as
  /// signed or unsigned. Other operators never overflow here.
  pub fn overflows(op: BinOp, width: u32, a: u64, b: u64, signed: bool) -> bool {
    let (x, y, lo, hi) = if signed {
      let max = (mask(width) >> 1) as i128;
      (to_signed(width, a) as i128, to_signed(width, b) as i128, -max - 1, max)
    } else {
      ((a & mask(width)) as i128, (b & mask(width)) as i128, 0, mask(width) as i128)
    };
    let exact = match op {
      BinOp::Add => x.checked_add(y),
      BinOp::Sub => x.checked_sub(y),
      BinOp::Mul => x.checked_mul(y),
      _ => return false,
    };
    exact.map_or(true, |r| r < lo || r > hi)
  }

  /// The condition under which `add`, `sub` or `mul` overflows, or `None`
  /// for other operators.
  pub fn overflow_condition(op: BinOp, lhs: &Value, rhs: &Value, signed: bool) -> Option<TermRef> {
    let w = lhs.width();
    let (a, b) = (lhs.term(), rhs.term());
    let zero = Term::constant(w, 0);
    let negative = |t: TermRef| Term::compare(CmpOp::LtS, t, Term::constant(w, 0));
    let cond = match (op, signed) {
      (BinOp::Add, false) => Term::compare(CmpOp::LtU, Term::binary(BinOp::Add, a.clone(), b), a),
      (BinOp::Sub, false) => Term::compare(CmpOp::LtU, a, b),
      (BinOp::Mul, false) => {
        // a != 0 && (a * b) / a != b
        let product = Term::binary(BinOp::Mul, a.clone(), b.clone());
        let nonzero = Term::compare(CmpOp::Ne, a.clone(), zero);
        let safe_a = Term::ite(nonzero.clone(), a, Term::constant(w, 1));
        Term::and(nonzero, Term::compare(CmpOp::Ne, Term::binary(BinOp::DivU, product, safe_a), b))
      }
      (BinOp::Add, true) => {
        // the operands agree in sign and the sum does not
        let sum = Term::binary(BinOp::Add, a.clone(), b.clone());
        negative(Term::binary(BinOp::And, Term::binary(BinOp::Xor, a, sum.clone()), Term::binary(BinOp::Xor, b, sum)))
      }
      (BinOp::Sub, true) => {
        // the operands differ in sign and the difference differs from a
        let diff = Term::binary(BinOp::Sub, a.clone(), b.clone());
        negative(Term::binary(BinOp::And, Term::binary(BinOp::Xor, a.clone(), b), Term::binary(BinOp::Xor, a, diff)))
      }
      (BinOp::Mul, true) => {
        // -1 * MIN, or (a * b) / a != b for a outside {0, -1}
        let product = Term::binary(BinOp::Mul, a.clone(), b.clone());
        let minus_one = Term::constant(w, mask(w));
        let min = Term::constant(w, 1 << (w - 1));
        let divides = Term::and(Term::compare(CmpOp::Ne, a.clone(), zero), Term::compare(CmpOp::Ne, a.clone(), minus_one.clone()));
        let safe_a = Term::ite(divides.clone(), a.clone(), Term::constant(w, 1));
        Term::or(
          Term::and(Term::compare(CmpOp::Eq, a, minus_one), Term::compare(CmpOp::Eq, b.clone(), min)),
          Term::and(divides, Term::compare(CmpOp::Ne, Term::binary(BinOp::DivS, product, safe_a), b)),
        )
      }
      _ => return None,
    };
    Some(cond)
  }

  // Bytes ////////////////////////////////////////////////////////////////

  /// The low `n` bytes, little-endian.
  pub fn to_bytes(&self, n: u32) -> Vec<Byte> {
    match self {
      Value::Concrete { bits, .. } => bits.to_le_bytes()[..n as usize].iter().map(|&b| Byte::Concrete(b)).collect(),
      Value::Symbolic { term, .. } => (0..n).map(|i| Byte::from_term(Term::extract(8 * i + 7, 8 * i, term.clone()))).collect(),
    }
  }

  /// Assemble little-endian bytes into a value of type `ty`, extending
  /// from the width of the bytes.
  pub fn from_bytes(ty: ValType, bytes: &[Byte], signed: bool) -> Value {
    let width = 8 * bytes.len() as u32;
    if let Some(concrete) = bytes.iter().map(Byte::as_concrete).collect::<Option<Vec<u8>>>() {
      let mut buf = [0u8; 8];
      buf[..concrete.len()].copy_from_slice(&concrete);
      let raw = u64::from_le_bytes(buf);
      let bits = if signed { to_signed(width, raw) as u64 } else { raw };
      return Value::concrete(ty, bits);
    }
    let joined = bytes.iter().rev().map(Byte::term).reduce(|hi, lo| Term::concat(hi, lo)).unwrap_or_else(|| Term::constant(8, 0));
    let by = ty.width() - width;
    let term = if signed { Term::sign_ext(by, joined) } else { Term::zero_ext(by, joined) };
    Value::from_term(ty, term)
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Concrete { ty, bits } => write!(f, "{}:{}", bits, ty),
      Value::Symbolic { ty, term } => write!(f, "{}:{}", term, ty),
    }
  }
}

/// Why a division traps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivisionTrap {
  ByZero,
  Overflow,
}

/// A byte of linear memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Byte {
  Concrete(u8),
  Symbolic(TermRef),
}

impl Byte {
  pub fn from_term(t: TermRef) -> Self {
    match t.as_const() {
      Some(b) => Byte::Concrete(b as u8),
      None => Byte::Symbolic(t),
    }
  }

  pub fn as_concrete(&self) -> Option<u8> {
    match self {
      Byte::Concrete(b) => Some(*b),
      Byte::Symbolic(_) => None,
    }
  }

  pub fn term(&self) -> TermRef {
    match self {
      Byte::Concrete(b) => Term::constant(8, *b as u64),
      Byte::Symbolic(t) => t.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use std::collections::BTreeMap;

  use crate::term::Evaluated;

  const OPS: [BinOp; 15] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::DivU,
    BinOp::DivS,
    BinOp::RemU,
    BinOp::RemS,
    BinOp::And,
    BinOp::Or,
    BinOp::Xor,
    BinOp::Shl,
    BinOp::ShrU,
    BinOp::ShrS,
    BinOp::Rotl,
    BinOp::Rotr,
  ];

  fn env(a: u64, b: u64) -> BTreeMap<String, u64> {
    vec![("a".to_string(), a), ("b".to_string(), b)].into_iter().collect()
  }

  proptest! {
    #[test]
    fn symbolic_agrees_with_concrete(op in 0..OPS.len(), a: u64, b: u64, wide: bool) {
      let op = OPS[op];
      let ty = if wide { ValType::I64 } else { ValType::I32 };
      let concrete = Value::binary(op, &Value::concrete(ty, a), &Value::concrete(ty, b));
      let symbolic = Value::binary(op, &Value::symbol("a", ty), &Value::symbol("b", ty)).unwrap();
      let evaluated = symbolic.term().evaluate(&env(a & mask(ty.width()), b & mask(ty.width())));
      match concrete {
        Some(v) => prop_assert_eq!(evaluated, Some(Evaluated::Bits(v.as_concrete().unwrap()))),
        None => prop_assert_eq!(evaluated, None),
      }
    }

    #[test]
    fn overflow_conditions_agree(op in 0..3usize, a: u64, b: u64, wide: bool, signed: bool) {
      let op = OPS[op];
      let ty = if wide { ValType::I64 } else { ValType::I32 };
      let (a, b) = (a & mask(ty.width()), b & mask(ty.width()));
      let expected = Value::overflows(op, ty.width(), a, b, signed);
      let folded = Value::overflow_condition(op, &Value::concrete(ty, a), &Value::concrete(ty, b), signed).unwrap();
      prop_assert_eq!(folded.as_bool(), Some(expected));
      let symbolic = Value::overflow_condition(op, &Value::symbol("a", ty), &Value::symbol("b", ty), signed).unwrap();
      prop_assert_eq!(symbolic.evaluate(&env(a, b)), Some(Evaluated::Bool(expected)));
    }

    #[test]
    fn comparisons_agree(a: u32, b: u32) {
      for op in [CmpOp::LtS, CmpOp::LeU, CmpOp::GtS, CmpOp::GeU, CmpOp::Eq] {
        let concrete = Value::compare(op, &Value::i32(a), &Value::i32(b)).as_concrete().unwrap();
        let symbolic = Value::compare(op, &Value::symbol("a", ValType::I32), &Value::symbol("b", ValType::I32));
        prop_assert_eq!(symbolic.term().evaluate(&env(a as u64, b as u64)), Some(Evaluated::Bits(concrete)));
      }
    }

    #[test]
    fn bytes_round_trip_through_terms(v: u64, n in 1u32..=8, signed: bool) {
      let x = Value::symbol("a", ValType::I64);
      let loaded = Value::from_bytes(ValType::I64, &x.to_bytes(n), signed);
      let direct = Value::from_bytes(ValType::I64, &Value::i64(v).to_bytes(n), signed);
      prop_assert_eq!(loaded.term().evaluate(&env(v, 0)), Some(Evaluated::Bits(direct.as_concrete().unwrap())));
    }
  }

  #[test]
  fn overflow_conditions() {
    let a = Value::i32(u32::MAX);
    let one = Value::i32(1);
    let holds = |op, l: &Value, r: &Value, signed| Value::overflow_condition(op, l, r, signed).unwrap().as_bool();
    assert_eq!(holds(BinOp::Add, &a, &one, false), Some(true));
    assert_eq!(holds(BinOp::Sub, &one, &a, false), Some(true));
    assert_eq!(holds(BinOp::Mul, &Value::i32(0x10000), &Value::i32(0x10000), false), Some(true));
    assert_eq!(holds(BinOp::Mul, &Value::i32(0), &a, false), Some(false));
    assert!(Value::overflow_condition(BinOp::Xor, &a, &one, false).is_none());

    // -1 + 1 and 0 - 5 are fine when signed
    assert_eq!(holds(BinOp::Add, &a, &one, true), Some(false));
    assert_eq!(holds(BinOp::Sub, &Value::i32(0), &Value::i32(5), true), Some(false));
    assert_eq!(holds(BinOp::Add, &Value::i32(i32::MAX as u32), &one, true), Some(true));
    assert_eq!(holds(BinOp::Mul, &a, &Value::i32(i32::MIN as u32), true), Some(true));
    assert_eq!(holds(BinOp::Mul, &a, &Value::i32(7), true), Some(false));
  }

  #[test]
  fn division_traps_fold_away_for_constant_divisors() {
    let x = Value::symbol("x", ValType::I32);
    assert!(Value::division_traps(BinOp::DivU, &x, &Value::i32(3)).is_empty());
    let traps = Value::division_traps(BinOp::DivS, &x, &Value::symbol("y", ValType::I32));
    assert_eq!(traps.iter().map(|t| t.1).collect::<Vec<_>>(), vec![DivisionTrap::ByZero, DivisionTrap::Overflow]);
  }

  #[test]
  fn select_on_symbolic_condition() {
    let c = Value::symbol("c", ValType::I32);
    let v = Value::select(&c, Value::i32(7), Value::i32(9));
    let t = v.term();
    assert_eq!(t.evaluate(&vec![("c".to_string(), 0)].into_iter().collect()), Some(Evaluated::Bits(9)));
    assert_eq!(t.evaluate(&vec![("c".to_string(), 5)].into_iter().collect()), Some(Evaluated::Bits(7)));
  }
}
