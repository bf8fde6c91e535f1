//! Symbolic terms.
//!
//! Terms are immutable DAGs shared through [`Arc`]. They are built with the
//! smart constructors on [`Term`], which fold constants and a handful of
//! algebraic identities, so a term built only from constants is always a
//! constant. The concrete semantics of every operator lives in
//! [`apply_binary`], [`apply_unary`] and [`apply_compare`]; the concrete fast
//! path of the interpreter uses the same functions.

use std::{
  collections::{BTreeMap, HashMap},
  fmt,
  sync::Arc,
};

use serde::{Deserialize, Serialize};

pub type TermRef = Arc<Term>;

/// Sorts of terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sort {
  Bool,
  BitVec(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
  Clz,
  Ctz,
  Popcnt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  DivU,
  DivS,
  RemU,
  RemS,
  And,
  Or,
  Xor,
  Shl,
  ShrU,
  ShrS,
  Rotl,
  Rotr,
}

impl BinOp {
  /// Division and remainder, which trap on a zero divisor.
  pub fn is_division(self) -> bool {
    matches!(self, BinOp::DivU | BinOp::DivS | BinOp::RemU | BinOp::RemS)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
  Eq,
  Ne,
  LtU,
  LtS,
  LeU,
  LeS,
  GtU,
  GtS,
  GeU,
  GeS,
}

impl CmpOp {
  /// The comparison that holds exactly when `self` does not.
  pub fn negate(self) -> Self {
    use CmpOp::*;
    match self {
      Eq => Ne,
      Ne => Eq,
      LtU => GeU,
      LtS => GeS,
      LeU => GtU,
      LeS => GtS,
      GtU => LeU,
      GtS => LeS,
      GeU => LtU,
      GeS => LtS,
    }
  }
}

/// Symbolic terms over booleans and bit-vectors of at most 64 bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
  Bool(bool),
  Const { width: u32, value: u64 },
  Var { name: Arc<str>, width: u32 },
  Unary { op: UnOp, arg: TermRef },
  Binary { op: BinOp, lhs: TermRef, rhs: TermRef },
  Compare { op: CmpOp, lhs: TermRef, rhs: TermRef },
  Not(TermRef),
  And(TermRef, TermRef),
  Or(TermRef, TermRef),
  Ite { cond: TermRef, then: TermRef, otherwise: TermRef },
  Extract { hi: u32, lo: u32, arg: TermRef },
  ZeroExt { by: u32, arg: TermRef },
  SignExt { by: u32, arg: TermRef },
  Concat { hi: TermRef, lo: TermRef },
}

/// Result of evaluating a term under an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evaluated {
  Bool(bool),
  Bits(u64),
}

// Concrete semantics ///////////////////////////////////////////////////////

/// All-ones mask of `width` bits.
pub fn mask(width: u32) -> u64 {
  if width >= 64 {
    u64::MAX
  } else {
    (1u64 << width) - 1
  }
}

/// Interpret the low `width` bits of `value` as a two's complement number.
pub fn to_signed(width: u32, value: u64) -> i64 {
  let shift = 64 - width;
  ((value << shift) as i64) >> shift
}

/// Concrete semantics of binary operators on `width`-bit operands.
/// Returns `None` where WASM traps: a zero divisor, or signed division
/// overflow.
pub fn apply_binary(op: BinOp, width: u32, a: u64, b: u64) -> Option<u64> {
  let (a, b) = (a & mask(width), b & mask(width));
  let shift = (b % width as u64) as u32;
  let res = match op {
    BinOp::Add => a.wrapping_add(b),
    BinOp::Sub => a.wrapping_sub(b),
    BinOp::Mul => a.wrapping_mul(b),
    BinOp::DivU => a.checked_div(b)?,
    BinOp::RemU => a.checked_rem(b)?,
    BinOp::DivS => {
      let (x, y) = (to_signed(width, a), to_signed(width, b));
      if y == 0 || (y == -1 && x == to_signed(width, 1 << (width - 1))) {
        return None;
      }
      (x / y) as u64
    }
    BinOp::RemS => {
      let (x, y) = (to_signed(width, a), to_signed(width, b));
      if y == 0 {
        return None;
      }
      x.wrapping_rem(y) as u64
    }
    BinOp::And => a & b,
    BinOp::Or => a | b,
    BinOp::Xor => a ^ b,
    BinOp::Shl => a << shift,
    BinOp::ShrU => a >> shift,
    BinOp::ShrS => (to_signed(width, a) >> shift) as u64,
    BinOp::Rotl => {
      if shift == 0 {
        a
      } else {
        (a << shift) | (a >> (width - shift))
      }
    }
    BinOp::Rotr => {
      if shift == 0 {
        a
      } else {
        (a >> shift) | (a << (width - shift))
      }
    }
  };
  Some(res & mask(width))
}

/// Concrete semantics of unary operators.
pub fn apply_unary(op: UnOp, width: u32, a: u64) -> u64 {
  let a = a & mask(width);
  let res = match op {
    UnOp::Popcnt => a.count_ones(),
    UnOp::Clz => a.leading_zeros() - (64 - width),
    UnOp::Ctz => {
      if a == 0 {
        width
      } else {
        a.trailing_zeros()
      }
    }
  };
  res as u64
}

/// Concrete semantics of comparisons.
pub fn apply_compare(op: CmpOp, width: u32, a: u64, b: u64) -> bool {
  let (a, b) = (a & mask(width), b & mask(width));
  let (x, y) = (to_signed(width, a), to_signed(width, b));
  match op {
    CmpOp::Eq => a == b,
    CmpOp::Ne => a != b,
    CmpOp::LtU => a < b,
    CmpOp::LtS => x < y,
    CmpOp::LeU => a <= b,
    CmpOp::LeS => x <= y,
    CmpOp::GtU => a > b,
    CmpOp::GtS => x > y,
    CmpOp::GeU => a >= b,
    CmpOp::GeS => x >= y,
  }
}

// Smart constructors ///////////////////////////////////////////////////////

impl Term {
  pub fn tt() -> TermRef {
    Arc::new(Term::Bool(true))
  }

  pub fn ff() -> TermRef {
    Arc::new(Term::Bool(false))
  }

  pub fn boolean(b: bool) -> TermRef {
    Arc::new(Term::Bool(b))
  }

  pub fn constant(width: u32, value: u64) -> TermRef {
    Arc::new(Term::Const { width, value: value & mask(width) })
  }

  pub fn var(name: &str, width: u32) -> TermRef {
    Arc::new(Term::Var { name: Arc::from(name), width })
  }

  /// The sort of the term.
  pub fn sort(&self) -> Sort {
    match self {
      Term::Bool(_) | Term::Compare { .. } | Term::Not(_) | Term::And(..) | Term::Or(..) => Sort::Bool,
      Term::Const { width, .. } | Term::Var { width, .. } => Sort::BitVec(*width),
      Term::Unary { arg, .. } => arg.sort(),
      Term::Binary { lhs, .. } => lhs.sort(),
      Term::Ite { then, .. } => then.sort(),
      Term::Extract { hi, lo, .. } => Sort::BitVec(hi - lo + 1),
      Term::ZeroExt { by, arg } | Term::SignExt { by, arg } => Sort::BitVec(arg.width() + by),
      Term::Concat { hi, lo } => Sort::BitVec(hi.width() + lo.width()),
    }
  }

  /// Bit-width of a bit-vector term, 1 for booleans.
  pub fn width(&self) -> u32 {
    match self.sort() {
      Sort::Bool => 1,
      Sort::BitVec(w) => w,
    }
  }

  pub fn as_const(&self) -> Option<u64> {
    match self {
      Term::Const { value, .. } => Some(*value),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Term::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn unary(op: UnOp, arg: TermRef) -> TermRef {
    let width = arg.width();
    match arg.as_const() {
      Some(a) => Term::constant(width, apply_unary(op, width, a)),
      None => Arc::new(Term::Unary { op, arg }),
    }
  }

  pub fn binary(op: BinOp, lhs: TermRef, rhs: TermRef) -> TermRef {
    let width = lhs.width();
    debug_assert_eq!(width, rhs.width());
    match (lhs.as_const(), rhs.as_const()) {
      (Some(a), Some(b)) => {
        if let Some(v) = apply_binary(op, width, a, b) {
          return Term::constant(width, v);
        }
      }
      (None, Some(0)) if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::ShrU | BinOp::ShrS) => return lhs,
      (Some(0), None) if matches!(op, BinOp::Add | BinOp::Or | BinOp::Xor) => return rhs,
      (None, Some(1)) if matches!(op, BinOp::Mul | BinOp::DivU) => return lhs,
      (Some(0), None) | (None, Some(0)) if matches!(op, BinOp::Mul | BinOp::And) => return Term::constant(width, 0),
      _ => {}
    }
    Arc::new(Term::Binary { op, lhs, rhs })
  }

  pub fn compare(op: CmpOp, lhs: TermRef, rhs: TermRef) -> TermRef {
    let width = lhs.width();
    debug_assert_eq!(width, rhs.width());
    if let (Some(a), Some(b)) = (lhs.as_const(), rhs.as_const()) {
      return Term::boolean(apply_compare(op, width, a, b));
    }
    if lhs == rhs {
      return Term::boolean(matches!(op, CmpOp::Eq | CmpOp::LeU | CmpOp::LeS | CmpOp::GeU | CmpOp::GeS));
    }
    // ite(c, 1, 0) != 0 is how WASM comparisons come back to conditions
    if let (Term::Ite { cond, then, otherwise }, Some(k)) = (lhs.as_ref(), rhs.as_const()) {
      if let (Some(t), Some(e)) = (then.as_const(), otherwise.as_const()) {
        if t != e && matches!(op, CmpOp::Eq | CmpOp::Ne) {
          let holds_then = (t == k) == (op == CmpOp::Eq);
          let holds_else = (e == k) == (op == CmpOp::Eq);
          return match (holds_then, holds_else) {
            (true, true) => Term::tt(),
            (false, false) => Term::ff(),
            (true, false) => cond.clone(),
            (false, true) => Term::not(cond.clone()),
          };
        }
      }
    }
    Arc::new(Term::Compare { op, lhs, rhs })
  }

  pub fn not(arg: TermRef) -> TermRef {
    match arg.as_ref() {
      Term::Bool(b) => Term::boolean(!b),
      Term::Not(inner) => inner.clone(),
      Term::Compare { op, lhs, rhs } => Arc::new(Term::Compare { op: op.negate(), lhs: lhs.clone(), rhs: rhs.clone() }),
      _ => Arc::new(Term::Not(arg)),
    }
  }

  pub fn and(lhs: TermRef, rhs: TermRef) -> TermRef {
    match (lhs.as_bool(), rhs.as_bool()) {
      (Some(false), _) | (_, Some(false)) => Term::ff(),
      (Some(true), _) => rhs,
      (_, Some(true)) => lhs,
      _ if lhs == rhs => lhs,
      _ => Arc::new(Term::And(lhs, rhs)),
    }
  }

  pub fn or(lhs: TermRef, rhs: TermRef) -> TermRef {
    match (lhs.as_bool(), rhs.as_bool()) {
      (Some(true), _) | (_, Some(true)) => Term::tt(),
      (Some(false), _) => rhs,
      (_, Some(false)) => lhs,
      _ if lhs == rhs => lhs,
      _ => Arc::new(Term::Or(lhs, rhs)),
    }
  }

  pub fn ite(cond: TermRef, then: TermRef, otherwise: TermRef) -> TermRef {
    match cond.as_bool() {
      Some(true) => then,
      Some(false) => otherwise,
      None if then == otherwise => then,
      None => Arc::new(Term::Ite { cond, then, otherwise }),
    }
  }

  pub fn extract(hi: u32, lo: u32, arg: TermRef) -> TermRef {
    debug_assert!(hi >= lo && hi < arg.width());
    if lo == 0 && hi + 1 == arg.width() {
      return arg;
    }
    match arg.as_ref() {
      Term::Const { value, .. } => Term::constant(hi - lo + 1, value >> lo),
      Term::Extract { lo: inner_lo, arg: inner, .. } => Term::extract(hi + inner_lo, lo + inner_lo, inner.clone()),
      Term::ZeroExt { arg: inner, .. } | Term::SignExt { arg: inner, .. } if hi < inner.width() => Term::extract(hi, lo, inner.clone()),
      Term::ZeroExt { arg: inner, .. } if lo >= inner.width() => Term::constant(hi - lo + 1, 0),
      Term::Concat { lo: l, .. } if hi < l.width() => Term::extract(hi, lo, l.clone()),
      Term::Concat { hi: h, lo: l } if lo >= l.width() => Term::extract(hi - l.width(), lo - l.width(), h.clone()),
      _ => Arc::new(Term::Extract { hi, lo, arg }),
    }
  }

  pub fn zero_ext(by: u32, arg: TermRef) -> TermRef {
    if by == 0 {
      return arg;
    }
    match arg.as_const() {
      Some(v) => Term::constant(arg.width() + by, v),
      None => Arc::new(Term::ZeroExt { by, arg }),
    }
  }

  pub fn sign_ext(by: u32, arg: TermRef) -> TermRef {
    if by == 0 {
      return arg;
    }
    let width = arg.width();
    match arg.as_const() {
      Some(v) => Term::constant(width + by, to_signed(width, v) as u64),
      None => Arc::new(Term::SignExt { by, arg }),
    }
  }

  pub fn concat(hi: TermRef, lo: TermRef) -> TermRef {
    let lo_width = lo.width();
    if let (Some(h), Some(l)) = (hi.as_const(), lo.as_const()) {
      return Term::constant(hi.width() + lo_width, (h << lo_width) | l);
    }
    // adjacent slices of one term glue back together
    if let (Term::Extract { hi: h1, lo: l1, arg: a1 }, Term::Extract { hi: h2, lo: l2, arg: a2 }) = (hi.as_ref(), lo.as_ref()) {
      if a1 == a2 && *l1 == h2 + 1 {
        return Term::extract(*h1, *l2, a1.clone());
      }
    }
    Arc::new(Term::Concat { hi, lo })
  }

  /// Direct subterms, in printing order.
  pub fn children(&self) -> Vec<&TermRef> {
    match self {
      Term::Bool(_) | Term::Const { .. } | Term::Var { .. } => Vec::new(),
      Term::Unary { arg, .. } | Term::Not(arg) | Term::Extract { arg, .. } | Term::ZeroExt { arg, .. } | Term::SignExt { arg, .. } => vec![arg],
      Term::Binary { lhs, rhs, .. } | Term::Compare { lhs, rhs, .. } | Term::And(lhs, rhs) | Term::Or(lhs, rhs) | Term::Concat { hi: lhs, lo: rhs } => vec![lhs, rhs],
      Term::Ite { cond, then, otherwise } => vec![cond, then, otherwise],
    }
  }

  /// Evaluate the term under `assignment`. Returns `None` if a variable is
  /// unassigned, or if a division by zero is reached (the SMT-LIB total
  /// semantics is not used here, since such terms are always guarded).
  pub fn evaluate(&self, assignment: &BTreeMap<String, u64>) -> Option<Evaluated> {
    Evaluator { assignment, cache: HashMap::new() }.eval(self)
  }
}

/// Evaluates every shared subterm once. Subterms are owned by the root
/// being evaluated, so their addresses are stable for the evaluator's
/// lifetime.
struct Evaluator<'a> {
  assignment: &'a BTreeMap<String, u64>,
  cache: HashMap<*const Term, Option<Evaluated>>,
}

impl<'a> Evaluator<'a> {
  fn eval(&mut self, t: &Term) -> Option<Evaluated> {
    let key = t as *const Term;
    if let Some(res) = self.cache.get(&key) {
      return *res;
    }
    let res = self.compute(t);
    self.cache.insert(key, res);
    res
  }

  fn bits(&mut self, t: &Term) -> Option<u64> {
    match self.eval(t)? {
      Evaluated::Bits(b) => Some(b),
      Evaluated::Bool(_) => None,
    }
  }

  fn boolean(&mut self, t: &Term) -> Option<bool> {
    match self.eval(t)? {
      Evaluated::Bool(b) => Some(b),
      Evaluated::Bits(_) => None,
    }
  }

  fn compute(&mut self, t: &Term) -> Option<Evaluated> {
    use Evaluated::*;
    let res = match t {
      Term::Bool(b) => Bool(*b),
      Term::Const { value, .. } => Bits(*value),
      Term::Var { name, width } => Bits(*self.assignment.get(name.as_ref())? & mask(*width)),
      Term::Unary { op, arg } => Bits(apply_unary(*op, arg.width(), self.bits(arg)?)),
      Term::Binary { op, lhs, rhs } => {
        let (a, b) = (self.bits(lhs)?, self.bits(rhs)?);
        Bits(apply_binary(*op, lhs.width(), a, b)?)
      }
      Term::Compare { op, lhs, rhs } => {
        let (a, b) = (self.bits(lhs)?, self.bits(rhs)?);
        Bool(apply_compare(*op, lhs.width(), a, b))
      }
      Term::Not(a) => Bool(!self.boolean(a)?),
      Term::And(l, r) => Bool(self.boolean(l)? && self.boolean(r)?),
      Term::Or(l, r) => Bool(self.boolean(l)? || self.boolean(r)?),
      Term::Ite { cond, then, otherwise } => {
        if self.boolean(cond)? {
          self.eval(then)?
        } else {
          self.eval(otherwise)?
        }
      }
      Term::Extract { hi, lo, arg } => Bits((self.bits(arg)? >> lo) & mask(hi - lo + 1)),
      Term::ZeroExt { arg, .. } => Bits(self.bits(arg)?),
      Term::SignExt { by, arg } => Bits(to_signed(arg.width(), self.bits(arg)?) as u64 & mask(arg.width() + by)),
      Term::Concat { hi, lo } => {
        let (h, l) = (self.bits(hi)?, self.bits(lo)?);
        Bits((h << lo.width()) | l)
      }
    };
    Some(res)
  }
}

// Storage as a node table //////////////////////////////////////////////////

/// One entry of a [`TermTable`]. Children are indices of earlier entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
  Bool(bool),
  Const { width: u32, value: u64 },
  Var { name: String, width: u32 },
  Unary { op: UnOp, arg: usize },
  Binary { op: BinOp, lhs: usize, rhs: usize },
  Compare { op: CmpOp, lhs: usize, rhs: usize },
  Not(usize),
  And(usize, usize),
  Or(usize, usize),
  Ite { cond: usize, then: usize, otherwise: usize },
  Extract { hi: u32, lo: u32, arg: usize },
  ZeroExt { by: u32, arg: usize },
  SignExt { by: u32, arg: usize },
  Concat { hi: usize, lo: usize },
}

/// Hash-consed terms: every distinct subterm is stored once, after its
/// children.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermTable(Vec<Node>);

impl TermTable {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Rebuild every entry. Fails if a child index does not point to an
  /// earlier entry, or if sorts do not match.
  pub fn terms(&self) -> Result<Vec<TermRef>, String> {
    let mut terms: Vec<TermRef> = Vec::with_capacity(self.0.len());
    for (i, node) in self.0.iter().enumerate() {
      let get = |j: usize| terms.get(j).cloned().ok_or_else(|| format!("term {} refers to term {}", i, j));
      let term = match node {
        Node::Bool(b) => Term::Bool(*b),
        Node::Const { width, value } => Term::Const { width: *width, value: *value },
        Node::Var { name, width } => Term::Var { name: Arc::from(name.as_str()), width: *width },
        Node::Unary { op, arg } => Term::Unary { op: *op, arg: get(*arg)? },
        Node::Binary { op, lhs, rhs } => Term::Binary { op: *op, lhs: get(*lhs)?, rhs: get(*rhs)? },
        Node::Compare { op, lhs, rhs } => Term::Compare { op: *op, lhs: get(*lhs)?, rhs: get(*rhs)? },
        Node::Not(a) => Term::Not(get(*a)?),
        Node::And(a, b) => Term::And(get(*a)?, get(*b)?),
        Node::Or(a, b) => Term::Or(get(*a)?, get(*b)?),
        Node::Ite { cond, then, otherwise } => Term::Ite { cond: get(*cond)?, then: get(*then)?, otherwise: get(*otherwise)? },
        Node::Extract { hi, lo, arg } => Term::Extract { hi: *hi, lo: *lo, arg: get(*arg)? },
        Node::ZeroExt { by, arg } => Term::ZeroExt { by: *by, arg: get(*arg)? },
        Node::SignExt { by, arg } => Term::SignExt { by: *by, arg: get(*arg)? },
        Node::Concat { hi, lo } => Term::Concat { hi: get(*hi)?, lo: get(*lo)? },
      };
      if !term.well_sorted() {
        return Err(format!("term {} is ill-sorted", i));
      }
      terms.push(Arc::new(term));
    }
    Ok(terms)
  }
}

impl Term {
  /// Whether the children have the sorts the operator expects.
  fn well_sorted(&self) -> bool {
    let bv = |t: &TermRef| matches!(t.sort(), Sort::BitVec(w) if w <= 64);
    let boolean = |t: &TermRef| t.sort() == Sort::Bool;
    match self {
      Term::Bool(_) => true,
      Term::Const { width, .. } | Term::Var { width, .. } => (1..=64).contains(width),
      Term::Unary { arg, .. } => bv(arg),
      Term::Binary { lhs, rhs, .. } | Term::Compare { lhs, rhs, .. } => bv(lhs) && lhs.sort() == rhs.sort(),
      Term::Not(a) => boolean(a),
      Term::And(a, b) | Term::Or(a, b) => boolean(a) && boolean(b),
      Term::Ite { cond, then, otherwise } => boolean(cond) && then.sort() == otherwise.sort(),
      Term::Extract { hi, lo, arg } => bv(arg) && lo <= hi && *hi < arg.width(),
      Term::ZeroExt { by, arg } | Term::SignExt { by, arg } => bv(arg) && arg.width() + by <= 64,
      Term::Concat { hi, lo } => bv(hi) && bv(lo) && hi.width() + lo.width() <= 64,
    }
  }
}

/// Fills a [`TermTable`], visiting each shared subterm once.
#[derive(Default)]
pub struct TableBuilder {
  table: TermTable,
  by_node: HashMap<Node, usize>,
  /// Terms already added, kept alive so that their addresses are not
  /// reused.
  by_address: HashMap<*const Term, (TermRef, usize)>,
}

impl TableBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Index of `term` in the table, adding it and its subterms as needed.
  pub fn add(&mut self, term: &TermRef) -> usize {
    if let Some((_, i)) = self.by_address.get(&Arc::as_ptr(term)) {
      return *i;
    }
    let node = match term.as_ref() {
      Term::Bool(b) => Node::Bool(*b),
      Term::Const { width, value } => Node::Const { width: *width, value: *value },
      Term::Var { name, width } => Node::Var { name: name.to_string(), width: *width },
      Term::Unary { op, arg } => Node::Unary { op: *op, arg: self.add(arg) },
      Term::Binary { op, lhs, rhs } => Node::Binary { op: *op, lhs: self.add(lhs), rhs: self.add(rhs) },
      Term::Compare { op, lhs, rhs } => Node::Compare { op: *op, lhs: self.add(lhs), rhs: self.add(rhs) },
      Term::Not(a) => Node::Not(self.add(a)),
      Term::And(a, b) => Node::And(self.add(a), self.add(b)),
      Term::Or(a, b) => Node::Or(self.add(a), self.add(b)),
      Term::Ite { cond, then, otherwise } => Node::Ite { cond: self.add(cond), then: self.add(then), otherwise: self.add(otherwise) },
      Term::Extract { hi, lo, arg } => Node::Extract { hi: *hi, lo: *lo, arg: self.add(arg) },
      Term::ZeroExt { by, arg } => Node::ZeroExt { by: *by, arg: self.add(arg) },
      Term::SignExt { by, arg } => Node::SignExt { by: *by, arg: self.add(arg) },
      Term::Concat { hi, lo } => Node::Concat { hi: self.add(hi), lo: self.add(lo) },
    };
    let table = &mut self.table;
    let i = *self.by_node.entry(node).or_insert_with_key(|node| {
      table.0.push(node.clone());
      table.0.len() - 1
    });
    self.by_address.insert(Arc::as_ptr(term), (term.clone(), i));
    i
  }

  pub fn finish(self) -> TermTable {
    self.table
  }
}

// Printing, in SMT-LIB syntax /////////////////////////////////////////////

impl fmt::Display for UnOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      UnOp::Clz => "clz",
      UnOp::Ctz => "ctz",
      UnOp::Popcnt => "popcnt",
    })
  }
}

impl fmt::Display for BinOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      BinOp::Add => "bvadd",
      BinOp::Sub => "bvsub",
      BinOp::Mul => "bvmul",
      BinOp::DivU => "bvudiv",
      BinOp::DivS => "bvsdiv",
      BinOp::RemU => "bvurem",
      BinOp::RemS => "bvsrem",
      BinOp::And => "bvand",
      BinOp::Or => "bvor",
      BinOp::Xor => "bvxor",
      BinOp::Shl => "bvshl",
      BinOp::ShrU => "bvlshr",
      BinOp::ShrS => "bvashr",
      BinOp::Rotl => "rotl",
      BinOp::Rotr => "rotr",
    })
  }
}

impl fmt::Display for CmpOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      CmpOp::Eq => "=",
      CmpOp::Ne => "distinct",
      CmpOp::LtU => "bvult",
      CmpOp::LtS => "bvslt",
      CmpOp::LeU => "bvule",
      CmpOp::LeS => "bvsle",
      CmpOp::GtU => "bvugt",
      CmpOp::GtS => "bvsgt",
      CmpOp::GeU => "bvuge",
      CmpOp::GeS => "bvsge",
    })
  }
}

/// Compound subterms used more than once are bound with `let`, innermost
/// first, and printed by name.
struct Printer<'t> {
  names: HashMap<*const Term, usize>,
  shared: Vec<&'t Term>,
}

impl<'t> Printer<'t> {
  fn new(root: &'t Term) -> Self {
    let mut uses = HashMap::new();
    let mut order = Vec::new();
    Self::visit(root, &mut uses, &mut order);
    let shared: Vec<&Term> = order.into_iter().filter(|t| !t.children().is_empty() && uses.get(&(*t as *const Term)).map_or(false, |&n| n > 1)).collect();
    let names = shared.iter().enumerate().map(|(i, t)| (*t as *const Term, i)).collect();
    Printer { names, shared }
  }

  /// Count the edges into each subterm, and list subterms children first.
  fn visit(t: &'t Term, uses: &mut HashMap<*const Term, usize>, order: &mut Vec<&'t Term>) {
    for child in t.children() {
      let n = uses.entry(Arc::as_ptr(child)).or_insert(0);
      *n += 1;
      if *n == 1 {
        Self::visit(child, uses, order);
      }
    }
    order.push(t);
  }

  fn child(&self, t: &Term, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.names.get(&(t as *const Term)) {
      Some(i) => write!(f, "t!{}", i),
      None => self.node(t, f),
    }
  }

  fn node(&self, t: &Term, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let head = match t {
      Term::Bool(b) => return write!(f, "{}", b),
      Term::Const { width, value } => return write!(f, "(_ bv{} {})", value, width),
      Term::Var { name, .. } => return write!(f, "{}", name),
      Term::Unary { op, .. } => op.to_string(),
      Term::Binary { op, .. } => op.to_string(),
      Term::Compare { op, .. } => op.to_string(),
      Term::Not(_) => "not".to_string(),
      Term::And(..) => "and".to_string(),
      Term::Or(..) => "or".to_string(),
      Term::Ite { .. } => "ite".to_string(),
      Term::Extract { hi, lo, .. } => format!("(_ extract {} {})", hi, lo),
      Term::ZeroExt { by, .. } => format!("(_ zero_extend {})", by),
      Term::SignExt { by, .. } => format!("(_ sign_extend {})", by),
      Term::Concat { .. } => "concat".to_string(),
    };
    write!(f, "({}", head)?;
    for child in t.children() {
      f.write_str(" ")?;
      self.child(child, f)?;
    }
    f.write_str(")")
  }
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let printer = Printer::new(self);
    for (i, t) in printer.shared.iter().enumerate() {
      write!(f, "(let ((t!{} ", i)?;
      printer.node(t, f)?;
      f.write_str(")) ")?;
    }
    printer.node(self, f)?;
    for _ in &printer.shared {
      f.write_str(")")?;
    }
    Ok(())
  }
}
