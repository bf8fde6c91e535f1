//! The z3 oracle.

use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

use tracing::trace;
use z3::{
  ast::{Ast, Bool, BV},
  Context, Params, SatResult, Solver,
};

use crate::{
  constraint::{Feasibility, Oracle, PathCondition, Solution, Symbols, Witness},
  context::with_context,
  term::{BinOp, CmpOp, Term, TermRef, UnOp},
};

/// A term translated into z3.
#[derive(Clone)]
enum Encoded<'ctx> {
  Bool(Bool<'ctx>),
  BV(BV<'ctx>),
}

impl<'ctx> Encoded<'ctx> {
  fn bool(self) -> Bool<'ctx> {
    match self {
      Encoded::Bool(b) => b,
      Encoded::BV(_) => unreachable!("bit-vector used as formula"),
    }
  }

  fn bv(self) -> BV<'ctx> {
    match self {
      Encoded::BV(b) => b,
      Encoded::Bool(_) => unreachable!("formula used as bit-vector"),
    }
  }
}

/// Translates terms, sharing the encoding of shared subterms. Cached terms
/// are kept alive so that their addresses are not reused.
struct Encoder<'ctx> {
  ctx: &'ctx Context,
  cache: HashMap<*const Term, (TermRef, Encoded<'ctx>)>,
}

impl<'ctx> Encoder<'ctx> {
  fn new(ctx: &'ctx Context) -> Self {
    Encoder { ctx, cache: HashMap::new() }
  }

  fn bv(&mut self, t: &TermRef) -> BV<'ctx> {
    self.encode(t).bv()
  }

  fn bool(&mut self, t: &TermRef) -> Bool<'ctx> {
    self.encode(t).bool()
  }

  fn encode(&mut self, t: &TermRef) -> Encoded<'ctx> {
    let key = std::sync::Arc::as_ptr(t);
    if let Some((_, e)) = self.cache.get(&key) {
      return e.clone();
    }
    let ctx = self.ctx;
    let res = match t.as_ref() {
      Term::Bool(b) => Encoded::Bool(Bool::from_bool(ctx, *b)),
      Term::Const { width, value } => Encoded::BV(BV::from_u64(ctx, *value, *width)),
      Term::Var { name, width } => Encoded::BV(BV::new_const(ctx, name.as_ref(), *width)),
      Term::Unary { op, arg } => {
        let w = arg.width();
        let a = self.bv(arg);
        Encoded::BV(unary(ctx, *op, &a, w))
      }
      Term::Binary { op, lhs, rhs } => {
        let w = lhs.width();
        let (a, b) = (self.bv(lhs), self.bv(rhs));
        // WASM takes shift counts modulo the width
        let count = || b.bvurem(&BV::from_u64(ctx, w as u64, w));
        Encoded::BV(match op {
          BinOp::Add => a.bvadd(&b),
          BinOp::Sub => a.bvsub(&b),
          BinOp::Mul => a.bvmul(&b),
          BinOp::DivU => a.bvudiv(&b),
          BinOp::DivS => a.bvsdiv(&b),
          BinOp::RemU => a.bvurem(&b),
          BinOp::RemS => a.bvsrem(&b),
          BinOp::And => a.bvand(&b),
          BinOp::Or => a.bvor(&b),
          BinOp::Xor => a.bvxor(&b),
          BinOp::Shl => a.bvshl(&count()),
          BinOp::ShrU => a.bvlshr(&count()),
          BinOp::ShrS => a.bvashr(&count()),
          BinOp::Rotl => a.bvrotl(&count()),
          BinOp::Rotr => a.bvrotr(&count()),
        })
      }
      Term::Compare { op, lhs, rhs } => {
        let (a, b) = (self.bv(lhs), self.bv(rhs));
        Encoded::Bool(match op {
          CmpOp::Eq => a._eq(&b),
          CmpOp::Ne => a._eq(&b).not(),
          CmpOp::LtU => a.bvult(&b),
          CmpOp::LtS => a.bvslt(&b),
          CmpOp::LeU => a.bvule(&b),
          CmpOp::LeS => a.bvsle(&b),
          CmpOp::GtU => a.bvugt(&b),
          CmpOp::GtS => a.bvsgt(&b),
          CmpOp::GeU => a.bvuge(&b),
          CmpOp::GeS => a.bvsge(&b),
        })
      }
      Term::Not(a) => Encoded::Bool(self.bool(a).not()),
      Term::And(a, b) => {
        let (a, b) = (self.bool(a), self.bool(b));
        Encoded::Bool(Bool::and(ctx, &[&a, &b]))
      }
      Term::Or(a, b) => {
        let (a, b) = (self.bool(a), self.bool(b));
        Encoded::Bool(Bool::or(ctx, &[&a, &b]))
      }
      Term::Ite { cond, then, otherwise } => {
        let c = self.bool(cond);
        match (self.encode(then), self.encode(otherwise)) {
          (Encoded::Bool(x), Encoded::Bool(y)) => Encoded::Bool(c.ite(&x, &y)),
          (x, y) => Encoded::BV(c.ite(&x.bv(), &y.bv())),
        }
      }
      Term::Extract { hi, lo, arg } => Encoded::BV(self.bv(arg).extract(*hi, *lo)),
      Term::ZeroExt { by, arg } => Encoded::BV(self.bv(arg).zero_ext(*by)),
      Term::SignExt { by, arg } => Encoded::BV(self.bv(arg).sign_ext(*by)),
      Term::Concat { hi, lo } => {
        let (h, l) = (self.bv(hi), self.bv(lo));
        Encoded::BV(h.concat(&l))
      }
    };
    self.cache.insert(key, (t.clone(), res.clone()));
    res
  }
}

/// Bit counting through single-bit extracts.
fn unary<'ctx>(ctx: &'ctx Context, op: UnOp, a: &BV<'ctx>, w: u32) -> BV<'ctx> {
  let bit = |i: u32| a.extract(i, i)._eq(&BV::from_u64(ctx, 1, 1));
  let k = |v: u32| BV::from_u64(ctx, v as u64, w);
  match op {
    UnOp::Popcnt => (0..w).fold(k(0), |acc, i| acc.bvadd(&a.extract(i, i).zero_ext(w - 1))),
    // the highest set bit is tested last, so it ends up outermost
    UnOp::Clz => (0..w).fold(k(w), |acc, i| bit(i).ite(&k(w - 1 - i), &acc)),
    UnOp::Ctz => (0..w).rev().fold(k(w), |acc, i| bit(i).ite(&k(i), &acc)),
  }
}

/// Decides path conditions with z3, one query per call.
#[derive(Clone, Debug)]
pub struct Z3Oracle {
  /// Per-query timeout.
  pub timeout: Duration,
  /// Global deadline every query timeout is clipped to.
  pub deadline: Option<Instant>,
}

impl Z3Oracle {
  pub fn new(timeout: Duration, deadline: Option<Instant>) -> Self {
    Z3Oracle { timeout, deadline }
  }

  fn query_timeout(&self) -> Option<Duration> {
    match self.deadline {
      Some(d) => {
        let left = d.checked_duration_since(Instant::now())?;
        (!left.is_zero()).then(|| left.min(self.timeout))
      }
      None => Some(self.timeout),
    }
  }

  /// Run `f` on a solver loaded with `path` and the domains of `symbols`.
  /// `None` if the deadline has passed.
  fn with_solver<R>(&self, path: &PathCondition, symbols: &Symbols, f: impl for<'ctx> FnOnce(&Solver<'ctx>, &mut Encoder<'ctx>) -> R) -> Option<R> {
    let timeout = self.query_timeout()?;
    Some(with_context(|ctx| {
      let solver = Solver::new(ctx);
      let mut params = Params::new(ctx);
      params.set_u32("timeout", timeout.as_millis().min(u32::MAX as u128) as u32);
      params.set_u32("random_seed", 0);
      solver.set_params(&params);
      let mut encoder = Encoder::new(ctx);
      for (name, domain) in symbols {
        if let Some(c) = domain.constraint(&Term::var(name, domain.ty.width())) {
          solver.assert(&encoder.bool(&c));
        }
      }
      for c in path.constraints() {
        solver.assert(&encoder.bool(c));
      }
      f(&solver, &mut encoder)
    }))
  }
}

impl Oracle for Z3Oracle {
  fn check(&self, path: &PathCondition, symbols: &Symbols) -> Feasibility {
    if path.is_trivially_false() {
      return Feasibility::Unsat;
    }
    if path.is_empty() && symbols.values().all(|d| !d.is_empty()) {
      return Feasibility::Sat;
    }
    let res = self.with_solver(path, symbols, |solver, _| solver.check()).unwrap_or(SatResult::Unknown);
    trace!(constraints = path.len(), result = ?res, "check");
    match res {
      SatResult::Sat => Feasibility::Sat,
      SatResult::Unsat => Feasibility::Unsat,
      SatResult::Unknown => Feasibility::Unknown,
    }
  }

  fn solve(&self, path: &PathCondition, symbols: &Symbols) -> Solution {
    if path.is_trivially_false() {
      return Solution::Unsat;
    }
    let res = self.with_solver(path, symbols, |solver, encoder| match solver.check() {
      SatResult::Sat => {
        let model = match solver.get_model() {
          Some(m) => m,
          None => return Solution::Unknown,
        };
        let mut witness = Witness::default();
        for (name, domain) in symbols {
          let var = encoder.bv(&Term::var(name, domain.ty.width()));
          match model.eval(&var, true).and_then(|v| v.as_u64()) {
            Some(v) => {
              witness.0.insert(name.clone(), v);
            }
            None => return Solution::Unknown,
          }
        }
        Solution::Witness(witness)
      }
      SatResult::Unsat => Solution::Unsat,
      SatResult::Unknown => Solution::Unknown,
    });
    res.unwrap_or(Solution::Unknown)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    constraint::Unique,
    ty::{Domain, ValType},
  };

  fn oracle() -> Z3Oracle {
    Z3Oracle::new(Duration::from_secs(10), None)
  }

  fn symbols(names: &[(&str, ValType)]) -> Symbols {
    names.iter().map(|(n, t)| (n.to_string(), Domain::full(*t))).collect()
  }

  #[test]
  fn finds_overflowing_sum() {
    let (a, b) = (Term::var("a", 32), Term::var("b", 32));
    let sum = Term::binary(BinOp::Add, a.clone(), b.clone());
    let path = PathCondition::new() & Term::compare(CmpOp::LtU, sum, a);
    let syms = symbols(&[("a", ValType::I32), ("b", ValType::I32)]);
    let Solution::Witness(w) = oracle().solve(&path, &syms) else { panic!("expected a witness") };
    assert!(w.get("a").unwrap() + w.get("b").unwrap() >= 1 << 32);
    assert!(path.holds(&w));
  }

  #[test]
  fn unsat_and_domains() {
    let x = Term::var("x", 64);
    let mut syms = symbols(&[("x", ValType::I64)]);
    let path = PathCondition::new() & Term::compare(CmpOp::GtU, x.clone(), Term::constant(64, 10));
    assert_eq!(oracle().check(&path, &syms), Feasibility::Sat);
    syms.insert("x".to_string(), Domain { ty: ValType::I64, min: 0, max: 10, signed: false });
    assert_eq!(oracle().check(&path, &syms), Feasibility::Unsat);
  }

  #[test]
  fn bit_counting_matches_concrete() {
    let x = Term::var("x", 32);
    for (op, expected) in [(UnOp::Popcnt, 3), (UnOp::Clz, 26), (UnOp::Ctz, 1)] {
      let path = PathCondition::new() & Term::compare(CmpOp::Eq, x.clone(), Term::constant(32, 0b1010_1000 >> 2));
      let t = Term::unary(op, x.clone());
      assert_eq!(oracle().unique_value(&path, &symbols(&[("x", ValType::I32)]), &t), Unique::Value(expected));
    }
  }

  #[test]
  fn past_deadline_is_unknown() {
    let o = Z3Oracle::new(Duration::from_secs(1), Some(Instant::now() - Duration::from_secs(1)));
    let path = PathCondition::new() & Term::compare(CmpOp::Eq, Term::var("x", 32), Term::constant(32, 1));
    assert_eq!(o.check(&path, &symbols(&[("x", ValType::I32)])), Feasibility::Unknown);
  }
}
