//! Path conditions and the constraint oracle.

use std::{
  collections::BTreeMap,
  fmt,
  ops::{BitAnd, BitAndAssign},
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
  term::{CmpOp, Evaluated, Term, TermRef},
  ty::Domain,
};

/// Symbolic variables of a state and their domains.
pub type Symbols = BTreeMap<String, Domain>;

/// Conjunction of the branch constraints taken along a path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathCondition(Vec<TermRef>);

impl PathCondition {
  pub fn new() -> Self {
    PathCondition(Vec::new())
  }

  /// Add a constraint. Trivially true constraints are dropped here; the
  /// proof tree edge that took them still records them.
  pub fn conjoin(&mut self, constraint: TermRef) {
    if constraint.as_bool() != Some(true) {
      self.0.push(constraint);
    }
  }

  pub fn constraints(&self) -> &[TermRef] {
    &self.0
  }

  /// Whether some conjunct is literally false.
  pub fn is_trivially_false(&self) -> bool {
    self.0.iter().any(|c| c.as_bool() == Some(false))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether `witness` satisfies every conjunct.
  pub fn holds(&self, witness: &Witness) -> bool {
    self.0.iter().all(|c| c.evaluate(&witness.0) == Some(Evaluated::Bool(true)))
  }
}

/// Impose another constraint.
impl BitAnd<TermRef> for PathCondition {
  type Output = Self;

  fn bitand(mut self, rhs: TermRef) -> Self::Output {
    self.conjoin(rhs);
    self
  }
}

impl BitAndAssign<TermRef> for PathCondition {
  fn bitand_assign(&mut self, rhs: TermRef) {
    self.conjoin(rhs);
  }
}

impl fmt::Display for PathCondition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      write!(f, "true")
    } else {
      write!(f, "(and {})", self.0.iter().format(" "))
    }
  }
}

/// A concrete assignment to symbolic variables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Witness(pub BTreeMap<String, u64>);

impl Witness {
  pub fn get(&self, name: &str) -> Option<u64> {
    self.0.get(name).copied()
  }

  /// Value of a bit-vector term under the witness.
  pub fn eval(&self, term: &TermRef) -> Option<u64> {
    match term.evaluate(&self.0)? {
      Evaluated::Bits(v) => Some(v),
      Evaluated::Bool(b) => Some(b as u64),
    }
  }
}

impl fmt::Display for Witness {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{{}}}", self.0.iter().map(|(k, v)| format!("{} = {}", k, v)).format(", "))
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feasibility {
  Sat,
  Unsat,
  Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Solution {
  Witness(Witness),
  Unsat,
  Unknown,
}

/// What a term can evaluate to under a path condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unique {
  Value(u64),
  Many,
  Unsat,
  Unknown,
}

/// Decision procedure for path conditions.
pub trait Oracle: Sync {
  fn check(&self, path: &PathCondition, symbols: &Symbols) -> Feasibility;

  /// A witness assigning every symbol in `symbols`.
  fn solve(&self, path: &PathCondition, symbols: &Symbols) -> Solution;

  /// The only value `term` can take under `path`, if there is one.
  fn unique_value(&self, path: &PathCondition, symbols: &Symbols, term: &TermRef) -> Unique {
    let witness = match self.solve(path, symbols) {
      Solution::Witness(w) => w,
      Solution::Unsat => return Unique::Unsat,
      Solution::Unknown => return Unique::Unknown,
    };
    let v = match witness.eval(term) {
      Some(v) => v,
      None => return Unique::Unknown,
    };
    let other = path.clone() & Term::compare(CmpOp::Ne, term.clone(), Term::constant(term.width(), v));
    match self.check(&other, symbols) {
      Feasibility::Unsat => Unique::Value(v),
      Feasibility::Sat => Unique::Many,
      Feasibility::Unknown => Unique::Unknown,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn conjoin_drops_true() {
    let mut pc = PathCondition::new();
    pc &= Term::tt();
    assert!(pc.is_empty());
    let x = Term::var("x", 32);
    pc &= Term::compare(CmpOp::LtU, x.clone(), Term::constant(32, 4));
    assert_eq!(pc.len(), 1);
    assert!(!pc.is_trivially_false());
    assert!((pc.clone() & Term::ff()).is_trivially_false());
    let w = Witness(vec![("x".to_string(), 3)].into_iter().collect());
    assert!(pc.holds(&w));
    assert_eq!(pc.to_string(), "(and (bvult x (_ bv4 32)))");
  }
}
