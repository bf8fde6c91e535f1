//! Verdicts of single paths and of whole tests.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{constraint::Witness, state::termination::StuckReason};

/// Inputs that make a test fail, and how it fails with them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
  pub witness: Witness,
  /// Arguments in parameter order, printed per their domains.
  pub args: Vec<String>,
  pub outcome: String,
}

impl fmt::Display for Counterexample {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}) {}", self.args.iter().format(", "), self.outcome)
  }
}

/// The verdict of one leaf of the exploration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
  Passed,
  Failed(Counterexample),
  Stuck(StuckReason),
  Infeasible,
}

impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Verdict::Passed => write!(f, "passed"),
      Verdict::Failed(c) => write!(f, "FAILED {}", c),
      Verdict::Stuck(r) => write!(f, "stuck: {}", r),
      Verdict::Infeasible => write!(f, "infeasible"),
    }
  }
}

/// How strong a pass is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guarantee {
  /// Every feasible path was explored and passed.
  Proved,
  /// The iteration budget ran out without a failure.
  Fuzzed { iterations: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TestVerdict {
  Passed(Guarantee),
  Failed(Counterexample),
  /// Distinct reasons, sorted.
  Stuck(Vec<StuckReason>),
}

impl TestVerdict {
  /// Combine leaf verdicts of a symbolic exploration. The first failure in
  /// `leaves` wins; a pass needs an exhaustive exploration.
  pub fn aggregate<'a>(leaves: impl IntoIterator<Item = &'a Verdict>, exhaustive: bool) -> TestVerdict {
    let mut reasons = Vec::new();
    for leaf in leaves {
      match leaf {
        Verdict::Failed(c) => return TestVerdict::Failed(c.clone()),
        Verdict::Stuck(r) => reasons.push(r.clone()),
        Verdict::Passed | Verdict::Infeasible => {}
      }
    }
    if reasons.is_empty() && !exhaustive {
      reasons.push(StuckReason::BudgetExceeded(crate::state::termination::Budget::States));
    }
    if reasons.is_empty() {
      TestVerdict::Passed(Guarantee::Proved)
    } else {
      TestVerdict::Stuck(reasons.into_iter().sorted().dedup().collect())
    }
  }

  pub fn is_passed(&self) -> bool {
    matches!(self, TestVerdict::Passed(_))
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, TestVerdict::Failed(_))
  }

  pub fn is_stuck(&self) -> bool {
    matches!(self, TestVerdict::Stuck(_))
  }
}

impl fmt::Display for TestVerdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TestVerdict::Passed(Guarantee::Proved) => write!(f, "PASSED (proved)"),
      TestVerdict::Passed(Guarantee::Fuzzed { iterations }) => write!(f, "PASSED (fuzzed, {} iterations)", iterations),
      TestVerdict::Failed(c) => write!(f, "FAILED {}", c),
      TestVerdict::Stuck(reasons) => write!(f, "STUCK ({})", reasons.iter().format("; ")),
    }
  }
}
