//! Run reports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
  proof::LeafCounts,
  registry::ModuleHash,
  state::{termination::StuckReason, Mode},
  verdict::TestVerdict,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
  pub name: String,
  pub verdict: TestVerdict,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exhaustive: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub counts: Option<LeafCounts>,
  /// Fuzzing iterations run.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub iterations: Option<u64>,
  /// Where the proof tree was saved.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub proof: Option<PathBuf>,
}

impl TestReport {
  pub fn new(name: String, verdict: TestVerdict) -> Self {
    TestReport { name, verdict, exhaustive: None, counts: None, iterations: None, proof: None }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
  pub mode: Mode,
  pub module: ModuleHash,
  pub tests: Vec<TestReport>,
}

impl Report {
  pub fn new(mode: Mode, module: ModuleHash) -> Self {
    Report { mode, module, tests: Vec::new() }
  }

  /// Add tests whose signature was rejected, keeping the tests sorted.
  pub fn reject(&mut self, rejected: &[(String, StuckReason)]) {
    for (name, reason) in rejected {
      self.tests.push(TestReport::new(name.clone(), TestVerdict::Stuck(vec![reason.clone()])));
    }
    self.tests.sort_by(|a, b| a.name.cmp(&b.name));
  }

  pub fn passed(&self) -> usize {
    self.tests.iter().filter(|t| t.verdict.is_passed()).count()
  }

  pub fn failed(&self) -> usize {
    self.tests.iter().filter(|t| t.verdict.is_failed()).count()
  }

  pub fn stuck(&self) -> usize {
    self.tests.iter().filter(|t| t.verdict.is_stuck()).count()
  }

  /// 0 if every test passed, 1 if any failed, 2 if none failed but some
  /// got stuck.
  pub fn exit_code(&self) -> i32 {
    if self.failed() > 0 {
      1
    } else if self.stuck() > 0 {
      2
    } else {
      0
    }
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    let mode = match self.mode {
      Mode::Concrete => "fuzzing",
      Mode::Symbolic => "proving",
    };
    out.push_str(&format!("{} {} tests of module {}\n", mode, self.tests.len(), self.module));
    for t in &self.tests {
      out.push_str(&format!("  {} ... {}\n", t.name, t.verdict));
      if let Some(c) = &t.counts {
        let limited = if t.exhaustive == Some(true) { "" } else { " (not exhaustive)" };
        out.push_str(&format!("      paths: {} passed, {} failed, {} stuck, {} infeasible{}\n", c.passed, c.failed, c.stuck, c.infeasible, limited));
      }
      if let Some(path) = &t.proof {
        out.push_str(&format!("      proof: {}\n", path.display()));
      }
    }
    out.push_str(&format!("{} passed, {} failed, {} stuck\n", self.passed(), self.failed(), self.stuck()));
    out
  }
}
