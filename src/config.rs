//! Run configuration.
//!
//! Every field has a default; a JSON file may set any subset, and command
//! line flags override both.

use std::{fmt, fs, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Order in which pending states are expanded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  DepthFirst,
  BreadthFirst,
}

/// Semantics of integer `add`, `sub` and `mul`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
  /// WASM semantics; overflow checks are explicit in the contract.
  Wrapping,
  /// Overflow traps, operands read as unsigned. `0 - x` traps for every
  /// non-zero `x`.
  Checked,
  /// Overflow traps, operands read as two's complement.
  CheckedSigned,
}

impl OverflowPolicy {
  /// `None` if arithmetic wraps, otherwise whether operands are signed.
  pub fn checks(self) -> Option<bool> {
    match self {
      OverflowPolicy::Wrapping => None,
      OverflowPolicy::Checked => Some(false),
      OverflowPolicy::CheckedSigned => Some(true),
    }
  }
}

macro_rules! kebab_enum {
  ($ty:ident { $($variant:ident => $name:literal),* }) => {
    impl FromStr for $ty {
      type Err = String;

      fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
          $($name => Ok($ty::$variant),)*
          _ => Err(format!("expected one of: {}", [$($name),*].join(", "))),
        }
      }
    }

    impl fmt::Display for $ty {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { $($ty::$variant => $name,)* })
      }
    }
  };
}

kebab_enum!(Strategy { DepthFirst => "depth-first", BreadthFirst => "breadth-first" });
kebab_enum!(OverflowPolicy { Wrapping => "wrapping", Checked => "checked", CheckedSigned => "checked-signed" });

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Fuzz iterations per test.
  pub iterations: u64,
  pub seed: u64,
  /// Candidate inputs tried while shrinking.
  pub shrink_limit: usize,
  /// Instructions executed along one path.
  pub max_steps: u64,
  /// Forks along one path.
  pub max_depth: usize,
  pub max_call_depth: usize,
  /// States expanded per test.
  pub max_states: usize,
  /// Wall-clock limit per test, in seconds.
  pub timeout: Option<u64>,
  /// Per solver query, in milliseconds.
  pub solver_timeout: u64,
  pub strategy: Strategy,
  /// Worker threads; 0 uses every core.
  pub jobs: usize,
  pub overflow: OverflowPolicy,
  pub stop_on_failure: bool,
  /// Upper bound on any memory's size, in pages.
  pub max_memory_pages: u32,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      iterations: 256,
      seed: 0,
      shrink_limit: 512,
      max_steps: 1_000_000,
      max_depth: 64,
      max_call_depth: 256,
      max_states: 10_000,
      timeout: None,
      solver_timeout: 10_000,
      strategy: Strategy::DepthFirst,
      jobs: 0,
      overflow: OverflowPolicy::Wrapping,
      stop_on_failure: true,
      max_memory_pages: 256,
    }
  }
}

impl Config {
  pub fn load(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self> {
    serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
  }

  pub fn solver_timeout(&self) -> Duration {
    Duration::from_millis(self.solver_timeout)
  }

  pub fn deadline(&self) -> Option<Duration> {
    self.timeout.map(Duration::from_secs)
  }
}
