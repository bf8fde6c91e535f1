//! How a single execution path ends.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{address::Address, registry::ModuleHash, value::Value};

/// WASM traps.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trap {
  #[error("unreachable executed")]
  Unreachable,
  #[error("integer divide by zero")]
  IntegerDivideByZero,
  #[error("integer overflow")]
  IntegerOverflow,
  #[error("out of bounds memory access")]
  MemoryOutOfBounds,
  #[error("call stack exhausted")]
  CallStackExhausted,
  #[error("undefined element")]
  UndefinedElement,
  #[error("indirect call type mismatch")]
  IndirectCallTypeMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentError {
  #[error("no registered module {0}")]
  UnknownModule(ModuleHash),
  #[error("address {0} is already in use")]
  AddressInUse(Address),
  #[error("data segment out of bounds")]
  DataOutOfBounds,
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationError {
  #[error("no contract at {0}")]
  NoContract(Address),
  #[error("no exported function `{0}`")]
  NoSuchFunction(String),
  #[error("`{0}` called with mismatched arguments")]
  SignatureMismatch(String),
  #[error("import `{module}.{name}` is not provided by the host")]
  UnresolvedImport { module: String, name: String },
}

/// Which budget ran out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
  Steps,
  Depth,
  States,
  Time,
}

impl fmt::Display for Budget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Budget::Steps => "instruction steps",
      Budget::Depth => "path depth",
      Budget::States => "explored states",
      Budget::Time => "time",
    })
  }
}

/// Why a path could be neither passed nor failed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckReason {
  #[error("budget exceeded: {0}")]
  BudgetExceeded(Budget),
  #[error("solver timeout")]
  SolverTimeout,
  #[error("non-concrete address or name in host call")]
  NonConcreteAddress,
  #[error("symbolic pointer without a unique value")]
  SymbolicPointer,
  #[error("unsupported instruction `{0}`")]
  Unsupported(String),
  #[error("invalid test signature: {0}")]
  InvalidTestSignature(String),
  #[error("init failed: {0}")]
  InitFailed(String),
}

/// The final status of one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
  /// The last entry call returned, with its result if any.
  Returned(Option<Value>),
  Trapped(Trap),
  Deployment(DeploymentError),
  Invocation(InvocationError),
  Stuck(StuckReason),
}

impl Termination {
  /// Whether the path ended in an error raised by the contract or the
  /// host on its behalf.
  pub fn is_failure(&self) -> bool {
    matches!(self, Termination::Trapped(_) | Termination::Deployment(_) | Termination::Invocation(_))
  }
}

impl fmt::Display for Termination {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Termination::Returned(Some(v)) => write!(f, "returned {}", v),
      Termination::Returned(None) => write!(f, "returned"),
      Termination::Trapped(t) => write!(f, "trapped: {}", t),
      Termination::Deployment(e) => write!(f, "deployment failed: {}", e),
      Termination::Invocation(e) => write!(f, "invocation failed: {}", e),
      Termination::Stuck(r) => write!(f, "stuck: {}", r),
    }
  }
}
