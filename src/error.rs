//! Run-level errors. Outcomes of a single execution path are not errors;
//! they live in [`crate::state::termination`].

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::registry::ModuleHash;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown module {0}")]
  UnknownModule(ModuleHash),
  #[error("malformed module: {0}")]
  Parse(String),
  #[error("unsupported: {0}")]
  Unsupported(String),
  #[error("{}: {source}", path.display())]
  Io { path: PathBuf, source: io::Error },
  #[error("malformed manifest: {0}")]
  Manifest(String),
  #[error("malformed configuration: {0}")]
  Config(String),
  #[error("malformed proof: {0}")]
  Proof(String),
  #[error("no stored proof for `{0}`")]
  ProofNotFound(String),
  #[error("no test named `{0}`")]
  UnknownTest(String),
  #[error("`init` failed: {0}")]
  InitFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Error::Io { path: path.into(), source }
  }
}

impl From<wasmparser::BinaryReaderError> for Error {
  fn from(e: wasmparser::BinaryReaderError) -> Self {
    Error::Parse(e.to_string())
  }
}
