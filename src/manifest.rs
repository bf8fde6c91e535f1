//! The manifest mapping contract names to compiled artifacts.
//!
//! ```json
//! {
//!   "test_contract": "tests.wasm",
//!   "contracts": [{ "name": "adder", "path": "adder.wasm" }]
//! }
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use std::{
  collections::BTreeSet,
  fs,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
  pub name: String,
  pub path: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  #[serde(default)]
  pub test_contract: Option<PathBuf>,
  #[serde(default)]
  pub contracts: Vec<ContractEntry>,
  #[serde(skip)]
  base: PathBuf,
}

impl Manifest {
  pub fn load(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Self::parse(&text, path.parent().unwrap_or_else(|| Path::new(".")))
  }

  pub fn parse(text: &str, base: &Path) -> Result<Self> {
    let mut manifest: Manifest = serde_json::from_str(text).map_err(|e| Error::Manifest(e.to_string()))?;
    let mut seen = BTreeSet::new();
    for c in &manifest.contracts {
      if !seen.insert(c.name.as_str()) {
        return Err(Error::Manifest(format!("contract `{}` listed twice", c.name)));
      }
    }
    manifest.base = base.to_path_buf();
    Ok(manifest)
  }

  fn resolve(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base.join(path)
    }
  }

  pub fn test_contract_path(&self) -> Option<PathBuf> {
    self.test_contract.as_deref().map(|p| self.resolve(p))
  }

  /// Contract names and resolved paths, in manifest order.
  pub fn contracts(&self) -> Vec<(String, PathBuf)> {
    self.contracts.iter().map(|c| (c.name.clone(), self.resolve(&c.path))).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolves_relative_paths() {
    let m = Manifest::parse(
      r#"{"test_contract": "t.wasm", "contracts": [{"name": "a", "path": "a.wasm"}, {"name": "b", "path": "/abs/b.wasm"}]}"#,
      Path::new("/proj"),
    )
    .unwrap();
    assert_eq!(m.test_contract_path(), Some(PathBuf::from("/proj/t.wasm")));
    assert_eq!(
      m.contracts(),
      vec![("a".to_string(), PathBuf::from("/proj/a.wasm")), ("b".to_string(), PathBuf::from("/abs/b.wasm"))]
    );
  }

  #[test]
  fn rejects_duplicates_and_garbage() {
    let dup = r#"{"contracts": [{"name": "a", "path": "a.wasm"}, {"name": "a", "path": "b.wasm"}]}"#;
    assert!(matches!(Manifest::parse(dup, Path::new(".")), Err(Error::Manifest(_))));
    assert!(matches!(Manifest::parse("[", Path::new(".")), Err(Error::Manifest(_))));
    assert_eq!(Manifest::parse("{}", Path::new(".")).unwrap().contracts(), vec![]);
  }
}
