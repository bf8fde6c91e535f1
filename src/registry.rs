//! Registered modules, keyed by content hash.

use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use tracing::{debug, info};

pub use crate::address::ModuleHash;
use crate::{
  error::{Error, Result},
  manifest::Manifest,
  module::WasmModule,
  ty::FuncType,
};

/// Populated before a run starts and only read afterwards.
#[derive(Debug, Default)]
pub struct Registry {
  modules: BTreeMap<ModuleHash, Arc<WasmModule>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse, validate and store a module. Registering the same bytes again
  /// returns the same hash.
  pub fn register(&mut self, bytes: &[u8]) -> Result<ModuleHash> {
    let hash = ModuleHash::of(bytes);
    if !self.modules.contains_key(&hash) {
      let module = WasmModule::parse(bytes)?;
      debug!(hash = %hash.short(), size = bytes.len(), "registered module");
      self.modules.insert(hash, Arc::new(module));
    }
    Ok(hash)
  }

  pub fn register_file(&mut self, path: &Path) -> Result<ModuleHash> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    self.register(&bytes)
  }

  /// Register every contract of the manifest, in manifest order.
  pub fn register_manifest(&mut self, manifest: &Manifest) -> Result<Vec<(String, ModuleHash)>> {
    let mut res = Vec::new();
    for (name, path) in manifest.contracts() {
      let hash = self.register_file(&path)?;
      info!(contract = %name, hash = %hash.short(), "loaded contract");
      res.push((name, hash));
    }
    Ok(res)
  }

  pub fn resolve(&self, hash: &ModuleHash) -> Result<Arc<WasmModule>> {
    self.modules.get(hash).cloned().ok_or(Error::UnknownModule(*hash))
  }

  pub fn exports(&self, hash: &ModuleHash) -> Result<Vec<(String, FuncType)>> {
    Ok(self.resolve(hash)?.exported_functions())
  }

  pub fn contains(&self, hash: &ModuleHash) -> bool {
    self.modules.contains_key(hash)
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ty::ValType;

  #[test]
  fn register_is_idempotent() {
    let bytes = wat::parse_str(r#"(module (func (export "f") (param i64) (result i32) (i32.const 1)))"#).unwrap();
    let mut r = Registry::new();
    let h = r.register(&bytes).unwrap();
    assert_eq!(r.register(&bytes).unwrap(), h);
    assert_eq!(r.len(), 1);
    assert_eq!(r.exports(&h).unwrap(), vec![("f".to_string(), FuncType::new(vec![ValType::I64], vec![ValType::I32]))]);
    let missing = ModuleHash([7; 32]);
    assert!(matches!(r.resolve(&missing), Err(Error::UnknownModule(h)) if h == missing));
  }

  #[test]
  fn rejects_invalid_modules() {
    let mut r = Registry::new();
    assert!(matches!(r.register(b"\0asm\x01\0\0\0\x7f"), Err(Error::Parse(_))));
    assert!(r.is_empty());
  }
}
