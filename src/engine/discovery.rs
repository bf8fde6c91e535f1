//! Finding `init` and the tests among a module's exports.

use tracing::warn;

use crate::{
  error::{Error, Result},
  module::WasmModule,
  state::termination::StuckReason,
  ty::{Domain, FuncType, ValType},
};

pub const INIT: &str = "init";
pub const TEST_PREFIX: &str = "test_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFunction {
  pub name: String,
  pub params: Vec<ValType>,
  pub domains: Vec<Domain>,
}

impl TestFunction {
  /// Name of the symbolic variable or witness entry of parameter `i`.
  pub fn arg_name(i: usize) -> String {
    format!("arg{}", i)
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitFunction {
  /// Parameters after the contract hash pointers.
  pub inputs: Vec<ValType>,
  pub domains: Vec<Domain>,
}

impl InitFunction {
  pub fn arg_name(i: usize) -> String {
    format!("init.arg{}", i)
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discovery {
  pub init: Option<InitFunction>,
  /// Sorted by name.
  pub tests: Vec<TestFunction>,
  /// Tests whose signature cannot be run.
  pub rejected: Vec<(String, StuckReason)>,
}

impl Discovery {
  pub fn test(&self, name: &str) -> Option<&TestFunction> {
    self.tests.iter().find(|t| t.name == name)
  }
}

fn is_int(ty: &ValType) -> bool {
  ty.is_int()
}

/// `init` takes one `i32` hash pointer per manifest contract, then integer
/// inputs.
fn check_init(ty: &FuncType, contracts: usize) -> Result<Vec<ValType>> {
  let pointers_ok = ty.params.len() >= contracts && ty.params[..contracts].iter().all(|&t| t == ValType::I32);
  if !pointers_ok || !ty.params.iter().all(is_int) || ty.results.len() > 1 || !ty.results.iter().all(is_int) {
    return Err(Error::InitFailed(format!("`init` has signature {}, expected {} i32 hash pointers then integer inputs", ty, contracts)));
  }
  Ok(ty.params[contracts..].to_vec())
}

/// Tests take integers and return one integer, non-zero meaning success.
fn check_test(ty: &FuncType) -> bool {
  ty.params.iter().all(is_int) && ty.results.len() == 1 && is_int(&ty.results[0])
}

pub fn discover(module: &WasmModule, contracts: usize) -> Result<Discovery> {
  let mut res = Discovery::default();
  for (name, ty) in module.exported_functions() {
    if name == INIT {
      let inputs = check_init(&ty, contracts)?;
      let domains = module.domains.of(INIT, &ty.params)[contracts..].to_vec();
      res.init = Some(InitFunction { inputs, domains });
    } else if name.starts_with(TEST_PREFIX) {
      if !check_test(&ty) {
        warn!(test = %name, signature = %ty, "rejecting test");
        res.rejected.push((name.clone(), StuckReason::InvalidTestSignature(ty.to_string())));
        continue;
      }
      let domains = module.domains.of(&name, &ty.params);
      res.tests.push(TestFunction { name, params: ty.params, domains });
    }
  }
  Ok(res)
}
