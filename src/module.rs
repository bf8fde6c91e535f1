//! Parsed and validated WASM modules.

use std::collections::BTreeMap;

use tracing::debug;
use wasmparser::{ConstExpr, DataKind, ElementItems, ElementKind, ExternalKind, Operator, Parser, Payload, TypeRef, Validator};

use crate::{
  bytecode::{self, Instr},
  error::{Error, Result},
  host::HostFunction,
  ty::{Domains, FuncType, ValType},
};

/// A function defined in the module.
#[derive(Clone, Debug)]
pub struct Function {
  pub ty: FuncType,
  /// Declared locals, parameters excluded.
  pub locals: Vec<ValType>,
  pub body: Vec<Instr>,
}

/// A function import, resolved against the host ABI where possible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Import {
  Host(HostFunction),
  Unresolved { module: String, name: String },
}

#[derive(Clone, Copy, Debug)]
pub struct Global {
  pub ty: ValType,
  pub mutable: bool,
  pub init: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryLimits {
  pub initial: u32,
  pub maximum: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct DataSegment {
  pub offset: u32,
  pub bytes: Vec<u8>,
}

/// The callee behind a function index.
pub enum Callee<'a> {
  Import(&'a Import, &'a FuncType),
  Defined(&'a Function),
}

#[derive(Clone, Debug, Default)]
pub struct WasmModule {
  pub types: Vec<FuncType>,
  /// Function imports, which come first in the function index space.
  pub imports: Vec<(Import, FuncType)>,
  pub functions: Vec<Function>,
  pub exports: BTreeMap<String, u32>,
  pub memory: Option<MemoryLimits>,
  pub globals: Vec<Global>,
  pub data: Vec<DataSegment>,
  /// Table 0 after applying active element segments.
  pub table: Vec<Option<u32>>,
  pub start: Option<u32>,
  pub domains: Domains,
  pub custom_sections: Vec<String>,
}

fn eval_const(expr: &ConstExpr, globals: &[Global]) -> Result<u64> {
  let mut reader = expr.get_operators_reader();
  let mut value = None;
  while !reader.eof() {
    match reader.read()? {
      Operator::I32Const { value: v } => value = Some(v as u32 as u64),
      Operator::I64Const { value: v } => value = Some(v as u64),
      Operator::F32Const { value: v } => value = Some(v.bits() as u64),
      Operator::F64Const { value: v } => value = Some(v.bits()),
      Operator::GlobalGet { global_index } => {
        let g = globals.get(global_index as usize).ok_or_else(|| Error::Parse(format!("global {} out of range", global_index)))?;
        value = Some(g.init);
      }
      Operator::RefFunc { function_index } => value = Some(function_index as u64),
      Operator::End => break,
      other => return Err(Error::Unsupported(format!("constant expression {:?}", other))),
    }
  }
  value.ok_or_else(|| Error::Parse("empty constant expression".to_string()))
}

impl WasmModule {
  /// Validate and decode `bytes`.
  pub fn parse(bytes: &[u8]) -> Result<Self> {
    Validator::new().validate_all(bytes)?;

    let mut module = WasmModule::default();
    let mut func_types: Vec<u32> = Vec::new();
    let mut code_index = 0;

    for payload in Parser::new(0).parse_all(bytes) {
      match payload? {
        Payload::TypeSection(reader) => {
          for rec_group in reader {
            for sub_type in rec_group?.types() {
              let f = sub_type.composite_type.unwrap_func();
              let params = f.params().iter().map(|&t| ValType::try_from(t)).collect::<Result<_>>()?;
              let results = f.results().iter().map(|&t| ValType::try_from(t)).collect::<Result<_>>()?;
              module.types.push(FuncType::new(params, results));
            }
          }
        }
        Payload::ImportSection(reader) => {
          for import in reader {
            let import = import?;
            match import.ty {
              TypeRef::Func(idx) => {
                let ty = module.types.get(idx as usize).cloned().unwrap_or_default();
                let resolved = match HostFunction::resolve(import.module, import.name, &ty) {
                  Some(host) => Import::Host(host),
                  None => Import::Unresolved { module: import.module.to_string(), name: import.name.to_string() },
                };
                module.imports.push((resolved, ty));
              }
              other => return Err(Error::Unsupported(format!("import `{}.{}` of kind {:?}", import.module, import.name, other))),
            }
          }
        }
        Payload::FunctionSection(reader) => {
          for ty in reader {
            func_types.push(ty?);
          }
        }
        Payload::TableSection(reader) => {
          for table in reader {
            let table = table?;
            if module.table.is_empty() {
              module.table = vec![None; table.ty.initial as usize];
            }
          }
        }
        Payload::MemorySection(reader) => {
          for memory in reader {
            let memory = memory?;
            if module.memory.is_some() || memory.memory64 || memory.shared {
              return Err(Error::Unsupported("memory other than a single 32-bit unshared memory".to_string()));
            }
            module.memory = Some(MemoryLimits { initial: memory.initial as u32, maximum: memory.maximum.map(|m| m as u32) });
          }
        }
        Payload::GlobalSection(reader) => {
          for global in reader {
            let global = global?;
            let init = eval_const(&global.init_expr, &module.globals)?;
            module.globals.push(Global { ty: ValType::try_from(global.ty.content_type)?, mutable: global.ty.mutable, init });
          }
        }
        Payload::ExportSection(reader) => {
          for export in reader {
            let export = export?;
            if let ExternalKind::Func = export.kind {
              module.exports.insert(export.name.to_string(), export.index);
            }
          }
        }
        Payload::StartSection { func, .. } => module.start = Some(func),
        Payload::ElementSection(reader) => {
          for element in reader {
            let element = element?;
            let offset = match element.kind {
              ElementKind::Active { offset_expr, .. } => eval_const(&offset_expr, &module.globals)? as usize,
              _ => continue,
            };
            let mut funcs = Vec::new();
            match element.items {
              ElementItems::Functions(items) => {
                for f in items {
                  funcs.push(Some(f?));
                }
              }
              ElementItems::Expressions(_, items) => {
                for expr in items {
                  // ref.null evaluates to nothing
                  funcs.push(eval_const(&expr?, &module.globals).ok().map(|f| f as u32));
                }
              }
            }
            let end = offset + funcs.len();
            if end > module.table.len() {
              return Err(Error::Parse("element segment out of table bounds".to_string()));
            }
            for (slot, f) in module.table[offset..end].iter_mut().zip(funcs) {
              *slot = f;
            }
          }
        }
        Payload::DataSection(reader) => {
          for data in reader {
            let data = data?;
            if let DataKind::Active { offset_expr, .. } = data.kind {
              let offset = eval_const(&offset_expr, &module.globals)? as u32;
              module.data.push(DataSegment { offset, bytes: data.data.to_vec() });
            }
          }
        }
        Payload::CodeSectionEntry(body) => {
          let ty_idx = func_types.get(code_index).copied().ok_or_else(|| Error::Parse("function without type".to_string()))?;
          code_index += 1;
          let ty = module.types.get(ty_idx as usize).cloned().ok_or_else(|| Error::Parse(format!("type {} out of range", ty_idx)))?;
          let (locals, body) = bytecode::translate(&body, &module.types)?;
          module.functions.push(Function { ty, locals, body });
        }
        Payload::CustomSection(reader) => {
          if reader.name() == Domains::SECTION {
            module.domains = Domains::parse(reader.data())?;
          }
          module.custom_sections.push(reader.name().to_string());
        }
        _ => {}
      }
    }
    debug!(
      imports = module.imports.len(),
      functions = module.functions.len(),
      exports = module.exports.len(),
      "parsed module"
    );
    Ok(module)
  }

  pub fn num_functions(&self) -> usize {
    self.imports.len() + self.functions.len()
  }

  pub fn callee(&self, idx: u32) -> Option<Callee<'_>> {
    let idx = idx as usize;
    match self.imports.get(idx) {
      Some((import, ty)) => Some(Callee::Import(import, ty)),
      None => self.functions.get(idx - self.imports.len()).map(Callee::Defined),
    }
  }

  pub fn func_type(&self, idx: u32) -> Option<&FuncType> {
    match self.callee(idx)? {
      Callee::Import(_, ty) => Some(ty),
      Callee::Defined(f) => Some(&f.ty),
    }
  }

  /// Function index and signature of an exported function.
  pub fn export(&self, name: &str) -> Option<(u32, &FuncType)> {
    let idx = *self.exports.get(name)?;
    Some((idx, self.func_type(idx)?))
  }

  /// Exported functions and their signatures, sorted by name.
  pub fn exported_functions(&self) -> Vec<(String, FuncType)> {
    self.exports.keys().filter_map(|name| Some((name.clone(), self.export(name)?.1.clone()))).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_imports_exports_and_segments() {
    let bytes = wat::parse_str(
      r#"(module
           (import "env" "storage_get" (func $get (param i64) (result i64)))
           (import "env" "mystery" (func (param i32)))
           (memory 1)
           (global $g (mut i32) (i32.const 7))
           (table 2 funcref)
           (elem (i32.const 1) $f)
           (data (i32.const 16) "hi")
           (func $f (export "test_f") (param i32) (result i32) (local i64) (local.get 0))
           (@custom "domains" "{\"test_f\": [{\"max\": 9}]}"))"#,
    )
    .unwrap();
    let m = WasmModule::parse(&bytes).unwrap();
    assert_eq!(m.imports[0].0, Import::Host(HostFunction::StorageGet));
    assert!(matches!(&m.imports[1].0, Import::Unresolved { name, .. } if name == "mystery"));
    assert_eq!(m.memory, Some(MemoryLimits { initial: 1, maximum: None }));
    assert_eq!(m.globals[0].init, 7);
    assert_eq!(m.table, vec![None, Some(2)]);
    assert_eq!(m.data[0].offset, 16);
    assert_eq!(m.functions[0].locals, vec![ValType::I64]);
    let (idx, ty) = m.export("test_f").unwrap();
    assert_eq!(idx, 2);
    assert_eq!(ty, &FuncType::new(vec![ValType::I32], vec![ValType::I32]));
    assert_eq!(m.domains.of("test_f", &[ValType::I32])[0].max, 9);
  }

  #[test]
  fn rejects_invalid_modules() {
    assert!(matches!(WasmModule::parse(b"\0asm\x01\0\0\0garbage"), Err(Error::Parse(_))));
    let imported_memory = wat::parse_str(r#"(module (import "env" "memory" (memory 1)))"#).unwrap();
    assert!(matches!(WasmModule::parse(&imported_memory), Err(Error::Unsupported(_))));
  }
}
