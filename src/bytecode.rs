//! Decoded function bodies.
//!
//! Operators are translated into [`Instr`], with the matching `else`/`end`
//! of every structured instruction resolved to an index in the body, so
//! that the interpreter never scans for them.

use wasmparser::{BlockType, FunctionBody, Operator};

use crate::{
  error::{Error, Result},
  term::{BinOp, CmpOp, UnOp},
  ty::{FuncType, ValType},
};

pub type CodeOffset = usize;

/// Number of values a block consumes and produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockSig {
  pub params: usize,
  pub results: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
  Unreachable,
  Nop,
  Block { sig: BlockSig, end: CodeOffset },
  Loop { sig: BlockSig },
  If { sig: BlockSig, otherwise: Option<CodeOffset>, end: CodeOffset },
  Else { end: CodeOffset },
  End,
  Br(u32),
  BrIf(u32),
  BrTable { targets: Vec<u32>, default: u32 },
  Return,
  Call(u32),
  CallIndirect { ty: u32 },
  Drop,
  Select,
  LocalGet(u32),
  LocalSet(u32),
  LocalTee(u32),
  GlobalGet(u32),
  GlobalSet(u32),
  /// Load `bytes` bytes, extending to `ty`.
  Load { ty: ValType, bytes: u32, signed: bool, offset: u64 },
  /// Store the low `bytes` bytes of the operand.
  Store { bytes: u32, offset: u64 },
  MemorySize,
  MemoryGrow,
  MemoryCopy,
  MemoryFill,
  Const { ty: ValType, bits: u64 },
  Eqz(ValType),
  Compare { ty: ValType, op: CmpOp },
  Unary { ty: ValType, op: UnOp },
  Binary { ty: ValType, op: BinOp },
  Wrap,
  Extend { signed: bool },
  /// Sign-extend the low `from` bits in place.
  SignExtend { ty: ValType, from: u32 },
  /// Reinterpret the bits of the operand as `to`.
  Reinterpret { to: ValType },
  /// An instruction outside the contract subset, by name.
  Unsupported(String),
}

fn block_sig(ty: BlockType, types: &[FuncType]) -> Result<BlockSig> {
  match ty {
    BlockType::Empty => Ok(BlockSig { params: 0, results: 0 }),
    BlockType::Type(_) => Ok(BlockSig { params: 0, results: 1 }),
    BlockType::FuncType(idx) => types
      .get(idx as usize)
      .map(|f| BlockSig { params: f.params.len(), results: f.results.len() })
      .ok_or_else(|| Error::Parse(format!("block type {} out of range", idx))),
  }
}

fn unsupported_name(op: &Operator) -> String {
  let repr = format!("{:?}", op);
  repr.split(|c: char| !c.is_alphanumeric()).next().unwrap_or_default().to_string()
}

fn translate_operator(op: &Operator, types: &[FuncType]) -> Result<Instr> {
  use ValType::*;
  use Operator as O;
  let load = |ty, bytes, signed, offset| Instr::Load { ty, bytes, signed, offset };
  let store = |bytes, offset| Instr::Store { bytes, offset };
  let instr = match op {
    O::Unreachable => Instr::Unreachable,
    O::Nop => Instr::Nop,
    // ends are patched by the caller
    O::Block { blockty } => Instr::Block { sig: block_sig(*blockty, types)?, end: 0 },
    O::Loop { blockty } => Instr::Loop { sig: block_sig(*blockty, types)? },
    O::If { blockty } => Instr::If { sig: block_sig(*blockty, types)?, otherwise: None, end: 0 },
    O::Else => Instr::Else { end: 0 },
    O::End => Instr::End,
    O::Br { relative_depth } => Instr::Br(*relative_depth),
    O::BrIf { relative_depth } => Instr::BrIf(*relative_depth),
    O::BrTable { targets } => Instr::BrTable {
      targets: targets.targets().collect::<std::result::Result<_, _>>()?,
      default: targets.default(),
    },
    O::Return => Instr::Return,
    O::Call { function_index } => Instr::Call(*function_index),
    O::CallIndirect { type_index, table_index, .. } if *table_index == 0 => Instr::CallIndirect { ty: *type_index },
    O::Drop => Instr::Drop,
    O::Select | O::TypedSelect { .. } => Instr::Select,
    O::LocalGet { local_index } => Instr::LocalGet(*local_index),
    O::LocalSet { local_index } => Instr::LocalSet(*local_index),
    O::LocalTee { local_index } => Instr::LocalTee(*local_index),
    O::GlobalGet { global_index } => Instr::GlobalGet(*global_index),
    O::GlobalSet { global_index } => Instr::GlobalSet(*global_index),

    O::I32Load { memarg } => load(I32, 4, false, memarg.offset),
    O::I64Load { memarg } => load(I64, 8, false, memarg.offset),
    O::F32Load { memarg } => load(F32, 4, false, memarg.offset),
    O::F64Load { memarg } => load(F64, 8, false, memarg.offset),
    O::I32Load8S { memarg } => load(I32, 1, true, memarg.offset),
    O::I32Load8U { memarg } => load(I32, 1, false, memarg.offset),
    O::I32Load16S { memarg } => load(I32, 2, true, memarg.offset),
    O::I32Load16U { memarg } => load(I32, 2, false, memarg.offset),
    O::I64Load8S { memarg } => load(I64, 1, true, memarg.offset),
    O::I64Load8U { memarg } => load(I64, 1, false, memarg.offset),
    O::I64Load16S { memarg } => load(I64, 2, true, memarg.offset),
    O::I64Load16U { memarg } => load(I64, 2, false, memarg.offset),
    O::I64Load32S { memarg } => load(I64, 4, true, memarg.offset),
    O::I64Load32U { memarg } => load(I64, 4, false, memarg.offset),
    O::I32Store { memarg } | O::F32Store { memarg } | O::I64Store32 { memarg } => store(4, memarg.offset),
    O::I64Store { memarg } | O::F64Store { memarg } => store(8, memarg.offset),
    O::I32Store8 { memarg } | O::I64Store8 { memarg } => store(1, memarg.offset),
    O::I32Store16 { memarg } | O::I64Store16 { memarg } => store(2, memarg.offset),
    O::MemorySize { .. } => Instr::MemorySize,
    O::MemoryGrow { .. } => Instr::MemoryGrow,
    O::MemoryCopy { .. } => Instr::MemoryCopy,
    O::MemoryFill { .. } => Instr::MemoryFill,

    O::I32Const { value } => Instr::Const { ty: I32, bits: *value as u32 as u64 },
    O::I64Const { value } => Instr::Const { ty: I64, bits: *value as u64 },
    O::F32Const { value } => Instr::Const { ty: F32, bits: value.bits() as u64 },
    O::F64Const { value } => Instr::Const { ty: F64, bits: value.bits() },

    O::I32Eqz => Instr::Eqz(I32),
    O::I64Eqz => Instr::Eqz(I64),
    O::I32Eq => Instr::Compare { ty: I32, op: CmpOp::Eq },
    O::I32Ne => Instr::Compare { ty: I32, op: CmpOp::Ne },
    O::I32LtS => Instr::Compare { ty: I32, op: CmpOp::LtS },
    O::I32LtU => Instr::Compare { ty: I32, op: CmpOp::LtU },
    O::I32GtS => Instr::Compare { ty: I32, op: CmpOp::GtS },
    O::I32GtU => Instr::Compare { ty: I32, op: CmpOp::GtU },
    O::I32LeS => Instr::Compare { ty: I32, op: CmpOp::LeS },
    O::I32LeU => Instr::Compare { ty: I32, op: CmpOp::LeU },
    O::I32GeS => Instr::Compare { ty: I32, op: CmpOp::GeS },
    O::I32GeU => Instr::Compare { ty: I32, op: CmpOp::GeU },
    O::I64Eq => Instr::Compare { ty: I64, op: CmpOp::Eq },
    O::I64Ne => Instr::Compare { ty: I64, op: CmpOp::Ne },
    O::I64LtS => Instr::Compare { ty: I64, op: CmpOp::LtS },
    O::I64LtU => Instr::Compare { ty: I64, op: CmpOp::LtU },
    O::I64GtS => Instr::Compare { ty: I64, op: CmpOp::GtS },
    O::I64GtU => Instr::Compare { ty: I64, op: CmpOp::GtU },
    O::I64LeS => Instr::Compare { ty: I64, op: CmpOp::LeS },
    O::I64LeU => Instr::Compare { ty: I64, op: CmpOp::LeU },
    O::I64GeS => Instr::Compare { ty: I64, op: CmpOp::GeS },
    O::I64GeU => Instr::Compare { ty: I64, op: CmpOp::GeU },

    O::I32Clz => Instr::Unary { ty: I32, op: UnOp::Clz },
    O::I32Ctz => Instr::Unary { ty: I32, op: UnOp::Ctz },
    O::I32Popcnt => Instr::Unary { ty: I32, op: UnOp::Popcnt },
    O::I64Clz => Instr::Unary { ty: I64, op: UnOp::Clz },
    O::I64Ctz => Instr::Unary { ty: I64, op: UnOp::Ctz },
    O::I64Popcnt => Instr::Unary { ty: I64, op: UnOp::Popcnt },

    O::I32Add => Instr::Binary { ty: I32, op: BinOp::Add },
    O::I32Sub => Instr::Binary { ty: I32, op: BinOp::Sub },
    O::I32Mul => Instr::Binary { ty: I32, op: BinOp::Mul },
    O::I32DivS => Instr::Binary { ty: I32, op: BinOp::DivS },
    O::I32DivU => Instr::Binary { ty: I32, op: BinOp::DivU },
    O::I32RemS => Instr::Binary { ty: I32, op: BinOp::RemS },
    O::I32RemU => Instr::Binary { ty: I32, op: BinOp::RemU },
    O::I32And => Instr::Binary { ty: I32, op: BinOp::And },
    O::I32Or => Instr::Binary { ty: I32, op: BinOp::Or },
    O::I32Xor => Instr::Binary { ty: I32, op: BinOp::Xor },
    O::I32Shl => Instr::Binary { ty: I32, op: BinOp::Shl },
    O::I32ShrS => Instr::Binary { ty: I32, op: BinOp::ShrS },
    O::I32ShrU => Instr::Binary { ty: I32, op: BinOp::ShrU },
    O::I32Rotl => Instr::Binary { ty: I32, op: BinOp::Rotl },
    O::I32Rotr => Instr::Binary { ty: I32, op: BinOp::Rotr },
    O::I64Add => Instr::Binary { ty: I64, op: BinOp::Add },
    O::I64Sub => Instr::Binary { ty: I64, op: BinOp::Sub },
    O::I64Mul => Instr::Binary { ty: I64, op: BinOp::Mul },
    O::I64DivS => Instr::Binary { ty: I64, op: BinOp::DivS },
    O::I64DivU => Instr::Binary { ty: I64, op: BinOp::DivU },
    O::I64RemS => Instr::Binary { ty: I64, op: BinOp::RemS },
    O::I64RemU => Instr::Binary { ty: I64, op: BinOp::RemU },
    O::I64And => Instr::Binary { ty: I64, op: BinOp::And },
    O::I64Or => Instr::Binary { ty: I64, op: BinOp::Or },
    O::I64Xor => Instr::Binary { ty: I64, op: BinOp::Xor },
    O::I64Shl => Instr::Binary { ty: I64, op: BinOp::Shl },
    O::I64ShrS => Instr::Binary { ty: I64, op: BinOp::ShrS },
    O::I64ShrU => Instr::Binary { ty: I64, op: BinOp::ShrU },
    O::I64Rotl => Instr::Binary { ty: I64, op: BinOp::Rotl },
    O::I64Rotr => Instr::Binary { ty: I64, op: BinOp::Rotr },

    O::I32WrapI64 => Instr::Wrap,
    O::I64ExtendI32S => Instr::Extend { signed: true },
    O::I64ExtendI32U => Instr::Extend { signed: false },
    O::I32Extend8S => Instr::SignExtend { ty: I32, from: 8 },
    O::I32Extend16S => Instr::SignExtend { ty: I32, from: 16 },
    O::I64Extend8S => Instr::SignExtend { ty: I64, from: 8 },
    O::I64Extend16S => Instr::SignExtend { ty: I64, from: 16 },
    O::I64Extend32S => Instr::SignExtend { ty: I64, from: 32 },
    O::I32ReinterpretF32 => Instr::Reinterpret { to: I32 },
    O::I64ReinterpretF64 => Instr::Reinterpret { to: I64 },
    O::F32ReinterpretI32 => Instr::Reinterpret { to: F32 },
    O::F64ReinterpretI64 => Instr::Reinterpret { to: F64 },

    other => Instr::Unsupported(unsupported_name(other)),
  };
  Ok(instr)
}

/// Decode a function body, returning its declared locals (without
/// parameters) and its instructions.
pub fn translate(body: &FunctionBody, types: &[FuncType]) -> Result<(Vec<ValType>, Vec<Instr>)> {
  let mut locals = Vec::new();
  for local in body.get_locals_reader()? {
    let (count, ty) = local?;
    let ty = ValType::try_from(ty)?;
    locals.extend(std::iter::repeat(ty).take(count as usize));
  }

  let mut code = Vec::new();
  // indices of the open block, loop and if instructions
  let mut open: Vec<CodeOffset> = Vec::new();
  let mut reader = body.get_operators_reader()?;
  while !reader.eof() {
    let op = reader.read()?;
    let at = code.len();
    let instr = translate_operator(&op, types)?;
    match instr {
      Instr::Block { .. } | Instr::Loop { .. } | Instr::If { .. } => open.push(at),
      Instr::Else { .. } => {
        let start = *open.last().ok_or_else(|| Error::Parse("`else` outside of `if`".to_string()))?;
        if let Instr::If { otherwise, .. } = &mut code[start] {
          *otherwise = Some(at);
        }
      }
      Instr::End => {
        // the final `end` closes the function body itself
        if let Some(start) = open.pop() {
          match &mut code[start] {
            Instr::Block { end, .. } => *end = at,
            Instr::If { otherwise, end, .. } => {
              *end = at;
              if let Some(e) = *otherwise {
                code[e] = Instr::Else { end: at };
              }
            }
            _ => {}
          }
        }
      }
      _ => {}
    }
    code.push(instr);
  }
  if !open.is_empty() {
    return Err(Error::Parse("unterminated block".to_string()));
  }
  Ok((locals, code))
}
