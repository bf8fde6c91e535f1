//! Linear memory.
//!
//! Bytes live in fixed-size chunks shared between forked states and copied
//! on first write. Untouched chunks are absent and read as zero. Bytes that
//! hold symbolic values are kept in an overlay on top of the chunks.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
  module::{DataSegment, MemoryLimits},
  term::TermRef,
  ty::ValType,
  value::{Byte, Value},
};

pub const PAGE_SIZE: u64 = 65536;
const CHUNK_SIZE: usize = 4096;

type Chunk = [u8; CHUNK_SIZE];

/// Why a byte range could not be read as plain bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadError {
  OutOfBounds,
  NonConcrete,
}

#[derive(Clone, Debug, Default)]
pub struct Memory {
  pages: u32,
  max_pages: u32,
  chunks: BTreeMap<u64, Arc<Chunk>>,
  /// 8-bit terms of the bytes holding symbolic values.
  symbolic: BTreeMap<u64, TermRef>,
}

impl Memory {
  /// A memory of the module's initial size. It never grows beyond the
  /// module's maximum nor beyond `cap` pages.
  pub fn new(limits: MemoryLimits, cap: u32) -> Self {
    Memory {
      pages: limits.initial,
      max_pages: limits.maximum.unwrap_or(u32::MAX).min(cap).max(limits.initial),
      ..Default::default()
    }
  }

  /// Fresh memory with active data segments applied.
  pub fn instantiate(limits: MemoryLimits, cap: u32, data: &[DataSegment]) -> Option<Self> {
    let mut mem = Memory::new(limits, cap);
    for seg in data {
      if !mem.write_bytes(seg.offset as u64, &seg.bytes) {
        return None;
      }
    }
    Some(mem)
  }

  pub fn pages(&self) -> u32 {
    self.pages
  }

  pub fn len(&self) -> u64 {
    self.pages as u64 * PAGE_SIZE
  }

  pub fn is_empty(&self) -> bool {
    self.pages == 0
  }

  /// `memory.grow`: the previous size in pages, or `None` if the memory
  /// cannot grow by `delta`.
  pub fn grow(&mut self, delta: u32) -> Option<u32> {
    let old = self.pages;
    let new = old.checked_add(delta)?;
    if new > self.max_pages {
      return None;
    }
    self.pages = new;
    Some(old)
  }

  fn in_bounds(&self, addr: u64, len: u64) -> bool {
    addr.checked_add(len).map_or(false, |end| end <= self.len())
  }

  fn chunk_of(addr: u64) -> (u64, usize) {
    (addr / CHUNK_SIZE as u64, (addr % CHUNK_SIZE as u64) as usize)
  }

  fn concrete_byte(&self, addr: u64) -> u8 {
    let (c, o) = Memory::chunk_of(addr);
    self.chunks.get(&c).map_or(0, |chunk| chunk[o])
  }

  fn set_concrete_byte(&mut self, addr: u64, b: u8) {
    let (c, o) = Memory::chunk_of(addr);
    if b == 0 && !self.chunks.contains_key(&c) {
      return;
    }
    let chunk = self.chunks.entry(c).or_insert_with(|| Arc::new([0; CHUNK_SIZE]));
    Arc::make_mut(chunk)[o] = b;
  }

  pub fn read_byte(&self, addr: u64) -> Byte {
    match self.symbolic.get(&addr) {
      Some(t) => Byte::Symbolic(t.clone()),
      None => Byte::Concrete(self.concrete_byte(addr)),
    }
  }

  pub fn write_byte(&mut self, addr: u64, b: Byte) {
    match b {
      Byte::Concrete(b) => {
        self.symbolic.remove(&addr);
        self.set_concrete_byte(addr, b);
      }
      Byte::Symbolic(t) => {
        self.set_concrete_byte(addr, 0);
        self.symbolic.insert(addr, t);
      }
    }
  }

  /// Load `bytes` bytes at `addr` as a value of type `ty`. `None` if out of
  /// bounds.
  pub fn load(&self, addr: u64, ty: ValType, bytes: u32, signed: bool) -> Option<Value> {
    if !self.in_bounds(addr, bytes as u64) {
      return None;
    }
    let raw: Vec<Byte> = (addr..addr + bytes as u64).map(|a| self.read_byte(a)).collect();
    Some(Value::from_bytes(ty, &raw, signed))
  }

  /// Store the low `bytes` bytes of `value` at `addr`. `false` if out of
  /// bounds, in which case nothing is written.
  pub fn store(&mut self, addr: u64, bytes: u32, value: &Value) -> bool {
    if !self.in_bounds(addr, bytes as u64) {
      return false;
    }
    for (i, b) in value.to_bytes(bytes).into_iter().enumerate() {
      self.write_byte(addr + i as u64, b);
    }
    true
  }

  /// Read plain bytes, as the host does for addresses and names.
  pub fn read_concrete(&self, addr: u64, len: u64) -> Result<Vec<u8>, ReadError> {
    if !self.in_bounds(addr, len) {
      return Err(ReadError::OutOfBounds);
    }
    if self.symbolic.range(addr..addr + len).next().is_some() {
      return Err(ReadError::NonConcrete);
    }
    Ok((addr..addr + len).map(|a| self.concrete_byte(a)).collect())
  }

  pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> bool {
    if !self.in_bounds(addr, bytes.len() as u64) {
      return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
      self.write_byte(addr + i as u64, Byte::Concrete(b));
    }
    true
  }

  /// `memory.copy`. Overlapping ranges behave like `memmove`.
  pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> bool {
    if !self.in_bounds(dst, len) || !self.in_bounds(src, len) {
      return false;
    }
    let bytes: Vec<Byte> = (src..src + len).map(|a| self.read_byte(a)).collect();
    for (i, b) in bytes.into_iter().enumerate() {
      self.write_byte(dst + i as u64, b);
    }
    true
  }

  /// `memory.fill`.
  pub fn fill(&mut self, dst: u64, b: Byte, len: u64) -> bool {
    if !self.in_bounds(dst, len) {
      return false;
    }
    for a in dst..dst + len {
      self.write_byte(a, b.clone());
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::term::Term;

  fn one_page() -> Memory {
    Memory::new(MemoryLimits { initial: 1, maximum: Some(2) }, 16)
  }

  #[test]
  fn loads_what_was_stored() {
    let mut m = one_page();
    assert!(m.store(8, 4, &Value::i32(0xdead_beef)));
    assert_eq!(m.load(8, ValType::I32, 4, false), Some(Value::i32(0xdead_beef)));
    assert_eq!(m.load(8, ValType::I32, 1, true), Some(Value::i32(0xffff_ffef)));
    assert_eq!(m.load(9, ValType::I64, 2, false), Some(Value::i64(0xadbe)));
    assert_eq!(m.read_concrete(8, 2), Ok(vec![0xef, 0xbe]));
  }

  #[test]
  fn bounds() {
    let mut m = one_page();
    assert!(!m.store(PAGE_SIZE - 2, 4, &Value::i32(1)));
    assert_eq!(m.load(PAGE_SIZE - 2, ValType::I32, 4, false), None);
    assert_eq!(m.load(u64::MAX, ValType::I32, 4, false), None);
    assert_eq!(m.grow(1), Some(1));
    assert!(m.store(PAGE_SIZE - 2, 4, &Value::i32(1)));
    assert_eq!(m.grow(1), None);
  }

  #[test]
  fn forks_do_not_share_writes() {
    let mut parent = one_page();
    parent.store(0, 8, &Value::i64(1));
    let mut child = parent.clone();
    child.store(0, 8, &Value::i64(2));
    assert_eq!(parent.load(0, ValType::I64, 8, false), Some(Value::i64(1)));
    assert_eq!(child.load(0, ValType::I64, 8, false), Some(Value::i64(2)));
  }

  #[test]
  fn symbolic_bytes() {
    let mut m = one_page();
    let x = Value::symbol("x", ValType::I64);
    m.store(16, 8, &x);
    assert_eq!(m.read_concrete(16, 8), Err(ReadError::NonConcrete));
    assert_eq!(m.load(16, ValType::I64, 8, false), Some(x));
    let low = m.load(16, ValType::I32, 4, false).unwrap();
    assert_eq!(low.term(), Term::extract(31, 0, Term::var("x", 64)));
    m.write_bytes(16, &[0; 8]);
    assert_eq!(m.load(16, ValType::I64, 8, false), Some(Value::i64(0)));
  }

  #[test]
  fn copy_overlapping() {
    let mut m = one_page();
    m.write_bytes(0, &[1, 2, 3, 4]);
    assert!(m.copy(1, 0, 3));
    assert_eq!(m.read_concrete(0, 4), Ok(vec![1, 1, 2, 3]));
    assert!(m.fill(0, Byte::Concrete(9), 2));
    assert_eq!(m.read_concrete(0, 4), Ok(vec![9, 9, 2, 3]));
  }
}
