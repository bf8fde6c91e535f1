//! Value types, function signatures and argument domains.

use std::{collections::BTreeMap, fmt};

use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  term::{mask, to_signed, CmpOp, Term, TermRef},
};

/// WASM value types. Floats are carried as raw bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValType {
  I32,
  I64,
  F32,
  F64,
}

impl ValType {
  pub fn width(self) -> u32 {
    match self {
      ValType::I32 | ValType::F32 => 32,
      ValType::I64 | ValType::F64 => 64,
    }
  }

  pub fn is_int(self) -> bool {
    matches!(self, ValType::I32 | ValType::I64)
  }
}

impl TryFrom<wasmparser::ValType> for ValType {
  type Error = Error;

  fn try_from(ty: wasmparser::ValType) -> Result<Self> {
    match ty {
      wasmparser::ValType::I32 => Ok(ValType::I32),
      wasmparser::ValType::I64 => Ok(ValType::I64),
      wasmparser::ValType::F32 => Ok(ValType::F32),
      wasmparser::ValType::F64 => Ok(ValType::F64),
      other => Err(Error::Unsupported(format!("value type {:?}", other))),
    }
  }
}

impl fmt::Display for ValType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ValType::I32 => "i32",
      ValType::I64 => "i64",
      ValType::F32 => "f32",
      ValType::F64 => "f64",
    })
  }
}

/// A function signature.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncType {
  pub params: Vec<ValType>,
  pub results: Vec<ValType>,
}

impl FuncType {
  pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
    Self { params, results }
  }
}

impl fmt::Display for FuncType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}) -> ({})", self.params.iter().format(", "), self.results.iter().format(", "))
  }
}

// Domains ///////////////////////////////////////////////////////////////

/// The set of values an argument ranges over: the closed interval
/// `[min, max]`, compared signed or unsigned. Bounds are stored as bit
/// patterns of the argument's width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
  pub ty: ValType,
  pub min: u64,
  pub max: u64,
  pub signed: bool,
}

impl Domain {
  /// Every value of the type, read unsigned.
  pub fn full(ty: ValType) -> Self {
    Domain { ty, min: 0, max: mask(ty.width()), signed: false }
  }

  fn width(&self) -> u32 {
    self.ty.width()
  }

  /// Signed values are shifted by the sign bit, so that comparison of keys
  /// is unsigned comparison in either mode.
  fn key(&self, v: u64) -> u64 {
    let v = v & mask(self.width());
    if self.signed {
      v ^ (1u64 << (self.width() - 1))
    } else {
      v
    }
  }

  fn from_key(&self, k: u64) -> u64 {
    if self.signed {
      (k ^ (1u64 << (self.width() - 1))) & mask(self.width())
    } else {
      k
    }
  }

  pub fn is_empty(&self) -> bool {
    self.key(self.min) > self.key(self.max)
  }

  pub fn contains(&self, v: u64) -> bool {
    let k = self.key(v);
    self.key(self.min) <= k && k <= self.key(self.max)
  }

  /// The value of the domain closest to zero; shrinking moves towards it.
  pub fn origin(&self) -> u64 {
    if self.contains(0) {
      0
    } else if self.signed && to_signed(self.width(), self.max) < 0 {
      self.max
    } else {
      self.min
    }
  }

  /// Distance of `v` from the origin.
  pub fn magnitude(&self, v: u64) -> u64 {
    let (a, b) = (self.key(v), self.key(self.origin()));
    a.abs_diff(b)
  }

  /// The value at distance `d` from the origin, on the side of `towards`.
  pub fn step_from_origin(&self, towards: u64, d: u64) -> u64 {
    let (o, t) = (self.key(self.origin()), self.key(towards));
    let k = if t >= o { o + d.min(t - o) } else { o - d.min(o - t) };
    self.from_key(k)
  }

  /// Draw a value, biased towards the boundaries of the domain.
  pub fn sample<R: Rng>(&self, rng: &mut R) -> u64 {
    let (lo, hi) = (self.key(self.min), self.key(self.max));
    if lo > hi {
      return self.min;
    }
    let k = match rng.gen_range(0..8) {
      0 => lo,
      1 => hi,
      2 => lo.saturating_add(1).min(hi),
      3 => hi.saturating_sub(1).max(lo),
      4 => self.key(self.origin()),
      _ => rng.gen_range(lo..=hi),
    };
    self.from_key(k)
  }

  /// The constraint `min <= var <= max`. `None` for a full domain.
  pub fn constraint(&self, var: &TermRef) -> Option<TermRef> {
    if *self == Domain::full(self.ty) {
      return None;
    }
    let w = self.width();
    let (ge, le) = if self.signed { (CmpOp::GeS, CmpOp::LeS) } else { (CmpOp::GeU, CmpOp::LeU) };
    Some(Term::and(
      Term::compare(ge, var.clone(), Term::constant(w, self.min)),
      Term::compare(le, var.clone(), Term::constant(w, self.max)),
    ))
  }

  /// Interpret a witness value under the domain's signedness.
  pub fn display_value(&self, v: u64) -> String {
    if self.signed {
      to_signed(self.width(), v).to_string()
    } else {
      (v & mask(self.width())).to_string()
    }
  }
}

/// A bound as written in a `domains` section: negative numbers are read
/// as signed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
  Unsigned(u64),
  Signed(i64),
}

impl Bound {
  fn bits(self, width: u32) -> u64 {
    match self {
      Bound::Unsigned(v) => v & mask(width),
      Bound::Signed(v) => v as u64 & mask(width),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
  pub min: Option<Bound>,
  pub max: Option<Bound>,
  #[serde(default)]
  pub signed: bool,
}

impl DomainSpec {
  pub fn resolve(&self, ty: ValType) -> Domain {
    let w = ty.width();
    let (lo, hi) = if self.signed { (1u64 << (w - 1), mask(w - 1)) } else { (0, mask(w)) };
    Domain {
      ty,
      min: self.min.map_or(lo, |b| b.bits(w)),
      max: self.max.map_or(hi, |b| b.bits(w)),
      signed: self.signed,
    }
  }
}

/// Per-function argument domains, read from the `domains` custom section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domains(pub BTreeMap<String, Vec<Option<DomainSpec>>>);

impl Domains {
  pub const SECTION: &'static str = "domains";

  pub fn parse(data: &[u8]) -> Result<Self> {
    serde_json::from_slice(data).map_err(|e| Error::Parse(format!("custom section `{}`: {}", Self::SECTION, e)))
  }

  /// Domains of the parameters of `func`, full where unspecified.
  pub fn of(&self, func: &str, params: &[ValType]) -> Vec<Domain> {
    let specs = self.0.get(func);
    params
      .iter()
      .enumerate()
      .map(|(i, &ty)| match specs.and_then(|s| s.get(i)).copied().flatten() {
        Some(spec) => spec.resolve(ty),
        None => Domain::full(ty),
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{rngs::StdRng, SeedableRng};

  #[test]
  fn full_domain_has_no_constraint() {
    let d = Domain::full(ValType::I32);
    assert!(d.constraint(&Term::var("x", 32)).is_none());
    assert!(d.contains(u32::MAX as u64));
    assert_eq!(d.origin(), 0);
  }

  #[test]
  fn signed_domain() {
    let spec = DomainSpec { min: Some(Bound::Signed(-10)), max: Some(Bound::Unsigned(5)), signed: true };
    let d = spec.resolve(ValType::I32);
    assert!(d.contains((-3i32) as u32 as u64));
    assert!(!d.contains(6));
    assert!(!d.contains((-11i32) as u32 as u64));
    assert_eq!(d.origin(), 0);
    assert_eq!(d.magnitude((-10i32) as u32 as u64), 10);
    assert_eq!(d.step_from_origin((-10i32) as u32 as u64, 4), (-4i32) as u32 as u64);
    assert_eq!(d.display_value((-10i32) as u32 as u64), "-10");
  }

  #[test]
  fn origin_outside_zero() {
    let d = Domain { ty: ValType::I64, min: 100, max: 200, signed: false };
    assert_eq!(d.origin(), 100);
    assert_eq!(d.magnitude(150), 50);
  }

  #[test]
  fn samples_stay_in_domain() {
    let d = Domain { ty: ValType::I32, min: 3, max: 17, signed: false };
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..1000 {
      assert!(d.contains(d.sample(&mut rng)));
    }
  }

  #[test]
  fn parses_domains_section() {
    let json = br#"{"test_small": [{"min": 0, "max": 100}, null, {"min": -5, "signed": true}]}"#;
    let domains = Domains::parse(json).unwrap();
    let ds = domains.of("test_small", &[ValType::I32, ValType::I64, ValType::I32, ValType::I32]);
    assert_eq!(ds[0], Domain { ty: ValType::I32, min: 0, max: 100, signed: false });
    assert_eq!(ds[1], Domain::full(ValType::I64));
    assert_eq!(ds[2].min, (-5i32) as u32 as u64);
    assert_eq!(ds[2].max, i32::MAX as u64);
    assert_eq!(ds[3], Domain::full(ValType::I32));
    assert_eq!(domains.of("test_other", &[ValType::I32]), vec![Domain::full(ValType::I32)]);
  }
}
