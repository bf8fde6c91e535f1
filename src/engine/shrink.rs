//! Shrinking failing inputs.
//!
//! Each argument is moved towards its domain's origin. A candidate replaces
//! the current input only if it still fails and its argument is strictly
//! closer to the origin, so the total magnitude decreases with every
//! accepted step.

use crate::ty::Domain;

/// Distances from the origin to try for an argument at distance `m`,
/// closest first.
fn distances(m: u64) -> Vec<u64> {
  let mut res = vec![0];
  let mut delta = m / 2;
  while delta > 0 {
    res.push(m - delta);
    delta /= 2;
  }
  res.dedup();
  res.retain(|&d| d < m);
  res
}

pub fn magnitude(domains: &[Domain], input: &[u64]) -> u128 {
  domains.iter().zip(input).map(|(d, &v)| d.magnitude(v) as u128).sum()
}

pub struct Shrunk {
  pub input: Vec<u64>,
  /// Candidates executed.
  pub attempts: usize,
}

/// Shrink `input`, which `fails`, trying at most `limit` candidates.
pub fn shrink(domains: &[Domain], mut input: Vec<u64>, limit: usize, mut fails: impl FnMut(&[u64]) -> bool) -> Shrunk {
  let mut attempts = 0;
  'outer: loop {
    for i in 0..input.len() {
      let d = &domains[i];
      let current = input[i];
      for dist in distances(d.magnitude(current)) {
        if attempts >= limit {
          break 'outer;
        }
        let mut candidate = input.clone();
        candidate[i] = d.step_from_origin(current, dist);
        attempts += 1;
        if fails(&candidate) {
          input = candidate;
          continue 'outer;
        }
      }
    }
    break;
  }
  Shrunk { input, attempts }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ty::ValType;

  #[test]
  fn distance_candidates() {
    assert_eq!(distances(0), Vec::<u64>::new());
    assert_eq!(distances(1), vec![0]);
    assert_eq!(distances(10), vec![0, 5, 8, 9]);
  }

  #[test]
  fn finds_the_boundary() {
    let domains = [Domain::full(ValType::I32), Domain::full(ValType::I32)];
    // fails iff a + b overflows 32 bits
    let fails = |v: &[u64]| v[0] + v[1] > u32::MAX as u64;
    let start = vec![0xdead_beef, 0xffff_0000];
    let res = shrink(&domains, start.clone(), 10_000, fails);
    assert!(fails(&res.input));
    assert!(magnitude(&domains, &res.input) <= magnitude(&domains, &start));
    assert_eq!(res.input, vec![0x1_0000, 0xffff_0000]);
  }

  #[test]
  fn respects_the_limit() {
    let domains = [Domain::full(ValType::I64)];
    let res = shrink(&domains, vec![1 << 40], 3, |v| v[0] > 7);
    assert_eq!(res.attempts, 3);
    assert!(res.input[0] > 7);
  }
}
