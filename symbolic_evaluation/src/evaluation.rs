//! A generic symbolic execution algorithm.

use rayon::prelude::*;

use crate::traits::{Frontier, Transition};

/// The result of an evaluation.
#[derive(Debug)]
pub struct Exploration<T> {
  /// Number of states expanded.
  pub expansions: usize,
  /// States that were never expanded because evaluation was halted.
  /// Empty iff the state space was exhausted.
  pub pending: Vec<T>,
}

impl<T> Exploration<T> {
  pub fn is_exhaustive(&self) -> bool {
    self.pending.is_empty()
  }
}

/// Evaluate from `init` until the frontier is empty or `halt` returns true.
///
/// Up to `width` states are taken from the frontier at a time and expanded
/// in parallel. `write` receives every output, in frontier order, and returns
/// the states to schedule next. `halt` is polled between batches.
pub fn eval<T, S, W, H>(init: Vec<T>, frontier: &mut S, width: usize, mut write: W, halt: H) -> Exploration<T>
  where
    T: Transition + Send,
    T::Output: Send,
    S: Frontier<T>,
    W: FnMut(T::Output) -> Vec<T>,
    H: Fn(usize) -> bool,
{
  let width = width.max(1);
  let mut expansions = 0;
  frontier.extend(init);
  while !frontier.is_empty() {
    if halt(expansions) {
      return Exploration { expansions, pending: frontier.drain() };
    }
    let mut batch = Vec::with_capacity(width);
    while batch.len() < width {
      match frontier.next() {
        Some(s) => batch.push(s),
        None => break,
      }
    }
    expansions += batch.len();
    let outputs: Vec<T::Output> = if batch.len() == 1 {
      batch.into_iter().map(Transition::suc).collect()
    } else {
      batch.into_par_iter().map(Transition::suc).collect()
    };
    for output in outputs {
      let next = write(output);
      frontier.extend(next);
    }
  }
  Exploration { expansions, pending: Vec::new() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::traits::{BreadthFirst, DepthFirst};

  // Binary counter tree: a node at depth d has two children until depth 3.
  struct Node(u32, u32);

  impl Transition for Node {
    type Output = (u32, u32);
    fn suc(self) -> Self::Output {
      (self.0, self.1)
    }
  }

  fn expand((depth, label): (u32, u32), seen: &mut Vec<u32>) -> Vec<Node> {
    seen.push(label);
    if depth == 3 {
      Vec::new()
    } else {
      vec![Node(depth + 1, label * 2), Node(depth + 1, label * 2 + 1)]
    }
  }

  #[test]
  fn explores_the_whole_tree() {
    let mut seen = Vec::new();
    let res = eval(vec![Node(0, 1)], &mut DepthFirst::new(), 4, |o| expand(o, &mut seen), |_| false);
    assert!(res.is_exhaustive());
    assert_eq!(res.expansions, 15);
    seen.sort();
    assert_eq!(seen, (1..16).collect::<Vec<_>>());
  }

  #[test]
  fn depth_first_order_with_unit_batches() {
    let mut seen = Vec::new();
    eval(vec![Node(1, 1)], &mut DepthFirst::new(), 1, |o| expand(o, &mut seen), |_| false);
    assert_eq!(seen, vec![1, 2, 4, 5, 3, 6, 7]);
  }

  #[test]
  fn breadth_first_order() {
    let mut seen = Vec::new();
    eval(vec![Node(1, 1)], &mut BreadthFirst::new(), 2, |o| expand(o, &mut seen), |_| false);
    assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
  }

  #[test]
  fn halting_leaves_pending_states() {
    let mut seen = Vec::new();
    let res = eval(vec![Node(0, 1)], &mut DepthFirst::new(), 1, |o| expand(o, &mut seen), |n| n >= 2);
    assert!(!res.is_exhaustive());
    assert_eq!(res.expansions, 2);
    assert_eq!(res.pending.len(), 3);
  }
}
