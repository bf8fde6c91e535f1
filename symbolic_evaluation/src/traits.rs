//! Traits for the generic symbolic execution algorithm.

use std::collections::VecDeque;

/// State transition systems.
pub trait Transition: Sized {
  /// What a single expansion produces, e.g. the children of a fork or
  /// the verdict of a final state.
  type Output;

  /// Expand the state. Runs on a worker thread.
  fn suc(self) -> Self::Output;
}

/// Pending evaluation states, ordered by a search strategy.
pub trait Frontier<T> {
  /// Add the successors of one state. The first element is the one the
  /// strategy should prefer among them.
  fn extend(&mut self, states: Vec<T>);
  /// Take the next state to expand.
  fn next(&mut self) -> Option<T>;
  fn len(&self) -> usize;
  fn is_empty(&self) -> bool {
    self.len() == 0
  }
  /// Remove every remaining state, in strategy order.
  fn drain(&mut self) -> Vec<T> {
    let mut res = Vec::with_capacity(self.len());
    while let Some(s) = self.next() {
      res.push(s);
    }
    res
  }
}

/// Depth-first search: the most recently found state is expanded first.
#[derive(Debug)]
pub struct DepthFirst<T>(Vec<T>);

impl<T> DepthFirst<T> {
  pub fn new() -> Self {
    DepthFirst(Vec::new())
  }
}

impl<T> Default for DepthFirst<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Frontier<T> for DepthFirst<T> {
  fn extend(&mut self, states: Vec<T>) {
    // reversed, so the first successor is on top of the stack
    self.0.extend(states.into_iter().rev());
  }

  fn next(&mut self) -> Option<T> {
    self.0.pop()
  }

  fn len(&self) -> usize {
    self.0.len()
  }
}

/// Breadth-first search: states are expanded level by level.
#[derive(Debug)]
pub struct BreadthFirst<T>(VecDeque<T>);

impl<T> BreadthFirst<T> {
  pub fn new() -> Self {
    BreadthFirst(VecDeque::new())
  }
}

impl<T> Default for BreadthFirst<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Frontier<T> for BreadthFirst<T> {
  fn extend(&mut self, states: Vec<T>) {
    self.0.extend(states);
  }

  fn next(&mut self) -> Option<T> {
    self.0.pop_front()
  }

  fn len(&self) -> usize {
    self.0.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn depth_first_prefers_first_successor() {
    let mut f = DepthFirst::new();
    f.extend(vec![1, 2]);
    f.extend(vec![10, 11]);
    assert_eq!(f.drain(), vec![10, 11, 1, 2]);
  }

  #[test]
  fn breadth_first_is_fifo() {
    let mut f = BreadthFirst::new();
    f.extend(vec![1, 2]);
    assert_eq!(f.next(), Some(1));
    f.extend(vec![10]);
    assert_eq!(f.drain(), vec![2, 10]);
    assert!(f.is_empty());
  }
}
