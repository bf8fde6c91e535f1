//! Proving: symbolic exploration of every path of a test.
//!
//! Each pending path is a [`Task`] that runs until it forks or halts. Forks
//! are expanded on the worker thread, one feasibility query per branch, so
//! the writer only has to record the outcome in the proof tree and schedule
//! the branches that continue.

use std::{cell::Cell, time::Instant};

use symbolic_evaluation::{
  evaluation::eval,
  traits::{BreadthFirst, DepthFirst, Transition},
};
use tracing::{debug, info};

use super::{discovery::TestFunction, session::TestSession, Engine, Outcome};
use crate::{
  address::Address,
  config::{Config, Strategy},
  constraint::{Feasibility, Oracle, Solution, Witness},
  dynamic::{Event, Fork, Interpreter},
  error::{Error, Result},
  proof::{NodeId, NodeKind, ProofId, ProofStore, ProofTree},
  registry::{ModuleHash, Registry},
  report::{Report, TestReport},
  state::{
    termination::{Budget, StuckReason, Termination},
    EntryCall, MachineState, Mode, Phase,
  },
  term::{Term, TermRef},
  verdict::Verdict,
};

/// A finished path.
struct Leaf {
  verdict: Verdict,
  witness: Option<Witness>,
  host_calls: Vec<String>,
}

impl Leaf {
  fn bare(verdict: Verdict) -> Self {
    Leaf { verdict, witness: None, host_calls: Vec::new() }
  }

  fn into_kind(self) -> NodeKind {
    NodeKind::Leaf { verdict: self.verdict, witness: self.witness, host_calls: self.host_calls }
  }
}

enum Next {
  Continue(MachineState),
  Leaf(Leaf),
}

struct Child {
  constraint: TermRef,
  next: Next,
}

enum Expanded {
  Leaf(Leaf),
  Branch { kind: NodeKind, children: Vec<Child> },
}

struct Expansion {
  node: NodeId,
  expanded: Expanded,
}

/// What every path of one test shares.
struct Explorer<'e> {
  registry: &'e Registry,
  oracle: &'e dyn Oracle,
  config: &'e Config,
  test: &'e TestFunction,
}

struct Task<'e> {
  node: NodeId,
  state: MachineState,
  explorer: &'e Explorer<'e>,
}

impl<'e> Transition for Task<'e> {
  type Output = Expansion;

  fn suc(mut self) -> Self::Output {
    let ex = self.explorer;
    let expanded = match Interpreter::new(ex.registry, ex.oracle, ex.config).run(&mut self.state) {
      Event::Fork(fork) => ex.fork(&self.state, fork),
      Event::Halted(t) => ex.halt(&self.state, t),
    };
    Expansion { node: self.node, expanded }
  }
}

impl<'e> Explorer<'e> {
  fn host_calls(state: &MachineState) -> Vec<String> {
    state.host_calls.iter().map(ToString::to_string).collect()
  }

  fn leaf(&self, state: &MachineState, verdict: Verdict) -> Leaf {
    Leaf { verdict, witness: None, host_calls: Self::host_calls(state) }
  }

  /// A leaf that failed with `outcome`, with a witness of its path.
  fn failed(&self, state: &MachineState, outcome: String) -> Leaf {
    match self.oracle.solve(&state.path, &state.symbols) {
      Solution::Witness(w) => self.leaf(state, Verdict::Failed(Engine::counterexample(self.test, w, outcome))),
      Solution::Unsat => Leaf::bare(Verdict::Infeasible),
      Solution::Unknown => self.leaf(state, Verdict::Stuck(StuckReason::SolverTimeout)),
    }
  }

  fn stuck(&self, state: &MachineState, reason: StuckReason) -> Leaf {
    let witness = match (&reason, self.oracle.solve(&state.path, &state.symbols)) {
      (StuckReason::SolverTimeout, _) => None,
      (_, Solution::Witness(w)) => Some(w),
      _ => None,
    };
    Leaf { witness, ..self.leaf(state, Verdict::Stuck(reason)) }
  }

  /// Conjoin `constraint` to a copy of `state`. `Err` if the branch is
  /// infeasible or undecided.
  fn restrict(&self, state: &MachineState, constraint: &TermRef) -> std::result::Result<MachineState, Leaf> {
    let mut s = state.clone();
    s.path &= constraint.clone();
    match self.oracle.check(&s.path, &s.symbols) {
      Feasibility::Sat => Ok(s),
      Feasibility::Unsat => Err(Leaf::bare(Verdict::Infeasible)),
      Feasibility::Unknown => Err(self.leaf(&s, Verdict::Stuck(StuckReason::SolverTimeout))),
    }
  }

  fn fork(&self, state: &MachineState, fork: Fork) -> Expanded {
    if state.depth >= self.config.max_depth {
      return Expanded::Leaf(self.stuck(state, StuckReason::BudgetExceeded(Budget::Depth)));
    }
    debug!(pc = fork.location.pc, func = fork.location.func, branches = fork.branches.len(), "fork");
    let children = fork
      .branches
      .into_iter()
      .map(|branch| {
        let next = match self.restrict(state, &branch.constraint) {
          Err(leaf) => Next::Leaf(leaf),
          Ok(mut s) => {
            s.depth += 1;
            match branch.resume.apply(&mut s) {
              None => Next::Continue(s),
              Some(t) => Next::Leaf(self.outcome(&s, &t)),
            }
          }
        };
        Child { constraint: branch.constraint, next }
      })
      .collect();
    Expanded::Branch { kind: NodeKind::Branch { location: fork.location }, children }
  }

  fn outcome(&self, state: &MachineState, termination: &Termination) -> Leaf {
    match Outcome::classify(termination, state.phase) {
      Outcome::Passed => self.leaf(state, Verdict::Passed),
      Outcome::Failed(outcome) => self.failed(state, outcome),
      Outcome::Stuck(reason) => self.stuck(state, reason),
    }
  }

  fn halt(&self, state: &MachineState, termination: Termination) -> Expanded {
    let v = match &termination {
      Termination::Returned(Some(v)) if !v.is_concrete() => v,
      _ => return Expanded::Leaf(self.outcome(state, &termination)),
    };
    // split the path on whether the symbolic result is zero
    let nonzero = v.nonzero();
    let children = [(nonzero.clone(), true), (Term::not(nonzero), false)]
      .into_iter()
      .map(|(constraint, passes)| {
        let leaf = match self.restrict(state, &constraint) {
          Err(leaf) => leaf,
          Ok(s) if passes => self.leaf(&s, Verdict::Passed),
          Ok(s) => self.failed(&s, "returned 0".to_string()),
        };
        Child { constraint, next: Next::Leaf(leaf) }
      })
      .collect();
    Expanded::Branch { kind: NodeKind::Result, children }
  }
}


fn set_leaf(tree: &mut ProofTree, id: NodeId, leaf: Leaf, failed: &Cell<bool>) {
  if matches!(leaf.verdict, Verdict::Failed(_)) {
    failed.set(true);
  }
  tree.set_kind(id, leaf.into_kind());
}

/// Record an expansion in the tree; the returned tasks continue its
/// feasible branches.
fn record<'e>(tree: &mut ProofTree, explorer: &'e Explorer<'e>, failed: &Cell<bool>, expansion: Expansion) -> Vec<Task<'e>> {
  let Expansion { node, expanded } = expansion;
  match expanded {
    Expanded::Leaf(leaf) => {
      set_leaf(tree, node, leaf, failed);
      Vec::new()
    }
    Expanded::Branch { kind, children } => {
      tree.set_kind(node, kind);
      let mut tasks = Vec::new();
      for Child { constraint, next } in children {
        let id = tree.add_child(node, constraint);
        match next {
          Next::Continue(state) => tasks.push(Task { node: id, state, explorer }),
          Next::Leaf(leaf) => set_leaf(tree, id, leaf, failed),
        }
      }
      tasks
    }
  }
}

impl<'a> Engine<'a> {
  /// The starting state of `test`'s exploration: symbolic `init` inputs,
  /// if any, then symbolic test arguments.
  fn symbolic_entry(&self, session: &TestSession, test: &TestFunction) -> MachineState {
    let mut state = session.base.clone();
    state.entries.extend(session.init_call.clone());
    let args = test.domains.iter().enumerate().map(|(i, d)| state.declare(&TestFunction::arg_name(i), *d)).collect();
    state.entries.push_back(EntryCall { address: Address::TEST, func: test.name.clone(), args, phase: Phase::Test });
    state
  }

  /// Explore `test` and build its proof tree. Call inside the engine's
  /// pool: forks are expanded on its threads.
  pub fn prove_test(&self, session: &TestSession, test: &TestFunction) -> ProofTree {
    let mut tree = ProofTree::new(ProofId::new(session.module, &test.name));
    if let Some(failure) = &session.init_failure {
      tree.set_leaf(ProofTree::ROOT, Verdict::Stuck(StuckReason::InitFailed(failure.clone())));
      tree.conclude(true);
      return tree;
    }
    let state = self.symbolic_entry(session, test);
    tree.symbols = state
      .symbols
      .iter()
      .map(|(name, d)| format!("{}: {} in [{}, {}]", name, d.ty, d.display_value(d.min), d.display_value(d.max)))
      .collect();

    let config = self.config();
    let deadline = self.deadline();
    let oracle = self.oracle(deadline);
    let explorer = Explorer { registry: self.registry(), oracle: &oracle, config, test };
    let init = vec![Task { node: ProofTree::ROOT, state, explorer: &explorer }];
    let width = if config.jobs == 0 { rayon::current_num_threads() } else { config.jobs };
    let failed = Cell::new(false);
    let out_of_time = || deadline.map_or(false, |d| Instant::now() >= d);
    let halted_on_failure = || config.stop_on_failure && failed.get();

    let write = |e| record(&mut tree, &explorer, &failed, e);
    let halt = |expansions| halted_on_failure() || expansions >= config.max_states || out_of_time();
    let exploration = match config.strategy {
      Strategy::DepthFirst => eval(init, &mut DepthFirst::new(), width, write, halt),
      Strategy::BreadthFirst => eval(init, &mut BreadthFirst::new(), width, write, halt),
    };

    let exhaustive = exploration.is_exhaustive();
    if !exhaustive && !halted_on_failure() {
      let budget = if out_of_time() { Budget::Time } else { Budget::States };
      debug!(pending = exploration.pending.len(), %budget, "exploration cut short");
      for task in &exploration.pending {
        tree.set_leaf(task.node, Verdict::Stuck(StuckReason::BudgetExceeded(budget)));
      }
    }
    debug!(expansions = exploration.expansions, nodes = tree.nodes.len(), "explored");
    tree.conclude(exhaustive);
    tree
  }

  /// Prove every test of the module, or only `filter`. Proof trees are
  /// saved to `store` when given.
  pub fn prove(&self, module: ModuleHash, filter: Option<&str>, store: Option<&ProofStore>) -> Result<(Report, Vec<ProofTree>)> {
    let session = TestSession::new(self, module, Mode::Symbolic)?;
    let selected = |name: &str| filter.map_or(true, |f| f == name);
    let tests: Vec<&TestFunction> = session.discovery.tests.iter().filter(|t| selected(&t.name)).collect();
    let rejected: Vec<(String, StuckReason)> = session.discovery.rejected.iter().filter(|(n, _)| selected(n)).cloned().collect();
    if let Some(f) = filter {
      if tests.is_empty() && rejected.is_empty() {
        return Err(Error::UnknownTest(f.to_string()));
      }
    }

    let pool = self.pool()?;
    let mut report = Report::new(Mode::Symbolic, module);
    let mut trees = Vec::new();
    for test in tests {
      let started = Instant::now();
      let tree = pool.install(|| self.prove_test(&session, test));
      info!(test = %test.name, verdict = %tree.verdict, elapsed_ms = started.elapsed().as_millis() as u64, "proved");
      let proof = match store {
        Some(store) => Some(store.save(&tree)?),
        None => None,
      };
      report.tests.push(TestReport {
        exhaustive: Some(tree.exhaustive),
        counts: Some(tree.counts()),
        proof,
        ..TestReport::new(test.name.clone(), tree.verdict.clone())
      });
      trees.push(tree);
    }
    report.reject(&rejected);
    Ok((report, trees))
  }
}
