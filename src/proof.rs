//! Proof trees and their storage.
//!
//! A proof tree records the symbolic exploration of one test. Nodes live in
//! an arena; each node holds the one constraint added on the edge from its
//! parent, so the path condition of a node is the conjunction of the
//! constraints from the root down to it.

use std::{
  fs,
  io::ErrorKind,
  path::{Path, PathBuf},
};

use itertools::Itertools;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::{
  constraint::{PathCondition, Witness},
  dynamic::Location,
  error::{Error, Result},
  registry::ModuleHash,
  term::{TableBuilder, TermRef, TermTable},
  verdict::{TestVerdict, Verdict},
};

pub const FORMAT: &str = "symbolic-wasm-proof";
pub const VERSION: u32 = 2;

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
  /// Execution forked at `location`.
  Branch { location: Location },
  /// The test returned a symbolic value: non-zero, then zero.
  Result,
  Leaf {
    verdict: Verdict,
    /// A model of the path condition, for leaves that are neither passed
    /// nor failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    witness: Option<Witness>,
    /// Host calls made along the path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    host_calls: Vec<String>,
  },
  /// Not expanded yet.
  Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
  pub parent: Option<NodeId>,
  /// Added on the edge from the parent; `None` at the root. Recorded even
  /// when it is trivially true, although the path condition then drops it.
  pub constraint: Option<TermRef>,
  pub children: Vec<NodeId>,
  pub kind: NodeKind,
}

/// A test of a module.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProofId {
  pub module: ModuleHash,
  pub test: String,
}

impl ProofId {
  pub fn new(module: ModuleHash, test: &str) -> Self {
    ProofId { module, test: test.to_string() }
  }

  pub fn file_name(&self) -> String {
    format!("{}-{}.json", self.module.short(), self.test)
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafCounts {
  pub passed: usize,
  pub failed: usize,
  pub stuck: usize,
  pub infeasible: usize,
  pub pending: usize,
}

/// Stored as a [`ProofFile`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ProofFile")]
pub struct ProofTree {
  pub format: String,
  pub version: u32,
  pub id: ProofId,
  /// Symbolic variables, `name: domain`.
  pub symbols: Vec<String>,
  pub nodes: Vec<PathNode>,
  pub exhaustive: bool,
  pub verdict: TestVerdict,
}

impl ProofTree {
  pub const ROOT: NodeId = 0;

  pub fn new(id: ProofId) -> Self {
    ProofTree {
      format: FORMAT.to_string(),
      version: VERSION,
      id,
      symbols: Vec::new(),
      nodes: vec![PathNode { parent: None, constraint: None, children: Vec::new(), kind: NodeKind::Pending }],
      exhaustive: false,
      verdict: TestVerdict::Stuck(Vec::new()),
    }
  }

  pub fn node(&self, id: NodeId) -> &PathNode {
    &self.nodes[id]
  }

  pub fn add_child(&mut self, parent: NodeId, constraint: TermRef) -> NodeId {
    let id = self.nodes.len();
    self.nodes.push(PathNode { parent: Some(parent), constraint: Some(constraint), children: Vec::new(), kind: NodeKind::Pending });
    self.nodes[parent].children.push(id);
    id
  }

  pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
    self.nodes[id].kind = kind;
  }

  pub fn set_leaf(&mut self, id: NodeId, verdict: Verdict) {
    self.set_kind(id, NodeKind::Leaf { verdict, witness: None, host_calls: Vec::new() });
  }

  /// Leaf verdicts in depth-first order.
  pub fn leaves(&self) -> Vec<&Verdict> {
    let mut res = Vec::new();
    let mut stack = vec![Self::ROOT];
    while let Some(id) = stack.pop() {
      let node = &self.nodes[id];
      if let NodeKind::Leaf { verdict, .. } = &node.kind {
        res.push(verdict);
      }
      stack.extend(node.children.iter().rev());
    }
    res
  }

  pub fn pending(&self) -> Vec<NodeId> {
    (0..self.nodes.len()).filter(|&id| self.nodes[id].kind == NodeKind::Pending).collect()
  }

  /// Constraints from the root to `id`.
  pub fn path_condition(&self, id: NodeId) -> PathCondition {
    let mut constraints = Vec::new();
    let mut cur = Some(id);
    while let Some(n) = cur {
      constraints.extend(self.nodes[n].constraint.clone());
      cur = self.nodes[n].parent;
    }
    constraints.into_iter().rev().fold(PathCondition::new(), |pc, c| pc & c)
  }

  pub fn counts(&self) -> LeafCounts {
    let mut c = LeafCounts::default();
    for node in &self.nodes {
      match &node.kind {
        NodeKind::Leaf { verdict: Verdict::Passed, .. } => c.passed += 1,
        NodeKind::Leaf { verdict: Verdict::Failed(_), .. } => c.failed += 1,
        NodeKind::Leaf { verdict: Verdict::Stuck(_), .. } => c.stuck += 1,
        NodeKind::Leaf { verdict: Verdict::Infeasible, .. } => c.infeasible += 1,
        NodeKind::Pending => c.pending += 1,
        NodeKind::Branch { .. } | NodeKind::Result => {}
      }
    }
    c
  }

  /// Settle the verdict once exploration is over.
  pub fn conclude(&mut self, exhaustive: bool) {
    self.exhaustive = exhaustive;
    self.verdict = TestVerdict::aggregate(self.leaves(), exhaustive);
  }

  /// Indented text rendering.
  pub fn render(&self) -> String {
    let mut out = String::new();
    out.push_str(&format!("proof of {} in module {}\n", self.id.test, self.id.module));
    if !self.symbols.is_empty() {
      out.push_str(&format!("symbols: {}\n", self.symbols.iter().format(", ")));
    }
    self.render_node(Self::ROOT, 0, &mut out);
    let c = self.counts();
    let exhaustive = if self.exhaustive { ", exhaustive" } else { ", not exhaustive" };
    out.push_str(&format!("{} passed, {} failed, {} stuck, {} infeasible{}\n", c.passed, c.failed, c.stuck, c.infeasible, exhaustive));
    out.push_str(&format!("verdict: {}\n", self.verdict));
    out
  }

  fn render_node(&self, id: NodeId, indent: usize, out: &mut String) {
    let node = &self.nodes[id];
    let pad = "  ".repeat(indent);
    let edge = node.constraint.as_ref().map_or_else(|| "root".to_string(), |c| c.to_string());
    match &node.kind {
      NodeKind::Branch { location } => {
        out.push_str(&format!("{}[{}] {} => fork at {} func {} pc {}\n", pad, id, edge, location.address.short(), location.func, location.pc));
      }
      NodeKind::Result => {
        out.push_str(&format!("{}[{}] {} => symbolic result\n", pad, id, edge));
      }
      NodeKind::Leaf { verdict, witness, host_calls } => {
        out.push_str(&format!("{}[{}] {} => {}\n", pad, id, edge, verdict));
        if let Some(w) = witness {
          out.push_str(&format!("{}    witness {}\n", pad, w));
        }
        for call in host_calls {
          out.push_str(&format!("{}    host {}\n", pad, call));
        }
      }
      NodeKind::Pending => {
        out.push_str(&format!("{}[{}] {} => pending\n", pad, id, edge));
      }
    }
    for &child in &node.children {
      self.render_node(child, indent + 1, out);
    }
  }
}

/// On-disk form of a [`ProofTree`]. Edge constraints are indices into one
/// table of terms, so a subterm shared between edges, or within one, is
/// written once.
#[derive(Serialize, Deserialize)]
struct ProofFile {
  format: String,
  version: u32,
  id: ProofId,
  symbols: Vec<String>,
  terms: TermTable,
  nodes: Vec<StoredNode>,
  exhaustive: bool,
  verdict: TestVerdict,
}

#[derive(Serialize, Deserialize)]
struct StoredNode {
  parent: Option<NodeId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  constraint: Option<usize>,
  children: Vec<NodeId>,
  kind: NodeKind,
}

impl From<&ProofTree> for ProofFile {
  fn from(tree: &ProofTree) -> Self {
    let mut terms = TableBuilder::new();
    let nodes = tree
      .nodes
      .iter()
      .map(|n| StoredNode { parent: n.parent, constraint: n.constraint.as_ref().map(|c| terms.add(c)), children: n.children.clone(), kind: n.kind.clone() })
      .collect();
    ProofFile {
      format: tree.format.clone(),
      version: tree.version,
      id: tree.id.clone(),
      symbols: tree.symbols.clone(),
      terms: terms.finish(),
      nodes,
      exhaustive: tree.exhaustive,
      verdict: tree.verdict.clone(),
    }
  }
}

impl TryFrom<ProofFile> for ProofTree {
  type Error = String;

  fn try_from(file: ProofFile) -> std::result::Result<Self, Self::Error> {
    let terms = file.terms.terms()?;
    let len = file.nodes.len();
    if len == 0 {
      return Err("proof has no root".to_string());
    }
    let nodes = file
      .nodes
      .into_iter()
      .enumerate()
      .map(|(id, node)| {
        if node.parent.map_or(false, |p| p >= id) || node.children.iter().any(|&c| c <= id || c >= len) {
          return Err(format!("node {} is out of order", id));
        }
        let constraint = match node.constraint {
          Some(i) => Some(terms.get(i).cloned().ok_or_else(|| format!("node {} refers to term {}", id, i))?),
          None => None,
        };
        Ok(PathNode { parent: node.parent, constraint, children: node.children, kind: node.kind })
      })
      .collect::<std::result::Result<Vec<_>, String>>()?;
    Ok(ProofTree {
      format: file.format,
      version: file.version,
      id: file.id,
      symbols: file.symbols,
      nodes,
      exhaustive: file.exhaustive,
      verdict: file.verdict,
    })
  }
}

impl Serialize for ProofTree {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    ProofFile::from(self).serialize(serializer)
  }
}

/// A directory of proof trees, one JSON file per test of a module.
pub struct ProofStore {
  dir: PathBuf,
}

impl ProofStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    ProofStore { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path(&self, id: &ProofId) -> PathBuf {
    self.dir.join(id.file_name())
  }

  /// Write `tree`, replacing any earlier proof of the same test.
  pub fn save(&self, tree: &ProofTree) -> Result<PathBuf> {
    fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
    let path = self.path(&tree.id);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(tree).map_err(|e| Error::Proof(e.to_string()))?;
    fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
    debug!(path = %path.display(), "saved proof");
    Ok(path)
  }

  pub fn load(&self, id: &ProofId) -> Result<ProofTree> {
    let tree = self.load_file(&self.path(id)).map_err(|e| match e {
      Error::Io { source, .. } if source.kind() == ErrorKind::NotFound => Error::ProofNotFound(id.test.clone()),
      e => e,
    })?;
    if tree.id != *id {
      return Err(Error::Proof(format!("{} holds a proof of `{}`", id.file_name(), tree.id.test)));
    }
    Ok(tree)
  }

  fn load_file(&self, path: &Path) -> Result<ProofTree> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let tree: ProofTree = serde_json::from_slice(&bytes).map_err(|e| Error::Proof(format!("{}: {}", path.display(), e)))?;
    if tree.format != FORMAT || tree.version != VERSION {
      return Err(Error::Proof(format!("{}: unsupported format {} v{}", path.display(), tree.format, tree.version)));
    }
    Ok(tree)
  }

  /// Every stored proof, sorted. Files that are not proofs are skipped.
  pub fn list(&self) -> Result<Vec<ProofId>> {
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(Error::io(&self.dir, e)),
    };
    let mut ids = Vec::new();
    for entry in entries {
      let path = entry.map_err(|e| Error::io(&self.dir, e))?.path();
      if path.extension().map_or(true, |ext| ext != "json") {
        continue;
      }
      match self.load_file(&path) {
        Ok(tree) => ids.push(tree.id),
        Err(e) => warn!("skipping {}: {}", path.display(), e),
      }
    }
    ids.sort();
    Ok(ids)
  }

  /// Stored proofs matching a test name and module, either optional.
  pub fn find(&self, test: Option<&str>, module: Option<&ModuleHash>) -> Result<Vec<ProofId>> {
    let ids: Vec<ProofId> = self
      .list()?
      .into_iter()
      .filter(|id| test.map_or(true, |t| id.test == t) && module.map_or(true, |m| id.module == *m))
      .collect();
    match (test, ids.is_empty()) {
      (Some(t), true) => Err(Error::ProofNotFound(t.to_string())),
      _ => Ok(ids),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    address::Address,
    term::{CmpOp, Term},
    verdict::Guarantee,
  };

  fn tree() -> ProofTree {
    let mut t = ProofTree::new(ProofId::new(ModuleHash([3; 32]), "test_x"));
    let x = Term::var("arg0", 32);
    let c = Term::compare(CmpOp::LtU, x.clone(), Term::constant(32, 10));
    t.set_kind(ProofTree::ROOT, NodeKind::Branch { location: Location { address: Address::TEST, func: 1, pc: 4 } });
    let a = t.add_child(ProofTree::ROOT, c.clone());
    let b = t.add_child(ProofTree::ROOT, Term::not(c));
    t.set_leaf(a, Verdict::Passed);
    t.set_leaf(b, Verdict::Infeasible);
    t.conclude(true);
    t
  }

  #[test]
  fn structure() {
    let t = tree();
    assert_eq!(t.leaves(), vec![&Verdict::Passed, &Verdict::Infeasible]);
    assert_eq!(t.path_condition(2).len(), 1);
    assert_eq!(t.path_condition(ProofTree::ROOT).len(), 0);
    assert_eq!(t.verdict, TestVerdict::Passed(Guarantee::Proved));
    assert_eq!(t.counts(), LeafCounts { passed: 1, infeasible: 1, ..LeafCounts::default() });
    assert!(t.render().contains("[1] (bvult arg0 (_ bv10 32)) => passed"));
  }

  #[test]
  fn trivially_true_edges_are_recorded() {
    let mut t = ProofTree::new(ProofId::new(ModuleHash([3; 32]), "test_x"));
    let a = t.add_child(ProofTree::ROOT, Term::tt());
    assert_eq!(t.node(a).constraint, Some(Term::tt()));
    assert!(t.path_condition(a).is_empty());
  }

  #[test]
  fn store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProofStore::new(dir.path().join("proofs"));
    assert_eq!(store.list().unwrap(), vec![]);
    let t = tree();
    let path = store.save(&t).unwrap();
    assert!(path.ends_with("03030303-test_x.json"));
    assert_eq!(store.load(&t.id).unwrap(), t);
    assert_eq!(store.list().unwrap(), vec![t.id.clone()]);
    assert_eq!(store.find(Some("test_x"), None).unwrap(), vec![t.id.clone()]);
    assert!(matches!(store.find(Some("test_y"), None), Err(Error::ProofNotFound(_))));
    let other = ProofId::new(ModuleHash([4; 32]), "test_x");
    assert!(matches!(store.load(&other), Err(Error::ProofNotFound(_))));
  }
}
