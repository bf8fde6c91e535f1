use std::{
  path::{Path, PathBuf},
  process::exit,
};

use clap::{Parser, Subcommand};
use symbolic_wasm::{
  address::ModuleHash,
  config::{Config, OverflowPolicy, Strategy},
  engine::Engine,
  error::{Error, Result},
  manifest::Manifest,
  proof::ProofStore,
  registry::Registry,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fuzz and prove WASM contract tests
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
  #[clap(subcommand)]
  command: Command,
  /// Manifest of the contracts under test
  #[clap(long, global = true)]
  manifest: Option<PathBuf>,
  /// JSON configuration file
  #[clap(long, global = true)]
  config: Option<PathBuf>,
  /// Worker threads, 0 for one per core
  #[clap(long, global = true)]
  jobs: Option<usize>,
  #[clap(long, global = true)]
  seed: Option<u64>,
  /// Fuzzing iterations per test
  #[clap(long, global = true)]
  iterations: Option<u64>,
  /// Instruction budget of one path
  #[clap(long, global = true)]
  max_steps: Option<u64>,
  /// Fork budget of one path
  #[clap(long, global = true)]
  max_depth: Option<usize>,
  /// depth-first or breadth-first
  #[clap(long, global = true)]
  strategy: Option<Strategy>,
  /// Wall-clock budget per test, in seconds
  #[clap(long, global = true)]
  timeout: Option<u64>,
  /// wrapping, checked or checked-signed
  #[clap(long, global = true)]
  overflow: Option<OverflowPolicy>,
  /// Stop exploring a test at its first failed path
  #[clap(long, global = true)]
  stop_on_failure: bool,
  /// Explore every path even after a failure
  #[clap(long, global = true)]
  no_stop_on_failure: bool,
  /// Per solver query, in milliseconds
  #[clap(long, global = true)]
  solver_timeout: Option<u64>,
  /// Call stack depth
  #[clap(long, global = true)]
  max_calls: Option<usize>,
  /// States expanded per test
  #[clap(long, global = true)]
  max_expansions: Option<usize>,
  /// Memory size cap, in pages
  #[clap(long, global = true)]
  max_pages: Option<u32>,
  /// Candidate inputs tried while shrinking
  #[clap(long, global = true)]
  shrink_limit: Option<usize>,
  #[clap(short, long, global = true)]
  verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fuzz every test
  Test {
    /// Test contract, instead of the manifest's
    #[clap(long)]
    wasm: Option<PathBuf>,
  },
  /// Prove tests symbolically, or inspect stored proofs
  Prove {
    #[clap(subcommand)]
    command: Prove,
  },
}

#[derive(Subcommand, Debug)]
enum Prove {
  /// Explore tests and store their proof trees
  Run {
    #[clap(long)]
    wasm: Option<PathBuf>,
    #[clap(long, default_value = "proofs")]
    proof_dir: PathBuf,
    /// Only this test
    #[clap(long)]
    id: Option<String>,
  },
  /// Print a stored proof tree, or list stored proofs without `--id`
  View {
    #[clap(long, default_value = "proofs")]
    proof_dir: PathBuf,
    #[clap(long)]
    id: Option<String>,
    /// Only proofs of this module
    #[clap(long)]
    wasm: Option<PathBuf>,
  },
}

impl Args {
  fn config(&self) -> Result<Config> {
    let mut config = match &self.config {
      Some(path) => Config::load(path)?,
      None => Config::default(),
    };
    if let Some(jobs) = self.jobs {
      config.jobs = jobs;
    }
    if let Some(seed) = self.seed {
      config.seed = seed;
    }
    if let Some(iterations) = self.iterations {
      config.iterations = iterations;
    }
    if let Some(max_steps) = self.max_steps {
      config.max_steps = max_steps;
    }
    if let Some(max_depth) = self.max_depth {
      config.max_depth = max_depth;
    }
    if let Some(strategy) = self.strategy {
      config.strategy = strategy;
    }
    if self.timeout.is_some() {
      config.timeout = self.timeout;
    }
    if let Some(overflow) = self.overflow {
      config.overflow = overflow;
    }
    if self.no_stop_on_failure {
      config.stop_on_failure = false;
    } else if self.stop_on_failure {
      config.stop_on_failure = true;
    }
    if let Some(solver_timeout) = self.solver_timeout {
      config.solver_timeout = solver_timeout;
    }
    if let Some(max_calls) = self.max_calls {
      config.max_call_depth = max_calls;
    }
    if let Some(max_expansions) = self.max_expansions {
      config.max_states = max_expansions;
    }
    if let Some(max_pages) = self.max_pages {
      config.max_memory_pages = max_pages;
    }
    if let Some(shrink_limit) = self.shrink_limit {
      config.shrink_limit = shrink_limit;
    }
    Ok(config)
  }

  fn manifest(&self) -> Result<Manifest> {
    match &self.manifest {
      Some(path) => Manifest::load(path),
      None => Ok(Manifest::default()),
    }
  }
}

/// Register the manifest's contracts and the test contract.
fn load(manifest: &Manifest, wasm: Option<&Path>) -> Result<(Registry, Vec<(String, ModuleHash)>, ModuleHash)> {
  let mut registry = Registry::new();
  let contracts = registry.register_manifest(manifest)?;
  let path = wasm
    .map(Path::to_path_buf)
    .or_else(|| manifest.test_contract_path())
    .ok_or_else(|| Error::Manifest("no test contract: pass --wasm or set `test_contract`".to_string()))?;
  let module = registry.register_file(&path)?;
  info!(path = %path.display(), module = %module.short(), contracts = contracts.len(), "loaded test contract");
  Ok((registry, contracts, module))
}

fn run(args: &Args) -> Result<i32> {
  let config = args.config()?;
  match &args.command {
    Command::Test { wasm } => {
      let (registry, contracts, module) = load(&args.manifest()?, wasm.as_deref())?;
      let report = Engine::new(&registry, config).with_contracts(contracts).fuzz(module)?;
      print!("{}", report.render());
      Ok(report.exit_code())
    }
    Command::Prove { command: Prove::Run { wasm, proof_dir, id } } => {
      let (registry, contracts, module) = load(&args.manifest()?, wasm.as_deref())?;
      let store = ProofStore::new(proof_dir);
      let engine = Engine::new(&registry, config).with_contracts(contracts);
      let (report, _) = engine.prove(module, id.as_deref(), Some(&store))?;
      print!("{}", report.render());
      Ok(report.exit_code())
    }
    Command::Prove { command: Prove::View { proof_dir, id, wasm } } => {
      let store = ProofStore::new(proof_dir);
      let module = match wasm {
        Some(path) => Some(Registry::new().register_file(path)?),
        None => None,
      };
      let ids = store.find(id.as_deref(), module.as_ref())?;
      if id.is_none() {
        for id in &ids {
          println!("{} {}", id.module.short(), id.test);
        }
        return Ok(0);
      }
      for id in &ids {
        print!("{}", store.load(id)?.render());
      }
      Ok(0)
    }
  }
}

fn main() {
  let args = Args::parse();
  let level = if args.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  match run(&args) {
    Ok(code) => exit(code),
    Err(e) => {
      eprintln!("error: {}", e);
      exit(3);
    }
  }
}
