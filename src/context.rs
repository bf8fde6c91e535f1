//! Per-thread z3 contexts.
//!
//! A z3 context cannot be shared between threads, while states are expanded
//! on a pool of workers. Every worker owns one context for its lifetime and
//! terms are translated into it per query.

use z3::{Config, Context};

thread_local! {
  static CONTEXT: Context = Context::new(&Config::new());
}

/// Run `f` with this thread's context.
pub fn with_context<R>(f: impl FnOnce(&Context) -> R) -> R {
  CONTEXT.with(|ctx| f(ctx))
}
