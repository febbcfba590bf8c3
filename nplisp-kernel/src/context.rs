//! Per-evaluation state threaded through every reduction.

use std::rc::Rc;

use nplisp_base::Interner;

use crate::diagnostics::{DiagnosticSink, NullSink};
use crate::environment::Environment;
use crate::reduction::{ReductionStatus, TcoAction};
use crate::term::TermCell;

/// A pluggable replacement for the default DFS parent-chain lookup of §4.2.
/// Returns the bound cell plus the environment it was found in, or `None` if
/// the name is unbound (the caller turns that into `BadIdentifier`).
pub type Resolver = dyn Fn(&Environment, nplisp_base::Symbol) -> Option<(TermCell, Environment)>;

/// Evaluation state for one evaluator instance.
///
/// A `Context` is not `Send`/`Sync`: the evaluator is single-threaded and
/// cooperative (see the concurrency model in the design notes), so there is
/// no need for atomics or locking anywhere in this struct.
pub struct Context {
    current_env: Environment,
    last_status: ReductionStatus,
    tco: Option<TcoAction>,
    diagnostics: Rc<dyn DiagnosticSink>,
    /// When set, dereferencing an [`crate::environment::EnvironmentRef`]
    /// whose referent has been destroyed raises
    /// [`crate::error::KernelError::InvalidReference`] instead of silently
    /// treating the access as a no-op at the call site.
    pub check_dangling_refs: bool,
    /// Overrides the standard name-resolution strategy (§4.2) when set; a
    /// host embedding this crate can use this to layer e.g. a module system
    /// or an import search path on top of the ordinary parent chain without
    /// forking `environment::resolve` itself.
    resolver: Option<Rc<Resolver>>,
    pub interner: Interner,
}

impl Context {
    /// Creates a context rooted at `env` with default configuration (no
    /// diagnostics, dangling-reference checks enabled).
    pub fn new(env: Environment) -> Context {
        ContextBuilder::new(env).build()
    }

    pub fn builder(env: Environment) -> ContextBuilder {
        ContextBuilder::new(env)
    }

    pub fn current_env(&self) -> &Environment {
        &self.current_env
    }

    pub fn set_current_env(&mut self, env: Environment) {
        self.current_env = env;
    }

    pub fn last_status(&self) -> ReductionStatus {
        self.last_status
    }

    pub fn set_last_status(&mut self, status: ReductionStatus) {
        self.last_status = status;
    }

    pub fn diagnostics(&self) -> &dyn DiagnosticSink {
        self.diagnostics.as_ref()
    }

    /// Resolves `sym` in `env`, using the custom resolver if one was
    /// installed on this context, falling back to [`crate::environment::resolve`]
    /// otherwise.
    pub fn resolve(&self, env: &Environment, sym: nplisp_base::Symbol) -> Option<(TermCell, Environment)> {
        match &self.resolver {
            Some(resolver) => resolver(env, sym),
            None => crate::environment::resolve(env, sym),
        }
    }

    /// Takes the current TCO action out, leaving `None` in its place. Used
    /// at the start of operation compression, which either reinstalls a
    /// (possibly updated) action or installs a fresh one.
    pub fn take_tco(&mut self) -> Option<TcoAction> {
        self.tco.take()
    }

    pub fn install_tco(&mut self, action: TcoAction) {
        self.tco = Some(action);
    }

    pub fn tco(&self) -> Option<&TcoAction> {
        self.tco.as_ref()
    }
}

/// Builder for [`Context`], standing in for the config-file layer a
/// file-reading crate would have.
pub struct ContextBuilder {
    env: Environment,
    diagnostics: Rc<dyn DiagnosticSink>,
    check_dangling_refs: bool,
    resolver: Option<Rc<Resolver>>,
}

impl ContextBuilder {
    pub fn new(env: Environment) -> ContextBuilder {
        ContextBuilder { env, diagnostics: Rc::new(NullSink), check_dangling_refs: true, resolver: None }
    }

    pub fn diagnostics(mut self, sink: Rc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn check_dangling_refs(mut self, check: bool) -> Self {
        self.check_dangling_refs = check;
        self
    }

    /// Installs a custom name-resolution callback in place of the default
    /// parent-chain DFS (§10.3).
    pub fn resolver(mut self, resolver: Rc<Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Context {
        Context {
            current_env: self.env,
            last_status: ReductionStatus::Clean,
            tco: None,
            diagnostics: self.diagnostics,
            check_dangling_refs: self.check_dangling_refs,
            resolver: self.resolver,
            interner: Interner::new(),
        }
    }
}
