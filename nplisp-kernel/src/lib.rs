//! The NPLA1 kernel: term model, evaluator, and environment system.
//!
//! # Core Insight
//!
//! Everything is a [`Term`](term::Term): a combination is a rose tree of
//! terms, an atom is a leaf holding a [`Value`](value::Value). There is no
//! separate "expression" and "data" representation: the term a program
//! evaluates and the term it produces are the same kind of object, which is
//! what lets a combiner's operand tree be passed to it unevaluated (an
//! operative) as easily as evaluated (an applicative).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         forms                                │
//! │   $if/$cond/$lambda/$vau/cons/map1/... - the ground env      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       reduction                             │
//! │   eval (trampoline loop) / reduce_once (shape dispatch)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//! ┌─────────────────────────┐   ┌─────────────────────────────┐
//! │        combiner          │   │          binder             │
//! │  dispatch, wrap/unwrap   │   │  parameter-tree structural  │
//! │  operative invocation    │   │  matching and binding       │
//! └─────────────────────────┘   └─────────────────────────────┘
//!                              │
//!               ┌──────────────┼───────────────┬───────────────┐
//!               ▼              ▼               ▼               ▼
//! ┌───────────────┐ ┌───────────────┐ ┌───────────────┐ ┌───────────┐
//! │     term      │ │   reference   │ │  environment  │ │   tags    │
//! │  rose tree /  │ │ value-category│ │ parent chains,│ │ qualifier │
//! │  value slot   │ │  collapsing   │ │ anchor liveness│ │  bitmask  │
//! └───────────────┘ └───────────────┘ └───────────────┘ └───────────┘
//! ```
//!
//! `compress` is the TCO record compressor `reduction`'s trampoline calls on
//! every tail-call iteration; `context` is the per-evaluation state every
//! entry point threads through; `diagnostics` and `error` are the ambient
//! observability and error-reporting layers everything else reports through.
//!
//! # Public API
//!
//! ## Core Types
//! - [`Term`](term::Term), [`TermCell`](term::TermCell) - the term tree
//! - [`Value`](value::Value) - a leaf's payload
//! - [`Environment`](environment::Environment) - first-class environments
//! - [`Context`](context::Context) - per-evaluation state
//! - [`KernelError`](error::KernelError) - the error enum
//!
//! ## Evaluation
//! - [`reduction::eval`] - evaluate a term to a final value
//! - [`forms::ground_environment`] - a root environment with the built-in
//!   forms installed
//!
//! # Milner Invariant
//!
//! This crate has no path to any IO or logging backend. The one side
//! effect it reports today, TCO frame compression, is routed through the
//! [`diagnostics::DiagnosticSink`] trait, whose default implementation is
//! a no-op; a host crate wires an actual `tracing` subscriber at the edge.
//! The trait also declares `anchor_leak`/`error` hooks for a host to
//! implement, but this crate does not call them itself (see
//! `DiagnosticSink`'s own docs). Adding a new log destination never
//! touches this crate.

pub mod binder;
pub mod combiner;
pub mod compress;
pub mod context;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod forms;
pub mod reduction;
pub mod reference;
pub mod tags;
pub mod term;
pub mod value;

pub use context::{Context, ContextBuilder};
pub use diagnostics::{DiagnosticSink, NullSink};
pub use environment::{EnvLink, Environment, EnvironmentRef, Parent};
pub use error::{KernelError, KernelResult};
pub use forms::ground_environment;
pub use reduction::{eval, reduce_once, ReductionStatus, Step};
pub use reference::TermReference;
pub use tags::Tags;
pub use term::{Term, TermCell};
pub use value::{Combiner, Encapsulation, EncapsulationType, Handler, NativeClosure, NativeFn, OperativeData, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use nplisp_base::Interner;

    #[test]
    fn ground_environment_evaluates_a_simple_arithmetic_expression() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let plus = ctx.interner.intern("+");
        let term = Term::combination(vec![
            Term::leaf(Value::Symbol(plus)),
            Term::leaf(Value::Int(1)),
            Term::leaf(Value::Int(2)),
            Term::leaf(Value::Int(3)),
        ]);
        let result = eval(&term, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Int(6)));
    }
}
