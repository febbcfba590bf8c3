//! The evaluation driver: `ReduceOnce`/`Rewrite` dispatch and the TCO action
//! that makes unbounded tail recursion run in bounded host stack space.

use crate::combiner;
use crate::context::Context;
use crate::environment::Environment;
use crate::error::{KernelError, KernelResult};
use crate::reference::prepare_collapse;
use crate::term::{borrow, Content, Term, TermCell};
use crate::value::Value;

/// Outcome of a single reduction step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReductionStatus {
    /// An asynchronous continuation is pending (reserved for a future
    /// suspension point; the synchronous evaluator in this crate never
    /// produces this today, but the enum carries it so a host driving the
    /// trampoline one step at a time can recognize the would-be case).
    Partial,
    /// Success; the resulting shape is unspecified.
    Neutral,
    /// Success; result is a leaf-like, fully reduced term.
    Clean,
    /// Success; result is a list and was retained as-is.
    Retained,
    /// Success; result is a list produced by regular reduction.
    Regular,
    /// Caller should re-enter reduction on the same term (used by forms
    /// that rewrite their operand in place before re-dispatching).
    Retrying,
}

/// Combines a previous status with a newly produced one. Later statuses win
/// except that `Partial` always dominates (a still-pending sequence never
/// reports itself complete).
pub fn combine_status(prior: ReductionStatus, new: ReductionStatus) -> ReductionStatus {
    if prior == ReductionStatus::Partial || new == ReductionStatus::Partial {
        ReductionStatus::Partial
    } else {
        new
    }
}

/// One retired (operator, environment) pair recorded when a TCO frame
/// compresses, kept only for diagnostics, not for correctness.
pub struct FrameRecord {
    pub operator: String,
    pub env: Environment,
}

/// State carried across a chain of tail calls within one top-level
/// reduction. Exactly one is current per in-progress `eval`; it is replaced
/// in place (not pushed/popped) as tail calls chain, which is what keeps
/// the host call stack flat.
#[derive(Default)]
pub struct TcoAction {
    /// Number of times the eventual result still needs to be "lifted"
    /// (regularized into returnable form) before it is handed back past
    /// this frame.
    pub pending_lifts: u32,
    /// Combiners kept alive (as prvalues) for the duration of the call so
    /// they are not dropped mid-dispatch.
    pub attached_combiners: Vec<crate::value::Combiner>,
    /// The combiner currently being invoked, if any.
    pub operator_name: Option<String>,
    /// Retired frames, most recent last. Bounded in practice by
    /// `compress`, which is the record compressor's entry point.
    pub frames: Vec<FrameRecord>,
}

impl TcoAction {
    pub fn new() -> TcoAction {
        TcoAction::default()
    }

    /// Called once per tail-call iteration of the `eval` loop. Records the
    /// outgoing (operator, environment) pair, runs the record compressor
    /// (see [`crate::compress`]) to drop any frames it finds unreachable,
    /// and reports the compression to diagnostics.
    pub fn compress(&mut self, outgoing_operator: String, outgoing_env: Environment, ctx: &Context) {
        self.frames.push(FrameRecord { operator: outgoing_operator, env: outgoing_env });
        let retired = crate::compress::compress_frames(&mut self.frames);
        if retired > 0 {
            let name = self.operator_name.as_deref().unwrap_or("<anonymous>");
            ctx.diagnostics().tco_compress(name, retired);
        }
    }
}

/// Either a final value or a request to continue evaluating `term` in
/// `env` without growing the host call stack, the mechanism that gives
/// tail calls constant stack depth.
pub enum Step {
    Value(TermCell),
    TailCall(TermCell, Environment),
}

/// Evaluates `term` in `env` to a final value.
///
/// Implemented as a host-level loop rather than recursion: whenever
/// reduction reaches a tail position (a `$vau` body, the taken branch of
/// `$if`, the last form of `$sequence`, ...), [`Step::TailCall`] swaps the
/// loop's working term/environment in place instead of recursing, so the
/// number of nested Rust stack frames does not grow with the number of
/// tail calls performed.
pub fn eval(term: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<TermCell> {
    let mut current_term = term.clone();
    let mut current_env = env.clone();
    loop {
        match reduce_once(&current_term, &current_env, ctx)? {
            Step::Value(v) => {
                ctx.set_current_env(current_env);
                return Ok(v);
            }
            Step::TailCall(next_term, next_env) => {
                let mut tco = ctx.take_tco().unwrap_or_default();
                tco.compress("<tail-call>".to_string(), current_env.clone(), ctx);
                ctx.install_tco(tco);
                current_term = next_term;
                current_env = next_env;
            }
        }
    }
}

/// Dispatches a single term by shape: symbol lookup, self-evaluating atom,
/// or combination (routed to [`combiner::dispatch`]).
pub fn reduce_once(term: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let shape = {
        let data = borrow(term);
        match &data.content {
            Content::Leaf(Value::Symbol(sym)) => Shape::Symbol(*sym),
            Content::Leaf(_) => Shape::SelfEvaluating,
            Content::Combination(children) if children.is_empty() => Shape::SelfEvaluating,
            Content::Combination(_) => Shape::Combination,
        }
    };
    match shape {
        Shape::SelfEvaluating => {
            ctx.set_last_status(ReductionStatus::Clean);
            Ok(Step::Value(term.clone()))
        }
        Shape::Symbol(sym) => {
            let (cell, _holder) = ctx
                .resolve(env, sym)
                .ok_or_else(|| KernelError::BadIdentifier(ctx.interner.resolve(sym).to_string()))?;
            let reference = prepare_collapse(&cell, env);
            ctx.set_last_status(ReductionStatus::Clean);
            Ok(Step::Value(Term::leaf(Value::Reference(reference))))
        }
        Shape::Combination => combiner::dispatch(term, env, ctx),
    }
}

enum Shape {
    Symbol(nplisp_base::Symbol),
    SelfEvaluating,
    Combination,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn combine_status_prefers_partial() {
        assert_eq!(combine_status(ReductionStatus::Clean, ReductionStatus::Partial), ReductionStatus::Partial);
        assert_eq!(combine_status(ReductionStatus::Partial, ReductionStatus::Clean), ReductionStatus::Partial);
    }

    #[test]
    fn combine_status_otherwise_takes_newest() {
        assert_eq!(combine_status(ReductionStatus::Clean, ReductionStatus::Regular), ReductionStatus::Regular);
    }

    #[test]
    fn self_evaluating_int_reduces_to_itself() {
        let env = Environment::root();
        let mut ctx = Context::new(env.clone());
        let term = Term::leaf(Value::Int(42));
        let result = eval(&term, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Int(42)));
    }

    #[test]
    fn unbound_symbol_is_bad_identifier() {
        let env = Environment::root();
        let mut ctx = Context::new(env.clone());
        let sym = ctx.interner.intern("undefined-name");
        let term = Term::leaf(Value::Symbol(sym));
        let err = eval(&term, &env, &mut ctx).unwrap_err();
        assert!(matches!(err, KernelError::BadIdentifier(_)));
    }
}
