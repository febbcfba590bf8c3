//! Combiner dispatch: evaluates a combination's head, arranges operand
//! evaluation according to an applicative's wrap count, and tail-enters the
//! resulting operative (native or `$vau`-built).

use std::rc::Rc;

use nplisp_base::Symbol;

use crate::binder;
use crate::context::Context;
use crate::environment::{EnvLink, Environment, Parent};
use crate::error::{KernelError, KernelResult};
use crate::reduction::{eval, Step};
use crate::term::{borrow, Term, TermCell};
use crate::value::{Combiner, Handler, OperativeData, Value};

/// Evaluates the head of a combination term, then dispatches the resulting
/// combiner against the (still unevaluated) operand list.
pub fn dispatch(term: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let (head, operand) = {
        let data = borrow(term);
        let children = data
            .as_children()
            .expect("combiner::dispatch called on a non-combination term");
        (children[0].clone(), Term::combination(children[1..].to_vec()))
    };
    let head_value = eval(&head, env, ctx)?;
    let combiner = extract_combiner(&head_value)?;
    apply_combiner(&combiner, &operand, env, ctx)
}

pub(crate) fn extract_combiner(term: &TermCell) -> KernelResult<Combiner> {
    let data = borrow(term);
    match data.as_value() {
        Some(Value::Combiner(c)) => Ok(c.clone()),
        Some(Value::Reference(r)) => extract_combiner(&r.referent),
        _ => Err(KernelError::TypeError(format!(
            "operator position requires a combiner, found {}",
            &*data
        ))),
    }
}

/// Applies `combiner` to `operand` as evaluated under `env`: if the
/// combiner is wrapped (applicative), evaluates each operand once per wrap
/// level and re-applies the unwrapped combiner to the evaluated list;
/// otherwise invokes the underlying operative handler directly.
pub fn apply_combiner(
    combiner: &Combiner,
    operand: &TermCell,
    env: &Environment,
    ctx: &mut Context,
) -> KernelResult<Step> {
    if let Some(inner) = combiner.unwrap() {
        let evaluated = eval_list(operand, env, ctx)?;
        return apply_combiner(&inner, &evaluated, env, ctx);
    }
    match combiner.handler.as_ref() {
        Handler::Native { f, .. } => f(operand, env, ctx),
        Handler::NativeClosure(f) => f(operand, env, ctx),
        Handler::Operative(op) => call_operative(op, operand, env, ctx),
    }
}

/// Applies `combiner` to `args` and drives any resulting tail call to
/// completion, returning the final value directly. Used by native list
/// primitives (`map1`, `foldr1`, ...) that need to call a user-supplied
/// combiner and get a value back inline, rather than returning a `Step`
/// themselves.
pub fn invoke(combiner: &Combiner, args: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<TermCell> {
    match apply_combiner(combiner, args, env, ctx)? {
        Step::Value(v) => Ok(v),
        Step::TailCall(term, call_env) => eval(&term, &call_env, ctx),
    }
}

fn eval_list(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<TermCell> {
    let children = {
        let data = borrow(operand);
        data.as_children()
            .ok_or_else(|| KernelError::ListTypeError("applicative operand must be a list".into()))?
            .to_vec()
    };
    let mut evaluated = Vec::with_capacity(children.len());
    for child in &children {
        evaluated.push(eval(child, env, ctx)?);
    }
    Ok(Term::combination(evaluated))
}

fn call_operative(
    op: &Rc<OperativeData>,
    operand: &TermCell,
    env: &Environment,
    ctx: &mut Context,
) -> KernelResult<Step> {
    let new_env = Environment::new(Parent::Single(op.static_parent.clone()));
    if let Some(eformal) = op.eformal {
        new_env.define(eformal, Term::leaf(Value::Environment(env.downgrade())))?;
    }
    binder::bind_parameter(&new_env, &op.formals, operand)?;
    Ok(Step::TailCall(op.body.clone(), new_env))
}

/// Builds the operative produced by `$vau`/`$vau/e`: validates the formal
/// parameter tree, then captures `static_parent` with the ownership variant
/// the caller selects (owning for the common `$vau` case where the static
/// environment is the vau form's own dynamic environment; weak for
/// `$vau/e` over a first-class environment value the caller does not also
/// own).
pub fn make_operative(
    formals: TermCell,
    eformal: Option<Symbol>,
    static_parent: EnvLink,
    body: TermCell,
    no_lift: bool,
) -> KernelResult<Combiner> {
    binder::check_parameter_tree(&formals)?;
    let data = OperativeData { formals, eformal, static_parent, body, no_lift };
    Ok(Combiner::operative(Handler::Operative(Rc::new(data))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::eval;
    use crate::reference::regularize;
    use crate::value::Value;
    use nplisp_base::Interner;

    #[test]
    fn applying_a_non_combiner_head_is_a_type_error() {
        let env = Environment::root();
        let mut ctx = Context::new(env.clone());
        let term = Term::combination(vec![Term::leaf(Value::Int(1))]);
        let err = eval(&term, &env, &mut ctx).unwrap_err();
        assert!(matches!(err, KernelError::TypeError(_)));
    }

    #[test]
    fn vau_operative_does_not_evaluate_its_operand() {
        let env = Environment::root();
        let mut ctx = Context::new(env.clone());
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let body = crate::binder::plain_formal(x);
        let op = make_operative(
            Term::combination(vec![crate::binder::plain_formal(x)]),
            None,
            EnvLink::Owned(env.clone()),
            body,
            false,
        )
        .unwrap();
        let head = Term::leaf(Value::Combiner(op));
        let undefined = interner.intern("undefined-symbol");
        let operand_expr = Term::leaf(Value::Symbol(undefined));
        let call = Term::combination(vec![head, operand_expr]);
        // Because `q` is operative, its operand (an unbound symbol) is
        // never evaluated, so this must succeed and echo the operand back.
        // The body is a bare formal reference, so the evaluator's symbol
        // lookup wraps it in a reference; strip that before inspecting it.
        let result = regularize(&eval(&call, &env, &mut ctx).unwrap());
        assert!(matches!(result.borrow().as_value(), Some(Value::Symbol(_))));
    }
}
