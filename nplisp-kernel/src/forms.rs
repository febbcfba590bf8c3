//! The ground environment: the built-in operative/applicative forms that
//! make the core usable without an external forms registry.
//!
//! Every form here is a plain [`NativeFn`] (or, for
//! `make-encapsulation-type`, a [`NativeClosure`] closing over a freshly
//! minted identity token) registered by [`install`] into a target
//! environment. Operatives are registered with wrap count 0; applicatives
//! are wrapped once so their operands are evaluated before the handler
//! runs, matching the wrap-count convention the rest of the crate already
//! uses for user-defined `$lambda`/`$vau` combiners.

use std::rc::Rc;

use nplisp_base::{Interner, Symbol};

use crate::binder;
use crate::combiner::{self, extract_combiner};
use crate::context::Context;
use crate::environment::{EnvLink, Environment, EnvironmentRef, Parent};
use crate::error::{KernelError, KernelResult};
use crate::reduction::{eval, Step};
use crate::reference::{deref, is_movable, prepare_collapse, regularize};
use crate::term::{borrow, borrow_mut, deep_clone, Content, Term, TermCell};
use crate::value::{Combiner, Encapsulation, EncapsulationType, Handler, NativeClosure, NativeFn, Value};

// ---------------------------------------------------------------------
// Operand helpers shared by every form below.
// ---------------------------------------------------------------------

/// Returns the direct children of `term`, requiring it to already be a
/// list (no reference-following: an operand list produced by the dispatch
/// machinery is always a plain combination, never a reference to one).
fn children_of(term: &TermCell) -> KernelResult<Vec<TermCell>> {
    match &borrow(term).content {
        Content::Combination(c) => Ok(c.clone()),
        Content::Leaf(_) => Err(KernelError::ListTypeError("expected an operand list".into())),
    }
}

/// As [`children_of`], but follows a reference first, for list-valued
/// *arguments* (as opposed to the operand tree itself), which usually do
/// arrive wrapped in a reference since they came from a symbol lookup.
fn require_list(term: &TermCell) -> KernelResult<Vec<TermCell>> {
    let target = deref(term);
    match &borrow(&target).content {
        Content::Combination(c) => Ok(c.clone()),
        Content::Leaf(_) => Err(KernelError::ListTypeError("expected a list".into())),
    }
}

fn arity(operator: &'static str, expected: &str, found: usize) -> KernelError {
    KernelError::ArityMismatch { operator: operator.into(), expected: expected.into(), found }
}

fn inert() -> TermCell {
    Term::leaf(Value::Inert)
}

fn leaf_bool(b: bool) -> TermCell {
    Term::leaf(Value::Boolean(b))
}

/// Kernel's truthiness rule: everything is true except `#f`.
fn truthy(term: &TermCell) -> bool {
    !matches!(borrow(&deref(term)).as_value(), Some(Value::Boolean(false)))
}

/// Resolves a first-class environment value to a strong handle.
///
/// Per §4.2's check-mode flag: if the referent has been destroyed, this
/// raises [`KernelError::InvalidReference`] when `ctx.check_dangling_refs`
/// is set; with the flag off, a destroyed referent is reported as the
/// ordinary "name not found" failure instead, since there is no environment
/// left to resolve against either way and nothing here may fabricate one.
fn extract_environment(term: &TermCell, ctx: &Context) -> KernelResult<Environment> {
    match borrow(&deref(term)).as_value() {
        Some(Value::Environment(r)) => {
            if ctx.check_dangling_refs {
                r.require()
            } else {
                r.upgrade().ok_or_else(|| KernelError::BadIdentifier("environment no longer exists".into()))
            }
        }
        _ => Err(KernelError::TypeError("expected an environment".into())),
    }
}

fn extract_env_ref(term: &TermCell) -> KernelResult<EnvironmentRef> {
    match borrow(&deref(term)).as_value() {
        Some(Value::Environment(r)) => Ok(r.clone()),
        _ => Err(KernelError::TypeError("expected an environment".into())),
    }
}

fn extract_reference(term: &TermCell) -> KernelResult<crate::reference::TermReference> {
    match borrow(term).as_value() {
        Some(Value::Reference(r)) => Ok(r.clone()),
        _ => Err(KernelError::ValueCategoryError("expected a reference".into())),
    }
}

/// Desugars an implicit body (a list of forms, as in `$lambda`'s or
/// `$vau`'s trailing operands) into a single term by wrapping anything but
/// a single form in `($sequence ...)`. A lone form is used unwrapped so
/// tail position is exactly that form, not a one-armed `$sequence` around
/// it.
fn implicit_body(forms: &[TermCell], ctx: &mut Context) -> TermCell {
    if forms.len() == 1 {
        return forms[0].clone();
    }
    let seq_sym = ctx.interner.intern("$sequence");
    let mut children = Vec::with_capacity(forms.len() + 1);
    children.push(Term::leaf(Value::Symbol(seq_sym)));
    children.extend(forms.iter().cloned());
    Term::combination(children)
}

/// Evaluates every form but the last, then tail-calls the last: the
/// common "ordered reduction, tail-enter the last" shape shared by
/// `$sequence`, `$cond` clause bodies, `$when`/`$unless`, and the `$let`
/// family.
fn sequence_tail(forms: &[TermCell], env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    if forms.is_empty() {
        return Ok(Step::Value(inert()));
    }
    for form in &forms[..forms.len() - 1] {
        eval(form, env, ctx)?;
    }
    Ok(Step::TailCall(forms[forms.len() - 1].clone(), env.clone()))
}

fn extract_eformal(term: &TermCell) -> KernelResult<Option<Symbol>> {
    match borrow(term).as_value() {
        Some(Value::Ignore) => Ok(None),
        Some(Value::Symbol(s)) => Ok(Some(*s)),
        _ => Err(KernelError::InvalidSyntax(
            "dynamic-environment formal must be a symbol or #ignore".into(),
        )),
    }
}

/// Recursively defines every leaf symbol of `formal` to `#inert` before a
/// recursive binding's initializer is evaluated, so a self-referencing
/// closure created by that initializer can already resolve its own name
/// (the name is only *rebound* to its real value once the initializer
/// finishes). See `$defrec!`/`$letrec`.
fn predefine_placeholders(env: &Environment, formal: &TermCell) -> KernelResult<()> {
    match &borrow(formal).content {
        Content::Leaf(Value::Ignore) => Ok(()),
        Content::Leaf(Value::Symbol(sym)) => env.define(*sym, inert()),
        Content::Leaf(_) => Err(KernelError::InvalidSyntax(
            "parameter tree leaf must be a symbol or #ignore".into(),
        )),
        Content::Combination(children) => {
            for child in children {
                predefine_placeholders(env, child)?;
            }
            Ok(())
        }
    }
}

/// `$set!`'s rebinding counterpart to [`binder::bind_parameter`]: matches
/// `formal` against `value` structurally, but rebinds (`Environment::set`)
/// rather than defines, since `$set!`'s contract requires every target
/// name to already exist somewhere in `target_env`'s parent chain.
fn rebind_parameter(target_env: &Environment, formal: &TermCell, value: &TermCell) -> KernelResult<()> {
    match &borrow(formal).content {
        Content::Leaf(Value::Ignore) => Ok(()),
        Content::Leaf(Value::Symbol(sym)) => {
            let bound = if is_movable(&borrow(value)) { value.clone() } else { deep_clone(value) };
            target_env.set(*sym, bound)
        }
        Content::Leaf(_) => Err(KernelError::InvalidSyntax(
            "parameter tree leaf must be a symbol or #ignore".into(),
        )),
        Content::Combination(formal_children) => {
            let value_children = match &borrow(value).content {
                Content::Combination(c) => c.clone(),
                Content::Leaf(_) => {
                    return Err(KernelError::ListTypeError("$set! target tree expects a list value".into()))
                }
            };
            if formal_children.len() != value_children.len() {
                return Err(KernelError::ParameterMismatch {
                    formal: format!("{}-element list", formal_children.len()),
                    operand: format!("{}-element list", value_children.len()),
                });
            }
            for (f, v) in formal_children.iter().zip(value_children.iter()) {
                rebind_parameter(target_env, f, v)?;
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------
// Control forms.
// ---------------------------------------------------------------------

fn if_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 && items.len() != 3 {
        return Err(arity("$if", "2 or 3", items.len()));
    }
    let test = eval(&items[0], env, ctx)?;
    if truthy(&test) {
        Ok(Step::TailCall(items[1].clone(), env.clone()))
    } else if items.len() == 3 {
        Ok(Step::TailCall(items[2].clone(), env.clone()))
    } else {
        Ok(Step::Value(inert()))
    }
}

fn cond_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    for clause in children_of(operand)? {
        let parts = children_of(&clause)?;
        if parts.is_empty() {
            return Err(KernelError::InvalidSyntax("$cond clause must have at least a test".into()));
        }
        let test = eval(&parts[0], env, ctx)?;
        if truthy(&test) {
            if parts.len() == 1 {
                return Ok(Step::Value(test));
            }
            return sequence_tail(&parts[1..], env, ctx);
        }
    }
    Ok(Step::Value(inert()))
}

fn when_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("$when", "at least 1", 0));
    }
    let test = eval(&items[0], env, ctx)?;
    if truthy(&test) {
        sequence_tail(&items[1..], env, ctx)
    } else {
        Ok(Step::Value(inert()))
    }
}

fn unless_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("$unless", "at least 1", 0));
    }
    let test = eval(&items[0], env, ctx)?;
    if !truthy(&test) {
        sequence_tail(&items[1..], env, ctx)
    } else {
        Ok(Step::Value(inert()))
    }
}

fn and_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Ok(Step::Value(leaf_bool(true)));
    }
    for item in &items[..items.len() - 1] {
        let v = eval(item, env, ctx)?;
        if !truthy(&v) {
            return Ok(Step::Value(v));
        }
    }
    Ok(Step::TailCall(items[items.len() - 1].clone(), env.clone()))
}

fn or_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Ok(Step::Value(leaf_bool(false)));
    }
    for item in &items[..items.len() - 1] {
        let v = eval(item, env, ctx)?;
        if truthy(&v) {
            return Ok(Step::Value(v));
        }
    }
    Ok(Step::TailCall(items[items.len() - 1].clone(), env.clone()))
}

fn sequence_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    sequence_tail(&children_of(operand)?, env, ctx)
}

fn not_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity("not?", "1", items.len()));
    }
    Ok(Step::Value(leaf_bool(!truthy(&items[0]))))
}

// ---------------------------------------------------------------------
// Environment & binding forms.
// ---------------------------------------------------------------------

fn def_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("$def!", "2", items.len()));
    }
    let value = eval(&items[1], env, ctx)?;
    binder::bind_parameter(env, &items[0], &value)?;
    Ok(Step::Value(inert()))
}

fn defrec_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("$defrec!", "2", items.len()));
    }
    predefine_placeholders(env, &items[0])?;
    let value = eval(&items[1], env, ctx)?;
    binder::bind_parameter(env, &items[0], &value)?;
    Ok(Step::Value(inert()))
}

fn set_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 3 {
        return Err(arity("$set!", "3", items.len()));
    }
    let target_env = extract_environment(&eval(&items[0], env, ctx)?, ctx)?;
    let value = eval(&items[2], env, ctx)?;
    rebind_parameter(&target_env, &items[1], &value)?;
    Ok(Step::Value(inert()))
}

/// `$set!`'s recursive counterpart, mirroring [`defrec_form`]: placeholders
/// for every name in `formal` are defined in the target environment before
/// the value expression is evaluated, so a value expression that closes
/// over the target environment (the common case: installing a recursive
/// combiner into a specific environment) can refer to its own name.
fn setrec_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 3 {
        return Err(arity("$setrec!", "3", items.len()));
    }
    let target_env = extract_environment(&eval(&items[0], env, ctx)?, ctx)?;
    predefine_placeholders(&target_env, &items[1])?;
    let value = eval(&items[2], env, ctx)?;
    rebind_parameter(&target_env, &items[1], &value)?;
    Ok(Step::Value(inert()))
}

fn undef_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity("$undef!", "1", items.len()));
    }
    match borrow(&items[0]).as_value() {
        Some(Value::Symbol(sym)) => {
            env.undefine(*sym)?;
            Ok(Step::Value(inert()))
        }
        _ => Err(KernelError::InvalidSyntax("$undef! requires a symbol".into())),
    }
}

fn make_environment_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let parents = children_of(operand)?;
    let links: Vec<EnvLink> =
        parents.iter().map(|p| extract_env_ref(p).map(EnvLink::Weak)).collect::<KernelResult<_>>()?;
    let parent = match links.len() {
        0 => Parent::Empty,
        1 => Parent::Single(links.into_iter().next().unwrap()),
        _ => Parent::List(links),
    };
    let env = Environment::new(parent);
    Ok(Step::Value(Term::leaf(Value::Environment(env.downgrade()))))
}

fn get_current_environment_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    if !children_of(operand)?.is_empty() {
        return Err(arity("get-current-environment", "0", children_of(operand)?.len()));
    }
    Ok(Step::Value(Term::leaf(Value::Environment(env.downgrade()))))
}

fn let_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("$let", "at least 1", 0));
    }
    let new_env = env.child();
    for binding in children_of(&items[0])? {
        let pair = children_of(&binding)?;
        if pair.len() != 2 {
            return Err(KernelError::InvalidSyntax("$let binding must be (name expr)".into()));
        }
        let value = eval(&pair[1], env, ctx)?;
        binder::bind_parameter(&new_env, &pair[0], &value)?;
    }
    sequence_tail(&items[1..], &new_env, ctx)
}

fn let_star_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("$let*", "at least 1", 0));
    }
    let mut current = env.clone();
    for binding in children_of(&items[0])? {
        let pair = children_of(&binding)?;
        if pair.len() != 2 {
            return Err(KernelError::InvalidSyntax("$let* binding must be (name expr)".into()));
        }
        let value = eval(&pair[1], &current, ctx)?;
        let child = current.child();
        binder::bind_parameter(&child, &pair[0], &value)?;
        current = child;
    }
    sequence_tail(&items[1..], &current, ctx)
}

fn letrec_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("$letrec", "at least 1", 0));
    }
    let new_env = env.child();
    let bindings = children_of(&items[0])?;
    let pairs: Vec<Vec<TermCell>> = bindings.iter().map(children_of).collect::<KernelResult<_>>()?;
    for pair in &pairs {
        if pair.len() != 2 {
            return Err(KernelError::InvalidSyntax("$letrec binding must be (name expr)".into()));
        }
        predefine_placeholders(&new_env, &pair[0])?;
    }
    for pair in &pairs {
        let value = eval(&pair[1], &new_env, ctx)?;
        binder::bind_parameter(&new_env, &pair[0], &value)?;
    }
    sequence_tail(&items[1..], &new_env, ctx)
}

// ---------------------------------------------------------------------
// Combiner-construction and combiner-invocation forms.
// ---------------------------------------------------------------------

fn lambda_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("$lambda", "at least 1", 0));
    }
    let body = implicit_body(&items[1..], ctx);
    let op = combiner::make_operative(items[0].clone(), None, EnvLink::Owned(env.clone()), body, false)?;
    Ok(Step::Value(Term::leaf(Value::Combiner(op.wrap()))))
}

fn vau_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() < 2 {
        return Err(arity("$vau", "at least 2", items.len()));
    }
    let eformal = extract_eformal(&items[1])?;
    let body = implicit_body(&items[2..], ctx);
    let op = combiner::make_operative(items[0].clone(), eformal, EnvLink::Owned(env.clone()), body, false)?;
    Ok(Step::Value(Term::leaf(Value::Combiner(op))))
}

fn vau_with_environment_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() < 3 {
        return Err(arity("$vau/e", "at least 3", items.len()));
    }
    let static_parent = extract_env_ref(&eval(&items[0], env, ctx)?)?;
    let eformal = extract_eformal(&items[2])?;
    let body = implicit_body(&items[3..], ctx);
    let op = combiner::make_operative(items[1].clone(), eformal, EnvLink::Weak(static_parent), body, false)?;
    Ok(Step::Value(Term::leaf(Value::Combiner(op))))
}

fn wrap_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity("wrap", "1", items.len()));
    }
    let c = extract_combiner(&items[0])?;
    Ok(Step::Value(Term::leaf(Value::Combiner(c.wrap()))))
}

fn unwrap_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity("unwrap", "1", items.len()));
    }
    let c = extract_combiner(&items[0])?;
    let u = c.unwrap().ok_or_else(|| KernelError::TypeError("cannot unwrap an operative".into()))?;
    Ok(Step::Value(Term::leaf(Value::Combiner(u))))
}

fn apply_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() < 2 || items.len() > 3 {
        return Err(arity("apply", "2 or 3", items.len()));
    }
    let f = extract_combiner(&items[0])?;
    let mut unwrapped = f;
    while let Some(inner) = unwrapped.unwrap() {
        unwrapped = inner;
    }
    let call_env = if items.len() == 3 { extract_environment(&items[2], ctx)? } else { env.clone() };
    let xs = deref(&items[1]);
    combiner::apply_combiner(&unwrapped, &xs, &call_env, ctx)
}

fn eval_applicative(operand: &TermCell, ctx: &mut Context, lift: bool) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity(if lift { "eval" } else { "eval%" }, "2", items.len()));
    }
    let target_env = extract_environment(&items[1], ctx)?;
    let result = eval(&deref(&items[0]), &target_env, ctx)?;
    let result = if lift { regularize(&result) } else { result };
    Ok(Step::Value(result))
}

fn eval_form(operand: &TermCell, _env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    eval_applicative(operand, ctx, true)
}

fn eval_percent_form(operand: &TermCell, _env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    eval_applicative(operand, ctx, false)
}

// ---------------------------------------------------------------------
// List forms.
// ---------------------------------------------------------------------

fn cons_applicative(operand: &TermCell, lift: bool) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity(if lift { "cons" } else { "cons%" }, "2", items.len()));
    }
    let tail = require_list(&items[1])?;
    let head = if lift { regularize(&items[0]) } else { items[0].clone() };
    let mut result = Vec::with_capacity(tail.len() + 1);
    result.push(head);
    result.extend(tail);
    Ok(Step::Value(Term::combination(result)))
}

fn cons_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    cons_applicative(operand, true)
}

fn cons_percent_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    cons_applicative(operand, false)
}

/// Applicative form: operands are already evaluated by combiner dispatch
/// before this runs, so `list` just retains them as a list.
fn list_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    Ok(Step::Value(operand.clone()))
}

/// Operative form: registered with wrap count 0, so `operand` here is the
/// *unevaluated* argument list, so `list%` builds a list from raw operand
/// subterms the way `$vau`-bodied code would need to `eval` each one
/// explicitly to get the evaluated behavior `list` gives for free.
fn list_percent_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    Ok(Step::Value(operand.clone()))
}

/// Shared arity/emptiness check for every `first`/`rest` variant below;
/// `name` is only used to label the arity error for whichever variant
/// called in.
fn select_first(operand: &TermCell, name: &'static str) -> KernelResult<TermCell> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity(name, "1", items.len()));
    }
    let list = require_list(&items[0])?;
    if list.is_empty() {
        return Err(KernelError::ListTypeError(format!("{name} requires a non-empty list")));
    }
    Ok(list[0].clone())
}

fn select_rest(operand: &TermCell, name: &'static str) -> KernelResult<TermCell> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity(name, "1", items.len()));
    }
    let list = require_list(&items[0])?;
    if list.is_empty() {
        return Err(KernelError::ListTypeError(format!("{name} requires a non-empty list")));
    }
    Ok(Term::combination(list[1..].to_vec()))
}

/// Value variant: the selected element lifted to plain form, the way
/// `eval` lifts where `eval%` preserves the reference.
fn first_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let head = select_first(operand, "first")?;
    let reference = prepare_collapse(&head, env);
    Ok(Step::Value(regularize(&Term::leaf(Value::Reference(reference)))))
}

/// Reference-preserving variant: the selected element's own reference
/// category (lvalue, if it came from a list bound elsewhere) instead of a
/// plain copy.
fn first_percent_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let head = select_first(operand, "first%")?;
    let reference = prepare_collapse(&head, env);
    Ok(Step::Value(Term::leaf(Value::Reference(reference))))
}

/// List-reference variant: as `first%`, but the selected element must
/// itself be a list, mirroring the `@x` formal's "operand must be a list"
/// rule from [`binder::bind_parameter`].
fn first_at_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let head = select_first(operand, "first@")?;
    if !matches!(borrow(&head).content, Content::Combination(_)) {
        return Err(KernelError::ListTypeError("first@ requires the selected element to be a list".into()));
    }
    let reference = prepare_collapse(&head, env);
    Ok(Step::Value(Term::leaf(Value::Reference(reference))))
}

fn rest_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let tail = select_rest(operand, "rest")?;
    Ok(Step::Value(tail))
}

/// Reference-preserving variant of `rest`. The tail is a freshly built
/// list (this crate's `Content::Combination` is a flat vector, not a
/// chain of cons cells, so there is no pre-existing cell a reference could
/// alias), so "preserving the reference" here means handing back a
/// reference to that fresh term rather than lifting it early.
fn rest_percent_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let tail = select_rest(operand, "rest%")?;
    let reference = prepare_collapse(&tail, env);
    Ok(Step::Value(Term::leaf(Value::Reference(reference))))
}

/// List-reference variant of `rest`. `select_rest` always produces a
/// `Content::Combination`, so the "must be a list" condition `@` checks
/// elsewhere is trivially satisfied here; kept as its own registered name
/// for symmetry with `first@` and so spec-facing code can rely on the
/// `@` suffix consistently meaning "reference to a list".
fn rest_at_form(operand: &TermCell, env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let tail = select_rest(operand, "rest@")?;
    let reference = prepare_collapse(&tail, env);
    Ok(Step::Value(Term::leaf(Value::Reference(reference))))
}

fn set_first_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("set-first!", "2", items.len()));
    }
    let target = extract_reference(&items[0])?;
    if !target.is_modifiable() {
        return Err(KernelError::ValueCategoryError(
            "set-first! requires a modifiable reference".into(),
        ));
    }
    let mut data = borrow_mut(&target.referent);
    match &mut data.content {
        Content::Combination(children) if !children.is_empty() => {
            children[0] = items[1].clone();
            Ok(Step::Value(inert()))
        }
        _ => Err(KernelError::ListTypeError("set-first! requires a non-empty list reference".into())),
    }
}

fn set_rest_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("set-rest!", "2", items.len()));
    }
    let target = extract_reference(&items[0])?;
    if !target.is_modifiable() {
        return Err(KernelError::ValueCategoryError(
            "set-rest! requires a modifiable reference".into(),
        ));
    }
    let new_tail = require_list(&items[1])?;
    let mut data = borrow_mut(&target.referent);
    match &mut data.content {
        Content::Combination(children) if !children.is_empty() => {
            let head = children[0].clone();
            let mut replacement = Vec::with_capacity(new_tail.len() + 1);
            replacement.push(head);
            replacement.extend(new_tail);
            *children = replacement;
            Ok(Step::Value(inert()))
        }
        _ => Err(KernelError::ListTypeError("set-rest! requires a non-empty list reference".into())),
    }
}

fn append_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let mut result = Vec::new();
    for list in children_of(operand)? {
        result.extend(require_list(&list)?);
    }
    Ok(Step::Value(Term::combination(result)))
}

fn map1_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("map1", "2", items.len()));
    }
    let f = extract_combiner(&items[0])?;
    let list = require_list(&items[1])?;
    let mut result = Vec::with_capacity(list.len());
    for element in &list {
        let args = Term::combination(vec![element.clone()]);
        result.push(combiner::invoke(&f, &args, env, ctx)?);
    }
    Ok(Step::Value(Term::combination(result)))
}

/// Right fold with no seed, the last element serving as the base case:
/// `f(x1, f(x2, ..., f(x_{n-1}, x_n)))`. Builds from the right end with a
/// host-level loop rather than real recursion, so the host stack depth does
/// not grow with list length.
fn foldr1_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("foldr1", "2", items.len()));
    }
    let f = extract_combiner(&items[0])?;
    let list = require_list(&items[1])?;
    if list.is_empty() {
        return Err(KernelError::ListTypeError("foldr1 requires a non-empty list".into()));
    }
    let mut iter = list.iter().rev();
    let mut acc = iter.next().unwrap().clone();
    for element in iter {
        let args = Term::combination(vec![element.clone(), acc]);
        acc = combiner::invoke(&f, &args, env, ctx)?;
    }
    Ok(Step::Value(acc))
}

/// Left fold over `list` starting from `seed`: `f(...f(f(seed, x1), x2)...,
/// xn)`. A deliberately simplified stand-in for the historical source's
/// general divide-and-conquer `accl`, which additionally threads a
/// base-case predicate and a pair of traversal operators; this crate's
/// ground environment only needs the common fold shape.
fn accl_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 3 {
        return Err(arity("accl", "3", items.len()));
    }
    let list = require_list(&items[0])?;
    let f = extract_combiner(&items[2])?;
    let mut acc = items[1].clone();
    for element in &list {
        let args = Term::combination(vec![acc, element.clone()]);
        acc = combiner::invoke(&f, &args, env, ctx)?;
    }
    Ok(Step::Value(acc))
}

/// Right fold: `f(x1, f(x2, ... f(xn, seed)))`. See [`accl_form`].
fn accr_form(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 3 {
        return Err(arity("accr", "3", items.len()));
    }
    let list = require_list(&items[0])?;
    let seed = items[1].clone();
    let f = extract_combiner(&items[2])?;
    let mut acc = seed;
    for element in list.iter().rev() {
        let args = Term::combination(vec![element.clone(), acc]);
        acc = combiner::invoke(&f, &args, env, ctx)?;
    }
    Ok(Step::Value(acc))
}

// ---------------------------------------------------------------------
// Equality and type predicates.
// ---------------------------------------------------------------------

fn term_eqv(a: &TermCell, b: &TermCell) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match (&borrow(a).content, &borrow(b).content) {
        (Content::Leaf(va), Content::Leaf(vb)) => va == vb,
        _ => false,
    }
}

fn term_equal(a: &TermCell, b: &TermCell) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match (&borrow(a).content, &borrow(b).content) {
        (Content::Leaf(va), Content::Leaf(vb)) => va == vb,
        (Content::Combination(ca), Content::Combination(cb)) => {
            ca.len() == cb.len() && ca.iter().zip(cb.iter()).all(|(x, y)| term_equal(x, y))
        }
        _ => false,
    }
}

fn eqv_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("eqv?", "2", items.len()));
    }
    Ok(Step::Value(leaf_bool(term_eqv(&deref(&items[0]), &deref(&items[1])))))
}

fn equal_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 2 {
        return Err(arity("equal?", "2", items.len()));
    }
    Ok(Step::Value(leaf_bool(term_equal(&deref(&items[0]), &deref(&items[1])))))
}

fn type_predicate(
    name: &'static str,
    operand: &TermCell,
    test: impl Fn(&Term) -> bool,
) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() != 1 {
        return Err(arity(name, "1", items.len()));
    }
    let target = deref(&items[0]);
    Ok(Step::Value(leaf_bool(test(&borrow(&target)))))
}

macro_rules! predicate_form {
    ($fn_name:ident, $op_name:literal, $test:expr) => {
        fn $fn_name(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
            type_predicate($op_name, operand, $test)
        }
    };
}

predicate_form!(null_p_form, "null?", |t: &Term| t.is_empty_list());
predicate_form!(pair_p_form, "pair?", |t: &Term| matches!(&t.content, Content::Combination(c) if !c.is_empty()));
predicate_form!(symbol_p_form, "symbol?", |t: &Term| matches!(t.as_value(), Some(Value::Symbol(_))));
predicate_form!(string_p_form, "string?", |t: &Term| matches!(t.as_value(), Some(Value::String(_))));
predicate_form!(number_p_form, "number?", |t: &Term| {
    matches!(t.as_value(), Some(Value::Int(_)) | Some(Value::Float(_)))
});
predicate_form!(boolean_p_form, "boolean?", |t: &Term| matches!(t.as_value(), Some(Value::Boolean(_))));
predicate_form!(environment_p_form, "environment?", |t: &Term| matches!(t.as_value(), Some(Value::Environment(_))));
predicate_form!(combiner_p_form, "combiner?", |t: &Term| matches!(t.as_value(), Some(Value::Combiner(_))));
predicate_form!(ignore_p_form, "ignore?", |t: &Term| matches!(t.as_value(), Some(Value::Ignore)));
predicate_form!(inert_p_form, "inert?", |t: &Term| matches!(t.as_value(), Some(Value::Inert)));

// ---------------------------------------------------------------------
// A minimal arithmetic ALU, sufficient to write and exercise loop-based
// test programs (not a math library, see `SPEC_FULL.md` §1 Non-goals).
// ---------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

fn to_num(term: &TermCell) -> KernelResult<Num> {
    match borrow(&deref(term)).as_value() {
        Some(Value::Int(n)) => Ok(Num::Int(*n)),
        Some(Value::Float(f)) => Ok(Num::Float(*f)),
        _ => Err(KernelError::TypeError("expected a number".into())),
    }
}

fn num_to_term(n: Num) -> TermCell {
    match n {
        Num::Int(i) => Term::leaf(Value::Int(i)),
        Num::Float(f) => Term::leaf(Value::Float(f)),
    }
}

fn numeric_fold(
    name: &'static str,
    operand: &TermCell,
    identity: Option<i64>,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> KernelResult<Step> {
    let items = children_of(operand)?;
    let nums = items.iter().map(to_num).collect::<KernelResult<Vec<_>>>()?;
    let mut iter = nums.into_iter();
    let mut acc = match iter.next() {
        Some(first) => first,
        None => match identity {
            Some(i) => Num::Int(i),
            None => return Err(arity(name, "at least 1", 0)),
        },
    };
    for next in iter {
        acc = match (acc, next) {
            (Num::Int(a), Num::Int(b)) => match int_op(a, b) {
                Some(r) => Num::Int(r),
                None => Num::Float(float_op(a as f64, b as f64)),
            },
            (a, b) => Num::Float(float_op(a.as_f64(), b.as_f64())),
        };
    }
    Ok(Step::Value(num_to_term(acc)))
}

fn add_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    numeric_fold("+", operand, Some(0), |a, b| a.checked_add(b), |a, b| a + b)
}

fn sub_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() == 1 {
        return Ok(Step::Value(match to_num(&items[0])? {
            Num::Int(n) => num_to_term(Num::Int(-n)),
            Num::Float(f) => num_to_term(Num::Float(-f)),
        }));
    }
    numeric_fold("-", operand, None, |a, b| a.checked_sub(b), |a, b| a - b)
}

fn mul_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    numeric_fold("*", operand, Some(1), |a, b| a.checked_mul(b), |a, b| a * b)
}

fn div_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.is_empty() {
        return Err(arity("/", "at least 1", 0));
    }
    let nums = items.iter().map(to_num).collect::<KernelResult<Vec<_>>>()?;
    let mut iter = nums.into_iter();
    let mut acc = iter.next().unwrap();
    if items.len() == 1 {
        acc = Num::Float(1.0 / acc.as_f64());
        return Ok(Step::Value(num_to_term(acc)));
    }
    for next in iter {
        if next.as_f64() == 0.0 {
            return Err(KernelError::TypeError("division by zero".into()));
        }
        acc = match (acc, next) {
            (Num::Int(a), Num::Int(b)) if a % b == 0 => Num::Int(a / b),
            (a, b) => Num::Float(a.as_f64() / b.as_f64()),
        };
    }
    Ok(Step::Value(num_to_term(acc)))
}

fn compare_chain(name: &'static str, operand: &TermCell, ok: impl Fn(f64, f64) -> bool) -> KernelResult<Step> {
    let items = children_of(operand)?;
    if items.len() < 2 {
        return Err(arity(name, "at least 2", items.len()));
    }
    let nums = items.iter().map(to_num).collect::<KernelResult<Vec<_>>>()?;
    let result = nums.windows(2).all(|w| ok(w[0].as_f64(), w[1].as_f64()));
    Ok(Step::Value(leaf_bool(result)))
}

fn lt_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    compare_chain("<", operand, |a, b| a < b)
}

fn le_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    compare_chain("<=", operand, |a, b| a <= b)
}

fn gt_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    compare_chain(">", operand, |a, b| a > b)
}

fn ge_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    compare_chain(">=", operand, |a, b| a >= b)
}

// ---------------------------------------------------------------------
// Encapsulation.
// ---------------------------------------------------------------------

fn closure_combiner(f: NativeClosure) -> Combiner {
    Combiner { handler: Rc::new(Handler::NativeClosure(f)), wrap_count: 1 }
}

fn make_encapsulation_type_form(operand: &TermCell, _env: &Environment, _ctx: &mut Context) -> KernelResult<Step> {
    if !children_of(operand)?.is_empty() {
        return Err(arity("make-encapsulation-type", "0", children_of(operand)?.len()));
    }
    let token = EncapsulationType::new();

    let ctor_token = token.clone();
    let constructor: NativeClosure = Rc::new(move |operand: &TermCell, _env: &Environment, _ctx: &mut Context| {
        let items = children_of(operand)?;
        if items.len() != 1 {
            return Err(arity("<constructor>", "1", items.len()));
        }
        Ok(Step::Value(Term::leaf(Value::Encapsulation(Encapsulation {
            type_token: ctor_token.clone(),
            payload: items[0].clone(),
        }))))
    });

    let pred_token = token.clone();
    let predicate: NativeClosure = Rc::new(move |operand: &TermCell, _env: &Environment, _ctx: &mut Context| {
        let items = children_of(operand)?;
        if items.len() != 1 {
            return Err(arity("<predicate>", "1", items.len()));
        }
        let is_match =
            matches!(borrow(&deref(&items[0])).as_value(), Some(Value::Encapsulation(e)) if e.type_token == pred_token);
        Ok(Step::Value(leaf_bool(is_match)))
    });

    let decap_token = token;
    let decapsulator: NativeClosure = Rc::new(move |operand: &TermCell, env: &Environment, _ctx: &mut Context| {
        let items = children_of(operand)?;
        if items.len() != 1 {
            return Err(arity("<decapsulator>", "1", items.len()));
        }
        let target = deref(&items[0]);
        let payload = match borrow(&target).as_value() {
            Some(Value::Encapsulation(e)) if e.type_token == decap_token => e.payload.clone(),
            _ => return Err(KernelError::TypeError("decapsulator applied to a foreign encapsulation".into())),
        };
        Ok(Step::Value(Term::leaf(Value::Reference(prepare_collapse(&payload, env)))))
    });

    let triple = Term::combination(vec![
        Term::leaf(Value::Combiner(closure_combiner(constructor))),
        Term::leaf(Value::Combiner(closure_combiner(predicate))),
        Term::leaf(Value::Combiner(closure_combiner(decapsulator))),
    ]);
    Ok(Step::Value(triple))
}

// ---------------------------------------------------------------------
// Installation.
// ---------------------------------------------------------------------

fn reg_operative(env: &Environment, interner: &mut Interner, name: &'static str, f: NativeFn) {
    let sym = interner.intern(name);
    let combiner = Combiner::operative(Handler::Native { name, f });
    env.define(sym, Term::leaf(Value::Combiner(combiner))).expect("ground environment is never frozen");
}

fn reg_applicative(env: &Environment, interner: &mut Interner, name: &'static str, f: NativeFn) {
    let sym = interner.intern(name);
    let combiner = Combiner::operative(Handler::Native { name, f }).wrap();
    env.define(sym, Term::leaf(Value::Combiner(combiner))).expect("ground environment is never frozen");
}

/// Populates `env` with every form in §4.7 of the design plus the
/// supplemental ground-environment forms (equality, type predicates,
/// `$let`, a minimal ALU): everything a standalone Kernel-style program
/// needs beyond the bare evaluator core.
pub fn install(env: &Environment, interner: &mut Interner) {
    reg_operative(env, interner, "$if", if_form);
    reg_operative(env, interner, "$cond", cond_form);
    reg_operative(env, interner, "$when", when_form);
    reg_operative(env, interner, "$unless", unless_form);
    reg_operative(env, interner, "$and?", and_form);
    reg_operative(env, interner, "$or?", or_form);
    reg_operative(env, interner, "$sequence", sequence_form);
    reg_applicative(env, interner, "not?", not_form);

    reg_operative(env, interner, "$def!", def_form);
    reg_operative(env, interner, "$define!", def_form);
    reg_operative(env, interner, "$defrec!", defrec_form);
    reg_operative(env, interner, "$set!", set_form);
    reg_operative(env, interner, "$setrec!", setrec_form);
    reg_operative(env, interner, "$undef!", undef_form);
    reg_applicative(env, interner, "make-environment", make_environment_form);
    reg_applicative(env, interner, "get-current-environment", get_current_environment_form);
    reg_operative(env, interner, "$let", let_form);
    reg_operative(env, interner, "$let*", let_star_form);
    reg_operative(env, interner, "$letrec", letrec_form);

    reg_operative(env, interner, "$lambda", lambda_form);
    reg_operative(env, interner, "$vau", vau_form);
    reg_operative(env, interner, "$vau/e", vau_with_environment_form);
    reg_applicative(env, interner, "wrap", wrap_form);
    reg_applicative(env, interner, "unwrap", unwrap_form);
    reg_applicative(env, interner, "apply", apply_form);
    reg_applicative(env, interner, "eval", eval_form);
    reg_applicative(env, interner, "eval%", eval_percent_form);

    reg_applicative(env, interner, "cons", cons_form);
    reg_applicative(env, interner, "cons%", cons_percent_form);
    reg_applicative(env, interner, "list", list_form);
    reg_operative(env, interner, "list%", list_percent_form);
    reg_applicative(env, interner, "first", first_form);
    reg_applicative(env, interner, "first%", first_percent_form);
    reg_applicative(env, interner, "first@", first_at_form);
    reg_applicative(env, interner, "rest", rest_form);
    reg_applicative(env, interner, "rest%", rest_percent_form);
    reg_applicative(env, interner, "rest@", rest_at_form);
    reg_applicative(env, interner, "set-first!", set_first_form);
    reg_applicative(env, interner, "set-rest!", set_rest_form);
    reg_applicative(env, interner, "append", append_form);
    reg_applicative(env, interner, "list-concat", append_form);
    reg_applicative(env, interner, "map1", map1_form);
    reg_applicative(env, interner, "foldr1", foldr1_form);
    reg_applicative(env, interner, "accl", accl_form);
    reg_applicative(env, interner, "accr", accr_form);

    reg_applicative(env, interner, "eqv?", eqv_form);
    reg_applicative(env, interner, "equal?", equal_form);
    reg_applicative(env, interner, "null?", null_p_form);
    reg_applicative(env, interner, "pair?", pair_p_form);
    reg_applicative(env, interner, "symbol?", symbol_p_form);
    reg_applicative(env, interner, "string?", string_p_form);
    reg_applicative(env, interner, "number?", number_p_form);
    reg_applicative(env, interner, "boolean?", boolean_p_form);
    reg_applicative(env, interner, "environment?", environment_p_form);
    reg_applicative(env, interner, "combiner?", combiner_p_form);
    reg_applicative(env, interner, "ignore?", ignore_p_form);
    reg_applicative(env, interner, "inert?", inert_p_form);

    reg_applicative(env, interner, "+", add_form);
    reg_applicative(env, interner, "-", sub_form);
    reg_applicative(env, interner, "*", mul_form);
    reg_applicative(env, interner, "/", div_form);
    reg_applicative(env, interner, "<", lt_form);
    reg_applicative(env, interner, "<=", le_form);
    reg_applicative(env, interner, ">", gt_form);
    reg_applicative(env, interner, ">=", ge_form);

    reg_applicative(env, interner, "make-encapsulation-type", make_encapsulation_type_form);
}

/// Builds a fresh root environment with the ground environment installed.
pub fn ground_environment(interner: &mut Interner) -> Environment {
    let env = Environment::root();
    install(&env, interner);
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn sexpr_sym(interner: &mut Interner, name: &str) -> TermCell {
        Term::leaf(Value::Symbol(interner.intern(name)))
    }

    fn call(name: &str, args: Vec<TermCell>, interner: &mut Interner) -> TermCell {
        let mut children = vec![sexpr_sym(interner, name)];
        children.extend(args);
        Term::combination(children)
    }

    fn int(n: i64) -> TermCell {
        Term::leaf(Value::Int(n))
    }

    #[test]
    fn if_true_branch() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;
        let term = call("$if", vec![Term::leaf(Value::Boolean(true)), int(1), int(2)], &mut ctx.interner);
        let result = eval(&term, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Int(1)));
    }

    #[test]
    fn if_false_branch() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;
        let term = call("$if", vec![Term::leaf(Value::Boolean(false)), int(1), int(2)], &mut ctx.interner);
        let result = eval(&term, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Int(2)));
    }

    #[test]
    fn if_missing_alternative_is_inert() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;
        let term = call("$if", vec![Term::leaf(Value::Boolean(false)), int(1)], &mut ctx.interner);
        let result = eval(&term, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Inert));
    }

    #[test]
    fn lambda_applies_to_a_single_formal() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;
        let x = ctx.interner.intern("x");
        let lambda = call(
            "$lambda",
            vec![Term::combination(vec![Term::leaf(Value::Symbol(x))]), Term::leaf(Value::Symbol(x))],
            &mut ctx.interner,
        );
        let apply_term = Term::combination(vec![lambda, int(42)]);
        // The body is the bare formal `x`, so the result comes back wrapped
        // in a reference from the evaluator's symbol lookup.
        let result = regularize(&eval(&apply_term, &env, &mut ctx).unwrap());
        assert_eq!(result.borrow().as_value(), Some(&Value::Int(42)));
    }

    #[test]
    fn vau_does_not_evaluate_its_operand_but_wrap_does() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;
        let x = ctx.interner.intern("x");
        let ignore = Term::leaf(Value::Ignore);
        let vau = call(
            "$vau",
            vec![Term::combination(vec![Term::leaf(Value::Symbol(x))]), ignore, Term::leaf(Value::Symbol(x))],
            &mut ctx.interner,
        );
        let vau_value = eval(&vau, &env, &mut ctx).unwrap();
        let q = ctx.interner.intern("q");
        env.define(q, vau_value).unwrap();

        let add_expr = call("+", vec![int(1), int(2)], &mut ctx.interner);
        let operative_call = Term::combination(vec![Term::leaf(Value::Symbol(q)), add_expr.clone()]);
        // Operative: operand is echoed back unevaluated (still a combination),
        // modulo the reference wrapping the body's bare-symbol lookup adds.
        let operative_result = regularize(&eval(&operative_call, &env, &mut ctx).unwrap());
        assert!(operative_result.borrow().as_children().is_some());

        let wrap_expr = call("wrap", vec![Term::leaf(Value::Symbol(q))], &mut ctx.interner);
        let wrapped = eval(&wrap_expr, &env, &mut ctx).unwrap();
        let w = ctx.interner.intern("w");
        env.define(w, wrapped).unwrap();
        let applicative_call = Term::combination(vec![Term::leaf(Value::Symbol(w)), add_expr]);
        let applicative_result = regularize(&eval(&applicative_call, &env, &mut ctx).unwrap());
        assert_eq!(applicative_result.borrow().as_value(), Some(&Value::Int(3)));
    }

    #[test]
    fn deep_tail_recursion_does_not_overflow_the_host_stack() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let n = ctx.interner.intern("n");
        let loop_sym = ctx.interner.intern("loop");
        let zero_cmp = call("eqv?", vec![Term::leaf(Value::Symbol(n)), int(0)], &mut ctx.interner);
        // `#inert` is self-evaluating, so the terminal branch needs no
        // lookup and the final result comes back unwrapped.
        let done = Term::leaf(Value::Inert);
        let recurse = call(
            "loop",
            vec![call("-", vec![Term::leaf(Value::Symbol(n)), int(1)], &mut ctx.interner)],
            &mut ctx.interner,
        );
        let if_body = call("$if", vec![zero_cmp, done, recurse], &mut ctx.interner);
        let lambda = call("$lambda", vec![Term::combination(vec![Term::leaf(Value::Symbol(n))]), if_body], &mut ctx.interner);
        let lambda_value = eval(&lambda, &env, &mut ctx).unwrap();
        env.define(loop_sym, lambda_value).unwrap();

        let call_term = Term::combination(vec![Term::leaf(Value::Symbol(loop_sym)), int(100_000)]);
        let result = eval(&call_term, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Inert));
    }

    #[test]
    fn encapsulation_identity_round_trips() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let et = ctx.interner.intern("et");
        let make = ctx.interner.intern("make");
        let is_p = ctx.interner.intern("is?");
        let open = ctx.interner.intern("open");

        let et_term = call("make-encapsulation-type", vec![], &mut ctx.interner);
        let et_value = eval(&et_term, &env, &mut ctx).unwrap();
        env.define(et, et_value).unwrap();

        let make_term = call("first", vec![Term::leaf(Value::Symbol(et))], &mut ctx.interner);
        let make_value = eval(&make_term, &env, &mut ctx).unwrap();
        env.define(make, regularize(&make_value)).unwrap();

        let rest_et = call("rest", vec![Term::leaf(Value::Symbol(et))], &mut ctx.interner);
        let is_term = call("first", vec![rest_et.clone()], &mut ctx.interner);
        let is_value = eval(&is_term, &env, &mut ctx).unwrap();
        env.define(is_p, regularize(&is_value)).unwrap();

        let rest_rest_et = call("rest", vec![rest_et], &mut ctx.interner);
        let open_term = call("first", vec![rest_rest_et], &mut ctx.interner);
        let open_value = eval(&open_term, &env, &mut ctx).unwrap();
        env.define(open, regularize(&open_value)).unwrap();

        let made = call("make", vec![int(7)], &mut ctx.interner);
        let made_value = eval(&made, &env, &mut ctx).unwrap();
        let made_sym = ctx.interner.intern("made");
        env.define(made_sym, made_value).unwrap();

        let is_check = call("is?", vec![Term::leaf(Value::Symbol(made_sym))], &mut ctx.interner);
        assert_eq!(eval(&is_check, &env, &mut ctx).unwrap().borrow().as_value(), Some(&Value::Boolean(true)));

        let open_check = call("open", vec![Term::leaf(Value::Symbol(made_sym))], &mut ctx.interner);
        let opened = eval(&open_check, &env, &mut ctx).unwrap();
        assert_eq!(regularize(&opened).borrow().as_value(), Some(&Value::Int(7)));
    }

    #[test]
    fn mutation_through_reference_is_visible_at_the_binding_site() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let p = ctx.interner.intern("p");
        let list_term = call("list", vec![int(1), int(2)], &mut ctx.interner);
        let list_value = eval(&list_term, &env, &mut ctx).unwrap();
        env.define(p, list_value).unwrap();

        let set_first = call("set-first!", vec![Term::leaf(Value::Symbol(p)), int(9)], &mut ctx.interner);
        eval(&set_first, &env, &mut ctx).unwrap();

        let read_back = eval(&Term::leaf(Value::Symbol(p)), &env, &mut ctx).unwrap();
        assert_eq!(regularize(&read_back).borrow().to_string(), "(9 2)");
    }

    #[test]
    fn let_star_sees_earlier_bindings() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let x = ctx.interner.intern("x");
        let y = ctx.interner.intern("y");
        let bindings = Term::combination(vec![
            Term::combination(vec![Term::leaf(Value::Symbol(x)), int(1)]),
            Term::combination(vec![
                Term::leaf(Value::Symbol(y)),
                call("+", vec![Term::leaf(Value::Symbol(x)), int(1)], &mut ctx.interner),
            ]),
        ]);
        let body = call("+", vec![Term::leaf(Value::Symbol(x)), Term::leaf(Value::Symbol(y))], &mut ctx.interner);
        let let_star = Term::combination(vec![sexpr_sym(&mut ctx.interner, "$let*"), bindings, body]);
        let result = eval(&let_star, &env, &mut ctx).unwrap();
        assert_eq!(result.borrow().as_value(), Some(&Value::Int(3)));
    }

    #[test]
    fn cons_regularizes_its_head_but_cons_percent_retains_a_reference() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let p = ctx.interner.intern("p");
        let def = call("$define!", vec![Term::leaf(Value::Symbol(p)), int(1)], &mut ctx.interner);
        eval(&def, &env, &mut ctx).unwrap();

        let nil = Term::nil();
        let plain = call("cons", vec![Term::leaf(Value::Symbol(p)), nil.clone()], &mut ctx.interner);
        let plain_head = match eval(&plain, &env, &mut ctx).unwrap().borrow().as_children() {
            Some(children) => children[0].clone(),
            None => panic!("cons must return a list"),
        };
        assert!(matches!(plain_head.borrow().as_value(), Some(Value::Int(1))));

        let retaining = call("cons%", vec![Term::leaf(Value::Symbol(p)), nil], &mut ctx.interner);
        let retaining_head = match eval(&retaining, &env, &mut ctx).unwrap().borrow().as_children() {
            Some(children) => children[0].clone(),
            None => panic!("cons% must return a list"),
        };
        assert!(matches!(retaining_head.borrow().as_value(), Some(Value::Reference(_))));
    }

    #[test]
    fn list_evaluates_operands_but_list_percent_does_not() {
        let mut interner = Interner::new();
        let env = ground_environment(&mut interner);
        let mut ctx = Context::new(env.clone());
        ctx.interner = interner;

        let evaluated = call("list", vec![call("+", vec![int(1), int(2)], &mut ctx.interner)], &mut ctx.interner);
        let result = eval(&evaluated, &env, &mut ctx).unwrap();
        let only = result.borrow().as_children().unwrap()[0].clone();
        assert!(matches!(regularize(&only).borrow().as_value(), Some(Value::Int(3))));

        let unevaluated = call("list%", vec![call("+", vec![int(1), int(2)], &mut ctx.interner)], &mut ctx.interner);
        let result = eval(&unevaluated, &env, &mut ctx).unwrap();
        let only = result.borrow().as_children().unwrap()[0].clone();
        assert_eq!(only.borrow().as_children().unwrap().len(), 3);
    }
}
