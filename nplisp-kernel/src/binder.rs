//! Structural parameter-tree binding.
//!
//! A formal parameter tree is a `Term` built from: `#ignore` (discards),
//! a plain symbol (binds by value, moving if the operand is movable),
//! a symbol whose leaf carries [`Tags::UNIQUE`] (the `&x` reference-binding
//! form: binds a reference to the operand instead of its value), a symbol
//! whose leaf carries [`Tags::TEMPORARY`] (the `@x` list-reference form: as
//! `&x`, but the operand must be a list), and combinations thereof. A
//! combination's last child may carry [`Tags::STICKY`] to mark it as a
//! "rest" collector: every operand past the fixed prefix is gathered into a
//! list and bound to that child, the way a dotted `. rest` tail does in
//! surface syntax. `Tags::STICKY`'s general meaning, "administrative
//! subterm, not part of user list structure", is exactly what a rest
//! marker is, which is why this crate reuses it here rather than adding a
//! parallel concept.
//!
//! These sigils are ordinarily surface syntax a parser desugars into this
//! shape; since the parser is an external collaborator outside this crate's
//! scope, callers building formal trees by hand (forms.rs, tests) set the
//! tag directly.

use crate::environment::Environment;
use crate::error::{KernelError, KernelResult};
use crate::reference::{is_movable, prepare_collapse};
use crate::tags::Tags;
use crate::term::{borrow, deep_clone, Content, Term, TermCell};
use crate::value::Value;

/// Validates that every leaf of `formal` is `#ignore` or a symbol. Does not
/// check for duplicate names: a later binding simply overwrites an earlier
/// one in the same environment.
pub fn check_parameter_tree(formal: &TermCell) -> KernelResult<()> {
    let data = borrow(formal);
    match &data.content {
        Content::Leaf(Value::Ignore) | Content::Leaf(Value::Symbol(_)) => Ok(()),
        Content::Leaf(_) => {
            Err(KernelError::InvalidSyntax("parameter tree leaf must be a symbol or #ignore".into()))
        }
        Content::Combination(children) => {
            for child in children {
                check_parameter_tree(child)?;
            }
            Ok(())
        }
    }
}

/// Matches `formal` against `operand`, inserting bindings into `env`.
pub fn bind_parameter(env: &Environment, formal: &TermCell, operand: &TermCell) -> KernelResult<()> {
    let (is_leaf_ignore, leaf_symbol, tags, children) = {
        let data = borrow(formal);
        match &data.content {
            Content::Leaf(Value::Ignore) => (true, None, data.tags, None),
            Content::Leaf(Value::Symbol(sym)) => (false, Some(*sym), data.tags, None),
            Content::Leaf(_) => {
                return Err(KernelError::InvalidSyntax(
                    "parameter tree leaf must be a symbol or #ignore".into(),
                ))
            }
            Content::Combination(kids) => (false, None, data.tags, Some(kids.clone())),
        }
    };

    if is_leaf_ignore {
        return Ok(());
    }

    if let Some(sym) = leaf_symbol {
        return bind_symbol(env, sym, tags, operand);
    }

    let formal_children = children.expect("non-leaf, non-ignore, non-symbol formal must be a combination");
    bind_list(env, &formal_children, operand)
}

fn bind_symbol(env: &Environment, sym: nplisp_base::Symbol, tags: Tags, operand: &TermCell) -> KernelResult<()> {
    let reference_mode = tags.contains(Tags::UNIQUE);
    let list_ref_mode = tags.contains(Tags::TEMPORARY);

    if list_ref_mode {
        let is_list = matches!(borrow(operand).content, Content::Combination(_));
        if !is_list {
            return Err(KernelError::ListTypeError(
                "@-formal requires a list operand".into(),
            ));
        }
    }

    let bound_value = if reference_mode || list_ref_mode {
        Term::leaf(Value::Reference(prepare_collapse(operand, env)))
    } else if is_movable(&borrow(operand)) {
        operand.clone()
    } else {
        deep_clone(operand)
    };

    env.define(sym, bound_value)
}

fn bind_list(env: &Environment, formal_children: &[TermCell], operand: &TermCell) -> KernelResult<()> {
    let operand_children = {
        let data = borrow(operand);
        match &data.content {
            Content::Combination(kids) => kids.clone(),
            Content::Leaf(_) => {
                return Err(KernelError::ListTypeError(format!(
                    "expected a list operand matching a {}-element parameter tree, found an atom",
                    formal_children.len()
                )))
            }
        }
    };

    let rest_index = formal_children
        .last()
        .filter(|last| borrow(last).tags.contains(Tags::STICKY))
        .map(|_| formal_children.len() - 1);

    match rest_index {
        None => {
            if formal_children.len() != operand_children.len() {
                return Err(KernelError::ParameterMismatch {
                    formal: format!("{}-element list", formal_children.len()),
                    operand: format!("{}-element list", operand_children.len()),
                });
            }
            for (f, o) in formal_children.iter().zip(operand_children.iter()) {
                bind_parameter(env, f, o)?;
            }
            Ok(())
        }
        Some(fixed_count) => {
            if operand_children.len() < fixed_count {
                return Err(KernelError::ParameterMismatch {
                    formal: format!("at least {fixed_count}-element list"),
                    operand: format!("{}-element list", operand_children.len()),
                });
            }
            for (f, o) in formal_children[..fixed_count].iter().zip(operand_children.iter()) {
                bind_parameter(env, f, o)?;
            }
            let rest_operand = Term::combination(operand_children[fixed_count..].to_vec());
            bind_parameter(env, &formal_children[fixed_count], &rest_operand)
        }
    }
}

/// Builds a plain by-value symbol formal (no `&`/`@` prefix).
pub fn plain_formal(sym: nplisp_base::Symbol) -> TermCell {
    Term::leaf(Value::Symbol(sym))
}

/// Builds a `&`-prefixed (reference-binding) symbol formal.
pub fn reference_formal(sym: nplisp_base::Symbol) -> TermCell {
    let cell = Term::leaf(Value::Symbol(sym));
    cell.borrow_mut().tags |= Tags::UNIQUE;
    cell
}

/// Builds an `@`-prefixed (list-reference-binding) symbol formal: as
/// [`reference_formal`], but the operand must be a list.
pub fn list_reference_formal(sym: nplisp_base::Symbol) -> TermCell {
    let cell = Term::leaf(Value::Symbol(sym));
    cell.borrow_mut().tags |= Tags::TEMPORARY;
    cell
}

/// Builds a rest-collector formal: binds every operand past the fixed
/// prefix of its enclosing list to `sym`.
pub fn rest_formal(sym: nplisp_base::Symbol) -> TermCell {
    let cell = Term::leaf(Value::Symbol(sym));
    cell.borrow_mut().tags |= Tags::STICKY;
    cell
}

#[cfg(test)]
mod tests {
    use super::*;
    use nplisp_base::Interner;

    fn env_and_interner() -> (Environment, Interner) {
        (Environment::root(), Interner::new())
    }

    #[test]
    fn ignore_discards_operand() {
        let (env, _) = env_and_interner();
        let formal = Term::leaf(Value::Ignore);
        let operand = Term::leaf(Value::Int(1));
        assert!(bind_parameter(&env, &formal, &operand).is_ok());
    }

    #[test]
    fn plain_symbol_binds_operand_value() {
        let (env, mut interner) = env_and_interner();
        let x = interner.intern("x");
        let formal = plain_formal(x);
        let operand = Term::leaf(Value::Int(5));
        bind_parameter(&env, &formal, &operand).unwrap();
        let (cell, _) = crate::environment::resolve(&env, x).unwrap();
        assert_eq!(cell.borrow().as_value(), Some(&Value::Int(5)));
    }

    #[test]
    fn list_formal_matches_list_operand_positionally() {
        let (env, mut interner) = env_and_interner();
        let x = interner.intern("x");
        let y = interner.intern("y");
        let formal = Term::combination(vec![plain_formal(x), plain_formal(y)]);
        let operand = Term::combination(vec![Term::leaf(Value::Int(1)), Term::leaf(Value::Int(2))]);
        bind_parameter(&env, &formal, &operand).unwrap();
        assert_eq!(crate::environment::resolve(&env, x).unwrap().0.borrow().as_value(), Some(&Value::Int(1)));
        assert_eq!(crate::environment::resolve(&env, y).unwrap().0.borrow().as_value(), Some(&Value::Int(2)));
    }

    #[test]
    fn list_formal_rejects_mismatched_arity() {
        let (env, mut interner) = env_and_interner();
        let x = interner.intern("x");
        let y = interner.intern("y");
        let formal = Term::combination(vec![plain_formal(x), plain_formal(y)]);
        let operand = Term::combination(vec![Term::leaf(Value::Int(1))]);
        let err = bind_parameter(&env, &formal, &operand).unwrap_err();
        assert!(matches!(err, KernelError::ParameterMismatch { .. }));
    }

    #[test]
    fn rest_formal_collects_remaining_operands() {
        let (env, mut interner) = env_and_interner();
        let x = interner.intern("x");
        let rest = interner.intern("rest");
        let formal = Term::combination(vec![plain_formal(x), rest_formal(rest)]);
        let operand = Term::combination(vec![
            Term::leaf(Value::Int(1)),
            Term::leaf(Value::Int(2)),
            Term::leaf(Value::Int(3)),
        ]);
        bind_parameter(&env, &formal, &operand).unwrap();
        let (rest_cell, _) = crate::environment::resolve(&env, rest).unwrap();
        assert_eq!(rest_cell.borrow().to_string(), "(2 3)");
    }

    #[test]
    fn empty_formal_requires_empty_operand() {
        let (env, _) = env_and_interner();
        let formal = Term::nil();
        let non_empty = Term::combination(vec![Term::leaf(Value::Int(1))]);
        assert!(bind_parameter(&env, &formal, &non_empty).is_err());
        assert!(bind_parameter(&env, &formal, &Term::nil()).is_ok());
    }

    #[test]
    fn reference_formal_binds_a_reference_not_a_copy() {
        let (env, mut interner) = env_and_interner();
        let r = interner.intern("r");
        let formal = reference_formal(r);
        let operand = Term::leaf(Value::Int(9));
        bind_parameter(&env, &formal, &operand).unwrap();
        let (cell, _) = crate::environment::resolve(&env, r).unwrap();
        assert!(matches!(cell.borrow().as_value(), Some(Value::Reference(_))));
    }

    #[test]
    fn list_reference_formal_binds_a_reference_to_a_list_operand() {
        let (env, mut interner) = env_and_interner();
        let r = interner.intern("r");
        let formal = list_reference_formal(r);
        let operand = Term::combination(vec![Term::leaf(Value::Int(1)), Term::leaf(Value::Int(2))]);
        bind_parameter(&env, &formal, &operand).unwrap();
        let (cell, _) = crate::environment::resolve(&env, r).unwrap();
        assert!(matches!(cell.borrow().as_value(), Some(Value::Reference(_))));
    }

    #[test]
    fn list_reference_formal_rejects_an_atom_operand() {
        let (env, mut interner) = env_and_interner();
        let r = interner.intern("r");
        let formal = list_reference_formal(r);
        let operand = Term::leaf(Value::Int(9));
        let err = bind_parameter(&env, &formal, &operand).unwrap_err();
        assert!(matches!(err, KernelError::ListTypeError(_)));
    }
}
