//! Term references and the value-category (lvalue/xvalue/prvalue) rules
//! built on top of them.

use crate::environment::{Environment, EnvironmentRef};
use crate::tags::Tags;
use crate::term::{borrow, Content, Term, TermCell};
use crate::value::Value;

/// A first-class reference to a term, scoped to the environment whose
/// anchor keeps the referent alive.
///
/// A reference never refers to another reference: constructing one over an
/// existing reference folds through it (see [`collapse`]) rather than
/// nesting.
#[derive(Clone)]
pub struct TermReference {
    pub referent: TermCell,
    pub tags: Tags,
    pub env: EnvironmentRef,
}

impl TermReference {
    pub fn new(referent: TermCell, tags: Tags, env: EnvironmentRef) -> TermReference {
        debug_assert!(!tags.is_sticky(), "a reference's tags must not carry Sticky");
        TermReference { referent, tags, env }
    }

    /// `!Nonmodifying`.
    pub fn is_modifiable(&self) -> bool {
        self.tags.is_modifiable()
    }

    pub fn is_unique(&self) -> bool {
        self.tags.is_unique()
    }

    pub fn is_temporary(&self) -> bool {
        self.tags.is_temporary()
    }

    /// `Unique` implies `Temporary`: binding a reference tagged `Unique`
    /// also marks it `Temporary`, since a prvalue/xvalue reference may
    /// safely be moved from.
    pub fn with_bound_reference_tags(mut self) -> TermReference {
        if self.tags.is_unique() {
            self.tags |= Tags::TEMPORARY;
        }
        self
    }

    /// A reference propagates `Nonmodifying` from its carrier: moving a
    /// reference never loosens a `Nonmodifying` it already carries.
    pub fn propagate_to(&self, carrier_tags: Tags) -> Tags {
        let mut result = self.tags;
        if carrier_tags.contains(Tags::NONMODIFYING) {
            result |= Tags::NONMODIFYING;
        }
        result
    }
}

/// Folds a reference-to-a-reference down to a single reference, merging
/// tags, and reports whether a fold actually happened.
///
/// If `referent`'s value is itself a [`Value::Reference`], returns the
/// inner reference with `Nonmodifying` propagated from the outer one;
/// otherwise returns `reference` unchanged.
pub fn collapse(reference: TermReference) -> (TermReference, bool) {
    let inner = {
        let term = borrow(&reference.referent);
        match &term.content {
            Content::Leaf(Value::Reference(inner)) => Some(inner.clone()),
            _ => None,
        }
    };
    match inner {
        Some(mut inner) => {
            inner.tags = inner.propagate_to(reference.tags);
            (inner, true)
        }
        None => (reference, false),
    }
}

/// Builds a reference to `term` as observed from `env`, preserving existing
/// reference state if `term` already holds one (applies [`collapse`]).
pub fn prepare_collapse(term: &TermCell, env: &Environment) -> TermReference {
    let existing = {
        let data = borrow(term);
        match &data.content {
            Content::Leaf(Value::Reference(r)) => Some(r.clone()),
            _ => None,
        }
    };
    let reference = existing.unwrap_or_else(|| {
        TermReference::new(term.clone(), Tags::UNQUALIFIED, env.downgrade())
    });
    collapse(reference).0
}

/// `true` if `term`'s value is a reference without `Unique` and without
/// `Temporary` (a name that still designates a live object another binding
/// also sees).
pub fn is_lvalue(term: &Term) -> bool {
    match term.as_value() {
        Some(Value::Reference(r)) => !r.is_unique() && !r.is_temporary(),
        _ => false,
    }
}

/// `true` if `term`'s value is a reference carrying `Unique` (an object
/// whose current binding is its last owner).
pub fn is_xvalue(term: &Term) -> bool {
    matches!(term.as_value(), Some(Value::Reference(r)) if r.is_unique())
}

/// `true` if `term` is not a reference at all, or is a reference tagged
/// `Temporary`.
pub fn is_prvalue(term: &Term) -> bool {
    match term.as_value() {
        Some(Value::Reference(r)) => r.is_temporary(),
        _ => true,
    }
}

/// `true` for prvalues and xvalues: terms it is safe to move out of rather
/// than copy.
pub fn is_movable(term: &Term) -> bool {
    is_prvalue(term) || is_xvalue(term)
}

/// Follows a chain of [`Value::Reference`]s down to the term they ultimately
/// designate. Forms that need to inspect a value's shape (is it a list? a
/// combiner? an environment?) call this first, since a name almost always
/// resolves to a reference rather than the value directly (see
/// [`prepare_collapse`]).
pub fn deref(term: &TermCell) -> TermCell {
    let inner = match borrow(term).as_value() {
        Some(Value::Reference(r)) => Some(r.referent.clone()),
        _ => None,
    };
    match inner {
        Some(t) => deref(&t),
        None => term.clone(),
    }
}

/// Strips one layer of [`Value::Reference`] wrapping, returning the
/// referent directly. Used where a result must be handed back "lifted" to
/// plain form (`eval`, as opposed to `eval%` which preserves the reference).
pub fn regularize(term: &TermCell) -> TermCell {
    let inner = match borrow(term).as_value() {
        Some(Value::Reference(r)) => Some(r.referent.clone()),
        _ => None,
    };
    inner.unwrap_or_else(|| term.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::rc::Rc;

    fn fresh_env() -> Environment {
        Environment::root()
    }

    #[test]
    fn plain_leaf_is_prvalue_and_movable() {
        let t = Term::leaf(Value::Int(1));
        assert!(is_prvalue(&t.borrow()));
        assert!(is_movable(&t.borrow()));
        assert!(!is_lvalue(&t.borrow()));
        assert!(!is_xvalue(&t.borrow()));
    }

    #[test]
    fn unqualified_reference_is_lvalue() {
        let env = fresh_env();
        let target = Term::leaf(Value::Int(1));
        let reference = TermReference::new(target, Tags::UNQUALIFIED, env.downgrade());
        let wrapper = Term::leaf(Value::Reference(reference));
        assert!(is_lvalue(&wrapper.borrow()));
        assert!(!is_movable(&wrapper.borrow()));
    }

    #[test]
    fn unique_reference_is_xvalue_and_movable() {
        let env = fresh_env();
        let target = Term::leaf(Value::Int(1));
        let reference = TermReference::new(target, Tags::UNIQUE, env.downgrade());
        let wrapper = Term::leaf(Value::Reference(reference));
        assert!(is_xvalue(&wrapper.borrow()));
        assert!(is_movable(&wrapper.borrow()));
    }

    #[test]
    fn temporary_reference_is_prvalue() {
        let env = fresh_env();
        let target = Term::leaf(Value::Int(1));
        let reference = TermReference::new(target, Tags::TEMPORARY, env.downgrade());
        let wrapper = Term::leaf(Value::Reference(reference));
        assert!(is_prvalue(&wrapper.borrow()));
    }

    #[test]
    fn binding_unique_reference_also_marks_temporary() {
        let env = fresh_env();
        let target = Term::leaf(Value::Int(1));
        let reference =
            TermReference::new(target, Tags::UNIQUE, env.downgrade()).with_bound_reference_tags();
        assert!(reference.is_temporary());
    }

    #[test]
    fn collapse_folds_reference_to_reference() {
        let env = fresh_env();
        let inner_target = Term::leaf(Value::Int(5));
        let inner_ref = TermReference::new(inner_target, Tags::UNQUALIFIED, env.downgrade());
        let middle = Term::leaf(Value::Reference(inner_ref));
        let outer_ref = TermReference::new(middle, Tags::NONMODIFYING, env.downgrade());
        let (collapsed, did_collapse) = collapse(outer_ref);
        assert!(did_collapse);
        assert!(collapsed.tags.contains(Tags::NONMODIFYING));
        assert_eq!(collapsed.referent.borrow().as_value(), Some(&Value::Int(5)));
    }

    #[test]
    fn deref_follows_reference_chain_to_the_underlying_term() {
        let env = fresh_env();
        let target = Term::leaf(Value::Int(3));
        let reference = TermReference::new(target.clone(), Tags::UNQUALIFIED, env.downgrade());
        let wrapper = Term::leaf(Value::Reference(reference));
        assert!(Rc::ptr_eq(&deref(&wrapper), &target));
    }

    #[test]
    fn deref_is_a_no_op_on_a_non_reference_term() {
        let target = Term::leaf(Value::Int(3));
        assert!(Rc::ptr_eq(&deref(&target), &target));
    }

    #[test]
    fn collapse_is_idempotent_on_direct_reference() {
        let env = fresh_env();
        let target = Term::leaf(Value::Int(5));
        let reference = TermReference::new(target, Tags::UNQUALIFIED, env.downgrade());
        let (collapsed, did_collapse) = collapse(reference);
        assert!(!did_collapse);
        assert_eq!(collapsed.referent.borrow().as_value(), Some(&Value::Int(5)));
    }
}
