//! The term tree: the universal AST / runtime value representation.
//!
//! A [`Term`] is either a leaf holding a [`Value`] or a combination holding
//! an ordered list of child terms. Children are stored as [`TermCell`]s
//! (`Rc<RefCell<Term>>`) rather than plain owned values: most of the tree
//! behaves like an ordinary owned recursive structure (one parent, dropped
//! when the parent drops), but forms like `set-first!`/`set-rest!` need to
//! mutate a subterm in place through a [`TermReference`](crate::reference::TermReference)
//! that does not own it, which requires interior mutability at the cell
//! granularity rather than a raw `Box`.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::tags::Tags;
use crate::value::Value;

/// A shared, mutable handle to a single [`Term`] node.
pub type TermCell = Rc<RefCell<Term>>;

/// Either a leaf value or an ordered combination of subterms.
pub enum Content {
    Leaf(Value),
    Combination(Vec<TermCell>),
}

/// One node of the term tree.
pub struct Term {
    pub content: Content,
    pub tags: Tags,
}

impl Term {
    /// Builds a leaf term wrapping `value`.
    pub fn leaf(value: Value) -> TermCell {
        Rc::new(RefCell::new(Term { content: Content::Leaf(value), tags: Tags::UNQUALIFIED }))
    }

    /// Builds a combination term from `children`.
    pub fn combination(children: Vec<TermCell>) -> TermCell {
        Rc::new(RefCell::new(Term {
            content: Content::Combination(children),
            tags: Tags::UNQUALIFIED,
        }))
    }

    /// The empty list, `()`.
    pub fn nil() -> TermCell {
        Term::combination(Vec::new())
    }

    /// `true` if this term has no subterms (a leaf, possibly the empty
    /// list if it also has no value, see [`Term::is_empty_list`]).
    pub fn is_leaf(&self) -> bool {
        matches!(self.content, Content::Leaf(_))
    }

    /// `true` if this term is the empty combination `()`.
    pub fn is_empty_list(&self) -> bool {
        matches!(&self.content, Content::Combination(c) if c.is_empty())
    }

    /// Borrows this term's value, if it is a leaf.
    pub fn as_value(&self) -> Option<&Value> {
        match &self.content {
            Content::Leaf(v) => Some(v),
            Content::Combination(_) => None,
        }
    }

    /// Borrows this term's children, if it is a combination.
    pub fn as_children(&self) -> Option<&[TermCell]> {
        match &self.content {
            Content::Combination(c) => Some(c),
            Content::Leaf(_) => None,
        }
    }
}

/// Deep-clones a term tree: every [`TermCell`] is rebuilt fresh rather than
/// `Rc`-shared, matching the "each term is owned by exactly one parent"
/// lifecycle. Used whenever a value must be copied (as opposed to moved)
/// per the movable/prvalue predicates in [`crate::reference`].
pub fn deep_clone(cell: &TermCell) -> TermCell {
    let term: Ref<Term> = cell.borrow();
    match &term.content {
        Content::Leaf(v) => {
            let t = Term { content: Content::Leaf(v.clone()), tags: term.tags };
            Rc::new(RefCell::new(t))
        }
        Content::Combination(children) => {
            let cloned: Vec<TermCell> = children.iter().map(deep_clone).collect();
            let t = Term { content: Content::Combination(cloned), tags: term.tags };
            Rc::new(RefCell::new(t))
        }
    }
}

/// Convenience: borrow a cell's term mutably.
pub fn borrow_mut(cell: &TermCell) -> RefMut<'_, Term> {
    cell.borrow_mut()
}

/// Convenience: borrow a cell's term immutably.
pub fn borrow(cell: &TermCell) -> Ref<'_, Term> {
    cell.borrow()
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content {
            Content::Leaf(v) => write!(f, "{v}"),
            Content::Combination(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", child.borrow())?;
                }
                write!(f, ")")
            }
        }
    }
}
