//! First-class environments: parent chains, anchor-based liveness tracking,
//! and name resolution.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use nplisp_base::Symbol;
use rustc_hash::FxHashMap;

use crate::error::{KernelError, KernelResult};
use crate::term::TermCell;

/// How an environment finds bindings it does not hold itself.
#[derive(Clone)]
pub enum Parent {
    /// No parent; lookups that fall through fail.
    Empty,
    /// A single parent, searched directly.
    Single(EnvLink),
    /// Several parents, searched left-to-right (depth-first).
    List(Vec<EnvLink>),
}

/// A parent-chain entry: either an environment this environment keeps
/// alive, or a weak reference to one kept alive elsewhere.
#[derive(Clone)]
pub enum EnvLink {
    Owned(Environment),
    Weak(EnvironmentRef),
}

impl EnvLink {
    fn resolve(&self, name: Symbol) -> Option<(TermCell, Environment)> {
        match self {
            EnvLink::Owned(env) => resolve(env, name),
            EnvLink::Weak(r) => r.upgrade().and_then(|env| resolve(&env, name)),
        }
    }
}

struct EnvData {
    bindings: FxHashMap<Symbol, TermCell>,
    parent: Parent,
    frozen: bool,
    /// One strong copy of the anchor token, held for this environment's own
    /// lifetime. See [`Environment::anchor_strong_count`] for the invariant
    /// this supports.
    anchor: Rc<()>,
}

/// A first-class, reference-counted environment.
///
/// Cloning an `Environment` clones the `Rc`: both clones observe the same
/// bindings. This is the "strong"/owning handle; see [`EnvironmentRef`] for
/// the weak, anchor-tracked handle used by first-class environment values
/// and dynamic-environment captures.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<EnvData>>);

impl Environment {
    /// Creates a fresh, empty, unfrozen environment with the given parent.
    pub fn new(parent: Parent) -> Environment {
        Environment(Rc::new(RefCell::new(EnvData {
            bindings: FxHashMap::default(),
            parent,
            frozen: false,
            anchor: Rc::new(()),
        })))
    }

    /// Creates a root environment with no parent.
    pub fn root() -> Environment {
        Environment::new(Parent::Empty)
    }

    /// Creates a child environment whose sole parent is `self`.
    pub fn child(&self) -> Environment {
        Environment::new(Parent::Single(EnvLink::Owned(self.clone())))
    }

    /// Binds `name` to `value` in this environment directly (no parent
    /// lookup). Fails if the environment is frozen.
    pub fn define(&self, name: Symbol, value: TermCell) -> KernelResult<()> {
        let mut data = self.0.borrow_mut();
        if data.frozen {
            return Err(KernelError::InvariantViolation(
                "cannot define a binding in a frozen environment".into(),
            ));
        }
        data.bindings.insert(name, value);
        Ok(())
    }

    /// Rebinds `name`, which must already resolve somewhere in the parent
    /// chain starting at `self` (per `$set!`'s "target must already exist"
    /// semantics). Mutates the binding in whichever environment holds it.
    pub fn set(&self, name: Symbol, value: TermCell) -> KernelResult<()> {
        let (_, holder) = resolve(self, name)
            .ok_or_else(|| KernelError::BadIdentifier(format!("{name:?}")))?;
        let mut data = holder.0.borrow_mut();
        if data.frozen {
            return Err(KernelError::InvariantViolation(
                "cannot set a binding in a frozen environment".into(),
            ));
        }
        data.bindings.insert(name, value);
        Ok(())
    }

    /// Removes `name` from this environment's own bindings, if present
    /// (`$undef!`). Does not search the parent chain: undefining a name
    /// that is only inherited is a no-op, matching `define`/`set`'s own
    /// "this environment only" vs. "searches the chain" split.
    pub fn undefine(&self, name: Symbol) -> KernelResult<()> {
        let mut data = self.0.borrow_mut();
        if data.frozen {
            return Err(KernelError::InvariantViolation(
                "cannot undefine a binding in a frozen environment".into(),
            ));
        }
        data.bindings.remove(&name);
        Ok(())
    }

    /// Marks this environment frozen: further `define`/`set` through it
    /// fail.
    pub fn freeze(&self) {
        self.0.borrow_mut().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    /// A weak, anchor-carrying handle to this environment.
    pub fn downgrade(&self) -> EnvironmentRef {
        let anchor = self.0.borrow().anchor.clone();
        EnvironmentRef { weak: Rc::downgrade(&self.0), anchor }
    }

    /// Number of outstanding strong references to the anchor token minus the
    /// one copy this environment holds for its own lifetime. Equals the
    /// number of live [`EnvironmentRef`]s pointing at this environment.
    ///
    /// The original accounting this is ported from used a baseline of two
    /// (one long-lived self-copy, one transient copy held by the
    /// constructing call frame); this port keeps exactly one baseline copy,
    /// so the invariant here is `strong_count - 1` rather than `- 2`.
    pub fn anchor_strong_count(&self) -> usize {
        Rc::strong_count(&self.0.borrow().anchor)
    }

    pub fn outstanding_references(&self) -> usize {
        self.anchor_strong_count().saturating_sub(1)
    }

    fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A weak reference to an environment, carrying its own copy of the
/// environment's anchor token.
///
/// Two references are equal iff their weak pointers would lock to the same
/// environment. After the referent is destroyed, `upgrade` returns `None`
/// while the anchor's strong count still reflects this reference's
/// existence, which is what lets [`Environment::anchor_strong_count`]
/// diagnose dangling access instead of merely panicking on use.
#[derive(Clone)]
pub struct EnvironmentRef {
    weak: Weak<RefCell<EnvData>>,
    anchor: Rc<()>,
}

impl EnvironmentRef {
    /// Attempts to recover a strong handle to the referent.
    pub fn upgrade(&self) -> Option<Environment> {
        self.weak.upgrade().map(Environment)
    }

    /// As [`Self::upgrade`], but raises [`KernelError::InvalidReference`]
    /// instead of returning `None`.
    pub fn require(&self) -> KernelResult<Environment> {
        self.upgrade()
            .ok_or_else(|| KernelError::InvalidReference("environment no longer exists".into()))
    }
}

impl PartialEq for EnvironmentRef {
    fn eq(&self, other: &Self) -> bool {
        self.weak.ptr_eq(&other.weak)
    }
}

/// Looks up `name` starting at `env`, following the parent chain
/// depth-first. Returns the binding cell and the environment that actually
/// holds it (needed by `set`/`set-first!`-style mutation).
pub fn resolve(env: &Environment, name: Symbol) -> Option<(TermCell, Environment)> {
    if let Some(cell) = env.0.borrow().bindings.get(&name) {
        return Some((cell.clone(), env.clone()));
    }
    let parent = env.0.borrow().parent.clone();
    match parent {
        Parent::Empty => None,
        Parent::Single(link) => link.resolve(name),
        Parent::List(links) => links.iter().find_map(|link| link.resolve(name)),
    }
}
