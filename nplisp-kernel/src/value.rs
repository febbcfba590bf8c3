//! The closed sum of everything a [`crate::term::Term`] leaf can hold.

use std::fmt;
use std::rc::Rc;

use nplisp_base::Symbol;

use crate::context::Context;
use crate::environment::{EnvLink, Environment, EnvironmentRef};
use crate::error::KernelResult;
use crate::reduction::Step;
use crate::reference::TermReference;
use crate::term::TermCell;

/// A value-slot payload. Every variant here corresponds to one case of the
/// value-slot holder described by the term model: primitive, symbol,
/// combiner, environment pointer, encapsulated opaque, or term reference.
#[derive(Clone)]
pub enum Value {
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Symbol(Symbol),
    /// `#inert`: the canonical "no useful value" result.
    Inert,
    /// `#ignore`: matches anything and discards it in parameter binding.
    Ignore,
    Combiner(Combiner),
    Environment(EnvironmentRef),
    Encapsulation(Encapsulation),
    Reference(TermReference),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Inert, Value::Inert) => true,
            (Value::Ignore, Value::Ignore) => true,
            (Value::Environment(a), Value::Environment(b)) => a == b,
            (Value::Encapsulation(a), Value::Encapsulation(b)) => a.is_same_type_as(b) && Rc::ptr_eq(&a.payload, &b.payload),
            // Combiners and references compare by identity only; two
            // structurally-similar-but-distinct combiners/references are
            // never equal.
            (Value::Combiner(a), Value::Combiner(b)) => Rc::ptr_eq(&a.handler, &b.handler) && a.wrap_count == b.wrap_count,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(true) => write!(f, "#t"),
            Value::Boolean(false) => write!(f, "#f"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(_) => write!(f, "<symbol>"),
            Value::Inert => write!(f, "#inert"),
            Value::Ignore => write!(f, "#ignore"),
            Value::Combiner(c) if c.wrap_count == 0 => write!(f, "#[operative]"),
            Value::Combiner(_) => write!(f, "#[applicative]"),
            Value::Environment(_) => write!(f, "#[environment]"),
            Value::Encapsulation(_) => write!(f, "#[encapsulation]"),
            Value::Reference(_) => write!(f, "#[reference]"),
        }
    }
}

/// A native (Rust-implemented) combiner handler.
///
/// Returns a [`Step`] rather than a plain value so that control forms
/// (`$if`, `$sequence`, user-visible loops built from them) can request a
/// tail call instead of recursing, preserving the evaluator's bounded
/// host-stack-depth guarantee through native code exactly as it holds
/// through `$vau` bodies.
pub type NativeFn = fn(operand: &TermCell, env: &Environment, ctx: &mut Context) -> KernelResult<Step>;

/// An operative created by `$vau`/`$vau/e`.
pub struct OperativeData {
    pub formals: TermCell,
    pub eformal: Option<Symbol>,
    pub static_parent: EnvLink,
    pub body: TermCell,
    /// If set, the result of applying this operative is returned without
    /// the usual result-lifting step (used for a handful of reflective
    /// primitives).
    pub no_lift: bool,
}

/// A boxed, stateful native handler, used by the handful of primitives
/// (`make-encapsulation-type`'s constructor/predicate/decapsulator triple)
/// that must close over data created fresh at call time, which a plain
/// function pointer cannot do.
pub type NativeClosure = Rc<dyn Fn(&TermCell, &Environment, &mut Context) -> KernelResult<Step>>;

/// Either a Rust-native handler (function pointer or closure) or a
/// user-defined `$vau` closure.
pub enum Handler {
    Native { name: &'static str, f: NativeFn },
    NativeClosure(NativeClosure),
    Operative(Rc<OperativeData>),
}

/// A combiner value: a handler plus a wrap count. Wrap count 0 means
/// operative (operands passed unevaluated); wrap count > 0 means
/// applicative (operands evaluated once per wrap level before the inner
/// handler runs).
#[derive(Clone)]
pub struct Combiner {
    pub handler: Rc<Handler>,
    pub wrap_count: u32,
}

impl Combiner {
    pub fn operative(handler: Handler) -> Combiner {
        Combiner { handler: Rc::new(handler), wrap_count: 0 }
    }

    pub fn wrap(&self) -> Combiner {
        Combiner { handler: self.handler.clone(), wrap_count: self.wrap_count + 1 }
    }

    pub fn unwrap(&self) -> Option<Combiner> {
        if self.wrap_count == 0 {
            None
        } else {
            Some(Combiner { handler: self.handler.clone(), wrap_count: self.wrap_count - 1 })
        }
    }

    pub fn is_operative(&self) -> bool {
        self.wrap_count == 0
    }
}

/// An identity token shared by a constructor/predicate/decapsulator triple
/// produced by `make-encapsulation-type`.
#[derive(Clone)]
pub struct EncapsulationType(Rc<()>);

impl EncapsulationType {
    pub fn new() -> EncapsulationType {
        EncapsulationType(Rc::new(()))
    }
}

impl Default for EncapsulationType {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EncapsulationType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// An opaque value wrapping a term under a specific [`EncapsulationType`]
/// identity token.
#[derive(Clone)]
pub struct Encapsulation {
    pub type_token: EncapsulationType,
    pub payload: TermCell,
}

impl Encapsulation {
    pub fn is_same_type_as(&self, other: &Encapsulation) -> bool {
        self.type_token == other.type_token
    }
}
