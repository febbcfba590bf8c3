#![cfg_attr(docsrs, feature(doc_cfg))]

//! # nplisp-base
//!
//! Pure structural atoms shared across the NPLA1 kernel.
//!
//! This crate provides the foundational types used by the kernel crate:
//!
//! - [`Interner`]/[`Symbol`] — string interning for O(1) equality
//!
//! # Design Principles
//!
//! This crate has **no knowledge of evaluation semantics, environments, or
//! terms**. It provides only generic, reusable infrastructure that the
//! kernel crate builds upon.
//!
//! # Example
//!
//! ```
//! use nplisp_base::Interner;
//!
//! let mut interner = Interner::new();
//! let hello = interner.intern("hello");
//! assert_eq!(interner.resolve(hello), "hello");
//! ```

pub mod intern;

pub use intern::{Interner, Symbol, SymbolEq};
