//! Host observability hook.
//!
//! The kernel crate never depends on a logging backend directly (its
//! evaluation core has no path to IO). A host embeds this crate by handing a
//! [`Context`](crate::context::Context) a [`DiagnosticSink`] that forwards
//! into whatever logging facility the host already uses.

use crate::error::KernelError;

/// Observation points the evaluator reports through, regardless of whether
/// a host is listening.
///
/// Only [`Self::tco_compress`] is actually called from within this crate
/// today (`reduction::TcoAction::compress`). `anchor_leak` and `error` are
/// declared here as hooks a host may implement and call itself (e.g. around
/// its own `eval` invocation, or while polling
/// [`Environment::outstanding_references`](crate::environment::Environment::outstanding_references)
/// before dropping one it controls), but this crate raises neither of them
/// internally.
pub trait DiagnosticSink {
    /// An environment was dropped with outstanding references still live
    /// (see the anchor-accounting invariant on
    /// [`Environment`](crate::environment::Environment)).
    fn anchor_leak(&self, _outstanding: usize) {}

    /// A TCO frame compressed: `retired` frame records were dropped in
    /// favor of the newly current one.
    fn tco_compress(&self, _operator: &str, _retired: usize) {}

    /// A [`KernelError`] is about to unwind out of `reduce`/`eval`.
    fn error(&self, _err: &KernelError) {}
}

/// Default sink: observes nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {}
