//! The `Consumer` trait: the engine's sole output interface, notified of
//! diagnostics and every spliced Section as Phase 3 runs.

use crate::diagnostics::Diagnostic;
use crate::expansion::Expansion;
use crate::metaprogram::Metaprogram;
use crate::section::Section;

/// Implemented by callers embedding the engine. All methods have a default
/// no-op body so a consumer only needs to override what it cares about.
pub trait Consumer {
    /// A diagnostic was raised at any phase. Lexer/parser errors and script
    /// errors alike are normalized to this shape.
    fn consume_diag(&mut self, _diag: &Diagnostic) {}

    /// One Section has just finished being spliced into its Scope's output
    /// buffer, with `[start, end)` its byte range in the root Metaprogram's
    /// output buffer.
    fn consume_section(
        &mut self,
        _metaprogram: &Metaprogram,
        _section: &Section,
        _start: usize,
        _end: usize,
    ) {
    }

    /// Called once Phase 3 completes for a Metaprogram, with every
    /// Expansion recorded during the splice.
    fn consume_expansions(&mut self, _metaprogram: &Metaprogram, _expansions: &[Expansion]) {}

    /// Called with the final generated meta script text, primarily useful
    /// for debugging a Metaprogram's Phase 2 script-load failures.
    fn consume_metafile(&mut self, _metaprogram: &Metaprogram, _script: &str) {}
}

/// A Consumer that does nothing; the engine's default when the caller
/// registers none of its own.
#[derive(Debug, Default)]
pub struct NullConsumer;

impl Consumer for NullConsumer {}
