//! Records of macro expansions performed during Phase 3.

use smol_str::SmolStr;

/// One macro expansion: the input byte offset `from` that produced output at
/// byte offset `to`, plus the stack of macro-invocation input offsets active
/// when it was emitted (innermost last), for diagnostics and the
/// `consumeExpansions` callback.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub from: usize,
    pub to: usize,
    pub invoking_macros: Vec<usize>,
    /// The indentation recorded on the outermost invoking macro's token, used
    /// by consumers that want to reindent spliced multi-line content.
    pub indent: SmolStr,
}
