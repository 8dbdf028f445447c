//! The Section sum type a [`Scope`](crate::scope::Scope) holds in order.

/// One piece of a Scope's ordered content list, produced by Phase 2 script
/// execution and consumed by Phase 3 splicing.
#[derive(Debug, Clone)]
pub enum Section {
    /// A literal run of input text, written verbatim to the owning Scope's
    /// output buffer.
    Document { token_idx: usize, text: String },

    /// A `Document` produced indirectly, via `__metaenv.val` wrapping a Lua
    /// expression's stringified result or an immediate macro's return value.
    DocumentSpan { token_idx: usize, text: String },

    /// A macro invocation: `name` is resolved at Phase-2 script-load time to
    /// an index into the Metaprogram's invoker table. `is_method` distinguishes
    /// `@obj:method(...)` from `@name(...)`.
    Macro {
        token_idx: usize,
        indent: String,
        name: String,
        is_method: bool,
        invoker_idx: usize,
    },

    /// An `@@name(...)` invocation: produces no Section content of its own in
    /// the parent Scope — its result is captured and spliced into the
    /// Document/DocumentSpan section that follows it.
    MacroImmediate {
        token_idx: usize,
        indent: String,
        name: String,
        is_method: bool,
        invoker_idx: usize,
    },
}

impl Section {
    pub fn token_idx(&self) -> usize {
        match self {
            Section::Document { token_idx, .. }
            | Section::DocumentSpan { token_idx, .. }
            | Section::Macro { token_idx, .. }
            | Section::MacroImmediate { token_idx, .. } => *token_idx,
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, Section::Macro { .. } | Section::MacroImmediate { .. })
    }
}
