//! A Scope is one LIFO stack frame of the Phase 3 splicing walk: the root
//! Scope for a Metaprogram's top-level sections, and one child Scope per
//! active macro invocation.

use smol_str::SmolStr;

use crate::section::Section;

/// One level of the Phase 3 splicing stack.
#[derive(Debug)]
pub struct Scope {
    /// Index of the parent Scope in the Metaprogram's scope arena, or `None`
    /// for the root Scope.
    pub parent: Option<usize>,

    /// The ordered Sections this Scope owns. For a macro's child Scope, this
    /// is the list the macro's invoker populated via `__metaenv.doc`/
    /// `__metaenv.macro` calls made from within the macro's Lua function.
    pub sections: Vec<Section>,

    /// Output accumulated so far by splicing this Scope's own sections,
    /// before being appended to the parent Scope's buffer.
    pub buffer: String,

    /// For a macro's child Scope: the token index of the Macro section that
    /// spawned it, used to build `Expansion::invoking_macros` chains and
    /// script-error "in scope invoked here" traces.
    pub owning_macro_token_idx: Option<usize>,

    /// The macro-indentation text recorded on the Section that spawned this
    /// Scope (empty for the root Scope), carried alongside
    /// `owning_macro_token_idx` so an `Expansion`'s `indent` field can be
    /// built without re-walking the Section list.
    pub owning_indent: SmolStr,

    /// Byte offset in the *root* Metaprogram output buffer at which this
    /// Scope's content begins; cached once the Scope starts splicing so
    /// nested Expansion records can report absolute offsets.
    pub global_offset: usize,
}

impl Scope {
    pub fn root() -> Self {
        Scope {
            parent: None,
            sections: Vec::new(),
            buffer: String::new(),
            owning_macro_token_idx: None,
            owning_indent: SmolStr::new_static(""),
            global_offset: 0,
        }
    }

    pub fn child(
        parent: usize,
        owning_macro_token_idx: usize,
        owning_indent: SmolStr,
        global_offset: usize,
    ) -> Self {
        Scope {
            parent: Some(parent),
            sections: Vec::new(),
            buffer: String::new(),
            owning_macro_token_idx: Some(owning_macro_token_idx),
            owning_indent,
            global_offset,
        }
    }
}
