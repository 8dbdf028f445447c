//! Owns the single embedded script VM instance an [`Lpp`](crate::engine::Lpp)
//! uses across every Metaprogram it processes.
//!
//! A fresh [`luars::lua_vm::LuaVM`] is expensive to open (it loads the full
//! standard library), so one VM is reused for the engine's lifetime; the
//! `__metaenv`/`lpp` globals registered on it are static ABI surface, while
//! which Metaprogram a call actually mutates is resolved dynamically through
//! [`crate::script::context`].

use std::rc::Rc;

use luars::lib_registry::LibraryRegistry;
use luars::lua_vm::{LuaResult, LuaValue, LuaVM, SafeOption};
use luars::{Stdlib, lib_module};

use crate::script::abi;

/// The message `lpp.cancel` raises to unwind out of the currently-running
/// macro invocation. Unlikely to collide with a genuine user error; checked
/// by exact string comparison against a `pcall` failure's stringified error
/// value in [`crate::metaprogram::Metaprogram::invoke`], since the public
/// `LuaValue` API exposes no cheaper identity check for a sentinel object.
pub(crate) const CANCEL_MARKER: &str = "\u{0}lpp.cancel\u{0}";

pub struct ScriptVm {
    pub(crate) vm: Box<LuaVM>,
}

impl ScriptVm {
    pub fn new() -> LuaResult<Self> {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_stdlib(Stdlib::All)?;

        install_libraries(&mut vm)?;

        Ok(ScriptVm { vm })
    }

    /// Compile `source` (named `chunk_name` so the VM's own error messages
    /// reference it) and run it to completion, returning its results.
    pub fn run_chunk(&mut self, source: &str, chunk_name: &str) -> LuaResult<Vec<LuaValue>> {
        let chunk = self.vm.compile_with_name(source, chunk_name)?;
        self.vm.execute(Rc::new(chunk))
    }
}

fn install_libraries(vm: &mut LuaVM) -> LuaResult<()> {
    let metaenv = lib_module!("__metaenv", {
        "doc" => abi::doc,
        "val" => abi::val,
        "macro" => abi::macro_call,
        "macro_immediate" => abi::macro_immediate,
    });
    let lpp = lib_module!("lpp", {
        "cancel" => abi::cancel,
        "processFile" => abi::process_file,
        "addDependency" => abi::add_dependency,
        "addDocumentSectionCallback" => abi::add_document_section_callback,
        "addFinalCallback" => abi::add_final_callback,
        "currentSourceName" => abi::current_source_name,
    });

    let mut registry = LibraryRegistry::new();
    registry.register(metaenv);
    registry.register(lpp);
    registry.load_all(vm)
}
