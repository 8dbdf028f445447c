//! The fixed-name functions the generated meta script calls into
//! (`__metaenv.doc`, `__metaenv.val`, `__metaenv.macro`,
//! `__metaenv.macro_immediate`) plus the `lpp` table's `cancel`/`processFile`
//! entries.
//!
//! Every function here is a `luars::lua_vm::CFunction`
//! (`fn(&mut LuaState) -> LuaResult<usize>`), a bare function pointer that
//! cannot capture Rust state. Each instead recovers "the Metaprogram this
//! call belongs to" from [`script::context`](super::context) on entry.

use luars::lua_vm::{LuaResult, LuaState};

use crate::script::context;
use crate::script::vm::CANCEL_MARKER;
use crate::section::Section;

fn arg_usize(state: &mut LuaState, idx: usize) -> LuaResult<usize> {
    match state.get_arg(idx).and_then(|v| v.as_integer()) {
        Some(i) => Ok(i as usize),
        None => Err(state.error("expected an integer argument".into())),
    }
}

fn arg_bool(state: &mut LuaState, idx: usize) -> LuaResult<bool> {
    match state.get_arg(idx).and_then(|v| v.as_bool()) {
        Some(b) => Ok(b),
        None => Err(state.error("expected a boolean argument".into())),
    }
}

fn require_context(
    state: &mut LuaState,
) -> LuaResult<&'static mut crate::metaprogram::Metaprogram> {
    match context::current() {
        Some(mp) => Ok(mp),
        None => Err(state.error(
            crate::diagnostics::ScriptRuntimeError::no_active_context("metaenv callback")
                .to_string(),
        )),
    }
}

/// `__metaenv.doc(token_idx, offset, text)` — append a literal Document
/// section to the current scope.
pub fn doc(state: &mut LuaState) -> LuaResult<usize> {
    let token_idx = arg_usize(state, 0)?;
    let text_val = state
        .get_arg(2)
        .ok_or_else(|| state.error("__metaenv.doc: missing text argument".into()))?;
    let text = state.to_string(&text_val)?;
    let mp = require_context(state)?;
    mp.push_section(Section::Document { token_idx, text });
    Ok(0)
}

/// `__metaenv.val(token_idx, offset, expr)` — evaluate `expr` (already
/// evaluated by the VM by the time this runs) and append its stringified
/// result as a DocumentSpan section.
pub fn val(state: &mut LuaState) -> LuaResult<usize> {
    let token_idx = arg_usize(state, 0)?;
    let value = state
        .get_arg(2)
        .ok_or_else(|| state.error("__metaenv.val: missing value argument".into()))?;
    let text = if value.is_nil() { String::new() } else { state.to_string(&value)? };
    let mp = require_context(state)?;
    mp.push_section(Section::DocumentSpan { token_idx, text });
    Ok(0)
}

/// Shared argument parsing for `macro`/`macro_immediate`: `(token_idx,
/// offset, indent, name, is_method, callee, then four trailing scalars per
/// macro argument: source_name, start, end, text)`.
///
/// The parser emits a flat run of scalars rather than a wrapper object per
/// argument: this VM's `..` operator only coerces primitive values (see
/// `Metaprogram::invoke`), so a macro body written as `"hi "..who` needs
/// `who` to already be a plain Lua string. Only the text quarter of each
/// group is kept as the value handed to the invoked function; the source
/// name and offsets are discarded for now (no caller currently needs
/// per-argument location info beyond what the whole invocation already
/// carries).
fn parse_macro_args(state: &mut LuaState) -> LuaResult<(usize, String, String, bool, usize)> {
    let token_idx = arg_usize(state, 0)?;
    let indent_val = state
        .get_arg(2)
        .ok_or_else(|| state.error("__metaenv.macro: missing indent argument".into()))?;
    let indent = state.to_string(&indent_val)?;
    let name_val = state
        .get_arg(3)
        .ok_or_else(|| state.error("__metaenv.macro: missing name argument".into()))?;
    let name = state.to_string(&name_val)?;
    let is_method = arg_bool(state, 4)?;
    let callee = state
        .get_arg(5)
        .ok_or_else(|| state.error("__metaenv.macro: missing callee argument".into()))?;

    let raw_args = state.get_args();
    let trailing = if raw_args.len() > 6 { &raw_args[6..] } else { &[] };
    let mut parts = Vec::with_capacity(trailing.len() / 4);
    for group in trailing.chunks(4) {
        if let [_source_name, _start, _end, text] = group {
            parts.push(*text);
        }
    }

    let mp = require_context(state)?;
    let invoker_idx = mp.register_invoker(name.clone(), callee, parts);

    Ok((token_idx, indent, name, is_method, invoker_idx))
}

/// `__metaenv.macro(...)` — a deferred, non-immediate macro invocation:
/// registers a Macro section, processed during Phase 3.
pub fn macro_call(state: &mut LuaState) -> LuaResult<usize> {
    let (token_idx, indent, name, is_method, invoker_idx) = parse_macro_args(state)?;
    let mp = require_context(state)?;
    mp.push_section(Section::Macro { token_idx, indent, name, is_method, invoker_idx });
    Ok(0)
}

/// `__metaenv.macro_immediate(...)` — registers a MacroImmediate section
/// (processed during Phase 3 like a Macro, but its output is captured and
/// merged into the Document section its call is wrapped in) and returns the
/// empty string as the wrapping `__metaenv.doc` call's literal text.
pub fn macro_immediate(state: &mut LuaState) -> LuaResult<usize> {
    let (token_idx, indent, name, is_method, invoker_idx) = parse_macro_args(state)?;
    let mp = require_context(state)?;
    mp.push_section(Section::MacroImmediate { token_idx, indent, name, is_method, invoker_idx });
    let empty = state.create_string("")?;
    state.push_value(empty)?;
    Ok(1)
}

/// `lpp.cancel()` — abort the currently-running macro invocation without
/// treating it as an error. Implemented as an ordinary Lua error carrying a
/// fixed marker message; [`crate::metaprogram::Metaprogram::invoke`]
/// recognizes the marker after its `pcall` fails and turns it back into a
/// clean cancellation instead of propagating a ScriptRuntimeError.
pub fn cancel(state: &mut LuaState) -> LuaResult<usize> {
    require_context(state)?;
    Err(state.error(CANCEL_MARKER.to_string()))
}

/// `lpp.processFile(path)` — recursively run the pipeline on another input
/// file and splice its output in as a string.
pub fn process_file(state: &mut LuaState) -> LuaResult<usize> {
    let path_val = state
        .get_arg(0)
        .ok_or_else(|| state.error("lpp.processFile: missing path argument".into()))?;
    let path = state.to_string(&path_val)?;
    let mp = require_context(state)?;
    let output = mp
        .process_file(&path)
        .map_err(|e| state.error(format!("lpp.processFile(\"{path}\"): {e}")))?;
    let result = state.create_string(&output)?;
    state.push_value(result)?;
    Ok(1)
}

/// `lpp.addDependency(path)` — record an extra file this run's output
/// depends on, for `-D`/dependency-file output.
pub fn add_dependency(state: &mut LuaState) -> LuaResult<usize> {
    let path_val = state
        .get_arg(0)
        .ok_or_else(|| state.error("lpp.addDependency: missing path argument".into()))?;
    let path = state.to_string(&path_val)?;
    let mp = require_context(state)?;
    mp.add_dependency(path);
    Ok(0)
}

/// `lpp.addDocumentSectionCallback(fn)` — register a filter run over every
/// Document/DocumentSpan section's text as Phase 3 splices it.
pub fn add_document_section_callback(state: &mut LuaState) -> LuaResult<usize> {
    let f = state
        .get_arg(0)
        .ok_or_else(|| state.error("lpp.addDocumentSectionCallback: missing function argument".into()))?;
    let mp = require_context(state)?;
    mp.register_doc_section_callback(f);
    Ok(0)
}

/// `lpp.addFinalCallback(fn)` — register a callback run once after Phase 3
/// finishes splicing the whole Metaprogram.
pub fn add_final_callback(state: &mut LuaState) -> LuaResult<usize> {
    let f = state
        .get_arg(0)
        .ok_or_else(|| state.error("lpp.addFinalCallback: missing function argument".into()))?;
    let mp = require_context(state)?;
    mp.register_final_callback(f);
    Ok(0)
}

/// `lpp.currentSourceName()` — the name of the input file the currently
/// executing macro/script belongs to.
pub fn current_source_name(state: &mut LuaState) -> LuaResult<usize> {
    let mp = require_context(state)?;
    let name = mp.current_source_name().to_string();
    let result = state.create_string(&name)?;
    state.push_value(result)?;
    Ok(1)
}
