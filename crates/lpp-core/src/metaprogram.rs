//! Orchestrates the three-phase pipeline for a single input: lex + parse
//! (Phase 1), run the generated script (Phase 2), and splice the resulting
//! Section timeline into an output buffer while recording Expansions
//! (Phase 3).

use std::ops::ControlFlow;

use luars::lua_vm::LuaValue;

use crate::diagnostics::{Diagnostic, LppError, ScriptLoadError, ScriptRuntimeError, StackFrame};
use crate::engine::Lpp;
use crate::expansion::Expansion;
use crate::lexer::Lexer;
use crate::parser::{self, LocMapping, Parser};
use crate::script::context;
use crate::script::vm::CANCEL_MARKER;
use crate::scope::Scope;
use crate::section::Section;
use crate::source::Source;
use crate::token::Token;

/// A macro invocation registered with the script VM at Phase-2 time, resolved
/// by index when Phase 3 reaches the `Macro`/`MacroImmediate` Section that
/// references it.
struct Invoker {
    name: String,
    callee: LuaValue,
    /// Plain Lua string values, one per macro argument (plus, for a method
    /// call, the receiver as the first entry — desugared by the Parser into
    /// the callee arg list).
    args: Vec<LuaValue>,
}

/// An `@@`/inline-value capture awaiting the Document/DocumentSpan Section
/// it should be spliced into.
struct Capture {
    token_idx: usize,
    start: usize,
    text: String,
}

pub struct Metaprogram {
    /// Back-pointer to the owning `Lpp`, used to reach the single script VM
    /// and to recurse into `Lpp::process_file_nested` for script-driven
    /// reentry. Stable because `Lpp` never moves once `init`ialized —
    /// callers hold it behind a single owned value for their process's
    /// lifetime.
    lpp: *mut Lpp,

    /// The previously-active Metaprogram when this one was created via a
    /// nested `lpp.processFile` call, `None` for a top-level run.
    #[allow(dead_code)]
    prev: Option<*mut Metaprogram>,

    pub input: Source,
    pub output: Source,
    meta: Source,

    tokens: Vec<Token>,
    locmap: Vec<LocMapping>,

    /// Scope arena; index 0 is always the root Scope. Only ever pushed to
    /// (child scopes) or popped from the end (LIFO), so indices handed out
    /// during a push stay valid until that same scope is popped.
    scopes: Vec<Scope>,

    invokers: Vec<Invoker>,
    captures: Vec<Capture>,

    pub expansions: Vec<Expansion>,

    doc_section_callbacks: Vec<LuaValue>,
    final_callbacks: Vec<LuaValue>,

    /// Set once this Metaprogram has finished running (successfully, via
    /// cancellation, or via error); script callbacks refuse to operate on a
    /// Metaprogram with this flag set.
    pub exited: bool,
}

impl Metaprogram {
    pub fn new(
        lpp: *mut Lpp,
        input: Source,
        output_name: String,
        prev: Option<*mut Metaprogram>,
    ) -> Self {
        let meta_name = format!("{}(meta)", input.name);
        Metaprogram {
            lpp,
            prev,
            input,
            output: Source::new(output_name),
            meta: Source::new(meta_name),
            tokens: Vec::new(),
            locmap: Vec::new(),
            scopes: vec![Scope::root()],
            invokers: Vec::new(),
            captures: Vec::new(),
            expansions: Vec::new(),
            doc_section_callbacks: Vec::new(),
            final_callbacks: Vec::new(),
            exited: false,
        }
    }

    fn lpp(&self) -> &mut Lpp {
        // SAFETY: `lpp` outlives every Metaprogram it creates; this
        // Metaprogram is never reachable after its owning Lpp is torn down.
        unsafe { &mut *self.lpp }
    }

    pub fn current_source_name(&self) -> &str {
        &self.input.name
    }

    /// Run all three phases to completion, writing the final buffer into
    /// `self.output`.
    #[tracing::instrument(level = "debug", skip_all, fields(source = %self.input.name))]
    pub fn run(&mut self) -> Result<(), LppError> {
        let result = (|| {
            self.phase1_parse()?;
            self.phase2_execute()?;
            self.phase3_splice()?;
            Ok(())
        })();
        self.exited = true;
        result
    }

    /// Like [`run`](Self::run) but returns the produced output as a string,
    /// for a nested `lpp.processFile` call.
    pub fn run_to_string(&mut self) -> Result<String, LppError> {
        self.run()?;
        Ok(String::from_utf8_lossy(self.output.as_bytes()).into_owned())
    }

    // ---- Phase 1: lex + parse --------------------------------------------

    fn phase1_parse(&mut self) -> Result<(), LppError> {
        self.input.cache_line_offsets();
        let mut lexer = Lexer::new(&self.input);
        if let Err(e) = lexer.run() {
            self.report(Diagnostic::from(&e));
            return Err(LppError::Lex(e));
        }
        self.tokens = lexer.tokens;

        let out = Parser::new(&self.input, &self.tokens).run();
        self.meta.write_cache(out.script.as_bytes());
        self.meta.cache_line_offsets();
        self.locmap = out.locmap;

        self.lpp().consumer_mut().consume_metafile(self, &out.script);
        Ok(())
    }

    // ---- Phase 2: run the generated script --------------------------------

    #[tracing::instrument(level = "trace", skip_all)]
    fn phase2_execute(&mut self) -> Result<(), LppError> {
        let script = String::from_utf8_lossy(self.meta.as_bytes()).into_owned();
        let chunk_name = self.meta.name.clone();
        let self_ptr = self as *mut Metaprogram;

        context::push(self_ptr);
        let result = self.lpp().vm.run_chunk(&script, &chunk_name);
        context::pop();

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = self.lpp().vm.vm.main_state().get_error_msg(e);
                let err = self.classify_script_error(message);
                match &err {
                    LppError::ScriptLoad(e) => self.report(Diagnostic::from(e)),
                    LppError::ScriptRuntime(e) => self.report(Diagnostic::from(e)),
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Turn a message raised while compiling/running the meta chunk into a
    /// `ScriptLoadError` or `ScriptRuntimeError`, translating its meta-file
    /// line back to the input file via `self.locmap`.
    fn classify_script_error(&self, message: String) -> LppError {
        // A compile-time syntax error in the generated chunk surfaces before
        // any `__metaenv` call runs; we can't distinguish it from a runtime
        // error by type alone (luars reports both as `LuaError::Runtime` in
        // this embedding), so first consult the locmap: any sample at all
        // means execution reached user script text worth attributing a line
        // to, otherwise treat it as a load failure at the chunk's start.
        if self.locmap.is_empty() {
            return LppError::ScriptLoad(ScriptLoadError {
                input_name: self.input.name.clone(),
                loc: self.input.get_loc(0),
                message,
            });
        }
        let loc = parser::translate(&self.locmap, 0, &self.input);
        LppError::ScriptRuntime(ScriptRuntimeError {
            message,
            stack: vec![StackFrame { source_name: self.input.name.clone(), loc, function_name: None }],
            invocation_chain: self.invocation_chain(self.scopes.len() - 1),
        })
    }

    fn invocation_chain(&self, mut scope_idx: usize) -> Vec<crate::diagnostics::Loc> {
        let mut chain = Vec::new();
        loop {
            let scope = &self.scopes[scope_idx];
            if let Some(tok_idx) = scope.owning_macro_token_idx {
                chain.push(self.input.get_loc(self.tokens[tok_idx].offset));
            }
            match scope.parent {
                Some(p) => scope_idx = p,
                None => break,
            }
        }
        chain
    }

    fn report(&mut self, diag: Diagnostic) {
        self.lpp().consumer_mut().consume_diag(&diag);
    }

    // ---- ABI entry points (called from script::abi callbacks) ------------

    /// Append a Section to the currently-topmost Scope; only the topmost
    /// scope ever receives new Sections.
    pub fn push_section(&mut self, section: Section) {
        self.scopes.last_mut().expect("scope stack is never empty").sections.push(section);
    }

    pub fn register_invoker(&mut self, name: String, callee: LuaValue, args: Vec<LuaValue>) -> usize {
        self.invokers.push(Invoker { name, callee, args });
        self.invokers.len() - 1
    }

    pub fn register_doc_section_callback(&mut self, f: LuaValue) {
        self.doc_section_callbacks.push(f);
    }

    pub fn register_final_callback(&mut self, f: LuaValue) {
        self.final_callbacks.push(f);
    }

    pub fn add_dependency(&mut self, path: String) {
        self.lpp().add_dependency(path);
    }

    pub fn process_file(&mut self, path: &str) -> Result<String, LppError> {
        let self_ptr = self as *mut Metaprogram;
        self.lpp().process_file_nested(path, self_ptr)
    }

    // ---- Phase 3: splice Sections into output -----------------------------

    #[tracing::instrument(level = "trace", skip_all)]
    fn phase3_splice(&mut self) -> Result<(), LppError> {
        match self.process_scope(0)? {
            ControlFlow::Continue(()) => {
                let root_buffer = std::mem::take(&mut self.scopes[0].buffer);
                self.output.write_cache(root_buffer.as_bytes());
                self.run_final_callbacks()?;
                self.lpp().consumer_mut().consume_expansions(self, &self.expansions.clone());
                Ok(())
            }
            // lpp.cancel: abort cleanly, success semantics propagated to the
            // caller.
            ControlFlow::Break(()) => {
                let root_buffer = std::mem::take(&mut self.scopes[0].buffer);
                self.output.write_cache(root_buffer.as_bytes());
                Ok(())
            }
        }
    }

    fn process_scope(&mut self, scope_idx: usize) -> Result<ControlFlow<()>, LppError> {
        let section_count = self.scopes[scope_idx].sections.len();
        for section_idx in 0..section_count {
            let section = self.scopes[scope_idx].sections[section_idx].clone();
            if self.process_section(scope_idx, &section)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn process_section(
        &mut self,
        scope_idx: usize,
        section: &Section,
    ) -> Result<ControlFlow<()>, LppError> {
        let expansion_start = self.scopes[scope_idx].global_offset + self.scopes[scope_idx].buffer.len();

        match section {
            Section::Document { token_idx, text } => {
                let (start, text) = self.resolve_captured_text(*token_idx, expansion_start, text.clone());
                let text = self.run_doc_section_callbacks(text)?;
                let end = self.append_to_scope(scope_idx, &text);
                self.consume_and_record(scope_idx, section, *token_idx, start, end);
                Ok(ControlFlow::Continue(()))
            }

            Section::DocumentSpan { token_idx, text } => {
                let (start, text) = self.resolve_captured_text(*token_idx, expansion_start, text.clone());
                // Callbacks still run over a DocumentSpan's text (dependency
                // tracking, validation, ...) but the original token bytes are
                // what gets appended — a DocumentSpan's content can't be
                // mutated, only observed.
                self.run_doc_section_callbacks(text.clone())?;
                let end = self.append_to_scope(scope_idx, &text);
                self.consume_and_record(scope_idx, section, *token_idx, start, end);
                Ok(ControlFlow::Continue(()))
            }

            Section::Macro { token_idx, indent, invoker_idx, .. } => {
                self.splice_macro(scope_idx, section, *token_idx, indent.clone(), *invoker_idx)
            }

            Section::MacroImmediate { token_idx, indent, invoker_idx, .. } => {
                let child_idx = self.push_child_scope(scope_idx, *token_idx, indent.clone(), expansion_start);
                let call = self.invoke(*invoker_idx)?;
                let ControlFlow::Continue(ret) = call else {
                    self.pop_scope(child_idx);
                    return Ok(ControlFlow::Break(()));
                };
                if self.process_scope(child_idx)?.is_break() {
                    self.pop_scope(child_idx);
                    return Ok(ControlFlow::Break(()));
                }
                let mut captured = std::mem::take(&mut self.scopes[child_idx].buffer);
                if let Some(ret) = ret {
                    captured.push_str(&ret);
                }
                self.pop_scope(child_idx);
                self.captures.push(Capture { token_idx: *token_idx, start: expansion_start, text: captured });
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    /// If the capture stack's top entry was left by a preceding
    /// `MacroImmediate` for this same token, its text replaces the
    /// Document's placeholder text and its recorded start offset overrides
    /// the natural `expansion_start`.
    fn resolve_captured_text(
        &mut self,
        token_idx: usize,
        natural_start: usize,
        text: String,
    ) -> (usize, String) {
        match self.captures.last() {
            Some(c) if c.token_idx == token_idx => {
                let c = self.captures.pop().unwrap();
                (c.start, c.text)
            }
            _ => (natural_start, text),
        }
    }

    fn append_to_scope(&mut self, scope_idx: usize, text: &str) -> usize {
        self.scopes[scope_idx].buffer.push_str(text);
        self.scopes[scope_idx].global_offset + self.scopes[scope_idx].buffer.len()
    }

    fn consume_and_record(
        &mut self,
        scope_idx: usize,
        section: &Section,
        token_idx: usize,
        start: usize,
        end: usize,
    ) {
        let from = self.tokens[token_idx].offset;
        let invoking_macros = self.invoking_macro_offsets(scope_idx);
        let indent = self.scopes[scope_idx].owning_indent.clone();
        self.expansions.push(Expansion { from, to: start, invoking_macros, indent });
        let section = section.clone();
        self.lpp().consumer_mut().consume_section(self, &section, start, end);
    }

    fn splice_macro(
        &mut self,
        scope_idx: usize,
        section: &Section,
        token_idx: usize,
        indent: String,
        invoker_idx: usize,
    ) -> Result<ControlFlow<()>, LppError> {
        let expansion_start =
            self.scopes[scope_idx].global_offset + self.scopes[scope_idx].buffer.len();
        let child_idx = self.push_child_scope(scope_idx, token_idx, indent, expansion_start);

        let call = self.invoke(invoker_idx)?;
        let ControlFlow::Continue(ret) = call else {
            self.pop_scope(child_idx);
            return Ok(ControlFlow::Break(()));
        };

        if self.process_scope(child_idx)?.is_break() {
            self.pop_scope(child_idx);
            return Ok(ControlFlow::Break(()));
        }

        let child_buffer = std::mem::take(&mut self.scopes[child_idx].buffer);
        self.pop_scope(child_idx);

        self.scopes[scope_idx].buffer.push_str(&child_buffer);
        if let Some(ret) = &ret {
            self.scopes[scope_idx].buffer.push_str(ret);
        }
        let end = self.scopes[scope_idx].global_offset + self.scopes[scope_idx].buffer.len();

        self.consume_and_record(scope_idx, section, token_idx, expansion_start, end);
        Ok(ControlFlow::Continue(()))
    }

    fn push_child_scope(
        &mut self,
        parent: usize,
        owning_token_idx: usize,
        owning_indent: String,
        global_offset: usize,
    ) -> usize {
        self.scopes.push(Scope::child(parent, owning_token_idx, owning_indent.into(), global_offset));
        self.scopes.len() - 1
    }

    fn pop_scope(&mut self, idx: usize) {
        assert_eq!(idx, self.scopes.len() - 1, "scopes must be popped in LIFO order");
        self.scopes.pop();
    }

    fn invoking_macro_offsets(&self, scope_idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cur = Some(scope_idx);
        while let Some(idx) = cur {
            let scope = &self.scopes[idx];
            if let Some(tok_idx) = scope.owning_macro_token_idx {
                chain.push(self.tokens[tok_idx].offset);
            }
            cur = scope.parent;
        }
        chain.reverse();
        chain
    }

    /// Call a registered invoker via the script VM's protected call.
    /// `Ok(ControlFlow::Break(()))` signals `lpp.cancel`;
    /// `Ok(ControlFlow::Continue(Some(s)))` is the invoker's stringified
    /// non-nil return value.
    fn invoke(&mut self, invoker_idx: usize) -> Result<ControlFlow<Option<String>>, LppError> {
        let name = self.invokers[invoker_idx].name.clone();
        let callee = self.invokers[invoker_idx].callee;
        let args = self.invokers[invoker_idx].args.clone();

        // `@name` with no parens parses to a macro invocation whose callee
        // may just be a plain value (e.g. a variable holding a number):
        // splice its stringified value directly rather than calling it.
        if !callee.is_callable() {
            let state = self.lpp().vm.vm.main_state();
            let text = match state.to_string(&callee) {
                Ok(t) => t,
                Err(e) => {
                    let message = state.get_error_msg(e);
                    return Err(LppError::ScriptRuntime(ScriptRuntimeError {
                        message: format!("macro '{name}' callee could not be stringified: {message}"),
                        stack: Vec::new(),
                        invocation_chain: self.invocation_chain(self.scopes.len() - 1),
                    }));
                }
            };
            return Ok(ControlFlow::Continue(Some(text)));
        }

        let self_ptr = self as *mut Metaprogram;
        context::push(self_ptr);
        let state = self.lpp().vm.vm.main_state();
        let call = state.pcall(callee, args);
        context::pop();

        let (ok, mut results) = match call {
            Ok(r) => r,
            Err(e) => {
                let message = self.lpp().vm.vm.main_state().get_error_msg(e);
                return Err(LppError::ScriptRuntime(ScriptRuntimeError {
                    message: format!("error invoking macro '{name}': {message}"),
                    stack: Vec::new(),
                    invocation_chain: self.invocation_chain(self.scopes.len() - 1),
                }));
            }
        };

        if !ok {
            let err_value = if results.is_empty() { None } else { Some(results.remove(0)) };
            let state = self.lpp().vm.vm.main_state();
            let message = match &err_value {
                Some(v) => state.to_string(v).unwrap_or_else(|_| "<non-string error>".into()),
                None => String::new(),
            };
            if message == CANCEL_MARKER {
                return Ok(ControlFlow::Break(()));
            }
            let diag_loc = self.input.get_loc(self.tokens.last().map(|t| t.offset).unwrap_or(0));
            let err = ScriptRuntimeError {
                message: format!("in macro '{name}': {message}"),
                stack: vec![StackFrame {
                    source_name: self.input.name.clone(),
                    loc: diag_loc,
                    function_name: Some(name),
                }],
                invocation_chain: self.invocation_chain(self.scopes.len() - 1),
            };
            self.report(Diagnostic::from(&err));
            return Err(LppError::ScriptRuntime(err));
        }

        if results.is_empty() || results[0].is_nil() {
            return Ok(ControlFlow::Continue(None));
        }
        let state = self.lpp().vm.vm.main_state();
        let text = match state.to_string(&results[0]) {
            Ok(t) => t,
            Err(e) => {
                let message = state.get_error_msg(e);
                return Err(LppError::ScriptRuntime(ScriptRuntimeError {
                    message: format!("macro '{name}' returned a value that could not be stringified: {message}"),
                    stack: Vec::new(),
                    invocation_chain: self.invocation_chain(self.scopes.len() - 1),
                }));
            }
        };
        Ok(ControlFlow::Continue(Some(text)))
    }

    fn run_doc_section_callbacks(&mut self, text: String) -> Result<String, LppError> {
        if self.doc_section_callbacks.is_empty() {
            return Ok(text);
        }
        let callbacks = self.doc_section_callbacks.clone();
        let mut current = text;
        for cb in callbacks {
            let state = self.lpp().vm.vm.main_state();
            let result = (|| -> Result<Option<String>, luars::lua_vm::LuaError> {
                let arg = state.create_string(&current)?;
                let (ok, mut results) = state.pcall(cb, vec![arg])?;
                if !ok {
                    return Ok(None);
                }
                match results.first() {
                    Some(v) if !v.is_nil() => {
                        let text = state.to_string(v)?;
                        results.clear();
                        Ok(Some(text))
                    }
                    _ => Ok(None),
                }
            })();
            match result {
                Ok(Some(text)) => current = text,
                Ok(None) => {}
                Err(e) => {
                    let message = state.get_error_msg(e);
                    return Err(LppError::ScriptRuntime(ScriptRuntimeError {
                        message: format!("document section callback failed: {message}"),
                        stack: Vec::new(),
                        invocation_chain: self.invocation_chain(self.scopes.len() - 1),
                    }));
                }
            }
        }
        Ok(current)
    }

    fn run_final_callbacks(&mut self) -> Result<(), LppError> {
        let callbacks = self.final_callbacks.clone();
        for cb in callbacks {
            let state = self.lpp().vm.vm.main_state();
            if let Err(e) = state.pcall(cb, Vec::new()) {
                let message = state.get_error_msg(e);
                return Err(LppError::ScriptRuntime(ScriptRuntimeError {
                    message: format!("final callback failed: {message}"),
                    stack: Vec::new(),
                    invocation_chain: Vec::new(),
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Config, Lpp};

    fn run_source(input: &str) -> String {
        let mut lpp = Lpp::init(Config::new("t")).expect("vm init");
        let mut out = Vec::new();
        lpp.process_stream("t", &mut input.as_bytes(), &mut out).expect("process_stream");
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn pure_document_round_trips() {
        assert_eq!(run_source("hello world\n"), "hello world\n");
    }

    #[test]
    fn lua_line_assigns_and_bare_macro_reads_it() {
        assert_eq!(run_source("$ x = 1\n@x"), "1");
    }
}
