//! Turns a token stream into the meta script text that, once loaded and run
//! by the embedded script VM, calls back into the engine's ABI functions to
//! build a Metaprogram's root [`Scope`](crate::scope::Scope).

use crate::diagnostics::Loc;
use crate::source::Source;
use crate::token::{Token, TokenKind};

/// One entry mapping a byte offset in the *generated meta script* back to
/// the byte offset in the *input file* it was emitted from. Built ascending
/// by script offset; used to translate script-VM error lines back to input
/// locations.
#[derive(Debug, Clone, Copy)]
pub struct LocMapping {
    pub meta_offset: usize,
    pub input_offset: usize,
}

pub struct ParseOutput {
    pub script: String,
    pub locmap: Vec<LocMapping>,
}

/// Emits the meta script for one input Source's token stream.
pub struct Parser<'s> {
    source: &'s Source,
    tokens: &'s [Token],
    script: String,
    locmap: Vec<LocMapping>,
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s Source, tokens: &'s [Token]) -> Self {
        Parser { source, tokens, script: String::new(), locmap: Vec::new() }
    }

    /// Borrowed independently of `self` (tied to the Source's own lifetime),
    /// so callers can hold the slice across a later `&mut self` call.
    fn raw(&self, t: &Token) -> &'s str {
        self.source.get_str(t.offset, t.len)
    }

    fn mark(&mut self, input_offset: usize) {
        self.locmap.push(LocMapping { meta_offset: self.script.len(), input_offset });
    }

    fn write_sanitized(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '"' => self.script.push_str("\\\""),
                '\\' => self.script.push_str("\\\\"),
                '\n' => self.script.push_str("\\n"),
                '\r' => self.script.push_str("\\r"),
                '\t' => self.script.push_str("\\t"),
                c if c.is_control() => {
                    self.script.push_str(&format!("\\{}", c as u32));
                }
                c => self.script.push(c),
            }
        }
    }

    /// Emit the `(is_method, callee_expr)` pair for a macro name token,
    /// splitting `obj:method` at its recorded colon offset.
    fn write_macro_callee(&mut self, name_tok: &Token) {
        let raw = self.raw(name_tok);
        if name_tok.kind == TokenKind::MacroMethod {
            let (obj, rest) = raw.split_at(name_tok.method_colon_offset);
            let fun = &rest[1..];
            self.script.push_str("true,");
            self.script.push_str(obj);
            self.script.push('.');
            self.script.push_str(fun);
            self.script.push(',');
            self.script.push_str(obj);
        } else {
            self.script.push_str("false,");
            self.script.push_str(raw);
        }
    }

    /// Emit one macro argument as four trailing scalar literals: source
    /// name, start offset, end offset, raw text. `abi::parse_macro_args`
    /// regroups these in fours; only the text is actually handed to the
    /// invoked macro function (as a plain Lua string, so `..` works on it
    /// directly), the offsets exist for future location-aware diagnostics.
    fn write_macro_part(&mut self, tok: &Token) {
        self.mark(tok.offset);
        self.script.push_str(",\"");
        self.write_sanitized(&self.source.name.clone());
        self.script.push_str("\",");
        self.script.push_str(&tok.offset.to_string());
        self.script.push(',');
        self.script.push_str(&tok.end().to_string());
        self.script.push_str(",\"");
        let raw = self.raw(tok).to_string();
        self.write_sanitized(&raw);
        self.script.push('"');
    }

    #[tracing::instrument(level = "trace", skip_all, fields(source = %self.source.name))]
    pub fn run(mut self) -> ParseOutput {
        let mut i = 0usize;
        while i < self.tokens.len() {
            let tok = self.tokens[i];
            match tok.kind {
                TokenKind::Eof => break,

                TokenKind::Document | TokenKind::Whitespace => {
                    self.mark(tok.offset);
                    self.script.push_str("__metaenv.doc(");
                    self.script.push_str(&i.to_string());
                    self.script.push(',');
                    self.script.push_str(&tok.offset.to_string());
                    self.script.push_str(",\"");
                    let raw = self.raw(&tok).to_string();
                    self.write_sanitized(&raw);
                    self.script.push_str("\")\n");
                    i += 1;
                }

                TokenKind::LuaBlock | TokenKind::LuaLine => {
                    self.mark(tok.offset);
                    let raw = self.raw(&tok).to_string();
                    // Preserve line numbers inside a multi-line lua block by
                    // adding one locmap sample per embedded newline.
                    let base = tok.offset;
                    for (idx, line) in raw.split('\n').enumerate() {
                        if idx > 0 {
                            let consumed: usize =
                                raw.split('\n').take(idx).map(|l| l.len() + 1).sum();
                            self.mark(base + consumed);
                        }
                        let _ = line;
                    }
                    self.script.push_str(&raw);
                    self.script.push('\n');
                    i += 1;
                }

                TokenKind::LuaInline => {
                    self.mark(tok.offset);
                    self.script.push_str("__metaenv.val(");
                    self.script.push_str(&i.to_string());
                    self.script.push(',');
                    self.script.push_str(&tok.offset.to_string());
                    self.script.push(',');
                    self.script.push_str(self.raw(&tok));
                    self.script.push_str(")\n");
                    i += 1;
                }

                TokenKind::MacroSymbol | TokenKind::MacroSymbolImmediate => {
                    i = self.emit_macro(i);
                }

                TokenKind::MacroIdentifier
                | TokenKind::MacroMethod
                | TokenKind::MacroTupleArg
                | TokenKind::MacroStringArg
                | TokenKind::MacroHereDocArg => {
                    // Consumed as part of emit_macro; reaching one here
                    // directly would be a lexer/parser desync.
                    i += 1;
                }
            }
        }
        ParseOutput { script: self.script, locmap: self.locmap }
    }

    /// Emit one full macro invocation (`@name(...)` / `@@name(...)`),
    /// consuming the symbol token plus its name and argument tokens.
    /// Returns the index of the next unconsumed token.
    fn emit_macro(&mut self, symbol_idx: usize) -> usize {
        let symbol = self.tokens[symbol_idx];
        let is_immediate = symbol.kind == TokenKind::MacroSymbolImmediate;

        self.mark(symbol.offset);
        if is_immediate {
            self.script.push_str("__metaenv.doc(");
            self.script.push_str(&symbol_idx.to_string());
            self.script.push(',');
            self.script.push_str(&symbol.offset.to_string());
            self.script.push_str(",__metaenv.macro_immediate(");
        } else {
            self.script.push_str("__metaenv.macro(");
        }
        self.script.push_str(&symbol_idx.to_string());
        self.script.push(',');
        self.script.push_str(&symbol.offset.to_string());
        self.script.push_str(",\"");
        let indent = self.source.get_str(symbol.macro_indent.offset, symbol.macro_indent.len);
        let indent = indent.to_string();
        self.write_sanitized(&indent);
        self.script.push_str("\",");

        let mut i = symbol_idx + 1;
        while self.tokens[i].kind == TokenKind::Whitespace {
            i += 1;
        }
        let name_tok = self.tokens[i];
        self.mark(name_tok.offset);
        self.script.push_str("\"");
        let raw = self.raw(&name_tok).to_string();
        self.write_sanitized(&raw);
        self.script.push_str("\",");
        self.write_macro_callee(&name_tok);
        i += 1;

        while i < self.tokens.len() && self.tokens[i].kind == TokenKind::Whitespace {
            i += 1;
        }

        match self.tokens.get(i).map(|t| t.kind) {
            Some(TokenKind::MacroTupleArg) => {
                loop {
                    let arg = self.tokens[i];
                    self.write_macro_part(&arg);
                    i += 1;
                    if self.tokens.get(i).map(|t| t.kind) != Some(TokenKind::MacroTupleArg) {
                        break;
                    }
                }
            }
            Some(TokenKind::MacroStringArg) => {
                let arg = self.tokens[i];
                self.write_macro_part(&arg);
                i += 1;
            }
            _ => {}
        }

        if is_immediate {
            self.script.push(')');
        }
        self.script.push_str(")\n");
        i
    }
}

/// Translate a byte offset in the generated meta script back to an input
/// file location, using the last locmap entry at or before `meta_offset`.
pub fn translate(locmap: &[LocMapping], meta_offset: usize, source: &Source) -> Loc {
    let input_offset = match locmap.binary_search_by_key(&meta_offset, |m| m.meta_offset) {
        Ok(i) => locmap[i].input_offset,
        Err(0) => 0,
        Err(i) => locmap[i - 1].input_offset,
    };
    source.get_loc(input_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(input: &str) -> (Source, ParseOutput) {
        let mut src = Source::with_content("t", input.as_bytes().to_vec());
        src.cache_line_offsets();
        let tokens = {
            let mut lexer = Lexer::new(&src);
            lexer.run().unwrap();
            lexer.tokens
        };
        let out = Parser::new(&src, &tokens).run();
        (src, out)
    }

    #[test]
    fn document_emits_doc_call() {
        let (_src, out) = parse("hello");
        assert!(out.script.contains("__metaenv.doc(0,0,\"hello\")"));
    }

    #[test]
    fn lua_inline_emits_val_call() {
        let (_src, out) = parse("$(1+1)");
        assert!(out.script.contains("__metaenv.val(0,0,1+1)"));
    }

    #[test]
    fn bare_macro_emits_macro_call_with_false_is_method() {
        let (_src, out) = parse("@name()");
        assert!(out.script.contains("__metaenv.macro(0,0,\"\",\"name\",false,name)"));
    }

    #[test]
    fn method_macro_splits_callee_at_colon() {
        let (_src, out) = parse("@obj:fn()");
        assert!(out.script.contains("true,obj.fn,obj"));
    }

    #[test]
    fn immediate_macro_wraps_in_doc() {
        let (_src, out) = parse("@@bold(\"x\")");
        assert!(out.script.contains("__metaenv.doc(0,0,__metaenv.macro_immediate("));
        assert!(out.script.trim_end().ends_with("))"));
    }

    #[test]
    fn tuple_args_emit_source_offset_text_literals() {
        let (_src, out) = parse("@f(a, b)");
        assert_eq!(out.script.matches("\"t\",").count(), 2);
        assert!(out.script.contains("\"a\""));
        assert!(out.script.contains("\"b\""));
    }

    #[test]
    fn sanitizes_quotes_and_backslashes_in_document_text() {
        let (_src, out) = parse("he said \"hi\" \\ done");
        assert!(out.script.contains("\\\"hi\\\""));
        assert!(out.script.contains("\\\\"));
    }

    #[test]
    fn locmap_is_sorted_ascending_by_meta_offset() {
        let (_src, out) = parse("a\n@m()\nb$(1)");
        for w in out.locmap.windows(2) {
            assert!(w[0].meta_offset <= w[1].meta_offset);
        }
    }
}
