//! Scans a [`Source`]'s bytes into a token stream recognizing document text,
//! script lines/inlines/blocks, and macro invocations.

use crate::diagnostics::LexError;
use crate::source::Source;
use crate::token::{Span, Token, TokenKind};

/// The lexer's two states. `PostMacroMode` is entered on `@`
/// and always returns to `DocumentMode` once a macro invocation's optional
/// argument list has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Document,
    PostMacro,
}

/// Decode the UTF-8 character at the start of `bytes`, trying successively
/// longer prefixes until one validates. Returns `None` on malformed input.
fn decode_char(bytes: &[u8]) -> Option<(char, usize)> {
    if bytes.is_empty() {
        return None;
    }
    let max = bytes.len().min(4);
    for len in 1..=max {
        if let Ok(s) = std::str::from_utf8(&bytes[..len]) {
            if let Some(c) = s.chars().next() {
                return Some((c, len));
            }
        }
    }
    None
}

fn is_first_identifier_char(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    is_first_identifier_char(c) || c.is_ascii_digit()
}

pub struct Lexer<'s> {
    source: &'s Source,
    bytes: &'s [u8],
    source_name: String,
    offset: usize,
    cur: Option<(char, usize)>,
    pub tokens: Vec<Token>,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s Source) -> Self {
        let bytes = source.as_bytes();
        let cur = decode_char(bytes);
        Lexer { source, bytes, source_name: source.name.clone(), offset: 0, cur, tokens: Vec::new() }
    }

    fn current(&self) -> Option<char> {
        self.cur.map(|(c, _)| c)
    }

    fn at(&self, c: char) -> bool {
        self.current() == Some(c)
    }

    fn eof(&self) -> bool {
        self.cur.is_none()
    }

    fn peek(&self) -> Option<char> {
        let (_, adv) = self.cur?;
        decode_char(&self.bytes[self.offset + adv..]).map(|(c, _)| c)
    }

    fn advance(&mut self) -> Result<(), LexError> {
        let adv = self.cur.map(|(_, a)| a).unwrap_or(0);
        self.offset += adv;
        if self.offset >= self.bytes.len() {
            self.cur = None;
            return Ok(());
        }
        match decode_char(&self.bytes[self.offset..]) {
            Some(pair) => {
                self.cur = Some(pair);
                Ok(())
            }
            None => Err(self.error_here(LexErrorKind::InvalidCodepoint)),
        }
    }

    fn at_whitespace(&self) -> bool {
        self.current().is_some_and(|c| c.is_whitespace())
    }

    fn skip_whitespace(&mut self) -> Result<(), LexError> {
        while self.at_whitespace() && !self.eof() {
            self.advance()?;
        }
        Ok(())
    }

    fn loc(&self, offset: usize) -> crate::diagnostics::Loc {
        self.source.get_loc(offset)
    }

    fn error_here(&self, kind: LexErrorKind) -> LexError {
        self.error_at(self.offset, kind)
    }

    fn error_at(&self, offset: usize, kind: LexErrorKind) -> LexError {
        let loc = self.loc(offset);
        let source_name = self.source_name.clone();
        match kind {
            LexErrorKind::InvalidCodepoint => LexError::InvalidCodepoint { source_name, loc },
            LexErrorKind::UnterminatedLuaBlock => {
                LexError::UnterminatedLuaBlock { source_name, loc }
            }
            LexErrorKind::UnterminatedLuaInline => {
                LexError::UnterminatedLuaInline { source_name, loc }
            }
            LexErrorKind::DollarHasNoMeaning => {
                LexError::DollarHasNoMeaning { source_name, loc }
            }
            LexErrorKind::UnterminatedMacroTupleArg => {
                LexError::UnterminatedMacroTupleArg { source_name, loc }
            }
            LexErrorKind::UnterminatedMacroStringArg => {
                LexError::UnterminatedMacroStringArg { source_name, loc }
            }
            LexErrorKind::ExpectedMacroIdentifier => {
                LexError::ExpectedMacroIdentifier { source_name, loc }
            }
            LexErrorKind::TrailingAccessAfterMethod => {
                LexError::TrailingAccessAfterMethod { source_name, loc }
            }
            LexErrorKind::HeredocArgUnimplemented => {
                LexError::HeredocArgUnimplemented { source_name, loc }
            }
        }
    }

    /// Scan the whole input to completion, producing `self.tokens` ending in
    /// an `Eof` token.
    #[tracing::instrument(level = "trace", skip_all, fields(source = %self.source_name))]
    pub fn run(&mut self) -> Result<(), LexError> {
        let mut mode = Mode::Document;
        loop {
            if self.eof() {
                self.push(Token::new(TokenKind::Eof, self.offset, 0));
                return Ok(());
            }
            match mode {
                Mode::Document => match self.current().unwrap() {
                    '@' => self.lex_macro(&mut mode)?,
                    '$' => self.lex_dollar()?,
                    _ => self.lex_document()?,
                },
                Mode::PostMacro => {
                    // lex_macro drives PostMacro fully to completion itself
                    // and always leaves us back in Document mode.
                    mode = Mode::Document;
                }
            }
        }
    }

    fn push(&mut self, t: Token) {
        self.tokens.push(t);
    }

    /// Find the whitespace span immediately preceding `at` on the same line,
    /// by scanning backward from `at` in the already-consumed portion of the
    /// buffer until a newline or the start of the buffer.
    fn macro_indentation(&self, at: usize) -> Span {
        let mut start = at;
        while start > 0 {
            let b = self.bytes[start - 1];
            if b == b'\n' {
                break;
            }
            if b == b' ' || b == b'\t' {
                start -= 1;
            } else {
                // Non-whitespace precedes the '@' on this line: no
                // indentation to preserve.
                return Span { offset: at, len: 0 };
            }
        }
        Span { offset: start, len: at - start }
    }

    fn lex_document(&mut self) -> Result<(), LexError> {
        let mut start = self.offset;
        let mut last_non_ws = self.offset;

        loop {
            if self.eof() {
                break;
            }
            if self.at('\\') && matches!(self.peek(), Some('$') | Some('@')) {
                // Flush what's been scanned so far (excluding the
                // backslash) as plain document text, consume the backslash,
                // then consume the escaped '@'/'$' unconditionally as
                // literal text of a fresh span. It must not be re-checked
                // against the '@'/'$' loop guard below, or an escape of the
                // same character it's escaping would immediately re-trigger
                // a directive instead of becoming literal.
                if self.offset > start {
                    self.push(Token::new(TokenKind::Document, start, self.offset - start));
                }
                self.advance()?; // consume the backslash
                start = self.offset;
                last_non_ws = self.offset;
                self.advance()?; // consume the escaped '@'/'$' as literal text
                continue;
            }
            if self.at('@') || self.at('$') {
                break;
            }
            if !self.at_whitespace() {
                last_non_ws = self.offset;
            }
            self.advance()?;
        }

        self.finish_document(start, last_non_ws)
    }

    /// Emit the trailing `Document` (and, if the tail of the span is
    /// whitespace, a separate `Whitespace` token) for the span `[start,
    /// self.offset)`.
    fn finish_document(&mut self, start: usize, last_non_ws: usize) -> Result<(), LexError> {
        if self.offset == start {
            return Ok(());
        }
        if !self.eof() && last_non_ws + 1 < self.offset {
            let ws_start = last_non_ws + 1;
            if ws_start > start {
                self.push(Token::new(TokenKind::Document, start, ws_start - start));
            }
            self.push(Token::new(TokenKind::Whitespace, ws_start, self.offset - ws_start));
        } else {
            self.push(Token::new(TokenKind::Document, start, self.offset - start));
        }
        Ok(())
    }

    fn lex_dollar(&mut self) -> Result<(), LexError> {
        let start = self.offset;
        self.advance()?; // past first '$'
        if self.at('$') {
            self.advance()?; // past second '$'
            if self.at('$') {
                return self.lex_lua_block(start);
            }
            // "$$" followed by anything other than a third '$' (starting a
            // LuaBlock) is not an inline expression at all — nothing is
            // being scanned that could be "unterminated".
            return Err(self.error_at(start, LexErrorKind::DollarHasNoMeaning));
        }
        if self.at('(') {
            return self.lex_lua_inline(start);
        }
        if self.at('<') {
            return Err(self.error_at(start, LexErrorKind::HeredocArgUnimplemented));
        }
        self.lex_lua_line(start)
    }

    fn lex_lua_block(&mut self, start: usize) -> Result<(), LexError> {
        self.advance()?; // past third '$'
        let body_start = self.offset;
        loop {
            if self.eof() {
                return Err(self.error_at(start, LexErrorKind::UnterminatedLuaBlock));
            }
            if self.at('$') {
                let save = self.offset;
                self.advance()?;
                if self.at('$') {
                    self.advance()?;
                    if self.at('$') {
                        let body_end = save;
                        self.advance()?; // past final '$'
                        self.push(Token::new(
                            TokenKind::LuaBlock,
                            body_start,
                            body_end - body_start,
                        ));
                        return Ok(());
                    }
                }
                // not a terminator; keep scanning from where we left off
                continue;
            }
            self.advance()?;
        }
    }

    fn lex_lua_inline(&mut self, start: usize) -> Result<(), LexError> {
        self.advance()?; // past '('
        let body_start = self.offset;
        let mut nesting: i64 = 1;
        loop {
            if self.eof() {
                return Err(self.error_at(start, LexErrorKind::UnterminatedLuaInline));
            }
            match self.current().unwrap() {
                '(' => nesting += 1,
                ')' => {
                    nesting -= 1;
                    if nesting == 0 {
                        let body_end = self.offset;
                        self.push(Token::new(
                            TokenKind::LuaInline,
                            body_start,
                            body_end - body_start,
                        ));
                        self.advance()?; // past ')'
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.advance()?;
        }
    }

    fn lex_lua_line(&mut self, start: usize) -> Result<(), LexError> {
        let body_start = start + 1; // skip the leading '$'
        while !self.at('\n') && !self.eof() {
            self.advance()?;
        }
        let body_end = self.offset;
        self.push(Token::new(TokenKind::LuaLine, body_start, body_end - body_start));
        if !self.eof() {
            self.advance()?; // consume and drop the newline
        }
        Ok(())
    }

    fn lex_macro(&mut self, mode: &mut Mode) -> Result<(), LexError> {
        let start = self.offset;
        let indent = self.macro_indentation(start);
        self.advance()?; // past first '@'
        let kind = if self.at('@') {
            self.advance()?; // past second '@'
            TokenKind::MacroSymbolImmediate
        } else {
            TokenKind::MacroSymbol
        };
        let mut sym = Token::new(kind, start, self.offset - start);
        sym.macro_indent = indent;
        self.push(sym);

        self.skip_whitespace()?;
        self.lex_macro_name()?;
        self.skip_whitespace()?;

        if self.at('(') {
            self.lex_macro_tuple_args()?;
        } else if self.at('"') {
            self.lex_macro_string_arg()?;
        }
        *mode = Mode::PostMacro;
        Ok(())
    }

    fn lex_macro_name(&mut self) -> Result<(), LexError> {
        let start = self.offset;
        if !self.current().is_some_and(is_first_identifier_char) {
            return Err(self.error_here(LexErrorKind::ExpectedMacroIdentifier));
        }

        let mut found_colon = false;
        let mut colon_offset = 0;
        while self.current().is_some_and(is_identifier_char) || self.at('.') || self.at(':') {
            if self.at(':') {
                // A colon is method syntax only if an identifier-start
                // character follows; otherwise it belongs to the document
                // (e.g. a `case:` label right after a macro call).
                if self.peek().is_some_and(is_first_identifier_char) {
                    found_colon = true;
                    colon_offset = self.offset - start;
                }
                break;
            }
            self.advance()?;
        }

        if found_colon {
            self.advance()?; // past ':'
            while self.current().is_some_and(is_identifier_char) {
                self.advance()?;
            }
            if self.at('.') || self.at(':') {
                return Err(self.error_here(LexErrorKind::TrailingAccessAfterMethod));
            }
        }

        let kind = if found_colon { TokenKind::MacroMethod } else { TokenKind::MacroIdentifier };
        let mut tok = Token::new(kind, start, self.offset - start);
        tok.method_colon_offset = colon_offset;
        self.push(tok);
        Ok(())
    }

    fn lex_macro_tuple_args(&mut self) -> Result<(), LexError> {
        let open_at = self.offset;
        self.advance()?; // past '('
        self.skip_whitespace()?;
        if self.at(')') {
            self.advance()?;
            return Ok(());
        }

        let mut brace_nesting: u32 = 0;
        let mut paren_nesting: u32 = 1;
        let mut start = self.offset;

        loop {
            while !matches!(self.current(), Some(',' | ')' | '{' | '}' | '('))
                && !self.eof()
            {
                self.advance()?;
            }
            if self.eof() {
                return Err(self.error_at(open_at, LexErrorKind::UnterminatedMacroTupleArg));
            }

            let mut done = false;
            let mut reset_start = false;
            match self.current().unwrap() {
                ',' => {
                    if brace_nesting == 0 && paren_nesting == 1 {
                        self.push(Token::new(TokenKind::MacroTupleArg, start, self.offset - start));
                        reset_start = true;
                    }
                }
                '(' => paren_nesting += 1,
                ')' => {
                    if paren_nesting == 1 {
                        done = true;
                    } else {
                        paren_nesting -= 1;
                    }
                }
                '{' => brace_nesting += 1,
                '}' => {
                    if brace_nesting > 0 {
                        brace_nesting -= 1;
                    }
                }
                _ => unreachable!(),
            }

            if done {
                self.push(Token::new(TokenKind::MacroTupleArg, start, self.offset - start));
                self.advance()?; // past ')'
                break;
            }

            self.advance()?;
            self.skip_whitespace()?;
            if reset_start {
                start = self.offset;
            }
        }
        Ok(())
    }

    fn lex_macro_string_arg(&mut self) -> Result<(), LexError> {
        let open_at = self.offset;
        self.advance()?; // past opening '"'
        let start = self.offset;
        loop {
            if self.eof() {
                return Err(self.error_at(open_at, LexErrorKind::UnterminatedMacroStringArg));
            }
            if self.at('"') {
                break;
            }
            self.advance()?;
        }
        self.push(Token::new(TokenKind::MacroStringArg, start, self.offset - start));
        self.advance()?; // past closing '"'
        Ok(())
    }
}

enum LexErrorKind {
    InvalidCodepoint,
    UnterminatedLuaBlock,
    UnterminatedLuaInline,
    DollarHasNoMeaning,
    UnterminatedMacroTupleArg,
    UnterminatedMacroStringArg,
    ExpectedMacroIdentifier,
    TrailingAccessAfterMethod,
    HeredocArgUnimplemented,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> (Source, Vec<Token>) {
        let mut src = Source::with_content("t", input.as_bytes().to_vec());
        src.cache_line_offsets();
        let tokens = {
            let mut lexer = Lexer::new(&src);
            lexer.run().unwrap();
            lexer.tokens
        };
        (src, tokens)
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn pure_document_is_a_single_token_plus_eof() {
        let (_src, toks) = lex("hello world\n");
        assert_eq!(kinds(&toks), vec![TokenKind::Document, TokenKind::Eof]);
    }

    #[test]
    fn lua_line_consumes_to_end_of_line_and_drops_newline() {
        let (src, toks) = lex("$ x = 1\n@x");
        assert_eq!(toks[0].kind, TokenKind::LuaLine);
        assert_eq!(src.get_str(toks[0].offset, toks[0].len), " x = 1");
    }

    #[test]
    fn lua_inline_tracks_paren_nesting() {
        let (src, toks) = lex("$(f(1,2))");
        assert_eq!(toks[0].kind, TokenKind::LuaInline);
        assert_eq!(src.get_str(toks[0].offset, toks[0].len), "f(1,2)");
    }

    #[test]
    fn lua_block_is_not_nestable() {
        let (src, toks) = lex("$$$\n return 1 \n$$$@(5)");
        assert_eq!(toks[0].kind, TokenKind::LuaBlock);
        assert_eq!(src.get_str(toks[0].offset, toks[0].len), "\n return 1 \n");
    }

    #[test]
    fn unterminated_lua_block_is_fatal() {
        let mut src = Source::with_content("t", b"$$$ no terminator".to_vec());
        src.cache_line_offsets();
        let mut lexer = Lexer::new(&src);
        assert!(lexer.run().is_err());
    }

    #[test]
    fn dollar_dollar_not_followed_by_a_third_dollar_is_a_dedicated_error() {
        let mut src = Source::with_content("t", b"$$ nope".to_vec());
        src.cache_line_offsets();
        let mut lexer = Lexer::new(&src);
        let err = lexer.run().unwrap_err();
        assert!(matches!(err, LexError::DollarHasNoMeaning { .. }));
    }

    #[test]
    fn macro_with_tuple_args() {
        let (src, toks) = lex("@greet(world)");
        assert_eq!(kinds(&toks), vec![
            TokenKind::MacroSymbol,
            TokenKind::MacroIdentifier,
            TokenKind::MacroTupleArg,
            TokenKind::Eof,
        ]);
        assert_eq!(src.get_str(toks[2].offset, toks[2].len), "world");
    }

    #[test]
    fn macro_tuple_args_respect_brace_nesting() {
        let (src, toks) = lex("@f({a, b}, c)");
        let args: Vec<_> =
            toks.iter().filter(|t| t.kind == TokenKind::MacroTupleArg).collect();
        assert_eq!(args.len(), 2);
        assert_eq!(src.get_str(args[0].offset, args[0].len), "{a, b}");
        assert_eq!(src.get_str(args[1].offset, args[1].len), " c");
    }

    #[test]
    fn immediate_macro_symbol() {
        let (_src, toks) = lex("@@bold(\"x\")");
        assert_eq!(toks[0].kind, TokenKind::MacroSymbolImmediate);
    }

    #[test]
    fn method_colon_requires_identifier_start_after_it() {
        let (_src, toks) = lex("@obj:method()");
        assert_eq!(toks[1].kind, TokenKind::MacroMethod);

        // A colon not followed by an identifier char is document syntax,
        // e.g. a `case:` label right after a bare macro invocation.
        let (_src2, toks2) = lex("@case: foo");
        assert_eq!(toks2[1].kind, TokenKind::MacroIdentifier);
    }

    #[test]
    fn escape_splits_document_and_consumes_backslash() {
        let (src, toks) = lex(r"price: \$$(2+2)");
        // "price: " Document, then the backslash is consumed, the '$'
        // becomes literal document text, then a LuaInline for "2+2".
        let docs: Vec<_> = toks.iter().filter(|t| t.kind == TokenKind::Document).collect();
        assert_eq!(src.get_str(docs[0].offset, docs[0].len), "price: ");
        assert_eq!(src.get_str(docs[1].offset, docs[1].len), "$");
        let inline = toks.iter().find(|t| t.kind == TokenKind::LuaInline).unwrap();
        assert_eq!(src.get_str(inline.offset, inline.len), "2+2");
    }

    #[test]
    fn lexer_round_trip_covers_full_input_modulo_escapes() {
        // No macro-argument list and nothing after the bare macro name: any
        // whitespace between the macro name and further text is consumed by
        // `skip_whitespace` without a token of its own (same reason
        // parens/commas around a `MacroTupleArg` list are excluded), so this
        // input ends right at the macro name to keep the invariant checking
        // only spans that really do have a token.
        let input = "hello \\@world $ x=1\n@m";
        let (src, toks) = lex(input);
        let mut reconstructed = String::new();
        for t in &toks {
            if t.kind == TokenKind::Eof {
                continue;
            }
            match t.kind {
                TokenKind::LuaLine => {
                    reconstructed.push('$');
                    reconstructed.push_str(src.get_str(t.offset, t.len));
                    reconstructed.push('\n');
                }
                _ => reconstructed.push_str(src.get_str(t.offset, t.len)),
            }
        }
        // every byte of input is accounted for except the dropped newline
        // after the $-line and the backslash of the one escape sequence.
        assert_eq!(reconstructed.len() + 1 /* \ */, input.len());
    }

    #[test]
    fn whitespace_before_eof_is_split_from_document() {
        let (_src, toks) = lex("abc   ");
        assert_eq!(kinds(&toks), vec![TokenKind::Document, TokenKind::Eof]);
    }

    #[test]
    fn macro_indentation_is_captured() {
        let (src, toks) = lex("  @m()");
        let sym = &toks[0];
        assert_eq!(sym.kind, TokenKind::MacroSymbol);
        assert_eq!(src.get_str(sym.macro_indent.offset, sym.macro_indent.len), "  ");
    }
}
