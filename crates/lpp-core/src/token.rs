//! Token types produced by the [`Lexer`](crate::lexer::Lexer).

/// A span of whitespace preceding something on the same line (used to record
/// a macro's indentation, or a `Whitespace` token split off a `Document`
/// token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub const EMPTY: Span = Span { offset: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Document,
    LuaLine,
    LuaInline,
    LuaBlock,
    MacroSymbol,
    MacroSymbolImmediate,
    MacroIdentifier,
    MacroMethod,
    MacroTupleArg,
    MacroStringArg,
    /// Reserved: the heredoc argument form (`<-TERM ... TERM`) is recognized
    /// by kind but not implemented. Any attempt to
    /// lex one is a `LexError::HeredocArgUnimplemented`.
    MacroHereDocArg,
    Whitespace,
    Eof,
}

/// A single lexed token. Tokens reference their owning
/// [`Source`](crate::source::Source) only by offset and length; text is
/// obtained by slicing the Source's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
    /// The run of whitespace preceding a macro's `@` on the same line.
    /// Only meaningful for `MacroSymbol`/`MacroSymbolImmediate` tokens.
    pub macro_indent: Span,
    /// Byte offset *within the token's text* at which `:` appears, for
    /// `MacroMethod` tokens only.
    pub method_colon_offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize, len: usize) -> Self {
        Token { kind, offset, len, macro_indent: Span::EMPTY, method_colon_offset: 0 }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}
