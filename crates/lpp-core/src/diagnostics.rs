//! Error and diagnostic types for every stage of the preprocessing pipeline.
//!
//! Each variant carries enough context to format `<source>:<line>:<column>:
//! <message>` without re-deriving line/column from a saved byte offset, since
//! the owning [`Source`](crate::source::Source) may have been mutated (and
//! its line-offset cache invalidated) by the time the error is reported.

use std::fmt;

/// A fully-resolved source position, ready to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One entry in a script-runtime error's stack walk.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub source_name: String,
    pub loc: Loc,
    pub function_name: Option<String>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function_name {
            Some(name) => write!(f, "{}:{}: in function '{}'", self.source_name, self.loc, name),
            None => write!(f, "{}:{}: in main chunk", self.source_name, self.loc),
        }
    }
}

/// Failures raised while lexing document text into a token stream.
#[derive(Debug, thiserror::Error, Clone)]
pub enum LexError {
    #[error("{source_name}:{loc}: invalid codepoint encountered")]
    InvalidCodepoint { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: unterminated lua block (missing closing '$$$')")]
    UnterminatedLuaBlock { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: unterminated inline lua expression (missing closing ')')")]
    UnterminatedLuaInline { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: $$ has no meaning yet")]
    DollarHasNoMeaning { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: unterminated macro argument list (missing closing ')')")]
    UnterminatedMacroTupleArg { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: unterminated macro string argument (missing closing '\"')")]
    UnterminatedMacroStringArg { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: expected an identifier following '@'")]
    ExpectedMacroIdentifier { source_name: String, loc: Loc },

    #[error("{source_name}:{loc}: cannot use ':' or '.' after method syntax")]
    TrailingAccessAfterMethod { source_name: String, loc: Loc },

    #[error(
        "{source_name}:{loc}: heredoc macro arguments are reserved but not implemented"
    )]
    HeredocArgUnimplemented { source_name: String, loc: Loc },
}

/// Failures raised while emitting the script program.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ParseError {
    #[error("{source_name}:{loc}: {message}")]
    Malformed { source_name: String, loc: Loc, message: String },
}

/// The generated meta script failed to parse as a script chunk. `loc` has
/// already been translated from the meta file's offset back to the input
/// file's line via the parser's location map.
#[derive(Debug, thiserror::Error, Clone)]
#[error("{input_name}:{loc}: {message}")]
pub struct ScriptLoadError {
    pub input_name: String,
    pub loc: Loc,
    pub message: String,
}

/// An error raised by the embedded script VM during Phase 2 or a Phase-3 macro invocation.
#[derive(Debug, thiserror::Error, Clone)]
pub struct ScriptRuntimeError {
    pub message: String,
    pub stack: Vec<StackFrame>,
    /// `in scope invoked here:` entries, innermost first, walking up the scope stack's `macro_invocation` pointers.
    pub invocation_chain: Vec<Loc>,
}

impl fmt::Display for ScriptRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in &self.stack {
            writeln!(f, "  {frame}")?;
        }
        for loc in &self.invocation_chain {
            writeln!(f, "  in scope invoked here: {loc}")?;
        }
        Ok(())
    }
}

impl ScriptRuntimeError {
    pub fn no_active_context(what: &str) -> Self {
        ScriptRuntimeError {
            message: format!(
                "script callback '{what}' invoked with no active metaprogram context \
                 (metaprogram already torn down)"
            ),
            stack: Vec::new(),
            invocation_chain: Vec::new(),
        }
    }
}

/// Top-level error type returned from the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum LppError {
    #[error("{0}")]
    Lex(#[from] LexError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    ScriptLoad(#[from] ScriptLoadError),

    #[error("{0}")]
    ScriptRuntime(#[from] ScriptRuntimeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single diagnostic as handed to a [`Consumer`](crate::consumer::Consumer),
/// normalized across lexer/parser/script origins.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub source_name: String,
    pub loc: Loc,
    pub message: String,
}

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let (source_name, loc) = lex_error_loc(e);
        Diagnostic { source_name, loc, message: e.to_string() }
    }
}

fn lex_error_loc(e: &LexError) -> (String, Loc) {
    match e {
        LexError::InvalidCodepoint { source_name, loc }
        | LexError::UnterminatedLuaBlock { source_name, loc }
        | LexError::UnterminatedLuaInline { source_name, loc }
        | LexError::DollarHasNoMeaning { source_name, loc }
        | LexError::UnterminatedMacroTupleArg { source_name, loc }
        | LexError::UnterminatedMacroStringArg { source_name, loc }
        | LexError::ExpectedMacroIdentifier { source_name, loc }
        | LexError::TrailingAccessAfterMethod { source_name, loc }
        | LexError::HeredocArgUnimplemented { source_name, loc } => (source_name.clone(), *loc),
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let ParseError::Malformed { source_name, loc, .. } = e;
        Diagnostic { source_name: source_name.clone(), loc: *loc, message: e.to_string() }
    }
}

impl From<&ScriptLoadError> for Diagnostic {
    fn from(e: &ScriptLoadError) -> Self {
        Diagnostic { source_name: e.input_name.clone(), loc: e.loc, message: e.to_string() }
    }
}

impl From<&ScriptRuntimeError> for Diagnostic {
    fn from(e: &ScriptRuntimeError) -> Self {
        let (source_name, loc) = match e.stack.first() {
            Some(frame) => (frame.source_name.clone(), frame.loc),
            None => (String::new(), Loc { line: 0, column: 0 }),
        };
        Diagnostic { source_name, loc, message: e.to_string() }
    }
}
