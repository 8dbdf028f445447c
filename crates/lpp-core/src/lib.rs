//! `lpp-core`: the lexer/parser/metaprogram engine behind the `lpp` text
//! preprocessor. An input file passes through three phases — Phase 1 lexes
//! and parses it into a small embedded script, Phase 2 runs that script in
//! an embedded VM, and Phase 3 splices the resulting section timeline into
//! an output buffer while recording every macro expansion.
//!
//! The public entry point is [`engine::Lpp`]; construct one with
//! [`engine::Config`] and [`engine::Lpp::init`], then drive it with
//! [`engine::Lpp::process_stream`] or [`engine::Lpp::run`].

pub mod consumer;
pub mod diagnostics;
pub mod engine;
pub mod expansion;
pub mod lexer;
pub mod metaprogram;
pub mod parser;
pub mod scope;
pub mod script;
pub mod section;
pub mod source;
pub mod token;

pub use consumer::{Consumer, NullConsumer};
pub use diagnostics::{Diagnostic, LppError};
pub use engine::{Config, Lpp};
pub use metaprogram::Metaprogram;
