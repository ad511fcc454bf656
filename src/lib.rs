//! A two-pass assembler for a pedagogical 24-bit word-oriented machine,
//! featuring:
//! - a macro preprocessor
//! - a context-sensitive lexer
//! - a two-pass code generator with relocation tracking

pub mod assembler;
pub mod logging;
