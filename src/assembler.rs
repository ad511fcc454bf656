//! Translates assembly source for a 24-bit word-oriented machine into a
//! textual object image, in a two-pass manner
//!
//! The first pass resolves labels and builds a symbol table while counting
//! code and data words, and the second pass emits the 24-bit words with
//! their relocation tags and resolves symbolic operands.
//!
//! Comments start with a semicolon (`;`) as the first non-whitespace
//! character of a line and run to the end of that line. Blank lines are
//! ignored. A statement is one line: an optional `NAME:` label, then either
//! an instruction or a directive.
//!
//! Operands come in four addressing modes:
//! - immediate: `#N`, a signed decimal literal
//! - direct: `NAME`, the address of a label
//! - relative: `&NAME`, a signed word offset to a label (jumps only)
//! - register: `r0` .. `r7`
//!
//! The assembler supports the following directives:
//! - .data N, N, ...: store a list of 24-bit values
//! - .string "TEXT": store a NUL-terminated character sequence
//! - .entry NAME: export a locally defined symbol
//! - .extern NAME: import a symbol defined in another source file
//!
//! Macros are defined with `mcro NAME` ... `mcroend` and are expanded by
//! literal body substitution before anything else runs:
//!
//! ```ignore
//! mcro twice
//!     add r1, r2
//!     add r1, r2
//! mcroend
//! MAIN: twice
//!     stop
//! ```
//!
//! Each input `base.as` yields up to four artifacts: the macro-expanded
//! listing `base.am`, the object image `base.ob`, the exported symbols
//! `base.ent` and the external references `base.ext`. Nothing is written
//! for a file once an error has been recorded against it.

pub mod codegen;
pub mod error;
pub mod first_pass;
pub mod isa;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod preprocessor;
pub mod second_pass;

use std::collections::HashMap;
use std::fs;

use crate::logging;
use codegen::Word;
use error::{Error, ErrorKind, ErrorSink};
use first_pass::Symbol;
use lexer::Token;

/// Everything the pipeline accumulates for a single source file.
///
/// One context is created per input file and dropped once that file's
/// output has been written or its errors reported. Nothing is shared
/// between files.
pub struct Context {
    /// Input filename, `base.as`
    pub filename: String,
    /// Derived intermediate filename, `base.am`
    pub ir_filename: String,
    /// Line currently being processed, 1-based, tracked per pass
    pub line_number: usize,
    /// Macro-expanded source lines; every [`Token`] span points into these
    pub expanded_lines: Vec<String>,
    /// Cumulative token buffer in lex order, replayed by the second pass
    pub tokens: Vec<Token>,
    /// Labels and externs keyed by name
    pub symbol_table: HashMap<String, Symbol>,
    /// Emitted instruction words, in address order
    pub code_image: Vec<Word>,
    /// Emitted data words, in address order
    pub data_image: Vec<Word>,
    /// Symbols declared with `.entry`
    pub entry_names: Vec<Symbol>,
    /// Symbols declared with `.extern`
    pub extern_names: Vec<Symbol>,
    /// Entries resolved to their final addresses by the second pass
    pub entries: Vec<Symbol>,
    /// External references, one record per use site
    pub externals: Vec<Symbol>,
    /// Instruction counter, the running address cursor
    pub ic: u32,
    /// Data counter
    pub dc: u32,
    /// Accumulated errors for this file
    pub errors: ErrorSink,
}

impl Context {
    /// Create a fresh context for the source file `base.as`
    pub fn new(base: &str) -> Context {
        Context {
            filename: format!("{base}.as"),
            ir_filename: format!("{base}.am"),
            line_number: 0,
            expanded_lines: Vec::new(),
            tokens: Vec::new(),
            symbol_table: HashMap::new(),
            code_image: Vec::new(),
            data_image: Vec::new(),
            entry_names: Vec::new(),
            extern_names: Vec::new(),
            entries: Vec::new(),
            externals: Vec::new(),
            ic: isa::INITIAL_IC,
            dc: 0,
            errors: ErrorSink::new(),
        }
    }
}

/// Assemble every named source file, one independent context per file
pub fn assemble(base_names: &[String]) {
    for base in base_names {
        assemble_file(base);
    }
}

/// Run the full pipeline on `base.as`, writing the output artifacts on
/// success and printing an error report otherwise. Returns whether the
/// file assembled cleanly.
pub fn assemble_file(base: &str) -> bool {
    let mut ctx = Context::new(base);

    let source = match fs::read_to_string(&ctx.filename) {
        Ok(source) => source,
        Err(err) => {
            // No context to report against yet, print directly
            let error = Error::new(
                ErrorKind::FileOpen,
                format!("Failed to open file '{}': {}", ctx.filename, err),
            );
            logging::error(&error.to_string());
            return false;
        }
    };

    preprocessor::expand_source(&mut ctx, &source);
    if !ctx.errors.is_empty() {
        ctx.errors.print_report();
        return false;
    }
    output::write_ir(&ctx);

    first_pass::run(&mut ctx);
    if !ctx.errors.is_empty() {
        ctx.errors.print_report();
        return false;
    }

    second_pass::run(&mut ctx);
    if !ctx.errors.is_empty() {
        ctx.errors.print_report();
        return false;
    }

    output::write_artifacts(&ctx);
    true
}

/// Run the full pipeline on in-memory source without touching the
/// filesystem. Aborts at the first stage that leaves errors behind.
pub fn assemble_source(ctx: &mut Context, source: &str) {
    preprocessor::expand_source(ctx, source);
    if !ctx.errors.is_empty() {
        return;
    }
    first_pass::run(ctx);
    if !ctx.errors.is_empty() {
        return;
    }
    second_pass::run(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::codegen::ARE_MASK;

    fn assembled(source: &str) -> Context {
        let mut ctx = Context::new("test");
        assemble_source(&mut ctx, source);
        ctx
    }

    #[test]
    fn mov_immediate_program() {
        let ctx = assembled("MAIN: mov #5, r3\nstop\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.code_image.len(), 3);
        assert_eq!(ctx.data_image.len(), 0);

        // mov: opcode 0, dst mode register (3), dst reg 3, absolute
        let mov = ctx.code_image[0];
        assert_eq!(mov.address, 100);
        assert_eq!(mov.value, (3 << 11) | (3 << 8) | 4);

        // immediate 5 shifted past the A/R/E field
        let imm = ctx.code_image[1];
        assert_eq!(imm.address, 101);
        assert_eq!(imm.value, (5 << 3) | 4);

        // stop: opcode 15, no operands
        let stop = ctx.code_image[2];
        assert_eq!(stop.address, 102);
        assert_eq!(stop.value, (15 << 18) | 4);

        assert_eq!(ctx.ic, 103);
        assert_eq!(ctx.dc, 0);
    }

    #[test]
    fn data_only_program() {
        let ctx = assembled(".data 5, -3, 0\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.code_image.len(), 0);
        let values: Vec<u32> = ctx.data_image.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![0x000005, 0xFFFFFD, 0x000000]);
        assert_eq!(ctx.dc, 3);
        assert_eq!(ctx.ic - isa::INITIAL_IC - ctx.dc, 0);
    }

    #[test]
    fn string_program() {
        let ctx = assembled(".string \"AB\"\n");
        assert!(ctx.errors.is_empty());
        let values: Vec<u32> = ctx.data_image.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![0x41, 0x42, 0x00]);
        assert_eq!(ctx.dc, 3);
    }

    #[test]
    fn extern_relative_jump() {
        let ctx = assembled(".extern X\njmp &X\n");
        assert!(ctx.errors.is_empty());

        // one use record, at the address of the offset word
        assert_eq!(ctx.externals.len(), 1);
        assert_eq!(ctx.externals[0].name, "X");
        assert_eq!(ctx.externals[0].address, 101);

        // offset 0 - 101 + 1 = -100, stored shifted with an absolute tag
        let offset = ctx.code_image[1];
        assert_eq!(offset.value & ARE_MASK, 4);
        assert_eq!(offset.value >> 3, 0x1F_FF9C);
    }

    #[test]
    fn entry_resolves_to_definition_address() {
        let ctx = assembled(".entry MAIN\nMAIN: mov #5, r3\nstop\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.entries.len(), 1);
        assert_eq!(ctx.entries[0].name, "MAIN");
        assert_eq!(ctx.entries[0].address, 100);
    }

    #[test]
    fn entry_on_data_label_is_resolved() {
        let ctx = assembled(".entry LIST\nstop\nLIST: .data 7\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.entries.len(), 1);
        assert_eq!(ctx.entries[0].name, "LIST");
        assert_eq!(ctx.entries[0].address, 101);
    }

    #[test]
    fn entry_used_as_operand_is_listed_once() {
        let ctx = assembled(".entry LOOP\nLOOP: inc r1\njmp LOOP\nbne LOOP\nstop\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.entries.len(), 1);
        assert_eq!(ctx.entries[0].address, 100);
    }

    #[test]
    fn macro_named_after_instruction_is_rejected() {
        let ctx = assembled("mcro mov\n inc r1\nmcroend\nstop\n");
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::MacroNameInvalid)
        );
        // preprocessor errors abort before the first pass
        assert!(ctx.symbol_table.is_empty());
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let ctx = assembled("A: stop\nA: stop\n");
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::LabelDuplicate)
        );
        assert!(ctx.code_image.is_empty());
    }

    #[test]
    fn image_sizes_match_counters() {
        let ctx = assembled("MAIN: mov #5, r3\nlea STR, r1\nstop\nSTR: .string \"hi\"\n.data 1, 2\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.code_image.len() as u32, ctx.ic - isa::INITIAL_IC - ctx.dc);
        assert_eq!(ctx.data_image.len() as u32, ctx.dc);
    }

    #[test]
    fn every_word_fits_in_24_bits_with_a_relocation_tag() {
        let ctx = assembled("MAIN: mov #-7, r3\nlea D, r1\njmp &MAIN\nstop\nD: .data -1\n");
        assert!(ctx.errors.is_empty());
        for word in ctx.code_image.iter() {
            assert_eq!(word.value & 0xFF00_0000, 0);
            assert!(matches!(word.value & ARE_MASK, 1 | 2 | 4));
        }
        for word in ctx.data_image.iter() {
            assert_eq!(word.value & 0xFF00_0000, 0);
        }
    }

    #[test]
    fn direct_reference_to_extern_emits_zero_valued_external_word() {
        let ctx = assembled(".extern FAR\nlea FAR, r1\nstop\n");
        assert!(ctx.errors.is_empty());
        let word = ctx.code_image[1];
        assert_eq!(word.value & ARE_MASK, 1);
        assert_eq!(word.value >> 3, 0);
        assert_eq!(ctx.externals[0].address, word.address);
    }

    #[test]
    fn errors_in_first_pass_suppress_emission() {
        let ctx = assembled("mov #5\nstop\n");
        assert!(!ctx.errors.is_empty());
        assert!(ctx.code_image.is_empty());
    }
}
