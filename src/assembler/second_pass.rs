//! Second pass: word emission and symbol resolution
//!
//! Replays the cumulative token buffer line by line, in the exact order
//! the first pass lexed it, with a fresh address cursor starting at 100.
//! Instructions are re-parsed (their shape was validated in the first
//! pass) and encoded; identifier operands are resolved against the symbol
//! table, recording external uses and exported entries along the way.

use super::Context;
use super::codegen::{Are, Word};
use super::error::ErrorKind;
use super::first_pass::Symbol;
use super::isa::{self, AddressingMode};
use super::lexer::{Token, TokenKind};
use super::parser::{self, ParsedInstruction, Pass};

pub fn run(ctx: &mut Context) {
    let mut ic = isa::INITIAL_IC;
    let mut start = 0;

    while start < ctx.tokens.len() {
        let line_number = ctx.tokens[start].line_number;
        let mut end = start;
        while end < ctx.tokens.len() && ctx.tokens[end].line_number == line_number {
            end += 1;
        }
        let line: Vec<Token> = ctx.tokens[start..end].to_vec();
        start = end;
        ctx.line_number = line_number;

        if parser::is_instruction_statement(&line) {
            let Some(instruction) = parser::parse_instruction(&line, ctx, Pass::Second) else {
                continue;
            };
            record_symbols(ctx, &instruction, ic);
            encode_instruction(ctx, &instruction, &mut ic);
        } else if parser::is_directive_statement(&line) {
            let Some(directive) = parser::parse_directive(&line, ctx) else {
                continue;
            };
            if let Some(label) = directive.label {
                // A data label can be exported too
                let name = label.text(&ctx.expanded_lines).to_string();
                record_entry(ctx, &name);
            }
            encode_data(ctx, &line, directive.directive.kind, &mut ic);
        }
    }
}

/// Note every extern use and every declared entry this statement touches
fn record_symbols(ctx: &mut Context, instruction: &ParsedInstruction, ic: u32) {
    if let Some(label) = instruction.label {
        let name = label.text(&ctx.expanded_lines).to_string();
        record_entry(ctx, &name);
    }

    if let Some(rs) = instruction.rs
        && rs.kind == TokenKind::Identifier
    {
        let name = rs.text(&ctx.expanded_lines).to_string();
        record_extern_use(ctx, &name, ic + 1);
        record_entry(ctx, &name);
    }

    if let Some(rt) = instruction.rt
        && rt.kind == TokenKind::Identifier
    {
        // The destination's extra word comes after the source's, if any
        let offset = if instruction.rs.is_some_and(|t| parser::needs_extra_word(t.kind)) {
            2
        } else {
            1
        };
        let name = rt.text(&ctx.expanded_lines).to_string();
        record_extern_use(ctx, &name, ic + offset);
        record_entry(ctx, &name);
    }
}

/// One record per use site; a symbol may appear many times
fn record_extern_use(ctx: &mut Context, name: &str, address: u32) {
    if !ctx.extern_names.iter().any(|s| s.name == name) {
        return;
    }
    ctx.externals.push(Symbol {
        name: name.to_string(),
        address,
        external: true,
        entry: false,
    });
}

/// Resolve a declared entry to its definition address, once
fn record_entry(ctx: &mut Context, name: &str) {
    if !ctx.entry_names.iter().any(|s| s.name == name) {
        return;
    }
    if ctx.entries.iter().any(|s| s.name == name) {
        return;
    }
    let Some(symbol) = ctx.symbol_table.get(name) else {
        return;
    };
    ctx.entries.push(Symbol {
        name: name.to_string(),
        address: symbol.address,
        external: false,
        entry: true,
    });
}

fn encode_instruction(ctx: &mut Context, instruction: &ParsedInstruction, ic: &mut u32) {
    let name = instruction.mnemonic.text(&ctx.expanded_lines).to_string();
    let Some(info) = isa::find_instruction(&name) else {
        return;
    };

    let mut word = Word::new();
    word.set_are(Are::Absolute);
    word.set_opcode(info.opcode);
    word.set_funct(info.funct);

    if let (Some(rs), Some(mode)) = (instruction.rs, instruction.rs_mode) {
        word.set_src_mode(mode.field());
        if rs.kind == TokenKind::Register
            && let Some(reg) = isa::find_register(rs.text(&ctx.expanded_lines))
        {
            word.set_src_reg(reg);
        }
    }
    if let (Some(rt), Some(mode)) = (instruction.rt, instruction.rt_mode) {
        word.set_dst_mode(mode.field());
        if rt.kind == TokenKind::Register
            && let Some(reg) = isa::find_register(rt.text(&ctx.expanded_lines))
        {
            word.set_dst_reg(reg);
        }
    }

    word.address = *ic;
    ctx.code_image.push(word);
    *ic += 1;

    if let Some(rs) = instruction.rs
        && parser::needs_extra_word(rs.kind)
    {
        encode_extra_word(ctx, rs, instruction.rs_mode, ic);
    }
    if let Some(rt) = instruction.rt
        && parser::needs_extra_word(rt.kind)
    {
        encode_extra_word(ctx, rt, instruction.rt_mode, ic);
    }
}

/// Emit the extra word an immediate or identifier operand occupies
fn encode_extra_word(
    ctx: &mut Context,
    operand: Token,
    mode: Option<AddressingMode>,
    ic: &mut u32,
) {
    let mut word = Word::new();

    match operand.kind {
        TokenKind::Immediate => {
            let value: i64 = operand
                .text(&ctx.expanded_lines)
                .parse()
                .unwrap_or_default();
            if value < isa::INT21_MIN || value > isa::INT21_MAX {
                ctx.errors.report(
                    ErrorKind::ImmediateOutOfBounds,
                    format!(
                        "{}:{}: Immediate value {} exceeds allowed range ({} to {})",
                        ctx.ir_filename,
                        operand.line_number,
                        value,
                        isa::INT21_MIN,
                        isa::INT21_MAX
                    ),
                );
            }
            word.set_operand_value(value);
            word.set_are(Are::Absolute);
        }
        TokenKind::Identifier => {
            let name = operand.text(&ctx.expanded_lines).to_string();
            let Some(symbol) = ctx.symbol_table.get(&name) else {
                ctx.errors.report(
                    ErrorKind::SymbolNotFound,
                    format!(
                        "{}:{}: Symbol '{}' not found in symbol table",
                        ctx.ir_filename, ctx.line_number, name
                    ),
                );
                // Keep the cursor in step with the first pass
                *ic += 1;
                return;
            };

            if mode == Some(AddressingMode::Relative) {
                // Jump offset from the word after the opcode word
                let offset = symbol.address as i64 - *ic as i64 + 1;
                if offset < isa::INT21_MIN || offset > isa::INT21_MAX {
                    ctx.errors.report(
                        ErrorKind::AddressOutOfBounds,
                        format!(
                            "{}:{}: Relative address offset {} exceeds allowed range ({} to {})",
                            ctx.ir_filename,
                            operand.line_number,
                            offset,
                            isa::INT21_MIN,
                            isa::INT21_MAX
                        ),
                    );
                }
                word.set_operand_value(offset);
                word.set_are(Are::Absolute);
            } else {
                let address = symbol.address;
                if address > isa::UINT24_MAX {
                    ctx.errors.report(
                        ErrorKind::AddressOutOfBounds,
                        format!(
                            "{}:{}: Symbol address {} exceeds maximum allowed value of {}",
                            ctx.ir_filename,
                            operand.line_number,
                            address,
                            isa::UINT24_MAX
                        ),
                    );
                }
                // An external symbol has address zero; the loader fills
                // it in
                word.set_operand_value(address as i64);
                word.set_are(if symbol.external {
                    Are::External
                } else {
                    Are::Relocatable
                });
            }
        }
        _ => {}
    }

    word.address = *ic;
    ctx.code_image.push(word);
    *ic += 1;
}

/// Emit the data words of a `.data` or `.string` line into the data
/// image, advancing the shared address cursor
fn encode_data(ctx: &mut Context, tokens: &[Token], directive: TokenKind, ic: &mut u32) {
    match directive {
        TokenKind::DirectiveData => {
            for token in tokens.iter().filter(|t| t.kind == TokenKind::Immediate) {
                let value: i64 = token
                    .text(&ctx.expanded_lines)
                    .parse()
                    .unwrap_or_default();
                let mut word = Word::new();
                word.set_data_value(value);
                word.address = *ic;
                ctx.data_image.push(word);
                *ic += 1;
            }
        }
        TokenKind::DirectiveString => {
            for token in tokens.iter().filter(|t| t.kind == TokenKind::StringLiteral) {
                let text = token.text(&ctx.expanded_lines);
                for byte in text.bytes() {
                    let mut word = Word::new();
                    word.set_data_value(byte as i64);
                    word.address = *ic;
                    ctx.data_image.push(word);
                    *ic += 1;
                }
            }
            // Terminating NUL word
            let mut word = Word::new();
            word.address = *ic;
            ctx.data_image.push(word);
            *ic += 1;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::codegen::ARE_MASK;
    use crate::assembler::{first_pass, preprocessor};

    fn assembled(source: &str) -> Context {
        let mut ctx = Context::new("test");
        preprocessor::expand_source(&mut ctx, source);
        assert!(ctx.errors.is_empty(), "preprocessor errors in test input");
        first_pass::run(&mut ctx);
        assert!(ctx.errors.is_empty(), "first pass errors in test input");
        run(&mut ctx);
        ctx
    }

    #[test]
    fn register_operands_share_the_opcode_word() {
        let ctx = assembled("add r1, r2\nstop\n");
        assert!(ctx.errors.is_empty());
        assert_eq!(ctx.code_image.len(), 2);
        let add = ctx.code_image[0];
        // opcode 2, funct 1, both modes register
        assert_eq!(
            add.value,
            (2 << 18) | (3 << 16) | (1 << 13) | (3 << 11) | (2 << 8) | (1 << 3) | 4
        );
    }

    #[test]
    fn direct_operand_resolves_to_a_relocatable_word() {
        let ctx = assembled("MAIN: lea STR, r1\nstop\nSTR: .string \"a\"\n");
        assert!(ctx.errors.is_empty());
        let extra = ctx.code_image[1];
        // STR sits right after the three code words
        assert_eq!(extra.value >> 3, 103);
        assert_eq!(extra.value & ARE_MASK, 2);
    }

    #[test]
    fn relative_operand_is_an_absolute_offset() {
        let ctx = assembled("LOOP: inc r1\njmp &LOOP\nstop\n");
        assert!(ctx.errors.is_empty());
        // jmp word at 101, offset word at 102: 100 - 102 + 1 = -1
        let offset = ctx.code_image[2];
        assert_eq!(offset.address, 102);
        assert_eq!(offset.value >> 3, 0x1F_FFFF);
        assert_eq!(offset.value & ARE_MASK, 4);
    }

    #[test]
    fn extern_uses_are_recorded_per_site() {
        let ctx = assembled(".extern X\nlea X, r1\nlea X, r2\nstop\n");
        assert!(ctx.errors.is_empty());
        let addresses: Vec<u32> = ctx.externals.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![101, 103]);
        for record in &ctx.externals {
            assert_eq!(record.name, "X");
        }
    }

    #[test]
    fn extern_word_is_zero_with_external_tag() {
        let ctx = assembled(".extern X\nlea X, r1\nstop\n");
        let word = ctx.code_image[1];
        assert_eq!(word.value & ARE_MASK, 1);
        assert_eq!(word.value >> 3, 0);
    }

    #[test]
    fn source_and_destination_extra_words_keep_their_order() {
        let ctx = assembled(".extern A\n.extern B\nmov A, B\nstop\n");
        assert!(ctx.errors.is_empty());
        // mov word at 100, A's word at 101, B's word at 102
        let addresses: Vec<u32> = ctx.externals.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![101, 102]);
    }

    #[test]
    fn undefined_symbol_is_reported() {
        let ctx = assembled("jmp NOWHERE\nstop\n");
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::SymbolNotFound));
    }

    #[test]
    fn data_words_interleave_addresses_with_code() {
        let ctx = assembled("stop\nLIST: .data 7\ninc r1\n.data 9\n");
        assert!(ctx.errors.is_empty());
        let code_addresses: Vec<u32> = ctx.code_image.iter().map(|w| w.address).collect();
        let data_addresses: Vec<u32> = ctx.data_image.iter().map(|w| w.address).collect();
        assert_eq!(code_addresses, vec![100, 102]);
        assert_eq!(data_addresses, vec![101, 103]);
    }

    #[test]
    fn string_words_spell_the_text_plus_terminator() {
        let ctx = assembled(".string \"Hi\"\n");
        let values: Vec<u32> = ctx.data_image.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![0x48, 0x69, 0x00]);
    }

    #[test]
    fn empty_string_still_gets_its_terminator() {
        let ctx = assembled(".string \"\"\n");
        let values: Vec<u32> = ctx.data_image.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![0x00]);
        assert_eq!(ctx.dc, 1);
    }

    #[test]
    fn second_pass_word_counts_agree_with_the_first_pass() {
        let ctx = assembled(
            "MAIN: mov #5, r3\nlea STR, r1\nLOOP: jmp &LOOP\nstop\nSTR: .string \"abc\"\n.data 1, -2\n",
        );
        assert!(ctx.errors.is_empty());
        assert_eq!(
            ctx.code_image.len() as u32,
            ctx.ic - isa::INITIAL_IC - ctx.dc
        );
        assert_eq!(ctx.data_image.len() as u32, ctx.dc);
    }
}
