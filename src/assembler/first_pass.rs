//! First pass: symbol table construction and address accounting
//!
//! Walks the expanded lines once, tokenizing each into the cumulative
//! buffer, recording every label, entry and extern declaration, and
//! advancing the instruction and data counters by the word counts the
//! parser reports. No words are emitted here; the pass exists so that by
//! the time the second pass runs, every symbol already has its final
//! address.

use super::Context;
use super::error::ErrorKind;
use super::isa;
use super::lexer::{Lexer, Token, TokenKind};
use super::parser::{self, Pass};

/// A named address in the assembled program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    /// Defined in another translation unit, resolved at load time
    pub external: bool,
    /// Exported to other translation units
    pub entry: bool,
}

pub fn run(ctx: &mut Context) {
    let lexer = Lexer::new();
    ctx.line_number = 1;

    for line_number in 1..=ctx.expanded_lines.len() {
        let tokens =
            lexer.tokenize_line(&ctx.expanded_lines, line_number, &mut ctx.errors, &ctx.ir_filename);
        ctx.tokens.extend_from_slice(&tokens);

        if parser::is_label_statement(&tokens)
            || parser::is_entry_statement(&tokens)
            || parser::is_extern_statement(&tokens)
        {
            define_symbol(ctx, &tokens);
        }

        let mut recognized = false;

        if parser::is_instruction_statement(&tokens) {
            if let Some(instruction) = parser::parse_instruction(&tokens, ctx, Pass::First) {
                ctx.ic += instruction.word_count;
            }
            recognized = true;
        }

        if parser::is_directive_statement(&tokens) {
            if let Some(directive) = parser::parse_directive(&tokens, ctx) {
                // Data words live after the code; IC stays the single
                // running address cursor
                ctx.dc += directive.word_count;
                ctx.ic += directive.word_count;
            }
            recognized = true;
        }

        if !recognized {
            ctx.errors.report(
                ErrorKind::InvalidStatement,
                format!(
                    "{}:{}: Invalid statement: '{}'",
                    ctx.ir_filename,
                    line_number,
                    ctx.expanded_lines[line_number - 1]
                ),
            );
        }

        ctx.line_number += 1;
    }
}

/// Record whatever symbol the statement declares: the label in front of
/// an instruction or data directive, or the operand of `.entry`/`.extern`
fn define_symbol(ctx: &mut Context, tokens: &[Token]) {
    let mut i;
    let mut label = None;

    if tokens[0].kind == TokenKind::Label {
        label = Some(tokens[0]);
        i = 2;
    } else {
        // No label: step over the dot of an unlabeled directive
        i = 1;
    }

    if tokens.get(i).is_some_and(|t| t.kind == TokenKind::Dot) {
        i += 1;
    }
    let Some(keyword) = tokens.get(i).copied() else {
        return;
    };

    if let Some(label) = label
        && !parser::is_entry_statement(tokens)
        && !parser::is_extern_statement(tokens)
    {
        let name = label.text(&ctx.expanded_lines).to_string();
        if !validate_label(&name, ctx) {
            return;
        }
    }

    match keyword.kind {
        TokenKind::Instruction | TokenKind::DirectiveData | TokenKind::DirectiveString => {
            let Some(label) = label else {
                return;
            };
            let address = ctx.ic;
            validate_address(address, ctx);
            let name = label.text(&ctx.expanded_lines).to_string();
            ctx.symbol_table.insert(
                name.clone(),
                Symbol { name, address, external: false, entry: false },
            );
        }
        TokenKind::DirectiveExtern => {
            let Some(operand) = tokens.get(i + 1) else {
                return;
            };
            let name = operand.text(&ctx.expanded_lines).to_string();
            let symbol = Symbol { name: name.clone(), address: 0, external: true, entry: false };
            ctx.symbol_table.insert(name, symbol.clone());
            ctx.extern_names.push(symbol);
        }
        TokenKind::DirectiveEntry => {
            let Some(operand) = tokens.get(i + 1) else {
                return;
            };
            let name = operand.text(&ctx.expanded_lines).to_string();
            // Entries join the symbol table only through their local
            // definition; here we just remember the declaration
            ctx.entry_names.push(Symbol { name, address: 0, external: false, entry: true });
        }
        _ => {}
    }
}

/// Check a label name against the naming rules and the symbol table.
/// Reports the first violated rule and gives up on the label.
fn validate_label(name: &str, ctx: &mut Context) -> bool {
    if name.is_empty() {
        ctx.errors.report(
            ErrorKind::EmptyLabel,
            format!("{}:{}: Empty label name", ctx.ir_filename, ctx.line_number),
        );
        return false;
    }

    if name.chars().count() > isa::MAX_NAME_LEN {
        ctx.errors.report(
            ErrorKind::LabelTooLong,
            format!(
                "{}:{}: Label name '{}' exceeds maximum length of {} characters",
                ctx.ir_filename,
                ctx.line_number,
                name,
                isa::MAX_NAME_LEN
            ),
        );
        return false;
    }

    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        ctx.errors.report(
            ErrorKind::LabelStartsWithDigit,
            format!(
                "{}:{}: Label name '{}' must start with a letter",
                ctx.ir_filename, ctx.line_number, name
            ),
        );
        return false;
    }

    if let Some(bad) = name.chars().find(|&c| !c.is_ascii_alphanumeric() && c != '_') {
        ctx.errors.report(
            ErrorKind::LabelInvalidChar,
            format!(
                "{}:{}: Label name '{}' contains invalid character '{}'",
                ctx.ir_filename, ctx.line_number, name, bad
            ),
        );
        return false;
    }

    if isa::is_instruction(name) {
        ctx.errors.report(
            ErrorKind::LabelIsInstruction,
            format!(
                "{}:{}: Label name '{}' cannot be an instruction name",
                ctx.ir_filename, ctx.line_number, name
            ),
        );
        return false;
    }

    if isa::is_register(name) {
        ctx.errors.report(
            ErrorKind::LabelIsRegister,
            format!(
                "{}:{}: Label name '{}' cannot be a register name",
                ctx.ir_filename, ctx.line_number, name
            ),
        );
        return false;
    }

    if isa::is_directive(name) {
        ctx.errors.report(
            ErrorKind::LabelIsDirective,
            format!(
                "{}:{}: Label name '{}' cannot be a directive name",
                ctx.ir_filename, ctx.line_number, name
            ),
        );
        return false;
    }

    if ctx.symbol_table.contains_key(name) {
        ctx.errors.report(
            ErrorKind::LabelDuplicate,
            format!(
                "{}:{}: Label '{}' already defined",
                ctx.ir_filename, ctx.line_number, name
            ),
        );
        return false;
    }

    true
}

/// Labels must fit the 21-bit address space
fn validate_address(address: u32, ctx: &mut Context) {
    if address as i64 > isa::INT21_MAX {
        ctx.errors.report(
            ErrorKind::AddressOutOfBounds,
            format!(
                "{}:{}: Address {} exceeds maximum allowed value of {}",
                ctx.ir_filename,
                ctx.line_number,
                address,
                isa::INT21_MAX
            ),
        );
    }
}
