//! Turns a tokenized line into a [`ParsedInstruction`] or
//! [`ParsedDirective`]
//!
//! Parsing is permissive: a failure reports into the error sink and
//! returns `None`, and the pipeline moves on to the next line so that a
//! single run can surface every problem in the file.

use super::Context;
use super::error::ErrorKind;
use super::isa::{self, AddressingMode};
use super::lexer::{Token, TokenKind};

/// Which pass is asking. The first pass validates, the second only
/// re-parses the shape it already accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Second,
}

/// An instruction statement with its operands classified
#[derive(Debug, Clone, Copy)]
pub struct ParsedInstruction {
    pub label: Option<Token>,
    pub mnemonic: Token,
    pub rs: Option<Token>,
    pub rs_mode: Option<AddressingMode>,
    pub rt: Option<Token>,
    pub rt_mode: Option<AddressingMode>,
    pub operand_count: usize,
    /// Words this statement occupies: the opcode word plus one per
    /// immediate or identifier operand
    pub word_count: u32,
}

/// A directive statement
#[derive(Debug, Clone, Copy)]
pub struct ParsedDirective {
    pub label: Option<Token>,
    pub directive: Token,
    /// Data cells for `.data`, characters plus the terminator for
    /// `.string`, zero for `.entry` and `.extern`
    pub word_count: u32,
}

pub fn is_label_statement(tokens: &[Token]) -> bool {
    tokens.first().is_some_and(|t| t.kind == TokenKind::Label)
}

pub fn is_instruction_statement(tokens: &[Token]) -> bool {
    let start = if is_label_statement(tokens) { 2 } else { 0 };
    tokens[start.min(tokens.len())..]
        .iter()
        .any(|t| t.kind == TokenKind::Instruction)
}

pub fn is_directive_statement(tokens: &[Token]) -> bool {
    let start = if is_label_statement(tokens) { 2 } else { 0 };
    tokens[start.min(tokens.len())..].iter().any(|t| {
        matches!(
            t.kind,
            TokenKind::DirectiveData
                | TokenKind::DirectiveString
                | TokenKind::DirectiveEntry
                | TokenKind::DirectiveExtern
        )
    })
}

pub fn is_entry_statement(tokens: &[Token]) -> bool {
    tokens.iter().any(|t| t.kind == TokenKind::DirectiveEntry)
}

pub fn is_extern_statement(tokens: &[Token]) -> bool {
    tokens.iter().any(|t| t.kind == TokenKind::DirectiveExtern)
}

fn is_operand(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Register | TokenKind::Immediate | TokenKind::Identifier
    )
}

/// Whether an operand of this kind needs a word of its own
pub fn needs_extra_word(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Immediate | TokenKind::Identifier)
}

fn count_operands(tokens: &[Token]) -> usize {
    tokens.iter().filter(|t| is_operand(t.kind)).count()
}

fn addressing_mode(kind: TokenKind, relative: bool) -> Option<AddressingMode> {
    match kind {
        TokenKind::Immediate => Some(AddressingMode::Immediate),
        TokenKind::Register => Some(AddressingMode::Register),
        TokenKind::Identifier if relative => Some(AddressingMode::Relative),
        TokenKind::Identifier => Some(AddressingMode::Direct),
        _ => None,
    }
}

/// Parse one instruction line. `tokens` must already be known to contain
/// an instruction mnemonic.
pub fn parse_instruction(
    tokens: &[Token],
    ctx: &mut Context,
    pass: Pass,
) -> Option<ParsedInstruction> {
    let mut i = 0;
    let mut label = None;

    match tokens.first()?.kind {
        TokenKind::Label => {
            label = Some(tokens[0]);
            i = 2;
        }
        TokenKind::Identifier => {
            // A would-be label missing its colon
            if tokens.get(1).map(|t| t.kind) != Some(TokenKind::Colon) {
                ctx.errors.report(
                    ErrorKind::LabelMissingColon,
                    format!(
                        "{}:{}: Missing colon after label",
                        ctx.ir_filename, ctx.line_number
                    ),
                );
                return None;
            }
        }
        _ => {}
    }

    let mnemonic = *tokens.get(i)?;
    if mnemonic.kind != TokenKind::Instruction {
        ctx.errors.report(
            ErrorKind::InvalidStatement,
            format!(
                "{}:{}: Expected an instruction mnemonic, got '{}'",
                ctx.ir_filename,
                ctx.line_number,
                mnemonic.text(&ctx.expanded_lines)
            ),
        );
        return None;
    }

    let mut instruction = ParsedInstruction {
        label,
        mnemonic,
        rs: None,
        rs_mode: None,
        rt: None,
        rt_mode: None,
        operand_count: count_operands(tokens),
        word_count: 1,
    };

    let mut comma_count = 0;
    for j in i + 1..tokens.len() {
        let token = tokens[j];
        if token.kind == TokenKind::Comma {
            comma_count += 1;
            continue;
        }
        if !is_operand(token.kind) {
            continue;
        }

        let relative = j > 0 && tokens[j - 1].kind == TokenKind::Amper;
        let mode = addressing_mode(token.kind, relative);

        if pass == Pass::First
            && token.kind == TokenKind::Immediate
            && !validate_immediate(token, ctx)
        {
            return None;
        }

        if instruction.rs.is_none() {
            instruction.rs = Some(token);
            instruction.rs_mode = mode;
        } else if instruction.rt.is_none() {
            instruction.rt = Some(token);
            instruction.rt_mode = mode;
        }
    }

    // A single operand is the destination
    if instruction.operand_count == 1 {
        instruction.rt = instruction.rs.take();
        instruction.rt_mode = instruction.rs_mode.take();
    }

    if instruction.rs.is_some_and(|t| needs_extra_word(t.kind)) {
        instruction.word_count += 1;
    }
    if instruction.rt.is_some_and(|t| needs_extra_word(t.kind)) {
        instruction.word_count += 1;
    }

    if pass == Pass::First {
        validate_instruction(&instruction, ctx);

        // Exactly one comma between two operands, none anywhere else
        if instruction.operand_count == 2 && comma_count != 1 {
            ctx.errors.report(
                ErrorKind::InstructionIllegalCommaCount,
                format!(
                    "{}:{}: Invalid number of commas in instruction '{}'",
                    ctx.ir_filename,
                    ctx.line_number,
                    mnemonic.text(&ctx.expanded_lines)
                ),
            );
        } else if instruction.operand_count != 2 && comma_count != 0 {
            ctx.errors.report(
                ErrorKind::InstructionIllegalComma,
                format!(
                    "{}:{}: Illegal comma in instruction '{}'",
                    ctx.ir_filename,
                    ctx.line_number,
                    mnemonic.text(&ctx.expanded_lines)
                ),
            );
        }
    }

    Some(instruction)
}

/// Parse one directive line
pub fn parse_directive(tokens: &[Token], ctx: &mut Context) -> Option<ParsedDirective> {
    let mut i = 0;
    let mut label = None;

    if is_label_statement(tokens) {
        label = Some(tokens[0]);
        i = 2;
    }

    match tokens.get(i) {
        Some(token) if token.kind == TokenKind::Dot => i += 1,
        _ => {
            ctx.errors.report(
                ErrorKind::DirectiveDotMissing,
                format!(
                    "{}:{}: Invalid directive statement - a dot is missing before the directive",
                    ctx.ir_filename, ctx.line_number
                ),
            );
            return None;
        }
    }

    let directive = *tokens.get(i)?;
    let mut parsed = ParsedDirective { label, directive, word_count: 0 };

    match directive.kind {
        TokenKind::DirectiveString => parse_string_payload(tokens, i + 1, &mut parsed, ctx)?,
        TokenKind::DirectiveData => parse_data_payload(tokens, &mut parsed, ctx)?,
        _ => {}
    }

    Some(parsed)
}

/// Check the quote discipline of a `.string` payload and count its words
fn parse_string_payload(
    tokens: &[Token],
    payload_start: usize,
    parsed: &mut ParsedDirective,
    ctx: &mut Context,
) -> Option<()> {
    match tokens.get(payload_start) {
        Some(token) if token.kind == TokenKind::Comma => {
            ctx.errors.report(
                ErrorKind::StringIllegalComma,
                format!(
                    "{}:{}: Illegal comma in string directive - string cannot start with a comma",
                    ctx.ir_filename, ctx.line_number
                ),
            );
            return None;
        }
        Some(token) if token.kind != TokenKind::Quote => {
            ctx.errors.report(
                ErrorKind::StringMissingQuote,
                format!(
                    "{}:{}: Invalid string directive - expected a quote at the beginning of the string",
                    ctx.ir_filename, ctx.line_number
                ),
            );
            return None;
        }
        _ => {}
    }

    let last = tokens.last()?;
    if last.kind == TokenKind::Comma {
        ctx.errors.report(
            ErrorKind::StringIllegalComma,
            format!(
                "{}:{}: Illegal comma in string directive - string cannot end with a comma",
                ctx.ir_filename, ctx.line_number
            ),
        );
        return None;
    }
    if last.kind != TokenKind::Quote {
        ctx.errors.report(
            ErrorKind::StringMissingQuote,
            format!(
                "{}:{}: Illegal token in string directive - expected a quote at the end of the string",
                ctx.ir_filename, ctx.line_number
            ),
        );
        return None;
    }

    // Characters plus the terminating NUL word
    let chars: usize = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::StringLiteral)
        .map(|t| t.len())
        .sum();
    parsed.word_count = chars as u32 + 1;

    Some(())
}

/// Check the comma discipline of a `.data` list, validate every value and
/// count its words
fn parse_data_payload(
    tokens: &[Token],
    parsed: &mut ParsedDirective,
    ctx: &mut Context,
) -> Option<()> {
    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1);

        match token.kind {
            TokenKind::Immediate => {
                if next.is_some_and(|n| n.kind != TokenKind::Comma) {
                    ctx.errors.report(
                        ErrorKind::DataIllegalComma,
                        format!(
                            "{}:{}: Missing comma between elements in data directive - expected comma after '{}'",
                            ctx.ir_filename,
                            ctx.line_number,
                            token.text(&ctx.expanded_lines)
                        ),
                    );
                    return None;
                }
                if !validate_data_value(*token, ctx) {
                    return None;
                }
                parsed.word_count += 1;
            }
            TokenKind::Comma => {
                if next.is_some_and(|n| n.kind == TokenKind::Comma) {
                    ctx.errors.report(
                        ErrorKind::MultipleCommas,
                        format!(
                            "{}:{}: Multiple consecutive commas in data directive",
                            ctx.ir_filename, ctx.line_number
                        ),
                    );
                    return None;
                }
                if next.is_none() {
                    ctx.errors.report(
                        ErrorKind::DataIllegalComma,
                        format!(
                            "{}:{}: Illegal comma in data directive - integer list cannot end with a comma",
                            ctx.ir_filename, ctx.line_number
                        ),
                    );
                    return None;
                }
            }
            TokenKind::DirectiveData => {
                if next.is_some_and(|n| n.kind == TokenKind::Comma) {
                    ctx.errors.report(
                        ErrorKind::DataIllegalComma,
                        format!(
                            "{}:{}: Illegal comma in data directive - integer list cannot start with a comma",
                            ctx.ir_filename, ctx.line_number
                        ),
                    );
                    return None;
                }
            }
            _ => {}
        }
    }

    Some(())
}

/// Validate an instruction's immediate operand: a signed decimal that
/// fits the 21-bit operand field
fn validate_immediate(token: Token, ctx: &mut Context) -> bool {
    let text = token.text(&ctx.expanded_lines);
    let value: i64 = match text.parse() {
        Ok(value) => value,
        Err(_) => {
            ctx.errors.report(
                ErrorKind::InvalidImmediate,
                format!(
                    "{}:{}: Invalid immediate value '{}'",
                    ctx.ir_filename, token.line_number, text
                ),
            );
            return false;
        }
    };

    if value < isa::INT21_MIN || value > isa::INT21_MAX {
        ctx.errors.report(
            ErrorKind::ImmediateOutOfBounds,
            format!(
                "{}:{}: Immediate value {} is out of range ({} to {})",
                ctx.ir_filename,
                token.line_number,
                value,
                isa::INT21_MIN,
                isa::INT21_MAX
            ),
        );
        return false;
    }

    true
}

/// Validate a value in a `.data` list
fn validate_data_value(token: Token, ctx: &mut Context) -> bool {
    let text = token.text(&ctx.expanded_lines);
    let value: i64 = match text.parse() {
        Ok(value) => value,
        Err(_) => {
            ctx.errors.report(
                ErrorKind::InvalidData,
                format!(
                    "{}:{}: Invalid data value '{}'",
                    ctx.ir_filename, token.line_number, text
                ),
            );
            return false;
        }
    };

    if value < isa::INT21_MIN || value > isa::INT21_MAX {
        ctx.errors.report(
            ErrorKind::ImmediateOutOfBounds,
            format!(
                "{}:{}: Data value {} is out of range ({} to {})",
                ctx.ir_filename,
                token.line_number,
                value,
                isa::INT21_MIN,
                isa::INT21_MAX
            ),
        );
        return false;
    }

    true
}

/// Check arity and addressing modes against the instruction table
fn validate_instruction(instruction: &ParsedInstruction, ctx: &mut Context) {
    let name = instruction.mnemonic.text(&ctx.expanded_lines).to_string();
    let Some(info) = isa::find_instruction(&name) else {
        return;
    };

    if instruction.operand_count != info.operands {
        ctx.errors.report(
            ErrorKind::SyntaxNumOperands,
            format!(
                "{}:{}: Invalid number of operands for instruction '{}'. Expected {}, got {}",
                ctx.ir_filename,
                instruction.mnemonic.line_number,
                name,
                info.operands,
                instruction.operand_count
            ),
        );
    }

    if let (Some(_), Some(mode)) = (instruction.rs, instruction.rs_mode)
        && (info.src_modes & mode.mask()) == 0
    {
        ctx.errors.report(
            ErrorKind::SyntaxAddressingMode,
            format!(
                "{}:{}: Invalid addressing mode '{}' for source operand in '{}'",
                ctx.ir_filename,
                instruction.mnemonic.line_number,
                mode.name(),
                name
            ),
        );
    }

    if let (Some(_), Some(mode)) = (instruction.rt, instruction.rt_mode)
        && (info.dst_modes & mode.mask()) == 0
    {
        ctx.errors.report(
            ErrorKind::SyntaxAddressingMode,
            format!(
                "{}:{}: Invalid addressing mode '{}' for destination operand in '{}'",
                ctx.ir_filename,
                instruction.mnemonic.line_number,
                mode.name(),
                name
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::lexer::Lexer;

    fn parse_line(line: &str, pass: Pass) -> (Option<ParsedInstruction>, Context) {
        let mut ctx = Context::new("test");
        ctx.expanded_lines = vec![line.to_string()];
        ctx.line_number = 1;
        let tokens =
            Lexer::new().tokenize_line(&ctx.expanded_lines, 1, &mut ctx.errors, "test.am");
        let parsed = parse_instruction(&tokens, &mut ctx, pass);
        (parsed, ctx)
    }

    fn parse_dir_line(line: &str) -> (Option<ParsedDirective>, Context) {
        let mut ctx = Context::new("test");
        ctx.expanded_lines = vec![line.to_string()];
        ctx.line_number = 1;
        let tokens =
            Lexer::new().tokenize_line(&ctx.expanded_lines, 1, &mut ctx.errors, "test.am");
        let parsed = parse_directive(&tokens, &mut ctx);
        (parsed, ctx)
    }

    #[test]
    fn two_operand_instruction() {
        let (parsed, ctx) = parse_line("MAIN: mov #5, r3", Pass::First);
        assert!(ctx.errors.is_empty());
        let parsed = parsed.unwrap();
        assert!(parsed.label.is_some());
        assert_eq!(parsed.operand_count, 2);
        assert_eq!(parsed.rs_mode, Some(AddressingMode::Immediate));
        assert_eq!(parsed.rt_mode, Some(AddressingMode::Register));
        assert_eq!(parsed.word_count, 2);
    }

    #[test]
    fn single_operand_lands_in_the_destination() {
        let (parsed, ctx) = parse_line("inc r1", Pass::First);
        assert!(ctx.errors.is_empty());
        let parsed = parsed.unwrap();
        assert!(parsed.rs.is_none());
        assert_eq!(parsed.rt_mode, Some(AddressingMode::Register));
        assert_eq!(parsed.word_count, 1);
    }

    #[test]
    fn amper_makes_the_operand_relative() {
        let (parsed, ctx) = parse_line("jmp &LOOP", Pass::First);
        assert!(ctx.errors.is_empty());
        let parsed = parsed.unwrap();
        assert_eq!(parsed.rt_mode, Some(AddressingMode::Relative));
        assert_eq!(parsed.word_count, 2);
    }

    #[test]
    fn identifier_without_amper_is_direct() {
        let (parsed, ctx) = parse_line("jmp LOOP", Pass::First);
        assert!(ctx.errors.is_empty());
        assert_eq!(parsed.unwrap().rt_mode, Some(AddressingMode::Direct));
    }

    #[test]
    fn missing_colon_is_reported() {
        let (parsed, ctx) = parse_line("MAIN mov #5, r3", Pass::First);
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::LabelMissingColon));
    }

    #[test]
    fn wrong_arity_is_reported() {
        let (_, ctx) = parse_line("mov #5", Pass::First);
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::SyntaxNumOperands));
    }

    #[test]
    fn lea_rejects_an_immediate_source() {
        let (_, ctx) = parse_line("lea #5, r1", Pass::First);
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::SyntaxAddressingMode));
    }

    #[test]
    fn mov_rejects_an_immediate_destination() {
        let (_, ctx) = parse_line("mov r1, #5", Pass::First);
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::SyntaxAddressingMode));
    }

    #[test]
    fn missing_comma_between_operands() {
        let (_, ctx) = parse_line("mov #5 r3", Pass::First);
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::InstructionIllegalCommaCount)
        );
    }

    #[test]
    fn comma_after_a_single_operand() {
        let (_, ctx) = parse_line("inc r1,", Pass::First);
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::InstructionIllegalComma)
        );
    }

    #[test]
    fn extra_operand_with_commas_is_an_illegal_comma() {
        let (_, ctx) = parse_line("mov r1, r2, r3", Pass::First);
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::InstructionIllegalComma)
        );
        // the arity mismatch is reported independently
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::SyntaxNumOperands));
    }

    #[test]
    fn second_pass_skips_validation() {
        let (parsed, ctx) = parse_line("mov #5 r3", Pass::Second);
        assert!(parsed.is_some());
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn immediate_bounds() {
        let (_, ctx) = parse_line("prn #1048575", Pass::First);
        assert!(ctx.errors.is_empty());

        let (_, ctx) = parse_line("prn #1048576", Pass::First);
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::ImmediateOutOfBounds)
        );

        let (_, ctx) = parse_line("prn #-1048576", Pass::First);
        assert!(ctx.errors.is_empty());

        let (_, ctx) = parse_line("prn #-1048577", Pass::First);
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::ImmediateOutOfBounds)
        );
    }

    #[test]
    fn data_directive_counts_its_cells() {
        let (parsed, ctx) = parse_dir_line("LIST: .data 6, -9, 15");
        assert!(ctx.errors.is_empty());
        let parsed = parsed.unwrap();
        assert!(parsed.label.is_some());
        assert_eq!(parsed.word_count, 3);
    }

    #[test]
    fn string_directive_counts_the_terminator() {
        let (parsed, ctx) = parse_dir_line(".string \"abcdef\"");
        assert!(ctx.errors.is_empty());
        assert_eq!(parsed.unwrap().word_count, 7);
    }

    #[test]
    fn entry_and_extern_occupy_no_words() {
        let (parsed, _) = parse_dir_line(".entry MAIN");
        assert_eq!(parsed.unwrap().word_count, 0);
        let (parsed, _) = parse_dir_line(".extern X");
        assert_eq!(parsed.unwrap().word_count, 0);
    }

    #[test]
    fn data_comma_discipline() {
        let (parsed, ctx) = parse_dir_line(".data 1 2");
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::DataIllegalComma));

        let (parsed, ctx) = parse_dir_line(".data 1,, 2");
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::MultipleCommas));

        let (parsed, ctx) = parse_dir_line(".data , 1");
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::DataIllegalComma));

        let (parsed, ctx) = parse_dir_line(".data 1, 2,");
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::DataIllegalComma));
    }

    #[test]
    fn data_values_are_range_checked() {
        let (_, ctx) = parse_dir_line(".data 1048576");
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::ImmediateOutOfBounds)
        );

        let (_, ctx) = parse_dir_line(".data x");
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::InvalidData));
    }

    #[test]
    fn string_quote_discipline() {
        let (parsed, ctx) = parse_dir_line(".string AB\"");
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::StringMissingQuote));

        let (parsed, ctx) = parse_dir_line(".string , \"AB\"");
        assert!(parsed.is_none());
        assert!(ctx.errors.iter().any(|e| e.kind == ErrorKind::StringIllegalComma));
    }

    #[test]
    fn missing_dot_before_directive() {
        let (parsed, ctx) = parse_dir_line("LIST: data 4");
        assert!(parsed.is_none());
        assert!(
            ctx.errors
                .iter()
                .any(|e| e.kind == ErrorKind::DirectiveDotMissing)
        );
    }
}
