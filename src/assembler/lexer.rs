//! Line tokenization and context-sensitive token classification
//!
//! A token starts out [`TokenKind::Unknown`] and is refined twice: once by
//! table lookup against the ISA, and once more from the context of the
//! whole line (a name in front of a colon is a label, a number behind `#`
//! is an immediate, and so on). Whatever is still unknown after both
//! passes is invalid and reported.

use regex::Regex;

use super::error::{ErrorKind, ErrorSink};
use super::isa;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Invalid,
    Unknown,
    Comma,
    Dot,
    Colon,
    Amper,
    Hash,
    Quote,
    Instruction,
    Register,
    StringLiteral,
    Immediate,
    Identifier,
    Label,
    DirectiveData,
    DirectiveString,
    DirectiveEntry,
    DirectiveExtern,
}

/// Byte range of a token within its line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One token: its kind, the line it came from and where it sits on it.
/// Tokens never own text; [`Token::text`] resolves the slice against the
/// expanded-line buffer of the owning context.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub line_number: usize,
    pub span: Span,
}

impl Token {
    pub fn text<'a>(&self, lines: &'a [String]) -> &'a str {
        &lines[self.line_number - 1][self.span.start..self.span.end]
    }

    pub fn len(&self) -> usize {
        self.span.end - self.span.start
    }

    pub fn is_empty(&self) -> bool {
        self.span.start == self.span.end
    }
}

/// Splits expanded lines into tokens
pub struct Lexer {
    pattern: Regex,
}

impl Lexer {
    pub fn new() -> Lexer {
        // A special character on its own, or a maximal run of anything else
        Lexer {
            pattern: Regex::new(r#"[,.:&#"]|[^,.:&#"\s]+"#).unwrap(),
        }
    }

    /// Tokenize one expanded line, fully classified. The caller appends
    /// the result to the context's cumulative token buffer.
    pub fn tokenize_line(
        &self,
        lines: &[String],
        line_number: usize,
        errors: &mut ErrorSink,
        ir_filename: &str,
    ) -> Vec<Token> {
        let line = &lines[line_number - 1];
        let mut tokens: Vec<Token> = self
            .pattern
            .find_iter(line)
            .map(|mat| Token {
                kind: identify(mat.as_str()),
                line_number,
                span: Span { start: mat.start(), end: mat.end() },
            })
            .collect();

        resolve_context(&mut tokens, errors, ir_filename);

        for token in tokens.iter_mut() {
            if token.kind == TokenKind::Unknown {
                token.kind = TokenKind::Invalid;
                errors.report(
                    ErrorKind::InvalidToken,
                    format!(
                        "{}:{}: Invalid token '{}'",
                        ir_filename,
                        line_number,
                        token.text(lines)
                    ),
                );
            }
        }

        tokens
    }
}

impl Default for Lexer {
    fn default() -> Lexer {
        Lexer::new()
    }
}

/// Primary classification by exact lookup against the ISA tables
fn identify(text: &str) -> TokenKind {
    let mut chars = text.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if isa::is_special_char(c) {
            return match c {
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                ':' => TokenKind::Colon,
                '&' => TokenKind::Amper,
                '#' => TokenKind::Hash,
                _ => TokenKind::Quote,
            };
        }
    }

    if isa::is_instruction(text) {
        TokenKind::Instruction
    } else if isa::is_register(text) {
        TokenKind::Register
    } else if let Some(directive) = isa::find_directive(text) {
        match directive {
            isa::Directive::Data => TokenKind::DirectiveData,
            isa::Directive::String => TokenKind::DirectiveString,
            isa::Directive::Entry => TokenKind::DirectiveEntry,
            isa::Directive::Extern => TokenKind::DirectiveExtern,
        }
    } else if is_identifier(text) {
        TokenKind::Identifier
    } else {
        TokenKind::Unknown
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Second refinement pass over a completed line, left to right
fn resolve_context(tokens: &mut [Token], errors: &mut ErrorSink, ir_filename: &str) {
    for i in 0..tokens.len() {
        let kind = tokens[i].kind;
        let prev = i.checked_sub(1).map(|p| tokens[p]);
        let next = tokens.get(i + 1).copied();

        // The name in front of a colon is a label
        if prev.is_some() && kind == TokenKind::Colon {
            tokens[i - 1].kind = TokenKind::Label;
        }

        if let Some(prev) = prev
            && prev.kind == TokenKind::Colon
            && kind == TokenKind::Dot
        {
            // A directive's dot glued onto the label's colon
            if prev.span.end == tokens[i].span.start {
                errors.report(
                    ErrorKind::LabelMissingSpace,
                    format!(
                        "{}:{}: Invalid label name - missing whitespace between colon and directive",
                        ir_filename, tokens[i].line_number
                    ),
                );
            }
        } else if next.is_some() && kind == TokenKind::Hash {
            tokens[i + 1].kind = TokenKind::Immediate;
        } else if kind == TokenKind::Comma
            && prev.is_some_and(|p| p.kind == TokenKind::Immediate)
            && next.is_some_and(|n| n.kind == TokenKind::Unknown)
        {
            // A bare value carried along an immediate list
            tokens[i + 1].kind = TokenKind::Immediate;
        } else if kind == TokenKind::Comma
            && prev.is_some_and(|p| p.kind == TokenKind::StringLiteral)
            && next.is_some_and(|n| n.kind == TokenKind::Unknown)
        {
            tokens[i + 1].kind = TokenKind::StringLiteral;
        } else if prev.is_some_and(|p| p.kind == TokenKind::Quote)
            && next.is_some_and(|n| n.kind == TokenKind::Quote)
        {
            tokens[i].kind = TokenKind::StringLiteral;
        } else if kind == TokenKind::DirectiveData {
            // Everything after `.data` except the commas is a value
            for token in tokens[i + 1..].iter_mut() {
                if token.kind != TokenKind::Comma {
                    token.kind = TokenKind::Immediate;
                }
            }
            break;
        }
    }
}
