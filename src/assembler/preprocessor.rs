//! Macro expansion and source normalization
//!
//! The preprocessor walks the raw source line by line with a two-state
//! machine. Outside a macro it expands calls and copies lines through;
//! between `mcro NAME` and `mcroend` it collects the body. Comments and
//! blank lines are dropped, and runs of whitespace collapse to a single
//! space, so later stages only ever see normalized statements.

use std::collections::HashMap;

use super::Context;
use super::error::ErrorKind;
use super::isa;

const MACRO_DEF: &str = "mcro";
const MACRO_END: &str = "mcroend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    InMacro,
}

/// Per-file macro expansion state
struct Preprocessor {
    state: State,
    macros: HashMap<String, String>,
    /// Body lines of the macro currently being collected
    body: Vec<String>,
    /// The `mcro NAME` line that opened it, and where it was
    header: String,
    header_line: usize,
}

impl Preprocessor {
    fn new() -> Preprocessor {
        Preprocessor {
            state: State::Default,
            macros: HashMap::new(),
            body: Vec::new(),
            header: String::new(),
            header_line: 0,
        }
    }
}

/// Expand `source` into the context's line buffer, collecting macro
/// errors along the way
pub fn expand_source(ctx: &mut Context, source: &str) {
    let mut pp = Preprocessor::new();

    for (index, raw) in source.lines().enumerate() {
        let line_number = index + 1;

        if raw.chars().count() > isa::MAX_LINE_LEN {
            ctx.errors.report(
                ErrorKind::MaxLineLength,
                format!(
                    "{}:{}: Line exceeds maximum length of {} characters",
                    ctx.filename,
                    line_number,
                    isa::MAX_LINE_LEN
                ),
            );
        }

        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        match pp.state {
            State::Default => {
                if is_macro_def(line) {
                    pp.state = State::InMacro;
                    pp.header = normalize(line);
                    pp.header_line = line_number;
                    pp.body.clear();
                } else if let Some(body) = macro_body(&pp, line) {
                    // Call site: substitute the body verbatim
                    for body_line in body.lines() {
                        ctx.expanded_lines.push(body_line.to_string());
                    }
                } else {
                    ctx.expanded_lines.push(normalize(line));
                }
            }
            State::InMacro => {
                if is_macro_end(line) {
                    pp.state = State::Default;
                    define_macro(&mut pp, ctx, &normalize(line), line_number);
                } else {
                    pp.body.push(normalize(line));
                }
            }
        }
    }
}

/// A `mcro` header, which is anything starting with the keyword that is
/// not a `mcroend`. A glued name like `mcroX` still opens a macro so the
/// missing space can be diagnosed.
fn is_macro_def(line: &str) -> bool {
    line.starts_with(MACRO_DEF) && !line.starts_with(MACRO_END)
}

fn is_macro_end(line: &str) -> bool {
    line.starts_with(MACRO_END)
}

/// The body of the called macro, if the line's first word names one
fn macro_body<'a>(pp: &'a Preprocessor, line: &str) -> Option<&'a String> {
    let first_word = line.split_whitespace().next()?;
    pp.macros.get(first_word)
}

/// Close the macro under construction: validate it and, if every check
/// passed, record it for expansion
fn define_macro(pp: &mut Preprocessor, ctx: &mut Context, end_line: &str, end_line_number: usize) {
    let name = validate_macro(pp, ctx, end_line, end_line_number);
    let body = std::mem::take(&mut pp.body).join("\n");

    if let Some(name) = name {
        pp.macros.insert(name, body);
    }
}

/// Run every check on the collected macro. Returns the macro name only
/// if no error was reported; each failed check reports and moves on so a
/// single definition can surface several problems.
fn validate_macro(
    pp: &Preprocessor,
    ctx: &mut Context,
    end_line: &str,
    end_line_number: usize,
) -> Option<String> {
    let reported_before = ctx.errors.len();

    let rest = &pp.header[MACRO_DEF.len()..];
    if !rest.starts_with(' ') {
        ctx.errors.report(
            ErrorKind::MacroSpaceMissing,
            format!(
                "{}:{}: Missing space between '{}' and macro name: '{}'",
                ctx.filename, pp.header_line, MACRO_DEF, pp.header
            ),
        );
    }

    let mut words = rest.trim_start().split(' ');
    let name = words.next().unwrap_or("").to_string();
    if words.next().is_some() {
        ctx.errors.report(
            ErrorKind::MacroHeaderExtraChars,
            format!(
                "{}:{}: Macro definition contains extra characters: '{}'",
                ctx.filename, pp.header_line, pp.header
            ),
        );
    }

    if end_line.len() > MACRO_END.len() {
        ctx.errors.report(
            ErrorKind::MacroHeaderExtraChars,
            format!(
                "{}:{}: Macro end contains extra characters: '{}'",
                ctx.filename, end_line_number, end_line
            ),
        );
    }

    if name.is_empty() {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!("{}:{}: Macro name is empty", ctx.filename, pp.header_line),
        );
    } else if name.chars().count() > isa::MAX_NAME_LEN {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!(
                "{}:{}: Macro name exceeds maximum length of {} characters",
                ctx.filename,
                pp.header_line,
                isa::MAX_NAME_LEN
            ),
        );
    }

    if pp.macros.contains_key(&name) {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!(
                "{}:{}: Macro name already defined: '{}'",
                ctx.filename, pp.header_line, name
            ),
        );
    }

    match name.chars().next() {
        Some(first) if first.is_ascii_digit() => {
            ctx.errors.report(
                ErrorKind::MacroNameInvalid,
                format!(
                    "{}:{}: Macro name cannot start with a digit: '{}'",
                    ctx.filename, pp.header_line, name
                ),
            );
        }
        Some(first) if first.is_ascii_uppercase() => {
            ctx.errors.report(
                ErrorKind::MacroNameInvalid,
                format!(
                    "{}:{}: Macro name cannot start with an uppercase letter: '{}'",
                    ctx.filename, pp.header_line, name
                ),
            );
        }
        _ => {}
    }

    if name
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '_')
    {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!(
                "{}:{}: Invalid character in macro name: '{}'",
                ctx.filename, pp.header_line, name
            ),
        );
    }

    if isa::is_instruction(&name) {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!(
                "{}:{}: Macro name conflicts with instruction name: '{}'",
                ctx.filename, pp.header_line, name
            ),
        );
    } else if isa::is_register(&name) {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!(
                "{}:{}: Macro name conflicts with register name: '{}'",
                ctx.filename, pp.header_line, name
            ),
        );
    } else if isa::is_directive(&name) {
        ctx.errors.report(
            ErrorKind::MacroNameInvalid,
            format!(
                "{}:{}: Macro name conflicts with directive name: '{}'",
                ctx.filename, pp.header_line, name
            ),
        );
    }

    if ctx.errors.len() == reported_before {
        Some(name)
    } else {
        None
    }
}

/// Collapse runs of spaces and tabs into single spaces. The input is
/// already trimmed.
fn normalize(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_whitespace = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_whitespace {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(c);
            in_whitespace = false;
        }
    }
    out
}
