//! The four textual artifacts: expanded listing, object image, entry
//! table and external-reference table
//!
//! Rendering is split from writing so the formats can be checked without
//! a filesystem. Write failures are printed directly; by the time these
//! run the per-file error sink has already been judged empty.

use std::fs;

use crate::logging;

use super::Context;
use super::error::{Error, ErrorKind};
use super::isa;

/// Swap the extension of `base.as` for another one
fn with_extension(filename: &str, extension: &str) -> String {
    match filename.rfind('.') {
        Some(dot) => format!("{}{}", &filename[..dot], extension),
        None => format!("{filename}{extension}"),
    }
}

fn write_file(path: &str, contents: &str) {
    if let Err(err) = fs::write(path, contents) {
        let error = Error::new(
            ErrorKind::FileOpen,
            format!("Failed to write file '{path}': {err}"),
        );
        logging::error(&error.to_string());
    }
}

/// The expanded listing, one normalized statement per line
pub fn render_ir(ctx: &Context) -> String {
    ctx.expanded_lines
        .iter()
        .map(|line| format!("{line}\n"))
        .collect()
}

/// The object image: a length header, then one `address value` line per
/// word, code first, data after
pub fn render_object(ctx: &Context) -> String {
    let code_length = ctx.ic - isa::INITIAL_IC - ctx.dc;
    let mut out = format!("     {} {}\n", code_length, ctx.dc);
    for word in ctx.code_image.iter().chain(ctx.data_image.iter()) {
        out.push_str(&format!("{:07} {:06x}\n", word.address, word.value));
    }
    out
}

/// Exported symbols with their definition addresses
pub fn render_entries(ctx: &Context) -> String {
    ctx.entries
        .iter()
        .map(|symbol| format!("{} {:07}\n", symbol.name, symbol.address))
        .collect()
}

/// External references, one line per use site
pub fn render_externals(ctx: &Context) -> String {
    ctx.externals
        .iter()
        .map(|symbol| format!("{} {:07}\n", symbol.name, symbol.address))
        .collect()
}

/// Write the `.am` listing after a clean preprocessor run
pub fn write_ir(ctx: &Context) {
    write_file(&ctx.ir_filename, &render_ir(ctx));
}

/// Write `.ob`, and `.ent`/`.ext` when there is anything to put in them
pub fn write_artifacts(ctx: &Context) {
    write_file(&with_extension(&ctx.filename, ".ob"), &render_object(ctx));

    if !ctx.entries.is_empty() {
        write_file(&with_extension(&ctx.filename, ".ent"), &render_entries(ctx));
    }
    if !ctx.externals.is_empty() {
        write_file(&with_extension(&ctx.filename, ".ext"), &render_externals(ctx));
    }
}
