//! Console reporting for the assembler driver
//!
//! Diagnostics accumulate in a per-file sink while a file is assembled;
//! these helpers give the flushed report its console form.

use colored::Colorize;

/// Print one diagnostic line to stderr under the standard `error:` tag
pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

/// Print the banner line that frames a per-file error report
pub fn report_banner() {
    eprintln!("{}", "==================== ERROR REPORT ====================".bold());
}
