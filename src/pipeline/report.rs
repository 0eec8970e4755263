//! Post-link reporting: failed-link diagnosis and image size parsing

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

pub const TOO_BIG: &str = "Your program is too big for the memory model selected in the project.";
pub const SEE_MESSAGES: &str = "Click error or warning messages above to debug.";

fn undefined_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)undefined reference to [`']([^`']+)'").expect("valid regex")
    })
}

/// Advisory lines derived from the captured output of a failed build
pub fn diagnose(output: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let lower = output.to_lowercase();

    if lower.contains("error:") {
        lines.push(SEE_MESSAGES.to_string());
    }

    for captures in undefined_reference().captures_iter(output) {
        let symbol = &captures[1];
        // The compiler prefixes C names with one underscore
        let symbol = symbol.strip_prefix('_').unwrap_or(symbol);
        let line = format!(
            "Check source for bad function call or global variable name {}",
            symbol
        );
        if !lines.contains(&line) {
            lines.push(line);
        }
    }

    if lower.contains("overflowed by") || lower.contains("relocation overflows") {
        lines.push(TOO_BIG.to_string());
    }

    lines
}

/// Program size from `objdump -h`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    /// Bytes loaded into the target
    pub code_size: u64,
    /// Bytes of every allocated section
    pub total_size: u64,
}

impl SizeReport {
    /// Sums section sizes from a section header listing.
    ///
    /// A header line (`idx name size vma lma off align`) is followed by its
    /// flag line (`CONTENTS, ALLOC, LOAD, ...`).
    pub fn parse(objdump: &str) -> Option<Self> {
        let mut report = SizeReport::default();
        let mut pending: Option<u64> = None;
        let mut seen = false;

        for line in objdump.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 3 && fields[0].parse::<u32>().is_ok() {
                pending = u64::from_str_radix(fields[2], 16).ok();
                continue;
            }
            if let Some(size) = pending.take() {
                let flags: Vec<&str> = line.split(',').map(str::trim).collect();
                if flags.contains(&"ALLOC") {
                    report.total_size += size;
                    seen = true;
                }
                if flags.contains(&"LOAD") {
                    report.code_size += size;
                }
            }
        }

        if !seen {
            return None;
        }
        if report.code_size == 0 {
            report.code_size = report.total_size;
        }
        Some(report)
    }
}
