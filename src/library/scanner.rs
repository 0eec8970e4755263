//! Textual `#include` scanning
//!
//! No preprocessing happens here: conditional includes and comments are not
//! interpreted, every line carrying the marker counts.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

pub const INCLUDE_MARKER: &str = "#include";

/// Lazily yields the raw include targets of a file
pub struct IncludeScanner<R> {
    reader: R,
    buf: Vec<u8>,
    marker: String,
}

impl IncludeScanner<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?), INCLUDE_MARKER))
    }
}

impl<R: BufRead> IncludeScanner<R> {
    pub fn new(reader: R, marker: &str) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            marker: marker.to_string(),
        }
    }
}

impl<R: BufRead> Iterator for IncludeScanner<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            self.buf.clear();
            // Read errors end the scan; invalid UTF-8 is replaced, not fatal
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&self.buf);
            if let Some(idx) = line.find(&self.marker) {
                let target = line[idx + self.marker.len()..].trim();
                if !target.is_empty() {
                    return Some(target.to_string());
                }
            }
        }
    }
}

/// Header named between `"..."` or `<...>`; anything after the closing
/// delimiter (a trailing comment) is ignored. An unclosed delimiter leaves
/// the target as is.
pub fn strip_delimiters(target: &str) -> &str {
    let target = target.trim();
    let close = match target.chars().next() {
        Some('"') => '"',
        Some('<') => '>',
        _ => return target.split_whitespace().next().unwrap_or(target),
    };
    match target[1..].find(close) {
        Some(end) => target[1..1 + end].trim(),
        None => target,
    }
}

/// `foo.h` -> `libfoo`; nested headers like `sys/foo.h` name no library
pub fn library_name(header: &str) -> Option<String> {
    if header.is_empty() || header.contains('/') || header.contains('\\') {
        return None;
    }
    let base = match header.find(".h") {
        Some(idx) => &header[..idx],
        None => header,
    };
    if base.is_empty() {
        None
    } else {
        Some(format!("lib{}", base))
    }
}
