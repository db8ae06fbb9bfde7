//! Codec for the `"column"='value' ` tuple format carried in pending-data rows.
//!
//! Each column is written as a double-quoted name, an `=`, and an optional
//! single-quoted value followed by one space. A missing value means SQL NULL.
//! Inside a value `''` stands for `'` and `\\` stands for `\`.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::UpdaterError;

/// Column name → value, `None` for SQL NULL.
pub type Row = BTreeMap<String, Option<String>>;

/// Decodes one tuple-log line into a column map.
pub fn decode(data: &str) -> Result<Row, UpdaterError> {
    let mut row = Row::new();
    let chars: Vec<char> = data.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        // tolerate padding between tokens
        if chars[pos].is_whitespace() {
            pos += 1;
            continue;
        }
        if chars[pos] != '"' {
            return Err(malformed(pos, format!("expected '\"', found '{}'", chars[pos])));
        }
        let name_start = pos + 1;
        let name_end = chars[name_start..]
            .iter()
            .position(|&c| c == '"')
            .map(|offset| name_start + offset)
            .ok_or_else(|| malformed(pos, "unterminated column name".to_string()))?;
        if name_end == name_start {
            return Err(malformed(pos, "empty column name".to_string()));
        }
        let name: String = chars[name_start..name_end].iter().collect();
        pos = name_end + 1;

        if chars.get(pos) == Some(&'=') {
            pos += 1;
        }

        let value = if chars.get(pos) == Some(&'\'') {
            let (value, next) = decode_value(&chars, pos)?;
            pos = next;
            Some(value)
        } else {
            None
        };

        match chars.get(pos) {
            None => {}
            Some(' ') => pos += 1,
            Some(c) => {
                return Err(malformed(
                    pos,
                    format!("expected ' ' after column \"{}\", found '{}'", name, c),
                ))
            }
        }

        row.insert(name, value);
    }

    Ok(row)
}

/// Reads a quoted value starting at the opening quote. Returns the unescaped
/// value and the position just past the closing quote.
fn decode_value(chars: &[char], open: usize) -> Result<(String, usize), UpdaterError> {
    let mut value = String::new();
    let mut pos = open + 1;
    loop {
        match chars.get(pos) {
            None => return Err(malformed(open, "unterminated quoted value".to_string())),
            Some('\'') if chars.get(pos + 1) == Some(&'\'') => {
                value.push('\'');
                pos += 2;
            }
            Some('\'') => return Ok((value, pos + 1)),
            Some('\\') if chars.get(pos + 1) == Some(&'\\') => {
                value.push('\\');
                pos += 2;
            }
            Some(&c) => {
                value.push(c);
                pos += 1;
            }
        }
    }
}

/// Encodes a column map into the tuple-log format accepted by [`decode`].
pub fn encode(row: &Row) -> String {
    let mut out = String::new();
    for (name, value) in row {
        match value {
            Some(v) => {
                let escaped = v.replace('\\', "\\\\").replace('\'', "''");
                let _ = write!(out, "\"{}\"='{}' ", name, escaped);
            }
            None => {
                let _ = write!(out, "\"{}\"= ", name);
            }
        }
    }
    out
}

fn malformed(position: usize, message: String) -> UpdaterError {
    UpdaterError::TupleLog { position, message }
}
