//! Line-oriented `key=value` properties text format.
//!
//! Reading follows the classic properties conventions:
//!
//! - `#` and `!` start comment lines; blank lines are skipped
//! - the key ends at the first unescaped `=`, `:` or whitespace
//! - a line ending in an odd number of backslashes continues on the next line
//! - `\t`, `\n`, `\r`, `\f` and `\uXXXX` escapes are decoded
//! - duplicate keys: the last one wins
//!
//! Writing escapes everything that would not survive a read, emits non-ASCII
//! characters as `\uXXXX`, and orders keys so rewrites produce stable diffs.

use std::collections::BTreeMap;

use chrono::Utc;

use super::Properties;

/// Errors produced while parsing properties text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A `\u` escape not followed by four hex digits.
    #[error("line {line}: malformed \\uxxxx encoding")]
    MalformedUnicodeEscape { line: usize },
}

/// Decode raw file bytes.
///
/// UTF-8 is tried first; anything that is not valid UTF-8 is read as
/// ISO-8859-1, which maps every byte to one character.
pub fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Parse properties text into a key/value map.
///
/// # Errors
///
/// Returns [`ParseError::MalformedUnicodeEscape`] if a `\u` escape is not
/// followed by four hexadecimal digits.
pub fn parse(text: &str) -> Result<Properties, ParseError> {
    let normalized = text.replace("\r\n", "\n");
    let mut lines = normalized.split(['\n', '\r']).enumerate();
    let mut entries = Properties::new();

    while let Some((index, natural)) = lines.next() {
        let line = natural.trim_start_matches(is_whitespace);
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let mut logical = line.to_string();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start_matches(is_whitespace)),
                None => break,
            }
        }

        let line_no = index + 1;
        let (key, value) = split_key_value(&logical);
        entries.insert(unescape(key, line_no)?, unescape(value, line_no)?);
    }

    Ok(entries)
}

/// Serialize a key/value map to properties text.
///
/// The output starts with an optional comment, followed by a timestamp
/// comment, followed by one `key=value` line per entry in key order. The
/// result is pure ASCII.
pub fn serialize(entries: &Properties, comment: Option<&str>) -> String {
    let ordered: BTreeMap<&String, &String> = entries.iter().collect();
    let mut out = String::new();

    if let Some(comment) = comment {
        for line in comment.lines() {
            out.push('#');
            out.push_str(&escape(line, false));
            out.push('\n');
        }
    }
    out.push('#');
    out.push_str(&Utc::now().format("%a %b %d %H:%M:%S UTC %Y").to_string());
    out.push('\n');

    for (key, value) in ordered {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push('\n');
    }

    out
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{0C}')
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
    trailing % 2 == 1
}

/// Split a logical line into its raw (still escaped) key and value.
fn split_key_value(line: &str) -> (&str, &str) {
    let mut key_end = line.len();
    let mut value_start = line.len();
    let mut has_separator = false;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                value_start = i + 1;
                has_separator = true;
                break;
            },
            c if is_whitespace(c) => {
                key_end = i;
                value_start = i + c.len_utf8();
                break;
            },
            _ => {},
        }
    }

    for c in line[value_start..].chars() {
        if is_whitespace(c) {
            // skip
        } else if !has_separator && (c == '=' || c == ':') {
            has_separator = true;
        } else {
            break;
        }
        value_start += c.len_utf8();
    }

    (&line[..key_end], &line[value_start..])
}

fn unescape(raw: &str, line: usize) -> Result<String, ParseError> {
    let mut out = String::with_capacity(raw.len());
    let mut units: Vec<u16> = Vec::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            flush_units(&mut units, &mut out);
            out.push(c);
            continue;
        }

        let Some(escaped) = chars.next() else {
            break;
        };
        if escaped == 'u' {
            let hex: String = chars.by_ref().take(4).collect();
            let unit = (hex.len() == 4)
                .then(|| u16::from_str_radix(&hex, 16).ok())
                .flatten()
                .ok_or(ParseError::MalformedUnicodeEscape { line })?;
            units.push(unit);
            continue;
        }

        flush_units(&mut units, &mut out);
        out.push(match escaped {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'f' => '\u{0C}',
            other => other,
        });
    }
    flush_units(&mut units, &mut out);

    Ok(out)
}

/// Decode pending `\uXXXX` code units; surrogate pairs combine, lone halves
/// become U+FFFD.
fn flush_units(units: &mut Vec<u16>, out: &mut String) {
    if units.is_empty() {
        return;
    }
    out.extend(char::decode_utf16(units.drain(..)).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)));
}

fn escape(text: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(text.len() * 2);

    for (i, c) in text.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            ' ' if i == 0 || is_key => out.push_str("\\ "),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{0C}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            },
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            },
            c => out.push(c),
        }
    }

    out
}
