//! Single-line `key=value` property encoding used on the command channel.
//!
//! Pairs are separated by spaces. Values that are empty or contain
//! whitespace, `=`, or `"` are double-quoted, with `\"` and `\\` escapes.

use crate::error::GateError;

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"' || c == '\\')
}

/// Encode pairs as one line, without the trailing newline.
pub fn encode<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(key.as_ref());
        out.push('=');
        let value = value.as_ref();
        if needs_quotes(value) {
            out.push('"');
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out
}

/// Parse one line into pairs, preserving order.
///
/// A bare key with no `=` yields an empty value.
pub fn parse(line: &str) -> Result<Vec<(String, String)>, GateError> {
    let mut pairs = Vec::new();
    let mut chars = line.trim().chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => break,
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => value.push(c),
                    }
                }
                if !closed {
                    return Err(GateError::InvalidInput(format!(
                        "unterminated quoted value for '{key}'"
                    )));
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        if key.is_empty() {
            return Err(GateError::InvalidInput(format!("missing key in '{line}'")));
        }
        pairs.push((key, value));
    }

    Ok(pairs)
}

/// First value stored under `key`.
pub fn get<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
