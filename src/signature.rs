//! Go-flavored function signature tokenizer
//!
//! Extracts parameter names and normalized base types from stored signature
//! strings. The tokenizer operates on whatever text the parsers captured;
//! malformed input yields an empty list, never an error.
//!
//! Termination: every scanning loop advances its index unconditionally,
//! including across nested parentheses (`map[string]func()` and friends seek
//! to the matching closer and resume).

use serde::{Deserialize, Serialize};

/// A single parameter with its normalized base type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_name: String,
}

/// Parse a Go-style signature into its ordered parameter list.
///
/// A leading receiver clause is skipped. Grouped declarations
/// (`a, b int`) are handled by processing right-to-left: a parameter with
/// only a name inherits the type most recently parsed on its right.
pub fn parse_go_params(signature: &str) -> Vec<Param> {
    let inner = match params_group(signature) {
        Some(inner) => inner,
        None => return Vec::new(),
    };
    if inner.trim().is_empty() {
        return Vec::new();
    }

    let segments = split_top_level(inner);
    let mut params = Vec::with_capacity(segments.len());
    let mut inherited_type: Option<String> = None;

    for segment in segments.iter().rev() {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match split_name_and_type(segment) {
            Some((name, raw_type)) => {
                let normalized = normalize_type_name(raw_type);
                inherited_type = Some(normalized.clone());
                params.push(Param {
                    name: name.to_string(),
                    type_name: normalized,
                });
            }
            None => {
                // Name-only segment from a grouped declaration
                params.push(Param {
                    name: segment.to_string(),
                    type_name: inherited_type.clone().unwrap_or_default(),
                });
            }
        }
    }

    params.reverse();
    params
}

/// Extract normalized return types from a Go-style signature.
///
/// Handles the bare single return (`... ) error`), the parenthesized tuple
/// (`... ) (int, error)`), and the absent case.
pub fn parse_go_returns(signature: &str) -> Vec<String> {
    let inner_end = match params_group_end(signature) {
        Some(end) => end,
        None => return Vec::new(),
    };
    let tail = signature[inner_end..].trim();
    if tail.is_empty() || tail.starts_with('{') {
        return Vec::new();
    }
    let tail = tail.trim_end_matches('{').trim();
    if tail.is_empty() {
        return Vec::new();
    }

    if let Some(rest) = tail.strip_prefix('(') {
        let inner = match seek_matching(rest, b'(', b')') {
            Some(close) => &rest[..close],
            None => rest,
        };
        split_top_level(inner)
            .iter()
            .filter_map(|seg| {
                let seg = seg.trim();
                if seg.is_empty() {
                    return None;
                }
                // Named returns carry a name token; normalize the type side
                match split_name_and_type(seg) {
                    Some((_, raw)) => Some(normalize_type_name(raw)),
                    None => Some(normalize_type_name(seg)),
                }
            })
            .collect()
    } else {
        vec![normalize_type_name(tail)]
    }
}

/// Normalize a raw type expression to its base identifier.
///
/// Strips leading `*`, `[]`, and `...`; a remainder starting with `func`
/// collapses to `"func"`; a package qualifier is dropped (the substring
/// after the last `.` is kept).
pub fn normalize_type_name(raw: &str) -> String {
    let mut s = raw.trim();
    loop {
        if let Some(rest) = s.strip_prefix('*') {
            s = rest.trim_start();
        } else if let Some(rest) = s.strip_prefix("[]") {
            s = rest.trim_start();
        } else if let Some(rest) = s.strip_prefix("...") {
            s = rest.trim_start();
        } else {
            break;
        }
    }

    if is_func_type(s) {
        return "func".to_string();
    }

    let base: String = s
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    let base = base.trim_end_matches('.');
    match base.rfind('.') {
        Some(dot) => base[dot + 1..].to_string(),
        None => base.to_string(),
    }
}

fn is_func_type(s: &str) -> bool {
    match s.strip_prefix("func") {
        Some(rest) => rest
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true),
        None => false,
    }
}

/// Locate the parameter list, skipping the receiver clause when present
fn params_group(signature: &str) -> Option<&str> {
    let (start, len) = params_group_span(signature)?;
    Some(&signature[start..start + len])
}

/// Byte offset just past the closing paren of the parameter list
fn params_group_end(signature: &str) -> Option<usize> {
    let (start, len) = params_group_span(signature)?;
    Some(start + len + 1)
}

fn params_group_span(signature: &str) -> Option<(usize, usize)> {
    let bytes = signature.as_bytes();
    let first_open = signature.find('(')?;
    let first_close = seek_matching(&signature[first_open + 1..], b'(', b')')?;
    let first_inner = (first_open + 1, first_close);

    // If an identifier followed by another group comes after the first
    // group, the first group was a receiver clause.
    let mut i = first_open + 1 + first_close + 1;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let ident_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i > ident_start && i < bytes.len() && bytes[i] == b'(' {
        let second_close = seek_matching(&signature[i + 1..], b'(', b')')?;
        return Some((i + 1, second_close));
    }
    Some(first_inner)
}

/// Find the byte offset of the closer matching an already-consumed opener.
/// Scans forward unconditionally; nested openers of any bracket kind are
/// balanced on the way.
fn seek_matching(s: &str, open: u8, close: u8) -> Option<usize> {
    let mut depth = 1usize;
    for (i, b) in s.bytes().enumerate() {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split at commas that sit at bracket depth zero
fn split_top_level(s: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                segments.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&s[start..]);
    segments
}

/// Split a parameter segment into (name, raw type) at the first top-level
/// whitespace. Returns None for a name-only segment.
fn split_name_and_type(segment: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, b) in segment.bytes().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b' ' | b'\t' if depth == 0 => {
                let name = segment[..i].trim();
                let raw_type = segment[i..].trim();
                if name.is_empty() || raw_type.is_empty() {
                    return None;
                }
                return Some((name, raw_type));
            }
            _ => {}
        }
    }
    None
}
