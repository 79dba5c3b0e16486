//! Keypath utilities.
//!
//! A keypath addresses a value in a nested model: `a.b[0].c`, `foo["bar"]`,
//! `items.3.name`. Internally a keypath is a list of string segments; array
//! indices are plain decimal segments (`"0"`, `"12"`).
//!
//! # Example
//!
//! ```
//! use tether_keypath::{join_keypath, split_keypath};
//!
//! let segments = split_keypath("a.b[0].c").unwrap();
//! assert_eq!(segments, vec!["a", "b", "0", "c"]);
//!
//! assert_eq!(join_keypath(&segments), "a.b.0.c");
//! ```

use thiserror::Error;

pub mod pattern;
pub use pattern::{is_related, WILDCARD};

pub mod validate;
pub use validate::{validate_keypath, validate_segments, MAX_DEPTH, MAX_KEYPATH_LENGTH};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeypathError {
    #[error("empty segment at position {position}")]
    EmptySegment { position: usize },
    #[error("unterminated bracket starting at position {position}")]
    UnterminatedBracket { position: usize },
    #[error("invalid bracket member at position {position}")]
    InvalidBracketMember { position: usize },
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedCharacter { position: usize, found: char },
    #[error("dangling escape at end of keypath")]
    DanglingEscape,
    #[error("keypath is {length} bytes long; the limit is {MAX_KEYPATH_LENGTH}")]
    TooLong { length: usize },
    #[error("keypath has {depth} segments; the limit is {MAX_DEPTH}")]
    TooDeep { depth: usize },
}

/// Escapes a single key so it survives a join/split round trip.
///
/// `.`, `[`, `]` and `\` are prefixed with a backslash.
///
/// # Example
///
/// ```
/// use tether_keypath::escape_key;
///
/// assert_eq!(escape_key("a.b"), "a\\.b");
/// assert_eq!(escape_key("plain"), "plain");
/// ```
pub fn escape_key(key: &str) -> String {
    if !key.contains(['.', '[', ']', '\\']) {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len() + 2);
    for ch in key.chars() {
        if matches!(ch, '.' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Split a keypath into segments.
///
/// Accepts dotted segments, numeric brackets (`a[0]`), quoted brackets
/// (`a["b.c"]`, `a['b']`) and backslash-escaped characters. The empty
/// keypath is the root and splits to no segments.
///
/// # Errors
///
/// Returns [`KeypathError`] for empty segments (`a..b`, trailing `.`),
/// unterminated or malformed brackets, a trailing backslash, and keypaths
/// over the length or depth limits.
///
/// # Example
///
/// ```
/// use tether_keypath::split_keypath;
///
/// assert_eq!(split_keypath("").unwrap(), Vec::<String>::new());
/// assert_eq!(split_keypath("foo[\"bar\"][1]").unwrap(), vec!["foo", "bar", "1"]);
/// assert_eq!(split_keypath("a\\.b.c").unwrap(), vec!["a.b", "c"]);
/// assert!(split_keypath("a..b").is_err());
/// ```
pub fn split_keypath(keypath: &str) -> Result<Vec<String>, KeypathError> {
    validate_keypath(keypath)?;
    let mut out = Vec::new();
    if keypath.is_empty() {
        return Ok(out);
    }

    let chars: Vec<char> = keypath.chars().collect();
    let mut current = String::new();
    // true right after a closing bracket; a dot may then follow without a segment
    let mut after_bracket = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '\\' => {
                let next = chars.get(i + 1).ok_or(KeypathError::DanglingEscape)?;
                current.push(*next);
                after_bracket = false;
                i += 2;
            }
            '.' => {
                if current.is_empty() && !after_bracket {
                    return Err(KeypathError::EmptySegment { position: i });
                }
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                after_bracket = false;
                i += 1;
                if i == chars.len() {
                    return Err(KeypathError::EmptySegment { position: i });
                }
            }
            '[' => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                } else if i == 0 {
                    return Err(KeypathError::EmptySegment { position: 0 });
                }
                let (member, next) = read_bracket(&chars, i)?;
                out.push(member);
                after_bracket = true;
                i = next;
                if let Some(&following) = chars.get(i) {
                    if following != '.' && following != '[' {
                        return Err(KeypathError::UnexpectedCharacter {
                            position: i,
                            found: following,
                        });
                    }
                }
            }
            ']' => {
                return Err(KeypathError::UnexpectedCharacter {
                    position: i,
                    found: ']',
                });
            }
            _ => {
                current.push(ch);
                after_bracket = false;
                i += 1;
            }
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    validate_segments(&out)?;
    Ok(out)
}

/// Reads a bracket member starting at `open` (the `[`). Returns the member
/// and the index just past the closing `]`.
fn read_bracket(chars: &[char], open: usize) -> Result<(String, usize), KeypathError> {
    let mut i = open + 1;
    let first = *chars
        .get(i)
        .ok_or(KeypathError::UnterminatedBracket { position: open })?;

    if first == '"' || first == '\'' {
        let quote = first;
        let mut member = String::new();
        i += 1;
        loop {
            let ch = *chars
                .get(i)
                .ok_or(KeypathError::UnterminatedBracket { position: open })?;
            if ch == '\\' {
                let next = chars.get(i + 1).ok_or(KeypathError::DanglingEscape)?;
                member.push(*next);
                i += 2;
                continue;
            }
            if ch == quote {
                break;
            }
            member.push(ch);
            i += 1;
        }
        // past the closing quote
        i += 1;
        match chars.get(i) {
            Some(']') => Ok((member, i + 1)),
            Some(_) => Err(KeypathError::InvalidBracketMember { position: open }),
            None => Err(KeypathError::UnterminatedBracket { position: open }),
        }
    } else {
        let mut member = String::new();
        while let Some(&ch) = chars.get(i) {
            if ch == ']' {
                if !is_integer(&member) {
                    return Err(KeypathError::InvalidBracketMember { position: open });
                }
                return Ok((member, i + 1));
            }
            member.push(ch);
            i += 1;
        }
        Err(KeypathError::UnterminatedBracket { position: open })
    }
}

/// Join segments into a canonical dotted keypath, escaping where needed.
///
/// Returns an empty string for the root.
///
/// # Example
///
/// ```
/// use tether_keypath::join_keypath;
///
/// assert_eq!(join_keypath(&[]), "");
/// assert_eq!(join_keypath(&["a".to_string(), "0".to_string()]), "a.0");
/// assert_eq!(join_keypath(&["a.b".to_string()]), "a\\.b");
/// ```
pub fn join_keypath(segments: &[String]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&escape_key(segment));
    }
    out
}

/// Check if a segment is a canonical array index (no sign, no leading zeros).
///
/// # Example
///
/// ```
/// use tether_keypath::is_valid_index;
///
/// assert!(is_valid_index("0"));
/// assert!(is_valid_index("123"));
/// assert!(!is_valid_index("01"));
/// assert!(!is_valid_index("-1"));
/// assert!(!is_valid_index("length"));
/// ```
pub fn is_valid_index(index: &str) -> bool {
    if index.is_empty() {
        return false;
    }
    let bytes = index.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' {
        return false;
    }
    bytes.iter().all(|&b| b.is_ascii_digit())
}

/// Parse a segment as an array index.
pub fn parse_index(segment: &str) -> Option<usize> {
    if is_valid_index(segment) {
        segment.parse().ok()
    } else {
        None
    }
}

fn is_integer(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.bytes().all(|b| b.is_ascii_digit())
}
