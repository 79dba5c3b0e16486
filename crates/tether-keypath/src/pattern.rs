//! Wildcard keypath patterns (`items.*`, `users.*.name`).

/// Segment that matches any single key.
pub const WILDCARD: &str = "*";

/// Check if one keypath is a prefix of the other, honouring wildcards in
/// `pattern`. A change at `keypath` may affect the value seen at `pattern`
/// exactly when the two are related.
///
/// # Example
///
/// ```
/// use tether_keypath::{is_related, split_keypath};
///
/// let pattern = split_keypath("items.*.name").unwrap();
/// assert!(is_related(&pattern, &split_keypath("items").unwrap()));
/// assert!(is_related(&pattern, &split_keypath("items.2.name.first").unwrap()));
/// assert!(!is_related(&pattern, &split_keypath("other").unwrap()));
/// ```
pub fn is_related(pattern: &[String], keypath: &[String]) -> bool {
    pattern
        .iter()
        .zip(keypath)
        .all(|(p, k)| p == WILDCARD || p == k)
}
