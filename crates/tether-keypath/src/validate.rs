//! Size limits applied to every keypath before and after splitting.

use crate::KeypathError;

/// Maximum allowed keypath string length, in bytes.
pub const MAX_KEYPATH_LENGTH: usize = 1024;

/// Maximum allowed number of segments.
pub const MAX_DEPTH: usize = 256;

/// Validate a keypath string.
///
/// # Errors
///
/// Returns [`KeypathError::TooLong`] if the keypath exceeds
/// [`MAX_KEYPATH_LENGTH`].
///
/// # Example
///
/// ```
/// use tether_keypath::validate_keypath;
///
/// validate_keypath("").unwrap();
/// validate_keypath("foo.bar").unwrap();
/// validate_keypath(&"a".repeat(2000)).unwrap_err();
/// ```
pub fn validate_keypath(keypath: &str) -> Result<(), KeypathError> {
    if keypath.len() > MAX_KEYPATH_LENGTH {
        return Err(KeypathError::TooLong {
            length: keypath.len(),
        });
    }
    Ok(())
}

/// Validate split segments.
///
/// # Errors
///
/// Returns [`KeypathError::TooDeep`] if there are more than [`MAX_DEPTH`]
/// segments.
///
/// # Example
///
/// ```
/// use tether_keypath::validate_segments;
///
/// validate_segments(&["foo".to_string(), "bar".to_string()]).unwrap();
/// validate_segments(&(0..300).map(|i| i.to_string()).collect::<Vec<_>>()).unwrap_err();
/// ```
pub fn validate_segments(path: &[String]) -> Result<(), KeypathError> {
    if path.len() > MAX_DEPTH {
        return Err(KeypathError::TooDeep { depth: path.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split_keypath;

    #[test]
    fn test_long_keypath_is_rejected_by_split() {
        let long = "a.".repeat(600) + "a";
        assert_eq!(
            split_keypath(&long),
            Err(KeypathError::TooLong { length: 1201 })
        );
    }

    #[test]
    fn test_depth_limit() {
        let path: Vec<String> = (0..MAX_DEPTH).map(|i| i.to_string()).collect();
        assert!(validate_segments(&path).is_ok());

        // 257 one-byte segments fit the length limit but not the depth limit
        let deep = vec!["a"; MAX_DEPTH + 1].join(".");
        assert_eq!(
            split_keypath(&deep),
            Err(KeypathError::TooDeep { depth: MAX_DEPTH + 1 })
        );
    }
}
