//! Identity normalization
//!
//! Every community is keyed by a normalized identity. Extraction, store
//! replay, and verification responses all pass through [`normalize_identity`]
//! so the same community can never appear under two spellings.

/// Minimum identity length accepted by the upstream site
pub const MIN_IDENTITY_LEN: usize = 3;

/// Maximum identity length accepted by the upstream site
pub const MAX_IDENTITY_LEN: usize = 21;

/// Normalizes a raw key into an identity
///
/// # Normalization Steps
///
/// 1. Trim surrounding whitespace
/// 2. Strip a leading `/r/` or `r/` prefix and any trailing `/`
/// 3. Lowercase
/// 4. Reject anything outside `[a-z0-9_]` or outside 3..=21 characters
///
/// # Returns
///
/// * `Some(String)` - The normalized identity
/// * `None` - The key cannot be an identity
///
/// # Examples
///
/// ```
/// use redlist::identity::normalize_identity;
///
/// assert_eq!(normalize_identity("/r/AskReddit/"), Some("askreddit".to_string()));
/// assert_eq!(normalize_identity("ab"), None);
/// ```
pub fn normalize_identity(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("/r/")
        .or_else(|| trimmed.strip_prefix("r/"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let len = stripped.chars().count();
    if !(MIN_IDENTITY_LEN..=MAX_IDENTITY_LEN).contains(&len) {
        return None;
    }

    if !stripped
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }

    Some(stripped.to_ascii_lowercase())
}

/// Checks whether a string is already a normalized identity
pub fn is_normalized(identity: &str) -> bool {
    normalize_identity(identity).as_deref() == Some(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_folding() {
        assert_eq!(normalize_identity("AskReddit"), Some("askreddit".to_string()));
        assert_eq!(normalize_identity("NSFW_GIF"), Some("nsfw_gif".to_string()));
    }

    #[test]
    fn test_prefix_stripping() {
        assert_eq!(normalize_identity("/r/pics"), Some("pics".to_string()));
        assert_eq!(normalize_identity("r/pics/"), Some("pics".to_string()));
        assert_eq!(normalize_identity("  space  "), Some("space".to_string()));
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(normalize_identity("ab"), None);
        assert!(normalize_identity("abc").is_some());
        assert!(normalize_identity("a23456789012345678901").is_some());
        assert_eq!(normalize_identity("a234567890123456789012"), None);
    }

    #[test]
    fn test_charset() {
        assert_eq!(normalize_identity("foo-bar"), None);
        assert_eq!(normalize_identity("foo.bar"), None);
        assert_eq!(normalize_identity("föö"), None);
        assert_eq!(normalize_identity(""), None);
    }

    #[test]
    fn test_is_normalized() {
        assert!(is_normalized("askreddit"));
        assert!(!is_normalized("AskReddit"));
        assert!(!is_normalized("/r/askreddit"));
    }
}
