/// Maximum length of an account id.
const MAX_ID_LEN: usize = 128;

/// Validate an identifier used as an account id or other slug-like key.
///
/// Accepts ASCII alphanumerics plus `-`, `_`, `.`, `@` and `+` so email
/// addresses work as account ids. Surrounding whitespace is trimmed.
pub fn validate_id_slug(value: &str, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(format!("{field} must be at most {MAX_ID_LEN} characters"));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+')))
    {
        return Err(format!("{field} contains invalid character '{bad}'"));
    }
    Ok(trimmed.to_string())
}

/// Validate a trimmed string's length in characters, returning the trimmed value.
pub fn validate_bounded_string(
    value: &str,
    field: &str,
    min: usize,
    max: usize,
) -> Result<String, String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min {
        return Err(format!("{field} must be at least {min} characters"));
    }
    if len > max {
        return Err(format!("{field} must be at most {max} characters"));
    }
    Ok(trimmed.to_string())
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_slug_accepts_emails() {
        assert_eq!(
            validate_id_slug(" me+work@example.com ", "account_id").unwrap(),
            "me+work@example.com"
        );
        assert_eq!(validate_id_slug("personal", "account_id").unwrap(), "personal");
    }

    #[test]
    fn test_validate_id_slug_rejects_blank() {
        assert!(validate_id_slug("", "account_id").is_err());
        assert!(validate_id_slug("   \t", "account_id").is_err());
    }

    #[test]
    fn test_validate_id_slug_rejects_separators() {
        let err = validate_id_slug("gmail:work", "account_id").unwrap_err();
        assert!(err.contains("':'"));
        assert!(validate_id_slug("../etc", "account_id").is_err());
    }

    #[test]
    fn test_validate_bounded_string() {
        assert_eq!(validate_bounded_string("  hi ", "title", 1, 10).unwrap(), "hi");
        assert!(validate_bounded_string("   ", "title", 1, 10).is_err());
        assert!(validate_bounded_string("abcdef", "title", 1, 3).is_err());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
