//! Bearer credential selection for forwarded requests
//!
//! Pure precedence logic, kept free of configuration and environment state so
//! it is testable in isolation: the caller's own credential wins, then the
//! process-wide fallback, then nothing (the backend applies its default-access
//! policy when no credential arrives).

/// Select the bearer credential to attach to a forwarded request
pub fn select_bearer(request: Option<&str>, fallback: Option<&str>) -> Option<String> {
    request
        .filter(|c| !c.is_empty())
        .or_else(|| fallback.filter(|c| !c.is_empty()))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_credential_wins() {
        assert_eq!(
            select_bearer(Some("caller-token"), Some("fallback-token")),
            Some("caller-token".to_string())
        );
    }

    #[test]
    fn test_fallback_used_when_no_request_credential() {
        assert_eq!(
            select_bearer(None, Some("fallback-token")),
            Some("fallback-token".to_string())
        );
    }

    #[test]
    fn test_none_when_neither_set() {
        assert_eq!(select_bearer(None, None), None);
    }

    #[test]
    fn test_empty_strings_treated_as_absent() {
        assert_eq!(
            select_bearer(Some(""), Some("fallback-token")),
            Some("fallback-token".to_string())
        );
        assert_eq!(select_bearer(Some(""), Some("")), None);
    }
}
