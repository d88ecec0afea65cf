//! Content rules applied to a submitted value before it reaches any panel.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What a configured validation pattern does to a submitted value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexPolicy {
    /// The value must match somewhere; it is submitted unchanged.
    #[default]
    Match,
    /// The value must match; only the matched part is submitted (capture
    /// group 1 when the pattern defines one, otherwise the whole match).
    Extract,
}

impl RegexPolicy {
    /// Parse the database representation; unknown values fall back to `Match`.
    pub fn from_db(value: &str) -> Self {
        match value {
            "extract" => Self::Extract,
            _ => Self::Match,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Extract => "extract",
        }
    }
}

/// Compile a stored pattern, reporting a bad pattern as a validation error.
pub fn compile_pattern(pattern: &str) -> Result<Regex, CoreError> {
    Regex::new(pattern)
        .map_err(|e| CoreError::Validation(format!("Invalid pattern '{pattern}': {e}")))
}

/// Apply an environment's validation pattern to `value`.
///
/// Returns the value to carry forward, `Ok(None)` when the value does not
/// match, or an error when the pattern itself is invalid. A missing or blank
/// pattern accepts everything.
pub fn apply_pattern(
    pattern: Option<&str>,
    policy: RegexPolicy,
    value: &str,
) -> Result<Option<String>, CoreError> {
    let pattern = match pattern.map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(Some(value.to_string())),
    };
    let re = compile_pattern(pattern)?;

    match policy {
        RegexPolicy::Match => Ok(re.is_match(value).then(|| value.to_string())),
        RegexPolicy::Extract => Ok(re.captures(value).map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        })),
    }
}

/// Whether a submitted value is blank.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn no_pattern_accepts_anything() {
        assert_eq!(
            apply_pattern(None, RegexPolicy::Match, "abc").unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(
            apply_pattern(Some("  "), RegexPolicy::Extract, "abc").unwrap(),
            Some("abc".to_string())
        );
    }

    #[test]
    fn match_policy_keeps_value() {
        let out = apply_pattern(Some(r"pt_key=\w+"), RegexPolicy::Match, "pt_key=abc;pt_pin=x;");
        assert_eq!(out.unwrap(), Some("pt_key=abc;pt_pin=x;".to_string()));
    }

    #[test]
    fn match_policy_rejects_mismatch() {
        let out = apply_pattern(Some(r"^\d+$"), RegexPolicy::Match, "12a");
        assert_eq!(out.unwrap(), None);
    }

    #[test]
    fn extract_policy_uses_first_group() {
        let out = apply_pattern(
            Some(r"pt_pin=([^;]+);"),
            RegexPolicy::Extract,
            "junk pt_pin=jd_123; more",
        );
        assert_eq!(out.unwrap(), Some("jd_123".to_string()));
    }

    #[test]
    fn extract_policy_without_group_uses_whole_match() {
        let out = apply_pattern(Some(r"\d{4}"), RegexPolicy::Extract, "code: 98765");
        assert_eq!(out.unwrap(), Some("9876".to_string()));
    }

    #[test]
    fn invalid_pattern_is_validation_error() {
        let out = apply_pattern(Some("(unclosed"), RegexPolicy::Match, "x");
        assert_matches!(out, Err(CoreError::Validation(_)));
    }

    #[test]
    fn policy_round_trips_through_db_strings() {
        assert_eq!(RegexPolicy::from_db("extract"), RegexPolicy::Extract);
        assert_eq!(RegexPolicy::from_db("match"), RegexPolicy::Match);
        assert_eq!(RegexPolicy::from_db("unknown"), RegexPolicy::Match);
        assert_eq!(RegexPolicy::Extract.as_str(), "extract");
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(""));
        assert!(is_blank("  \t\n"));
        assert!(!is_blank(" x "));
    }
}
