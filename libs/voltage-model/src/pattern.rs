//! Glob key patterns with wildcard captures
//!
//! Key patterns use the store's glob dialect: `*` matches any run of
//! characters (including `:`) and `?` matches exactly one character. Every
//! other character is literal. Each `*` is a capture group, numbered from 1
//! in left-to-right order.
//!
//! Templates are the inverse: [`render`] substitutes captures back into a
//! key. `{1}`, `{2}`... pick captures explicitly; a template without numbered
//! placeholders consumes captures in order, one per `*`.

use crate::error::{ModelError, Result};
use regex::Regex;
use std::fmt;

/// Compiled glob pattern
#[derive(Clone)]
pub struct KeyPattern {
    raw: String,
    regex: Regex,
    wildcards: usize,
}

impl KeyPattern {
    /// Compile a glob pattern
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(ModelError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        let mut regex_pattern = String::with_capacity(pattern.len() * 2 + 2);
        regex_pattern.push('^');
        let mut wildcards = 0;
        let mut literal = String::new();

        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    regex_pattern.push_str(&regex::escape(&literal));
                    literal.clear();
                    if ch == '*' {
                        // Lazy so that `a:*:*` splits `a:1:2:3` as ("1", "2:3")
                        regex_pattern.push_str("(.*?)");
                        wildcards += 1;
                    } else {
                        regex_pattern.push('.');
                    }
                },
                _ => literal.push(ch),
            }
        }
        regex_pattern.push_str(&regex::escape(&literal));
        regex_pattern.push('$');

        let regex = Regex::new(&regex_pattern).map_err(|e| ModelError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
            wildcards,
        })
    }

    /// Original glob text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains `*` or `?`
    pub fn has_wildcards(&self) -> bool {
        self.wildcards > 0 || self.raw.contains('?')
    }

    /// Number of `*` capture groups
    pub fn capture_count(&self) -> usize {
        self.wildcards
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Match `key` and return the text captured by each `*`
    pub fn captures(&self, key: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(key)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One-off glob test; invalid patterns never match
pub fn glob_match(pattern: &str, text: &str) -> bool {
    KeyPattern::new(pattern)
        .map(|p| p.is_match(text))
        .unwrap_or(false)
}

/// Substitute captures into a key template
///
/// ```
/// use voltage_model::render;
///
/// let caps = vec!["1001".to_string(), "T".to_string()];
/// assert_eq!(render("inst:{2}:{1}", &caps).unwrap(), "inst:T:1001");
/// assert_eq!(render("inst:*:*", &caps).unwrap(), "inst:1001:T");
/// assert_eq!(render("fixed:key", &caps).unwrap(), "fixed:key");
/// ```
pub fn render(template: &str, captures: &[String]) -> Result<String> {
    if has_numbered_placeholder(template) {
        render_numbered(template, captures)
    } else {
        render_sequential(template, captures)
    }
}

fn has_numbered_placeholder(template: &str) -> bool {
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b'}' {
                return true;
            }
        }
        i += 1;
    }
    false
}

fn render_numbered(template: &str, captures: &[String]) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();

        if !digits.is_empty() && after[digits.len()..].starts_with('}') {
            let index: usize = digits.parse().map_err(|_| ModelError::InvalidPattern {
                pattern: template.to_string(),
                reason: format!("placeholder index '{}' out of range", digits),
            })?;
            let value = index
                .checked_sub(1)
                .and_then(|i| captures.get(i))
                .ok_or_else(|| ModelError::MissingCapture {
                    template: template.to_string(),
                    index,
                    available: captures.len(),
                })?;
            out.push_str(value);
            rest = &after[digits.len() + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn render_sequential(template: &str, captures: &[String]) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut next = 0;

    for ch in template.chars() {
        if ch == '*' {
            let value = captures.get(next).ok_or_else(|| ModelError::MissingCapture {
                template: template.to_string(),
                index: next + 1,
                available: captures.len(),
            })?;
            out.push_str(value);
            next += 1;
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let p = KeyPattern::new("comsrv:1001:T").unwrap();
        assert!(!p.has_wildcards());
        assert!(p.is_match("comsrv:1001:T"));
        assert!(!p.is_match("comsrv:1001:TT"));
        assert_eq!(p.captures("comsrv:1001:T").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = KeyPattern::new("a.b+(c)[d]:*").unwrap();
        assert!(p.is_match("a.b+(c)[d]:x"));
        assert!(!p.is_match("aXb+(c)[d]:x"));
    }

    #[test]
    fn test_star_captures_in_order() {
        let p = KeyPattern::new("comsrv:*:*").unwrap();
        assert_eq!(p.capture_count(), 2);
        assert_eq!(p.captures("comsrv:1001:T").unwrap(), vec!["1001", "T"]);
        // Lazy first capture
        assert_eq!(p.captures("comsrv:1:2:3").unwrap(), vec!["1", "2:3"]);
        assert!(p.captures("modsrv:1:T").is_none());
    }

    #[test]
    fn test_question_mark_matches_single_char() {
        let p = KeyPattern::new("dev:?").unwrap();
        assert!(p.has_wildcards());
        assert!(p.is_match("dev:1"));
        assert!(!p.is_match("dev:12"));
        assert_eq!(p.capture_count(), 0);
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(matches!(
            KeyPattern::new(""),
            Err(ModelError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_render_numbered_placeholders() {
        let caps = vec!["a".to_string(), "b".to_string()];
        assert_eq!(render("x:{2}:{1}:{2}", &caps).unwrap(), "x:b:a:b");
        assert!(matches!(
            render("x:{3}", &caps),
            Err(ModelError::MissingCapture { index: 3, .. })
        ));
        assert!(render("x:{0}", &caps).is_err());
    }

    #[test]
    fn test_render_keeps_non_placeholder_braces() {
        let caps = vec!["7".to_string()];
        assert_eq!(render("{name}:{1}", &caps).unwrap(), "{name}:7");
    }

    #[test]
    fn test_render_sequential_requires_enough_captures() {
        let caps = vec!["1".to_string()];
        assert_eq!(render("inst:*:M", &caps).unwrap(), "inst:1:M");
        assert!(render("inst:*:*", &caps).is_err());
    }

    #[test]
    fn test_glob_match_helper() {
        assert!(glob_match("temp_*", "temp_sensor"));
        assert!(!glob_match("temp_*", "humidity"));
        assert!(!glob_match("", "anything"));
    }
}
