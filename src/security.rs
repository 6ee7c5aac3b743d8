//! Security filter (C11): the first stage of every adapter pipeline. Fails
//! closed — any uncertainty about a request's safety results in rejection,
//! never in revealing which rule fired to the client.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SecurityConfig;
use crate::error::{Error, Result, SecurityReason};

static SCRIPT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script.*?>.*?</script>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z][a-z0-9]*\b[^>]*>").unwrap());
static DANGEROUS_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(javascript|vbscript):").unwrap());

static ATTACK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(\bunion\b.{1,20}\bselect\b|\bor\b\s+1\s*=\s*1|;\s*drop\s+table)").unwrap(),
        Regex::new(r"\.\./|\.\.\\").unwrap(),
        Regex::new(r"(?i)on\w+\s*=\s*['\x22]").unwrap(),
    ]
});

pub struct SecurityFilter {
    config: SecurityConfig,
}

impl SecurityFilter {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    /// Blocks by deny list, or (if an allow list is configured) admits only
    /// addresses on it.
    pub fn check_ip(&self, remote_ip: &str) -> Result<()> {
        if self.config.blocked_ips.iter().any(|ip| ip == remote_ip) {
            return Err(Error::Security(SecurityReason::IpBlocked));
        }
        if !self.config.allowed_ips.is_empty() && !self.config.allowed_ips.iter().any(|ip| ip == remote_ip) {
            return Err(Error::Security(SecurityReason::IpNotAllowed));
        }
        Ok(())
    }

    pub fn check_size(&self, byte_len: usize) -> Result<()> {
        if byte_len > self.config.max_request_size {
            return Err(Error::Security(SecurityReason::RequestTooLarge));
        }
        Ok(())
    }

    /// Strips dangerous HTML/script content from a string. Idempotent:
    /// `sanitize(sanitize(s)) == sanitize(s)`.
    pub fn sanitize_str(&self, input: &str) -> String {
        if !self.config.sanitize_input {
            return input.to_string();
        }
        let without_script = SCRIPT_TAG.replace_all(input, "");
        let without_tags = HTML_TAG.replace_all(&without_script, "");
        DANGEROUS_SCHEME.replace_all(&without_tags, "").into_owned()
    }

    /// Recursively sanitizes every string leaf of a JSON value.
    pub fn sanitize_value(&self, value: &serde_json::Value) -> serde_json::Value {
        if !self.config.sanitize_input {
            return value.clone();
        }
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.sanitize_str(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.sanitize_value(v))).collect(),
            ),
            other => other.clone(),
        }
    }

    /// Detects known attack fragments in the textual form of a payload.
    /// Checked case-insensitively against compiled-once patterns.
    pub fn check_attack_patterns(&self, text: &str) -> Result<()> {
        if !self.config.block_suspicious_patterns {
            return Ok(());
        }
        if ATTACK_PATTERNS.iter().any(|re| re.is_match(text)) {
            return Err(Error::Security(SecurityReason::SuspiciousPattern));
        }
        Ok(())
    }

    /// Full pipeline entry point: IP, size, then attack-pattern check against
    /// the raw payload's serialized form, then sanitize. Returns the
    /// sanitized value for downstream processing.
    pub fn filter(&self, remote_ip: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        self.check_ip(remote_ip)?;

        let serialized = serde_json::to_string(payload).unwrap_or_default();
        self.check_size(serialized.len())?;
        self.check_attack_patterns(&serialized)?;

        Ok(self.sanitize_value(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SecurityConfig {
        SecurityConfig {
            max_request_size: 1024,
            allowed_ips: vec![],
            blocked_ips: vec!["10.0.0.1".to_string()],
            sanitize_input: true,
            block_suspicious_patterns: true,
        }
    }

    #[test]
    fn blocked_ip_is_rejected() {
        let filter = SecurityFilter::new(config());
        assert!(filter.check_ip("10.0.0.1").is_err());
        assert!(filter.check_ip("10.0.0.2").is_ok());
    }

    #[test]
    fn allow_list_restricts_to_listed_ips() {
        let filter = SecurityFilter::new(SecurityConfig {
            allowed_ips: vec!["10.0.0.5".to_string()],
            ..config()
        });
        assert!(filter.check_ip("10.0.0.5").is_ok());
        assert!(filter.check_ip("10.0.0.6").is_err());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let filter = SecurityFilter::new(config());
        assert!(filter.check_size(1024).is_ok());
        assert!(filter.check_size(1025).is_err());
    }

    #[test]
    fn sanitize_strips_script_and_html() {
        let filter = SecurityFilter::new(config());
        let out = filter.sanitize_str("<script>alert(1)</script>hello<b>world</b>");
        assert_eq!(out, "helloworld");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let filter = SecurityFilter::new(config());
        let input = "<script>bad()</script><img onerror='x'>javascript:alert(1)";
        let once = filter.sanitize_str(input);
        let twice = filter.sanitize_str(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn attack_pattern_detection_catches_sql_and_path_traversal() {
        let filter = SecurityFilter::new(config());
        assert!(filter.check_attack_patterns("1 OR 1=1").is_err());
        assert!(filter.check_attack_patterns("../../etc/passwd").is_err());
        assert!(filter.check_attack_patterns("hello world").is_ok());
    }

    #[test]
    fn sanitize_recurses_into_nested_objects() {
        let filter = SecurityFilter::new(config());
        let value = serde_json::json!({"a": "<script>x</script>clean", "b": ["<b>x</b>"]});
        let sanitized = filter.sanitize_value(&value);
        assert_eq!(sanitized["a"], "clean");
        assert_eq!(sanitized["b"][0], "x");
    }
}
