//! Wire data model shared by the broker, the bus client and the router.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The universal carrier on the bus. See the data model section of the
/// project spec: `message_id` is unique, `timestamp` is set once at creation,
/// `message_type` doubles as the topic string carried alongside the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub metadata: EnvelopeMetadata,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub message_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl MessageEnvelope {
    pub fn new(source: impl Into<String>, message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            metadata: EnvelopeMetadata {
                message_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                source: source.into(),
                message_type: message_type.into(),
                version: default_version(),
                attributes: BTreeMap::new(),
            },
            payload,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.attributes.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.attributes.get("correlation_id").map(|s| s.as_str())
    }

    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// A topic is a `/`-delimited string. `.` is normalized to `/` before any
/// broker-side filtering or client-side wildcard matching, so the two
/// notations are interchangeable at every call site.
pub fn normalize_topic(topic: &str) -> String {
    topic.replace('.', "/")
}

/// Splits a normalized topic into its `/`-delimited segments.
pub fn segments(topic: &str) -> Vec<&str> {
    normalize_segments(topic)
}

fn normalize_segments(topic: &str) -> Vec<&str> {
    topic.split('/').filter(|s| !s.is_empty()).collect()
}

/// Validates a subscription pattern and rejects ambiguous combinations of
/// `*`/`**`, per Open Question 1's resolution: a pattern is rejected if any
/// segment is neither a literal, a bare `*`, nor a bare `**`.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    let normalized = normalize_topic(pattern);
    for seg in normalized.split('/').filter(|s| !s.is_empty()) {
        if seg.contains('*') && seg != "*" && seg != "**" {
            return Err(format!(
                "ambiguous wildcard segment '{seg}' in pattern '{pattern}': \
                 only bare '*' or '**' segments are allowed"
            ));
        }
    }
    Ok(())
}

/// `*` matches exactly one segment; `**` matches zero or more segments.
/// Matching is recursive/backtracking to support `**` in any position.
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    let pattern_segs = normalize_segments(&normalize_topic(pattern));
    let topic_segs = normalize_segments(&normalize_topic(topic));
    match_parts(&pattern_segs, &topic_segs)
}

fn match_parts(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((head, rest)) if *head == "**" => {
            if match_parts(rest, topic) {
                return true;
            }
            if let Some((_, topic_rest)) = topic.split_first() {
                return match_parts(pattern, topic_rest);
            }
            false
        }
        Some((head, rest)) => match topic.split_first() {
            Some((t_head, topic_rest)) if *head == "*" || head == t_head => {
                match_parts(rest, topic_rest)
            }
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_matches_one_segment() {
        assert!(pattern_matches("logs/*", "logs/security"));
        assert!(!pattern_matches("logs/*", "logs/auth/login"));
    }

    #[test]
    fn double_star_matches_zero_or_more() {
        assert!(pattern_matches("logs/**", "logs"));
        assert!(pattern_matches("logs/**", "logs/security"));
        assert!(pattern_matches("logs/**", "logs/auth/login"));
    }

    #[test]
    fn literal_segments_must_match_exactly() {
        assert!(pattern_matches("api/users/create", "api/users/create"));
        assert!(!pattern_matches("api/users/create", "api/users/delete"));
    }

    #[test]
    fn dotted_and_slashed_notation_are_interchangeable() {
        assert!(pattern_matches("api.users.*", "api/users/create"));
    }

    #[test]
    fn rejects_mixed_star_segment() {
        assert!(validate_pattern("logs/*foo").is_err());
        assert!(validate_pattern("logs/**bar").is_err());
    }

    #[test]
    fn accepts_unambiguous_patterns() {
        assert!(validate_pattern("a/*/c").is_ok());
        assert!(validate_pattern("a/**").is_ok());
        assert!(validate_pattern("logs/**").is_ok());
    }
}
