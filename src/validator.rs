//! Message validator (C9): schema-checks envelopes against a registry of
//! per-topic field requirements before they reach the authorizer/router.
//!
//! Full JSON-Schema validation is out of scope for the gateway core (the
//! domain handlers that own each topic's payload shape are external
//! collaborators per the project's scope boundary); what the gateway itself
//! owns is the envelope-level contract: non-empty `message_type`, and, for
//! topics with a registered schema, presence and type of the declared
//! required fields.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::bus::envelope::{pattern_matches, MessageEnvelope};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSchema {
    pub pattern: String,
    pub required_fields: Vec<FieldSpec>,
}

/// Registry of per-topic schemas, consulted by longest-registered-pattern
/// match (first registered pattern that matches, checked in insertion order
/// is sufficient here since the registry is small and operator-curated).
pub struct MessageValidator {
    schemas: DashMap<String, TopicSchema>,
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageValidator {
    pub fn new() -> Self {
        Self { schemas: DashMap::new() }
    }

    pub fn register_schema(&self, schema: TopicSchema) {
        self.schemas.insert(schema.pattern.clone(), schema);
    }

    fn schema_for(&self, topic: &str) -> Option<TopicSchema> {
        self.schemas
            .iter()
            .find(|entry| pattern_matches(&entry.value().pattern, topic))
            .map(|entry| entry.value().clone())
    }

    pub fn validate(&self, envelope: &MessageEnvelope) -> Result<()> {
        if envelope.metadata.message_type.trim().is_empty() {
            return Err(Error::Validation("message_type must not be empty".to_string()));
        }

        let Some(schema) = self.schema_for(&envelope.metadata.message_type) else {
            return Ok(());
        };

        let payload = envelope.payload.as_object().ok_or_else(|| {
            Error::Validation(format!(
                "payload for topic '{}' must be a JSON object",
                envelope.metadata.message_type
            ))
        })?;

        for field in &schema.required_fields {
            match payload.get(&field.name) {
                None => {
                    return Err(Error::Validation(format!(
                        "missing required field '{}' for topic '{}'",
                        field.name, envelope.metadata.message_type
                    )))
                }
                Some(value) if !field.field_type.matches(value) => {
                    return Err(Error::Validation(format!(
                        "field '{}' for topic '{}' has the wrong type",
                        field.name, envelope.metadata.message_type
                    )))
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Convenience builder for registering the gateway's own auth-endpoint
/// payload shapes; domain topics register their own schemas at startup.
pub fn default_schemas() -> BTreeMap<&'static str, Vec<FieldSpec>> {
    let mut map = BTreeMap::new();
    map.insert(
        "api/auth/authenticate",
        vec![FieldSpec {
            name: "user_uuid".to_string(),
            field_type: FieldType::String,
        }],
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_type_is_rejected() {
        let validator = MessageValidator::new();
        let mut envelope = MessageEnvelope::new("test", "api/echo", serde_json::json!({}));
        envelope.metadata.message_type = "  ".to_string();
        assert!(validator.validate(&envelope).is_err());
    }

    #[test]
    fn unregistered_topic_passes_through() {
        let validator = MessageValidator::new();
        let envelope = MessageEnvelope::new("test", "api/echo", serde_json::json!({"anything": 1}));
        assert!(validator.validate(&envelope).is_ok());
    }

    #[test]
    fn registered_schema_enforces_required_fields() {
        let validator = MessageValidator::new();
        validator.register_schema(TopicSchema {
            pattern: "api/users/*".to_string(),
            required_fields: vec![FieldSpec {
                name: "user_uuid".to_string(),
                field_type: FieldType::String,
            }],
        });

        let missing = MessageEnvelope::new("test", "api/users/create", serde_json::json!({}));
        assert!(validator.validate(&missing).is_err());

        let present = MessageEnvelope::new(
            "test",
            "api/users/create",
            serde_json::json!({"user_uuid": "abc"}),
        );
        assert!(validator.validate(&present).is_ok());
    }

    #[test]
    fn registered_schema_enforces_field_type() {
        let validator = MessageValidator::new();
        validator.register_schema(TopicSchema {
            pattern: "api/users/*".to_string(),
            required_fields: vec![FieldSpec {
                name: "user_uuid".to_string(),
                field_type: FieldType::String,
            }],
        });

        let wrong_type = MessageEnvelope::new("test", "api/users/create", serde_json::json!({"user_uuid": 1}));
        assert!(validator.validate(&wrong_type).is_err());
    }
}
