//! Message router (C12): the request/response correlator. Binds a bus
//! client, maps external topics to internal ones, and matches asynchronous
//! responses back to the caller via a correlation id.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

use crate::bus::client::BusClient;
use crate::bus::envelope::MessageEnvelope;
use crate::config::RouterConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    pub success: bool,
    pub correlation_id: Uuid,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Set iff the failure was a router-side deadline expiry, so callers can
    /// surface `Error::Timeout` (→ 504) instead of a generic internal error.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    pub pending_count: usize,
    pub mapping_count: usize,
    pub timeout_secs: u64,
    pub max_message_size: usize,
}

enum Completion {
    Response(serde_json::Value),
    Error(String),
}

struct PendingRequest {
    sender: oneshot::Sender<Completion>,
}

/// Validates a topic_mapping table at load time: refuses configurations
/// where two prefix mappings share the same longest prefix for some topic,
/// since that tie is documented as undefined behavior callers must avoid.
fn check_mapping_collisions(mapping: &BTreeMap<String, String>) -> Result<()> {
    let prefixes: Vec<&String> = mapping.keys().filter(|k| k.ends_with('*')).collect();
    for (i, a) in prefixes.iter().enumerate() {
        for b in prefixes.iter().skip(i + 1) {
            if a.trim_end_matches('*') == b.trim_end_matches('*') {
                return Err(Error::Internal(format!(
                    "ambiguous topic mapping: '{a}' and '{b}' share the same prefix"
                )));
            }
        }
    }
    Ok(())
}

/// Resolves `external_topic` against `topic_mapping`: exact match wins over
/// any prefix rule; among prefix rules, the longest prefix wins.
fn resolve_mapping(mapping: &BTreeMap<String, String>, external_topic: &str) -> Option<String> {
    if let Some(target) = mapping.get(external_topic) {
        return Some(target.clone());
    }

    let mut best: Option<(&str, &str)> = None;
    for (pattern, target) in mapping.iter() {
        let Some(prefix) = pattern.strip_suffix('*') else { continue };
        if external_topic.starts_with(prefix) {
            let is_longer = best.map(|(p, _)| prefix.len() > p.len()).unwrap_or(true);
            if is_longer {
                best = Some((prefix, target));
            }
        }
    }

    best.map(|(prefix, target)| {
        if let Some(stripped) = target.strip_prefix("$strip:") {
            format!("{stripped}{}", &external_topic[prefix.len()..])
        } else {
            target.to_string()
        }
    })
}

pub struct MessageRouter {
    bus: BusClient,
    config: std::sync::RwLock<RouterConfig>,
    pending: Arc<DashMap<Uuid, PendingRequest>>,
}

impl MessageRouter {
    pub async fn new(bus: BusClient, config: RouterConfig) -> Result<Arc<Self>> {
        check_mapping_collisions(&config.topic_mapping)?;

        let router = Arc::new(Self {
            bus,
            config: std::sync::RwLock::new(config),
            pending: Arc::new(DashMap::new()),
        });

        router.subscribe_responses().await?;
        Ok(router)
    }

    async fn subscribe_responses(self: &Arc<Self>) -> Result<()> {
        for pattern in ["api/response/**", "system/error/**"] {
            let router = Arc::clone(self);
            let is_error = pattern.starts_with("system/error");
            self.bus
                .subscribe(
                    pattern,
                    Arc::new(move |envelope: MessageEnvelope| {
                        router.handle_response(envelope, is_error);
                    }),
                )
                .await?;
        }
        Ok(())
    }

    fn handle_response(&self, envelope: MessageEnvelope, is_error: bool) {
        let Some(correlation_id) = envelope.correlation_id().and_then(|s| s.parse::<Uuid>().ok()) else {
            tracing::warn!("response envelope missing or invalid correlation_id, dropping");
            return;
        };

        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            tracing::debug!(%correlation_id, "no pending request for correlation_id, dropping (duplicate or expired)");
            return;
        };

        let completion = if is_error {
            let message = envelope
                .payload
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("internal error")
                .to_string();
            Completion::Error(message)
        } else {
            Completion::Response(envelope.payload)
        };

        // Idempotent: the oneshot sender is consumed exactly once; a send
        // error here just means the caller already timed out.
        let _ = pending.sender.send(completion);
    }

    /// The central correlator: maps the topic, publishes with a fresh
    /// correlation id, and awaits the matching response until `deadline`.
    pub async fn route_message(&self, mut envelope: MessageEnvelope) -> Result<RoutingResult> {
        let (internal_topic, router_timeout, max_size) = {
            let config = self.config.read().unwrap();
            let internal_topic = resolve_mapping(&config.topic_mapping, &envelope.metadata.message_type)
                .ok_or_else(|| Error::NoRoute(envelope.metadata.message_type.clone()))?;
            (internal_topic, config.timeout(), config.max_message_size)
        };

        let size = envelope.serialized_len();
        if size > max_size {
            return Err(Error::MessageTooLarge(size, max_size));
        }

        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        // Registration must be visible before publish so a fast response
        // doesn't race ahead of it.
        self.pending.insert(correlation_id, PendingRequest { sender: tx });

        let external_topic = envelope.metadata.message_type.clone();
        envelope.metadata.source = "router".to_string();
        envelope.metadata.attributes.insert("correlation_id".to_string(), correlation_id.to_string());
        envelope.metadata.attributes.insert("external_topic".to_string(), external_topic);

        if let Err(e) = self.bus.publish_envelope(&internal_topic, envelope).await {
            self.pending.remove(&correlation_id);
            return Err(Error::PublishFailed(e.to_string()));
        }

        let result = timeout(router_timeout, rx).await;
        // Finalizer: always remove the pending entry regardless of outcome.
        self.pending.remove(&correlation_id);

        match result {
            Ok(Ok(Completion::Response(payload))) => Ok(RoutingResult {
                success: true,
                correlation_id,
                response: Some(payload),
                error: None,
                timed_out: false,
            }),
            Ok(Ok(Completion::Error(message))) => Ok(RoutingResult {
                success: false,
                correlation_id,
                response: None,
                error: Some(message),
                timed_out: false,
            }),
            Ok(Err(_)) => Ok(RoutingResult {
                success: false,
                correlation_id,
                response: None,
                error: Some("sender dropped before completion".to_string()),
                timed_out: false,
            }),
            Err(_) => Ok(RoutingResult {
                success: false,
                correlation_id,
                response: None,
                error: Some(format!("Request timeout after {}s", router_timeout.as_secs())),
                timed_out: true,
            }),
        }
    }

    pub fn add_topic_mapping(&self, external: impl Into<String>, internal: impl Into<String>) -> Result<()> {
        let mut config = self.config.write().unwrap();
        let mut candidate = config.topic_mapping.clone();
        candidate.insert(external.into(), internal.into());
        check_mapping_collisions(&candidate)?;
        config.topic_mapping = candidate;
        Ok(())
    }

    pub fn remove_topic_mapping(&self, external: &str) {
        self.config.write().unwrap().topic_mapping.remove(external);
    }

    pub fn get_routing_stats(&self) -> RoutingStats {
        let config = self.config.read().unwrap();
        RoutingStats {
            pending_count: self.pending.len(),
            mapping_count: config.topic_mapping.len(),
            timeout_secs: config.timeout_secs,
            max_message_size: config.max_message_size,
        }
    }

    /// Cancels all outstanding pending requests. Used on shutdown so
    /// in-flight callers get a terminal response rather than hanging.
    pub fn cleanup(&self) {
        for entry in self.pending.iter() {
            let _ = entry.value().sender.send(Completion::Error("ServerShuttingDown".to_string()));
        }
        self.pending.clear();
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::broker::Broker;
    use crate::config::BusConfig;

    fn router_config(mapping: &[(&str, &str)]) -> RouterConfig {
        RouterConfig {
            topic_mapping: mapping.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            timeout_secs: 1,
            max_message_size: 1024,
        }
    }

    async fn connected_client(bus_config: &BusConfig, name: &str) -> BusClient {
        let client = BusClient::new(bus_config.clone(), name);
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn collides_on_ambiguous_prefix_mappings_at_construction() {
        let bus_config = BusConfig {
            bind_host: "127.0.0.1".to_string(),
            pub_port: 18770,
            sub_port: 18772,
            reconnect_base_ms: 10,
            reconnect_cap_ms: 50,
        };
        let _broker = Broker::start(&bus_config.bind_host, bus_config.pub_port, bus_config.sub_port)
            .await
            .unwrap();

        let client = connected_client(&bus_config, "router-test").await;
        let mapping = router_config(&[("api/*", "internal/a"), ("api/*", "internal/b")]);
        let result = MessageRouter::new(client, mapping).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn route_message_matches_response_by_correlation_id() {
        let bus_config = BusConfig {
            bind_host: "127.0.0.1".to_string(),
            pub_port: 18773,
            sub_port: 18774,
            reconnect_base_ms: 10,
            reconnect_cap_ms: 50,
        };
        let broker = Broker::start(&bus_config.bind_host, bus_config.pub_port, bus_config.sub_port)
            .await
            .unwrap();

        let router_client = connected_client(&bus_config, "router").await;
        let router = MessageRouter::new(
            router_client,
            router_config(&[("api/echo", "internal/echo")]),
        )
        .await
        .unwrap();

        // Give the response subscription's filter a moment to register.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let responder = connected_client(&bus_config, "responder").await;
        responder
            .subscribe(
                "internal/echo",
                Arc::new({
                    let responder = responder.clone();
                    move |envelope: MessageEnvelope| {
                        let responder = responder.clone();
                        let correlation_id = envelope.correlation_id().unwrap().to_string();
                        let payload = envelope.payload.clone();
                        tokio::spawn(async move {
                            let response = MessageEnvelope::new("responder", "api/response/echo", payload)
                                .with_attribute("correlation_id", correlation_id);
                            responder.publish_envelope("api/response/echo", response).await.unwrap();
                        });
                    }
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let before = router.pending_count();
        let envelope = MessageEnvelope::new("client", "api/echo", serde_json::json!({"hello": "world"}));
        let result = router.route_message(envelope).await.unwrap();

        assert!(result.success);
        assert_eq!(result.response.unwrap()["hello"], "world");
        assert_eq!(router.pending_count(), before);

        broker.stop().await;
    }

    #[tokio::test]
    async fn route_message_times_out_with_no_responder() {
        let bus_config = BusConfig {
            bind_host: "127.0.0.1".to_string(),
            pub_port: 18775,
            sub_port: 18776,
            reconnect_base_ms: 10,
            reconnect_cap_ms: 50,
        };
        let broker = Broker::start(&bus_config.bind_host, bus_config.pub_port, bus_config.sub_port)
            .await
            .unwrap();

        let client = connected_client(&bus_config, "router").await;
        let router = MessageRouter::new(client, router_config(&[("api/lonely", "internal/lonely")]))
            .await
            .unwrap();

        let envelope = MessageEnvelope::new("client", "api/lonely", serde_json::json!({}));
        let before = router.pending_count();
        let result = router.route_message(envelope).await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timeout"));
        assert_eq!(router.pending_count(), before);

        broker.stop().await;
    }

    #[test]
    fn resolve_mapping_prefers_exact_over_prefix() {
        let mapping: BTreeMap<String, String> = [
            ("api/users/create".to_string(), "internal/exact".to_string()),
            ("api/*".to_string(), "internal/wildcard".to_string()),
        ]
        .into();
        assert_eq!(resolve_mapping(&mapping, "api/users/create").unwrap(), "internal/exact");
        assert_eq!(resolve_mapping(&mapping, "api/users/delete").unwrap(), "internal/wildcard");
    }

    #[test]
    fn resolve_mapping_prefers_longest_prefix() {
        let mapping: BTreeMap<String, String> = [
            ("api/*".to_string(), "internal/short".to_string()),
            ("api/users/*".to_string(), "internal/long".to_string()),
        ]
        .into();
        assert_eq!(resolve_mapping(&mapping, "api/users/create").unwrap(), "internal/long");
    }
}
