//! Message Bus Client (C5).
//!
//! Connects to the broker's two ports, exposes `publish`/`subscribe`/
//! `unsubscribe`, and dispatches received envelopes to registered callbacks
//! serially on a single task per client (preserving per-topic order).
//! Grounded in the pre-distillation reference's `MessageBusClient`: separate
//! PUB/SUB sockets, client-side wildcard matching layered on top of the
//! broker's prefix filter, and exponential-backoff reconnection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::config::BusConfig;
use crate::error::{Error, Result};

use super::envelope::{normalize_topic, pattern_matches, validate_pattern, MessageEnvelope};
use super::wire::{codec, read_frame, write_frame, WireFrame};

pub type Callback = Arc<dyn Fn(MessageEnvelope) + Send + Sync>;

struct Subscription {
    pattern: String,
    callback: Callback,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionHandle(Uuid);

struct Inner {
    config: BusConfig,
    pub_stream: Mutex<Option<Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>>>,
    sub_stream: Mutex<Option<Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>>>,
    subscriptions: DashMap<SubscriptionHandle, Subscription>,
    connected: std::sync::atomic::AtomicBool,
}

/// A session connected to the broker. Cloning shares the underlying state
/// (`Arc`); safe for concurrent `publish` calls from multiple tasks.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<Inner>,
    source_name: String,
}

impl BusClient {
    pub fn new(config: BusConfig, source_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                pub_stream: Mutex::new(None),
                sub_stream: Mutex::new(None),
                subscriptions: DashMap::new(),
                connected: std::sync::atomic::AtomicBool::new(false),
            }),
            source_name: source_name.into(),
        }
    }

    /// Opens both sockets and starts the internal receive task. Re-entrant:
    /// calling `connect` again while connected is a no-op.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.connected.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        self.do_connect().await?;

        let this = self.clone();
        tokio::spawn(async move {
            this.receive_loop().await;
        });

        Ok(())
    }

    async fn do_connect(&self) -> Result<()> {
        let pub_addr = (self.inner.config.bind_host.as_str(), self.inner.config.pub_port);
        let sub_addr = (self.inner.config.bind_host.as_str(), self.inner.config.sub_port);

        let pub_stream = TcpStream::connect(pub_addr)
            .await
            .map_err(|e| Error::ConnectFailed(e.to_string()))?;
        let sub_stream = TcpStream::connect(sub_addr)
            .await
            .map_err(|e| Error::ConnectFailed(e.to_string()))?;

        *self.inner.pub_stream.lock().await = Some(Framed::new(pub_stream, codec()));
        *self.inner.sub_stream.lock().await = Some(Framed::new(sub_stream, codec()));
        self.inner.connected.store(true, std::sync::atomic::Ordering::SeqCst);

        // Re-issue every previously registered subscription's broker-side
        // prefix filter after a (re)connect.
        for entry in self.inner.subscriptions.iter() {
            let prefix = static_prefix(&entry.value().pattern);
            let _ = self.send_subscribe_frame(&prefix).await;
        }

        Ok(())
    }

    async fn send_subscribe_frame(&self, prefix: &str) -> Result<()> {
        let mut guard = self.inner.sub_stream.lock().await;
        if let Some(framed) = guard.as_mut() {
            let marker = MessageEnvelope::new(&self.source_name, "$subscribe", serde_json::Value::Null);
            write_frame(framed, prefix, &marker).await?;
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.inner.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        *self.inner.pub_stream.lock().await = None;
        *self.inner.sub_stream.lock().await = None;
    }

    /// Constructs an envelope, stamps identity/timestamp, and sends it as a
    /// two-frame `[topic][envelope]` message. Reconnects with exponential
    /// backoff on transient failure (up to the configured cap) before giving
    /// up with [`Error::ConnectFailed`].
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.publish_envelope(topic, MessageEnvelope::new(&self.source_name, topic, payload))
            .await
    }

    pub async fn publish_envelope(&self, topic: &str, envelope: MessageEnvelope) -> Result<()> {
        if !self.inner.connected.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::ConnectFailed("not connected".to_string()));
        }
        let mut guard = self.inner.pub_stream.lock().await;
        match guard.as_mut() {
            Some(framed) => write_frame(framed, topic, &envelope).await,
            None => Err(Error::ConnectFailed("not connected".to_string())),
        }
    }

    /// Registers `callback` for `pattern`, validates the pattern (rejecting
    /// ambiguous `*`/`**` combinations per the project spec's Open Question
    /// resolution), and sends the broker the pattern's maximal static prefix
    /// as its server-side filter.
    pub async fn subscribe(&self, pattern: &str, callback: Callback) -> Result<SubscriptionHandle> {
        validate_pattern(pattern).map_err(Error::InvalidPattern)?;
        let handle = SubscriptionHandle(Uuid::new_v4());
        let prefix = static_prefix(pattern);
        self.inner.subscriptions.insert(
            handle,
            Subscription {
                pattern: normalize_topic(pattern),
                callback,
            },
        );
        self.send_subscribe_frame(&prefix).await?;
        Ok(handle)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.subscriptions.remove(&handle);
    }

    /// Single receive task: reads relayed frames from the broker, applies
    /// client-side wildcard matching against every registered subscription,
    /// and invokes matching callbacks in arrival order. On a read error the
    /// client reconnects with exponential backoff.
    async fn receive_loop(&self) {
        let mut backoff = self.inner.config.reconnect_base();
        loop {
            let frame = {
                let mut guard = self.inner.sub_stream.lock().await;
                match guard.as_mut() {
                    Some(framed) => read_frame(framed).await,
                    None => Err(Error::ConnectFailed("not connected".to_string())),
                }
            };

            match frame {
                Ok(Some(WireFrame { topic, envelope })) => {
                    backoff = self.inner.config.reconnect_base();
                    for entry in self.inner.subscriptions.iter() {
                        if pattern_matches(&entry.value().pattern, &topic) {
                            (entry.value().callback)(envelope.clone());
                        }
                    }
                }
                Ok(None) | Err(_) => {
                    self.inner.connected.store(false, std::sync::atomic::Ordering::SeqCst);
                    tracing::warn!(backoff = ?backoff, "bus client disconnected, reconnecting");
                    tokio::time::sleep(backoff).await;
                    if self.do_connect().await.is_ok() {
                        backoff = self.inner.config.reconnect_base();
                    } else {
                        backoff = std::cmp::min(backoff * 2, self.inner.config.reconnect_cap());
                    }
                }
            }
        }
    }
}

/// The maximal static (non-wildcard) prefix of a pattern, sent to the broker
/// as its coarse server-side filter; fine-grained wildcard matching happens
/// client-side in `receive_loop`.
fn static_prefix(pattern: &str) -> String {
    let normalized = normalize_topic(pattern);
    let mut parts = Vec::new();
    for seg in normalized.split('/').filter(|s| !s.is_empty()) {
        if seg == "*" || seg == "**" {
            break;
        }
        parts.push(seg);
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_prefix_stops_at_first_wildcard() {
        assert_eq!(static_prefix("logs/security/**"), "logs/security");
        assert_eq!(static_prefix("api/*/create"), "api");
        assert_eq!(static_prefix("api/users/create"), "api/users/create");
    }
}
