//! Message Bus Broker (C4).
//!
//! An XPUB/XSUB-style relay exposing two TCP endpoints: one accepts publisher
//! connections, the other accepts subscriber connections. A non-blocking
//! forwarding loop copies frames from every connected publisher to every
//! subscriber whose registered prefix filter matches the topic. No queuing
//! beyond socket buffers, no persistence: grounded in the proxy pattern of
//! the pre-distillation reference bus (`zmq.proxy()` bridging an XSUB
//! frontend to an XPUB backend), reimplemented over plain TCP since this
//! gateway does not depend on a ZeroMQ binding.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_util::codec::Framed;

use crate::error::{Error, Result};

use super::envelope::normalize_topic;
use super::wire::{codec, read_frame, write_frame, WireFrame};

/// Forwarded message: topic plus the raw envelope, broadcast to every
/// subscriber task so each can apply its own prefix filter independently.
#[derive(Clone)]
struct Relayed {
    topic: String,
    envelope: crate::bus::envelope::MessageEnvelope,
}

pub struct Broker {
    bind_host: String,
    pub_port: u16,
    sub_port: u16,
    tx: broadcast::Sender<Relayed>,
    shutdown: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

impl Broker {
    pub fn new(bind_host: impl AsRef<str>, pub_port: u16, sub_port: u16) -> Self {
        let (tx, _rx) = broadcast::channel(4096);
        Self {
            bind_host: bind_host.as_ref().to_string(),
            pub_port,
            sub_port,
            tx,
            shutdown: Arc::new(Mutex::new(None)),
        }
    }

    /// Constructs and immediately starts a broker bound to both endpoints,
    /// returning a handle whose `stop()` shuts everything down.
    pub async fn start(bind_host: impl AsRef<str>, pub_port: u16, sub_port: u16) -> Result<BrokerHandle> {
        Self::new(bind_host, pub_port, sub_port).run().await
    }

    /// Binds both endpoints and spawns the forwarding tasks. Returns a handle
    /// whose `stop()` shuts everything down. Fails with [`Error::Io`] (the
    /// adapter surface maps this to `PortInUse` semantics at the process
    /// level) if either port is already bound.
    pub async fn run(&self) -> Result<BrokerHandle> {
        let pub_listener = TcpListener::bind((self.bind_host.as_str(), self.pub_port))
            .await
            .map_err(Error::Io)?;
        let sub_listener = TcpListener::bind((self.bind_host.as_str(), self.sub_port))
            .await
            .map_err(Error::Io)?;

        tracing::info!(
            host = %self.bind_host,
            pub_port = self.pub_port,
            sub_port = self.sub_port,
            "message bus broker listening"
        );

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        *self.shutdown.lock().await = Some(shutdown_tx);

        let tx = self.tx.clone();
        let pub_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = pub_listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                tracing::debug!(%addr, "publisher connected");
                                tokio::spawn(handle_publisher(stream, tx.clone()));
                            }
                            Err(e) => tracing::warn!(error = %e, "publisher accept failed"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        let tx2 = self.tx.clone();
        let (sub_shutdown_tx, sub_shutdown_rx) = tokio::sync::oneshot::channel();
        let sub_task = tokio::spawn(async move {
            let mut shutdown_rx = sub_shutdown_rx;
            loop {
                tokio::select! {
                    accepted = sub_listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                tracing::debug!(%addr, "subscriber connected");
                                tokio::spawn(handle_subscriber(stream, tx2.subscribe()));
                            }
                            Err(e) => tracing::warn!(error = %e, "subscriber accept failed"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(BrokerHandle {
            pub_task,
            sub_task,
            sub_shutdown: Some(sub_shutdown_tx),
            shutdown: self.shutdown.clone(),
        })
    }
}

pub struct BrokerHandle {
    pub_task: tokio::task::JoinHandle<()>,
    sub_task: tokio::task::JoinHandle<()>,
    sub_shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

impl BrokerHandle {
    /// Idempotent: closes both listener loops with zero linger.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.sub_shutdown.take() {
            let _ = tx.send(());
        }
        self.pub_task.abort();
        self.sub_task.abort();
    }
}

/// Reads frames from one publisher connection and broadcasts them to all
/// subscriber tasks. A publisher disconnect ends only this task.
async fn handle_publisher(stream: TcpStream, tx: broadcast::Sender<Relayed>) {
    let mut framed = Framed::new(stream, codec());
    loop {
        match read_frame(&mut framed).await {
            Ok(Some(WireFrame { topic, envelope })) => {
                let topic = normalize_topic(&topic);
                // A full broadcast channel silently drops the oldest unread
                // message for slow subscribers; never blocks the publisher.
                let _ = tx.send(Relayed { topic, envelope });
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "publisher frame error, closing connection");
                break;
            }
        }
    }
}

/// Reads the subscriber's registered prefix filters (sent as bare topic
/// frames with an empty envelope payload marking a subscribe control
/// message) and forwards only matching broadcast messages thereafter.
async fn handle_subscriber(stream: TcpStream, mut rx: broadcast::Receiver<Relayed>) {
    let mut framed = Framed::new(stream, codec());
    let mut prefixes: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            biased;
            control = read_frame(&mut framed) => {
                match control {
                    Ok(Some(WireFrame { topic, .. })) => {
                        prefixes.push(normalize_topic(&topic));
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            relayed = rx.recv() => {
                match relayed {
                    Ok(msg) => {
                        if prefixes.is_empty() || prefixes.iter().any(|p| msg.topic.starts_with(p.as_str())) {
                            if write_frame(&mut framed, &msg.topic, &msg.envelope).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::MessageEnvelope;
    use serde_json::json;

    #[tokio::test]
    async fn start_binds_both_ports_and_stop_releases_them() {
        let broker = Broker::new("127.0.0.1", 0, 0);
        // port 0 lets the OS pick a free port; this test only exercises the
        // bind/stop lifecycle, not actual forwarding (covered by the
        // integration test exercising a client against a real broker).
        let handle = broker.run().await;
        assert!(handle.is_ok());
        handle.unwrap().stop().await;
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let env = MessageEnvelope::new("test", "api/echo", json!({"hello": "world"}));
        let bytes = serde_json::to_vec(&env).unwrap();
        let decoded: MessageEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.metadata.message_type, "api/echo");
    }
}
