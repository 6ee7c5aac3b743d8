//! Logging pipeline (C3): every component (including protocol adapters,
//! the bus, and the router) emits structured [`LogEntry`] records through a
//! shared [`LogPipeline`], which buffers them and republishes them on the
//! bus itself so a `logs/**` consumer can persist them without every
//! producer needing a direct database handle.
//!
//! ## Cyclic logging
//!
//! The consumer and the bus transport that carries log entries are
//! themselves instrumented. Left unchecked, a log emitted while publishing
//! a log entry would trigger another publish, forever. Producers whose
//! `subsystem.module` pair appears on [`LoggingConfig::deny_list`] bypass
//! the bus entirely and go straight to the in-process [`tracing`] output,
//! breaking the cycle at its source rather than trying to detect it later.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bus::client::BusClient;
use crate::bus::envelope::MessageEnvelope;
use crate::config::LoggingConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

/// A single structured log record, matching the `logs` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub subsystem: String,
    pub module: String,
    pub function_name: String,
    pub file_path: String,
    pub line_number: u32,
    pub topic: String,
    pub message: String,
    #[serde(default)]
    pub user_uuid: Option<Uuid>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default = "default_extra")]
    pub extra: serde_json::Value,
}

fn default_extra() -> serde_json::Value {
    serde_json::json!({})
}

impl LogEntry {
    fn deny_key(&self) -> String {
        format!("{}.{}", self.subsystem, self.module)
    }
}

/// Bounded ring buffer of recent log entries. Oldest entries are evicted on
/// overflow; a running drop counter lets operators notice loss without the
/// eviction itself needing to log (which would recurse into the buffer it
/// is evicting from).
pub struct LogBuffer {
    capacity: usize,
    entries: VecDeque<LogEntry>,
    dropped: AtomicU64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 100 == 0 {
                tracing::warn!(dropped, capacity = self.capacity, "log buffer overflow, oldest entries evicted");
            }
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drains up to `max` oldest entries, for the persistence consumer.
    fn drain(&mut self, max: usize) -> Vec<LogEntry> {
        let n = self.entries.len().min(max);
        self.entries.drain(..n).collect()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Entry point every component logs through. Cheap to clone; shares the
/// buffer and bus client.
#[derive(Clone)]
pub struct LogPipeline {
    buffer: Arc<Mutex<LogBuffer>>,
    bus: BusClient,
    deny_list: Arc<HashSet<String>>,
}

impl LogPipeline {
    pub fn new(config: &LoggingConfig, bus: BusClient) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer::new(config.buffer_capacity))),
            bus,
            deny_list: Arc::new(config.deny_list.iter().cloned().collect()),
        }
    }

    pub fn buffer(&self) -> Arc<Mutex<LogBuffer>> {
        self.buffer.clone()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        level: LogLevel,
        subsystem: &str,
        module: &str,
        function_name: &str,
        file_path: &str,
        line_number: u32,
        topic: &str,
        message: impl Into<String>,
        user_uuid: Option<Uuid>,
        session_id: Option<Uuid>,
        trace_id: Option<String>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: level.as_str().to_string(),
            subsystem: subsystem.to_string(),
            module: module.to_string(),
            function_name: function_name.to_string(),
            file_path: file_path.to_string(),
            line_number,
            topic: topic.to_string(),
            message: message.into(),
            user_uuid,
            session_id,
            trace_id,
            extra: default_extra(),
        };

        if self.deny_list.contains(&entry.deny_key()) {
            self.emit_direct(&entry);
            return;
        }

        self.buffer.lock().await.push(entry.clone());

        let envelope = MessageEnvelope::new("logging", "logs/entry", serde_json::json!(entry));
        let publish_topic = format!("logs/{}/{}", entry.subsystem, entry.module);
        if let Err(err) = self.bus.publish_envelope(&publish_topic, envelope).await {
            // Falls back to direct emission rather than recursing: a failed
            // publish must not itself re-enter the pipeline.
            tracing::warn!(error = %err, "failed to publish log entry to bus, emitting directly");
            self.emit_direct(&entry);
        }
    }

    fn emit_direct(&self, entry: &LogEntry) {
        tracing::info!(
            subsystem = %entry.subsystem,
            module = %entry.module,
            function = %entry.function_name,
            topic = %entry.topic,
            "{}",
            entry.message
        );
    }
}

/// Persists log entries to the `logs` table (C3 persistence tier).
#[derive(Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_batch(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO logs (
                    timestamp, level, subsystem, module, function_name, file_path,
                    line_number, topic, message, user_uuid, session_id, trace_id, extra
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.timestamp.to_rfc3339())
            .bind(&entry.level)
            .bind(&entry.subsystem)
            .bind(&entry.module)
            .bind(&entry.function_name)
            .bind(&entry.file_path)
            .bind(entry.line_number as i64)
            .bind(&entry.topic)
            .bind(&entry.message)
            .bind(entry.user_uuid.map(|u| u.to_string()))
            .bind(entry.session_id.map(|u| u.to_string()))
            .bind(&entry.trace_id)
            .bind(entry.extra.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs").fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}

/// Subscribes to `logs/**`, batches entries, and flushes them to the
/// repository. Its own diagnostic logging goes through [`LogPipeline`] with
/// `subsystem="logging", module="consumer"`, which the default deny list
/// routes around the bus.
pub struct LogConsumer;

impl LogConsumer {
    pub async fn spawn(bus: BusClient, repo: LogRepository, batch_size: usize) -> Result<tokio::task::JoinHandle<()>> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<LogEntry>();

        bus.subscribe(
            "logs/**",
            std::sync::Arc::new(move |envelope: MessageEnvelope| {
                if let Ok(entry) = serde_json::from_value::<LogEntry>(envelope.payload.clone()) {
                    let _ = tx.send(entry);
                }
            }),
        )
        .await?;

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    maybe_entry = rx.recv() => {
                        match maybe_entry {
                            Some(entry) => {
                                batch.push(entry);
                                if batch.len() >= batch_size {
                                    Self::flush(&repo, &mut batch).await;
                                }
                            }
                            None => {
                                Self::flush(&repo, &mut batch).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if !batch.is_empty() {
                            Self::flush(&repo, &mut batch).await;
                        }
                    }
                }
            }
        });

        Ok(handle)
    }

    async fn flush(repo: &LogRepository, batch: &mut Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        if let Err(err) = repo.insert_batch(batch).await {
            tracing::error!(error = %err, "failed to persist log batch");
        }
        batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(subsystem: &str, module: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: "INFO".to_string(),
            subsystem: subsystem.to_string(),
            module: module.to_string(),
            function_name: "f".to_string(),
            file_path: "f.rs".to_string(),
            line_number: 1,
            topic: "t".to_string(),
            message: "m".to_string(),
            user_uuid: None,
            session_id: None,
            trace_id: None,
            extra: default_extra(),
        }
    }

    #[test]
    fn buffer_evicts_oldest_on_overflow() {
        let mut buffer = LogBuffer::new(2);
        buffer.push(entry("a", "1"));
        buffer.push(entry("a", "2"));
        buffer.push(entry("a", "3"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped_count(), 1);
        assert_eq!(buffer.snapshot()[0].module, "2");
    }

    #[test]
    fn deny_key_combines_subsystem_and_module() {
        let e = entry("logging", "consumer");
        assert_eq!(e.deny_key(), "logging.consumer");
    }

    #[tokio::test]
    async fn repository_round_trips_a_batch() {
        let pool = crate::database::create_sqlite_pool("sqlite::memory:").await.unwrap();
        let repo = LogRepository::new(pool);
        repo.insert_batch(&[entry("router", "dispatch"), entry("ws", "handshake")]).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);
    }
}
