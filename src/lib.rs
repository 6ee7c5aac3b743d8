//! # aico-gateway-core
//!
//! The protocol-agnostic core of the AICO gateway: a message bus broker and
//! client, a topic-based router, auth/session/authorization managers, rate
//! limiting, a security filter, a logging pipeline, and three protocol
//! adapters (REST, WebSocket, local IPC) that all funnel into the same
//! internal bus.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aico_gateway_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     // ... build AppState, assemble the REST router, call Server::serve ...
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod authn;
pub mod authz;
pub mod bus;
pub mod config;
pub mod database;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod keys;
pub mod logging;
pub mod middleware;
pub mod observability;
pub mod rate_limit;
pub mod responses;
pub mod rest;
pub mod router;
pub mod security;
pub mod server;
pub mod state;
pub mod validator;
pub mod ws;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::agents::prelude::{BackgroundWorker, TaskStatus};
    pub use crate::authn::{AuthManager, AuthMethod, TokenPair, UserIdentity};
    pub use crate::authz::{AuthzManager, DefaultPolicy, Resource};
    pub use crate::bus::{BusClient, MessageEnvelope};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::keys::{EnvKeyProvider, KeyProvider, SharedKeyProvider};
    pub use crate::logging::{LogEntry, LogLevel, LogPipeline};
    pub use crate::middleware::{
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer, RequestTrackingConfig,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS,
    };
    pub use crate::observability::init_tracing;
    pub use crate::rate_limit::RateLimiter;
    pub use crate::responses::{Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError};
    pub use crate::router::MessageRouter;
    pub use crate::security::SecurityFilter;
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::validator::MessageValidator;

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};
    pub use tokio;
    pub use async_trait::async_trait;
    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};
    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
    pub use uuid::Uuid;
    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};
    pub use http::{Method, Uri};
    pub use acton_reactive::prelude::*;
}
