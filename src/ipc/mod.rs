//! Local IPC protocol adapter (C15): a same-host channel for trusted local
//! processes (companion CLI tools, the desktop shell) that doesn't need the
//! HTTP stack. Unix domain socket on unix platforms, a named pipe on
//! Windows, and a loopback TCP fallback when neither is available. Every
//! connection is authenticated as [`UserIdentity::trusted_local`] and serves
//! one request at a time, serially, matching the spec's "no pipelining"
//! local-IPC contract.

mod protocol;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::authn::UserIdentity;
use crate::authz::Resource;
use crate::bus::envelope::MessageEnvelope;
use crate::bus::wire::{codec, read_frame, write_frame};
use crate::error::{Error, Result};
use crate::server::shutdown_signal;
use crate::state::AppState;

pub use protocol::{IpcResponse, RESPONSE_TOPIC};

pub struct LocalIpcAdapter {
    state: AppState,
}

impl LocalIpcAdapter {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Runs the adapter until a shutdown signal arrives. Binds the unix
    /// socket / named pipe / TCP fallback and accepts connections in a loop,
    /// spawning one task per connection.
    pub async fn serve(self) -> Result<()> {
        let state = self.state;

        #[cfg(unix)]
        {
            serve_unix(state).await
        }
        #[cfg(windows)]
        {
            serve_named_pipe(state).await
        }
        #[cfg(not(any(unix, windows)))]
        {
            serve_tcp_fallback(state).await
        }
    }
}

#[cfg(unix)]
async fn serve_unix(state: AppState) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::UnixListener;

    let path = state.config.local_ipc.socket_path.clone();
    if std::path::Path::new(&path).exists() {
        let _ = std::fs::remove_file(&path);
    }

    let listener = UnixListener::bind(&path)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    tracing::info!(%path, "local IPC adapter listening on unix socket");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state).await;
                });
            }
            _ = shutdown_signal() => {
                tracing::info!("local IPC adapter shutting down");
                let _ = std::fs::remove_file(&path);
                return Ok(());
            }
        }
    }
}

#[cfg(windows)]
async fn serve_named_pipe(state: AppState) -> Result<()> {
    use tokio::net::windows::named_pipe::ServerOptions;

    let pipe_name = format!(r"\\.\pipe\{}", state.config.local_ipc.socket_path.trim_start_matches('/'));
    tracing::info!(%pipe_name, "local IPC adapter listening on named pipe");

    let mut server = ServerOptions::new().first_pipe_instance(true).create(&pipe_name)?;

    loop {
        tokio::select! {
            connected = server.connect() => {
                connected?;
                let stream = server;
                server = ServerOptions::new().create(&pipe_name)?;
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state).await;
                });
            }
            _ = shutdown_signal() => {
                tracing::info!("local IPC adapter shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
async fn serve_tcp_fallback(state: AppState) -> Result<()> {
    use tokio::net::TcpListener;

    let addr = ("127.0.0.1", state.config.local_ipc.fallback_tcp_port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(?addr, "local IPC adapter listening on TCP loopback fallback");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state).await;
                });
            }
            _ = shutdown_signal() => {
                tracing::info!("local IPC adapter shutting down");
                return Ok(());
            }
        }
    }
}

/// Serial one-request-at-a-time loop for a single connection: read a frame,
/// process it, write the reply, repeat until the peer closes or sends a
/// malformed frame.
async fn handle_connection<S>(stream: S, state: AppState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, codec());
    let identity = UserIdentity::trusted_local();

    loop {
        let frame = match read_frame(&mut framed).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "local IPC connection read error");
                break;
            }
        };

        let response = process_request(&state, &identity, frame.topic, frame.envelope.payload).await;
        if let Err(e) = write_frame(&mut framed, RESPONSE_TOPIC, &response.into_envelope()).await {
            tracing::debug!(error = %e, "local IPC connection write error");
            break;
        }
    }
}

/// Mirrors [`crate::rest::dispatch::dispatch`]'s pipeline, minus the IP check
/// (a local IPC peer has no meaningful remote address) and with a fixed
/// `trusted_local` identity instead of a bearer token.
async fn process_request(
    state: &AppState,
    identity: &UserIdentity,
    message_type: String,
    payload: serde_json::Value,
) -> IpcResponse {
    match run_pipeline(state, identity, &message_type, payload).await {
        Ok((correlation_id, data)) => IpcResponse::ok(correlation_id, data),
        Err(e) => IpcResponse::err(e.to_string()),
    }
}

async fn run_pipeline(
    state: &AppState,
    identity: &UserIdentity,
    message_type: &str,
    payload: serde_json::Value,
) -> Result<(uuid::Uuid, serde_json::Value)> {
    let serialized = serde_json::to_string(&payload).unwrap_or_default();
    state.security.check_size(serialized.len())?;
    state.security.check_attack_patterns(&serialized)?;
    let sanitized = state.security.sanitize_value(&payload);

    if !state.rate_limiter.check(&identity.username, 1.0)? {
        return Err(Error::RateLimitExceeded);
    }

    let envelope = MessageEnvelope::new(identity.username.clone(), message_type.to_string(), sanitized);
    state.validator.validate(&envelope)?;
    state.authz.authorize(identity, "publish", Resource::Envelope(&envelope))?;

    let result = state.router.route_message(envelope).await?;
    if result.success {
        Ok((result.correlation_id, result.response.unwrap_or(serde_json::Value::Null)))
    } else if result.timed_out {
        let timeout_secs = state.router.get_routing_stats().timeout_secs;
        Err(Error::Timeout(std::time::Duration::from_secs(timeout_secs)))
    } else {
        Err(Error::Internal(result.error.unwrap_or_else(|| "routing failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_local_identity_has_local_role() {
        let identity = UserIdentity::trusted_local();
        assert_eq!(identity.username, "trusted-local");
        assert!(identity.roles.contains(&"local".to_string()));
    }

    #[test]
    fn ipc_response_round_trips_through_envelope() {
        let response = IpcResponse::ok(uuid::Uuid::new_v4(), serde_json::json!({"ok": true}));
        let envelope = response.clone().into_envelope();
        assert_eq!(envelope.metadata.message_type, RESPONSE_TOPIC);
        let decoded: IpcResponse = serde_json::from_value(envelope.payload).unwrap();
        assert_eq!(decoded.success, response.success);
    }
}
