//! Line-delimited JSON server over TCP.
//!
//! Every connection may send several requests, one per line, and receives
//! one response line per request. Requests run on the blocking thread pool,
//! so a long `sync` job only holds up its own connection.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::processing::Scheduler;
use crate::types::Response;

use super::methods::handle_request;
use super::types::to_line;

/// State shared across all connections.
pub struct ServerState {
    /// Request dispatcher.
    pub scheduler: Scheduler,
    /// Daemon configuration.
    pub config: DaemonConfig,
}

impl ServerState {
    /// Creates new server state.
    pub fn new(scheduler: Scheduler, config: DaemonConfig) -> Self {
        Self { scheduler, config }
    }
}

/// Binds the configured address.
pub async fn bind(config: &DaemonConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    TcpListener::bind(&addr).await.map_err(|e| {
        DaemonError::with_source(ErrorCode::Config, format!("Cannot listen on {}: {}", addr, e), e)
    })
}

/// Accepts connections until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: Arc<ServerState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            warn!(%peer, error = %e, "connection closed with an error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept a connection"),
            },
            _ = &mut shutdown => {
                info!("server shutdown requested");
                break;
            }
        }
    }

    info!("server stopped");
    Ok(())
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn run_server(state: Arc<ServerState>) -> Result<()> {
    let listener = bind(&state.config).await?;
    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
        }
    })
    .await
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let state = Arc::clone(&state);
        let response = tokio::task::spawn_blocking(move || process_request(&line, &state))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "request handler panicked");
                to_line(&Response::error(format!("internal error: {}", e)))
            });

        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Processes a single request line and returns the response line.
fn process_request(line: &str, state: &ServerState) -> String {
    let request: Value = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return to_line(&Response::error(format!("invalid JSON: {}", e))),
    };
    to_line(&handle_request(&request, &state.scheduler))
}
