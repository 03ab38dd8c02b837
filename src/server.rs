use anyhow::Context;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ProtocolError;
use crate::models::message::ServerMessage;
use crate::processor::message_processor;
use crate::registry::Outbox;
use crate::state::AppState;

const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Only upgrade requests for this path are accepted.
    pub path: String,
    /// Interval between server-initiated transport pings.
    pub ping_interval: Duration,
}

impl From<&AppConfig> for ServerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            path: config.ws_path.clone(),
            ping_interval: config.ping_interval(),
        }
    }
}

/// Binds the configured address and serves tracking sockets until the task is dropped.
pub async fn start_tracking_server(config: &AppConfig, state: AppState) -> anyhow::Result<()> {
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Tracking server listening on ws://{}{}", addr, config.ws_path);

    serve(listener, state, ServerSettings::from(config)).await
}

pub async fn serve(
    listener: TcpListener,
    state: AppState,
    settings: ServerSettings,
) -> anyhow::Result<()> {
    let settings = Arc::new(settings);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted TCP connection from {}", peer);
                let state = state.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, state, settings).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: AppState,
    settings: Arc<ServerSettings>,
) {
    let expected_path = settings.path.clone();
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == expected_path {
            Ok(response)
        } else {
            let mut rejection =
                ErrorResponse::new(Some(format!("No tracking endpoint at {}", request.uri().path())));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = match accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let (mut sink, mut frames) = ws.split();
    let (outbox, mut outbound) = mpsc::unbounded_channel::<Message>();

    // Dropped on every exit path below, which removes the registry entry.
    let registration = state.registry.register_scoped(connection_id, outbox.clone());
    info!("New tracking connection {} from {}", connection_id, peer);

    send_reply(&outbox, &ServerMessage::ConnectionEstablished);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("Socket write failed for {}: {}", connection_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let pinger = {
        let outbox = outbox.clone();
        let period = settings.ping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if outbox.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                for reply in message_processor::process_message(&state, connection_id, &text).await {
                    send_reply(&outbox, &reply);
                }
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    for reply in
                        message_processor::process_message(&state, connection_id, &text).await
                    {
                        send_reply(&outbox, &reply);
                    }
                }
                Err(_) => send_reply(&outbox, &ServerMessage::error(ProtocolError::InvalidJson)),
            },
            Ok(Message::Close(_)) => {
                info!("Connection {} requested close", connection_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Connection {} socket error: {}", connection_id, e);
                break;
            }
        }
    }

    drop(registration);
    pinger.abort();
    drop(outbox);

    if !finish_writer(writer, WRITER_DRAIN_GRACE).await {
        debug!("Writer for {} did not finish draining; aborted", connection_id);
    }

    info!("Tracking connection {} closed", connection_id);
}

/// Let queued frames drain; the writer exits once the last outbox clone is gone.
/// A writer still blocked on a peer that stopped reading is aborted after `grace`.
async fn finish_writer(mut writer: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut writer).await {
        Ok(_) => true,
        Err(_) => {
            writer.abort();
            false
        }
    }
}

fn send_reply(outbox: &Outbox, reply: &ServerMessage) {
    match serde_json::to_string(reply) {
        Ok(json) => {
            if outbox.send(Message::Text(json)).is_err() {
                debug!("Dropped reply for a closing connection");
            }
        }
        Err(e) => error!("Failed to serialize reply: {}", e),
    }
}
