//! Keeps one tracking socket alive for a browser-like session.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Error -> Disconnected -> Connecting ...
//!                                              \
//!                                               +-> Failed (ceiling reached)
//! ```
//!
//! After every successful connect the worker re-sends `init` and, when a booking is
//! known, `subscribe_tracking`, retrying on `handshake_retry` until both went out on
//! an open socket. A `ping` goes out every `heartbeat_interval` while connected.

use anyhow::Result;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::backoff::{ReconnectBackoff, RetryDecision};
use super::timers::{SessionTick, TimerSet};
use crate::config::ClientConfig;
use crate::models::location_sample::LocationReport;
use crate::models::message::{ClientMessage, ServerMessage};
use crate::models::session::{BookingId, Identity, Role, UserId};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt or session failed; a retry may follow.
    Error(String),
    /// Reconnect attempts exhausted. Needs a manual restart.
    Failed(String),
}

impl ConnectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Failed(_))
    }
}

/// A position reading from the local device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

#[derive(Debug)]
enum Command {
    SetIdentity(Identity),
    TrackBooking(BookingId),
    SendLocation(LocationFix),
    Shutdown,
}

/// Handle to the background connection worker.
///
/// Dropping the handle aborts the worker, which closes the socket and cancels
/// every timer it owns.
pub struct TrackingClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl TrackingClient {
    /// Start the worker. Server messages (acks, broadcasts, errors) arrive on the
    /// returned receiver.
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let identity = match (config.user_id, config.role) {
            (Some(user_id), Some(role)) => Some(Identity { user_id, role }),
            _ => None,
        };

        let worker = Worker {
            backoff: ReconnectBackoff::new(config.reconnect_base, config.max_reconnect_attempts),
            identity,
            booking_id: config.booking_id,
            config,
            timers: TimerSet::new(),
            commands: command_rx,
            status: status_tx,
            events: event_tx,
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                commands: command_tx,
                status: status_rx,
                task: Some(task),
            },
            event_rx,
        )
    }

    /// Identity to announce with `init`. Sessions already initialised keep the old one.
    pub fn set_identity(&self, user_id: UserId, role: Role) {
        self.command(Command::SetIdentity(Identity { user_id, role }));
    }

    pub fn track_booking(&self, booking_id: BookingId) {
        self.command(Command::TrackBooking(booking_id));
    }

    /// Report a fix for the tracked booking. Dropped while not connected.
    pub fn send_location(&self, fix: LocationFix) {
        self.command(Command::SendLocation(fix));
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Close the socket and wait for the worker to finish.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Tracking client worker ended abnormally: {}", e);
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Tracking client worker has stopped; command ignored");
        }
    }
}

impl Drop for TrackingClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Connect {
    Open(Box<Socket>),
    Failed(String),
    Shutdown,
}

enum SessionEnd {
    Lost(String),
    Shutdown,
}

/// What has gone out on the current socket.
#[derive(Debug, Default)]
struct HandshakeProgress {
    init_sent: bool,
    subscribed_to: Option<BookingId>,
}

struct Worker {
    config: ClientConfig,
    identity: Option<Identity>,
    booking_id: Option<BookingId>,
    backoff: ReconnectBackoff,
    timers: TimerSet,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<ServerMessage>,
}

impl Worker {
    async fn run(mut self) {
        let url = self.config.url.clone();

        loop {
            self.set_status(ConnectionStatus::Connecting);

            let end = match self.connect(&url).await {
                Connect::Open(socket) => {
                    self.backoff.reset();
                    info!("Connected to tracking service at {}", url);
                    self.set_status(ConnectionStatus::Connected);
                    self.run_session(*socket).await
                }
                Connect::Failed(reason) => SessionEnd::Lost(reason),
                Connect::Shutdown => SessionEnd::Shutdown,
            };

            let reason = match end {
                SessionEnd::Shutdown => {
                    self.set_status(ConnectionStatus::Disconnected);
                    break;
                }
                SessionEnd::Lost(reason) => reason,
            };
            warn!("Tracking connection lost: {}", reason);
            self.set_status(ConnectionStatus::Error(reason));

            match self.backoff.on_failure() {
                RetryDecision::RetryAfter { attempt, delay } => {
                    info!(
                        "Reconnecting in {:?} (attempt {}/{})",
                        delay, attempt, self.config.max_reconnect_attempts
                    );
                    self.set_status(ConnectionStatus::Disconnected);
                    self.timers.schedule_reconnect(delay);
                    if !self.wait_for_reconnect().await {
                        self.set_status(ConnectionStatus::Disconnected);
                        break;
                    }
                }
                RetryDecision::GiveUp { attempts } => {
                    error!(
                        "Giving up on tracking service after {} consecutive failures",
                        attempts
                    );
                    self.set_status(ConnectionStatus::Failed(format!(
                        "Unable to reach the tracking service after {} attempts. Please reload.",
                        attempts
                    )));
                    break;
                }
            }
        }

        self.timers.clear();
        debug!("Tracking client worker stopped");
    }

    async fn connect(&mut self, url: &str) -> Connect {
        self.timers.arm_connect_timeout(self.config.connect_timeout);

        let handshake = connect_async(url);
        tokio::pin!(handshake);

        let outcome = loop {
            tokio::select! {
                result = &mut handshake => {
                    break match result {
                        Ok((socket, _)) => Connect::Open(Box::new(socket)),
                        Err(e) => Connect::Failed(format!("connect failed: {}", e)),
                    };
                }
                _ = self.timers.connect_timed_out() => {
                    break Connect::Failed(format!(
                        "no connection within {:?}",
                        self.config.connect_timeout
                    ));
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break Connect::Shutdown,
                    Some(command) => self.apply_offline(command),
                },
            }
        };

        self.timers.disarm_connect_timeout();
        outcome
    }

    async fn wait_for_reconnect(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.timers.reconnect_due() => return true,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return false,
                    Some(command) => self.apply_offline(command),
                },
            }
        }
    }

    async fn run_session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut frames) = socket.split();
        let mut progress = HandshakeProgress::default();

        self.timers.start_handshake_retry(self.config.handshake_retry);
        self.timers.start_heartbeat(self.config.heartbeat_interval);

        let end = loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by server: {}", f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        break SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Lost(format!("socket error: {}", e)),
                    None => break SessionEnd::Lost("socket closed".to_string()),
                },
                tick = self.timers.next_session_tick() => {
                    let sent = match tick {
                        SessionTick::HandshakeRetry => self.advance_handshake(&mut sink, &mut progress).await,
                        SessionTick::Heartbeat => send_message(&mut sink, &ClientMessage::Ping).await,
                    };
                    if let Err(e) = sent {
                        break SessionEnd::Lost(format!("send failed: {}", e));
                    }
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break SessionEnd::Shutdown;
                    }
                    Some(Command::SendLocation(fix)) => {
                        if let Err(e) = self.send_fix(&mut sink, fix).await {
                            break SessionEnd::Lost(format!("send failed: {}", e));
                        }
                    }
                    Some(command) => {
                        self.apply_offline(command);
                        if !self.handshake_complete(&progress) && !self.timers.handshake_retry_active() {
                            self.timers.start_handshake_retry(self.config.handshake_retry);
                        }
                    }
                },
            }
        };

        self.timers.stop_session_timers();
        end
    }

    /// Send whatever part of `init` + `subscribe_tracking` has not gone out yet.
    async fn advance_handshake(
        &mut self,
        sink: &mut SocketSink,
        progress: &mut HandshakeProgress,
    ) -> Result<()> {
        let Some(identity) = self.identity else {
            debug!("Identity not available yet; will retry init");
            return Ok(());
        };

        if !progress.init_sent {
            send_message(
                sink,
                &ClientMessage::Init {
                    user_id: identity.user_id,
                    role: identity.role,
                },
            )
            .await?;
            progress.init_sent = true;
        }

        if let Some(booking_id) = self.booking_id {
            if progress.subscribed_to != Some(booking_id) {
                send_message(sink, &ClientMessage::SubscribeTracking { booking_id }).await?;
                progress.subscribed_to = Some(booking_id);
            }
        }

        if self.handshake_complete(progress) {
            debug!("Handshake sent; stopping retry timer");
            self.timers.stop_handshake_retry();
        }
        Ok(())
    }

    fn handshake_complete(&self, progress: &HandshakeProgress) -> bool {
        progress.init_sent
            && match self.booking_id {
                Some(booking_id) => progress.subscribed_to == Some(booking_id),
                None => true,
            }
    }

    async fn send_fix(&mut self, sink: &mut SocketSink, fix: LocationFix) -> Result<()> {
        let Some(booking_id) = self.booking_id else {
            warn!("No booking is being tracked; dropping location fix");
            return Ok(());
        };

        send_message(
            sink,
            &ClientMessage::LocationUpdate(LocationReport {
                booking_id,
                latitude: fix.latitude,
                longitude: fix.longitude,
                speed: fix.speed,
                heading: fix.heading,
            }),
        )
        .await
    }

    /// Commands that only change local state; no socket needed.
    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::SetIdentity(identity) => {
                if self.identity.is_some_and(|current| current != identity) {
                    info!("Identity changed; takes effect on the next connection");
                }
                self.identity = Some(identity);
            }
            Command::TrackBooking(booking_id) => {
                self.booking_id = Some(booking_id);
            }
            Command::SendLocation(_) => {
                debug!("Not connected; dropping location fix");
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => {
                if let ServerMessage::Error { message } = &message {
                    warn!("Tracking service reported an error: {}", message);
                }
                if self.events.send(message).is_err() {
                    debug!("No listener for tracking events");
                }
            }
            Err(e) => debug!("Ignoring unrecognised server frame: {}", e),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        debug!("Tracking client status: {:?}", status);
        self.status.send_replace(status);
    }
}

async fn send_message(sink: &mut SocketSink, message: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::spawn_test_server;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Instant};
    use tokio_tungstenite::accept_async;

    fn config(url: String) -> ClientConfig {
        let mut config = ClientConfig::new(url);
        config.reconnect_base = Duration::from_millis(10);
        config.handshake_retry = Duration::from_millis(50);
        config.connect_timeout = Duration::from_secs(2);
        config
    }

    async fn wait_status(client: &TrackingClient, wanted: impl Fn(&ConnectionStatus) -> bool) -> ConnectionStatus {
        let mut status = client.status();
        let found = timeout(Duration::from_secs(5), status.wait_for(|s| wanted(s)))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed")
            .clone();
        found
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_handshake_then_receives_broadcasts() {
        let server = spawn_test_server().await;
        let mut cfg = config(server.url());
        cfg.user_id = Some(2);
        cfg.role = Some(Role::Passenger);
        cfg.booking_id = Some(42);

        let (client, mut events) = TrackingClient::spawn(cfg);
        wait_status(&client, |s| *s == ConnectionStatus::Connected).await;

        assert_eq!(next_event(&mut events).await, ServerMessage::ConnectionEstablished);
        assert_eq!(next_event(&mut events).await, ServerMessage::InitSuccess);
        assert_eq!(
            next_event(&mut events).await,
            ServerMessage::SubscribeSuccess { booking_id: 42 }
        );

        let mut driver = server.raw_client().await;
        driver
            .send(Message::Text(
                json!({"type": "location_update", "bookingId": 42, "latitude": 29.76, "longitude": -95.37})
                    .to_string(),
            ))
            .await
            .unwrap();

        match next_event(&mut events).await {
            ServerMessage::LocationUpdate { data } => {
                assert_eq!(data.latitude, 29.76);
                assert_eq!(data.longitude, -95.37);
            }
            other => panic!("Expected location_update, got {:?}", other),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_waits_for_identity() {
        let server = spawn_test_server().await;
        let (client, mut events) = TrackingClient::spawn(config(server.url()));
        wait_status(&client, |s| *s == ConnectionStatus::Connected).await;
        assert_eq!(next_event(&mut events).await, ServerMessage::ConnectionEstablished);

        // Several retry ticks pass with nothing to send.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(events.try_recv().is_err());

        client.set_identity(1, Role::Driver);
        assert_eq!(next_event(&mut events).await, ServerMessage::InitSuccess);

        client.track_booking(42);
        assert_eq!(
            next_event(&mut events).await,
            ServerMessage::SubscribeSuccess { booking_id: 42 }
        );

        // Subscribed to its own booking, so its fix comes straight back.
        client.send_location(LocationFix {
            latitude: 10.0,
            longitude: 20.0,
            speed: Some(5.0),
            heading: None,
        });
        match next_event(&mut events).await {
            ServerMessage::LocationUpdate { data } => {
                assert_eq!(data.booking_id, 42);
                assert_eq!(data.speed, Some(5.0));
            }
            other => panic!("Expected location_update, got {:?}", other),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_gives_up_after_ceiling() {
        // Grab a free port and release it so connects are refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut cfg = config(format!("ws://{}/ws", addr));
        cfg.max_reconnect_attempts = 3;
        let (client, _events) = TrackingClient::spawn(cfg);

        let status = wait_status(&client, ConnectionStatus::is_terminal).await;
        assert!(matches!(status, ConnectionStatus::Failed(message) if message.contains("3 attempts")));
    }

    #[tokio::test]
    async fn test_connect_timeout_counts_as_failure() {
        // Accepts TCP but never answers the upgrade request.
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let mut cfg = config(format!("ws://{}/ws", addr));
        cfg.connect_timeout = Duration::from_millis(100);
        cfg.max_reconnect_attempts = 1;

        let started = Instant::now();
        let (client, _events) = TrackingClient::spawn(cfg);
        wait_status(&client, ConnectionStatus::is_terminal).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        drop(silent);
    }

    #[tokio::test]
    async fn test_shutdown_releases_server_entry() {
        let server = spawn_test_server().await;
        let (client, _events) = TrackingClient::spawn(config(server.url()));
        wait_status(&client, |s| *s == ConnectionStatus::Connected).await;
        server.wait_for_live(1).await;

        let status = client.status();
        client.shutdown().await;
        server.wait_for_live(0).await;
        assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnects_and_announces_again_after_drop() {
        // Bare server that reads the handshake and then drops the socket without a close frame.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut cfg = config(format!("ws://{}/ws", addr));
        cfg.reconnect_base = Duration::from_millis(100);
        cfg.user_id = Some(3);
        cfg.role = Some(Role::Driver);
        cfg.booking_id = Some(9);
        let (client, _events) = TrackingClient::spawn(cfg);

        let mut dropped_at: Option<Instant> = None;
        for _ in 0..3 {
            let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
                .await
                .expect("client did not reconnect")
                .unwrap();
            if let Some(at) = dropped_at {
                // Counter resets on every successful connect, so each gap is base * 2.
                let gap = at.elapsed();
                assert!(gap >= Duration::from_millis(200), "reconnected after {:?}", gap);
                assert!(gap < Duration::from_millis(400), "reconnected after {:?}", gap);
            }

            let mut ws = accept_async(stream).await.unwrap();
            let mut frames = Vec::new();
            while frames.len() < 2 {
                let frame = timeout(Duration::from_secs(5), ws.next())
                    .await
                    .expect("timed out waiting for handshake")
                    .expect("stream ended")
                    .unwrap();
                if let Message::Text(text) = frame {
                    frames.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
                }
            }
            assert_eq!(
                frames,
                vec![
                    json!({"type": "init", "userId": 3, "role": "driver"}),
                    json!({"type": "subscribe_tracking", "bookingId": 9}),
                ]
            );

            drop(ws);
            dropped_at = Some(Instant::now());
        }

        assert!(!client.status().borrow().is_terminal());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_socket() {
        let server = spawn_test_server().await;
        let (client, _events) = TrackingClient::spawn(config(server.url()));
        wait_status(&client, |s| *s == ConnectionStatus::Connected).await;
        server.wait_for_live(1).await;

        drop(client);
        server.wait_for_live(0).await;
    }
}
