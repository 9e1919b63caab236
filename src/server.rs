//! TCP host for a rate-limited lobby.
//!
//! Every connection is one player. Each line a client sends is a JSON object
//! `{"type": "...", "data": ...}`; every line the server sends back has the
//! same shape.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::config::RoomgateConfig;
use crate::error::{Result, RoomgateError};
use crate::lobby::LobbyRoom;
use crate::room::{
    with_rate_limit, IncomingMessage, OutgoingMessage, Player, PlayerId, RateLimitedRoom, Room,
    SharedPlayer,
};

/// The lobby shared by every connection task.
pub type SharedRoom = Arc<Mutex<RateLimitedRoom<LobbyRoom>>>;

/// Players currently connected, by id.
pub type PlayerDirectory = Arc<DashMap<PlayerId, SharedPlayer>>;

#[derive(Debug)]
enum Outbound {
    Line(String),
    Close,
}

/// A player backed by a socket writer task.
#[derive(Debug)]
pub struct ConnectedPlayer {
    id: PlayerId,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Notify,
}

impl ConnectedPlayer {
    fn new(id: PlayerId, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            outbound,
            closed: Notify::new(),
        }
    }
}

impl Player for ConnectedPlayer {
    fn id(&self) -> &PlayerId {
        &self.id
    }

    fn send(&self, message: OutgoingMessage) -> Result<()> {
        let line = message.to_json()?;
        self.outbound
            .send(Outbound::Line(line))
            .map_err(|_| RoomgateError::PlayerGone(self.id.clone()))
    }

    fn leave(&self) {
        // The writer may already be gone; closing twice is harmless.
        let _ = self.outbound.send(Outbound::Close);
        self.closed.notify_one();
    }
}

/// Accepts players and feeds their messages into one lobby.
pub struct RoomServer {
    addr: SocketAddr,
    max_line_bytes: usize,
    room: SharedRoom,
    players: PlayerDirectory,
}

impl RoomServer {
    pub fn new(addr: SocketAddr, max_line_bytes: usize, room: RateLimitedRoom<LobbyRoom>) -> Self {
        Self {
            addr,
            max_line_bytes,
            room: Arc::new(Mutex::new(room)),
            players: Arc::new(DashMap::new()),
        }
    }

    /// Build the lobby from configuration: its own registrations overlaid
    /// with the configured message rules, limited by the configured default.
    pub fn from_config(config: &RoomgateConfig) -> Self {
        let registry = LobbyRoom::registry_builder()
            .apply_rules(config.messages.clone())
            .build();
        let room = with_rate_limit(
            LobbyRoom::new(Arc::new(registry)),
            config.rate_limit.clone(),
        );
        info!(
            strategy = room.rate_limit_strategy().name(),
            messages_per_second = config.rate_limit.messages_per_second,
            capacity = config.rate_limit.capacity(),
            "Lobby rate limiting configured"
        );
        Self::new(config.server.listen_addr, config.server.max_line_bytes, room)
    }

    pub fn room(&self) -> &SharedRoom {
        &self.room
    }

    pub fn connected_players(&self) -> usize {
        self.players.len()
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves, then
    /// dispose the lobby.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(addr = %listener.local_addr()?, "Room server listening");
        tokio::pin!(signal);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted connection");
                        let room = self.room.clone();
                        let players = self.players.clone();
                        let max_line_bytes = self.max_line_bytes;
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, room, players, max_line_bytes).await {
                                warn!(peer = %peer, error = %e, "Connection ended with an error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(players = self.players.len(), "Shutting down room server");
        self.room.lock().dispose();
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

fn send_or_warn(player: &SharedPlayer, message: OutgoingMessage) {
    if let Err(e) = player.send(message) {
        warn!(player = %player.id(), error = %e, "Failed to send reply");
    }
}

/// Run one player's connection until it disconnects or is asked to leave.
///
/// A line longer than `max_line_bytes` is answered with an error and closes
/// the connection; at most `max_line_bytes` of it are ever buffered.
pub async fn handle_connection<S>(
    stream: S,
    room: SharedRoom,
    players: PlayerDirectory,
    max_line_bytes: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connected = Arc::new(ConnectedPlayer::new(PlayerId::random(), tx));
    let player: SharedPlayer = connected.clone();

    let writer_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Line(line) => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                Outbound::Close => break,
            }
        }
        writer.shutdown().await
    });

    players.insert(player.id().clone(), player.clone());
    room.lock().on_join(&player);
    info!(player = %player.id(), "Player connected");

    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_bytes));
    let outcome = loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = connected.closed.notified() => break Ok(()),
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(player = %player.id(), max_line_bytes, "Message too large, closing connection");
                send_or_warn(&player, OutgoingMessage::error("message too large"));
                break Ok(());
            }
            Some(Err(LinesCodecError::Io(e))) => break Err(RoomgateError::Io(e)),
            None => break Ok(()),
        };

        if line.trim().is_empty() {
            continue;
        }

        match IncomingMessage::from_json(&line) {
            Ok(message) => {
                room.lock().handle_message(&player, message);
            }
            Err(e) => {
                warn!(player = %player.id(), error = %e, "Malformed message");
                send_or_warn(&player, OutgoingMessage::error(format!("malformed message: {}", e)));
            }
        }
    };

    room.lock().on_leave(&player);
    players.remove(player.id());
    player.leave();
    info!(player = %player.id(), "Player disconnected");

    match writer_task.await {
        Ok(Err(e)) => debug!(player = %player.id(), error = %e, "Writer closed with an error"),
        Err(e) => warn!(player = %player.id(), error = %e, "Writer task failed"),
        Ok(Ok(())) => {}
    }

    outcome
}
