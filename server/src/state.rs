use cardroom_protocol::{encode, PlayerId, RoomId, ServerMessage, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::prompt::PromptOutcome;
use crate::registry::GameRegistry;
use crate::rooms::Room;

/// Frames queued to a session's writer task. Every socket write for one
/// session funnels through this single channel, so frames never interleave.
#[derive(Debug)]
pub enum Outbound {
    Message(String),
    /// Close the socket with the given code and reason, then stop the writer.
    Close { code: u16, reason: &'static str },
}

pub struct ClientConnection {
    pub session_id: SessionId,
    pub tx: mpsc::UnboundedSender<Outbound>,
    pub player_id: Option<PlayerId>,
    pub name: Option<String>,
    pub room_id: Option<RoomId>,
}

/// The only cross-task shared state: session registry, room table, identity
/// maps, and the per-session pending prompt sinks. Event handlers mutate it
/// under the lock and never suspend while holding it.
pub struct ServerState {
    pub sessions: HashMap<SessionId, ClientConnection>,
    pub rooms: HashMap<RoomId, Room>,
    pub session_players: HashMap<SessionId, PlayerId>,
    pub player_rooms: HashMap<PlayerId, RoomId>,
    pub prompts: HashMap<SessionId, oneshot::Sender<PromptOutcome>>,
    pub registry: Arc<GameRegistry>,
}

#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<Mutex<ServerState>>,
}

impl AppState {
    pub fn new(registry: GameRegistry) -> Self {
        AppState {
            inner: Arc::new(Mutex::new(ServerState {
                sessions: HashMap::new(),
                rooms: HashMap::new(),
                session_players: HashMap::new(),
                player_rooms: HashMap::new(),
                prompts: HashMap::new(),
                registry: Arc::new(registry),
            })),
        }
    }
}

impl ServerState {
    /// Send failures are swallowed; the close handler cleans up shortly.
    pub fn send_to_session(&self, session: SessionId, msg: &ServerMessage) {
        if let Some(conn) = self.sessions.get(&session) {
            let _ = conn.tx.send(Outbound::Message(encode(msg)));
        }
    }

    pub fn send_to_player(&self, player: PlayerId, msg: &ServerMessage) {
        if let Some(session) = self.session_for_player(player) {
            self.send_to_session(session, msg);
        }
    }

    /// Serialise once, enqueue the same bytes to every member of the room.
    pub fn broadcast_to_room(&self, room_id: &RoomId, msg: &ServerMessage) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let text = encode(msg);
        for member in &room.players {
            if let Some(conn) = self.sessions.get(&member.session_id) {
                let _ = conn.tx.send(Outbound::Message(text.clone()));
            }
        }
    }

    pub fn broadcast_to_all(&self, msg: &ServerMessage) {
        let text = encode(msg);
        for conn in self.sessions.values() {
            let _ = conn.tx.send(Outbound::Message(text.clone()));
        }
    }

    pub fn session_for_player(&self, player: PlayerId) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|conn| conn.player_id == Some(player))
            .map(|conn| conn.session_id)
    }
}
