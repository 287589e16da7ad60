//! Room lifecycle: creation, membership, readiness, host succession, and
//! game start/end. Every operation runs synchronously under the state lock
//! and only enqueues outbound frames, never blocks.

use cardroom_protocol::{
    PlayerId, RoomId, RoomPlayerInfo, RoomSummary, ServerMessage, SessionId,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::prompt;
use crate::registry::{DriverControl, GameContext, GamePlayer, GameSettings, RoomIo};
use crate::state::{AppState, ServerState};

/// Chip allotment a member brings into each game.
pub const DEFAULT_CHIPS: u64 = 1000;
/// Bounded retry for room-code collisions before giving up.
const ROOM_CODE_ATTEMPTS: usize = 5;
const MIN_NAME_LEN: usize = 2;
/// Display names may not impersonate the dealer.
const DEALER_NAME: &str = "Dealer";

pub struct RoomPlayer {
    pub player_id: PlayerId,
    pub session_id: SessionId,
    pub name: String,
    pub is_ready: bool,
    pub is_host: bool,
    pub chips: u64,
}

pub struct DriverHandle {
    pub control: mpsc::UnboundedSender<DriverControl>,
}

pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub game_type: String,
    pub max_players: usize,
    pub is_private: bool,
    pub settings: GameSettings,
    /// Join order is preserved; the oldest member is first.
    pub players: Vec<RoomPlayer>,
    pub host: PlayerId,
    pub is_playing: bool,
    pub driver: Option<DriverHandle>,
}

impl Room {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            player_count: self.players.len(),
            max_players: self.max_players,
            is_private: self.is_private,
            is_playing: self.is_playing,
            game_type: self.game_type.clone(),
        }
    }

    pub fn player_infos(&self) -> Vec<RoomPlayerInfo> {
        self.players
            .iter()
            .map(|p| RoomPlayerInfo {
                player_id: p.player_id,
                name: p.name.clone(),
                is_ready: p.is_ready,
                is_host: p.is_host,
            })
            .collect()
    }

    pub fn player_mut(&mut self, player: PlayerId) -> Option<&mut RoomPlayer> {
        self.players.iter_mut().find(|p| p.player_id == player)
    }
}

/// Settings accepted from `room_create`, all optional on the wire.
#[derive(Debug, Default)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub is_private: Option<bool>,
    pub max_players: Option<usize>,
    pub game_type: Option<String>,
    pub min_bet: Option<u64>,
    pub max_bet: Option<u64>,
    pub deck_count: Option<usize>,
}

fn room_error(s: &ServerState, session: SessionId, error: impl Into<String>) {
    s.send_to_session(
        session,
        &ServerMessage::RoomError {
            error: error.into(),
        },
    );
}

fn broadcast_room_players(s: &ServerState, room_id: &RoomId) {
    if let Some(room) = s.rooms.get(room_id) {
        s.broadcast_to_room(
            room_id,
            &ServerMessage::RoomPlayers {
                players: room.player_infos(),
            },
        );
    }
}

pub fn identify(state: &AppState, session: SessionId, name: &str) {
    let mut s = state.inner.lock();
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        room_error(&s, session, "name must be at least 2 characters");
        return;
    }
    if name.eq_ignore_ascii_case(DEALER_NAME) {
        room_error(&s, session, "that name is reserved");
        return;
    }
    match s.sessions.get(&session) {
        None => return,
        Some(conn) if conn.room_id.is_some() => {
            room_error(&s, session, "cannot change name while in a room");
            return;
        }
        Some(_) => {}
    }
    // re-identify mints a fresh PlayerId and replaces the old one
    let player = PlayerId::new();
    if let Some(conn) = s.sessions.get_mut(&session) {
        conn.player_id = Some(player);
        conn.name = Some(name.to_owned());
    }
    s.session_players.insert(session, player);
    s.send_to_session(
        session,
        &ServerMessage::Identified {
            player_id: player,
            name: name.to_owned(),
        },
    );
    info!(%session, %player, name, "session identified");
}

pub fn list_rooms(state: &AppState, session: SessionId) {
    let s = state.inner.lock();
    let mut rooms: Vec<RoomSummary> = s
        .rooms
        .values()
        .filter(|room| !room.is_private)
        .map(Room::summary)
        .collect();
    rooms.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    s.send_to_session(session, &ServerMessage::RoomList { rooms });
}

pub fn list_games(state: &AppState, session: SessionId) {
    let s = state.inner.lock();
    let games = s.registry.available_games();
    s.send_to_session(session, &ServerMessage::GameList { games });
}

pub fn create_room(state: &AppState, session: SessionId, req: CreateRoomRequest) {
    let mut s = state.inner.lock();
    let Some(&player) = s.session_players.get(&session) else {
        room_error(&s, session, "you must identify first");
        return;
    };
    if s.player_rooms.contains_key(&player) {
        room_error(&s, session, "you are already in a room");
        return;
    }
    let game_type = req.game_type.unwrap_or_else(|| "blackjack".to_owned());
    let Some(factory) = s.registry.factory(&game_type) else {
        room_error(&s, session, format!("unknown game type `{game_type}`"));
        return;
    };
    let meta = factory.meta().clone();
    let max_players = req
        .max_players
        .unwrap_or(meta.max_players)
        .clamp(meta.min_players, meta.max_players);

    let defaults = GameSettings::default();
    let min_bet = req.min_bet.unwrap_or(defaults.min_bet).max(1);
    let settings = GameSettings {
        min_bet,
        max_bet: req.max_bet.unwrap_or(defaults.max_bet).max(min_bet),
        deck_count: req.deck_count.unwrap_or(defaults.deck_count).max(1),
    };

    let mut room_id = None;
    for _ in 0..ROOM_CODE_ATTEMPTS {
        let candidate = RoomId::random();
        if !s.rooms.contains_key(&candidate) {
            room_id = Some(candidate);
            break;
        }
    }
    let Some(room_id) = room_id else {
        room_error(&s, session, "could not allocate a room code");
        return;
    };

    let display_name = s
        .sessions
        .get(&session)
        .and_then(|conn| conn.name.clone())
        .unwrap_or_else(|| "Someone".to_owned());
    let room_name = match req.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => format!("{display_name}'s Room"),
    };

    let room = Room {
        id: room_id.clone(),
        name: room_name,
        game_type,
        max_players,
        is_private: req.is_private.unwrap_or(false),
        settings,
        players: vec![RoomPlayer {
            player_id: player,
            session_id: session,
            name: display_name,
            is_ready: false,
            is_host: true,
            chips: DEFAULT_CHIPS,
        }],
        host: player,
        is_playing: false,
        driver: None,
    };
    let summary = room.summary();
    s.rooms.insert(room_id.clone(), room);
    s.player_rooms.insert(player, room_id.clone());
    if let Some(conn) = s.sessions.get_mut(&session) {
        conn.room_id = Some(room_id.clone());
    }
    s.send_to_session(
        session,
        &ServerMessage::RoomJoined {
            room: summary,
            is_host: true,
        },
    );
    broadcast_room_players(&s, &room_id);
    info!(%session, room = %room_id, "room created");
}

pub fn join_room(state: &AppState, session: SessionId, code_like: &str) {
    let mut s = state.inner.lock();
    // checks run in a fixed order so clients see deterministic reasons
    let Some(&player) = s.session_players.get(&session) else {
        room_error(&s, session, "you must identify first");
        return;
    };
    if s.player_rooms.contains_key(&player) {
        room_error(&s, session, "you are already in a room");
        return;
    }
    let Ok(room_id) = RoomId::parse(code_like) else {
        room_error(&s, session, "invalid room code");
        return;
    };
    {
        let Some(room) = s.rooms.get(&room_id) else {
            room_error(&s, session, "no such room");
            return;
        };
        if room.players.len() >= room.max_players {
            room_error(&s, session, "room is full");
            return;
        }
        if room.is_playing {
            room_error(&s, session, "game already in progress");
            return;
        }
    }
    let display_name = s
        .sessions
        .get(&session)
        .and_then(|conn| conn.name.clone())
        .unwrap_or_else(|| "Someone".to_owned());
    let summary = {
        let Some(room) = s.rooms.get_mut(&room_id) else {
            return;
        };
        room.players.push(RoomPlayer {
            player_id: player,
            session_id: session,
            name: display_name,
            is_ready: false,
            is_host: false,
            chips: DEFAULT_CHIPS,
        });
        room.summary()
    };
    s.player_rooms.insert(player, room_id.clone());
    if let Some(conn) = s.sessions.get_mut(&session) {
        conn.room_id = Some(room_id.clone());
    }
    s.send_to_session(
        session,
        &ServerMessage::RoomJoined {
            room: summary,
            is_host: false,
        },
    );
    broadcast_room_players(&s, &room_id);
    info!(%session, room = %room_id, "player joined room");
}

pub fn leave_room(state: &AppState, session: SessionId) {
    let mut s = state.inner.lock();
    leave_room_locked(&mut s, session);
}

/// Shared by `room_leave` and disconnect. Succeeds silently when the session
/// is not in a room.
pub(crate) fn leave_room_locked(s: &mut ServerState, session: SessionId) {
    let Some(&player) = s.session_players.get(&session) else {
        return;
    };
    let Some(room_id) = s.player_rooms.get(&player).cloned() else {
        return;
    };

    let (leaver_name, now_empty, current_host, control) = {
        let Some(room) = s.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(pos) = room.players.iter().position(|p| p.player_id == player) else {
            return;
        };
        let was_host = room.host == player;
        let leaver = room.players.remove(pos);
        let now_empty = room.players.is_empty();
        if !now_empty && was_host {
            // the oldest remaining member becomes host before anyone else
            // observes the departure
            room.players[0].is_host = true;
            room.host = room.players[0].player_id;
        }
        let control = room.driver.as_ref().map(|h| h.control.clone());
        (leaver.name, now_empty, room.host, control)
    };

    // a live driver learns about the departure on its control channel and
    // applies it between prompt suspensions. The message must be enqueued
    // before the prompt cancellation below: cancelling fires the oneshot
    // that wakes the driver, and its very next step is to drain this
    // channel, possibly on another thread.
    if let Some(control) = control {
        let _ = control.send(DriverControl::PlayerLeft {
            player,
            new_host: if now_empty { player } else { current_host },
        });
    }

    // a leaver's outstanding question dies with their membership
    prompt::cancel_locked(s, session);

    s.player_rooms.remove(&player);
    if let Some(conn) = s.sessions.get_mut(&session) {
        conn.room_id = None;
    }
    s.send_to_session(session, &ServerMessage::RoomLeft);

    if now_empty {
        s.rooms.remove(&room_id);
        info!(room = %room_id, "room destroyed (last member left)");
        return;
    }

    s.broadcast_to_room(
        &room_id,
        &ServerMessage::PlayerLeft {
            player_id: player,
            player_name: leaver_name,
        },
    );
    broadcast_room_players(s, &room_id);
    info!(%session, room = %room_id, "player left room");
}

pub fn set_ready(state: &AppState, session: SessionId, ready: bool) {
    let mut s = state.inner.lock();
    let Some(&player) = s.session_players.get(&session) else {
        return;
    };
    let Some(room_id) = s.player_rooms.get(&player).cloned() else {
        return;
    };
    let all_ready = {
        let Some(room) = s.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(member) = room.player_mut(player) else {
            return;
        };
        if member.is_ready == ready {
            // repeated flips are no-ops
            return;
        }
        member.is_ready = ready;
        room.players.iter().all(|p| p.is_ready)
    };
    broadcast_room_players(&s, &room_id);
    if ready && all_ready {
        s.broadcast_to_room(&room_id, &ServerMessage::RoomReadyToStart);
    }
}

pub fn start_game(state: &AppState, session: SessionId) {
    let mut s = state.inner.lock();
    let Some(&player) = s.session_players.get(&session) else {
        room_error(&s, session, "you must identify first");
        return;
    };
    let Some(room_id) = s.player_rooms.get(&player).cloned() else {
        room_error(&s, session, "you are not in a room");
        return;
    };
    let game_type = {
        let Some(room) = s.rooms.get(&room_id) else {
            return;
        };
        if room.is_playing {
            room_error(&s, session, "game already in progress");
            return;
        }
        if room.host != player {
            room_error(&s, session, "only the host can start the game");
            return;
        }
        room.game_type.clone()
    };
    let Some(factory) = s.registry.factory(&game_type) else {
        error!(room = %room_id, game = game_type, "no factory for room's game type");
        return;
    };
    let min_players = factory.meta().min_players;
    if s.rooms
        .get(&room_id)
        .map(|room| room.players.len())
        .unwrap_or(0)
        < min_players
    {
        room_error(&s, session, "not enough players to start");
        return;
    }

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (players, host, settings) = {
        let Some(room) = s.rooms.get_mut(&room_id) else {
            return;
        };
        room.is_playing = true;
        room.driver = Some(DriverHandle {
            control: control_tx,
        });
        let players: Vec<GamePlayer> = room
            .players
            .iter()
            .map(|p| GamePlayer {
                player_id: p.player_id,
                name: p.name.clone(),
                chips: p.chips,
            })
            .collect();
        (players, room.host, room.settings.clone())
    };

    s.broadcast_to_room(&room_id, &ServerMessage::GameStarting);
    drop(s);

    let ctx = GameContext {
        io: RoomIo::new(state.clone(), room_id.clone()),
        players,
        host,
        settings,
        control: control_rx,
    };
    let fut = factory.create(ctx);
    let app = state.clone();
    info!(room = %room_id, "game starting");
    tokio::spawn(async move {
        // inner spawn so a panicking driver still reaches cleanup
        match tokio::spawn(fut).await {
            Ok(Ok(())) => info!(room = %room_id, "game finished"),
            Ok(Err(err)) => error!(room = %room_id, "game driver failed: {err:#}"),
            Err(err) => error!(room = %room_id, "game driver panicked: {err}"),
        }
        finish_game(&app, &room_id);
    });
}

/// Runs after the driver terminates, normally or not.
pub(crate) fn finish_game(state: &AppState, room_id: &RoomId) {
    let mut s = state.inner.lock();
    {
        let Some(room) = s.rooms.get_mut(room_id) else {
            // room died with its last member while the game was winding down
            return;
        };
        room.is_playing = false;
        room.driver = None;
        for member in &mut room.players {
            member.is_ready = false;
        }
    }
    s.broadcast_to_room(room_id, &ServerMessage::GameEnded);
    broadcast_room_players(&s, room_id);
}

/// Disconnect is terminal for the session: leave the room, then drop the
/// session's identity and connection. Any pending prompt is cancelled by
/// `leave_room_locked`, after the driver's control channel has been told
/// about the departure.
pub fn on_disconnect(state: &AppState, session: SessionId) {
    let mut s = state.inner.lock();
    s.send_to_session(session, &ServerMessage::Disconnected);
    leave_room_locked(&mut s, session);
    s.session_players.remove(&session);
    if s.sessions.remove(&session).is_none() {
        warn!(%session, "disconnect for unknown session");
    }
    info!(%session, "session disconnected");
}
