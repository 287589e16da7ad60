use cardroom_protocol::{
    PlayerId, PromptKind, PromptReply, RoomId, ServerMessage, SessionId,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::blackjack::BlackjackFactory;
use crate::prompt::{self, PromptOutcome};
use crate::registry::GameRegistry;
use crate::rooms::{self, CreateRoomRequest};
use crate::state::{AppState, ClientConnection, Outbound};

fn test_state() -> AppState {
    let mut registry = GameRegistry::new();
    registry
        .register(Arc::new(BlackjackFactory::new()))
        .unwrap();
    AppState::new(registry)
}

/// Register a session the way the multiplexer would, minus the socket.
fn connect(state: &AppState) -> (SessionId, mpsc::UnboundedReceiver<Outbound>) {
    let session = SessionId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut s = state.inner.lock();
    s.sessions.insert(
        session,
        ClientConnection {
            session_id: session,
            tx,
            player_id: None,
            name: None,
            room_id: None,
        },
    );
    s.send_to_session(session, &ServerMessage::Connected { session_id: session });
    (session, rx)
}

fn try_next(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Option<ServerMessage> {
    match rx.try_recv() {
        Ok(Outbound::Message(text)) => Some(serde_json::from_str(&text).unwrap()),
        _ => None,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
    std::iter::from_fn(|| try_next(rx)).collect()
}

fn identify(state: &AppState, session: SessionId, name: &str) -> PlayerId {
    rooms::identify(state, session, name);
    state
        .inner
        .lock()
        .session_players
        .get(&session)
        .copied()
        .expect("identify should have minted a player id")
}

fn room_of(state: &AppState, session: SessionId) -> RoomId {
    let s = state.inner.lock();
    let player = s.session_players[&session];
    s.player_rooms[&player].clone()
}

async fn next_msg(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> ServerMessage {
    loop {
        match timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("session channel closed")
        {
            Outbound::Message(text) => return serde_json::from_str(&text).unwrap(),
            Outbound::Close { .. } => continue,
        }
    }
}

fn assert_invariants(state: &AppState) {
    let s = state.inner.lock();
    let mut seated = HashSet::new();
    for (id, room) in &s.rooms {
        assert_eq!(
            room.players.iter().filter(|p| p.is_host).count(),
            1,
            "room {id} must have exactly one host"
        );
        assert!(
            room.players.iter().any(|p| p.player_id == room.host),
            "host of {id} must be a member"
        );
        assert_eq!(
            room.is_playing,
            room.driver.is_some(),
            "isPlaying must match driver presence in {id}"
        );
        for member in &room.players {
            assert!(seated.insert(member.player_id), "player seated twice");
            assert_eq!(s.player_rooms.get(&member.player_id), Some(id));
        }
    }
    assert_eq!(
        seated.len(),
        s.player_rooms.len(),
        "playerRooms domain must equal the players seated in rooms"
    );
}

#[test]
fn scenario_create_and_join() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    assert!(matches!(
        try_next(&mut ra),
        Some(ServerMessage::Connected { .. })
    ));

    let alice = identify(&state, sa, "Alice");
    match try_next(&mut ra) {
        Some(ServerMessage::Identified { player_id, name }) => {
            assert_eq!(player_id, alice);
            assert_eq!(name, "Alice");
        }
        other => panic!("expected identified, got {other:?}"),
    }

    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let msgs = drain(&mut ra);
    match &msgs[0] {
        ServerMessage::RoomJoined { room, is_host } => {
            assert!(*is_host);
            assert_eq!(room.name, "Alice's Room");
            assert_eq!(room.player_count, 1);
            assert_eq!(room.max_players, 6);
            assert!(!room.is_private);
            assert!(!room.is_playing);
            assert_eq!(room.game_type, "blackjack");
        }
        other => panic!("expected room_joined first, got {other:?}"),
    }
    match &msgs[1] {
        ServerMessage::RoomPlayers { players } => {
            assert_eq!(players.len(), 1);
            assert!(players[0].is_host);
            assert!(!players[0].is_ready);
        }
        other => panic!("expected room_players second, got {other:?}"),
    }

    let room_id = room_of(&state, sa);
    let (sb, mut rb) = connect(&state);
    let bob = identify(&state, sb, "Bob");
    drain(&mut rb);
    // codes are case-insensitive on input
    rooms::join_room(&state, sb, &room_id.as_str().to_lowercase());

    let msgs = drain(&mut rb);
    match &msgs[0] {
        ServerMessage::RoomJoined { room, is_host } => {
            assert!(!*is_host);
            assert_eq!(room.id, room_id);
            assert_eq!(room.player_count, 2);
        }
        other => panic!("expected room_joined first, got {other:?}"),
    }
    match &msgs[1] {
        ServerMessage::RoomPlayers { players } => {
            assert_eq!(players.len(), 2);
            assert_eq!(players[0].player_id, alice);
            assert_eq!(players[1].player_id, bob);
        }
        other => panic!("expected room_players second, got {other:?}"),
    }
    // Alice sees the updated roster too
    let msgs = drain(&mut ra);
    assert!(msgs
        .iter()
        .any(|m| matches!(m, ServerMessage::RoomPlayers { players } if players.len() == 2)));

    assert_invariants(&state);
}

#[test]
fn identify_is_validated() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    drain(&mut ra);

    rooms::identify(&state, sa, " x ");
    assert!(matches!(
        try_next(&mut ra),
        Some(ServerMessage::RoomError { .. })
    ));
    rooms::identify(&state, sa, "dealer");
    assert!(matches!(
        try_next(&mut ra),
        Some(ServerMessage::RoomError { .. })
    ));

    let first = identify(&state, sa, "Alice");
    drain(&mut ra);
    // re-identify outside a room replaces the PlayerId
    let second = identify(&state, sa, "Alicia");
    assert_ne!(first, second);
    drain(&mut ra);

    rooms::create_room(&state, sa, CreateRoomRequest::default());
    drain(&mut ra);
    rooms::identify(&state, sa, "Alison");
    match try_next(&mut ra) {
        Some(ServerMessage::RoomError { error }) => {
            assert!(error.contains("room"), "unexpected reason: {error}")
        }
        other => panic!("expected room_error, got {other:?}"),
    }
}

#[test]
fn join_errors_follow_the_fixed_order() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    drain(&mut ra);

    // not identified wins over everything, even an invalid code
    rooms::join_room(&state, sa, "!!");
    match try_next(&mut ra) {
        Some(ServerMessage::RoomError { error }) => assert_eq!(error, "you must identify first"),
        other => panic!("expected room_error, got {other:?}"),
    }

    identify(&state, sa, "Alice");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    drain(&mut ra);

    // already in a room wins over the bad code
    rooms::join_room(&state, sa, "!!");
    match try_next(&mut ra) {
        Some(ServerMessage::RoomError { error }) => assert_eq!(error, "you are already in a room"),
        other => panic!("expected room_error, got {other:?}"),
    }

    let (sb, mut rb) = connect(&state);
    identify(&state, sb, "Bob");
    drain(&mut rb);
    rooms::join_room(&state, sb, "bad code");
    match try_next(&mut rb) {
        Some(ServerMessage::RoomError { error }) => assert_eq!(error, "invalid room code"),
        other => panic!("expected room_error, got {other:?}"),
    }
    rooms::join_room(&state, sb, "ZZZZZZ");
    match try_next(&mut rb) {
        Some(ServerMessage::RoomError { error }) => assert_eq!(error, "no such room"),
        other => panic!("expected room_error, got {other:?}"),
    }

    // a full room rejects the join
    let room_id = room_of(&state, sa);
    {
        let mut s = state.inner.lock();
        s.rooms.get_mut(&room_id).unwrap().max_players = 1;
    }
    rooms::join_room(&state, sb, room_id.as_str());
    match try_next(&mut rb) {
        Some(ServerMessage::RoomError { error }) => assert_eq!(error, "room is full"),
        other => panic!("expected room_error, got {other:?}"),
    }

    // and a running game rejects it first when there is space again
    {
        let mut s = state.inner.lock();
        let room = s.rooms.get_mut(&room_id).unwrap();
        room.max_players = 6;
        room.is_playing = true;
    }
    rooms::join_room(&state, sb, room_id.as_str());
    match try_next(&mut rb) {
        Some(ServerMessage::RoomError { error }) => assert_eq!(error, "game already in progress"),
        other => panic!("expected room_error, got {other:?}"),
    }
}

#[test]
fn max_players_is_clamped_to_the_game_bounds() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    identify(&state, sa, "Alice");
    drain(&mut ra);
    rooms::create_room(
        &state,
        sa,
        CreateRoomRequest {
            max_players: Some(99),
            ..Default::default()
        },
    );
    let msgs = drain(&mut ra);
    match &msgs[0] {
        ServerMessage::RoomJoined { room, .. } => assert_eq!(room.max_players, 6),
        other => panic!("expected room_joined, got {other:?}"),
    }
}

#[test]
fn private_rooms_stay_off_the_list() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    identify(&state, sa, "Alice");
    rooms::create_room(
        &state,
        sa,
        CreateRoomRequest {
            is_private: Some(true),
            ..Default::default()
        },
    );
    drain(&mut ra);

    let (sb, mut rb) = connect(&state);
    identify(&state, sb, "Bob");
    rooms::create_room(&state, sb, CreateRoomRequest::default());
    drain(&mut rb);

    let (sc, mut rc) = connect(&state);
    drain(&mut rc);
    rooms::list_rooms(&state, sc);
    let first = match try_next(&mut rc) {
        Some(ServerMessage::RoomList { rooms }) => {
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].name, "Bob's Room");
            rooms
        }
        other => panic!("expected room_list, got {other:?}"),
    };
    // unchanged state yields the same payload
    rooms::list_rooms(&state, sc);
    match try_next(&mut rc) {
        Some(ServerMessage::RoomList { rooms }) => assert_eq!(rooms, first),
        other => panic!("expected room_list, got {other:?}"),
    }
}

#[test]
fn game_list_reports_registered_games() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    drain(&mut ra);
    rooms::list_games(&state, sa);
    match try_next(&mut ra) {
        Some(ServerMessage::GameList { games }) => {
            assert_eq!(games.len(), 1);
            assert_eq!(games[0].game_type, "blackjack");
            assert_eq!(games[0].min_players, 1);
            assert_eq!(games[0].max_players, 6);
        }
        other => panic!("expected game_list, got {other:?}"),
    }
}

#[test]
fn scenario_host_succession() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    let (sb, mut rb) = connect(&state);
    let (sc, mut rc) = connect(&state);
    identify(&state, sa, "Alice");
    let bob = identify(&state, sb, "Bob");
    let carol = identify(&state, sc, "Carol");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let room_id = room_of(&state, sa);
    rooms::join_room(&state, sb, room_id.as_str());
    rooms::join_room(&state, sc, room_id.as_str());
    drain(&mut ra);
    drain(&mut rb);
    drain(&mut rc);

    rooms::leave_room(&state, sa);
    assert!(matches!(try_next(&mut ra), Some(ServerMessage::RoomLeft)));
    assert!(try_next(&mut ra).is_none(), "leaver gets no broadcasts");

    for rx in [&mut rb, &mut rc] {
        let msgs = drain(rx);
        match &msgs[0] {
            ServerMessage::PlayerLeft { player_name, .. } => assert_eq!(player_name, "Alice"),
            other => panic!("expected player_left first, got {other:?}"),
        }
        match &msgs[1] {
            ServerMessage::RoomPlayers { players } => {
                assert_eq!(players.len(), 2);
                assert_eq!(players[0].player_id, bob);
                assert!(players[0].is_host);
                assert_eq!(players[1].player_id, carol);
                assert!(!players[1].is_host);
            }
            other => panic!("expected room_players second, got {other:?}"),
        }
    }
    assert_invariants(&state);
}

#[test]
fn leaving_the_last_member_destroys_the_room() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    identify(&state, sa, "Alice");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let room_id = room_of(&state, sa);
    drain(&mut ra);

    rooms::leave_room(&state, sa);
    assert!(matches!(try_next(&mut ra), Some(ServerMessage::RoomLeft)));
    let s = state.inner.lock();
    assert!(s.rooms.get(&room_id).is_none());
    assert!(s.player_rooms.is_empty());
    drop(s);
    // leaving again is a silent no-op
    rooms::leave_room(&state, sa);
    assert!(try_next(&mut ra).is_none());
}

#[test]
fn ready_flips_are_idempotent_and_announce_all_ready() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    let (sb, mut rb) = connect(&state);
    identify(&state, sa, "Alice");
    identify(&state, sb, "Bob");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let room_id = room_of(&state, sa);
    rooms::join_room(&state, sb, room_id.as_str());
    drain(&mut ra);
    drain(&mut rb);

    rooms::set_ready(&state, sa, true);
    let msgs = drain(&mut ra);
    assert_eq!(msgs.len(), 1);
    assert!(matches!(msgs[0], ServerMessage::RoomPlayers { .. }));
    drain(&mut rb);

    // a repeated set_ready(true) is a no-op after the first
    rooms::set_ready(&state, sa, true);
    assert!(try_next(&mut ra).is_none());
    assert!(try_next(&mut rb).is_none());

    rooms::set_ready(&state, sb, true);
    let msgs = drain(&mut ra);
    assert!(matches!(msgs[0], ServerMessage::RoomPlayers { .. }));
    assert!(matches!(msgs[1], ServerMessage::RoomReadyToStart));
}

#[test]
fn only_the_host_starts_the_game() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    let (sb, mut rb) = connect(&state);
    identify(&state, sa, "Alice");
    identify(&state, sb, "Bob");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let room_id = room_of(&state, sa);
    rooms::join_room(&state, sb, room_id.as_str());
    drain(&mut ra);
    drain(&mut rb);

    rooms::start_game(&state, sb);
    match try_next(&mut rb) {
        Some(ServerMessage::RoomError { error }) => {
            assert_eq!(error, "only the host can start the game")
        }
        other => panic!("expected room_error, got {other:?}"),
    }
    // no broadcast reached the host either
    assert!(try_next(&mut ra).is_none());
}

#[tokio::test]
async fn prompts_resolve_answer_and_cancellation() {
    let state = test_state();
    let (session, mut rx) = connect(&state);
    drain(&mut rx);

    let prompt_msg = ServerMessage::Prompt {
        prompt_type: PromptKind::Confirm,
        message: "ready?".to_owned(),
        placeholder: None,
        default: None,
        options: None,
        initial: Some(true),
    };

    let pending = {
        let mut s = state.inner.lock();
        prompt::begin_locked(&mut s, session, prompt_msg.clone())
    };
    // the prompt frame went out before anything could cancel it
    assert!(matches!(
        try_next(&mut rx),
        Some(ServerMessage::Prompt { .. })
    ));
    prompt::deliver(
        &state,
        session,
        PromptReply {
            value: Some(json!("yes")),
            cancel: None,
        },
    );
    let outcome = pending.await.unwrap();
    assert_eq!(outcome, PromptOutcome::answered(Some(json!("yes"))));

    // explicit cancellation resolves the sink as cancelled
    let pending = {
        let mut s = state.inner.lock();
        prompt::begin_locked(&mut s, session, prompt_msg.clone())
    };
    {
        let mut s = state.inner.lock();
        prompt::cancel_locked(&mut s, session);
    }
    assert_eq!(pending.await.unwrap(), PromptOutcome::cancelled());

    // a client-side cancel flag is a cancellation as well
    let pending = {
        let mut s = state.inner.lock();
        prompt::begin_locked(&mut s, session, prompt_msg)
    };
    prompt::deliver(
        &state,
        session,
        PromptReply {
            value: None,
            cancel: Some(true),
        },
    );
    assert!(pending.await.unwrap().cancelled);

    // unsolicited replies are dropped without touching anything
    prompt::deliver(
        &state,
        session,
        PromptReply {
            value: Some(json!(1)),
            cancel: None,
        },
    );
    let s = state.inner.lock();
    assert!(s.prompts.is_empty());
}

#[tokio::test]
async fn full_blackjack_game_over_session_channels() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    let (sb, mut rb) = connect(&state);
    identify(&state, sa, "Alice");
    identify(&state, sb, "Bob");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let room_id = room_of(&state, sa);
    rooms::join_room(&state, sb, room_id.as_str());
    rooms::set_ready(&state, sa, true);
    rooms::set_ready(&state, sb, true);
    drain(&mut ra);
    drain(&mut rb);

    rooms::start_game(&state, sa);
    {
        let s = state.inner.lock();
        let room = s.rooms.get(&room_id).unwrap();
        assert!(room.is_playing);
        assert!(room.driver.is_some());
    }
    assert!(matches!(next_msg(&mut ra).await, ServerMessage::GameStarting));

    let mut saw_intro = false;
    let mut saw_results = false;
    let mut saw_standings = false;
    let mut bet_prompts = 0;
    loop {
        let (who, out) = timeout(Duration::from_secs(15), async {
            tokio::select! {
                m = ra.recv() => (sa, m),
                m = rb.recv() => (sb, m),
            }
        })
        .await
        .expect("timed out waiting for game traffic");
        let msg = match out.expect("session channel closed") {
            Outbound::Message(text) => serde_json::from_str::<ServerMessage>(&text).unwrap(),
            Outbound::Close { .. } => continue,
        };
        match msg {
            ServerMessage::Intro { .. } => saw_intro = true,
            ServerMessage::Prompt {
                prompt_type: PromptKind::Text,
                ..
            } => {
                bet_prompts += 1;
                prompt::deliver(
                    &state,
                    who,
                    PromptReply {
                        value: Some(json!(100)),
                        cancel: None,
                    },
                );
            }
            ServerMessage::Prompt {
                prompt_type: PromptKind::Select,
                options,
                ..
            } => {
                let options = options.unwrap_or_default();
                let reply = if options.iter().any(|o| o == "new round") {
                    "quit"
                } else {
                    "stand"
                };
                prompt::deliver(
                    &state,
                    who,
                    PromptReply {
                        value: Some(json!(reply)),
                        cancel: None,
                    },
                );
            }
            ServerMessage::Note { title, .. } if title == "Round Results" => saw_results = true,
            ServerMessage::Note { title, .. } if title == "Final Standings" => {
                saw_standings = true
            }
            ServerMessage::GameEnded => break,
            _ => {}
        }
    }

    assert!(saw_intro, "driver should have introduced the game");
    assert!(saw_results, "round results should have been posted");
    assert!(saw_standings, "final standings should have been posted");
    assert_eq!(bet_prompts, 2, "both players should have been asked to bet");

    let s = state.inner.lock();
    let room = s.rooms.get(&room_id).unwrap();
    assert!(!room.is_playing);
    assert!(room.driver.is_none());
    assert!(room.players.iter().all(|p| !p.is_ready));
}

#[tokio::test]
async fn disconnect_during_bet_prompt_skips_the_player() {
    let state = test_state();
    let (sa, mut ra) = connect(&state);
    let (sb, mut rb) = connect(&state);
    identify(&state, sa, "Alice");
    identify(&state, sb, "Bob");
    rooms::create_room(&state, sa, CreateRoomRequest::default());
    let room_id = room_of(&state, sa);
    rooms::join_room(&state, sb, room_id.as_str());
    rooms::set_ready(&state, sa, true);
    rooms::set_ready(&state, sb, true);
    drain(&mut ra);
    drain(&mut rb);

    rooms::start_game(&state, sa);

    // wait for Alice's bet prompt, then cut her connection
    loop {
        if let ServerMessage::Prompt {
            prompt_type: PromptKind::Text,
            ..
        } = next_msg(&mut ra).await
        {
            break;
        }
    }
    rooms::on_disconnect(&state, sa);

    // the game continues with Bob alone rather than ending
    let mut saw_bob_bet_prompt = false;
    loop {
        let msg = next_msg(&mut rb).await;
        match msg {
            ServerMessage::Prompt {
                prompt_type: PromptKind::Text,
                ..
            } => {
                saw_bob_bet_prompt = true;
                prompt::deliver(
                    &state,
                    sb,
                    PromptReply {
                        value: Some(json!(50)),
                        cancel: None,
                    },
                );
            }
            ServerMessage::Prompt {
                prompt_type: PromptKind::Select,
                options,
                ..
            } => {
                let options = options.unwrap_or_default();
                // Bob inherited the host seat, so the round-over question
                // lands on him
                let reply = if options.iter().any(|o| o == "new round") {
                    "quit"
                } else {
                    "stand"
                };
                prompt::deliver(
                    &state,
                    sb,
                    PromptReply {
                        value: Some(json!(reply)),
                        cancel: None,
                    },
                );
            }
            ServerMessage::GameEnded => break,
            _ => {}
        }
    }
    assert!(saw_bob_bet_prompt, "Bob should still have been asked to bet");

    let s = state.inner.lock();
    let room = s.rooms.get(&room_id).unwrap();
    assert_eq!(room.players.len(), 1);
    assert!(room.players[0].is_host);
    assert!(!room.is_playing);
    assert!(s.sessions.get(&sa).is_none(), "disconnect drops the session");
}

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn ws_next(ws: &mut WsClient) -> serde_json::Value {
    use futures::StreamExt as _;
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn ws_send(ws: &mut WsClient, value: serde_json::Value) {
    use futures::SinkExt as _;
    ws.send(tokio_tungstenite::tungstenite::Message::Text(
        value.to_string(),
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn create_and_join_over_a_real_socket() {
    let state = test_state();
    let app = crate::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let url = format!("ws://{addr}/ws");

    let (mut alice, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let hello = ws_next(&mut alice).await;
    assert_eq!(hello["type"], "connected");
    assert!(hello["sessionId"].is_string());

    ws_send(&mut alice, json!({"type": "identify", "name": "Alice"})).await;
    let identified = ws_next(&mut alice).await;
    assert_eq!(identified["type"], "identified");
    assert_eq!(identified["name"], "Alice");

    ws_send(&mut alice, json!({"type": "room_create"})).await;
    let joined = ws_next(&mut alice).await;
    assert_eq!(joined["type"], "room_joined");
    assert_eq!(joined["isHost"], true);
    let room_id = joined["room"]["id"].as_str().unwrap().to_owned();
    let roster = ws_next(&mut alice).await;
    assert_eq!(roster["type"], "room_players");

    let (mut bob, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    ws_next(&mut bob).await; // connected
    ws_send(&mut bob, json!({"type": "identify", "name": "Bob"})).await;
    ws_next(&mut bob).await; // identified
    ws_send(
        &mut bob,
        json!({"type": "room_join", "roomId": room_id.to_lowercase()}),
    )
    .await;
    let joined = ws_next(&mut bob).await;
    assert_eq!(joined["type"], "room_joined");
    assert_eq!(joined["isHost"], false);
    assert_eq!(joined["room"]["id"], room_id.as_str());
    let roster = ws_next(&mut bob).await;
    assert_eq!(roster["type"], "room_players");
    assert_eq!(roster["players"].as_array().unwrap().len(), 2);

    // Alice observes the same roster update
    let roster = ws_next(&mut alice).await;
    assert_eq!(roster["type"], "room_players");
    assert_eq!(roster["players"].as_array().unwrap().len(), 2);
}
