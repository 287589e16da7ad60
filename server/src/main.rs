use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use cardroom_protocol::{decode, encode, ClientMessage, Inbound, ServerMessage, SessionId};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod blackjack;
mod prompt;
mod registry;
mod rooms;
mod state;
#[cfg(test)]
mod tests;

use blackjack::BlackjackFactory;
use registry::GameRegistry;
use rooms::CreateRoomRequest;
use state::{AppState, ClientConnection, Outbound};

/// Frames above this limit are rejected and the connection closed (1009).
const MAX_FRAME_BYTES: usize = 64 * 1024;
/// Recurring malformed frames close the connection.
const MALFORMED_FRAME_LIMIT: u32 = 3;

#[derive(Parser)]
#[command(name = "cardroom-server", about = "Multiplayer card-game server")]
struct Cli {
    #[arg(long, default_value_t = 3000)]
    port: u16,
    #[arg(long, default_value = "localhost")]
    hostname: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let mut registry = GameRegistry::new();
    registry.register(Arc::new(BlackjackFactory::new()))?;
    let state = AppState::new(registry);

    let app = build_router(state.clone());
    let addr = format!("{}:{}", cli.hostname, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on ws://{addr}/ws");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// SIGINT drains every session: a final `disconnected` message, then a
/// normal-closure frame.
async fn shutdown_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        return;
    }
    info!("shutting down");
    let s = state.inner.lock();
    for conn in s.sessions.values() {
        let _ = conn
            .tx
            .send(Outbound::Message(encode(&ServerMessage::Disconnected)));
        let _ = conn.tx.send(Outbound::Close {
            code: 1000,
            reason: "Server shutting down",
        });
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // single writer per socket; everything else only enqueues
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Message(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let session = SessionId::new();
    {
        let mut s = state.inner.lock();
        s.sessions.insert(
            session,
            ClientConnection {
                session_id: session,
                tx: tx.clone(),
                player_id: None,
                name: None,
                room_id: None,
            },
        );
        s.send_to_session(session, &ServerMessage::Connected { session_id: session });
    }
    info!(%session, "session connected");

    let mut strikes = 0u32;
    while let Some(Ok(msg)) = receiver.next().await {
        let payload = match msg {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            // ping/pong are answered by the transport layer
            _ => continue,
        };
        match decode(&payload) {
            Ok(Inbound::Command(cmd)) => dispatch(&state, session, cmd),
            Ok(Inbound::PromptReply(reply)) => prompt::deliver(&state, session, reply),
            Err(err) => {
                strikes += 1;
                warn!(%session, %err, "dropping malformed frame");
                if strikes >= MALFORMED_FRAME_LIMIT {
                    warn!(%session, "closing connection after repeated malformed frames");
                    break;
                }
            }
        }
    }

    rooms::on_disconnect(&state, session);
    drop(tx);
    let _ = writer.await;
}

/// Inbound commands keyed off `type`; prompt replies are routed before this
/// point.
fn dispatch(state: &AppState, session: SessionId, cmd: ClientMessage) {
    debug!(%session, ?cmd, "dispatching");
    match cmd {
        ClientMessage::Identify { name } => rooms::identify(state, session, &name),
        ClientMessage::RoomList => rooms::list_rooms(state, session),
        ClientMessage::GameList => rooms::list_games(state, session),
        ClientMessage::RoomCreate {
            name,
            is_private,
            max_players,
            game_type,
            min_bet,
            max_bet,
            deck_count,
        } => rooms::create_room(
            state,
            session,
            CreateRoomRequest {
                name,
                is_private,
                max_players,
                game_type,
                min_bet,
                max_bet,
                deck_count,
            },
        ),
        ClientMessage::RoomJoin { room_id } => rooms::join_room(state, session, &room_id),
        ClientMessage::RoomLeave => rooms::leave_room(state, session),
        ClientMessage::RoomReady { ready } => rooms::set_ready(state, session, ready),
        ClientMessage::RoomStart => rooms::start_game(state, session),
    }
}
