//! Game registry and the driver-facing room I/O adapter. Factories are
//! plain values registered once at process start; each produces the
//! long-running driver future for one room.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use cardroom_protocol::{
    GameMeta, PlayerId, PromptKind, RoomId, ServerMessage,
};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::prompt::{self, PromptOutcome};
use crate::state::AppState;

/// Per-room, per-game knobs carried from `room_create`.
#[derive(Debug, Clone)]
pub struct GameSettings {
    pub min_bet: u64,
    pub max_bet: u64,
    pub deck_count: usize,
}

impl Default for GameSettings {
    fn default() -> Self {
        GameSettings {
            min_bet: 1,
            max_bet: 1000,
            deck_count: 6,
        }
    }
}

/// A seat handed to the driver at start: identity plus the room's chip
/// allotment.
#[derive(Debug, Clone)]
pub struct GamePlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub chips: u64,
}

/// Control messages the room manager sends a live driver. Applied by the
/// driver between prompt suspensions.
#[derive(Debug)]
pub enum DriverControl {
    PlayerLeft {
        player: PlayerId,
        /// Current host after the departure (unchanged unless the host left).
        new_host: PlayerId,
    },
}

pub struct GameContext {
    pub io: RoomIo,
    pub players: Vec<GamePlayer>,
    pub host: PlayerId,
    pub settings: GameSettings,
    pub control: mpsc::UnboundedReceiver<DriverControl>,
}

pub trait GameFactory: Send + Sync {
    fn meta(&self) -> &GameMeta;
    fn create(&self, ctx: GameContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Default)]
pub struct GameRegistry {
    factories: HashMap<String, Arc<dyn GameFactory>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn GameFactory>) -> anyhow::Result<()> {
        let tag = factory.meta().game_type.clone();
        if self.factories.contains_key(&tag) {
            bail!("game type `{tag}` is already registered");
        }
        self.factories.insert(tag, factory);
        Ok(())
    }

    pub fn factory(&self, tag: &str) -> Option<Arc<dyn GameFactory>> {
        self.factories.get(tag).cloned()
    }

    pub fn available_games(&self) -> Vec<GameMeta> {
        let mut games: Vec<GameMeta> =
            self.factories.values().map(|f| f.meta().clone()).collect();
        games.sort_by(|a, b| a.game_type.cmp(&b.game_type));
        games
    }
}

/// Two orthogonal capabilities behind one value: room fan-out, and delivery
/// or prompting of a single player. Everything routes through the
/// multiplexer's shared state.
#[derive(Clone)]
pub struct RoomIo {
    state: AppState,
    room_id: RoomId,
}

impl RoomIo {
    pub fn new(state: AppState, room_id: RoomId) -> Self {
        RoomIo { state, room_id }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn broadcast(&self, msg: &ServerMessage) {
        let s = self.state.inner.lock();
        s.broadcast_to_room(&self.room_id, msg);
    }

    pub fn send_to_player(&self, player: PlayerId, msg: &ServerMessage) {
        let s = self.state.inner.lock();
        s.send_to_player(player, msg);
    }

    /// Emit a prompt to `player` and suspend until the answer or a
    /// cancellation arrives. A player with no live connection resolves as
    /// cancelled immediately.
    pub async fn prompt(&self, player: PlayerId, prompt: ServerMessage) -> PromptOutcome {
        let rx = {
            let mut s = self.state.inner.lock();
            let Some(session) = s.session_for_player(player) else {
                return PromptOutcome::cancelled();
            };
            prompt::begin_locked(&mut s, session, prompt)
        };
        rx.await.unwrap_or_else(|_| PromptOutcome::cancelled())
    }

    pub async fn prompt_text(
        &self,
        player: PlayerId,
        message: String,
        placeholder: Option<String>,
    ) -> PromptOutcome {
        self.prompt(
            player,
            ServerMessage::Prompt {
                prompt_type: PromptKind::Text,
                message,
                placeholder,
                default: None,
                options: None,
                initial: None,
            },
        )
        .await
    }

    pub async fn prompt_select(
        &self,
        player: PlayerId,
        message: String,
        options: Vec<String>,
    ) -> PromptOutcome {
        self.prompt(
            player,
            ServerMessage::Prompt {
                prompt_type: PromptKind::Select,
                message,
                placeholder: None,
                default: None,
                options: Some(options),
                initial: None,
            },
        )
        .await
    }
}
