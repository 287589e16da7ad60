//! Blackjack, the reference game: the rules engine, the room driver, and
//! the factory the registry hands out.

pub mod driver;
pub mod rules;

use cardroom_protocol::GameMeta;
use futures::future::BoxFuture;

use crate::registry::{GameContext, GameFactory};
use driver::BlackjackDriver;

pub struct BlackjackFactory {
    meta: GameMeta,
}

impl BlackjackFactory {
    pub fn new() -> Self {
        BlackjackFactory {
            meta: GameMeta {
                game_type: "blackjack".to_owned(),
                name: "Blackjack".to_owned(),
                category: "casino".to_owned(),
                description: "Beat the dealer's hand without going over 21.".to_owned(),
                min_players: 1,
                max_players: 6,
                icon: Some("🃏".to_owned()),
            },
        }
    }
}

impl Default for BlackjackFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl GameFactory for BlackjackFactory {
    fn meta(&self) -> &GameMeta {
        &self.meta
    }

    fn create(&self, ctx: GameContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(BlackjackDriver::new(ctx).run())
    }
}
