//! The per-room Blackjack driver: a long-running task that composes the
//! rules engine with the prompt router, broadcasting a snapshot after every
//! observable change. Player departures arrive on the control channel and
//! are applied between prompt suspensions.

use std::time::Duration;

use anyhow::anyhow;
use cardroom_protocol::{PlayerId, ServerMessage, SpinnerAction};
use tokio::sync::mpsc;
use tracing::info;

use super::rules::{BlackjackTable, RoundResult, RulesError};
use crate::registry::{DriverControl, GameContext, RoomIo};

const DEALER_PAUSE: Duration = Duration::from_secs(1);

enum RoundFlow {
    NextRound,
    GameOver,
}

enum BetFlow {
    Placed,
    Skipped,
    GameOver,
}

pub struct BlackjackDriver {
    io: RoomIo,
    control: mpsc::UnboundedReceiver<DriverControl>,
    table: BlackjackTable,
    host: PlayerId,
    /// Players who busted out in earlier rounds, kept for the standings.
    eliminated: Vec<(String, u64)>,
}

impl BlackjackDriver {
    pub fn new(ctx: GameContext) -> Self {
        let GameContext {
            io,
            players,
            host,
            settings,
            control,
        } = ctx;
        let table = BlackjackTable::new(
            players
                .into_iter()
                .map(|p| (p.player_id, p.name, p.chips))
                .collect(),
            settings.deck_count,
        );
        BlackjackDriver {
            io,
            control,
            table,
            host,
            eliminated: Vec::new(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        self.io.broadcast(&ServerMessage::Intro {
            message: "Welcome to Blackjack! Beat the dealer without going over 21.".to_owned(),
        });
        loop {
            match self.play_round().await? {
                RoundFlow::NextRound => self.table.begin_round(),
                RoundFlow::GameOver => break,
            }
        }
        self.finish();
        Ok(())
    }

    async fn play_round(&mut self) -> anyhow::Result<RoundFlow> {
        // betting, in seat order
        for player in self.table.player_ids() {
            self.drain_control();
            if self.table.player_count() == 0 {
                return Ok(RoundFlow::GameOver);
            }
            if !self.table.has_player(player) {
                continue;
            }
            match self.ask_bet(player).await {
                BetFlow::Placed => {}
                BetFlow::Skipped => continue,
                BetFlow::GameOver => return Ok(RoundFlow::GameOver),
            }
        }
        self.drain_control();
        if self.table.player_count() == 0 {
            return Ok(RoundFlow::GameOver);
        }
        self.table.deal_initial_cards().map_err(driver_bug)?;
        self.broadcast_state("Cards are dealt");

        // player turns, one active hand at a time
        loop {
            self.drain_control();
            if self.table.player_count() == 0 {
                return Ok(RoundFlow::GameOver);
            }
            let Some((player, is_split)) = self.table.current_turn() else {
                break;
            };
            let name = self
                .table
                .seat(player)
                .map(|s| s.name.clone())
                .unwrap_or_default();
            let hand_label = if is_split {
                format!("{name} (split hand)")
            } else {
                name.clone()
            };
            self.broadcast_state(&format!("{hand_label} to act"));

            let mut options = vec!["hit".to_owned(), "stand".to_owned()];
            if self.table.can_double_down(player) {
                options.push("double".to_owned());
            }
            if self.table.can_split(player) {
                options.push("split".to_owned());
            }
            options.push("quit".to_owned());

            let outcome = self
                .io
                .prompt_select(player, format!("{hand_label}, choose your action"), options)
                .await;
            if outcome.cancelled {
                self.drain_control();
                if !self.table.has_player(player) {
                    continue;
                }
                info!("player cancelled their turn; ending the game");
                return Ok(RoundFlow::GameOver);
            }
            let Some(action) = outcome.value.as_ref().and_then(|v| v.as_str()).map(str::to_owned)
            else {
                self.io.send_to_player(
                    player,
                    &ServerMessage::ValidationError {
                        message: "choose one of the offered actions".to_owned(),
                    },
                );
                continue;
            };

            let step = match action.as_str() {
                "hit" => match self.table.hit(player) {
                    Ok(card) => {
                        self.log(format!("{name} hits and draws {card}"));
                        Some(true)
                    }
                    Err(err) => {
                        self.report_rules_error(player, err)?;
                        None
                    }
                },
                "stand" => match self.table.stand(player) {
                    Ok(()) => {
                        self.log(format!("{hand_label} stands"));
                        Some(true)
                    }
                    Err(err) => {
                        self.report_rules_error(player, err)?;
                        None
                    }
                },
                "double" => match self.table.double_down(player) {
                    Ok(card) => {
                        self.log(format!("{name} doubles down and draws {card}"));
                        Some(true)
                    }
                    Err(err) => {
                        self.report_rules_error(player, err)?;
                        None
                    }
                },
                "split" => match self.table.split(player) {
                    Ok(()) => {
                        self.log(format!("{name} splits their pair"));
                        // stay on the parent so its first half plays next
                        Some(false)
                    }
                    Err(err) => {
                        self.report_rules_error(player, err)?;
                        None
                    }
                },
                "quit" => {
                    self.log(format!("{name} quits the game"));
                    return Ok(RoundFlow::GameOver);
                }
                _ => {
                    self.io.send_to_player(
                        player,
                        &ServerMessage::ValidationError {
                            message: "choose one of the offered actions".to_owned(),
                        },
                    );
                    None
                }
            };
            if let Some(advance) = step {
                if advance {
                    self.table.next_player();
                }
            }
        }

        // dealer turn
        self.io.broadcast(&ServerMessage::Spinner {
            action: SpinnerAction::Start,
            message: Some("Dealer is playing…".to_owned()),
        });
        tokio::time::sleep(DEALER_PAUSE).await;
        self.table.dealer_play().map_err(driver_bug)?;
        self.io.broadcast(&ServerMessage::Spinner {
            action: SpinnerAction::Stop,
            message: None,
        });

        // round over: pay out, prune, and ask the host about another round
        let results = self.table.resolve_round().map_err(driver_bug)?;
        self.broadcast_state("Round over");
        self.io.broadcast(&ServerMessage::Note {
            title: "Round Results".to_owned(),
            message: round_results_note(&results),
        });
        for (_, name) in self.table.remove_broke() {
            self.log(format!("{name} is out of chips"));
            self.eliminated.push((name, 0));
        }
        self.drain_control();
        if self.table.player_count() == 0 {
            return Ok(RoundFlow::GameOver);
        }

        loop {
            let host = self.host;
            let outcome = self
                .io
                .prompt_select(
                    host,
                    "Play another round?".to_owned(),
                    vec!["new round".to_owned(), "quit".to_owned()],
                )
                .await;
            if outcome.cancelled {
                self.drain_control();
                if self.table.player_count() == 0 {
                    return Ok(RoundFlow::GameOver);
                }
                if self.host != host {
                    // succession happened; put the question to the new host
                    continue;
                }
                return Ok(RoundFlow::GameOver);
            }
            match outcome.value.as_ref().and_then(|v| v.as_str()) {
                Some("new round") => return Ok(RoundFlow::NextRound),
                Some("quit") => return Ok(RoundFlow::GameOver),
                _ => {
                    self.io.send_to_player(
                        host,
                        &ServerMessage::ValidationError {
                            message: "choose one of the offered options".to_owned(),
                        },
                    );
                }
            }
        }
    }

    /// Text prompt with the positive-integer-within-chips validator. The
    /// router does not enforce it; rejected values get a `validation_error`
    /// and a fresh prompt.
    async fn ask_bet(&mut self, player: PlayerId) -> BetFlow {
        loop {
            let Some(seat) = self.table.seat(player) else {
                return BetFlow::Skipped;
            };
            let name = seat.name.clone();
            let chips = seat.chips;
            self.broadcast_state(&format!("Waiting for {name} to bet"));
            let outcome = self
                .io
                .prompt_text(
                    player,
                    format!("{name}, enter your bet (chips: {chips}):"),
                    Some("bet amount".to_owned()),
                )
                .await;
            if outcome.cancelled {
                self.drain_control();
                if !self.table.has_player(player) {
                    // the member is gone; play on with whoever is left
                    return BetFlow::Skipped;
                }
                info!("player cancelled the bet prompt; ending the game");
                return BetFlow::GameOver;
            }
            let Some(amount) = parse_bet(outcome.value.as_ref()) else {
                self.io.send_to_player(
                    player,
                    &ServerMessage::ValidationError {
                        message: "bet must be a positive whole number".to_owned(),
                    },
                );
                continue;
            };
            match self.table.place_bet(player, amount) {
                Ok(()) => {
                    self.log(format!("{name} bets {amount}"));
                    return BetFlow::Placed;
                }
                Err(err) => {
                    self.io.send_to_player(
                        player,
                        &ServerMessage::ValidationError {
                            message: err.to_string(),
                        },
                    );
                }
            }
        }
    }

    /// Apply queued departures. Runs between suspensions, so the table never
    /// changes under a waiting prompt.
    fn drain_control(&mut self) {
        while let Ok(msg) = self.control.try_recv() {
            match msg {
                DriverControl::PlayerLeft { player, new_host } => {
                    self.host = new_host;
                    let name = self.table.seat(player).map(|s| s.name.clone());
                    self.table.remove_player(player);
                    if let Some(name) = name {
                        info!(%player, "applying mid-game departure");
                        self.broadcast_state(&format!("{name} left the game"));
                    }
                }
            }
        }
    }

    fn report_rules_error(&self, player: PlayerId, err: RulesError) -> anyhow::Result<()> {
        if err == RulesError::EmptyShoe {
            return Err(driver_bug(err));
        }
        self.io.send_to_player(
            player,
            &ServerMessage::Warning {
                message: err.to_string(),
            },
        );
        Ok(())
    }

    fn broadcast_state(&self, message: &str) {
        self.io.broadcast(&self.table.snapshot(message));
    }

    fn log(&self, message: String) {
        self.io.broadcast(&ServerMessage::Log { message });
    }

    fn finish(&mut self) {
        let mut standings: Vec<(String, u64)> = self
            .table
            .seats()
            .iter()
            .map(|s| (s.name.clone(), s.chips))
            .collect();
        standings.append(&mut self.eliminated);
        standings.sort_by(|a, b| b.1.cmp(&a.1));
        let lines: Vec<String> = standings
            .iter()
            .enumerate()
            .map(|(i, (name, chips))| {
                let place = match i {
                    0 => "🥇".to_owned(),
                    1 => "🥈".to_owned(),
                    2 => "🥉".to_owned(),
                    n => format!("{}.", n + 1),
                };
                format!("{place} {name}: {chips} chips")
            })
            .collect();
        self.io.broadcast(&ServerMessage::Note {
            title: "Final Standings".to_owned(),
            message: lines.join("\n"),
        });
        self.io.broadcast(&ServerMessage::Outro {
            message: "Thanks for playing!".to_owned(),
        });
    }
}

fn driver_bug(err: RulesError) -> anyhow::Error {
    anyhow!("driver invariant violated: {err}")
}

fn parse_bet(value: Option<&serde_json::Value>) -> Option<u64> {
    let amount = match value? {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (amount > 0).then_some(amount)
}

fn round_results_note(results: &[RoundResult]) -> String {
    results
        .iter()
        .map(|r| {
            let sign = if r.net >= 0 { "+" } else { "" };
            format!("{}: {sign}{} (total {})", r.name, r.net, r.chips)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
