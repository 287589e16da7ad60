//! Pure Blackjack state transitions. The table owns the shoe, the dealer and
//! the seated players; every transition fails with a contractual reason when
//! its preconditions are unmet. No I/O happens here.

use cardroom_protocol::{
    Card, DeckConfig, GamePhase, HandId, HandStatus, PlayerId, PlayerView, ServerMessage, Shoe,
    SplitView,
};
use thiserror::Error;

pub const BLACKJACK: u32 = 21;
/// Dealer draws to 16, stands on 17 (soft or hard).
pub const DEALER_STANDS_AT: u32 = 17;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RulesError {
    #[error("action is not valid in the {0:?} phase")]
    WrongPhase(GamePhase),
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("player is not seated at this table")]
    UnknownPlayer,
    #[error("bet must be a positive amount no larger than your chips")]
    BetOutOfRange,
    #[error("bet has already been placed")]
    AlreadyBet,
    #[error("every seated player must bet before the deal")]
    MissingBet,
    #[error("double down requires a two-card hand and chips to cover the bet")]
    CannotDouble,
    #[error("split requires a two-card pair, no prior split, and chips to cover the bet")]
    CannotSplit,
    #[error("the shoe is out of cards")]
    EmptyShoe,
}

/// Sum with every Ace at 11, then demote Aces to 1 one at a time while the
/// total exceeds 21.
pub fn hand_value(cards: &[Card]) -> u32 {
    let mut total: u32 = cards.iter().map(|c| u32::from(c.value)).sum();
    let mut soft_aces = cards
        .iter()
        .filter(|c| c.rank == cardroom_protocol::Rank::Ace)
        .count();
    while total > BLACKJACK && soft_aces > 0 {
        total -= 10;
        soft_aces -= 1;
    }
    total
}

/// Exactly two cards totalling 21.
pub fn is_blackjack(cards: &[Card]) -> bool {
    cards.len() == 2 && hand_value(cards) == BLACKJACK
}

#[derive(Debug, Clone)]
pub struct SplitHand {
    pub hand_id: HandId,
    pub cards: Vec<Card>,
    pub bet: u64,
    pub status: HandStatus,
}

#[derive(Debug, Clone)]
pub struct Seat {
    pub player_id: PlayerId,
    pub hand_id: HandId,
    pub name: String,
    pub cards: Vec<Card>,
    pub bet: u64,
    pub chips: u64,
    pub status: HandStatus,
    /// Two-card 21 on the initial deal. A post-split 21 shows `blackjack`
    /// status but pays 1:1, so display and payout are tracked apart.
    pub natural: bool,
    pub round_start_chips: u64,
    pub split: Option<SplitHand>,
}

/// Per-player outcome of `resolve_round`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundResult {
    pub player_id: PlayerId,
    pub name: String,
    pub chips: u64,
    pub net: i64,
}

pub struct BlackjackTable {
    shoe: Shoe,
    dealer_hand_id: HandId,
    dealer_cards: Vec<Card>,
    dealer_status: HandStatus,
    dealer_natural: bool,
    players: Vec<Seat>,
    phase: GamePhase,
    /// Hand cursor: `cursor / 2` is the seat, odd values are the split hand,
    /// so a split child plays before the turn advances past its parent.
    cursor: usize,
}

impl BlackjackTable {
    pub fn new(players: Vec<(PlayerId, String, u64)>, deck_count: usize) -> Self {
        let players = players
            .into_iter()
            .map(|(player_id, name, chips)| Seat {
                player_id,
                hand_id: HandId::new(),
                name,
                cards: Vec::new(),
                bet: 0,
                chips,
                status: HandStatus::Playing,
                natural: false,
                round_start_chips: chips,
                split: None,
            })
            .collect();
        let mut table = BlackjackTable {
            shoe: Shoe::new(DeckConfig::blackjack(deck_count.max(1))),
            dealer_hand_id: HandId::new(),
            dealer_cards: Vec::new(),
            dealer_status: HandStatus::Playing,
            dealer_natural: false,
            players,
            phase: GamePhase::Betting,
            cursor: 0,
        };
        table.begin_round();
        table
    }

    /// Reset-then-shuffle plus a clean slate for every hand; a running round
    /// can therefore never draw from an empty shoe unless the composition
    /// itself is too small, which `deal_initial_cards`/`hit` surface as
    /// `EmptyShoe`.
    pub fn begin_round(&mut self) {
        self.shoe.reset();
        self.shoe.shuffle();
        self.dealer_cards.clear();
        self.dealer_status = HandStatus::Playing;
        self.dealer_natural = false;
        for seat in &mut self.players {
            seat.cards.clear();
            seat.bet = 0;
            seat.status = HandStatus::Playing;
            seat.natural = false;
            seat.split = None;
            seat.round_start_chips = seat.chips;
        }
        self.phase = GamePhase::Betting;
        self.cursor = 0;
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn seats(&self) -> &[Seat] {
        &self.players
    }

    pub fn seat(&self, player: PlayerId) -> Option<&Seat> {
        self.players.iter().find(|s| s.player_id == player)
    }

    pub fn has_player(&self, player: PlayerId) -> bool {
        self.seat(player).is_some()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|s| s.player_id).collect()
    }

    pub fn dealer_cards(&self) -> &[Card] {
        &self.dealer_cards
    }

    pub fn dealer_status(&self) -> HandStatus {
        self.dealer_status
    }

    fn seat_mut(&mut self, player: PlayerId) -> Result<&mut Seat, RulesError> {
        self.players
            .iter_mut()
            .find(|s| s.player_id == player)
            .ok_or(RulesError::UnknownPlayer)
    }

    fn draw(&mut self) -> Result<Card, RulesError> {
        self.shoe.draw().ok_or(RulesError::EmptyShoe)
    }

    pub fn place_bet(&mut self, player: PlayerId, amount: u64) -> Result<(), RulesError> {
        if self.phase != GamePhase::Betting {
            return Err(RulesError::WrongPhase(self.phase));
        }
        let seat = self.seat_mut(player)?;
        if seat.bet > 0 {
            return Err(RulesError::AlreadyBet);
        }
        if amount == 0 || amount > seat.chips {
            return Err(RulesError::BetOutOfRange);
        }
        seat.chips -= amount;
        seat.bet = amount;
        Ok(())
    }

    /// betting → dealing → player-turn. Two cards per player and two to the
    /// dealer, dealt in interleaved passes; any two-card 21 becomes a
    /// natural blackjack. If no hand is left to act the phase moves straight
    /// to dealer-turn.
    pub fn deal_initial_cards(&mut self) -> Result<(), RulesError> {
        if self.phase != GamePhase::Betting {
            return Err(RulesError::WrongPhase(self.phase));
        }
        if self.players.iter().any(|s| s.bet == 0) {
            return Err(RulesError::MissingBet);
        }
        self.phase = GamePhase::Dealing;
        for _ in 0..2 {
            for i in 0..self.players.len() {
                let card = self.draw()?;
                self.players[i].cards.push(card);
            }
            let card = self.draw()?;
            self.dealer_cards.push(card);
        }
        for seat in &mut self.players {
            if is_blackjack(&seat.cards) {
                seat.status = HandStatus::Blackjack;
                seat.natural = true;
            }
        }
        self.dealer_natural = is_blackjack(&self.dealer_cards);
        self.phase = GamePhase::PlayerTurn;
        self.cursor = 0;
        self.normalize_cursor();
        Ok(())
    }

    fn hand_status(&self, hand: usize) -> Option<HandStatus> {
        let seat = self.players.get(hand / 2)?;
        if hand % 2 == 0 {
            Some(seat.status)
        } else {
            seat.split.as_ref().map(|s| s.status)
        }
    }

    fn hand_active(&self, hand: usize) -> bool {
        self.hand_status(hand) == Some(HandStatus::Playing)
    }

    fn set_hand_status(&mut self, hand: usize, status: HandStatus) {
        let Some(seat) = self.players.get_mut(hand / 2) else {
            return;
        };
        if hand % 2 == 0 {
            seat.status = status;
        } else if let Some(split) = seat.split.as_mut() {
            split.status = status;
        }
    }

    /// Settle the cursor on the nearest active hand at or after its current
    /// position, or transition to dealer-turn when none remains.
    fn normalize_cursor(&mut self) -> Option<usize> {
        if self.phase != GamePhase::PlayerTurn {
            return None;
        }
        let total = self.players.len() * 2;
        if total == 0 {
            self.phase = GamePhase::DealerTurn;
            return None;
        }
        for offset in 0..total {
            let hand = (self.cursor + offset) % total;
            if self.hand_active(hand) {
                self.cursor = hand;
                return Some(hand);
            }
        }
        self.phase = GamePhase::DealerTurn;
        None
    }

    /// The owner of the hand that is up next, and whether it is a split
    /// hand. `None` once the phase has moved past player-turn.
    pub fn current_turn(&mut self) -> Option<(PlayerId, bool)> {
        let hand = self.normalize_cursor()?;
        let seat = &self.players[hand / 2];
        Some((seat.player_id, hand % 2 == 1))
    }

    fn current_hand_checked(&mut self, player: PlayerId) -> Result<usize, RulesError> {
        if self.phase != GamePhase::PlayerTurn {
            return Err(RulesError::WrongPhase(self.phase));
        }
        let Some(hand) = self.normalize_cursor() else {
            return Err(RulesError::WrongPhase(self.phase));
        };
        if self.players[hand / 2].player_id != player {
            return Err(RulesError::NotYourTurn);
        }
        Ok(hand)
    }

    /// Draw one card to the current hand; bust past 21, auto-stay on 21.
    pub fn hit(&mut self, player: PlayerId) -> Result<Card, RulesError> {
        let hand = self.current_hand_checked(player)?;
        let card = self.draw()?;
        let seat = &mut self.players[hand / 2];
        let (cards, status) = if hand % 2 == 0 {
            (&mut seat.cards, &mut seat.status)
        } else {
            let split = seat.split.as_mut().ok_or(RulesError::NotYourTurn)?;
            (&mut split.cards, &mut split.status)
        };
        cards.push(card);
        let value = hand_value(cards);
        if value > BLACKJACK {
            *status = HandStatus::Bust;
        } else if value == BLACKJACK {
            *status = HandStatus::Stay;
        }
        Ok(card)
    }

    pub fn stand(&mut self, player: PlayerId) -> Result<(), RulesError> {
        let hand = self.current_hand_checked(player)?;
        self.set_hand_status(hand, HandStatus::Stay);
        Ok(())
    }

    pub fn can_double_down(&self, player: PlayerId) -> bool {
        if self.phase != GamePhase::PlayerTurn || !self.hand_active(self.cursor) {
            return false;
        }
        let Some(seat) = self.players.get(self.cursor / 2) else {
            return false;
        };
        if seat.player_id != player {
            return false;
        }
        let (cards, bet) = if self.cursor % 2 == 0 {
            (&seat.cards, seat.bet)
        } else {
            match &seat.split {
                Some(split) => (&split.cards, split.bet),
                None => return false,
            }
        };
        cards.len() == 2 && seat.chips >= bet
    }

    /// Double the bet, debit the delta, draw exactly one card, then stay
    /// (or bust).
    pub fn double_down(&mut self, player: PlayerId) -> Result<Card, RulesError> {
        let hand = self.current_hand_checked(player)?;
        if !self.can_double_down(player) {
            return Err(RulesError::CannotDouble);
        }
        let card = self.draw()?;
        let seat = &mut self.players[hand / 2];
        if hand % 2 == 0 {
            seat.chips -= seat.bet;
            seat.bet *= 2;
            seat.cards.push(card);
            seat.status = if hand_value(&seat.cards) > BLACKJACK {
                HandStatus::Bust
            } else {
                HandStatus::Stay
            };
        } else if let Some(split) = seat.split.as_mut() {
            seat.chips -= split.bet;
            split.bet *= 2;
            split.cards.push(card);
            split.status = if hand_value(&split.cards) > BLACKJACK {
                HandStatus::Bust
            } else {
                HandStatus::Stay
            };
        }
        Ok(card)
    }

    pub fn can_split(&self, player: PlayerId) -> bool {
        if self.phase != GamePhase::PlayerTurn || self.cursor % 2 != 0 {
            return false;
        }
        let Some(seat) = self.players.get(self.cursor / 2) else {
            return false;
        };
        seat.player_id == player
            && seat.status == HandStatus::Playing
            && seat.split.is_none()
            && seat.cards.len() == 2
            && seat.cards[0].rank == seat.cards[1].rank
            && seat.chips >= seat.bet
    }

    /// Move the second card of a two-card pair into a split child with the
    /// same bet and a fresh hand id, then deal one card to each hand. The
    /// cursor stays on the parent so its first half plays next.
    pub fn split(&mut self, player: PlayerId) -> Result<(), RulesError> {
        let hand = self.current_hand_checked(player)?;
        if !self.can_split(player) {
            return Err(RulesError::CannotSplit);
        }
        let to_primary = self.draw()?;
        let to_split = self.draw()?;
        let seat = &mut self.players[hand / 2];
        let moved = seat.cards.pop().ok_or(RulesError::CannotSplit)?;
        seat.chips -= seat.bet;
        seat.cards.push(to_primary);
        if is_blackjack(&seat.cards) {
            seat.status = HandStatus::Blackjack;
        }
        let split_cards = vec![moved, to_split];
        let status = if is_blackjack(&split_cards) {
            HandStatus::Blackjack
        } else {
            HandStatus::Playing
        };
        seat.split = Some(SplitHand {
            hand_id: HandId::new(),
            cards: split_cards,
            bet: seat.bet,
            status,
        });
        Ok(())
    }

    /// Advance to the next active hand; when none remains the phase becomes
    /// dealer-turn.
    pub fn next_player(&mut self) {
        if self.phase != GamePhase::PlayerTurn {
            return;
        }
        let total = self.players.len() * 2;
        if total == 0 {
            self.phase = GamePhase::DealerTurn;
            return;
        }
        for offset in 1..=total {
            let hand = (self.cursor + offset) % total;
            if self.hand_active(hand) {
                self.cursor = hand;
                return;
            }
        }
        self.phase = GamePhase::DealerTurn;
    }

    /// If every hand is already bust the dealer stands and the round ends
    /// immediately; otherwise the dealer draws to 16 and stands on 17.
    pub fn dealer_play(&mut self) -> Result<(), RulesError> {
        if self.phase != GamePhase::DealerTurn {
            return Err(RulesError::WrongPhase(self.phase));
        }
        let all_bust = self.players.iter().all(|seat| {
            seat.status == HandStatus::Bust
                && seat
                    .split
                    .as_ref()
                    .map_or(true, |s| s.status == HandStatus::Bust)
        });
        if all_bust {
            self.dealer_status = HandStatus::Stay;
        } else {
            while hand_value(&self.dealer_cards) < DEALER_STANDS_AT {
                let card = self.draw()?;
                self.dealer_cards.push(card);
            }
            self.dealer_status = if hand_value(&self.dealer_cards) > BLACKJACK {
                HandStatus::Bust
            } else {
                HandStatus::Stay
            };
        }
        self.phase = GamePhase::RoundOver;
        Ok(())
    }

    /// Credit every hand's payout against the dealer and report each
    /// player's net change for the round.
    pub fn resolve_round(&mut self) -> Result<Vec<RoundResult>, RulesError> {
        if self.phase != GamePhase::RoundOver {
            return Err(RulesError::WrongPhase(self.phase));
        }
        let dealer_total = hand_value(&self.dealer_cards);
        let dealer_bust = self.dealer_status == HandStatus::Bust;
        let dealer_natural = self.dealer_natural;
        for seat in &mut self.players {
            let mut credit = payout(
                hand_value(&seat.cards),
                seat.status,
                seat.natural,
                seat.bet,
                dealer_total,
                dealer_bust,
                dealer_natural,
            );
            if let Some(split) = &seat.split {
                credit += payout(
                    hand_value(&split.cards),
                    split.status,
                    false,
                    split.bet,
                    dealer_total,
                    dealer_bust,
                    dealer_natural,
                );
            }
            seat.chips += credit;
        }
        Ok(self
            .players
            .iter()
            .map(|seat| RoundResult {
                player_id: seat.player_id,
                name: seat.name.clone(),
                chips: seat.chips,
                net: seat.chips as i64 - seat.round_start_chips as i64,
            })
            .collect())
    }

    /// Drop seats that ran out of chips between rounds.
    pub fn remove_broke(&mut self) -> Vec<(PlayerId, String)> {
        let broke: Vec<(PlayerId, String)> = self
            .players
            .iter()
            .filter(|s| s.chips == 0)
            .map(|s| (s.player_id, s.name.clone()))
            .collect();
        self.players.retain(|s| s.chips > 0);
        broke
    }

    /// Applied when a member leaves mid-game: the seat goes bust with zero
    /// chips and is removed, the cursor is repaired, and the phase moves to
    /// dealer-turn if no active hand remains. Returns whether any players
    /// are left.
    pub fn remove_player(&mut self, player: PlayerId) -> bool {
        let Some(pos) = self.players.iter().position(|s| s.player_id == player) else {
            return !self.players.is_empty();
        };
        {
            let seat = &mut self.players[pos];
            seat.status = HandStatus::Bust;
            seat.chips = 0;
            if let Some(split) = seat.split.as_mut() {
                split.status = HandStatus::Bust;
            }
        }
        self.players.remove(pos);
        if self.phase == GamePhase::PlayerTurn {
            let removed_base = pos * 2;
            if self.cursor >= removed_base + 2 {
                self.cursor -= 2;
            } else if self.cursor >= removed_base {
                self.cursor = removed_base;
            }
            let total = self.players.len() * 2;
            if total == 0 {
                self.phase = GamePhase::DealerTurn;
            } else {
                if self.cursor >= total {
                    self.cursor = 0;
                }
                self.normalize_cursor();
            }
        }
        !self.players.is_empty()
    }

    /// Published game state. The dealer's hole card stays hidden while
    /// players are still acting.
    pub fn snapshot(&self, message: impl Into<String>) -> ServerMessage {
        let hide_hole = self.phase == GamePhase::PlayerTurn && self.dealer_cards.len() >= 2;
        let dealer_hand = if hide_hole {
            vec![self.dealer_cards[0]]
        } else {
            self.dealer_cards.clone()
        };
        ServerMessage::GameState {
            phase: self.phase,
            dealer: PlayerView {
                player_id: PlayerId::DEALER,
                hand_id: self.dealer_hand_id,
                name: "Dealer".to_owned(),
                hand: dealer_hand,
                bet: 0,
                chips: 0,
                status: self.dealer_status,
                split: None,
            },
            players: self.players.iter().map(seat_view).collect(),
            message: message.into(),
        }
    }
}

fn seat_view(seat: &Seat) -> PlayerView {
    PlayerView {
        player_id: seat.player_id,
        hand_id: seat.hand_id,
        name: seat.name.clone(),
        hand: seat.cards.clone(),
        bet: seat.bet,
        chips: seat.chips,
        status: seat.status,
        split: seat.split.as_ref().map(|split| SplitView {
            hand_id: split.hand_id,
            parent_id: seat.player_id,
            hand: split.cards.clone(),
            bet: split.bet,
            status: split.status,
        }),
    }
}

fn payout(
    player_total: u32,
    status: HandStatus,
    natural: bool,
    bet: u64,
    dealer_total: u32,
    dealer_bust: bool,
    dealer_natural: bool,
) -> u64 {
    use std::cmp::Ordering;
    if status == HandStatus::Bust {
        return 0;
    }
    if natural && dealer_natural {
        return bet;
    }
    if natural {
        // 3:2, floored at odd bet sizes
        return bet + bet * 3 / 2;
    }
    if dealer_natural {
        return 0;
    }
    if dealer_bust {
        return 2 * bet;
    }
    match player_total.cmp(&dealer_total) {
        Ordering::Greater => 2 * bet,
        Ordering::Equal => bet,
        Ordering::Less => 0,
    }
}
