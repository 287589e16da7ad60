use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// ---- Typed identifiers ----

/// Stable for the life of one session; minted anew on each identify.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Reserved sentinel used for the dealer's seat in game snapshots.
    pub const DEALER: PlayerId = PlayerId(Uuid::nil());

    pub fn new() -> Self {
        PlayerId(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One per connection, minted at connect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distinguishes a primary hand from a split hand produced from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct HandId(Uuid);

impl HandId {
    pub fn new() -> Self {
        HandId(Uuid::new_v4())
    }
}

impl Default for HandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ---- Room codes ----

/// No ambiguous glyphs: 0/O and 1/I/L are excluded.
pub const ROOM_CODE_ALPHABET: &str = "23456789ABCDEFGHKLMNPQRSTUVWXYZ";
pub const ROOM_CODE_LEN: usize = 6;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RoomCodeError {
    #[error("room code must be exactly {ROOM_CODE_LEN} characters")]
    BadLength,
    #[error("room code contains characters outside the code alphabet")]
    BadAlphabet,
}

/// Canonical (upper-case) 6-character room code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Normalise user input: trim, upper-case, validate against the alphabet.
    /// Normalising an already-canonical code is the identity.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let code: String = input.trim().to_ascii_uppercase();
        if code.chars().count() != ROOM_CODE_LEN {
            return Err(RoomCodeError::BadLength);
        }
        if !code.chars().all(|c| ROOM_CODE_ALPHABET.contains(c)) {
            return Err(RoomCodeError::BadAlphabet);
        }
        Ok(RoomId(code))
    }

    pub fn random() -> Self {
        let bytes = ROOM_CODE_ALPHABET.as_bytes();
        let mut rng = thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| bytes[rng.gen_range(0..bytes.len())] as char)
            .collect();
        RoomId(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ---- Cards ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "9")]
    Nine,
    #[serde(rename = "10")]
    Ten,
    #[serde(rename = "J")]
    Jack,
    #[serde(rename = "Q")]
    Queen,
    #[serde(rename = "K")]
    King,
    #[serde(rename = "A")]
    Ace,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        };
        f.write_str(r)
    }
}

/// Immutable once dealt; `value` is assigned by the deck config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
    pub value: u8,
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.suit {
            Suit::Hearts => "♥",
            Suit::Diamonds => "♦",
            Suit::Clubs => "♣",
            Suit::Spades => "♠",
        };
        write!(f, "{}{}", self.rank, s)
    }
}

/// ---- Deck (shoe) ----

/// Composition of the shoe: which suits and ranks, the numeric value each
/// rank carries, and how many standard packs are combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckConfig {
    pub packs: usize,
    pub suits: Vec<Suit>,
    pub ranks: Vec<(Rank, u8)>,
}

impl DeckConfig {
    /// Standard 52-card packs with Blackjack values: 2-10 at face value,
    /// J/Q/K at 10, Ace at 11.
    pub fn blackjack(packs: usize) -> Self {
        let ranks = Rank::ALL
            .iter()
            .map(|&rank| {
                let value = match rank {
                    Rank::Jack | Rank::Queen | Rank::King => 10,
                    Rank::Ace => 11,
                    Rank::Two => 2,
                    Rank::Three => 3,
                    Rank::Four => 4,
                    Rank::Five => 5,
                    Rank::Six => 6,
                    Rank::Seven => 7,
                    Rank::Eight => 8,
                    Rank::Nine => 9,
                    Rank::Ten => 10,
                };
                (rank, value)
            })
            .collect();
        DeckConfig {
            packs,
            suits: Suit::ALL.to_vec(),
            ranks,
        }
    }

    /// Cards in one full composition.
    pub fn size(&self) -> usize {
        self.packs * self.suits.len() * self.ranks.len()
    }
}

/// Multi-deck shoe. `draw` pops from the tail; the rules engine must
/// `reset` + `shuffle` before every round so a running round never sees an
/// empty shoe.
#[derive(Debug, Clone)]
pub struct Shoe {
    pub cards: Vec<Card>,
    config: DeckConfig,
}

impl Shoe {
    /// Builds the shoe in canonical order.
    pub fn new(config: DeckConfig) -> Self {
        let mut shoe = Shoe {
            cards: Vec::with_capacity(config.size()),
            config,
        };
        shoe.reset();
        shoe
    }

    /// Reload the configured composition in canonical order.
    pub fn reset(&mut self) {
        self.cards.clear();
        for _ in 0..self.config.packs {
            for &suit in &self.config.suits {
                for &(rank, value) in &self.config.ranks {
                    self.cards.push(Card { suit, rank, value });
                }
            }
        }
    }

    /// Fisher-Yates, uniform.
    pub fn shuffle(&mut self) {
        self.cards.shuffle(&mut thread_rng());
    }

    pub fn draw(&mut self) -> Option<Card> {
        self.cards.pop()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }
}

/// ---- Game state snapshots ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GamePhase {
    Betting,
    Dealing,
    PlayerTurn,
    DealerTurn,
    RoundOver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandStatus {
    Playing,
    Stay,
    Bust,
    Blackjack,
}

/// A split hand carries its own id and bet and references its parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SplitView {
    pub hand_id: HandId,
    pub parent_id: PlayerId,
    pub hand: Vec<Card>,
    pub bet: u64,
    pub status: HandStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub hand_id: HandId,
    pub name: String,
    pub hand: Vec<Card>,
    pub bet: u64,
    pub chips: u64,
    pub status: HandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitView>,
}

/// ---- Rooms and games on the wire ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub is_private: bool,
    pub is_playing: bool,
    pub game_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameMeta {
    #[serde(rename = "type")]
    pub game_type: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub min_players: usize,
    pub max_players: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayerInfo {
    pub player_id: PlayerId,
    pub name: String,
    pub is_ready: bool,
    pub is_host: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    Text,
    Select,
    Confirm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpinnerAction {
    Start,
    Stop,
    Message,
}

/// ---- Message vocabulary ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Identify {
        name: String,
    },
    RoomList,
    GameList,
    #[serde(rename_all = "camelCase")]
    RoomCreate {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        is_private: Option<bool>,
        #[serde(default)]
        max_players: Option<usize>,
        #[serde(default)]
        game_type: Option<String>,
        #[serde(default)]
        min_bet: Option<u64>,
        #[serde(default)]
        max_bet: Option<u64>,
        #[serde(default)]
        deck_count: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    RoomJoin {
        room_id: String,
    },
    RoomLeave,
    RoomReady {
        ready: bool,
    },
    RoomStart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected {
        session_id: SessionId,
    },
    #[serde(rename_all = "camelCase")]
    Identified {
        player_id: PlayerId,
        name: String,
    },
    Disconnected,
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    GameList {
        games: Vec<GameMeta>,
    },
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room: RoomSummary,
        is_host: bool,
    },
    RoomPlayers {
        players: Vec<RoomPlayerInfo>,
    },
    RoomLeft,
    RoomError {
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: PlayerId,
        player_name: String,
    },
    RoomReadyToStart,
    GameStarting,
    GameEnded,
    Intro {
        message: String,
    },
    Outro {
        message: String,
    },
    Log {
        message: String,
    },
    Note {
        title: String,
        message: String,
    },
    Warning {
        message: String,
    },
    ValidationError {
        message: String,
    },
    Spinner {
        action: SpinnerAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Prompt {
        prompt_type: PromptKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    GameState {
        phase: GamePhase,
        dealer: PlayerView,
        players: Vec<PlayerView>,
        message: String,
    },
}

/// ---- Codec ----

/// Prompt responses carry no `type` field; `cancel: true` marks a response
/// the client abandoned rather than answered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(ClientMessage),
    PromptReply(PromptReply),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is not a JSON object")]
    NotJson,
    #[error("malformed `{0}` command")]
    MalformedCommand(String),
}

const KNOWN_TYPES: &[&str] = &[
    "identify",
    "room_list",
    "game_list",
    "room_create",
    "room_join",
    "room_leave",
    "room_ready",
    "room_start",
];

/// Decode one inbound frame (text or binary). Objects whose `type` is not a
/// known command (including objects with no `type` at all) are prompt
/// replies. A known `type` with a malformed payload is a protocol error.
pub fn decode(frame: &[u8]) -> Result<Inbound, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(frame).map_err(|_| CodecError::NotJson)?;
    if !value.is_object() {
        return Err(CodecError::NotJson);
    }
    let tag: Option<String> = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_owned);
    match tag {
        Some(tag) if KNOWN_TYPES.contains(&tag.as_str()) => serde_json::from_value(value)
            .map(Inbound::Command)
            .map_err(|_| CodecError::MalformedCommand(tag)),
        _ => {
            let reply = serde_json::from_value(value).unwrap_or_default();
            Ok(Inbound::PromptReply(reply))
        }
    }
}

/// Encode one outbound message as newline-free single-line JSON.
pub fn encode(msg: &ServerMessage) -> String {
    serde_json::to_string(msg).expect("server messages always serialise")
}
