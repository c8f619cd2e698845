use crate::models::card::{cards_to_text, Card};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Betting round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Street {
    Preflop,
    Flop,
    Turn,
    River,
    Showdown,
}

impl Street {
    /// Street implied by the number of visible board cards
    pub fn from_board_count(count: usize) -> Option<Self> {
        match count {
            0 => Some(Street::Preflop),
            3 => Some(Street::Flop),
            4 => Some(Street::Turn),
            5 => Some(Street::River),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Street::Preflop => "preflop",
            Street::Flop => "flop",
            Street::Turn => "turn",
            Street::River => "river",
            Street::Showdown => "showdown",
        }
    }
}

impl fmt::Display for Street {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One seat as observed in a single capture cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSeatState {
    pub seat: u8,
    pub name: Option<String>,
    pub stack: Option<f64>,
    /// `Some(0.0)` means no bet in front of the player; `None` means unreadable
    pub current_bet: Option<f64>,
    pub active: bool,
    pub folded: bool,
    pub is_dealer: bool,
    /// Face-up cards, only populated at showdown
    pub hole_cards: Vec<Option<Card>>,
}

impl PlayerSeatState {
    pub fn empty(seat: u8) -> Self {
        Self {
            seat,
            name: None,
            stack: None,
            current_bet: None,
            active: false,
            folded: false,
            is_dealer: false,
            hole_cards: Vec::new(),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.active || self.folded
    }

    fn to_plain(&self) -> Value {
        json!({
            "seat": self.seat,
            "name": self.name,
            "stack": self.stack,
            "current_bet": self.current_bet,
            "active": self.active,
            "folded": self.folded,
            "is_dealer": self.is_dealer,
            "hole_cards": card_list(&self.hole_cards),
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvariantViolation {
    #[error("board has {0} cards (expected 0, 3, 4 or 5)")]
    IllegalBoardLength(usize),
    #[error("{0} hole cards (expected 0 or 2)")]
    IllegalHoleCardCount(usize),
    #[error("card {0} appears more than once")]
    DuplicateCard(Card),
    #[error("seat {0} appears more than once")]
    DuplicateSeat(u8),
}

/// Inputs for [`TableState::from_parts`]
#[derive(Debug, Clone, Deserialize)]
pub struct TableStateParts {
    pub pot: Option<f64>,
    pub stage: Option<Street>,
    pub board_cards: Vec<Option<Card>>,
    pub hole_cards: Vec<Option<Card>>,
    pub seats: Vec<PlayerSeatState>,
    pub dealer_seat: Option<u8>,
    pub small_blind_seat: Option<u8>,
    pub big_blind_seat: Option<u8>,
    pub hero_seat: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl TableStateParts {
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if Street::from_board_count(self.board_cards.len()).is_none() {
            return Err(InvariantViolation::IllegalBoardLength(self.board_cards.len()));
        }
        if !matches!(self.hole_cards.len(), 0 | 2) {
            return Err(InvariantViolation::IllegalHoleCardCount(self.hole_cards.len()));
        }

        let mut seen_cards = HashSet::new();
        let mut seen_seats = HashSet::new();
        for seat in &self.seats {
            if !seen_seats.insert(seat.seat) {
                return Err(InvariantViolation::DuplicateSeat(seat.seat));
            }
            if !matches!(seat.hole_cards.len(), 0 | 2) {
                return Err(InvariantViolation::IllegalHoleCardCount(seat.hole_cards.len()));
            }
        }

        let all_cards = self
            .board_cards
            .iter()
            .chain(&self.hole_cards)
            .chain(self.seats.iter().flat_map(|s| &s.hole_cards))
            .flatten();
        for card in all_cards {
            if !seen_cards.insert(*card) {
                return Err(InvariantViolation::DuplicateCard(*card));
            }
        }

        Ok(())
    }
}

/// Immutable snapshot of one poker table at one point in time.
///
/// Unknown values are `None` (or `null` in the plain mapping) and are never
/// conflated with a real zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TableStateParts")]
pub struct TableState {
    pot: Option<f64>,
    stage: Option<Street>,
    board_cards: Vec<Option<Card>>,
    hole_cards: Vec<Option<Card>>,
    seats: Vec<PlayerSeatState>,
    dealer_seat: Option<u8>,
    small_blind_seat: Option<u8>,
    big_blind_seat: Option<u8>,
    hero_seat: Option<u8>,
    active_players: usize,
    timestamp: DateTime<Utc>,
}

impl TryFrom<TableStateParts> for TableState {
    type Error = InvariantViolation;

    fn try_from(parts: TableStateParts) -> Result<Self, Self::Error> {
        Self::from_parts(parts)
    }
}

impl TableState {
    /// Validate and freeze a snapshot
    pub fn from_parts(parts: TableStateParts) -> Result<Self, InvariantViolation> {
        parts.check_invariants()?;

        let mut seats = parts.seats;
        seats.sort_by_key(|s| s.seat);
        let active_players = seats.iter().filter(|s| s.active).count();

        Ok(Self {
            pot: parts.pot,
            stage: parts.stage,
            board_cards: parts.board_cards,
            hole_cards: parts.hole_cards,
            seats,
            dealer_seat: parts.dealer_seat,
            small_blind_seat: parts.small_blind_seat,
            big_blind_seat: parts.big_blind_seat,
            hero_seat: parts.hero_seat,
            active_players,
            timestamp: parts.timestamp,
        })
    }

    /// Snapshot of a table with nothing recognized
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            pot: None,
            stage: None,
            board_cards: Vec::new(),
            hole_cards: Vec::new(),
            seats: Vec::new(),
            dealer_seat: None,
            small_blind_seat: None,
            big_blind_seat: None,
            hero_seat: None,
            active_players: 0,
            timestamp,
        }
    }

    pub fn pot(&self) -> Option<f64> {
        self.pot
    }

    pub fn stage(&self) -> Option<Street> {
        self.stage
    }

    pub fn board_cards(&self) -> &[Option<Card>] {
        &self.board_cards
    }

    pub fn hole_cards(&self) -> &[Option<Card>] {
        &self.hole_cards
    }

    pub fn seats(&self) -> &[PlayerSeatState] {
        &self.seats
    }

    pub fn seat(&self, seat: u8) -> Option<&PlayerSeatState> {
        self.seats.iter().find(|s| s.seat == seat)
    }

    pub fn dealer_seat(&self) -> Option<u8> {
        self.dealer_seat
    }

    pub fn small_blind_seat(&self) -> Option<u8> {
        self.small_blind_seat
    }

    pub fn big_blind_seat(&self) -> Option<u8> {
        self.big_blind_seat
    }

    pub fn hero_seat(&self) -> Option<u8> {
        self.hero_seat
    }

    pub fn active_players(&self) -> usize {
        self.active_players
    }

    pub fn occupied_seats(&self) -> usize {
        self.seats.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Both hero cards recognized
    pub fn hero_hand_known(&self) -> bool {
        self.hole_cards.len() == 2 && self.hole_cards.iter().all(Option::is_some)
    }

    /// Compact hero hand, e.g. `"AsKd"`
    pub fn hand_text(&self) -> String {
        cards_to_text(&self.hole_cards)
    }

    /// Compact board, e.g. `"2c7h9d"`, or `None` preflop
    pub fn board_text(&self) -> Option<String> {
        let text = cards_to_text(&self.board_cards);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Plain mapping handed to GUI/API callers
    pub fn to_plain(&self) -> Value {
        let players: Vec<Value> = self.seats.iter().map(PlayerSeatState::to_plain).collect();

        json!({
            "pot": self.pot,
            "stage": self.stage.map(|s| s.as_str()),
            "board_cards": card_list(&self.board_cards),
            "hole_cards": card_list(&self.hole_cards),
            "players": players.clone(),
            "seats": players,
            "dealer_seat": self.dealer_seat,
            "small_blind_seat": self.small_blind_seat,
            "big_blind_seat": self.big_blind_seat,
            "hero_seat": self.hero_seat,
            "active_players": self.active_players,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

fn card_list(cards: &[Option<Card>]) -> Vec<Option<String>> {
    cards.iter().map(|c| c.map(|c| c.to_string())).collect()
}
