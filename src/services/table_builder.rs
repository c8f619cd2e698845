use crate::models::card::Card;
use crate::models::recognition::{RecognitionMethod, RecognitionResult};
use crate::models::roi::Roi;
use crate::models::site_profile::{RegionRole, RegionSet, SiteProfile, BOARD_SLOTS, HERO_SLOTS};
use crate::models::table_state::{PlayerSeatState, Street, TableState, TableStateParts};
use crate::services::ocr::CardRecognizer;
use chrono::Utc;
use image::DynamicImage;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Share of a seat's card slots covered by card-back color for the seat
/// to count as holding cards
pub const CARD_BACK_RATIO: f32 = 0.25;

/// Share of the dealer marker region that must match the button color
pub const DEALER_RATIO: f32 = 0.35;

/// A pot falling below this share of the previous one starts a new hand
const POT_RESET_RATIO: f64 = 0.3;

/// Cards seen so far in the current hand.
///
/// Handed to [`TableStateBuilder::build_state`] and returned updated, so the
/// builder itself stays stateless.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandMemory {
    cards: HashMap<RegionRole, Card>,
    board_len: usize,
    pot: Option<f64>,
    hero: Vec<Card>,
}

impl HandMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Card this region showed earlier in the hand
    pub fn hint(&self, role: RegionRole) -> Option<Card> {
        self.cards.get(&role).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty() && self.pot.is_none() && self.board_len == 0
    }

    /// Signals that the table moved on to a new hand
    fn is_new_hand(&self, board_len: usize, pot: Option<f64>, hero: &[Card]) -> bool {
        if board_len < self.board_len {
            return true;
        }
        if let (Some(previous), Some(current)) = (self.pot, pot) {
            if previous > 0.0 && current < previous * POT_RESET_RATIO {
                return true;
            }
        }
        if hero.len() == HERO_SLOTS && self.hero.len() == HERO_SLOTS {
            let changed = hero.iter().any(|c| !self.hero.contains(c));
            if changed {
                return true;
            }
        }
        false
    }
}

/// One card slot after recognition
#[derive(Debug, Clone)]
struct CardRead {
    role: RegionRole,
    present: bool,
    result: RecognitionResult<Card>,
}

impl CardRead {
    fn card(&self) -> Option<Card> {
        if self.present {
            self.result.value
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct SeatRead {
    seat: u8,
    name: Option<String>,
    name_ink: bool,
    stack: Option<f64>,
    bet: Option<f64>,
    dealer_ratio: f32,
    back_ratio: f32,
}

/// A built snapshot plus the hand memory to pass into the next build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub state: TableState,
    pub memory: HandMemory,
    pub new_hand: bool,
}

/// Composes recognizer output for every region into a `TableState`
pub struct TableStateBuilder {
    recognizer: Arc<CardRecognizer>,
    profile: Arc<SiteProfile>,
}

impl TableStateBuilder {
    pub fn new(recognizer: Arc<CardRecognizer>, profile: Arc<SiteProfile>) -> Self {
        Self { recognizer, profile }
    }

    /// Recognize every region and assemble a snapshot.
    ///
    /// Invariant violations never fail the build: duplicate cards keep only
    /// the most confident copy and an impossible board is dropped.
    pub fn build_state(&self, frame: &DynamicImage, regions: &RegionSet, memory: &HandMemory) -> BuildOutcome {
        let started = std::time::Instant::now();

        let card_roles: Vec<RegionRole> = regions
            .regions
            .iter()
            .map(|r| r.role)
            .filter(RegionRole::is_card)
            .collect();

        // First pass ignores the hand memory so a new hand is judged on
        // what is actually visible
        let mut reads: Vec<CardRead> = card_roles
            .par_iter()
            .map(|role| self.read_card(frame, regions, *role, None))
            .collect();

        let pot = self.read_pot(frame, regions);
        let seats: Vec<SeatRead> = self
            .profile
            .seats()
            .par_iter()
            .map(|seat| self.read_seat(frame, regions, *seat))
            .collect();

        let board_len = reads
            .iter()
            .filter(|r| matches!(r.role, RegionRole::Board(_)) && r.present)
            .count();
        let hero_known: Vec<Card> = reads
            .iter()
            .filter(|r| matches!(r.role, RegionRole::HeroCard(_)))
            .filter_map(CardRead::card)
            .collect();

        let new_hand = memory.is_new_hand(board_len, pot.value, &hero_known);
        if new_hand {
            debug!(board_len, pot = ?pot.value, "new hand detected");
        } else {
            // Settle ambiguous reads with cards seen earlier this hand
            for read in reads.iter_mut() {
                if read.present && read.result.value.is_none() {
                    if let Some(hint) = memory.hint(read.role) {
                        *read = self.read_card(frame, regions, read.role, Some(hint));
                    }
                }
            }
        }

        demote_duplicates(&mut reads);

        let state = self.assemble(&reads, pot.value, &seats);

        let mut next = if new_hand { HandMemory::new() } else { memory.clone() };
        for read in &reads {
            if let Some(card) = read.card() {
                next.cards.insert(read.role, card);
            }
        }
        next.board_len = board_len;
        if pot.value.is_some() {
            next.pot = pot.value;
        }
        if state.hero_hand_known() {
            next.hero = state.hole_cards().iter().flatten().copied().collect();
        }

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            regions = regions.regions.len(),
            stage = ?state.stage(),
            active = state.active_players(),
            "table state built"
        );

        BuildOutcome {
            state,
            memory: next,
            new_hand,
        }
    }

    fn read_card(&self, frame: &DynamicImage, regions: &RegionSet, role: RegionRole, hint: Option<Card>) -> CardRead {
        let sub_image = regions.get(role).and_then(|roi| crop(frame, roi));
        match sub_image {
            Some(sub) if self.recognizer.card_present(&sub) => CardRead {
                role,
                present: true,
                result: self.recognizer.recognize_card(&sub, hint),
            },
            _ => CardRead {
                role,
                present: false,
                result: RecognitionResult::unknown(0.0, RecognitionMethod::TemplateMatch),
            },
        }
    }

    fn read_pot(&self, frame: &DynamicImage, regions: &RegionSet) -> RecognitionResult<f64> {
        match regions.get(RegionRole::Pot).and_then(|roi| crop(frame, roi)) {
            Some(sub) if self.recognizer.has_ink(&sub) => self.recognizer.recognize_numeric(&sub),
            _ => RecognitionResult::unknown(0.0, RecognitionMethod::TemplateMatch),
        }
    }

    fn read_seat(&self, frame: &DynamicImage, regions: &RegionSet, seat: u8) -> SeatRead {
        let region = |role| regions.get(role).and_then(|roi| crop(frame, roi));
        let swatches = &self.profile.swatches;
        let tolerance = self.profile.color_tolerance;

        let (name, name_ink) = match region(RegionRole::SeatName(seat)) {
            Some(sub) if self.recognizer.has_ink(&sub) => (self.recognizer.recognize_text(&sub).value, true),
            _ => (None, false),
        };

        let stack = match region(RegionRole::SeatStack(seat)) {
            Some(sub) if self.recognizer.has_ink(&sub) => self.recognizer.recognize_numeric(&sub).value,
            _ => None,
        };

        // An empty bet box is a real zero; unreadable ink is unknown
        let bet = match region(RegionRole::SeatBet(seat)) {
            Some(sub) if self.recognizer.has_ink(&sub) => self.recognizer.recognize_numeric(&sub).value,
            Some(_) => Some(0.0),
            None => None,
        };

        let dealer_ratio = region(RegionRole::SeatDealer(seat))
            .map(|sub| self.recognizer.color_ratio(&sub, swatches.dealer_button, tolerance))
            .unwrap_or(0.0);

        let back_ratio = (0..HERO_SLOTS)
            .filter_map(|i| region(RegionRole::SeatCard(seat, i)))
            .map(|sub| self.recognizer.color_ratio(&sub, swatches.card_back, tolerance))
            .fold(0.0f32, f32::max);

        SeatRead {
            seat,
            name,
            name_ink,
            stack,
            bet,
            dealer_ratio,
            back_ratio,
        }
    }

    fn assemble(&self, reads: &[CardRead], pot: Option<f64>, seat_reads: &[SeatRead]) -> TableState {
        let slot = |role: RegionRole| reads.iter().find(|r| r.role == role);

        let board_present: Vec<Option<Card>> = (0..BOARD_SLOTS)
            .filter_map(|i| slot(RegionRole::Board(i)))
            .filter(|r| r.present)
            .map(CardRead::card)
            .collect();
        let (board_cards, mut stage) = match Street::from_board_count(board_present.len()) {
            Some(street) => (board_present, Some(street)),
            None => {
                warn!(count = board_present.len(), "illegal board length, board dropped");
                (Vec::new(), None)
            }
        };

        let hero_present: Vec<Option<Card>> = (0..HERO_SLOTS)
            .filter_map(|i| slot(RegionRole::HeroCard(i)))
            .filter(|r| r.present)
            .map(CardRead::card)
            .collect();
        let hole_cards = if hero_present.len() == HERO_SLOTS {
            hero_present
        } else {
            Vec::new()
        };

        let hero_seat = self.profile.hero_seat;
        let mut seats = Vec::with_capacity(seat_reads.len());
        let mut showdown = false;
        for read in seat_reads {
            let revealed: Vec<Option<Card>> = (0..HERO_SLOTS)
                .filter_map(|i| slot(RegionRole::SeatCard(read.seat, i)))
                .filter(|r| r.present)
                .map(CardRead::card)
                .collect();
            let revealed = if revealed.len() == HERO_SLOTS { revealed } else { Vec::new() };
            if Some(read.seat) != hero_seat && revealed.iter().any(Option::is_some) {
                showdown = true;
            }

            let occupied = read.name_ink || read.stack.is_some();
            let holding = read.back_ratio >= CARD_BACK_RATIO
                || !revealed.is_empty()
                || (Some(read.seat) == hero_seat && !hole_cards.is_empty());
            let active = occupied && holding;

            seats.push(PlayerSeatState {
                seat: read.seat,
                name: read.name.clone(),
                stack: read.stack,
                current_bet: if occupied { read.bet } else { None },
                active,
                folded: occupied && !active,
                is_dealer: false,
                hole_cards: revealed,
            });
        }

        let dealer_seat = seat_reads
            .iter()
            .filter(|r| r.dealer_ratio >= DEALER_RATIO)
            .max_by(|a, b| a.dealer_ratio.total_cmp(&b.dealer_ratio))
            .map(|r| r.seat);
        if let Some(dealer) = dealer_seat {
            for seat in seats.iter_mut().filter(|s| s.seat == dealer) {
                seat.is_dealer = true;
            }
        }

        let occupied: Vec<u8> = seats.iter().filter(|s| s.is_occupied()).map(|s| s.seat).collect();
        let (small_blind_seat, big_blind_seat) = match dealer_seat {
            Some(dealer) => blind_seats(dealer, &occupied),
            None => (None, None),
        };

        if showdown && stage.is_some() {
            stage = Some(Street::Showdown);
        }

        let parts = TableStateParts {
            pot,
            stage,
            board_cards,
            hole_cards,
            seats,
            dealer_seat,
            small_blind_seat,
            big_blind_seat,
            hero_seat,
            timestamp: Utc::now(),
        };

        match TableState::from_parts(parts.clone()) {
            Ok(state) => state,
            Err(violation) => {
                // Unreachable after duplicate demotion, kept so a recognizer
                // bug degrades the cards rather than the whole snapshot
                warn!(%violation, "snapshot failed validation, cards dropped");
                let mut parts = parts;
                parts.board_cards.clear();
                parts.hole_cards.clear();
                parts.stage = None;
                for seat in parts.seats.iter_mut() {
                    seat.hole_cards.clear();
                }
                TableState::from_parts(parts).unwrap_or_else(|_| TableState::empty(Utc::now()))
            }
        }
    }
}

/// Keep the most confident copy of any card read in more than one region
fn demote_duplicates(reads: &mut [CardRead]) {
    let mut best: HashMap<Card, usize> = HashMap::new();
    for (idx, read) in reads.iter().enumerate() {
        if let Some(card) = read.card() {
            match best.get(&card) {
                Some(&kept) if reads[kept].result.confidence >= read.result.confidence => {}
                _ => {
                    best.insert(card, idx);
                }
            }
        }
    }

    for (idx, read) in reads.iter_mut().enumerate() {
        if let Some(card) = read.card() {
            if best.get(&card) != Some(&idx) {
                warn!(%card, role = %read.role, "duplicate card demoted to unknown");
                read.result.value = None;
            }
        }
    }
}

/// Small and big blind seats, clockwise from the dealer over occupied seats.
/// Heads-up the dealer posts the small blind.
pub fn blind_seats(dealer: u8, occupied: &[u8]) -> (Option<u8>, Option<u8>) {
    let mut order = occupied.to_vec();
    order.sort_unstable();
    order.dedup();
    if order.len() < 2 {
        return (None, None);
    }

    let after = |seat: u8| -> u8 {
        order
            .iter()
            .copied()
            .find(|s| *s > seat)
            .unwrap_or(order[0])
    };

    if order.len() == 2 && order.contains(&dealer) {
        return (Some(dealer), Some(after(dealer)));
    }

    let small = after(dealer);
    (Some(small), Some(after(small)))
}

/// Position name of `seat` relative to the button, e.g. `"CO"`
pub fn position_name(state: &TableState, seat: u8) -> Option<&'static str> {
    let dealer = state.dealer_seat()?;
    let mut order: Vec<u8> = state
        .seats()
        .iter()
        .filter(|s| s.is_occupied())
        .map(|s| s.seat)
        .collect();
    order.sort_unstable();

    let start = order.iter().position(|s| *s == dealer)?;
    let offset = order.iter().position(|s| *s == seat)?;
    let from_button = (offset + order.len() - start) % order.len();

    let names: &[&'static str] = match order.len() {
        2 => &["BTN", "BB"],
        3 => &["BTN", "SB", "BB"],
        4 => &["BTN", "SB", "BB", "UTG"],
        5 => &["BTN", "SB", "BB", "UTG", "CO"],
        6 => &["BTN", "SB", "BB", "UTG", "HJ", "CO"],
        7 => &["BTN", "SB", "BB", "UTG", "MP", "HJ", "CO"],
        8 => &["BTN", "SB", "BB", "UTG", "UTG+1", "MP", "HJ", "CO"],
        9 => &["BTN", "SB", "BB", "UTG", "UTG+1", "MP", "LJ", "HJ", "CO"],
        _ => return None,
    };
    names.get(from_button).copied()
}

fn crop(frame: &DynamicImage, roi: Roi) -> Option<DynamicImage> {
    let (x, y, width, height) = roi.clamp_to(frame.width(), frame.height())?;
    Some(frame.crop_imm(x, y, width, height))
}
