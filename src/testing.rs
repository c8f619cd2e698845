//! Synthetic fixtures for unit tests: a deterministic glyph atlas, rendered
//! table frames and in-memory stand-ins for capture, OCR and storage.

use crate::error::{Result, ScraperError};
use crate::models::card::{Card, Rank, Suit};
use crate::models::roi::Roi;
use crate::models::site_profile::{ColorSwatch, RegionRole, SiteProfile};
use crate::services::ocr::template_matcher::{
    Template, TemplateMatcher, CARD_HEIGHT, CARD_WIDTH, DIGIT_HEIGHT, DIGIT_WIDTH, GLYPH_HEIGHT, GLYPH_WIDTH,
    RANK_BOX, SUIT_BOX,
};
use crate::services::ocr::{OcrEngine, OcrText};
use crate::services::persistence::{HandRecord, HandStore};
use crate::services::screen_capture::FrameSource;
use chrono::Utc;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Background of chip-count and name plates
pub const PLATE: Rgb<u8> = Rgb([20, 20, 25]);

const DESKTOP: Rgb<u8> = Rgb([20, 30, 90]);
const DIGIT_GAP: u32 = 3;
const DIGIT_MARGIN: u32 = 2;
const SEPARATOR_SIZE: u32 = 3;

fn next(state: &mut u64) -> u32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    (*state >> 33) as u32
}

/// Deterministic block pattern with a one pixel white border; about 30% of
/// the interior blocks are black. Different seeds give unrelated patterns.
pub fn glyph_pattern(seed: u64, width: u32, height: u32) -> GrayImage {
    let block = if width.min(height) < 20 { 2 } else { 4 };
    let blocks_x = (width.saturating_sub(2) + block - 1) / block;
    let blocks_y = (height.saturating_sub(2) + block - 1) / block;

    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32_D192_ED03;
    for _ in 0..4 {
        next(&mut state);
    }
    let mut dark: Vec<bool> = (0..blocks_x * blocks_y).map(|_| next(&mut state) % 100 < 30).collect();
    if !dark.iter().any(|d| *d) {
        if let Some(first) = dark.first_mut() {
            *first = true;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            return Luma([255]);
        }
        let idx = ((y - 1) / block) * blocks_x + (x - 1) / block;
        if dark.get(idx as usize).copied().unwrap_or(false) {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

pub fn rank_glyph(rank: Rank) -> GrayImage {
    let idx = Rank::ALL.iter().position(|r| *r == rank).unwrap_or(0) as u64;
    glyph_pattern(100 + idx, GLYPH_WIDTH, GLYPH_HEIGHT)
}

pub fn suit_glyph(suit: Suit) -> GrayImage {
    let idx = Suit::ALL.iter().position(|s| *s == suit).unwrap_or(0) as u64;
    glyph_pattern(200 + idx, GLYPH_WIDTH, GLYPH_HEIGHT)
}

/// White-ink digit glyph (ink = 255)
pub fn digit_glyph(digit: u8) -> GrayImage {
    glyph_pattern(300 + digit as u64, DIGIT_WIDTH, DIGIT_HEIGHT)
}

/// Atlas with every rank, suit and digit
pub fn synthetic_atlas() -> TemplateMatcher {
    let ranks = Rank::ALL
        .iter()
        .map(|r| Template::new(*r, rank_glyph(*r), r.to_char().to_string()))
        .collect();
    let suits = Suit::ALL
        .iter()
        .map(|s| Template::new(*s, suit_glyph(*s), s.to_char().to_string()))
        .collect();
    let digits = (0..10u8)
        .map(|d| Template::new(d, digit_glyph(d), d.to_string()))
        .collect();
    TemplateMatcher::from_templates(ranks, suits, digits)
}

pub fn all_cards() -> Vec<Card> {
    Rank::ALL
        .iter()
        .flat_map(|r| Suit::ALL.iter().map(move |s| Card::new(*r, *s)))
        .collect()
}

/// Canonical-size white card face with its rank and suit glyphs
pub fn card_face(card: Card) -> GrayImage {
    let mut face = GrayImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, Luma([255]));
    imageops::replace(&mut face, &rank_glyph(card.rank), RANK_BOX.0 as i64, RANK_BOX.1 as i64);
    imageops::replace(&mut face, &suit_glyph(card.suit), SUIT_BOX.0 as i64, SUIT_BOX.1 as i64);
    face
}

/// Binary mask of `text` drawn with the digit glyphs: digits at native
/// size, `,` and `.` as a small square on the baseline, black background.
/// Other characters are skipped.
pub fn digit_mask(text: &str) -> GrayImage {
    let widths: Vec<(char, u32)> = text
        .chars()
        .filter_map(|c| match c {
            '0'..='9' => Some((c, DIGIT_WIDTH)),
            ',' | '.' => Some((c, SEPARATOR_SIZE)),
            _ => None,
        })
        .collect();

    let content: u32 = widths.iter().map(|(_, w)| *w).sum::<u32>()
        + DIGIT_GAP * (widths.len() as u32).saturating_sub(1);
    let mut mask = GrayImage::new(content + 2 * DIGIT_MARGIN, DIGIT_HEIGHT + 2 * DIGIT_MARGIN);

    let mut x = DIGIT_MARGIN;
    for (c, width) in widths {
        match c.to_digit(10) {
            Some(d) => imageops::replace(&mut mask, &digit_glyph(d as u8), x as i64, DIGIT_MARGIN as i64),
            None => {
                let top = DIGIT_MARGIN + DIGIT_HEIGHT - SEPARATOR_SIZE;
                for dy in 0..SEPARATOR_SIZE {
                    for dx in 0..SEPARATOR_SIZE {
                        mask.put_pixel(x + dx, top + dy, Luma([255]));
                    }
                }
            }
        }
        x += width + DIGIT_GAP;
    }
    mask
}

/// Dark plate of `width`×`height` with `text` in white, centered
pub fn amount_plate(text: &str, width: u32, height: u32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, PLATE);
    stamp_text(&mut img, 0, 0, width, height, text);
    DynamicImage::ImageRgb8(img)
}

fn stamp_text(img: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, text: &str) {
    let mask = digit_mask(text);
    let ox = x + width.saturating_sub(mask.width()) / 2;
    let oy = y + height.saturating_sub(mask.height()) / 2;
    for (mx, my, px) in mask.enumerate_pixels() {
        let (tx, ty) = (ox + mx, oy + my);
        if px[0] > 128 && tx < x + width && ty < y + height && tx < img.width() && ty < img.height() {
            img.put_pixel(tx, ty, Rgb([255, 255, 255]));
        }
    }
}

/// A desktop with a couple of bright windows and no poker table
pub fn desktop_frame(width: u32, height: u32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, DESKTOP);
    fill(&mut img, Roi::new((width / 10) as i32, (height / 10) as i32, width / 2, height / 12), Rgb([245, 245, 245]));
    fill(&mut img, Roi::new((width / 3) as i32, (height / 2) as i32, width / 2, height / 6), Rgb([250, 250, 250]));
    DynamicImage::ImageRgb8(img)
}

fn fill(img: &mut RgbImage, roi: Roi, color: Rgb<u8>) {
    let Some((x, y, w, h)) = roi.clamp_to(img.width(), img.height()) else {
        return;
    };
    for py in y..y + h {
        for px in x..x + w {
            img.put_pixel(px, py, color);
        }
    }
}

/// One seat in a [`TableScene`]
#[derive(Debug, Clone, PartialEq)]
pub struct SeatScene {
    pub seat: u8,
    pub stack: Option<String>,
    pub bet: Option<String>,
    /// Face-down cards in front of the player
    pub holding: bool,
    /// Face-up cards, drawn instead of backs
    pub revealed: Option<[Card; 2]>,
}

impl SeatScene {
    /// Player with a stack and face-down cards
    pub fn holding(seat: u8, stack: &str) -> Self {
        Self {
            seat,
            stack: Some(stack.to_string()),
            bet: None,
            holding: true,
            revealed: None,
        }
    }

    /// Player with a stack and no cards
    pub fn sitting(seat: u8, stack: &str) -> Self {
        Self {
            holding: false,
            ..Self::holding(seat, stack)
        }
    }

    pub fn with_bet(mut self, bet: &str) -> Self {
        self.bet = Some(bet.to_string());
        self
    }
}

/// What [`render_table`] draws. Seats not listed are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableScene {
    pub board: Vec<Card>,
    pub hero: Vec<Card>,
    pub pot: Option<String>,
    pub seats: Vec<SeatScene>,
    pub dealer: Option<u8>,
}

impl TableScene {
    /// Six-max flop: hero in seat 1 with KhQh, button on seat 3, seat 4
    /// empty, seat 6 folded.
    pub fn six_max_flop() -> Self {
        let card = |text: &str| -> Card { text.parse().unwrap() };
        Self {
            board: vec![card("As"), card("7d"), card("2c")],
            hero: vec![card("Kh"), card("Qh")],
            pot: Some("1,250".to_string()),
            seats: vec![
                SeatScene::sitting(1, "980"),
                SeatScene::holding(2, "1,500").with_bet("50"),
                SeatScene::holding(3, "720"),
                SeatScene::holding(5, "1,100"),
                SeatScene::sitting(6, "2,400"),
            ],
            dealer: Some(3),
        }
    }
}

/// Draw `scene` onto a felt frame using `profile`'s layout at `width`×`height`
pub fn render_table(profile: &SiteProfile, scene: &TableScene, width: u32, height: u32) -> DynamicImage {
    let regions = profile
        .project(width, height)
        .expect("frame size must fit the profile's aspect ratio");
    let mut img = RgbImage::from_pixel(width, height, Rgb(profile.swatches.felt.0));

    for (i, card) in scene.board.iter().enumerate() {
        if let Some(roi) = regions.get(RegionRole::Board(i)) {
            paste_card(&mut img, roi, *card);
        }
    }
    for (i, card) in scene.hero.iter().enumerate() {
        if let Some(roi) = regions.get(RegionRole::HeroCard(i)) {
            paste_card(&mut img, roi, *card);
        }
    }
    if let (Some(text), Some(roi)) = (&scene.pot, regions.get(RegionRole::Pot)) {
        draw_amount(&mut img, roi, text);
    }

    for seat in &scene.seats {
        let n = seat.seat;
        if let Some(roi) = regions.get(RegionRole::SeatName(n)) {
            draw_name(&mut img, roi);
        }
        if let (Some(text), Some(roi)) = (&seat.stack, regions.get(RegionRole::SeatStack(n))) {
            draw_amount(&mut img, roi, text);
        }
        if let (Some(text), Some(roi)) = (&seat.bet, regions.get(RegionRole::SeatBet(n))) {
            draw_amount(&mut img, roi, text);
        }
        for i in 0..2 {
            let Some(roi) = regions.get(RegionRole::SeatCard(n, i)) else {
                continue;
            };
            match seat.revealed {
                Some(cards) => paste_card(&mut img, roi, cards[i]),
                None if seat.holding => fill(&mut img, roi, Rgb(profile.swatches.card_back.0)),
                None => {}
            }
        }
    }

    if let Some(roi) = scene.dealer.and_then(|d| regions.get(RegionRole::SeatDealer(d))) {
        let ColorSwatch(rgb) = profile.swatches.dealer_button;
        fill(&mut img, roi, Rgb(rgb));
    }

    DynamicImage::ImageRgb8(img)
}

fn paste_card(img: &mut RgbImage, roi: Roi, card: Card) {
    let Some((x, y, w, h)) = roi.clamp_to(img.width(), img.height()) else {
        return;
    };
    let face = imageops::resize(&card_face(card), w, h, FilterType::Nearest);
    for (fx, fy, px) in face.enumerate_pixels() {
        let v = px[0];
        img.put_pixel(x + fx, y + fy, Rgb([v, v, v]));
    }
}

fn draw_amount(img: &mut RgbImage, roi: Roi, text: &str) {
    let Some((x, y, w, h)) = roi.clamp_to(img.width(), img.height()) else {
        return;
    };
    fill(img, roi, PLATE);
    stamp_text(img, x, y, w, h, text);
}

/// Dark plate with a few small white marks standing in for a name
fn draw_name(img: &mut RgbImage, roi: Roi) {
    let Some((x, y, w, h)) = roi.clamp_to(img.width(), img.height()) else {
        return;
    };
    fill(img, roi, PLATE);
    let top = y + h / 2 - 1;
    for mark in 0..4u32 {
        let left = x + 8 + mark * 7;
        if left + 3 >= x + w {
            break;
        }
        fill(img, Roi::new(left as i32, top as i32, 3, 3), Rgb([240, 240, 240]));
    }
}

/// OCR engine that always reads the same text
pub struct MockOcr {
    text: String,
    confidence: f32,
}

impl MockOcr {
    pub fn fixed(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
        }
    }
}

impl OcrEngine for MockOcr {
    fn recognize(&self, _image: &DynamicImage) -> std::result::Result<OcrText, String> {
        Ok(OcrText {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_available() -> bool {
        true
    }
}

/// Frame source returning one fixed frame, optionally failing or hanging
/// on its first captures
pub struct StaticFrameSource {
    frame: DynamicImage,
    captures: AtomicUsize,
    fail_first: usize,
    hang_first: Option<Duration>,
}

impl StaticFrameSource {
    pub fn new(frame: DynamicImage) -> Self {
        Self {
            frame,
            captures: AtomicUsize::new(0),
            fail_first: 0,
            hang_first: None,
        }
    }

    pub fn failing_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    pub fn hanging_first(mut self, delay: Duration) -> Self {
        self.hang_first = Some(delay);
        self
    }

    /// Number of capture attempts so far
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl FrameSource for StaticFrameSource {
    fn capture_table(&self) -> Result<DynamicImage> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(ScraperError::Capture("scripted failure".to_string()));
        }
        if n == 0 {
            if let Some(delay) = self.hang_first {
                std::thread::sleep(delay);
            }
        }
        Ok(self.frame.clone())
    }

    fn describe(&self) -> String {
        "static frame".to_string()
    }
}

/// Hand store kept in memory, optionally failing its first saves
#[derive(Default)]
pub struct MemoryHandStore {
    records: Mutex<Vec<HandRecord>>,
    attempts: AtomicUsize,
    fail_first: usize,
}

impl MemoryHandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(count: usize) -> Self {
        Self {
            fail_first: count,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<HandRecord> {
        self.records.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl HandStore for MemoryHandStore {
    fn save(&self, hand: &str, board: Option<&str>, result: &str, metadata: &Value) -> Result<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(ScraperError::Persistence("scripted failure".to_string()));
        }

        let mut records = self.records.lock();
        let id = format!("mem-{}", records.len());
        records.push(HandRecord {
            id: id.clone(),
            hand: hand.to_string(),
            board: board.map(str::to_string),
            result: result.to_string(),
            metadata: metadata.clone(),
            saved_at: Utc::now(),
        });
        Ok(id)
    }
}
