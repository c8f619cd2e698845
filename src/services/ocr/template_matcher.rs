use crate::models::card::{Rank, Suit};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::path::Path;
use tracing::debug;

/// Canonical size every card region is normalized to before matching
pub const CARD_WIDTH: u32 = 36;
pub const CARD_HEIGHT: u32 = 52;

/// Rank and suit templates are cut from these boxes of the canonical card
pub const GLYPH_WIDTH: u32 = 32;
pub const GLYPH_HEIGHT: u32 = 24;
pub const RANK_BOX: (u32, u32) = (2, 2);
pub const SUIT_BOX: (u32, u32) = (2, 26);

/// Digit templates are compared at this size
pub const DIGIT_WIDTH: u32 = 12;
pub const DIGIT_HEIGHT: u32 = 18;

/// Reference glyph image keyed by what it depicts
#[derive(Debug, Clone)]
pub struct Template<K> {
    pub key: K,
    pub image: GrayImage,
    pub name: String,
}

impl<K> Template<K> {
    pub fn new(key: K, image: GrayImage, name: impl Into<String>) -> Self {
        Self {
            key,
            image,
            name: name.into(),
        }
    }
}

/// Best template for a glyph plus every other candidate, best first
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphMatch<K> {
    pub key: K,
    pub score: f32,
    pub ranked: Vec<(K, f32)>,
}

impl<K: Copy + PartialEq> GlyphMatch<K> {
    /// Distinct keys scoring within `margin` of the best
    pub fn contenders(&self, margin: f32) -> Vec<K> {
        let mut keys: Vec<K> = Vec::new();
        for (key, score) in &self.ranked {
            if *score >= self.score - margin && !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }
}

/// Bounding box for a connected component or glyph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Digits read from a numeric region
#[derive(Debug, Clone, PartialEq)]
pub struct DigitRead {
    /// Plain number text with thousands separators removed, e.g. "1250.5"
    pub text: String,
    /// Weakest digit score
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Digit(u8, f32),
    Separator,
}

/// Template atlas for card ranks, suits and chip-count digits
#[derive(Debug, Clone, Default)]
pub struct TemplateMatcher {
    ranks: Vec<Template<Rank>>,
    suits: Vec<Template<Suit>>,
    digits: Vec<Template<u8>>,
}

impl TemplateMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(
        ranks: Vec<Template<Rank>>,
        suits: Vec<Template<Suit>>,
        digits: Vec<Template<u8>>,
    ) -> Self {
        let digits = digits
            .into_iter()
            .map(|t| Template {
                image: normalize_digit(&t.image),
                ..t
            })
            .collect();
        Self { ranks, suits, digits }
    }

    /// Load templates from `ranks/`, `suits/` and `digits/` under `template_dir`.
    /// The first character of each PNG file name is the glyph it depicts
    /// (`A_red.png`, `h.png`, `7.png`).
    pub fn load_templates<P: AsRef<Path>>(&mut self, template_dir: P) -> Result<(), String> {
        let template_dir = template_dir.as_ref();

        if !template_dir.exists() {
            return Err(format!("Template directory not found: {:?}", template_dir));
        }

        for (path, name, first) in png_entries(&template_dir.join("ranks"))? {
            if let Some(rank) = Rank::from_char(first) {
                let gray = open_gray(&path)?;
                if gray.dimensions() != (GLYPH_WIDTH, GLYPH_HEIGHT) {
                    debug!(?path, "skipping rank template with unexpected size");
                    continue;
                }
                self.ranks.push(Template::new(rank, gray, name));
            }
        }

        for (path, name, first) in png_entries(&template_dir.join("suits"))? {
            if let Some(suit) = Suit::from_char(first) {
                let gray = open_gray(&path)?;
                if gray.dimensions() != (GLYPH_WIDTH, GLYPH_HEIGHT) {
                    debug!(?path, "skipping suit template with unexpected size");
                    continue;
                }
                self.suits.push(Template::new(suit, gray, name));
            }
        }

        let digit_dir = template_dir.join("digits");
        if digit_dir.exists() {
            for (path, name, first) in png_entries(&digit_dir)? {
                if let Some(digit) = first.to_digit(10) {
                    let gray = open_gray(&path)?;
                    self.digits
                        .push(Template::new(digit as u8, normalize_digit(&gray), name));
                }
            }
        }

        debug!(
            ranks = self.ranks.len(),
            suits = self.suits.len(),
            digits = self.digits.len(),
            "templates loaded"
        );
        Ok(())
    }

    /// Every rank and every suit has at least one template
    pub fn has_card_templates(&self) -> bool {
        Rank::ALL
            .iter()
            .all(|r| self.ranks.iter().any(|t| t.key == *r))
            && Suit::ALL
                .iter()
                .all(|s| self.suits.iter().any(|t| t.key == *s))
    }

    pub fn has_digit_templates(&self) -> bool {
        (0..10u8).all(|d| self.digits.iter().any(|t| t.key == d))
    }

    pub fn template_count(&self) -> usize {
        self.ranks.len() + self.suits.len() + self.digits.len()
    }

    /// Grayscale card region resized to the canonical card size
    pub fn normalize_card(&self, image: &DynamicImage) -> GrayImage {
        let gray = image.to_luma8();
        if gray.dimensions() == (CARD_WIDTH, CARD_HEIGHT) {
            return gray;
        }
        imageops::resize(&gray, CARD_WIDTH, CARD_HEIGHT, FilterType::Triangle)
    }

    pub fn match_rank(&self, card: &GrayImage) -> Option<GlyphMatch<Rank>> {
        let glyph = imageops::crop_imm(card, RANK_BOX.0, RANK_BOX.1, GLYPH_WIDTH, GLYPH_HEIGHT).to_image();
        best_match(&self.ranks, &glyph)
    }

    pub fn match_suit(&self, card: &GrayImage) -> Option<GlyphMatch<Suit>> {
        let glyph = imageops::crop_imm(card, SUIT_BOX.0, SUIT_BOX.1, GLYPH_WIDTH, GLYPH_HEIGHT).to_image();
        best_match(&self.suits, &glyph)
    }

    /// Read light digits from a binary mask (ink = 255).
    ///
    /// Glyphs are split on empty columns. Glyphs shorter than half the tallest
    /// one are separators: the last separator is a decimal point unless exactly
    /// three digits follow it, every other separator groups thousands.
    pub fn read_digits(&self, mask: &GrayImage) -> Option<DigitRead> {
        if self.digits.is_empty() {
            return None;
        }

        let boxes = segment_columns(mask);
        let tallest = boxes.iter().map(|b| b.height).max()?;

        let mut tokens = Vec::with_capacity(boxes.len());
        for bbox in &boxes {
            if bbox.height * 2 < tallest {
                tokens.push(Token::Separator);
                continue;
            }
            let glyph = imageops::crop_imm(mask, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
            let found = best_match(&self.digits, &normalize_digit(&glyph))?;
            tokens.push(Token::Digit(found.key, found.score));
        }

        compose_number(&tokens)
    }
}

/// Zero-mean normalized cross-correlation, clamped to [0, 1].
/// Flat images carry no glyph and score 0.
pub fn correlation(a: &GrayImage, b: &GrayImage) -> f32 {
    if a.dimensions() != b.dimensions() || a.width() == 0 || a.height() == 0 {
        return 0.0;
    }

    let n = (a.width() * a.height()) as f64;
    let mean_a = a.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let mean_b = b.pixels().map(|p| p[0] as f64).sum::<f64>() / n;

    let mut num = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let da = pa[0] as f64 - mean_a;
        let db = pb[0] as f64 - mean_b;
        num += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }

    (num / (var_a.sqrt() * var_b.sqrt())).clamp(0.0, 1.0) as f32
}

fn best_match<K: Copy>(templates: &[Template<K>], glyph: &GrayImage) -> Option<GlyphMatch<K>> {
    let mut ranked: Vec<(K, f32)> = templates
        .iter()
        .map(|t| (t.key, correlation(glyph, &t.image)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (key, score) = *ranked.first()?;
    Some(GlyphMatch { key, score, ranked })
}

fn compose_number(tokens: &[Token]) -> Option<DigitRead> {
    let last_separator = tokens.iter().rposition(|t| *t == Token::Separator);

    let mut text = String::new();
    let mut confidence = 1.0f32;
    let mut digits_seen = 0;
    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::Digit(d, score) => {
                text.push(char::from(b'0' + d));
                confidence = confidence.min(*score);
                digits_seen += 1;
            }
            Token::Separator => {
                if digits_seen == 0 || idx + 1 == tokens.len() {
                    return None;
                }
                if Some(idx) == last_separator {
                    let following = tokens[idx + 1..]
                        .iter()
                        .filter(|t| matches!(t, Token::Digit(..)))
                        .count();
                    if following != 3 {
                        text.push('.');
                    }
                }
            }
        }
    }

    if digits_seen == 0 {
        return None;
    }
    Some(DigitRead { text, confidence })
}

/// Split a binary mask into glyph boxes on runs of empty columns
pub fn segment_columns(mask: &GrayImage) -> Vec<BoundingBox> {
    let (width, height) = mask.dimensions();
    let column_has_ink = |x: u32| (0..height).any(|y| mask.get_pixel(x, y)[0] > 128);

    let mut boxes = Vec::new();
    let mut x = 0;
    while x < width {
        if !column_has_ink(x) {
            x += 1;
            continue;
        }
        let start = x;
        while x < width && column_has_ink(x) {
            x += 1;
        }

        let rows: Vec<u32> = (0..height)
            .filter(|&y| (start..x).any(|cx| mask.get_pixel(cx, y)[0] > 128))
            .collect();
        if let (Some(&top), Some(&bottom)) = (rows.first(), rows.last()) {
            boxes.push(BoundingBox {
                x: start,
                y: top,
                width: x - start,
                height: bottom - top + 1,
            });
        }
    }
    boxes
}

fn normalize_digit(image: &GrayImage) -> GrayImage {
    if image.dimensions() == (DIGIT_WIDTH, DIGIT_HEIGHT) {
        return image.clone();
    }
    imageops::resize(image, DIGIT_WIDTH, DIGIT_HEIGHT, FilterType::Nearest)
}

fn open_gray(path: &Path) -> Result<GrayImage, String> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|e| format!("Failed to load template {:?}: {}", path, e))
}

fn png_entries(dir: &Path) -> Result<Vec<(std::path::PathBuf, String, char)>, String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to read template directory {:?}: {}", dir, e))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read directory entry: {}", e))?;
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) != Some("png") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Some(first) = stem.chars().next() {
                found.push((path.clone(), stem.to_string(), first));
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Bounding boxes of the 4-connected white blobs of a binary mask, top to
/// bottom then left to right
pub fn blob_boxes(mask: &GrayImage) -> Vec<BoundingBox> {
    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));

    // (min_x, min_y, max_x, max_y) per label; label 0 is background
    let mut extents: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize(label, None);
        }
        let slot = &mut extents[label - 1];
        *slot = Some(match *slot {
            Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            None => (x, y, x, y),
        });
    }

    let mut boxes: Vec<BoundingBox> = extents
        .into_iter()
        .flatten()
        .map(|(x1, y1, x2, y2)| BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1 + 1,
            height: y2 - y1 + 1,
        })
        .collect();
    boxes.sort_by_key(|b| (b.y, b.x));
    boxes
}
