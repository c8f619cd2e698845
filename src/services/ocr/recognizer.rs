use super::engine::OcrEngine;
use super::parser::{parse_amount, parse_name};
use super::preprocessing::PreprocessingService;
use super::template_matcher::TemplateMatcher;
use crate::models::card::Card;
use crate::models::config::RecognitionConfig;
use crate::models::recognition::{RecognitionMethod, RecognitionResult};
use crate::models::site_profile::ColorSwatch;
use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

/// Share of bright pixels above which a region holds a face-up card
pub const CARD_PRESENT_RATIO: f32 = 0.45;

/// Two numeric reads closer than this are the same amount
const AMOUNT_EPSILON: f64 = 0.005;

/// Recognizes cards, chip amounts and names from region crops
pub struct CardRecognizer {
    atlas: Arc<TemplateMatcher>,
    ocr: Option<Arc<dyn OcrEngine>>,
    config: RecognitionConfig,
    preprocessing: PreprocessingService,
}

impl CardRecognizer {
    pub fn new(atlas: Arc<TemplateMatcher>, config: RecognitionConfig) -> Self {
        Self {
            atlas,
            ocr: None,
            config,
            preprocessing: PreprocessingService::default(),
        }
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// OCR engine in use, if any and enabled
    fn ocr(&self) -> Option<&Arc<dyn OcrEngine>> {
        if self.config.ocr_enabled {
            self.ocr.as_ref()
        } else {
            None
        }
    }

    /// A face-up card is mostly white; backs and felt are not
    pub fn card_present(&self, image: &DynamicImage) -> bool {
        self.preprocessing.white_ratio(image) >= CARD_PRESENT_RATIO
    }

    /// Match rank and suit independently against the atlas.
    ///
    /// `hint` is the card this region showed earlier in the same hand. It is
    /// only consulted when the top candidates are within the tie margin, and
    /// only wins if it is one of those candidates.
    pub fn recognize_card(&self, image: &DynamicImage, hint: Option<Card>) -> RecognitionResult<Card> {
        let method = RecognitionMethod::TemplateMatch;
        if !self.card_present(image) {
            return RecognitionResult::unknown(0.0, method);
        }

        let normalized = self.atlas.normalize_card(image);
        let (rank, suit) = match (self.atlas.match_rank(&normalized), self.atlas.match_suit(&normalized)) {
            (Some(rank), Some(suit)) => (rank, suit),
            _ => return RecognitionResult::unknown(0.0, method),
        };

        let confidence = rank.score.min(suit.score);
        let threshold = self.config.card_confidence;
        let margin = self.config.tie_margin;

        let ranks = rank.contenders(margin);
        let suits = suit.contenders(margin);
        if ranks.len() == 1 && suits.len() == 1 {
            return RecognitionResult::thresholded(Card::new(rank.key, suit.key), confidence, threshold, method);
        }

        match hint {
            Some(prev) if ranks.contains(&prev.rank) && suits.contains(&prev.suit) => {
                let hinted = score_for(&rank.ranked, prev.rank).min(score_for(&suit.ranked, prev.suit));
                debug!(card = %prev, confidence = hinted, "ambiguous card resolved from hand memory");
                RecognitionResult::thresholded(prev, hinted, threshold, method)
            }
            _ => {
                debug!(ranks = ranks.len(), suits = suits.len(), "ambiguous card left unknown");
                RecognitionResult::unknown(confidence, method)
            }
        }
    }

    /// Read a chip amount. The digit templates and OCR both run when
    /// available; confident reads that disagree leave the amount unknown.
    pub fn recognize_numeric(&self, image: &DynamicImage) -> RecognitionResult<f64> {
        let threshold = self.config.numeric_confidence;

        let template = self.template_amount(image);
        let ocr = self.ocr_amount(image);

        let best_seen = template
            .iter()
            .chain(ocr.iter())
            .map(|(_, c)| *c)
            .fold(0.0f32, f32::max);

        let template = template.filter(|(_, c)| *c >= threshold);
        let ocr = ocr.filter(|(_, c)| *c >= threshold);

        match (template, ocr) {
            (Some((a, ca)), Some((b, cb))) => {
                if (a - b).abs() < AMOUNT_EPSILON {
                    RecognitionResult::known(a, ca.max(cb), RecognitionMethod::TemplateMatch)
                } else {
                    debug!(template = a, ocr = b, "numeric reads disagree");
                    RecognitionResult::unknown(ca.min(cb), RecognitionMethod::TemplateMatch)
                }
            }
            (Some((a, c)), None) => RecognitionResult::known(a, c, RecognitionMethod::TemplateMatch),
            (None, Some((b, c))) => RecognitionResult::known(b, c, RecognitionMethod::Ocr),
            (None, None) => {
                let method = if self.atlas.has_digit_templates() {
                    RecognitionMethod::TemplateMatch
                } else {
                    RecognitionMethod::Ocr
                };
                RecognitionResult::unknown(best_seen, method)
            }
        }
    }

    fn template_amount(&self, image: &DynamicImage) -> Option<(f64, f32)> {
        let mask = self.preprocessing.extract_light_text(image);
        let read = self.atlas.read_digits(&mask)?;
        let amount = parse_amount(&read.text).ok()?;
        Some((amount, read.confidence))
    }

    fn ocr_amount(&self, image: &DynamicImage) -> Option<(f64, f32)> {
        let engine = self.ocr()?;
        let prepared = self.prepare_for_ocr(image)?;
        let text = match engine.recognize_numeric(&prepared) {
            Ok(text) => text,
            Err(e) => {
                debug!(engine = engine.name(), error = %e, "numeric OCR failed");
                return None;
            }
        };
        let amount = parse_amount(&text.text).ok()?;
        Some((amount, text.confidence))
    }

    /// Player name via OCR; unknown without an engine
    pub fn recognize_text(&self, image: &DynamicImage) -> RecognitionResult<String> {
        let method = RecognitionMethod::Ocr;
        let Some(engine) = self.ocr() else {
            return RecognitionResult::unknown(0.0, method);
        };
        let Some(prepared) = self.prepare_for_ocr(image) else {
            return RecognitionResult::unknown(0.0, method);
        };

        match engine.recognize(&prepared) {
            Ok(text) => match parse_name(&text.text) {
                Ok(name) => RecognitionResult::thresholded(name, text.confidence, self.config.numeric_confidence, method),
                Err(_) => RecognitionResult::unknown(text.confidence, method),
            },
            Err(e) => {
                debug!(engine = engine.name(), error = %e, "text OCR failed");
                RecognitionResult::unknown(0.0, method)
            }
        }
    }

    /// Binarized, upscaled, dark-on-light crop for the OCR backend
    fn prepare_for_ocr(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let binary = self.preprocessing.preprocess(image).ok()?;
        Some(self.preprocessing.invert(&binary))
    }

    pub fn has_ink(&self, image: &DynamicImage) -> bool {
        self.preprocessing.has_ink(image)
    }

    /// Fraction of pixels within `tolerance` of `swatch`
    pub fn color_ratio(&self, image: &DynamicImage, swatch: ColorSwatch, tolerance: f64) -> f32 {
        let rgb = image.to_rgb8();
        let total = rgb.width() as usize * rgb.height() as usize;
        if total == 0 {
            return 0.0;
        }
        let matching = rgb.pixels().filter(|p| swatch.matches(p.0, tolerance)).count();
        matching as f32 / total as f32
    }
}

fn score_for<K: PartialEq>(ranked: &[(K, f32)], key: K) -> f32 {
    ranked
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, s)| *s)
        .unwrap_or(0.0)
}
