use crate::models::config::DetectionConfig;
use crate::models::roi::Roi;
use crate::models::site_profile::{RegionSet, SiteProfile};
use crate::services::ocr::preprocessing::WHITE_LUMA;
use crate::services::ocr::template_matcher::blob_boxes;
use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Frames wider than this are downscaled before the table heuristics run
const DETECTION_MAX_WIDTH: u32 = 1600;

/// Card-shaped blob limits: height/width ratio and share of the frame area
const CARD_ASPECT_MIN: f32 = 1.05;
const CARD_ASPECT_MAX: f32 = 1.8;
const CARD_AREA_MIN: f32 = 0.0008;
const CARD_AREA_MAX: f32 = 0.02;

/// Rows and columns count as table when they hold at least this share of
/// the felt found in the fullest row or column
const FELT_SPAN_SHARE: f32 = 0.3;

/// Weights of the felt and card heuristics in the detection confidence
const FELT_WEIGHT: f32 = 0.6;
const CARD_WEIGHT: f32 = 0.4;

/// Result of the per-cycle "is a poker table visible" check
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableDetection {
    pub detected: bool,
    pub confidence: f32,
    pub felt_ratio: f32,
    pub card_shapes: usize,
    /// Heuristics that fired, for diagnostics
    pub details: Vec<String>,
}

/// Matches frames against a site profile and projects its regions
pub struct RegionCalibrator {
    profile: Arc<SiteProfile>,
    config: DetectionConfig,
}

impl RegionCalibrator {
    pub fn new(profile: Arc<SiteProfile>, config: DetectionConfig) -> Self {
        Self { profile, config }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Share of pixels close to the profile's felt color (parallel over rows)
    pub fn felt_ratio(&self, frame: &DynamicImage) -> f32 {
        let rgb = frame.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return 0.0;
        }

        let felt = self.profile.swatches.felt;
        let tolerance = self.profile.color_tolerance;
        let matching: usize = (0..height)
            .into_par_iter()
            .map(|y| {
                (0..width)
                    .filter(|&x| felt.matches(rgb.get_pixel(x, y).0, tolerance))
                    .count()
            })
            .sum();

        matching as f32 / (width as usize * height as usize) as f32
    }

    /// Number of bright blobs shaped like a face-up card
    pub fn count_card_shapes(&self, frame: &DynamicImage) -> usize {
        let mask = bright_mask(frame);
        let frame_area = (mask.width() as f32) * (mask.height() as f32);
        if frame_area == 0.0 {
            return 0;
        }

        blob_boxes(&mask)
            .iter()
            .filter(|bbox| {
                let aspect = bbox.height as f32 / bbox.width as f32;
                let area = (bbox.width * bbox.height) as f32 / frame_area;
                (CARD_ASPECT_MIN..=CARD_ASPECT_MAX).contains(&aspect)
                    && (CARD_AREA_MIN..=CARD_AREA_MAX).contains(&area)
            })
            .count()
    }

    /// Felt-ratio and card-shape heuristics. Pure function of the frame.
    pub fn detect_poker_table(&self, frame: &DynamicImage) -> TableDetection {
        let frame = downscale_for_detection(frame);

        let felt_ratio = self.felt_ratio(&frame);
        let card_shapes = self.count_card_shapes(&frame);

        let felt_score = (felt_ratio / self.config.felt_ratio_target).min(1.0);
        let card_score = if self.config.min_card_shapes == 0 {
            1.0
        } else {
            (card_shapes as f32 / self.config.min_card_shapes as f32).min(1.0)
        };
        let confidence = FELT_WEIGHT * felt_score + CARD_WEIGHT * card_score;

        let mut details = Vec::new();
        if felt_ratio >= self.config.felt_ratio_target {
            details.push(format!("felt_ratio {:.2}", felt_ratio));
        }
        if card_shapes >= self.config.min_card_shapes.max(1) {
            details.push(format!("card_shapes {}", card_shapes));
        }

        let detected = confidence >= self.config.table_confidence;
        debug!(
            site = %self.profile.name,
            felt_ratio,
            card_shapes,
            confidence,
            detected,
            "table detection"
        );

        TableDetection {
            detected,
            confidence,
            felt_ratio,
            card_shapes,
            details,
        }
    }

    /// Bounding box of the felt when the table fills only part of the
    /// frame, e.g. a table window captured with the whole monitor. `None`
    /// when there is no felt or it already spans the frame.
    pub fn locate_table(&self, frame: &DynamicImage) -> Option<Roi> {
        let rgb = frame.to_rgb8();
        let (width, height) = rgb.dimensions();
        let felt = self.profile.swatches.felt;
        let tolerance = self.profile.color_tolerance;

        let mask: Vec<Vec<bool>> = (0..height)
            .into_par_iter()
            .map(|y| (0..width).map(|x| felt.matches(rgb.get_pixel(x, y).0, tolerance)).collect())
            .collect();

        let row_counts: Vec<usize> = mask.iter().map(|row| row.iter().filter(|&&f| f).count()).collect();
        let mut col_counts = vec![0usize; width as usize];
        for row in &mask {
            for (x, _) in row.iter().enumerate().filter(|(_, &f)| f) {
                col_counts[x] += 1;
            }
        }

        let (top, bottom) = felt_span(&row_counts)?;
        let (left, right) = felt_span(&col_counts)?;
        let area = Roi::new(left as i32, top as i32, (right - left + 1) as u32, (bottom - top + 1) as u32);
        if area.width == width && area.height == height {
            return None;
        }

        debug!(site = %self.profile.name, x = area.x, y = area.y, width = area.width, height = area.height, "table located in frame");
        Some(area)
    }

    /// Lock the profile's regions onto this frame. `None` when the table
    /// is not recognized confidently enough or the window shape drifted
    /// too far from the profile's reference.
    pub fn calibrate(&self, frame: &DynamicImage) -> Option<RegionSet> {
        let detection = self.detect_poker_table(frame);
        if detection.confidence < self.config.calibration_confidence {
            info!(
                site = %self.profile.name,
                confidence = detection.confidence,
                "calibration failed: table not recognized"
            );
            return None;
        }

        let (width, height) = if self.profile.aspect_matches(frame.width(), frame.height()) {
            frame.dimensions()
        } else {
            self.locate_table(frame)
                .map(|area| (area.width, area.height))
                .unwrap_or(frame.dimensions())
        };
        let regions = self.profile.project(width, height);
        match &regions {
            Some(set) => info!(
                site = %self.profile.name,
                width,
                height,
                regions = set.regions.len(),
                "calibrated"
            ),
            None => info!(
                site = %self.profile.name,
                width,
                height,
                "calibration failed: aspect ratio differs from profile"
            ),
        }
        regions
    }
}

/// First and last index whose count reaches `FELT_SPAN_SHARE` of the maximum
fn felt_span(counts: &[usize]) -> Option<(usize, usize)> {
    let max = counts.iter().copied().max().filter(|&m| m > 0)?;
    let threshold = ((max as f32 * FELT_SPAN_SHARE).ceil() as usize).max(1);
    let first = counts.iter().position(|&c| c >= threshold)?;
    let last = counts.iter().rposition(|&c| c >= threshold)?;
    Some((first, last))
}

fn bright_mask(frame: &DynamicImage) -> GrayImage {
    let gray = frame.to_luma8();
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > WHITE_LUMA {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

fn downscale_for_detection(frame: &DynamicImage) -> DynamicImage {
    let (width, height) = frame.dimensions();
    if width <= DETECTION_MAX_WIDTH {
        return frame.clone();
    }
    let scale = DETECTION_MAX_WIDTH as f32 / width as f32;
    let target_height = ((height as f32 * scale) as u32).max(1);
    frame.resize_exact(DETECTION_MAX_WIDTH, target_height, image::imageops::FilterType::Nearest)
}
