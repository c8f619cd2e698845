//! Annotated frames for checking a profile's regions by eye.

use crate::error::Result;
use crate::models::card::Card;
use crate::models::site_profile::{RegionRole, RegionSet};
use crate::models::table_state::TableState;
use chrono::{DateTime, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::fs;
use std::path::{Path, PathBuf};

pub const COLOR_CARD_KNOWN: Rgb<u8> = Rgb([0, 255, 0]);
pub const COLOR_CARD_UNKNOWN: Rgb<u8> = Rgb([255, 0, 0]);
pub const COLOR_AMOUNT: Rgb<u8> = Rgb([0, 200, 255]);
pub const COLOR_SEAT: Rgb<u8> = Rgb([255, 255, 0]);

const THICKNESS: u32 = 2;

/// Draw every region onto a copy of `frame`. Card slots are green when
/// `state` holds a card for them and red otherwise.
pub fn render_annotated(frame: &DynamicImage, regions: &RegionSet, state: Option<&TableState>) -> RgbImage {
    let mut img = frame.to_rgb8();
    let (width, height) = img.dimensions();

    for region in &regions.regions {
        let Some((x, y, w, h)) = region.roi.clamp_to(width, height) else {
            continue;
        };
        let color = match region.role {
            role if role.is_card() => {
                if state.and_then(|s| card_for(s, role)).is_some() {
                    COLOR_CARD_KNOWN
                } else {
                    COLOR_CARD_UNKNOWN
                }
            }
            RegionRole::Pot | RegionRole::SeatStack(_) | RegionRole::SeatBet(_) => COLOR_AMOUNT,
            _ => COLOR_SEAT,
        };

        for inset in 0..THICKNESS.min(w / 2).min(h / 2) {
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(&mut img, rect, color);
        }
    }

    img
}

/// Render and write a PNG, creating parent directories
pub fn save_annotated(
    frame: &DynamicImage,
    regions: &RegionSet,
    state: Option<&TableState>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    render_annotated(frame, regions, state).save(path)?;
    Ok(())
}

/// `<dir>/table-20240101-120000.123.png`
pub fn debug_image_path(dir: &Path, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("table-{}.png", at.format("%Y%m%d-%H%M%S%.3f")))
}

fn card_for(state: &TableState, role: RegionRole) -> Option<Card> {
    match role {
        RegionRole::Board(i) => state.board_cards().get(i).copied().flatten(),
        RegionRole::HeroCard(i) => state.hole_cards().get(i).copied().flatten(),
        RegionRole::SeatCard(seat, i) => state.seat(seat)?.hole_cards.get(i).copied().flatten(),
        _ => None,
    }
}
