use crate::error::{Result, ScraperError};
use crate::models::roi::Roi;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const BOARD_SLOTS: usize = 5;
pub const HERO_SLOTS: usize = 2;

/// Semantic role of a region. Serialized as `pot`, `board_2`, `hero_card_0`,
/// `seat_3_stack`, `seat_3_card_1`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RegionRole {
    Pot,
    Board(usize),
    HeroCard(usize),
    SeatName(u8),
    SeatStack(u8),
    SeatBet(u8),
    SeatDealer(u8),
    SeatCard(u8, usize),
}

impl RegionRole {
    pub fn seat(&self) -> Option<u8> {
        match *self {
            RegionRole::SeatName(s)
            | RegionRole::SeatStack(s)
            | RegionRole::SeatBet(s)
            | RegionRole::SeatDealer(s)
            | RegionRole::SeatCard(s, _) => Some(s),
            _ => None,
        }
    }

    /// Whether this region is read as a card face
    pub fn is_card(&self) -> bool {
        matches!(
            self,
            RegionRole::Board(_) | RegionRole::HeroCard(_) | RegionRole::SeatCard(_, _)
        )
    }
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionRole::Pot => write!(f, "pot"),
            RegionRole::Board(i) => write!(f, "board_{}", i),
            RegionRole::HeroCard(i) => write!(f, "hero_card_{}", i),
            RegionRole::SeatName(s) => write!(f, "seat_{}_name", s),
            RegionRole::SeatStack(s) => write!(f, "seat_{}_stack", s),
            RegionRole::SeatBet(s) => write!(f, "seat_{}_bet", s),
            RegionRole::SeatDealer(s) => write!(f, "seat_{}_dealer", s),
            RegionRole::SeatCard(s, i) => write!(f, "seat_{}_card_{}", s, i),
        }
    }
}

impl FromStr for RegionRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || format!("Unknown region role: {}", s);
        let parts: Vec<&str> = s.split('_').collect();

        let role = match parts.as_slice() {
            ["pot"] => RegionRole::Pot,
            ["board", i] => RegionRole::Board(i.parse().map_err(|_| invalid())?),
            ["hero", "card", i] => RegionRole::HeroCard(i.parse().map_err(|_| invalid())?),
            ["seat", n, kind] => {
                let seat: u8 = n.parse().map_err(|_| invalid())?;
                match *kind {
                    "name" => RegionRole::SeatName(seat),
                    "stack" => RegionRole::SeatStack(seat),
                    "bet" => RegionRole::SeatBet(seat),
                    "dealer" => RegionRole::SeatDealer(seat),
                    _ => return Err(invalid()),
                }
            }
            ["seat", n, "card", i] => RegionRole::SeatCard(
                n.parse().map_err(|_| invalid())?,
                i.parse().map_err(|_| invalid())?,
            ),
            _ => return Err(invalid()),
        };

        Ok(role)
    }
}

impl TryFrom<String> for RegionRole {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegionRole> for String {
    fn from(role: RegionRole) -> Self {
        role.to_string()
    }
}

/// Region defined as fractions of the reference resolution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RegionSpec {
    pub role: RegionRole,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RegionSpec {
    pub fn new(role: RegionRole, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            role,
            x,
            y,
            width,
            height,
        }
    }
}

/// A region projected onto an actual frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub role: RegionRole,
    pub roi: Roi,
}

/// The full set of regions for one frame size. Replaced as a whole on
/// recalibration, never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionSet {
    pub frame_width: u32,
    pub frame_height: u32,
    pub regions: Vec<Region>,
}

impl RegionSet {
    pub fn get(&self, role: RegionRole) -> Option<Roi> {
        self.regions.iter().find(|r| r.role == role).map(|r| r.roi)
    }

    pub fn matches_frame(&self, width: u32, height: u32) -> bool {
        self.frame_width == width && self.frame_height == height
    }
}

/// RGB reference color
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorSwatch(pub [u8; 3]);

impl ColorSwatch {
    /// Euclidean distance in RGB space
    pub fn distance(&self, rgb: [u8; 3]) -> f64 {
        let [r, g, b] = self.0;
        let dr = r as f64 - rgb[0] as f64;
        let dg = g as f64 - rgb[1] as f64;
        let db = b as f64 - rgb[2] as f64;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    pub fn matches(&self, rgb: [u8; 3], tolerance: f64) -> bool {
        self.distance(rgb) <= tolerance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Swatches {
    pub felt: ColorSwatch,
    pub card_back: ColorSwatch,
    pub dealer_button: ColorSwatch,
}

fn default_aspect_tolerance() -> f64 {
    0.08
}

fn default_color_tolerance() -> f64 {
    60.0
}

/// Layout and matching metadata for one poker client's table skin.
///
/// Read-only while a capture session runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteProfile {
    pub name: String,
    /// Regex matched against window titles; `None` captures the whole monitor
    #[serde(default)]
    pub window_title: Option<String>,
    pub reference_width: u32,
    pub reference_height: u32,
    #[serde(default = "default_aspect_tolerance")]
    pub aspect_tolerance: f64,
    #[serde(default)]
    pub hero_seat: Option<u8>,
    pub swatches: Swatches,
    #[serde(default = "default_color_tolerance")]
    pub color_tolerance: f64,
    pub regions: Vec<RegionSpec>,
}

impl SiteProfile {
    pub fn builtin_names() -> &'static [&'static str] {
        &["generic", "ggpoker", "pokerstars"]
    }

    /// Profiles shipped with the crate
    pub fn builtin(name: &str) -> Option<Self> {
        let felt_green = ColorSwatch([35, 105, 60]);
        let card_back = ColorSwatch([160, 30, 40]);
        let dealer_button = ColorSwatch([235, 200, 60]);

        let profile = match name {
            "generic" => Self {
                name: "generic".to_string(),
                window_title: None,
                reference_width: 1280,
                reference_height: 880,
                aspect_tolerance: default_aspect_tolerance(),
                hero_seat: Some(1),
                swatches: Swatches {
                    felt: felt_green,
                    card_back,
                    dealer_button,
                },
                color_tolerance: default_color_tolerance(),
                regions: seat_ellipse_layout(6, 1),
            },
            "ggpoker" => Self {
                name: "ggpoker".to_string(),
                window_title: Some(r"(?i)gg\s?poker|natural8".to_string()),
                reference_width: 1280,
                reference_height: 960,
                aspect_tolerance: default_aspect_tolerance(),
                hero_seat: Some(1),
                swatches: Swatches {
                    felt: ColorSwatch([30, 70, 95]),
                    card_back: ColorSwatch([200, 40, 40]),
                    dealer_button,
                },
                color_tolerance: default_color_tolerance(),
                regions: seat_ellipse_layout(6, 1),
            },
            "pokerstars" => Self {
                name: "pokerstars".to_string(),
                window_title: Some(r"(?i)pokerstars|no limit hold'em".to_string()),
                reference_width: 1280,
                reference_height: 880,
                aspect_tolerance: default_aspect_tolerance(),
                hero_seat: Some(1),
                swatches: Swatches {
                    felt: ColorSwatch([40, 110, 55]),
                    card_back,
                    dealer_button,
                },
                color_tolerance: default_color_tolerance(),
                regions: seat_ellipse_layout(9, 1),
            },
            _ => return None,
        };

        Some(profile)
    }

    /// Sorted, unique seat numbers present in the region set
    pub fn seats(&self) -> Vec<u8> {
        let mut seats: Vec<u8> = self.regions.iter().filter_map(|r| r.role.seat()).collect();
        seats.sort_unstable();
        seats.dedup();
        seats
    }

    /// Frame aspect ratio is within tolerance of the reference one
    pub fn aspect_matches(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let reference = self.reference_width as f64 / self.reference_height as f64;
        let actual = width as f64 / height as f64;
        (actual / reference - 1.0).abs() <= self.aspect_tolerance
    }

    /// Scale the fractional regions onto a frame. `None` when the aspect
    /// ratio has drifted too far for scaled boxes to be trusted.
    pub fn project(&self, width: u32, height: u32) -> Option<RegionSet> {
        if !self.aspect_matches(width, height) {
            return None;
        }

        let regions = self
            .regions
            .iter()
            .map(|spec| Region {
                role: spec.role,
                roi: Roi::from_fractions(spec.x, spec.y, spec.width, spec.height, width, height),
            })
            .collect();

        Some(RegionSet {
            frame_width: width,
            frame_height: height,
            regions,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ScraperError::InvalidProfile(format!("{}: {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return invalid("name is empty".to_string());
        }
        if self.reference_width == 0 || self.reference_height == 0 {
            return invalid("reference resolution must be non-zero".to_string());
        }
        if let Some(pattern) = &self.window_title {
            if let Err(e) = Regex::new(pattern) {
                return invalid(format!("bad window title pattern: {}", e));
            }
        }

        let mut seen = HashSet::new();
        for spec in &self.regions {
            let in_unit = |v: f64| (0.0..=1.0).contains(&v);
            if !in_unit(spec.x)
                || !in_unit(spec.y)
                || !in_unit(spec.x + spec.width)
                || !in_unit(spec.y + spec.height)
                || spec.width <= 0.0
                || spec.height <= 0.0
            {
                return invalid(format!("region {} outside the unit square", spec.role));
            }
            if !seen.insert(spec.role) {
                return invalid(format!("duplicate region {}", spec.role));
            }
            match spec.role {
                RegionRole::Board(i) if i >= BOARD_SLOTS => {
                    return invalid(format!("board slot {} out of range", i))
                }
                RegionRole::HeroCard(i) if i >= HERO_SLOTS => {
                    return invalid(format!("hero slot {} out of range", i))
                }
                RegionRole::SeatCard(_, i) if i >= HERO_SLOTS => {
                    return invalid(format!("seat card slot {} out of range", i))
                }
                _ => {}
            }
        }

        if let Some(hero) = self.hero_seat {
            if !self.seats().contains(&hero) {
                return invalid(format!("hero seat {} has no regions", hero));
            }
        }

        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let profile: SiteProfile = serde_json::from_str(&content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

const TABLE_CX: f64 = 0.5;
const TABLE_CY: f64 = 0.45;
const SEAT_RX: f64 = 0.38;
const SEAT_RY: f64 = 0.33;

/// Seats around an ellipse, clockwise from the bottom-centre hero seat.
/// Each seat gets a name plate, a stack line beneath it, two card slots
/// above it, a dealer marker to its right and a bet box towards the centre.
fn seat_ellipse_layout(seat_count: u8, hero_seat: u8) -> Vec<RegionSpec> {
    let mut regions = Vec::new();

    regions.push(RegionSpec::new(RegionRole::Pot, 0.44, 0.355, 0.12, 0.03));

    let card_w = 0.045;
    let gap = 0.008;
    let board_x = TABLE_CX - (BOARD_SLOTS as f64 * card_w + (BOARD_SLOTS - 1) as f64 * gap) / 2.0;
    for i in 0..BOARD_SLOTS {
        let x = board_x + i as f64 * (card_w + gap);
        regions.push(RegionSpec::new(RegionRole::Board(i), x, 0.41, card_w, 0.08));
    }

    regions.push(RegionSpec::new(RegionRole::HeroCard(0), 0.4525, 0.695, card_w, 0.075));
    regions.push(RegionSpec::new(RegionRole::HeroCard(1), 0.5025, 0.695, card_w, 0.075));

    for i in 0..seat_count {
        let seat = i + 1;
        let theta = (90.0 + i as f64 * 360.0 / seat_count as f64).to_radians();
        let cx = TABLE_CX + SEAT_RX * theta.cos();
        let cy = TABLE_CY + SEAT_RY * theta.sin();

        regions.push(RegionSpec::new(RegionRole::SeatName(seat), cx - 0.06, cy, 0.12, 0.03));
        regions.push(RegionSpec::new(RegionRole::SeatStack(seat), cx - 0.06, cy + 0.035, 0.12, 0.03));
        regions.push(RegionSpec::new(RegionRole::SeatDealer(seat), cx + 0.07, cy, 0.025, 0.035));

        let bx = cx + (TABLE_CX - cx) * 0.35;
        let by = cy + (TABLE_CY - cy) * 0.35;
        regions.push(RegionSpec::new(RegionRole::SeatBet(seat), bx - 0.04, by - 0.015, 0.08, 0.03));

        if seat != hero_seat {
            regions.push(RegionSpec::new(RegionRole::SeatCard(seat, 0), cx - 0.042, cy - 0.075, 0.04, 0.07));
            regions.push(RegionSpec::new(RegionRole::SeatCard(seat, 1), cx + 0.002, cy - 0.075, 0.04, 0.07));
        }
    }

    regions
}
