use serde::{Deserialize, Serialize};

/// Pixel rectangle inside a captured frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Project a fractional rectangle (all components in [0, 1]) onto a frame
    pub fn from_fractions(fx: f64, fy: f64, fw: f64, fh: f64, frame_w: u32, frame_h: u32) -> Self {
        let x1 = (fx * frame_w as f64).round() as i32;
        let y1 = (fy * frame_h as f64).round() as i32;
        let x2 = ((fx + fw) * frame_w as f64).round() as i32;
        let y2 = ((fy + fh) * frame_h as f64).round() as i32;

        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }

    pub fn x2(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn y2(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn intersects(&self, other: &Roi) -> bool {
        self.x < other.x2()
            && self.x2() > other.x
            && self.y < other.y2()
            && self.y2() > other.y
    }

    /// Clip to a `width` x `height` frame. Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.clamp(0, width as i32);
        let y1 = self.y.clamp(0, height as i32);
        let x2 = self.x2().clamp(0, width as i32);
        let y2 = self.y2().clamp(0, height as i32);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}
