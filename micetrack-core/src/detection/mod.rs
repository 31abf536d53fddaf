//! detection — locate the animal as a weighted ellipse
//!
//! Every pixel inside the crop window is compared with the background; the
//! luma-weighted deviation is both the foreground test (against `threshold`)
//! and the pixel's weight in the first and second moments.  The ellipse is
//! the closed-form eigen-decomposition of the resulting 2×2 covariance.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::background::Background;
use crate::error::{Result, TrackError};
use crate::frame::Frame;
use crate::record::{EllipseRecord, Vec2};

// ── Constants ────────────────────────────────────────────────────────────────

/// Minimum weighted deviation for a pixel to count as foreground.
pub const DEFAULT_THRESHOLD: u8 = 0x40;

/// Fixed-point luma weights, scaled by 2^24.  They sum to exactly 2^24.
const LUMA_RED: u32 = 0x4c8b43;
const LUMA_GREEN: u32 = 0x9645a2;
const LUMA_BLUE: u32 = 0x1d2f1b;
const LUMA_ROUND: u32 = 0x800000;

// ── Crop window ──────────────────────────────────────────────────────────────

/// Margins trimmed from each side of the frame before analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropMargins {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropMargins {
    pub fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    /// Margins leaving exactly the rectangle spanned by two corner points.
    pub fn from_corners(width: u32, height: u32, a: (u32, u32), b: (u32, u32)) -> Self {
        let (x0, x1) = (a.0.min(b.0), a.0.max(b.0));
        let (y0, y1) = (a.1.min(b.1), a.1.max(b.1));
        Self {
            left: x0,
            right: width.saturating_sub(x1),
            top: y0,
            bottom: height.saturating_sub(y1),
        }
    }

    /// Whether `(x, y)` lies in the retained interior of a `width`×`height` frame.
    pub fn contains(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        x >= self.left
            && y >= self.top
            && width.saturating_sub(x) > self.right
            && height.saturating_sub(y) > self.bottom
    }

    /// Retained interval ends `(left, width - right, top, height - bottom)`.
    pub fn bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        (
            self.left,
            width.saturating_sub(self.right),
            self.top,
            height.saturating_sub(self.bottom),
        )
    }

    /// Fails when opposite margins overlap and nothing would be analysed.
    pub fn validate(&self, width: u32, height: u32) -> Result<()> {
        if u64::from(self.left) + u64::from(self.right) >= u64::from(width)
            || u64::from(self.top) + u64::from(self.bottom) >= u64::from(height)
        {
            return Err(TrackError::Config(format!(
                "crop {self} leaves nothing of a {width}x{height} frame"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CropMargins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.left, self.right, self.top, self.bottom)
    }
}

/// `left:right:top:bottom`
impl FromStr for CropMargins {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(':')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TrackError::Config(format!("bad crop {s:?}: {e}")))?;
        match parts[..] {
            [left, right, top, bottom] => Ok(Self::new(left, right, top, bottom)),
            _ => Err(TrackError::Config(format!(
                "bad crop {s:?}: expected <left>:<right>:<top>:<bottom>"
            ))),
        }
    }
}

// ── Pixel weighting ──────────────────────────────────────────────────────────

/// Fixed-point luma of a per-channel deviation.
pub fn weighted_deviation(blue: u8, green: u8, red: u8) -> u8 {
    let l = LUMA_RED * u32::from(red)
        + LUMA_GREEN * u32::from(green)
        + LUMA_BLUE * u32::from(blue)
        + LUMA_ROUND;
    (l >> 24) as u8
}

/// Weighted deviation of a BGR pixel from its reference.  Channels past the
/// third are ignored; missing ones count as zero.
pub fn pixel_deviation(pixel: &[u8], reference: &[u8]) -> u8 {
    let mut bgr = [0u8; 3];
    for (d, (&p, &r)) in bgr.iter_mut().zip(pixel.iter().zip(reference)) {
        *d = p.abs_diff(r);
    }
    weighted_deviation(bgr[0], bgr[1], bgr[2])
}

// ── Moments ──────────────────────────────────────────────────────────────────

/// Weighted raw moments of the foreground pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub weight: f64,
    pub sum_x: f64,
    pub sum_y: f64,
    pub sum_xx: f64,
    pub sum_yy: f64,
    pub sum_xy: f64,
}

impl Moments {
    pub fn add(&mut self, x: u32, y: u32, l: u8) {
        let (x, y, l) = (f64::from(x), f64::from(y), f64::from(l));
        self.weight += l;
        self.sum_x += x * l;
        self.sum_y += y * l;
        self.sum_xx += x * x * l;
        self.sum_yy += y * y * l;
        self.sum_xy += x * y * l;
    }

    pub fn merge(self, other: Moments) -> Moments {
        Moments {
            weight: self.weight + other.weight,
            sum_x: self.sum_x + other.sum_x,
            sum_y: self.sum_y + other.sum_y,
            sum_xx: self.sum_xx + other.sum_xx,
            sum_yy: self.sum_yy + other.sum_yy,
            sum_xy: self.sum_xy + other.sum_xy,
        }
    }

    /// NaN when no pixel contributed.
    pub fn centroid(&self) -> Vec2 {
        Vec2::new(self.sum_x / self.weight, self.sum_y / self.weight)
    }

    /// Centered second moments `(xx, yy, xy)`.
    pub fn covariance(&self) -> (f64, f64, f64) {
        let c = self.centroid();
        (
            self.sum_xx / self.weight - c.x * c.x,
            self.sum_yy / self.weight - c.y * c.y,
            self.sum_xy / self.weight - c.x * c.y,
        )
    }

    /// Body ellipse; every field is NaN (and the record invalid) when empty.
    pub fn ellipse(&self) -> EllipseRecord {
        let (xx, yy, xy) = self.covariance();
        let (direction, major, minor) = principal_axis(xx, yy, xy);
        EllipseRecord::new(self.centroid(), direction, major, minor)
    }
}

/// Major-axis unit vector and the two radii of the covariance
/// `[[xx, xy], [xy, yy]]`.  `t0` is half the eigenvalue gap.
pub fn principal_axis(xx: f64, yy: f64, xy: f64) -> (Vec2, f64, f64) {
    let dif = (yy - xx) / 2.0;
    let t0 = (xy * xy + dif * dif).sqrt();
    let direction = Vec2::new(xy + t0 - dif, xy + t0 + dif);
    let direction = direction / direction.norm();
    let mean = (xx + yy) / 2.0;
    (direction, (mean + t0).sqrt(), (mean - t0).sqrt())
}

// ── Locator ──────────────────────────────────────────────────────────────────

/// How a pixel is treated by the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Cropped,
    Foreground,
    Background,
}

pub struct BlobLocator<'a> {
    background: &'a Background,
    crop: CropMargins,
    threshold: u8,
}

impl<'a> BlobLocator<'a> {
    pub fn new(background: &'a Background, crop: CropMargins, threshold: u8) -> Self {
        Self {
            background,
            crop,
            threshold,
        }
    }

    pub fn crop(&self) -> CropMargins {
        self.crop
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Fails unless `frame` is 8-bit and shaped like the background.
    pub fn check(&self, frame: &Frame) -> Result<()> {
        frame.ensure_u8()?;
        self.background.frame().ensure_compatible(frame)
    }

    pub fn moments(&self, frame: &Frame) -> Result<Moments> {
        self.check(frame)?;

        let reference = self.background.frame();
        let (x_begin, x_end, y_begin, y_end) = self.crop.bounds(frame.width, frame.height);
        let threshold = self.threshold;

        let moments = (y_begin..y_end.max(y_begin))
            .into_par_iter()
            .map(|y| {
                let mut row = Moments::default();
                for x in x_begin..x_end.max(x_begin) {
                    let l = pixel_deviation(frame.pixel(x, y), reference.pixel(x, y));
                    if l >= threshold {
                        row.add(x, y, l);
                    }
                }
                row
            })
            .reduce(Moments::default, Moments::merge);

        Ok(moments)
    }

    pub fn locate(&self, frame: &Frame) -> Result<EllipseRecord> {
        Ok(self.moments(frame)?.ellipse())
    }

    /// Per-pixel decision; `frame` must already have passed [`Self::check`].
    pub fn classify(&self, frame: &Frame, x: u32, y: u32) -> PixelClass {
        if !self.crop.contains(x, y, frame.width, frame.height) {
            return PixelClass::Cropped;
        }
        let l = pixel_deviation(frame.pixel(x, y), self.background.frame().pixel(x, y));
        if l >= self.threshold {
            PixelClass::Foreground
        } else {
            PixelClass::Background
        }
    }
}
