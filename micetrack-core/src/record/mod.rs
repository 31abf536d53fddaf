//! record — one body ellipse per frame
//!
//! NaN marks fields with no measurement behind them.  `valid` is tracked
//! separately: repair passes fill NaN fields but never touch the flag, so a
//! repaired record is defined yet still untrusted.

use nalgebra::Vector2;

pub type Vec2 = Vector2<f64>;

/// Direction given to records whose orientation is unknown.
pub fn default_direction() -> Vec2 {
    Vec2::new(1.0, 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EllipseRecord {
    pub position: Vec2,
    /// Unit vector along the major axis, pointing toward the head once resolved.
    pub direction: Vec2,
    pub velocity: Vec2,
    pub major: f64,
    pub minor: f64,
    pub valid: bool,
}

impl EllipseRecord {
    /// A freshly measured record; valid unless some field is NaN.
    pub fn new(position: Vec2, direction: Vec2, major: f64, minor: f64) -> Self {
        let mut record = Self {
            position,
            direction,
            velocity: Vec2::zeros(),
            major,
            minor,
            valid: false,
        };
        record.valid = !record.has_nan();
        record
    }

    /// A record for a frame where nothing was detected.
    pub fn undefined() -> Self {
        let nan = Vec2::new(f64::NAN, f64::NAN);
        Self::new(nan, nan, f64::NAN, f64::NAN)
    }

    pub fn has_nan(&self) -> bool {
        self.position.iter().any(|v| v.is_nan())
            || self.direction.iter().any(|v| v.is_nan())
            || self.major.is_nan()
            || self.minor.is_nan()
    }

    pub fn is_defined(&self) -> bool {
        !self.has_nan()
    }

    /// Drop every measured field and mark the record untrusted.
    pub fn invalidate(&mut self) {
        let nan = Vec2::new(f64::NAN, f64::NAN);
        self.position = nan;
        self.direction = nan;
        self.major = f64::NAN;
        self.minor = f64::NAN;
        self.valid = false;
    }

    pub fn elongation(&self) -> f64 {
        self.major / self.minor
    }

    /// Distance between the two axis endpoints (`direction` is unit length).
    pub fn length(&self) -> f64 {
        2.0 * self.major
    }

    pub fn head(&self) -> Vec2 {
        self.position + self.direction * self.major
    }

    pub fn tail(&self) -> Vec2 {
        self.position - self.direction * self.major
    }

    /// Copy the geometry of `other`, keeping this record's flag and velocity.
    pub fn copy_geometry(&mut self, other: &EllipseRecord) {
        self.position = other.position;
        self.direction = other.direction;
        self.major = other.major;
        self.minor = other.minor;
    }

    pub fn flip(&mut self) {
        self.direction = -self.direction;
    }
}
