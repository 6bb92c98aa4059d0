//! Crop rectangles and the square output region.
//!
//! Crop rectangles are given in source-pixel coordinates of the *displayed*
//! frame (after rotation). The compositor works in normalized texture space,
//! so [`CropRect::normalized`] converts between the two.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A rectangle in source-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Largest square centered in a `width`×`height` frame.
    pub fn centered_square(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self::new((width - side) / 2, (height - side) / 2, side, side)
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// Intersect with a `frame_width`×`frame_height` frame.
    ///
    /// Fails when nothing of the rectangle is left inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Result<Self, ModelError> {
        if self.width == 0 || self.height == 0 {
            return Err(ModelError::crop(format!("{self} has zero area")));
        }
        let x = self.x.min(frame_width);
        let y = self.y.min(frame_height);
        let right = self.right().min(frame_width);
        let bottom = self.bottom().min(frame_height);
        if right <= x || bottom <= y {
            return Err(ModelError::crop(format!(
                "{self} lies outside the {frame_width}x{frame_height} frame"
            )));
        }
        Ok(Self::new(x, y, right - x, bottom - y))
    }

    /// The rectangle as fractions of a `frame_width`×`frame_height` frame.
    pub fn normalized(&self, frame_width: u32, frame_height: u32) -> NormalizedRect {
        let fw = frame_width.max(1) as f64;
        let fh = frame_height.max(1) as f64;
        NormalizedRect {
            x: self.x as f64 / fw,
            y: self.y as f64 / fh,
            w: self.width as f64 / fw,
            h: self.height as f64 / fh,
        }
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Parses `x,y,width,height`.
impl FromStr for CropRect {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ModelError::crop(format!("'{s}': {e}")))?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(Self::new(*x, *y, *w, *h)),
            _ => Err(ModelError::crop(format!("'{s}': expected x,y,width,height"))),
        }
    }
}

/// A rectangle in normalized `[0.0, 1.0]` coordinates.
///
/// `(0.0, 0.0)` is top-left, `(1.0, 1.0)` is bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl NormalizedRect {
    /// The whole frame.
    pub const FULL: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Map a point in `[0, 1]²` of the destination onto this rectangle.
    pub fn map(&self, u: f64, v: f64) -> (f64, f64) {
        (self.x + u * self.w, self.y + v * self.h)
    }
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// What the compositor samples and what size it draws at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    /// Sampled rectangle in source-pixel space.
    pub viewport: CropRect,

    /// Destination width and height.
    pub output_size: (u32, u32),
}

impl CropRegion {
    /// A square output of `side` pixels.
    pub fn square(viewport: CropRect, side: u32) -> Self {
        Self {
            viewport,
            output_size: (side, side),
        }
    }

    pub fn output_width(&self) -> u32 {
        self.output_size.0
    }

    pub fn output_height(&self) -> u32 {
        self.output_size.1
    }
}
