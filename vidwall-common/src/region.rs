use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A rectangle in screen coordinates, owned by one stream at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        let (ax2, ay2) = (self.x as i64 + self.width as i64, self.y as i64 + self.height as i64);
        let (bx2, by2) = (other.x as i64 + other.width as i64, other.y as i64 + other.height as i64);
        (self.x as i64) < bx2 && (other.x as i64) < ax2 && (self.y as i64) < by2 && (other.y as i64) < ay2
    }

    /// Splits into `count` side-by-side columns that tile the region exactly.
    /// The last column absorbs the integer remainder. A column is never less
    /// than one pixel wide, so at most `width` columns come back.
    pub fn split_columns(&self, count: usize) -> Vec<Region> {
        let count = count.min(self.width as usize);
        if count == 0 {
            return Vec::new();
        }
        let count_u32 = count as u32;
        let base = self.width / count_u32;
        let mut columns = Vec::with_capacity(count);
        let mut x = self.x;
        for i in 0..count_u32 {
            let width = if i + 1 == count_u32 {
                self.width - base * (count_u32 - 1)
            } else {
                base
            };
            columns.push(Region::new(x, self.y, width, self.height));
            x += width as i32;
        }
        columns
    }
}

/// X11 geometry form, `WxH+X+Y`.
impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}{:+}{:+}", self.width, self.height, self.x, self.y)
    }
}

impl FromStr for Region {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidRegion { region: s.to_string() };

        let (width, rest) = s.split_once('x').ok_or_else(invalid)?;
        let offset_start = rest.find(['+', '-']).ok_or_else(invalid)?;
        let (height, offsets) = rest.split_at(offset_start);
        let second = offsets[1..].find(['+', '-']).map(|i| i + 1).ok_or_else(invalid)?;
        let (x, y) = offsets.split_at(second);

        let region = Region::new(
            x.parse().map_err(|_| invalid())?,
            y.parse().map_err(|_| invalid())?,
            width.parse().map_err(|_| invalid())?,
            height.parse().map_err(|_| invalid())?,
        );
        if region.width == 0 || region.height == 0 {
            return Err(invalid());
        }
        Ok(region)
    }
}
