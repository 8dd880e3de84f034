//! Canvas data model: colors, the fixed-size grid, and single-cell edits.
//!
//! Layout follows the wire format: the grid is a list of rows, so a cell
//! is addressed as `rows[y][x]`:
//! ```text
//!            x →  0        1        2            W-1
//!   y = 0   [ "#FFFFFF", "#FFFFFF", "#FF0000", …  ]
//!   y = 1   [ "#FFFFFF", "#00AA00", "#FFFFFF", …  ]
//!    …
//!   y = H-1 [ …                                   ]
//! ```
//!
//! Every cell always holds a valid [`Color`]; a grid never changes shape once
//! built. Colors are normalized to uppercase `#RRGGBB` on the way in, so two
//! grids that render identically also compare and serialize identically.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid color: {0:?}")]
    InvalidColor(String),
    #[error("Grid has no cells")]
    Empty,
    #[error("Row {row} has {found} cells, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Grid is {found}, expected {expected}")]
    DimensionMismatch {
        expected: Dimensions,
        found: Dimensions,
    },
    #[error("Cell ({x}, {y}) is outside the {width}x{height} canvas")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
    #[error("Grid JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ─── Color ────────────────────────────────────────────────────────────────

/// An opaque RGB color. Serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color([u8; 3]);

impl Color {
    pub const WHITE: Color = Color([0xFF, 0xFF, 0xFF]);
    pub const BLACK: Color = Color([0x00, 0x00, 0x00]);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// Parse `#RGB` or `#RRGGBB` (case-insensitive, surrounding whitespace ignored).
    pub fn parse(input: &str) -> Result<Self, GridError> {
        let invalid = || GridError::InvalidColor(input.to_string());
        let hex = input.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
        match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, c) in hex.chars().enumerate() {
                    let v = channel(&c.to_string())?;
                    out[i] = v * 17; // 0xF -> 0xFF
                }
                Ok(Self(out))
            }
            6 => Ok(Self([
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            ])),
            _ => Err(invalid()),
        }
    }

    pub fn channels(&self) -> [u8; 3] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

// ─── Dimensions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
}

impl Dimensions {
    /// Canvas size of the reference deployment.
    pub const REFERENCE: Dimensions = Dimensions {
        width: 384,
        height: 196,
    };

    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::REFERENCE
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ─── Edit ─────────────────────────────────────────────────────────────────

/// A proposed single-cell change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub x: usize,
    pub y: usize,
    pub color: Color,
}

impl Edit {
    pub fn new(x: usize, y: usize, color: Color) -> Self {
        Self { x, y, color }
    }

    pub fn validate(&self, dims: Dimensions) -> Result<(), GridError> {
        if dims.contains(self.x, self.y) {
            Ok(())
        } else {
            Err(GridError::OutOfBounds {
                x: self.x,
                y: self.y,
                width: dims.width,
                height: dims.height,
            })
        }
    }
}

// ─── Grid ─────────────────────────────────────────────────────────────────

/// The full canvas. Always rectangular. Decoded grids are non-empty; only
/// [`Grid::blank`] with a zero dimension yields an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Color>>", into = "Vec<Vec<Color>>")]
pub struct Grid {
    rows: Vec<Vec<Color>>,
}

impl Grid {
    /// An all-white grid.
    pub fn blank(dims: Dimensions) -> Self {
        Self {
            rows: vec![vec![Color::WHITE; dims.width]; dims.height],
        }
    }

    /// Build a grid from rows, rejecting empty or ragged input.
    pub fn from_rows(rows: Vec<Vec<Color>>) -> Result<Self, GridError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if width == 0 {
            return Err(GridError::Empty);
        }
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(GridError::Ragged {
                row,
                expected: width,
                found: r.len(),
            });
        }
        Ok(Self { rows })
    }

    /// Decode the JSON wire/storage form (array of rows of hex strings).
    pub fn from_json(bytes: &[u8]) -> Result<Self, GridError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, GridError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.rows.first().map_or(0, Vec::len),
            height: self.rows.len(),
        }
    }

    pub fn ensure_dimensions(&self, expected: Dimensions) -> Result<(), GridError> {
        let found = self.dimensions();
        if found != expected {
            return Err(GridError::DimensionMismatch { expected, found });
        }
        Ok(())
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Color> {
        self.rows.get(y).and_then(|row| row.get(x)).copied()
    }

    /// Apply an edit in place, returning the color it replaced.
    pub fn apply(&mut self, edit: &Edit) -> Result<Color, GridError> {
        edit.validate(self.dimensions())?;
        let cell = &mut self.rows[edit.y][edit.x];
        Ok(std::mem::replace(cell, edit.color))
    }

    /// A copy of this grid with exactly one cell replaced.
    pub fn with_edit(&self, edit: &Edit) -> Result<Grid, GridError> {
        let mut next = self.clone();
        next.apply(edit)?;
        Ok(next)
    }

    /// Number of cells whose color differs. Grids of different shape differ everywhere.
    pub fn diff_cells(&self, other: &Grid) -> usize {
        if self.dimensions() != other.dimensions() {
            return self.dimensions().cell_count().max(other.dimensions().cell_count());
        }
        self.rows
            .iter()
            .zip(&other.rows)
            .map(|(a, b)| a.iter().zip(b).filter(|(ca, cb)| ca != cb).count())
            .sum()
    }

    pub fn rows(&self) -> &[Vec<Color>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Color>> {
        self.rows
    }
}

impl TryFrom<Vec<Vec<Color>>> for Grid {
    type Error = GridError;

    fn try_from(rows: Vec<Vec<Color>>) -> Result<Self, Self::Error> {
        Grid::from_rows(rows)
    }
}

impl From<Grid> for Vec<Vec<Color>> {
    fn from(grid: Grid) -> Self {
        grid.rows
    }
}
