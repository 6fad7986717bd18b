//! Value types shared by the pyramid module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum supported zoom level.
///
/// Row and column indices are stored as `u32`; zoom 30 is the deepest level
/// at which a geodetic tile matrix still fits.
pub const MAX_ZOOM: u8 = 30;

/// Metatiling factors accepted by [`TilePyramid`](super::TilePyramid).
pub const ALLOWED_METATILING: [u32; 5] = [1, 2, 4, 8, 16];

/// Default edge length of a base tile in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Errors raised by pyramid construction and tile lookup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PyramidError {
    /// Metatiling factor is not one of {1, 2, 4, 8, 16}.
    #[error("invalid metatiling factor {0}, must be one of {ALLOWED_METATILING:?}")]
    InvalidMetatiling(u32),

    /// Zoom level exceeds [`MAX_ZOOM`].
    #[error("invalid zoom level {0}, must be <= {MAX_ZOOM}")]
    InvalidZoom(u8),

    /// Tile row/column outside the matrix at its zoom level.
    #[error("tile ({zoom}/{row}/{col}) outside of tile matrix {rows}x{cols}")]
    TileOutOfBounds {
        zoom: u8,
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
    },
}

/// A tile identified by zoom level, row and column within a pyramid.
///
/// Tiles are plain value types: two tiles with equal identity are
/// interchangeable, all geometry is derived from the owning
/// [`TilePyramid`](super::TilePyramid).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    /// Zoom level.
    pub zoom: u8,
    /// Tile matrix row, counted from the top.
    pub row: u32,
    /// Tile matrix column, counted from the left.
    pub col: u32,
}

impl Tile {
    /// Creates a new tile identity.
    pub fn new(zoom: u8, row: u32, col: u32) -> Self {
        Self { zoom, row, col }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.row, self.col)
    }
}

/// Geographic bounds in grid CRS units: `(left, bottom, right, top)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    /// Creates bounds from the four edge coordinates.
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Width in CRS units.
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    /// Height in CRS units.
    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Returns true if the two bounds share any area or edge.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.bottom <= other.top
            && other.bottom <= self.top
    }

    /// Clamps these bounds to `other`.
    pub fn clamp_to(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.max(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.min(other.right),
            top: self.top.min(other.top),
        }
    }
}

impl From<[f64; 4]> for Bounds {
    fn from(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bounds({}, {}, {}, {})",
            self.left, self.bottom, self.right, self.top
        )
    }
}

/// Pixel shape of a tile: `(height, width)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub height: u32,
    pub width: u32,
}

/// Tile grid projection type.
///
/// Determines the CRS extent and the shape of the tile matrix at zoom 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridType {
    /// Plate carrée over (-180, -90, 180, 90); two columns, one row at zoom 0.
    Geodetic,
    /// Web Mercator square extent; one tile at zoom 0.
    Mercator,
}

/// Half the side length of the Web Mercator extent in meters.
const MERCATOR_HALF_EXTENT: f64 = 20037508.342789244;

impl GridType {
    /// CRS extent covered by the grid.
    pub fn extent(&self) -> Bounds {
        match self {
            GridType::Geodetic => Bounds::new(-180.0, -90.0, 180.0, 90.0),
            GridType::Mercator => Bounds::new(
                -MERCATOR_HALF_EXTENT,
                -MERCATOR_HALF_EXTENT,
                MERCATOR_HALF_EXTENT,
                MERCATOR_HALF_EXTENT,
            ),
        }
    }

    /// Base tile matrix dimensions `(rows, cols)` at zoom 0, before metatiling.
    pub fn base_matrix(&self) -> (u32, u32) {
        match self {
            GridType::Geodetic => (1, 2),
            GridType::Mercator => (1, 1),
        }
    }
}

impl fmt::Display for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridType::Geodetic => write!(f, "geodetic"),
            GridType::Mercator => write!(f, "mercator"),
        }
    }
}
