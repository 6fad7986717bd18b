//! Tile pyramid index.
//!
//! Maps `(zoom, row, col)` tile identities to geographic bounds and pixel
//! shapes for a fixed grid, metatiling factor and pixel buffer. All
//! operations are pure functions of the pyramid configuration; no I/O
//! happens here.
//!
//! # Example
//!
//! ```ignore
//! use tileflow::pyramid::{GridType, TilePyramid};
//!
//! let pyramid = TilePyramid::new(GridType::Geodetic, 2, 8)?;
//! let tile = pyramid.tile(5, 3, 7)?;
//! let bounds = pyramid.buffered_bounds(&tile);
//! ```

mod types;

pub use types::{
    Bounds, GridType, PyramidError, Shape, Tile, ALLOWED_METATILING, DEFAULT_TILE_SIZE, MAX_ZOOM,
};

/// A tile pyramid with fixed metatiling and pixel buffer.
///
/// Immutable once constructed. The metatiling factor groups an N×N block of
/// base tiles into one processing unit; the pixel buffer adds an overlap
/// margin around each tile's nominal bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TilePyramid {
    grid: GridType,
    metatiling: u32,
    tile_size: u32,
    pixelbuffer: u32,
}

impl TilePyramid {
    /// Creates a pyramid with the default tile size of 256 pixels.
    ///
    /// # Arguments
    ///
    /// * `grid` - Grid projection type
    /// * `metatiling` - Metatile factor, one of {1, 2, 4, 8, 16}
    /// * `pixelbuffer` - Buffer around tiles in pixels
    pub fn new(grid: GridType, metatiling: u32, pixelbuffer: u32) -> Result<Self, PyramidError> {
        Self::with_tile_size(grid, metatiling, pixelbuffer, DEFAULT_TILE_SIZE)
    }

    /// Creates a pyramid with an explicit base tile size.
    pub fn with_tile_size(
        grid: GridType,
        metatiling: u32,
        pixelbuffer: u32,
        tile_size: u32,
    ) -> Result<Self, PyramidError> {
        if !ALLOWED_METATILING.contains(&metatiling) {
            return Err(PyramidError::InvalidMetatiling(metatiling));
        }
        Ok(Self {
            grid,
            metatiling,
            tile_size,
            pixelbuffer,
        })
    }

    /// Grid projection type.
    pub fn grid(&self) -> GridType {
        self.grid
    }

    /// Metatiling factor.
    pub fn metatiling(&self) -> u32 {
        self.metatiling
    }

    /// Pixel buffer in pixels.
    pub fn pixelbuffer(&self) -> u32 {
        self.pixelbuffer
    }

    /// Base tile edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Base tile matrix dimensions `(rows, cols)` at a zoom level, before
    /// metatiling.
    fn base_matrix_dimensions(&self, zoom: u8) -> Result<(u32, u32), PyramidError> {
        if zoom > MAX_ZOOM {
            return Err(PyramidError::InvalidZoom(zoom));
        }
        let (rows0, cols0) = self.grid.base_matrix();
        Ok((rows0 << zoom, cols0 << zoom))
    }

    /// Metatile matrix dimensions `(rows, cols)` at a zoom level.
    ///
    /// Edge metatiles may cover fewer base tiles than the metatiling factor;
    /// the matrix is therefore rounded up.
    pub fn matrix_dimensions(&self, zoom: u8) -> Result<(u32, u32), PyramidError> {
        let (rows, cols) = self.base_matrix_dimensions(zoom)?;
        Ok((
            rows.div_ceil(self.metatiling),
            cols.div_ceil(self.metatiling),
        ))
    }

    /// Returns the tile at the given position, checking matrix bounds.
    pub fn tile(&self, zoom: u8, row: u32, col: u32) -> Result<Tile, PyramidError> {
        let (rows, cols) = self.matrix_dimensions(zoom)?;
        if row >= rows || col >= cols {
            return Err(PyramidError::TileOutOfBounds {
                zoom,
                row,
                col,
                rows,
                cols,
            });
        }
        Ok(Tile::new(zoom, row, col))
    }

    /// CRS units per pixel at a zoom level.
    pub fn pixel_size(&self, zoom: u8) -> Result<f64, PyramidError> {
        let (_, base_cols) = self.base_matrix_dimensions(zoom)?;
        Ok(self.grid.extent().width() / base_cols as f64 / self.tile_size as f64)
    }

    /// Span of one metatile in CRS units at a zoom level.
    fn metatile_span(&self, zoom: u8) -> Result<f64, PyramidError> {
        let (_, base_cols) = self.base_matrix_dimensions(zoom)?;
        Ok(self.grid.extent().width() / base_cols as f64 * self.metatiling as f64)
    }

    /// Nominal (unbuffered) bounds of a tile, clipped to the grid extent.
    pub fn tile_bounds(&self, tile: &Tile) -> Result<Bounds, PyramidError> {
        let extent = self.grid.extent();
        let span = self.metatile_span(tile.zoom)?;
        let left = extent.left + tile.col as f64 * span;
        let top = extent.top - tile.row as f64 * span;
        Ok(Bounds::new(
            left,
            (top - span).max(extent.bottom),
            (left + span).min(extent.right),
            top,
        ))
    }

    /// Buffered bounds of a tile.
    ///
    /// The nominal bounds extended by the pixel buffer on every side and
    /// clamped to the grid extent, so edge tiles never leave the grid.
    pub fn buffered_bounds(&self, tile: &Tile) -> Result<Bounds, PyramidError> {
        let nominal = self.tile_bounds(tile)?;
        let buffer = self.pixelbuffer as f64 * self.pixel_size(tile.zoom)?;
        Ok(Bounds::new(
            nominal.left - buffer,
            nominal.bottom - buffer,
            nominal.right + buffer,
            nominal.top + buffer,
        )
        .clamp_to(&self.grid.extent()))
    }

    /// Pixel shape of a tile including buffer and edge clipping.
    pub fn tile_shape(&self, tile: &Tile) -> Result<Shape, PyramidError> {
        let bounds = self.buffered_bounds(tile)?;
        let pixel = self.pixel_size(tile.zoom)?;
        Ok(Shape {
            height: (bounds.height() / pixel).round() as u32,
            width: (bounds.width() / pixel).round() as u32,
        })
    }

    /// Iterates over every tile of a zoom level in row-major order.
    pub fn tiles_for_zoom(&self, zoom: u8) -> Result<impl Iterator<Item = Tile>, PyramidError> {
        let (rows, cols) = self.matrix_dimensions(zoom)?;
        Ok((0..rows).flat_map(move |row| (0..cols).map(move |col| Tile::new(zoom, row, col))))
    }

    /// Returns all tiles of a zoom level intersecting the given bounds, in
    /// row-major order.
    ///
    /// Bounds are clamped to the grid extent first. Tiles merely touching
    /// the bounds on an edge are not included.
    pub fn tiles_from_bounds(&self, bounds: &Bounds, zoom: u8) -> Result<Vec<Tile>, PyramidError> {
        let extent = self.grid.extent();
        let clamped = bounds.clamp_to(&extent);
        if clamped.width() <= 0.0 || clamped.height() <= 0.0 {
            return Ok(Vec::new());
        }
        let span = self.metatile_span(zoom)?;
        let (rows, cols) = self.matrix_dimensions(zoom)?;

        let col_min = ((clamped.left - extent.left) / span).floor() as u32;
        let col_max = (((clamped.right - extent.left) / span).ceil() as u32)
            .saturating_sub(1)
            .min(cols - 1);
        let row_min = ((extent.top - clamped.top) / span).floor() as u32;
        let row_max = (((extent.top - clamped.bottom) / span).ceil() as u32)
            .saturating_sub(1)
            .min(rows - 1);

        let mut tiles = Vec::new();
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                tiles.push(Tile::new(zoom, row, col));
            }
        }
        Ok(tiles)
    }

    /// Snaps bounds outward to the tile grid of a zoom level.
    pub fn snap_bounds(&self, bounds: &Bounds, zoom: u8) -> Result<Bounds, PyramidError> {
        let extent = self.grid.extent();
        let clamped = bounds.clamp_to(&extent);
        let span = self.metatile_span(zoom)?;
        Ok(Bounds::new(
            extent.left + ((clamped.left - extent.left) / span).floor() * span,
            extent.top - ((extent.top - clamped.bottom) / span).ceil() * span,
            extent.left + ((clamped.right - extent.left) / span).ceil() * span,
            extent.top - ((extent.top - clamped.top) / span).floor() * span,
        )
        .clamp_to(&extent))
    }

    /// Parent tile at the next lower zoom level, `None` at zoom 0.
    pub fn parent_tile(&self, tile: &Tile) -> Option<Tile> {
        if tile.zoom == 0 {
            None
        } else {
            Some(Tile::new(tile.zoom - 1, tile.row / 2, tile.col / 2))
        }
    }

    /// Child tiles at the next higher zoom level.
    ///
    /// Up to four tiles, filtered to the child matrix (edge metatiles can
    /// have fewer children).
    pub fn child_tiles(&self, tile: &Tile) -> Result<Vec<Tile>, PyramidError> {
        let zoom = tile
            .zoom
            .checked_add(1)
            .filter(|z| *z <= MAX_ZOOM)
            .ok_or(PyramidError::InvalidZoom(tile.zoom))?;
        let (rows, cols) = self.matrix_dimensions(zoom)?;
        let mut children = Vec::with_capacity(4);
        for row in [tile.row * 2, tile.row * 2 + 1] {
            for col in [tile.col * 2, tile.col * 2 + 1] {
                if row < rows && col < cols {
                    children.push(Tile::new(zoom, row, col));
                }
            }
        }
        Ok(children)
    }
}
