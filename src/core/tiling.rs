//! Tile decomposition for parallel raster evaluation.
//!
//! Each tile reads only from immutable inputs and writes only its own
//! block, so tiles can be evaluated in any order. Results are always
//! combined in row-major tile order, which keeps reductions identical
//! with and without the `parallel` feature.

use crate::types::{SarReal, SarRealImage, NO_DATA};
use ndarray::{s, Array2, Zip};
use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Default tile edge in pixels
pub const DEFAULT_TILE_SIZE: usize = 256;

/// A rectangular block of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub row_offset: usize,
    pub col_offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Tile {
    pub fn row_range(&self) -> Range<usize> {
        self.row_offset..self.row_offset + self.rows
    }

    pub fn col_range(&self) -> Range<usize> {
        self.col_offset..self.col_offset + self.cols
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }
}

/// Non-overlapping tiles covering a (rows, cols) grid in row-major order
pub fn tile_grid(shape: (usize, usize), tile_size: usize) -> Vec<Tile> {
    let (rows, cols) = shape;
    let size = tile_size.max(1);
    let mut tiles = Vec::with_capacity(rows.div_ceil(size) * cols.div_ceil(size));
    for row_offset in (0..rows).step_by(size) {
        for col_offset in (0..cols).step_by(size) {
            tiles.push(Tile {
                row_offset,
                col_offset,
                rows: size.min(rows - row_offset),
                cols: size.min(cols - col_offset),
            });
        }
    }
    tiles
}

/// Evaluate `f` on every tile; results come back in tile order
pub fn map_tiles<T, F>(tiles: &[Tile], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Tile) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        tiles.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        tiles.iter().map(f).collect()
    }
}

/// Build a band pixel by pixel, tile-parallel.
///
/// `init` creates per-tile scratch state (e.g. a reusable value buffer)
/// handed to `f` together with the absolute (row, col) of each pixel.
pub fn render<S, I, F>(shape: (usize, usize), tile_size: usize, init: I, f: F) -> SarRealImage
where
    I: Fn() -> S + Sync + Send,
    F: Fn(&mut S, usize, usize) -> SarReal + Sync + Send,
{
    let tiles = tile_grid(shape, tile_size);
    let blocks = map_tiles(&tiles, |tile| {
        let mut scratch = init();
        Array2::from_shape_fn((tile.rows, tile.cols), |(r, c)| {
            f(&mut scratch, tile.row_offset + r, tile.col_offset + c)
        })
    });

    let mut output = Array2::from_elem(shape, NO_DATA);
    for (tile, block) in tiles.iter().zip(blocks) {
        output.slice_mut(s![tile.row_range(), tile.col_range()]).assign(&block);
    }
    output
}

/// Element-wise map of one band
pub fn map_pixels<F>(band: &SarRealImage, f: F) -> SarRealImage
where
    F: Fn(SarReal) -> SarReal + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(band).par_map_collect(|&v| f(v))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(band).map_collect(|&v| f(v))
    }
}

/// Element-wise combination of two equally shaped bands
pub fn zip_pixels<F>(a: &SarRealImage, b: &SarRealImage, f: F) -> SarRealImage
where
    F: Fn(SarReal, SarReal) -> SarReal + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(a).and(b).par_map_collect(|&x, &y| f(x, y))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(a).and(b).map_collect(|&x, &y| f(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_cover_grid_once() {
        let tiles = tile_grid((5, 7), 3);
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles.iter().map(Tile::pixel_count).sum::<usize>(), 35);
        assert_eq!(tiles[5], Tile { row_offset: 3, col_offset: 6, rows: 2, cols: 1 });
    }

    #[test]
    fn test_render_matches_direct_evaluation() {
        let rendered = render((9, 13), 4, || 0usize, |calls, r, c| {
            *calls += 1;
            (r * 100 + c) as f32
        });
        for ((r, c), v) in rendered.indexed_iter() {
            assert_eq!(*v, (r * 100 + c) as f32);
        }
    }

    #[test]
    fn test_zip_pixels() {
        let a = Array2::from_elem((2, 2), 3.0f32);
        let b = Array2::from_elem((2, 2), 1.0f32);
        let diff = zip_pixels(&a, &b, |x, y| x - y);
        assert!(diff.iter().all(|&v| v == 2.0));
        let halved = map_pixels(&diff, |v| v / 2.0);
        assert!(halved.iter().all(|&v| v == 1.0));
    }
}
