//! Lazy, top-down reconstruction of a tile's wavelet pyramid.
//!
//! Unlike the encode side, decode only ever materializes as many layers as a
//! caller has actually asked for — `decode_to_level` is the lazy-decode protocol
//! described for tile bodies: the pyramid starts out as nothing but the root
//! parent values, and each call descends one or more levels, consuming exactly
//! as many residual symbols as the next layer needs.

use cif_core::LevelSize;
use smallvec::SmallVec;

use super::predictor::{
    predict_bottom_left, predict_diag, predict_top_right, wrapping_reconstruct,
};
use crate::error::{Error, Result};

/// A lazily-materialized wavelet pyramid for one tile, decoding top-down.
#[derive(Debug, Clone)]
pub struct DecodePyramid {
    /// Layer sizes from leaf (index 0) to the topmost decomposed layer (last
    /// index) — the same chain the encoder built, recomputed from the tile's
    /// leaf dimensions alone.
    chain: Vec<LevelSize>,
    /// The root's parent grid (1-4 pixels), taken from the block header.
    root_parent_vals: SmallVec<[u16; 4]>,
    /// The lowest level currently materialized, or `top_lod()` if nothing has
    /// been decoded yet.
    current_level: u32,
    /// Pixels of `current_level`, or empty when `current_level == top_lod()`.
    current_pixels: Vec<u16>,
}

impl DecodePyramid {
    /// Starts a new lazy pyramid for a tile of the given leaf dimensions, with
    /// its root parent values already known from the block header.
    pub fn new(width: u32, height: u32, root_parent_vals: SmallVec<[u16; 4]>) -> Self {
        let chain = LevelSize::new(width, height).chain_to_root();
        let top_lod = chain.len() as u32;
        Self { chain, root_parent_vals, current_level: top_lod, current_pixels: Vec::new() }
    }

    /// The "parent-vals-only" level: one more than the topmost decomposed layer.
    /// No rANS activity is needed to answer a query at this level.
    #[inline]
    pub fn top_lod(&self) -> u32 {
        self.chain.len() as u32
    }

    /// The leaf (tile-resolution) level, always `0`.
    #[inline]
    pub fn leaf_level(&self) -> u32 {
        0
    }

    /// The lowest level currently materialized (`top_lod()` if nothing decoded
    /// yet).
    #[inline]
    pub fn current_level(&self) -> u32 {
        self.current_level
    }

    /// The root parent values (1-4 pixels), available without any decoding.
    #[inline]
    pub fn root_parent_vals(&self) -> &[u16] {
        &self.root_parent_vals
    }

    /// The root parent grid's dimensions (each axis 1 or 2 pixels).
    #[inline]
    pub fn root_size(&self) -> (u32, u32) {
        let top = self.chain[self.chain.len() - 1];
        (top.parent_width(), top.parent_height())
    }

    /// Shifts a tile-local leaf coordinate upward while both low bits stay
    /// zero, stopping at `top_lod()` (the coordinate maps onto the root
    /// parent grid) or at the coarsest level where it's still an exact pixel
    /// position. Every level's "parent" entry is a literal copy of a finer
    /// level's pixel, so the value at `(x, y)` equals the value at the
    /// returned level's `(x >> level, y >> level)` — no decoding below that
    /// level is ever required to answer this query.
    pub fn locate_coarsest(&self, x: u32, y: u32) -> u32 {
        let mut level = 0u32;
        let mut cx = x;
        let mut cy = y;
        while level < self.top_lod() && cx % 2 == 0 && cy % 2 == 0 {
            cx /= 2;
            cy /= 2;
            level += 1;
        }
        level
    }

    /// Decodes layers until `current_level() <= target`, pulling exactly as many
    /// residual symbols as each newly-materialized layer needs from `pull`.
    /// `pull(n)` must return exactly `n` symbols or an error.
    pub fn decode_to_level(
        &mut self,
        target: u32,
        mut pull: impl FnMut(usize) -> Result<Vec<u16>>,
    ) -> Result<()> {
        while self.current_level > target {
            let new_level = self.current_level - 1;
            let new_size = self.chain[new_level as usize];
            let wavelet_count = new_size.wavelet_count();

            let residuals = pull(wavelet_count)?;
            if residuals.len() != wavelet_count {
                return Err(Error::corrupt_block(
                    0,
                    0,
                    format!(
                        "expected {wavelet_count} wavelets at level {new_level}, got {}",
                        residuals.len()
                    ),
                ));
            }

            let parent: &[u16] = if self.current_level == self.top_lod() {
                &self.root_parent_vals
            } else {
                &self.current_pixels
            };

            self.current_pixels = reconstruct(parent, new_size, &residuals);
            self.current_level = new_level;
        }
        Ok(())
    }

    /// Reads a single pixel from the currently-materialized level. The caller is
    /// responsible for having decoded down to (at least) the level that owns
    /// `(x, y)` at this resolution — see `crate::block` for the coordinate
    /// shifting that determines which level that is.
    pub fn pixel_at(&self, x: u32, y: u32) -> u16 {
        let size = self.chain[self.current_level as usize];
        self.current_pixels[(y * size.width + x) as usize]
    }

    /// The full pixel grid of the currently-materialized level.
    pub fn current_pixels(&self) -> &[u16] {
        &self.current_pixels
    }
}

/// Reconstructs one layer's pixel grid from its parent grid and its residuals
/// (in the same row-major, cell-major emission order the encoder used).
fn reconstruct(parent: &[u16], size: LevelSize, residuals: &[u16]) -> Vec<u16> {
    let (w, h) = (size.width, size.height);
    let parent_w = size.parent_width();
    let parent_h = size.parent_height();

    let mut out = vec![0u16; (w as usize) * (h as usize)];
    let mut diag_grid: Vec<Option<u16>> = vec![None; (parent_w as usize) * (parent_h as usize)];
    let mut idx = 0usize;

    for py in 0..parent_h {
        for px in 0..parent_w {
            let cell_idx = (py * parent_w + px) as usize;
            let (sx, sy) = (2 * px, 2 * py);
            let tl = parent[cell_idx];
            out[(sy * w + sx) as usize] = tl;

            let right = super::predictor::has_right(px, w);
            let bottom = super::predictor::has_bottom(py, h);

            let own_diag = if right && bottom {
                let prediction = predict_diag(parent, parent_w, parent_h, px, py);
                let value = wrapping_reconstruct(prediction, residuals[idx]);
                idx += 1;
                out[((sy + 1) * w + sx + 1) as usize] = value;
                Some(value)
            } else {
                None
            };
            diag_grid[cell_idx] = own_diag;

            if right {
                let diag_above = if py > 0 { diag_grid[cell_idx - parent_w as usize] } else { None };
                let prediction = predict_top_right(parent, parent_w, px, py, diag_above, own_diag);
                let value = wrapping_reconstruct(prediction, residuals[idx]);
                idx += 1;
                out[(sy * w + sx + 1) as usize] = value;
            }

            if bottom {
                let diag_left = if px > 0 { diag_grid[cell_idx - 1] } else { None };
                let prediction =
                    predict_bottom_left(parent, parent_w, parent_h, px, py, diag_left, own_diag);
                let value = wrapping_reconstruct(prediction, residuals[idx]);
                idx += 1;
                out[((sy + 1) * w + sx) as usize] = value;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavelet::encode::EncodePyramid;

    fn roundtrip(pixels: &[u16], width: u32, height: u32) {
        let pyramid = EncodePyramid::build(pixels, width, height);
        // Top-layer-first, exactly the order a full rANS round-trip delivers
        // after the double reversal described in `crate::rans` — see that
        // module's tests for the reversal itself exercised end-to-end.
        let mut wavelets = pyramid.wavelet_values().into_iter();

        let mut decoder = DecodePyramid::new(width, height, pyramid.root_parent_vals.clone());
        decoder
            .decode_to_level(0, |n| Ok((&mut wavelets).take(n).collect()))
            .unwrap();

        assert_eq!(decoder.current_pixels(), pixels);
    }

    #[test]
    fn roundtrips_small_even_grid() {
        let pixels: Vec<u16> = (0..16).collect();
        roundtrip(&pixels, 4, 4);
    }

    #[test]
    fn roundtrips_odd_grid() {
        let pixels: Vec<u16> = (0..9).collect();
        roundtrip(&pixels, 3, 3);
    }

    #[test]
    fn roundtrips_single_cell() {
        let pixels = [1u16, 2, 3, 4];
        roundtrip(&pixels, 2, 2);
    }

    #[test]
    fn roundtrips_wraparound_values() {
        let pixels = [0xFFFFu16, 0x0000, 0x1234, 0xBEEF];
        roundtrip(&pixels, 2, 2);
    }

    #[test]
    fn locate_coarsest_lands_on_root_for_fully_even_coordinates() {
        let decoder = DecodePyramid::new(16, 16, SmallVec::from_vec(vec![0]));
        assert_eq!(decoder.locate_coarsest(0, 0), decoder.top_lod());
        // 16 = 2^4, and top_lod for a 16x16 tile is 4 (16 -> 8 -> 4 -> 2 -> root
        // 1x1); a coordinate evenly divisible by more than that just stops at
        // top_lod rather than overshooting it.
        assert_eq!(decoder.locate_coarsest(32, 32), decoder.top_lod());
    }

    #[test]
    fn locate_coarsest_stops_at_the_first_odd_bit() {
        let decoder = DecodePyramid::new(16, 16, SmallVec::from_vec(vec![0]));
        // x=2 is divisible by 2 but not 4, so it stops one level up.
        assert_eq!(decoder.locate_coarsest(2, 0), 1);
        // an odd coordinate can't shift at all.
        assert_eq!(decoder.locate_coarsest(1, 0), 0);
    }
}
