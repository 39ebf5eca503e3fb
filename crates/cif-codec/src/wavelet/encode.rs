//! Bottom-up construction of a tile's wavelet pyramid.
//!
//! [`EncodePyramid::build`] eagerly decomposes a pixel grid all the way to its
//! root, mirroring the original encoder's recursive "build my parent, then
//! recurse" structure but as a flat bottom-up sweep driven by
//! [`cif_core::LevelSize::chain_to_root`] rather than a parent-owning linked list —
//! the encode side never needs lazy decode, so there is nothing a linked
//! structure would buy here that a `Vec` doesn't already give more simply.

use cif_core::LevelSize;
use smallvec::SmallVec;

use super::predictor::{
    predict_bottom_left, predict_diag, predict_top_right, wrapping_residual,
};

/// One materialized layer of the encode-side pyramid: its size and the residuals
/// it contributed (row-major cell order, diag/top-right/bottom-left per cell,
/// skipping positions absent due to odd dimensions).
#[derive(Debug, Clone)]
pub struct EncodeLayer {
    /// This layer's dimensions.
    pub size: LevelSize,
    /// This layer's residuals, in emission order.
    pub wavelets: Vec<u16>,
}

/// A fully-built encode-side wavelet pyramid for one tile.
#[derive(Debug, Clone)]
pub struct EncodePyramid {
    /// Layers from leaf (index 0) to the topmost decomposed layer (last index).
    pub layers: Vec<EncodeLayer>,
    /// The terminal parent grid above the topmost layer (1-4 pixels).
    pub root_parent_vals: SmallVec<[u16; 4]>,
}

impl EncodePyramid {
    /// Decomposes a `width x height` pixel grid into a full wavelet pyramid.
    pub fn build(pixels: &[u16], width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize));

        let chain = LevelSize::new(width, height).chain_to_root();
        let mut layers = Vec::with_capacity(chain.len());
        let mut current = pixels.to_vec();

        for &size in &chain {
            let (parent, wavelets) = decompose(&current, size);
            layers.push(EncodeLayer { size, wavelets });
            current = parent;
        }

        EncodePyramid { layers, root_parent_vals: SmallVec::from_vec(current) }
    }

    /// All residuals across every layer, concatenated **top layer first** — the
    /// order the rANS decoder must see them in after stream reversal (see
    /// `crate::rans`).
    pub fn wavelet_values(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(self.layers.iter().map(|l| l.wavelets.len()).sum());
        for layer in self.layers.iter().rev() {
            out.extend_from_slice(&layer.wavelets);
        }
        out
    }
}

/// Decomposes one layer: extracts the (unchanged) parent grid and computes this
/// layer's residuals via the bilinear predictor, sweeping cells row-major,
/// left-to-right, top-to-bottom so that the diagonal computed for a cell is
/// always available to the top-right/bottom-left predictions of later cells in
/// the same sweep.
fn decompose(source: &[u16], size: LevelSize) -> (Vec<u16>, Vec<u16>) {
    let (w, h) = (size.width, size.height);
    let parent_w = size.parent_width();
    let parent_h = size.parent_height();

    let mut parent = vec![0u16; (parent_w as usize) * (parent_h as usize)];
    let mut diag_grid: Vec<Option<u16>> = vec![None; (parent_w as usize) * (parent_h as usize)];
    let mut wavelets = Vec::with_capacity(size.wavelet_count());

    for py in 0..parent_h {
        for px in 0..parent_w {
            let cell_idx = (py * parent_w + px) as usize;
            let (sx, sy) = (2 * px, 2 * py);

            // top-left: copied unchanged into the parent grid
            let tl = source[(sy * w + sx) as usize];
            parent[cell_idx] = tl;

            let right = super::predictor::has_right(px, w);
            let bottom = super::predictor::has_bottom(py, h);

            // diagonal (bottom-right): predicted from the parent grid alone
            let own_diag = if right && bottom {
                let actual = source[((sy + 1) * w + sx + 1) as usize];
                let prediction = predict_diag(&parent, parent_w, parent_h, px, py);
                wavelets.push(wrapping_residual(actual, prediction));
                Some(actual)
            } else {
                None
            };
            diag_grid[cell_idx] = own_diag;

            // top-right
            if right {
                let actual = source[(sy * w + sx + 1) as usize];
                let diag_above = if py > 0 { diag_grid[cell_idx - parent_w as usize] } else { None };
                let prediction = predict_top_right(&parent, parent_w, px, py, diag_above, own_diag);
                wavelets.push(wrapping_residual(actual, prediction));
            }

            // bottom-left
            if bottom {
                let actual = source[((sy + 1) * w + sx) as usize];
                let diag_left = if px > 0 { diag_grid[cell_idx - 1] } else { None };
                let prediction =
                    predict_bottom_left(&parent, parent_w, parent_h, px, py, diag_left, own_diag);
                wavelets.push(wrapping_residual(actual, prediction));
            }
        }
    }

    (parent, wavelets)
}
