//! The bilinear predictor used by every wavelet-pyramid layer.
//!
//! A layer's 2x2 cells each contribute one parent pixel (the cell's top-left,
//! copied unchanged) and up to three residuals: diagonal, top-right, bottom-left.
//! Every prediction here is an unsigned-accumulator average with "+count/2"
//! rounding, narrowed to 16 bits, and every residual/reconstruction step wraps
//! modulo 2^16. This is the one place that rounding and wraparound must match
//! bit-for-bit between encode and decode — see the module-level notes in
//! `wavelet::encode` and `wavelet::decode` for how the two sides stay in lockstep.

/// Averages up to four `u16` values with "+count/2" rounding, narrowed to 16 bits.
///
/// The sum is accumulated in `u32` (four `u16` values can never overflow it), the
/// rounding bias is added before the integer divide, and the result is truncated
/// back to `u16` — matching the "narrowed to 16 bits" requirement exactly, not
/// just on the happy path.
#[inline]
pub fn avg_round(values: &[u16]) -> u16 {
    debug_assert!(!values.is_empty() && values.len() <= 4);
    let count = values.len() as u32;
    let sum: u32 = values.iter().map(|&v| v as u32).sum::<u32>() + count / 2;
    (sum / count) as u16
}

/// `a - b`, wrapping modulo 2^16.
#[inline]
pub fn wrapping_residual(source: u16, prediction: u16) -> u16 {
    source.wrapping_sub(prediction)
}

/// `prediction + residual`, wrapping modulo 2^16.
#[inline]
pub fn wrapping_reconstruct(prediction: u16, residual: u16) -> u16 {
    prediction.wrapping_add(residual)
}

/// Whether column `px` (0-based cell index) has a right-hand pixel within a layer
/// of width `w`: `2*px + 1 < w`.
#[inline]
pub const fn has_right(px: u32, w: u32) -> bool {
    2 * px + 1 < w
}

/// Whether row `py` (0-based cell index) has a bottom pixel within a layer of
/// height `h`: `2*py + 1 < h`.
#[inline]
pub const fn has_bottom(py: u32, h: u32) -> bool {
    2 * py + 1 < h
}

/// Predicts the diagonal (bottom-right) position of cell `(px, py)` from the
/// parent grid alone: the "×" of up to four parent-grid neighbours.
///
/// `right`/`bottom` here mean "does the *parent* grid have a column/row past
/// `px`/`py`" (`px + 1 < parent_w`, `py + 1 < parent_h`) — not whether this
/// cell's own residual exists at the child layer's resolution. The two
/// coincide only when the child dimension is odd; for an even child
/// dimension the last parent column/row has no further parent neighbour even
/// though the cell itself still has a child-layer right/bottom pixel.
pub fn predict_diag(parent: &[u16], parent_w: u32, parent_h: u32, px: u32, py: u32) -> u16 {
    let mut neighbours = [0u16; 4];
    let mut n = 0;
    neighbours[n] = parent[(py * parent_w + px) as usize];
    n += 1;
    let right = px + 1 < parent_w;
    let bottom = py + 1 < parent_h;
    if right {
        neighbours[n] = parent[(py * parent_w + px + 1) as usize];
        n += 1;
    }
    if bottom {
        neighbours[n] = parent[((py + 1) * parent_w + px) as usize];
        n += 1;
    }
    if right && bottom {
        neighbours[n] = parent[((py + 1) * parent_w + px + 1) as usize];
        n += 1;
    }
    avg_round(&neighbours[..n])
}

/// Predicts the top-right position of cell `(px, py)`: the "+" of the cell's
/// parent, the right parent (if present), the already-decoded diagonal
/// immediately above (only when `py > 0` — row 0 has no above-neighbour, see the
/// design notes on this quirk), and this cell's own diagonal.
///
/// `diag_above` and `own_diag` are `None` exactly when the corresponding diagonal
/// position doesn't exist at this layer's dimensions.
///
/// The "right parent" read is gated on `px + 1 < parent_w` (the parent grid
/// actually having a further column), not on the child layer's own width —
/// see the note on [`predict_diag`].
pub fn predict_top_right(
    parent: &[u16],
    parent_w: u32,
    px: u32,
    py: u32,
    diag_above: Option<u16>,
    own_diag: Option<u16>,
) -> u16 {
    let mut neighbours = [0u16; 4];
    let mut n = 0;
    neighbours[n] = parent[(py * parent_w + px) as usize];
    n += 1;
    if px + 1 < parent_w {
        neighbours[n] = parent[(py * parent_w + px + 1) as usize];
        n += 1;
    }
    if py > 0 {
        if let Some(v) = diag_above {
            neighbours[n] = v;
            n += 1;
        }
    }
    if let Some(v) = own_diag {
        neighbours[n] = v;
        n += 1;
    }
    avg_round(&neighbours[..n])
}

/// Predicts the bottom-left position of cell `(px, py)`: symmetric to
/// [`predict_top_right`] — the cell's parent, the bottom parent (if present), the
/// previous column's diagonal (only when `px > 0`), and this cell's own diagonal.
///
/// The "bottom parent" read is gated on `py + 1 < parent_h` (the parent grid
/// actually having a further row), not on the child layer's own height — see
/// the note on [`predict_diag`].
pub fn predict_bottom_left(
    parent: &[u16],
    parent_w: u32,
    parent_h: u32,
    px: u32,
    py: u32,
    diag_left: Option<u16>,
    own_diag: Option<u16>,
) -> u16 {
    let mut neighbours = [0u16; 4];
    let mut n = 0;
    neighbours[n] = parent[(py * parent_w + px) as usize];
    n += 1;
    if py + 1 < parent_h {
        neighbours[n] = parent[((py + 1) * parent_w + px) as usize];
        n += 1;
    }
    if px > 0 {
        if let Some(v) = diag_left {
            neighbours[n] = v;
            n += 1;
        }
    }
    if let Some(v) = own_diag {
        neighbours[n] = v;
        n += 1;
    }
    avg_round(&neighbours[..n])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_round_single_value_is_identity() {
        assert_eq!(avg_round(&[42]), 42);
    }

    #[test]
    fn avg_round_biases_toward_nearest() {
        // (1 + 2 + 1/2) / 2 = 1 (integer divide of 3/2)
        assert_eq!(avg_round(&[1, 2]), 1);
        // (1 + 2 + 3 + 4 + 4/2) / 4 = 12/4 = 3
        assert_eq!(avg_round(&[1, 2, 3, 4]), 3);
    }

    #[test]
    fn residual_roundtrips_through_wraparound() {
        let source = 5u16;
        let prediction = 60_000u16;
        let residual = wrapping_residual(source, prediction);
        assert_eq!(wrapping_reconstruct(prediction, residual), source);
    }

    #[test]
    fn has_right_and_bottom_respect_odd_dimensions() {
        assert!(has_right(0, 4));
        assert!(!has_right(1, 3));
        assert!(has_bottom(0, 4));
        assert!(!has_bottom(1, 3));
    }
}
