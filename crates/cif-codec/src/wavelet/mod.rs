//! Hierarchical wavelet pyramid: a lossless, bilinear-predicted decomposition of a
//! 16-bit pixel grid into a small root value plus layered residuals.
//!
//! See [`predictor`] for the prediction rule, [`encode`] for bottom-up pyramid
//! construction, and [`decode`] for lazy top-down reconstruction.

pub mod decode;
pub mod encode;
pub mod predictor;

pub use cif_core::LevelSize;
pub use decode::DecodePyramid;
pub use encode::{EncodeLayer, EncodePyramid};
