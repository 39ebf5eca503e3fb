//! # cif-codec
//!
//! A codec for very large 16-bit single-channel heightmaps: a hierarchical
//! wavelet pyramid with bilinear prediction ([`wavelet`]), a grouped,
//! quantized rANS entropy coder ([`rans`]), and a block-partitioned tiled
//! container ([`image`]) that supports O(1) streamed random access at any
//! level of detail.
//!
//! Most callers only need [`image::encode`] and [`image::Image`]; the other
//! modules are exposed for tooling that wants to inspect a table or a
//! single tile's pyramid directly.

#![warn(missing_docs)]

pub mod block;
pub mod error;
pub mod image;
pub mod io;
pub mod rans;
pub mod wavelet;

pub use block::{EncodedTile, Tile};
pub use error::{Error, Result};
pub use image::{encode, Image};
pub use rans::{CdfTable, RansDecoder, RansEncoder};
pub use wavelet::{DecodePyramid, EncodePyramid};
