//! A grouped, quantized rANS entropy codec.
//!
//! [`table`] builds and serializes the two-level symbol table (fast-path groups,
//! slow-path groups with a uniform sub-index, and a raw-escape band). [`state`]
//! implements the 64-bit rANS encode/decode state machine that uses it.

pub mod state;
pub mod table;

pub use state::{RansDecoder, RansEncoder};
pub use table::CdfTable;

/// Probability resolution in bits: the probability range is `2^PROB_RES`.
pub const PROB_RES: u32 = 16;

/// The probability range `M = 2^PROB_RES`.
pub const PROBABILITY_RANGE: u32 = 1 << PROB_RES;

/// Width, in bits, of one rANS renormalization block in the compressed stream.
pub const BLOCK_BITS: u32 = 16;
