//! Error types for the CIF wavelet/rANS codec.
//!
//! Three categories, matching the three places a CIF stream can go wrong:
//! failing to open the underlying byte source, a header that doesn't look like a
//! CIF file, and a block body whose bits don't decode into a consistent pyramid.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding a CIF stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying byte source could not be opened or read.
    #[error("failed to open CIF stream: {0}")]
    Open(#[from] std::io::Error),

    /// The stream does not begin with a valid CIF header.
    #[error("bad CIF header: {reason}")]
    Format {
        /// What was wrong with the header.
        reason: String,
    },

    /// A block's body did not decode to a consistent state.
    #[error("corrupt block at tile ({bx}, {by}): {reason}")]
    CorruptBlock {
        /// Tile column.
        bx: u32,
        /// Tile row.
        by: u32,
        /// What went wrong.
        reason: String,
    },

    /// Geometry error from [`cif_core`].
    #[error(transparent)]
    Geometry(#[from] cif_core::Error),
}

impl Error {
    /// Creates an [`Error::Format`] error for a bad magic number.
    #[inline]
    pub fn bad_magic(found: u16) -> Self {
        Self::Format { reason: format!("bad magic 0x{found:04X}, expected 0xFEDF") }
    }

    /// Creates an [`Error::Format`] error for an unsupported version.
    #[inline]
    pub fn unsupported_version(found: u16) -> Self {
        Self::Format { reason: format!("unsupported version 0x{found:04X}, expected 0x0003") }
    }

    /// Creates an [`Error::CorruptBlock`] error.
    #[inline]
    pub fn corrupt_block(bx: u32, by: u32, reason: impl Into<String>) -> Self {
        Self::CorruptBlock { bx, by, reason: reason.into() }
    }

    /// Returns `true` if this is a header/format error.
    #[inline]
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// Returns `true` if this is a corrupt-block error.
    #[inline]
    pub fn is_corrupt_block(&self) -> bool {
        matches!(self, Self::CorruptBlock { .. })
    }

    /// Fills in the owning tile's coordinates on a [`Error::CorruptBlock`].
    ///
    /// The wavelet pyramid itself has no notion of which tile it belongs to —
    /// it's reused identically for every tile in the image — so errors it
    /// raises are created with placeholder `(0, 0)` coordinates and patched
    /// here once the image, which does know, is back in the call stack.
    #[inline]
    pub fn with_tile_coords(self, bx: u32, by: u32) -> Self {
        match self {
            Self::CorruptBlock { reason, .. } => Self::CorruptBlock { bx, by, reason },
            other => other,
        }
    }
}
