//! One tile: its wavelet pyramid and the rANS-encoded residual stream that
//! reconstructs it, decoded lazily one level at a time against a table
//! shared by every tile in the image.

use smallvec::SmallVec;

use crate::error::Result;
use crate::io::{read_block_run, write_block_run, ReverseBlockStream};
use crate::rans::{CdfTable, RansDecoder, RansEncoder};
use crate::wavelet::{DecodePyramid, EncodePyramid};

/// A freshly-encoded tile, ready to be placed in a container once its byte
/// offset within the body section is known.
pub struct EncodedTile {
    /// The root `parentVals[]` (1-4 pixels), stored in the header rather
    /// than the rANS stream.
    pub parent_vals: SmallVec<[u16; 4]>,
    /// The rANS state after folding in every residual, also stored in the
    /// header so decoding can resume from it without a forward scan.
    pub final_rans_state: u64,
    /// The serialized, length-prefixed renormalization block run — this
    /// tile's body.
    pub body: Vec<u8>,
}

/// Encodes one tile's pixel grid against a shared symbol table.
///
/// `table` is almost always the image's single global table, built once over
/// every tile's residuals — see `crate::image` for why a per-tile table
/// would defeat the point of amortizing the table's own storage cost.
pub fn encode_tile(pixels: &[u16], width: u32, height: u32, table: &CdfTable) -> Result<EncodedTile> {
    let pyramid = EncodePyramid::build(pixels, width, height);
    encode_pyramid(&pyramid, table)
}

/// Encodes an already-built pyramid against `table`. Split out from
/// [`encode_tile`] so an image encode that needs every tile's pyramid up
/// front (to build the shared table from their combined residuals) doesn't
/// have to decompose each tile's pixels twice.
pub fn encode_pyramid(pyramid: &EncodePyramid, table: &CdfTable) -> Result<EncodedTile> {
    let wavelets = pyramid.wavelet_values();

    let mut encoder = RansEncoder::new();
    // rANS is a stack: add symbols in the reverse of read order so the
    // decoder sees them top-layer first, matching `wavelet_values()`.
    for &value in wavelets.iter().rev() {
        encoder.add_symbol(table, value);
    }
    let (final_rans_state, stream) = encoder.finish();

    let mut body = Vec::new();
    write_block_run(&mut body, &stream.into_blocks())?;

    Ok(EncodedTile {
        parent_vals: pyramid.root_parent_vals.clone(),
        final_rans_state,
        body,
    })
}

/// One tile, open for lazy, level-by-level decoding against a shared table.
///
/// Doesn't hold its own reference to the table: every method that needs it
/// takes it as a parameter, so an image can keep one table and many tiles
/// alive at once without a self-referential borrow — see the design
/// ledger's "Rc not Arc" note.
pub struct Tile {
    pyramid: DecodePyramid,
    decoder: RansDecoder,
}

impl Tile {
    /// Opens a tile directly from an already-parsed run of renormalization
    /// blocks (e.g. read straight off a seekable stream, with no intervening
    /// byte buffer — see `crate::image`'s streaming open).
    pub fn from_blocks(
        width: u32,
        height: u32,
        parent_vals: SmallVec<[u16; 4]>,
        final_rans_state: u64,
        blocks: Vec<u16>,
    ) -> Self {
        let stream = ReverseBlockStream::from_blocks(blocks);
        let decoder = RansDecoder::new(final_rans_state, stream);
        let pyramid = DecodePyramid::new(width, height, parent_vals);
        Self { pyramid, decoder }
    }

    /// Opens a tile from its header fields and an in-memory body buffer.
    /// Reads only the body's block-run length prefix and materializes its
    /// renormalization blocks — no wavelet decoding happens until
    /// [`Tile::decode_to_level`] is called.
    pub fn open(
        width: u32,
        height: u32,
        parent_vals: SmallVec<[u16; 4]>,
        final_rans_state: u64,
        body: &[u8],
    ) -> Result<Self> {
        let mut cursor = body;
        let blocks = read_block_run(&mut cursor)?;
        Ok(Self::from_blocks(width, height, parent_vals, final_rans_state, blocks))
    }

    /// Decodes layers, pulling symbols from the rANS stream against `table`,
    /// until `current_level() <= level`. A no-op if already decoded that far.
    pub fn decode_to_level(&mut self, table: &CdfTable, level: u32) -> Result<()> {
        let decoder = &mut self.decoder;
        self.pyramid
            .decode_to_level(level, |n| Ok((0..n).map(|_| decoder.read_symbol(table)).collect()))
    }

    /// The lowest level currently materialized.
    #[inline]
    pub fn current_level(&self) -> u32 {
        self.pyramid.current_level()
    }

    /// The "parent-vals-only" level — no decoding needed to read this level.
    #[inline]
    pub fn top_lod(&self) -> u32 {
        self.pyramid.top_lod()
    }

    /// The root parent values (available without any decoding).
    #[inline]
    pub fn root_parent_vals(&self) -> &[u16] {
        self.pyramid.root_parent_vals()
    }

    /// Reads a single pixel from the currently-materialized level.
    #[inline]
    pub fn pixel_at(&self, x: u32, y: u32) -> u16 {
        self.pyramid.pixel_at(x, y)
    }

    /// Reads tile-local pixel `(x, y)` at leaf resolution, decoding no more
    /// of the pyramid than is needed to answer it.
    ///
    /// Shifts `(x, y)` upward while it's still an exact pixel position at a
    /// coarser level (see [`DecodePyramid::locate_coarsest`]); if that lands
    /// on the root, the value comes straight from `root_parent_vals()` with
    /// no rANS activity. Otherwise it decodes down to (but not past) whatever
    /// is already materialized, so repeated reads at the same or coarser
    /// positions never re-pay for decode work already done.
    pub fn get_pixel(&mut self, table: &CdfTable, x: u32, y: u32) -> Result<u16> {
        let shiftable = self.pyramid.locate_coarsest(x, y);
        let level = shiftable.min(self.pyramid.current_level());

        if level == self.pyramid.top_lod() {
            let (root_w, _) = self.pyramid.root_size();
            let cx = x >> level;
            let cy = y >> level;
            return Ok(self.pyramid.root_parent_vals()[(cy * root_w + cx) as usize]);
        }

        self.decode_to_level(table, level)?;
        Ok(self.pyramid.pixel_at(x >> level, y >> level))
    }

    /// The full pixel grid of the currently-materialized level.
    #[inline]
    pub fn current_pixels(&self) -> &[u16] {
        self.pyramid.current_pixels()
    }

    /// Decodes all the way to the leaf level and returns its pixels.
    pub fn bottom_level_pixels(&mut self, table: &CdfTable) -> Result<&[u16]> {
        self.decode_to_level(table, self.pyramid.leaf_level())?;
        Ok(self.pyramid.current_pixels())
    }

    /// An approximate resident memory footprint, used for cache accounting
    /// by `crate::image`: the decoded pixel buffer plus a fixed overhead for
    /// the decoder's own state.
    pub fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.pyramid.current_pixels().len() * std::mem::size_of::<u16>()
    }
}
