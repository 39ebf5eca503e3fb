//! The CIF container: tiling, the parent-values image, serialization, and a
//! lazily-populated tile cache for random-access reads.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use cif_core::{LevelSize, TileGrid};
use smallvec::SmallVec;

use crate::block::{encode_pyramid, Tile};
use crate::error::{Error, Result};
use crate::io::{read_block_run, read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::rans::CdfTable;
use crate::wavelet::EncodePyramid;

const MAGIC: u16 = 0xFEDF;
const VERSION: u16 = 0x0003;
/// Fixed byte size of the file header (magic, version, width, height,
/// blockSize, blockBodyStart).
const HEADER_SIZE: usize = 2 + 2 + 4 + 4 + 4 + 8;

struct FileHeader {
    width: u32,
    height: u32,
    block_size: u32,
    block_body_start: u64,
}

fn read_header(r: &mut impl Read) -> Result<FileHeader> {
    let magic = read_u16(r)?;
    if magic != MAGIC {
        return Err(Error::bad_magic(magic));
    }
    let version = read_u16(r)?;
    if version != VERSION {
        return Err(Error::unsupported_version(version));
    }
    let width = read_u32(r)?;
    let height = read_u32(r)?;
    let block_size = read_u32(r)?;
    let block_body_start = read_u64(r)?;
    Ok(FileHeader { width, height, block_size, block_body_start })
}

fn write_header(w: &mut impl Write, header: &FileHeader) -> Result<()> {
    write_u16(w, MAGIC)?;
    write_u16(w, VERSION)?;
    write_u32(w, header.width)?;
    write_u32(w, header.height)?;
    write_u32(w, header.block_size)?;
    write_u64(w, header.block_body_start)?;
    Ok(())
}

/// An ordinary tile's on-disk header: a body-relative byte offset and the
/// rANS state to resume decoding from. Root parent values are not stored
/// here — they're reconstructed from the decoded parent-values image.
struct TileHeader {
    block_pos: u32,
    final_rans_state: u64,
}

/// Encodes a full pixel grid into a complete CIF byte stream.
///
/// Builds every tile's wavelet pyramid first, derives one shared symbol
/// table from their combined residuals, then encodes each tile body against
/// that table — mirroring the original encoder's "generate blocks, then
/// generate the symbol table from their wavelets, then write bodies" order.
#[tracing::instrument(skip(pixels), fields(width, height, block_size))]
pub fn encode(pixels: &[u16], width: u32, height: u32, block_size: u32) -> Result<Vec<u8>> {
    let grid = TileGrid::new(width, height, block_size);
    let tiles_x = grid.width_in_blocks();
    let tiles_y = grid.height_in_blocks();

    let mut pyramids = Vec::with_capacity(grid.tile_count() as usize);
    for by in 0..tiles_y {
        for bx in 0..tiles_x {
            let rect = grid.tile_rect(bx, by);
            let mut tile_pixels = vec![0u16; (rect.width * rect.height) as usize];
            for y in 0..rect.height {
                for x in 0..rect.width {
                    tile_pixels[(y * rect.width + x) as usize] =
                        pixels[((rect.y + y) * width + (rect.x + x)) as usize];
                }
            }
            pyramids.push(EncodePyramid::build(&tile_pixels, rect.width, rect.height));
        }
    }

    let mut histogram: HashMap<u16, u64> = HashMap::new();
    for pyramid in &pyramids {
        for value in pyramid.wavelet_values() {
            *histogram.entry(value).or_insert(0) += 1;
        }
    }
    let global_table = CdfTable::build(&histogram);

    let mut encoded_tiles = Vec::with_capacity(pyramids.len());
    for pyramid in &pyramids {
        encoded_tiles.push(encode_pyramid(pyramid, &global_table)?);
    }

    // De-swizzle every tile's root parent values into the parent-values
    // image: tile (bx, by)'s root grid lands at image offset (bx*2, by*2).
    let (parent_w, parent_h) = grid.parent_image_size();
    let mut parent_pixels = vec![0u16; (parent_w as usize) * (parent_h as usize)];
    for by in 0..tiles_y {
        for bx in 0..tiles_x {
            let idx = grid.tile_index(bx, by);
            let rect = grid.tile_rect(bx, by);
            let root_size = LevelSize::new(rect.width, rect.height).chain_to_root().last().unwrap().parent();
            let vals = &encoded_tiles[idx].parent_vals;
            for py in 0..root_size.height {
                for px in 0..root_size.width {
                    let img_x = bx * 2 + px;
                    let img_y = by * 2 + py;
                    if img_x >= parent_w || img_y >= parent_h {
                        // The global parent-values image can be narrower than
                        // a tile's own root grid at the trailing edge — clip
                        // to the image's bounds rather than the tile's, to
                        // match how a reader re-derives root counts purely
                        // from those same global bounds (see `re_swizzle`).
                        continue;
                    }
                    parent_pixels[(img_y * parent_w + img_x) as usize] =
                        vals[(py * root_size.width + px) as usize];
                }
            }
        }
    }

    let parent_pyramid = EncodePyramid::build(&parent_pixels, parent_w, parent_h);
    let mut parent_histogram: HashMap<u16, u64> = HashMap::new();
    for value in parent_pyramid.wavelet_values() {
        *parent_histogram.entry(value).or_insert(0) += 1;
    }
    let parent_table = CdfTable::build(&parent_histogram);
    let parent_encoded = encode_pyramid(&parent_pyramid, &parent_table)?;

    let mut out = Vec::new();
    write_header(&mut out, &FileHeader { width, height, block_size, block_body_start: 0 })?;
    global_table.write(&mut out)?;

    write_u32(&mut out, parent_encoded.parent_vals.len() as u32)?;
    for &value in &parent_encoded.parent_vals {
        write_u16(&mut out, value)?;
    }
    parent_table.write(&mut out)?;
    write_u32(&mut out, 0)?; // parent tile's own blockPos is always 0
    write_u64(&mut out, parent_encoded.final_rans_state)?;
    out.extend_from_slice(&parent_encoded.body);

    let mut offset = 0u32;
    let mut offsets = Vec::with_capacity(encoded_tiles.len());
    for tile in &encoded_tiles {
        offsets.push(offset);
        offset += tile.body.len() as u32;
    }
    for (tile, &pos) in encoded_tiles.iter().zip(&offsets) {
        write_u32(&mut out, pos)?;
        write_u64(&mut out, tile.final_rans_state)?;
    }

    let block_body_start = out.len() as u64;
    for tile in &encoded_tiles {
        out.extend_from_slice(&tile.body);
    }

    out[16..24].copy_from_slice(&block_body_start.to_le_bytes());

    Ok(out)
}

/// A CIF image opened for random-access reading, over any seekable byte
/// source `S`. [`Image::open`] wraps an in-memory buffer; [`Image::open_stream`]
/// accepts any `Read + Seek` (a file, typically).
///
/// Not internally thread-safe: the tile cache and cursor position are
/// interior-mutable (`RefCell`/`Cell`) for the single-threaded, `&self`
/// public API the original exposes, not for concurrent use — see the design
/// ledger's "Rc not Arc" note. Callers sharing an `Image` across threads must
/// serialize access externally.
pub struct Image<S> {
    width: u32,
    height: u32,
    block_size: u32,
    grid: TileGrid,
    global_table: Rc<CdfTable>,
    tile_headers: Vec<TileHeader>,
    tile_parent_vals: Vec<SmallVec<[u16; 4]>>,
    block_body_start: u64,
    blocks: RefCell<Vec<Option<Tile>>>,
    source: RefCell<S>,
    fixed_overhead: usize,
    current_cache_size: Cell<usize>,
}

impl Image<Cursor<Vec<u8>>> {
    /// Opens a CIF image already fully resident in memory.
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        Self::open_stream(Cursor::new(bytes))
    }
}

impl<S: Read + Seek> Image<S> {
    /// Opens a CIF image for streaming, random-access reads: reads the file
    /// header, the global symbol table, and the parent-values image (fully
    /// decoding it to recover every tile's root values), then every ordinary
    /// block header. Does not read any ordinary tile body.
    #[tracing::instrument(skip(source))]
    pub fn open_stream(mut source: S) -> Result<Self> {
        let file_header = read_header(&mut source)?;
        let global_table = CdfTable::read(&mut source)?;

        let grid = TileGrid::new(file_header.width, file_header.height, file_header.block_size);
        let (parent_w, parent_h) = grid.parent_image_size();

        let root_count = read_u32(&mut source)? as usize;
        let mut parent_root_vals = SmallVec::<[u16; 4]>::new();
        for _ in 0..root_count {
            parent_root_vals.push(read_u16(&mut source)?);
        }

        let parent_table = CdfTable::read(&mut source)?;
        let _parent_block_pos = read_u32(&mut source)?;
        let parent_final_state = read_u64(&mut source)?;
        let parent_blocks = read_block_run(&mut source)?;

        let mut parent_tile =
            Tile::from_blocks(parent_w, parent_h, parent_root_vals, parent_final_state, parent_blocks);
        let raw_parent_vals = parent_tile.bottom_level_pixels(&parent_table)?.to_vec();

        let tile_parent_vals = re_swizzle(&raw_parent_vals, parent_w, parent_h);

        let mut tile_headers = Vec::with_capacity(grid.tile_count() as usize);
        for _ in 0..grid.tile_count() {
            let block_pos = read_u32(&mut source)?;
            let final_rans_state = read_u64(&mut source)?;
            tile_headers.push(TileHeader { block_pos, final_rans_state });
        }

        let tile_count = grid.tile_count() as usize;
        let fixed_overhead = tile_count * std::mem::size_of::<TileHeader>()
            + tile_count * std::mem::size_of::<Option<Tile>>()
            + global_table.memory_footprint();

        Ok(Self {
            width: file_header.width,
            height: file_header.height,
            block_size: file_header.block_size,
            grid,
            global_table: Rc::new(global_table),
            tile_headers,
            tile_parent_vals,
            block_body_start: file_header.block_body_start,
            blocks: RefCell::new(vec![None; grid.tile_count() as usize]),
            source: RefCell::new(source),
            fixed_overhead,
            current_cache_size: Cell::new(fixed_overhead),
        })
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `⌈width / blockSize⌉`.
    #[inline]
    pub fn width_in_blocks(&self) -> u32 {
        self.grid.width_in_blocks()
    }

    /// `⌈height / blockSize⌉`.
    #[inline]
    pub fn height_in_blocks(&self) -> u32 {
        self.grid.height_in_blocks()
    }

    /// The "parent-vals-only" level of any full-size tile: one past its
    /// topmost decomposed layer.
    pub fn top_lod(&self) -> u32 {
        LevelSize::new(self.block_size, self.block_size).chain_to_root().len() as u32
    }

    /// Approximate total resident memory: live tile buffers plus fixed
    /// per-tile header and symbol-table overhead. Equals exactly
    /// `fixedOverhead` right after [`Image::clear_block_cache`].
    pub fn memory_usage(&self) -> usize {
        self.current_cache_size.get()
    }

    /// Drops every instantiated tile, keeping headers and root values.
    pub fn clear_block_cache(&self) {
        for slot in self.blocks.borrow_mut().iter_mut() {
            *slot = None;
        }
        self.current_cache_size.set(self.fixed_overhead);
    }

    /// Per-tile currently-cached decode level, `top_lod()` for tiles that
    /// haven't been instantiated at all.
    pub fn get_block_levels(&self) -> Vec<u8> {
        let top = self.top_lod() as u8;
        self.blocks
            .borrow()
            .iter()
            .map(|slot| slot.as_ref().map_or(top, |tile| tile.current_level() as u8))
            .collect()
    }

    /// Reads a single pixel. Out-of-range coordinates return `0` without
    /// touching the underlying stream.
    #[tracing::instrument(skip(self))]
    pub fn get_pixel(&self, x: u32, y: u32) -> Result<u16> {
        if x >= self.width || y >= self.height {
            return Ok(0);
        }
        let (bx, by, sx, sy) = self.grid.locate(x, y);
        let idx = self.grid.tile_index(bx, by);

        let instantiated = self.blocks.borrow()[idx].is_some();
        if !instantiated {
            // The root-alignment pitch depends on how many levels *this*
            // tile's own pyramid decomposes through, which for an edge tile
            // (smaller than `block_size`) can differ from a full-size tile's
            // — re-derive it from the tile's own rect rather than assuming
            // every tile roots out at the same depth as a nominal one.
            let rect = self.grid.tile_rect(bx, by);
            let chain = LevelSize::new(rect.width, rect.height).chain_to_root();
            let pitch = 1u32 << chain.len();
            if sx % pitch == 0 && sy % pitch == 0 {
                let root_size = chain.last().unwrap().parent();
                let root_x = sx / pitch;
                let root_y = sy / pitch;
                let flat = (root_y * root_size.width + root_x) as usize;
                return Ok(self.tile_parent_vals[idx].get(flat).copied().unwrap_or(0));
            }
        }

        self.ensure_block(idx)?;
        let mut blocks = self.blocks.borrow_mut();
        let tile = blocks[idx].as_mut().expect("just instantiated");
        tile.get_pixel(&self.global_table, sx, sy).map_err(|e| e.with_tile_coords(bx, by))
    }

    /// Decodes every tile to its bottom level and returns the full pixel
    /// grid in row-major order.
    pub fn get_bottom_level_pixels(&self) -> Result<Vec<u16>> {
        let mut pixels = vec![0u16; (self.width as usize) * (self.height as usize)];
        for by in 0..self.grid.height_in_blocks() {
            for bx in 0..self.grid.width_in_blocks() {
                let idx = self.grid.tile_index(bx, by);
                self.ensure_block(idx)?;
                let rect = self.grid.tile_rect(bx, by);

                let tile_pixels = {
                    let mut blocks = self.blocks.borrow_mut();
                    let tile = blocks[idx].as_mut().expect("just instantiated");
                    tile.bottom_level_pixels(&self.global_table)
                        .map_err(|e| e.with_tile_coords(bx, by))?
                        .to_vec()
                };

                for y in 0..rect.height {
                    for x in 0..rect.width {
                        pixels[((rect.y + y) * self.width + (rect.x + x)) as usize] =
                            tile_pixels[(y * rect.width + x) as usize];
                    }
                }
            }
        }
        Ok(pixels)
    }

    /// Instantiates tile `idx` if it isn't already, seeking the underlying
    /// stream to its body and materializing its renormalization blocks.
    /// Decodes no wavelet layers.
    fn ensure_block(&self, idx: usize) -> Result<()> {
        if self.blocks.borrow()[idx].is_some() {
            return Ok(());
        }
        let header = &self.tile_headers[idx];
        if header.final_rans_state == 0 {
            let bx = idx as u32 % self.grid.width_in_blocks();
            let by = idx as u32 / self.grid.width_in_blocks();
            return Err(Error::corrupt_block(bx, by, "finalRansState is 0"));
        }

        let bx = idx as u32 % self.grid.width_in_blocks();
        let by = idx as u32 / self.grid.width_in_blocks();
        let rect = self.grid.tile_rect(bx, by);

        let blocks = {
            let mut source = self.source.borrow_mut();
            source.seek(SeekFrom::Start(self.block_body_start + header.block_pos as u64))?;
            read_block_run(&mut *source)?
        };

        let root_vals = fit_root_vals(self.tile_parent_vals[idx].clone(), rect.width, rect.height);
        let tile = Tile::from_blocks(rect.width, rect.height, root_vals, header.final_rans_state, blocks);
        self.current_cache_size.set(self.current_cache_size.get() + tile.memory_footprint());
        self.blocks.borrow_mut()[idx] = Some(tile);
        Ok(())
    }
}

/// Splits a fully-decoded parent-values image back into per-tile root value
/// lists, inverting the de-swizzle `encode` performed: each 2x2 group in
/// raster order becomes one tile's `parentVals[]`, clipped to the image's
/// own edges (not the tile's notional root size — see the design ledger for
/// why this mirrors the original rather than correcting it).
fn re_swizzle(raw: &[u16], parent_w: u32, parent_h: u32) -> Vec<SmallVec<[u16; 4]>> {
    let mut tiles = Vec::new();
    let mut y = 0u32;
    while y < parent_h {
        let mut x = 0u32;
        while x < parent_w {
            let mut vals = SmallVec::new();
            vals.push(raw[(y * parent_w + x) as usize]);
            if x + 1 < parent_w {
                vals.push(raw[(y * parent_w + x + 1) as usize]);
            }
            if y + 1 < parent_h {
                vals.push(raw[((y + 1) * parent_w + x) as usize]);
            }
            if x + 1 < parent_w && y + 1 < parent_h {
                vals.push(raw[((y + 1) * parent_w + x + 1) as usize]);
            }
            tiles.push(vals);
            x += 2;
        }
        y += 2;
    }
    tiles
}

/// Normalizes a tile's reconstructed root values to the exact pixel count its
/// own `chain_to_root()` expects.
///
/// `re_swizzle` clips each tile's slice of the parent-values image to the
/// image's own edges, not to any individual tile's notional root grid, so an
/// edge tile whose root grid happens to need more cells than its neighbors in
/// the same row/column can come up short. Padding with zero here keeps
/// `Tile::from_blocks` safe to call; the corresponding `encode`-side gap is
/// the de-swizzle loop's bounds clip (see its comment).
fn fit_root_vals(mut vals: SmallVec<[u16; 4]>, width: u32, height: u32) -> SmallVec<[u16; 4]> {
    let expected = LevelSize::new(width, height).chain_to_root().last().unwrap().parent().pixel_count();
    vals.truncate(expected);
    while vals.len() < expected {
        vals.push(0);
    }
    vals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u16> {
        (0..(width * height)).map(|i| (i % 65536) as u16).collect()
    }

    #[test]
    fn roundtrips_a_small_multi_tile_image() {
        let (width, height, block_size) = (20, 13, 8);
        let pixels = gradient(width, height);

        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();

        assert_eq!(image.width(), width);
        assert_eq!(image.height(), height);
        assert_eq!(image.width_in_blocks(), 3);
        assert_eq!(image.height_in_blocks(), 2);

        let decoded = image.get_bottom_level_pixels().unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn get_pixel_matches_full_decode() {
        let (width, height, block_size) = (17, 23, 8);
        let pixels = gradient(width, height);
        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();

        for &(x, y) in &[(0, 0), (16, 0), (5, 22), (16, 22), (9, 9)] {
            assert_eq!(image.get_pixel(x, y).unwrap(), pixels[(y * width + x) as usize]);
        }
    }

    #[test]
    fn out_of_range_pixel_reads_return_zero() {
        let (width, height, block_size) = (8, 8, 8);
        let pixels = gradient(width, height);
        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();

        assert_eq!(image.get_pixel(width, 0).unwrap(), 0);
        assert_eq!(image.get_pixel(0, height).unwrap(), 0);
    }

    #[test]
    fn root_reads_do_not_instantiate_the_tile() {
        let (width, height, block_size) = (16, 16, 16);
        let pixels = vec![7u16; (width * height) as usize];
        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();

        // (0, 0) is a root-grid-aligned coordinate for an untouched tile.
        let _ = image.get_pixel(0, 0).unwrap();
        assert_eq!(image.get_block_levels(), vec![image.top_lod() as u8]);
    }

    #[test]
    fn clear_block_cache_drops_instantiated_tiles() {
        let (width, height, block_size) = (16, 16, 8);
        let pixels = gradient(width, height);
        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();

        image.get_pixel(5, 5).unwrap();
        assert!(image.get_block_levels().iter().any(|&l| (l as u32) != image.top_lod()));

        image.clear_block_cache();
        assert!(image.get_block_levels().iter().all(|&l| (l as u32) == image.top_lod()));
    }

    #[test]
    fn a_coarse_lod_read_does_not_decode_all_the_way_to_the_leaf() {
        // blockSize=32 -> topLOD 5 (32->16->8->4->2->root 1x1). (8,0) is
        // tile-local (8,0), divisible by 8 but not 16, so it only needs
        // level 3 decoded, never the full leaf level.
        let (width, height, block_size) = (64, 64, 32);
        let pixels = gradient(width, height);
        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();

        assert_eq!(image.get_pixel(8, 0).unwrap(), pixels[8]);
        let levels = image.get_block_levels();
        assert!(levels[0] > 0, "expected a partial decode, tile fully reached leaf level");
    }

    #[test]
    fn single_tile_image_roundtrips() {
        let (width, height, block_size) = (8, 8, 8);
        let pixels = gradient(width, height);
        let bytes = encode(&pixels, width, height, block_size).unwrap();
        let image = Image::open(bytes).unwrap();
        assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
    }
}
