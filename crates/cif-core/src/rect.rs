//! Rectangles, wavelet-layer sizes, and tile-grid arithmetic.
//!
//! [`Rect`] is a small value type for a tile's placement within the full image,
//! modeled after this workspace's general-purpose image rectangle type.
//! [`LevelSize`] and [`TileGrid`] are specific to the heightmap codec: they capture
//! the "parent dimensions are half, rounded up" relationship that drives both the
//! wavelet pyramid (layer to layer) and the image container (tile to tile).

/// An axis-aligned rectangle with `u32` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct Rect {
    /// X origin.
    pub x: u32,
    /// Y origin.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Creates a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// X + width.
    #[inline]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Y + height.
    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// `width * height`.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if `width == 0 || height == 0`.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if `(px, py)` falls within this rectangle.
    #[inline]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px < self.right() && py < self.bottom()
    }
}

/// The dimensions of one wavelet-pyramid layer, and the relationship to its parent.
///
/// A layer's parent has dimensions `(⌈w/2⌉, ⌈h/2⌉)`. A layer is the *root* of its
/// pyramid once its parent would have at most 4 pixels, *and* as soon as either
/// parent axis alone has collapsed to a single pixel — see
/// [`LevelSize::parent_is_root_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelSize {
    /// Layer width in pixels.
    pub width: u32,
    /// Layer height in pixels.
    pub height: u32,
}

#[inline]
const fn ceil_half(v: u32) -> u32 {
    (v + 1) / 2
}

impl LevelSize {
    /// Creates a layer size.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The parent layer's width: `⌈width/2⌉`.
    #[inline]
    pub const fn parent_width(&self) -> u32 {
        ceil_half(self.width)
    }

    /// The parent layer's height: `⌈height/2⌉`.
    #[inline]
    pub const fn parent_height(&self) -> u32 {
        ceil_half(self.height)
    }

    /// The parent layer's size.
    #[inline]
    pub const fn parent(&self) -> LevelSize {
        LevelSize::new(self.parent_width(), self.parent_height())
    }

    /// Total pixel count of this layer.
    #[inline]
    pub const fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Number of residual ("wavelet") values a non-root layer emits:
    /// `pixel_count() - parent().pixel_count()`.
    #[inline]
    pub const fn wavelet_count(&self) -> usize {
        self.pixel_count() - self.parent().pixel_count()
    }

    /// True when this layer's parent needs no further decomposition, i.e. this
    /// layer's parent *is* the pyramid root.
    ///
    /// A layer is root-sized as soon as *either* parent axis alone has
    /// collapsed to at most 1 pixel (matching `IsRoot()`'s asymmetric `||`),
    /// not only when both have: a `16x1` image's single layer has parent
    /// `8x1` — height is already as small as it gets — so it is the root
    /// even though its width (8) is still well above 2.
    #[inline]
    pub const fn parent_is_root_size(&self) -> bool {
        self.parent_width() <= 1 || self.parent_height() <= 1
    }

    /// Walks up the pyramid from this size to the root layer's size, inclusive of
    /// both ends. The root layer's own `parentVals[]` (1-4 pixels) is not a separate
    /// entry in this list — it is the root layer's parent, not a layer itself.
    pub fn chain_to_root(&self) -> Vec<LevelSize> {
        let mut sizes = vec![*self];
        let mut current = *self;
        while !current.parent_is_root_size() {
            current = current.parent();
            sizes.push(current);
        }
        sizes
    }
}

/// Row-major tiling of a `width x height` image into `block_size`-edged tiles.
///
/// Edge tiles are smaller when `width`/`height` are not multiples of `block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileGrid {
    /// Full image width in pixels.
    pub width: u32,
    /// Full image height in pixels.
    pub height: u32,
    /// Tile edge length (both axes); a power of two, at least 4.
    pub block_size: u32,
}

impl TileGrid {
    /// Creates a tile grid. Does not validate `block_size`; callers that need the
    /// power-of-two / minimum-4 invariant enforced should check before constructing.
    #[inline]
    pub const fn new(width: u32, height: u32, block_size: u32) -> Self {
        Self { width, height, block_size }
    }

    /// `⌈width / block_size⌉`.
    #[inline]
    pub const fn width_in_blocks(&self) -> u32 {
        (self.width + self.block_size - 1) / self.block_size
    }

    /// `⌈height / block_size⌉`.
    #[inline]
    pub const fn height_in_blocks(&self) -> u32 {
        (self.height + self.block_size - 1) / self.block_size
    }

    /// Total tile count.
    #[inline]
    pub const fn tile_count(&self) -> u32 {
        self.width_in_blocks() * self.height_in_blocks()
    }

    /// The placement and size of tile `(bx, by)` within the full image.
    #[inline]
    pub fn tile_rect(&self, bx: u32, by: u32) -> Rect {
        let x = bx * self.block_size;
        let y = by * self.block_size;
        let w = self.block_size.min(self.width - x);
        let h = self.block_size.min(self.height - y);
        Rect::new(x, y, w, h)
    }

    /// Maps a pixel coordinate to its owning tile index and in-tile offset:
    /// `(bx, by, sub_x, sub_y)`.
    #[inline]
    pub const fn locate(&self, x: u32, y: u32) -> (u32, u32, u32, u32) {
        (
            x / self.block_size,
            y / self.block_size,
            x % self.block_size,
            y % self.block_size,
        )
    }

    /// The flat row-major index of tile `(bx, by)`.
    #[inline]
    pub const fn tile_index(&self, bx: u32, by: u32) -> usize {
        (by * self.width_in_blocks() + bx) as usize
    }

    /// Dimensions of the de-swizzled parent-values image: `⌈w/(S/2)⌉ x ⌈h/(S/2)⌉`.
    #[inline]
    pub const fn parent_image_size(&self) -> (u32, u32) {
        let half = self.block_size / 2;
        let w = (self.width + half - 1) / half;
        let h = (self.height + half - 1) / half;
        (w, h)
    }
}
