//! End-to-end scenarios against the public `cif_codec::image` API.

use cif_codec::{encode, Image};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn gradient_1d(len: u32) -> Vec<u16> {
    (0..len).map(|i| i as u16).collect()
}

fn checkerboard(width: u32, height: u32) -> Vec<u16> {
    (0..width * height)
        .map(|i| {
            let x = i % width;
            let y = i / width;
            if (x + y) % 2 == 0 { 0x0000 } else { 0xFFFF }
        })
        .collect()
}

fn random_grid(width: u32, height: u32, seed: u64) -> Vec<u16> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..width * height).map(|_| rng.gen()).collect()
}

#[test]
fn uniform_image_round_trips_and_cache_returns_to_fixed_overhead() {
    let (width, height, block_size) = (64, 64, 32);
    let pixels = vec![0x1234u16; (width * height) as usize];

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);

    let baseline = image.memory_usage();
    image.get_pixel(10, 10).unwrap();
    assert!(image.memory_usage() >= baseline);

    image.clear_block_cache();
    assert_eq!(image.memory_usage(), baseline);
}

#[test]
fn checkerboard_round_trips() {
    let (width, height, block_size) = (8, 8, 4);
    let pixels = checkerboard(width, height);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn horizontal_gradient_round_trips() {
    let (width, height, block_size) = (16, 1, 16);
    let pixels = gradient_1d(width);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn coarse_lod_reads_skip_body_decode_until_off_grid_coordinate() {
    let (width, height, block_size) = (64, 64, 32);
    let pixels = random_grid(width, height, 42);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    // A 32x32 tile's pyramid roots out at a single pixel (pitch 32), so the
    // only tile-local coordinate that resolves without instantiating the
    // tile is (0, 0) itself.
    image.get_pixel(0, 0).unwrap();
    assert_eq!(image.get_block_levels()[0], image.top_lod() as u8);

    image.get_pixel(16, 0).unwrap();
    assert_ne!(image.get_block_levels()[0], image.top_lod() as u8);
}

#[test]
fn partial_random_access_walk_matches_reference() {
    let (width, height, block_size) = (256, 256, 32);
    let pixels = random_grid(width, height, 7);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..2000 {
        let x = rng.gen_range(0..width);
        let y = rng.gen_range(0..height);
        let expected = pixels[(y * width + x) as usize];
        assert_eq!(image.get_pixel(x, y).unwrap(), expected);
    }
}

#[test]
fn out_of_range_coordinates_return_zero() {
    let (width, height, block_size) = (16, 16, 8);
    let pixels = random_grid(width, height, 1);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_pixel(width, 0).unwrap(), 0);
    assert_eq!(image.get_pixel(0, height + 100).unwrap(), 0);
}

#[test]
fn non_power_of_two_dimensions_round_trip_with_smaller_edge_tiles() {
    let (width, height, block_size) = (37, 19, 16);
    let pixels = random_grid(width, height, 3);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.width_in_blocks(), 3);
    assert_eq!(image.height_in_blocks(), 2);
    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn smallest_block_size_round_trips() {
    let (width, height, block_size) = (16, 16, 4);
    let pixels = random_grid(width, height, 5);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn single_tile_whole_image_round_trips() {
    let (width, height, block_size) = (32, 32, 32);
    let pixels = random_grid(width, height, 11);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.width_in_blocks(), 1);
    assert_eq!(image.height_in_blocks(), 1);
    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn image_smaller_than_block_size_round_trips() {
    let (width, height, block_size) = (5, 3, 16);
    let pixels = random_grid(width, height, 13);

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.width_in_blocks(), 1);
    assert_eq!(image.height_in_blocks(), 1);
    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn gaussian_like_image_round_trips() {
    let (width, height, block_size) = (64, 64, 16);
    let mut rng = StdRng::seed_from_u64(21);
    // Cheap Irwin-Hall stand-in for a Gaussian without pulling in `rand_distr`.
    let pixels: Vec<u16> = (0..width * height)
        .map(|_| {
            let sum: f64 = (0..12).map(|_| rng.gen::<f64>()).sum();
            let centered = (sum - 6.0) * 4000.0 + 32768.0;
            centered.clamp(0.0, 65535.0) as u16
        })
        .collect();

    let bytes = encode(&pixels, width, height, block_size).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}

#[test]
fn raw_escape_band_dominant_distribution_round_trips() {
    // Most pixels are one repeated value; a long run of distinct singleton
    // values forces a large raw-escape band.
    let width = 64;
    let height = 4;
    let mut pixels = vec![7u16; (width * height) as usize];
    for (i, pixel) in pixels.iter_mut().enumerate().take(200) {
        *pixel = (i * 131 + 3) as u16;
    }

    let bytes = encode(&pixels, width, height, 16).unwrap();
    let image = Image::open(bytes).unwrap();

    assert_eq!(image.get_bottom_level_pixels().unwrap(), pixels);
}
