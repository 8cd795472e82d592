// pyramid.rs — Gaussian image pyramid.
//
// Backbone of the coarse-to-fine flow solvers: sparse LK refines each
// point's displacement from the coarsest level down, dense LK upsamples the
// whole flow field level by level.
//
// Algorithm at each level:
//   1. Gaussian blur (separable convolution from convolution.rs)
//   2. Downsample 2× by taking every other pixel in both dimensions
//
// The requested depth is capped so the coarsest level keeps at least
// MIN_LEVEL_SIDE pixels on its short side; small frames simply get
// fewer levels instead of degenerate 1×1 images.

use crate::convolution::gaussian_blur;
use crate::image::{to_f32_image, Image, Pixel};

/// Coarsest level keeps at least this many pixels on its shorter side.
pub const MIN_LEVEL_SIDE: usize = 8;

/// A Gaussian image pyramid. `levels[0]` is full resolution.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<Image<f32>>,
}

impl Pyramid {
    /// Build a pyramid with at most `num_levels` levels.
    ///
    /// # Panics
    /// Panics if `num_levels == 0`.
    pub fn build<T: Pixel>(src: &Image<T>, num_levels: usize, sigma: f32) -> Self {
        assert!(num_levels >= 1, "pyramid must have at least 1 level");

        let depth = usable_levels(src.width(), src.height(), num_levels);
        let radius = (3.0 * sigma).ceil().max(1.0) as usize;

        let mut levels = Vec::with_capacity(depth);
        levels.push(to_f32_image(src));

        for _ in 1..depth {
            let Some(prev) = levels.last() else { break };
            let blurred = gaussian_blur(prev, radius, sigma);
            levels.push(downsample_2x(&blurred));
        }

        Pyramid { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &Image<f32> {
        &self.levels[level]
    }
}

/// How many of `requested` levels fit on a `width × height` image.
pub fn usable_levels(width: usize, height: usize, requested: usize) -> usize {
    let mut side = width.min(height);
    let mut levels = 1;
    while levels < requested && side / 2 >= MIN_LEVEL_SIDE {
        side /= 2;
        levels += 1;
    }
    levels
}

/// Downsample by 2×: `dst(x, y) = src(2x, 2y)`; odd trailing rows/cols drop.
pub fn downsample_2x(src: &Image<f32>) -> Image<f32> {
    let new_w = src.width() / 2;
    let new_h = src.height() / 2;
    let mut dst = Image::new(new_w, new_h);
    for y in 0..new_h {
        for x in 0..new_w {
            // SAFETY: 2x < width and 2y < height.
            unsafe { dst.set_unchecked(x, y, src.get_unchecked(x * 2, y * 2)); }
        }
    }
    dst
}
