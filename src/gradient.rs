// gradient.rs — Image gradients.
//
// Two flavours:
//
//   Sobel (separable, unnormalized) — feeds the structure tensor of the
//     Shi-Tomasi corner detector. Border handling comes from
//     convolve_separable (clamp).
//       Sobel_x: row [-1, 0, 1], col [1, 2, 1]
//       Sobel_y: row [1, 2, 1],  col [-1, 0, 1]
//
//   Central difference, 0.5 * (I(x+1) - I(x-1)) — the gradient the
//     Lucas-Kanade solvers linearize around. Matches the sub-pixel
//     gradient the sparse tracker evaluates with bilinear sampling and
//     the one the GPU dense kernel computes, so all backends agree.

use crate::convolution::convolve_separable;
use crate::image::{Image, Pixel};

const SOBEL_DERIV: [f32; 3] = [-1.0, 0.0, 1.0];
const SOBEL_SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];

/// Horizontal Sobel gradient. Positive where intensity increases to the right.
pub fn sobel_x<T: Pixel>(src: &Image<T>) -> Image<f32> {
    convolve_separable(src, &SOBEL_DERIV, &SOBEL_SMOOTH)
}

/// Vertical Sobel gradient. Positive where intensity increases downward.
pub fn sobel_y<T: Pixel>(src: &Image<T>) -> Image<f32> {
    convolve_separable(src, &SOBEL_SMOOTH, &SOBEL_DERIV)
}

pub fn sobel_xy<T: Pixel>(src: &Image<T>) -> (Image<f32>, Image<f32>) {
    (sobel_x(src), sobel_y(src))
}

/// Central-difference gradients (Ix, Iy) with replicated borders.
pub fn central_difference(src: &Image<f32>) -> (Image<f32>, Image<f32>) {
    let (w, h) = (src.width(), src.height());
    let mut gx = Image::<f32>::new(w, h);
    let mut gy = Image::<f32>::new(w, h);
    for y in 0..h {
        let yi = y as isize;
        for x in 0..w {
            let xi = x as isize;
            let dx = 0.5 * (src.get_clamped(xi + 1, yi) - src.get_clamped(xi - 1, yi));
            let dy = 0.5 * (src.get_clamped(xi, yi + 1) - src.get_clamped(xi, yi - 1));
            // SAFETY: x < w, y < h.
            unsafe {
                gx.set_unchecked(x, y, dx);
                gy.set_unchecked(x, y, dy);
            }
        }
    }
    (gx, gy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sobel_step_edge() {
        // Left half = 0, right half = 100.
        let img = Image::from_fn(20, 10, |x, _| if x >= 10 { 100u8 } else { 0 });
        let ix = sobel_x(&img);
        assert!(ix.get(10, 5) > 50.0, "expected strong positive Ix at edge");
        assert!(ix.get(5, 5).abs() < 1.0, "expected flat Ix away from edge");
        let iy = sobel_y(&img);
        assert!(iy.get(10, 5).abs() < 1e-3);
    }

    #[test]
    fn test_sobel_linear_ramp() {
        // f(x) = x: row pass gives 2, column smoothing multiplies by 4.
        let img = Image::from_fn(20, 10, |x, _| x as f32);
        let (ix, iy) = sobel_xy(&img);
        for y in 2..8 {
            for x in 2..18 {
                assert!((ix.get(x, y) - 8.0).abs() < 1e-3, "Ix at ({x},{y})");
                assert!(iy.get(x, y).abs() < 1e-3, "Iy at ({x},{y})");
            }
        }
    }

    #[test]
    fn test_central_difference_ramp() {
        // f(x, y) = 3x + 2y → interior gradient (3, 2).
        let img = Image::from_fn(8, 8, |x, y| 3.0 * x as f32 + 2.0 * y as f32);
        let (gx, gy) = central_difference(&img);
        assert!((gx.get(4, 4) - 3.0).abs() < 1e-5);
        assert!((gy.get(4, 4) - 2.0).abs() < 1e-5);
        // One-sided at the border because of replication: (f(1) - f(0)) / 2.
        assert!((gx.get(0, 4) - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_constant_image_zero_gradient() {
        let img = Image::filled(6, 6, 128.0f32);
        let (gx, gy) = central_difference(&img);
        assert!(gx.pixels().all(|(_, _, v)| v == 0.0));
        assert!(gy.pixels().all(|(_, _, v)| v == 0.0));
    }
}
