// convolution.rs — Separable 1D convolution for Image<T>.
//
// A 2D convolution with a separable kernel K = k_col * k_row^T decomposes
// into a horizontal and a vertical 1D pass, O(2k) instead of O(k²) per pixel.
// Used for the pyramid blur, the structure-tensor window of the corner
// detector and the Gaussian window of the dense flow solver.
//
// BORDER HANDLING: Clamp (replicate edge pixels).
//
// Both passes share `convolve_line`, which walks one line of samples given
// a starting offset and a step (1 for rows, stride for columns). The
// interior of the line runs without index clamping.

use crate::image::{Image, Pixel};

/// Convolve one line of `len` samples read at `src[start + i * step]`,
/// writing `dst[i]`.
#[inline]
fn convolve_line<T: Pixel>(
    src: &[T],
    start: usize,
    step: usize,
    len: usize,
    kernel: &[f32],
    dst: &mut [f32],
) {
    let half = kernel.len() / 2;
    let at = |i: usize| src[start + i * step].to_f32();

    for (i, out) in dst.iter_mut().enumerate().take(len) {
        let interior = i >= half && i + half < len;
        let mut acc = 0.0f32;
        if interior {
            for (k, &kv) in kernel.iter().enumerate() {
                acc += at(i + k - half) * kv;
            }
        } else {
            for (k, &kv) in kernel.iter().enumerate() {
                let j = (i as isize + k as isize - half as isize).clamp(0, len as isize - 1);
                acc += at(j as usize) * kv;
            }
        }
        *out = acc;
    }
}

fn check_kernel(kernel: &[f32]) {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());
}

/// Convolve each row of `src` with a centered 1D kernel (horizontal pass).
pub fn convolve_rows<T: Pixel>(src: &Image<T>, kernel: &[f32]) -> Image<f32> {
    check_kernel(kernel);
    let (w, h) = (src.width(), src.height());
    let mut dst = Image::<f32>::new(w, h);
    for y in 0..h {
        convolve_line(src.as_slice(), y * src.stride(), 1, w, kernel, dst.row_mut(y));
    }
    dst
}

/// Convolve each column of `src` with a centered 1D kernel (vertical pass).
pub fn convolve_cols<T: Pixel>(src: &Image<T>, kernel: &[f32]) -> Image<f32> {
    check_kernel(kernel);
    let (w, h) = (src.width(), src.height());
    let mut dst = Image::<f32>::new(w, h);
    let mut column = vec![0.0f32; h];
    for x in 0..w {
        convolve_line(src.as_slice(), x, src.stride(), h, kernel, &mut column);
        for (y, &v) in column.iter().enumerate() {
            // SAFETY: x < w and y < h by construction of the loops.
            unsafe { dst.set_unchecked(x, y, v) };
        }
    }
    dst
}

/// Full separable 2D convolution: horizontal pass then vertical pass.
///
/// # Panics
/// Panics if either kernel is empty or has even length.
pub fn convolve_separable<T: Pixel>(
    src: &Image<T>,
    kernel_row: &[f32],
    kernel_col: &[f32],
) -> Image<f32> {
    let intermediate = convolve_rows(src, kernel_row);
    convolve_cols(&intermediate, kernel_col)
}

/// Generate a normalized 1D Gaussian kernel of length `2 * half_size + 1`.
///
/// ```
/// let k = event_simulator::convolution::gaussian_kernel_1d(2, 1.0);
/// assert_eq!(k.len(), 5);
/// assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
/// ```
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * half_size)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Gaussian blur with a kernel of half-size `radius`.
pub fn gaussian_blur<T: Pixel>(src: &Image<T>, radius: usize, sigma: f32) -> Image<f32> {
    let k = gaussian_kernel_1d(radius, sigma);
    convolve_separable(src, &k, &k)
}
