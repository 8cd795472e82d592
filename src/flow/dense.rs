// flow/dense.rs — Software dense flow: coarse-to-fine per-pixel Lucas-Kanade.
//
// At every pyramid level, every pixel solves a 2×2 least-squares system
// over a Gaussian window:
//
//   H = Σ w · [gx², gx·gy; gx·gy, gy²]       (gradients of prev, constant)
//   b = Σ w · [gx·It; gy·It]                 It = curr(x + u) - prev(x)
//   H · Δ = -b,   (u, v) += Δ
//
// The window sums are separable Gaussian blurs of the per-pixel products,
// so one iteration costs a few image passes regardless of window size.
// Between levels the field is upsampled: u_fine(x) = 2 · u_coarse(x / 2).
// Pixels whose H is (near-)singular keep the flow they inherited.
//
// The GPU dense kernel evaluates the same sums directly in a 2D window
// with the same clamped borders, so both backends converge to the same
// field up to float rounding.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Backend, DenseFlow, DenseFlowCalculator, SizeGuard};
use crate::convolution::{convolve_separable, gaussian_kernel_1d};
use crate::error::Result;
use crate::gradient::central_difference;
use crate::image::{interpolate_bilinear, Frame, FrameSize, Image};
use crate::pyramid::Pyramid;

/// Named parameter sets for the dense selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseFlowPreset {
    /// Default dense flow (`dense_farneback_*`).
    Fast,
    /// `dense_dis_lq`.
    LowQuality,
    /// `dense_dis_hq`.
    HighQuality,
}

/// Parameters of the dense flow calculators (software and accelerator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseFlowConfig {
    pub pyramid_levels: usize,
    pub pyramid_sigma: f32,
    /// Half-size of the Gaussian summation window.
    pub window_radius: usize,
    pub window_sigma: f32,
    /// Solver iterations per level.
    pub iterations: usize,
    /// Pixels with det(H) below this keep their inherited flow.
    pub min_determinant: f32,
}

impl DenseFlowConfig {
    pub fn preset(preset: DenseFlowPreset) -> Self {
        match preset {
            DenseFlowPreset::Fast => DenseFlowConfig {
                pyramid_levels: 3,
                pyramid_sigma: 1.0,
                window_radius: 3,
                window_sigma: 1.5,
                iterations: 3,
                min_determinant: 1e-4,
            },
            DenseFlowPreset::LowQuality => DenseFlowConfig {
                pyramid_levels: 3,
                pyramid_sigma: 1.0,
                window_radius: 2,
                window_sigma: 1.0,
                iterations: 2,
                min_determinant: 1e-4,
            },
            DenseFlowPreset::HighQuality => DenseFlowConfig {
                pyramid_levels: 5,
                pyramid_sigma: 1.0,
                window_radius: 5,
                window_sigma: 2.5,
                iterations: 6,
                min_determinant: 1e-4,
            },
        }
    }

    /// The 1D window weights; the 2D window is their outer product.
    pub fn window_kernel(&self) -> Vec<f32> {
        gaussian_kernel_1d(self.window_radius, self.window_sigma)
    }
}

impl Default for DenseFlowConfig {
    fn default() -> Self {
        Self::preset(DenseFlowPreset::Fast)
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// Upsample a coarse field onto a finer level: u_fine(x) = 2 · u_coarse(x/2).
pub fn upsample_flow(coarse: &DenseFlow, size: FrameSize) -> DenseFlow {
    let sample = |img: &Image<f32>| {
        Image::from_fn(size.width, size.height, |x, y| {
            2.0 * interpolate_bilinear(img, x as f32 * 0.5, y as f32 * 0.5)
        })
    };
    DenseFlow { u: sample(&coarse.u), v: sample(&coarse.v) }
}

/// Run the coarse-to-fine solver on two pre-built pyramids.
pub fn estimate_dense_flow(config: &DenseFlowConfig, prev: &Pyramid, curr: &Pyramid) -> DenseFlow {
    let levels = prev.num_levels().min(curr.num_levels());
    let kernel = config.window_kernel();

    let mut flow: Option<DenseFlow> = None;
    for level in (0..levels).rev() {
        let p = &prev.levels[level];
        let c = &curr.levels[level];
        let mut field = match flow.take() {
            Some(coarse) => upsample_flow(&coarse, p.size()),
            None => DenseFlow::zeros(p.size()),
        };
        refine_level(config, &kernel, p, c, &mut field);
        flow = Some(field);
    }
    flow.unwrap_or_else(|| DenseFlow::zeros(prev.levels[0].size()))
}

fn refine_level(config: &DenseFlowConfig, kernel: &[f32], prev: &Image<f32>, curr: &Image<f32>, flow: &mut DenseFlow) {
    let (w, h) = (prev.width(), prev.height());
    let (gx, gy) = central_difference(prev);

    let product = |a: &Image<f32>, b: &Image<f32>| {
        Image::from_fn(w, h, |x, y| a.get(x, y) * b.get(x, y))
    };
    let window = |img: &Image<f32>| convolve_separable(img, kernel, kernel);

    let sxx = window(&product(&gx, &gx));
    let sxy = window(&product(&gx, &gy));
    let syy = window(&product(&gy, &gy));

    for _ in 0..config.iterations {
        let it = Image::from_fn(w, h, |x, y| {
            let (u, v) = flow.at(x, y);
            interpolate_bilinear(curr, x as f32 + u, y as f32 + v) - prev.get(x, y)
        });
        let bx = window(&product(&gx, &it));
        let by = window(&product(&gy, &it));

        for y in 0..h {
            for x in 0..w {
                let a = sxx.get(x, y);
                let b = sxy.get(x, y);
                let c = syy.get(x, y);
                let det = a * c - b * b;
                if det < config.min_determinant {
                    continue;
                }
                let inv = 1.0 / det;
                let rx = -bx.get(x, y);
                let ry = -by.get(x, y);
                let du = inv * (c * rx - b * ry);
                let dv = inv * (a * ry - b * rx);
                *flow.u.get_mut(x, y) += du;
                *flow.v.get_mut(x, y) += dv;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Software dense flow calculator.
pub struct LkDenseFlow {
    config: DenseFlowConfig,
    guard: SizeGuard,
}

impl LkDenseFlow {
    pub fn new(config: DenseFlowConfig) -> Self {
        LkDenseFlow { config, guard: SizeGuard::new() }
    }

    pub fn with_preset(preset: DenseFlowPreset) -> Self {
        Self::new(DenseFlowConfig::preset(preset))
    }

    pub fn config(&self) -> &DenseFlowConfig {
        &self.config
    }
}

impl Default for LkDenseFlow {
    fn default() -> Self {
        Self::new(DenseFlowConfig::default())
    }
}

impl DenseFlowCalculator for LkDenseFlow {
    fn backend(&self) -> Backend {
        Backend::Software
    }

    fn calculate(&mut self, prev: &Frame, curr: &Frame) -> Result<DenseFlow> {
        self.guard.check(prev, curr)?;
        let levels = self.config.pyramid_levels.max(1);
        let prev_pyr = Pyramid::build(prev, levels, self.config.pyramid_sigma);
        let curr_pyr = Pyramid::build(curr, levels, self.config.pyramid_sigma);
        let flow = estimate_dense_flow(&self.config, &prev_pyr, &curr_pyr);
        debug!(levels = prev_pyr.num_levels(), "dense flow");
        Ok(flow)
    }
}
