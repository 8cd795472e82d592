// flow/sparse.rs — Software sparse flow: Shi-Tomasi points + pyramidal LK.
//
// For every frame pair:
//   1. detect corners on the previous frame (corners.rs)
//   2. build Gaussian pyramids of both frames
//   3. track each corner coarse-to-fine with iterative Lucas-Kanade,
//      doubling the displacement between levels
//
// Two formulations of the per-level solver:
//
//   FORWARD ADDITIVE — gradients at the warped position in the current
//     frame, Hessian rebuilt each iteration. More robust to large motion.
//
//   INVERSE COMPOSITIONAL (Baker & Matthews, 2004) — gradients of the
//     template in the previous frame, Hessian inverted once per level;
//     only the error is resampled per iteration. This is what the GPU
//     kernel runs, so it is the default.
//
// For pure translation both reduce to the same additive update d += H⁻¹b.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Backend, PointFlow, SizeGuard, SparseFlow, SparseFlowCalculator, TrackStatus};
use crate::corners::ShiTomasiDetector;
use crate::error::Result;
use crate::image::{interpolate_bilinear, Frame, Image};
use crate::pyramid::Pyramid;

/// Lucas-Kanade algorithm variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LkMethod {
    ForwardAdditive,
    InverseCompositional,
}

/// Parameters of the sparse flow calculators (software and accelerator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseFlowConfig {
    pub detector: ShiTomasiDetector,
    /// Patch half-size; the patch is (2W+1)².
    pub window_size: usize,
    /// Gauss-Newton iterations per pyramid level.
    pub max_iterations: usize,
    /// Convergence threshold on |delta|, in pixels.
    pub epsilon: f32,
    pub pyramid_levels: usize,
    pub pyramid_sigma: f32,
    pub method: LkMethod,
}

impl Default for SparseFlowConfig {
    fn default() -> Self {
        SparseFlowConfig {
            detector: ShiTomasiDetector::default(),
            window_size: 7,
            max_iterations: 30,
            epsilon: 0.01,
            pyramid_levels: 3,
            pyramid_sigma: 1.0,
            method: LkMethod::InverseCompositional,
        }
    }
}

// ---------------------------------------------------------------------------
// Pyramidal tracker
// ---------------------------------------------------------------------------

/// Pyramidal Lucas-Kanade point tracker.
#[derive(Debug, Clone, Copy)]
pub struct PyramidalLk {
    pub window_size: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    pub method: LkMethod,
}

impl PyramidalLk {
    pub fn new(window_size: usize, max_iterations: usize, epsilon: f32, method: LkMethod) -> Self {
        PyramidalLk { window_size, max_iterations, epsilon, method }
    }

    pub fn from_config(cfg: &SparseFlowConfig) -> Self {
        Self::new(cfg.window_size, cfg.max_iterations, cfg.epsilon, cfg.method)
    }

    /// Track every point from `prev` to `curr`.
    pub fn track(&self, prev: &Pyramid, curr: &Pyramid, points: &[(f32, f32)]) -> Vec<PointFlow> {
        let levels = prev.num_levels().min(curr.num_levels());
        points
            .iter()
            .map(|&p| self.track_point(prev, curr, p, levels))
            .collect()
    }

    fn track_point(&self, prev: &Pyramid, curr: &Pyramid, from: (f32, f32), levels: usize) -> PointFlow {
        let mut d = (0.0f32, 0.0f32);

        for level in (0..levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let at = (from.0 * scale, from.1 * scale);

            let solved = match self.method {
                LkMethod::ForwardAdditive => {
                    self.solve_forward_additive(&prev.levels[level], &curr.levels[level], at, d)
                }
                LkMethod::InverseCompositional => {
                    self.solve_inverse_compositional(&prev.levels[level], &curr.levels[level], at, d)
                }
            };

            match solved {
                Some(next) => d = next,
                None => {
                    return PointFlow {
                        from,
                        to: (from.0 + d.0 / scale, from.1 + d.1 / scale),
                        status: TrackStatus::Lost,
                    };
                }
            }

            if level > 0 {
                d = (d.0 * 2.0, d.1 * 2.0);
            }
        }

        let to = (from.0 + d.0, from.1 + d.1);
        let w = prev.levels[0].width() as f32;
        let h = prev.levels[0].height() as f32;
        let inside = to.0 >= 0.0 && to.0 < w && to.1 >= 0.0 && to.1 < h;
        PointFlow {
            from,
            to,
            status: if inside { TrackStatus::Tracked } else { TrackStatus::OutOfBounds },
        }
    }

    fn offsets(&self) -> impl Iterator<Item = (f32, f32)> {
        let half = self.window_size as isize;
        (-half..=half).flat_map(move |py| (-half..=half).map(move |px| (px as f32, py as f32)))
    }

    /// Returns the refined displacement, or `None` on a singular Hessian.
    fn solve_forward_additive(
        &self,
        prev: &Image<f32>,
        curr: &Image<f32>,
        at: (f32, f32),
        mut d: (f32, f32),
    ) -> Option<(f32, f32)> {
        for _ in 0..self.max_iterations {
            let (mut h00, mut h01, mut h11, mut b0, mut b1) = (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for (ox, oy) in self.offsets() {
                let t = interpolate_bilinear(prev, at.0 + ox, at.1 + oy);
                let wx = at.0 + d.0 + ox;
                let wy = at.1 + d.1 + oy;
                let e = t - interpolate_bilinear(curr, wx, wy);
                let gx = 0.5 * (interpolate_bilinear(curr, wx + 1.0, wy) - interpolate_bilinear(curr, wx - 1.0, wy));
                let gy = 0.5 * (interpolate_bilinear(curr, wx, wy + 1.0) - interpolate_bilinear(curr, wx, wy - 1.0));
                h00 += gx * gx;
                h01 += gx * gy;
                h11 += gy * gy;
                b0 += gx * e;
                b1 += gy * e;
            }

            let (dx, dy) = solve_2x2(h00, h01, h11, b0, b1)?;
            d = (d.0 + dx, d.1 + dy);
            if dx * dx + dy * dy < self.epsilon * self.epsilon {
                break;
            }
        }
        Some(d)
    }

    fn solve_inverse_compositional(
        &self,
        prev: &Image<f32>,
        curr: &Image<f32>,
        at: (f32, f32),
        mut d: (f32, f32),
    ) -> Option<(f32, f32)> {
        // Template samples and gradients are constant for the whole level.
        let template: Vec<(f32, f32, f32, f32, f32)> = self
            .offsets()
            .map(|(ox, oy)| {
                let tx = at.0 + ox;
                let ty = at.1 + oy;
                let gx = 0.5 * (interpolate_bilinear(prev, tx + 1.0, ty) - interpolate_bilinear(prev, tx - 1.0, ty));
                let gy = 0.5 * (interpolate_bilinear(prev, tx, ty + 1.0) - interpolate_bilinear(prev, tx, ty - 1.0));
                (ox, oy, interpolate_bilinear(prev, tx, ty), gx, gy)
            })
            .collect();

        let (h00, h01, h11) = template
            .iter()
            .fold((0.0f32, 0.0f32, 0.0f32), |(a, b, c), &(_, _, _, gx, gy)| {
                (a + gx * gx, b + gx * gy, c + gy * gy)
            });
        // Singular check once; the per-iteration solve below reuses H.
        solve_2x2(h00, h01, h11, 0.0, 0.0)?;

        for _ in 0..self.max_iterations {
            let (mut b0, mut b1) = (0.0f32, 0.0f32);
            for &(ox, oy, t, gx, gy) in &template {
                let e = t - interpolate_bilinear(curr, at.0 + d.0 + ox, at.1 + d.1 + oy);
                b0 += gx * e;
                b1 += gy * e;
            }
            let (dx, dy) = solve_2x2(h00, h01, h11, b0, b1)?;
            d = (d.0 + dx, d.1 + dy);
            if dx * dx + dy * dy < self.epsilon * self.epsilon {
                break;
            }
        }
        Some(d)
    }
}

/// Solve [[h00, h01], [h01, h11]] · delta = b. `None` if singular.
#[inline]
fn solve_2x2(h00: f32, h01: f32, h11: f32, b0: f32, b1: f32) -> Option<(f32, f32)> {
    let det = h00 * h11 - h01 * h01;
    if det.abs() < 1e-6 || !det.is_finite() {
        return None;
    }
    let inv = 1.0 / det;
    Some((inv * (h11 * b0 - h01 * b1), inv * (h00 * b1 - h01 * b0)))
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Software sparse flow calculator.
pub struct LkSparseFlow {
    config: SparseFlowConfig,
    tracker: PyramidalLk,
    guard: SizeGuard,
}

impl LkSparseFlow {
    pub fn new(config: SparseFlowConfig) -> Self {
        LkSparseFlow {
            tracker: PyramidalLk::from_config(&config),
            config,
            guard: SizeGuard::new(),
        }
    }

    pub fn config(&self) -> &SparseFlowConfig {
        &self.config
    }
}

impl Default for LkSparseFlow {
    fn default() -> Self {
        Self::new(SparseFlowConfig::default())
    }
}

impl SparseFlowCalculator for LkSparseFlow {
    fn backend(&self) -> Backend {
        Backend::Software
    }

    fn calculate(&mut self, prev: &Frame, curr: &Frame) -> Result<SparseFlow> {
        self.guard.check(prev, curr)?;

        let corners = self.config.detector.detect(prev);
        if corners.is_empty() {
            return Ok(SparseFlow::default());
        }
        let points: Vec<(f32, f32)> = corners.iter().map(|c| (c.x, c.y)).collect();

        let levels = self.config.pyramid_levels.max(1);
        let prev_pyr = Pyramid::build(prev, levels, self.config.pyramid_sigma);
        let curr_pyr = Pyramid::build(curr, levels, self.config.pyramid_sigma);
        let tracked = self.tracker.track(&prev_pyr, &curr_pyr, &points);

        debug!(
            corners = points.len(),
            tracked = tracked.iter().filter(|p| p.status == TrackStatus::Tracked).count(),
            "sparse flow"
        );
        Ok(SparseFlow { points: tracked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn make_test_image(w: usize, h: usize, sq_x: usize, sq_y: usize, sq_size: usize) -> Image<u8> {
        Image::from_fn(w, h, |x, y| {
            let inside = x >= sq_x && x < sq_x + sq_size && y >= sq_y && y < sq_y + sq_size;
            if inside { 200 } else { 30 }
        })
    }

    fn blob(w: usize, h: usize, cx: f32, cy: f32) -> Image<u8> {
        Image::from_fn(w, h, |x, y| {
            let r2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
            (255.0 * (-0.005 * r2).exp()) as u8
        })
    }

    fn track_one(method: LkMethod, a: &Image<u8>, b: &Image<u8>, at: (f32, f32), win: usize) -> PointFlow {
        let pa = Pyramid::build(a, 3, 1.0);
        let pb = Pyramid::build(b, 3, 1.0);
        PyramidalLk::new(win, 30, 0.01, method).track(&pa, &pb, &[at])[0]
    }

    #[test]
    fn test_zero_motion() {
        let img = make_test_image(120, 120, 40, 40, 30);
        for method in [LkMethod::ForwardAdditive, LkMethod::InverseCompositional] {
            let p = track_one(method, &img, &img, (41.0, 41.0), 5);
            assert_eq!(p.status, TrackStatus::Tracked);
            let (dx, dy) = p.displacement();
            assert!(dx.abs() < 0.5 && dy.abs() < 0.5, "{method:?}: ({dx}, {dy})");
        }
    }

    #[test]
    fn test_known_horizontal_shift() {
        let a = make_test_image(120, 120, 40, 40, 30);
        let b = make_test_image(120, 120, 43, 40, 30);
        for method in [LkMethod::ForwardAdditive, LkMethod::InverseCompositional] {
            let p = track_one(method, &a, &b, (41.0, 41.0), 7);
            assert_eq!(p.status, TrackStatus::Tracked);
            let (dx, dy) = p.displacement();
            assert!((dx - 3.0).abs() < 1.5, "{method:?}: dx = {dx}");
            assert!(dy.abs() < 1.5, "{method:?}: dy = {dy}");
        }
    }

    #[test]
    fn test_subpixel_shift() {
        let a = blob(80, 80, 40.0, 40.0);
        let b = blob(80, 80, 41.5, 40.5);
        for method in [LkMethod::ForwardAdditive, LkMethod::InverseCompositional] {
            let p = track_one(method, &a, &b, (40.0, 40.0), 7);
            assert_eq!(p.status, TrackStatus::Tracked);
            let (dx, dy) = p.displacement();
            assert!((dx - 1.5).abs() < 0.5, "{method:?}: dx = {dx}");
            assert!((dy - 0.5).abs() < 0.5, "{method:?}: dy = {dy}");
        }
    }

    #[test]
    fn test_flat_region_is_lost() {
        let img = Image::filled(60, 60, 128u8);
        let p = track_one(LkMethod::InverseCompositional, &img, &img, (30.0, 30.0), 5);
        assert_eq!(p.status, TrackStatus::Lost);
    }

    #[test]
    fn test_solve_2x2() {
        // [[2, 0], [0, 4]] · d = [2, 8] → d = (1, 2)
        let (x, y) = solve_2x2(2.0, 0.0, 4.0, 2.0, 8.0).unwrap();
        assert!((x - 1.0).abs() < 1e-6 && (y - 2.0).abs() < 1e-6);
        assert!(solve_2x2(1.0, 1.0, 1.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_calculator_tracks_detected_corners() {
        let a = make_test_image(120, 120, 40, 40, 30);
        let b = make_test_image(120, 120, 42, 41, 30);
        let mut calc = LkSparseFlow::default();
        let flow = calc.calculate(&a, &b).unwrap();
        assert!(!flow.is_empty(), "square corners should be detected");
        let tracked: Vec<_> = flow.points.iter().filter(|p| p.status == TrackStatus::Tracked).collect();
        assert!(!tracked.is_empty());
        let mean_dx = tracked.iter().map(|p| p.displacement().0).sum::<f32>() / tracked.len() as f32;
        assert!((mean_dx - 2.0).abs() < 1.5, "mean dx = {mean_dx}");
    }

    #[test]
    fn test_calculator_flat_frames_yield_no_points() {
        let img = Image::filled(32, 32, 90u8);
        let mut calc = LkSparseFlow::default();
        assert!(calc.calculate(&img, &img).unwrap().is_empty());
    }
}
