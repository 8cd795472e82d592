// simulator/sparse.rs — Per-feature interpolation along sparse tracks.
//
// Only pixels near tracked points are compared. For a track starting at p0
// with displacement d, sub-step s ends at α = (s + 1) / N with the point at
//
//   p_α = p0 + α·d          (clamped to the frame, rounded)
//
// and every pixel q of the (2r+1)² patch around p_α is compared with the
// same warp the dense variant uses, restricted to the track's motion:
//
//   I_α(q) = (1 - α) · prev(q - α·d) + α · curr(q + (1 - α)·d)
//
// Overlapping patches visit a pixel once per sub-step. Lost tracks are
// skipped; out-of-bounds tracks are clamped rather than dropped.

use tracing::debug;

use super::{validate_inter_frames, Sample, Simulator, SubFrameModel, Variant};
use crate::error::Result;
use crate::flow::{SparseFlow, SparseFlowCalculator};
use crate::image::{interpolate_bilinear, Frame, Image};
use crate::threshold::ThresholdConfig;

/// Patch half-size around each tracked point (3×3 patch).
pub const DEFAULT_PATCH_RADIUS: usize = 1;

pub struct SparseInterpolated {
    calculator: Box<dyn SparseFlowCalculator>,
    thresholds: ThresholdConfig,
    num_inter_frames: usize,
    patch_radius: usize,
}

impl Variant for SparseInterpolated {
    fn name(&self) -> String {
        format!("sparse_interpolated_{}", self.calculator.backend())
    }

    fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    fn num_inter_frames(&self) -> usize {
        self.num_inter_frames
    }

    fn sub_frames(
        &mut self,
        prev: &Frame,
        curr: &Frame,
        prev_levels: Image<f32>,
        curr_levels: Image<f32>,
    ) -> Result<Box<dyn SubFrameModel>> {
        let flow = self.calculator.calculate(prev, curr)?;
        Ok(Box::new(SparseTrackModel::new(
            prev_levels,
            curr_levels,
            &flow,
            self.num_inter_frames,
            self.patch_radius,
        )))
    }
}

impl Simulator<SparseInterpolated> {
    pub fn new(
        calculator: Box<dyn SparseFlowCalculator>,
        thresholds: ThresholdConfig,
        num_inter_frames: usize,
    ) -> Result<Self> {
        thresholds.validate()?;
        validate_inter_frames(num_inter_frames)?;
        Ok(Simulator::from_variant(SparseInterpolated {
            calculator,
            thresholds,
            num_inter_frames,
            patch_radius: DEFAULT_PATCH_RADIUS,
        }))
    }

    pub fn with_patch_radius(mut self, radius: usize) -> Self {
        self.variant.patch_radius = radius;
        self
    }
}

/// A usable track: start position and displacement.
#[derive(Debug, Clone, Copy)]
struct Track {
    from: (f32, f32),
    delta: (f32, f32),
}

/// Sub-steps of a frame pair restricted to patches along sparse tracks.
pub struct SparseTrackModel {
    prev: Image<f32>,
    curr: Image<f32>,
    tracks: Vec<Track>,
    num_steps: usize,
    radius: usize,
    stamp: Vec<u32>,
    generation: u32,
}

impl SparseTrackModel {
    pub fn new(prev: Image<f32>, curr: Image<f32>, flow: &SparseFlow, num_steps: usize, radius: usize) -> Self {
        let tracks: Vec<Track> = flow
            .usable()
            .map(|p| Track { from: p.from, delta: p.displacement() })
            .collect();
        debug!(points = flow.len(), usable = tracks.len(), "sparse tracks");
        let area = prev.width() * prev.height();
        SparseTrackModel {
            prev,
            curr,
            tracks,
            num_steps,
            radius,
            stamp: vec![0; area],
            generation: 0,
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    fn level_at(&self, x: usize, y: usize, delta: (f32, f32), alpha: f32) -> f32 {
        if alpha <= 0.0 {
            return self.prev.get(x, y);
        }
        if alpha >= 1.0 {
            return self.curr.get(x, y);
        }
        let (xf, yf) = (x as f32, y as f32);
        let back = interpolate_bilinear(&self.prev, xf - alpha * delta.0, yf - alpha * delta.1);
        let fwd = interpolate_bilinear(&self.curr, xf + (1.0 - alpha) * delta.0, yf + (1.0 - alpha) * delta.1);
        (1.0 - alpha) * back + alpha * fwd
    }
}

impl SubFrameModel for SparseTrackModel {
    fn num_steps(&self) -> usize {
        self.num_steps
    }

    fn for_each_sample(&mut self, step: usize, visit: &mut dyn FnMut(Sample)) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.stamp.fill(0);
            self.generation = 1;
        }

        let n = self.num_steps as f32;
        let alpha0 = step as f32 / n;
        let alpha1 = (step + 1) as f32 / n;
        let (w, h) = (self.prev.width(), self.prev.height());
        let r = self.radius as isize;

        for t in 0..self.tracks.len() {
            let track = self.tracks[t];
            let px = (track.from.0 + alpha1 * track.delta.0).clamp(0.0, (w - 1) as f32).round() as isize;
            let py = (track.from.1 + alpha1 * track.delta.1).clamp(0.0, (h - 1) as f32).round() as isize;

            for y in (py - r).max(0)..=(py + r).min(h as isize - 1) {
                for x in (px - r).max(0)..=(px + r).min(w as isize - 1) {
                    let (x, y) = (x as usize, y as usize);
                    let idx = y * w + x;
                    if self.stamp[idx] == self.generation {
                        continue;
                    }
                    self.stamp[idx] = self.generation;
                    visit(Sample {
                        x,
                        y,
                        from: self.level_at(x, y, track.delta, alpha0),
                        to: self.level_at(x, y, track.delta, alpha1),
                    });
                }
            }
        }
    }
}
