// simulator/dense.rs — Per-pixel interpolation along dense flow.
//
// The interval is split into N sub-steps. At α = s / N every pixel takes the
// blend of the previous frame pulled back along the flow and the current
// frame pushed forward along it:
//
//   I_α(x) = (1 - α) · prev(x - α·F(x)) + α · curr(x + (1 - α)·F(x))
//
// I_0 = prev and I_1 = curr, so N = 1 is a direct frame-to-frame compare.

use super::{validate_inter_frames, Simulator, Sample, SubFrameModel, Variant};
use crate::error::Result;
use crate::flow::{DenseFlow, DenseFlowCalculator};
use crate::image::{interpolate_bilinear, Frame, Image};
use crate::threshold::ThresholdConfig;

pub struct DenseInterpolated {
    calculator: Box<dyn DenseFlowCalculator>,
    thresholds: ThresholdConfig,
    num_inter_frames: usize,
}

impl Variant for DenseInterpolated {
    fn name(&self) -> String {
        format!("dense_interpolated_{}", self.calculator.backend())
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
        Ok(Box::new(DenseWarpModel::new(prev_levels, curr_levels, flow, self.num_inter_frames)))
    }
}

impl Simulator<DenseInterpolated> {
    pub fn new(
        calculator: Box<dyn DenseFlowCalculator>,
        thresholds: ThresholdConfig,
        num_inter_frames: usize,
    ) -> Result<Self> {
        thresholds.validate()?;
        validate_inter_frames(num_inter_frames)?;
        Ok(Simulator::from_variant(DenseInterpolated { calculator, thresholds, num_inter_frames }))
    }
}

/// Sub-steps of a frame pair warped along a dense flow field.
pub struct DenseWarpModel {
    prev: Image<f32>,
    curr: Image<f32>,
    flow: DenseFlow,
    num_steps: usize,
    /// Levels at the start of the next step.
    last: Image<f32>,
}

impl DenseWarpModel {
    pub fn new(prev: Image<f32>, curr: Image<f32>, flow: DenseFlow, num_steps: usize) -> Self {
        DenseWarpModel { last: prev.clone(), prev, curr, flow, num_steps }
    }

    /// Interpolated level image at `alpha ∈ [0, 1]`.
    pub fn interpolate(&self, alpha: f32) -> Image<f32> {
        Image::from_fn(self.prev.width(), self.prev.height(), |x, y| {
            let (u, v) = self.flow.at(x, y);
            let (xf, yf) = (x as f32, y as f32);
            let back = interpolate_bilinear(&self.prev, xf - alpha * u, yf - alpha * v);
            let fwd = interpolate_bilinear(&self.curr, xf + (1.0 - alpha) * u, yf + (1.0 - alpha) * v);
            (1.0 - alpha) * back + alpha * fwd
        })
    }
}

impl SubFrameModel for DenseWarpModel {
    fn num_steps(&self) -> usize {
        self.num_steps
    }

    fn for_each_sample(&mut self, step: usize, visit: &mut dyn FnMut(Sample)) {
        let next = if step + 1 >= self.num_steps {
            self.curr.clone()
        } else {
            self.interpolate((step + 1) as f32 / self.num_steps as f32)
        };
        for y in 0..next.height() {
            for x in 0..next.width() {
                visit(Sample { x, y, from: self.last.get(x, y), to: next.get(x, y) });
            }
        }
        self.last = next;
    }
}
