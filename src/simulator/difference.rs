// simulator/difference.rs — Sparse interpolation with reset thresholds.
//
// Same sub-step decomposition as the sparse variant. A location that fired
// once during a call needs the elevated reset threshold for every further
// crossing in that call, which damps bursts on noisy, high-contrast texture.

use super::sparse::SparseTrackModel;
use super::{validate_inter_frames, Simulator, SubFrameModel, Variant, DEFAULT_PATCH_RADIUS};
use crate::error::{Error, Result};
use crate::flow::SparseFlowCalculator;
use crate::image::{Frame, Image};
use crate::threshold::ThresholdConfig;

pub struct DifferenceInterpolated {
    calculator: Box<dyn SparseFlowCalculator>,
    thresholds: ThresholdConfig,
    num_inter_frames: usize,
    patch_radius: usize,
}

impl Variant for DifferenceInterpolated {
    fn name(&self) -> String {
        format!("difference_interpolated_{}", self.calculator.backend())
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

impl Simulator<DifferenceInterpolated> {
    /// `thresholds` must carry a reset pair.
    pub fn new(
        calculator: Box<dyn SparseFlowCalculator>,
        thresholds: ThresholdConfig,
        num_inter_frames: usize,
    ) -> Result<Self> {
        if !thresholds.has_reset() {
            return Err(Error::InvalidConfig("difference simulator needs reset thresholds".into()));
        }
        thresholds.validate()?;
        validate_inter_frames(num_inter_frames)?;
        Ok(Simulator::from_variant(DifferenceInterpolated {
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
