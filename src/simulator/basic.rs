// simulator/basic.rs — Frame-to-frame variants without flow.

use super::{DirectModel, Simulator, SubFrameModel, Variant};
use crate::error::Result;
use crate::image::{Frame, Image};
use crate::threshold::ThresholdConfig;

/// Direct comparison with one symmetric threshold.
#[derive(Debug, Clone)]
pub struct Basic {
    thresholds: ThresholdConfig,
}

impl Variant for Basic {
    fn name(&self) -> String {
        "basic".into()
    }

    fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    fn num_inter_frames(&self) -> usize {
        1
    }

    fn sub_frames(
        &mut self,
        _prev: &Frame,
        _curr: &Frame,
        prev_levels: Image<f32>,
        curr_levels: Image<f32>,
    ) -> Result<Box<dyn SubFrameModel>> {
        Ok(Box::new(DirectModel::new(prev_levels, curr_levels)))
    }
}

impl Simulator<Basic> {
    pub fn new(threshold: f32) -> Result<Self> {
        let thresholds = ThresholdConfig::symmetric(threshold);
        thresholds.validate()?;
        Ok(Simulator::from_variant(Basic { thresholds }))
    }
}

/// Direct comparison with separate positive and negative thresholds.
#[derive(Debug, Clone)]
pub struct BasicDifference {
    thresholds: ThresholdConfig,
}

impl Variant for BasicDifference {
    fn name(&self) -> String {
        "basic_difference".into()
    }

    fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    fn num_inter_frames(&self) -> usize {
        1
    }

    fn sub_frames(
        &mut self,
        _prev: &Frame,
        _curr: &Frame,
        prev_levels: Image<f32>,
        curr_levels: Image<f32>,
    ) -> Result<Box<dyn SubFrameModel>> {
        Ok(Box::new(DirectModel::new(prev_levels, curr_levels)))
    }
}

impl Simulator<BasicDifference> {
    pub fn new(c_pos: f32, c_neg: f32) -> Result<Self> {
        let thresholds = ThresholdConfig::asymmetric(c_pos, c_neg);
        thresholds.validate()?;
        Ok(Simulator::from_variant(BasicDifference { thresholds }))
    }
}
