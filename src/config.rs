// config.rs — Simulator selection and parameters.
//
// A `SimulatorConfig` is what the binaries load from YAML and override with
// CLI flags. `build()` is the only place that knows how selector strings map
// onto variants, backends and threshold scaling:
//
//   basic               c_pos (symmetric)
//   basic_difference    (c_pos, c_neg)
//   dense_*             (c_pos, c_neg) / div_factor
//   sparse_*            (c_pos, c_neg) / sparse_div_factor
//   difference_*        (c_pos, c_neg), reset (c_pos + c_offset, c_neg + c_offset)

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::flow::{Backend, DenseFlowCalculator, DenseFlowConfig, DenseFlowPreset, LkDenseFlow, LkSparseFlow, SparseFlowCalculator, SparseFlowConfig};
use crate::simulator::{
    BasicDifferenceEventSimulator, BasicEventSimulator, DenseInterpolatedEventSimulator,
    DifferenceInterpolatedEventSimulator, EventSimulator, SparseInterpolatedEventSimulator,
    DEFAULT_PATCH_RADIUS,
};
use crate::threshold::{IntensityTransform, ThresholdConfig};
use crate::visualization::EventPalette;

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Which simulator variant to build, and on which backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SimulatorType {
    Basic,
    BasicDifference,
    Dense { preset: DenseFlowPreset, backend: Backend },
    Sparse { backend: Backend },
    Difference { backend: Backend },
}

impl SimulatorType {
    /// Every selector in canonical spelling.
    pub const ALL: [&'static str; 10] = [
        "basic",
        "basic_difference",
        "dense_farneback_cpu",
        "dense_farneback_gpu",
        "dense_dis_lq",
        "dense_dis_hq",
        "sparse_cpu",
        "sparse_gpu",
        "difference_cpu",
        "difference_gpu",
    ];

    pub fn backend(&self) -> Backend {
        match *self {
            SimulatorType::Basic | SimulatorType::BasicDifference => Backend::Software,
            SimulatorType::Dense { backend, .. }
            | SimulatorType::Sparse { backend }
            | SimulatorType::Difference { backend } => backend,
        }
    }
}

impl FromStr for SimulatorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use Backend::{Accelerator, Software};
        Ok(match s.trim() {
            "basic" => SimulatorType::Basic,
            "basic_difference" => SimulatorType::BasicDifference,
            "dense_farneback_cpu" => SimulatorType::Dense { preset: DenseFlowPreset::Fast, backend: Software },
            "dense_farneback_gpu" => SimulatorType::Dense { preset: DenseFlowPreset::Fast, backend: Accelerator },
            "dense_dis_lq" => SimulatorType::Dense { preset: DenseFlowPreset::LowQuality, backend: Software },
            "dense_dis_hq" => SimulatorType::Dense { preset: DenseFlowPreset::HighQuality, backend: Software },
            "sparse_cpu" => SimulatorType::Sparse { backend: Software },
            "sparse_gpu" | "sparce_gpu" => SimulatorType::Sparse { backend: Accelerator },
            "difference_cpu" => SimulatorType::Difference { backend: Software },
            "difference_gpu" => SimulatorType::Difference { backend: Accelerator },
            other => return Err(Error::UnknownSimulatorType(other.to_string())),
        })
    }
}

impl TryFrom<String> for SimulatorType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SimulatorType> for String {
    fn from(t: SimulatorType) -> String {
        t.to_string()
    }
}

impl fmt::Display for SimulatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorType::Basic => write!(f, "basic"),
            SimulatorType::BasicDifference => write!(f, "basic_difference"),
            SimulatorType::Dense { preset: DenseFlowPreset::Fast, backend } => write!(f, "dense_farneback_{backend}"),
            SimulatorType::Dense { preset: DenseFlowPreset::LowQuality, .. } => write!(f, "dense_dis_lq"),
            SimulatorType::Dense { preset: DenseFlowPreset::HighQuality, .. } => write!(f, "dense_dis_hq"),
            SimulatorType::Sparse { backend } => write!(f, "sparse_{backend}"),
            SimulatorType::Difference { backend } => write!(f, "difference_{backend}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Flow calculator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub sparse: SparseFlowConfig,
    /// Overrides the preset picked by the selector.
    pub dense: Option<DenseFlowConfig>,
}

/// Everything needed to construct one simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub simulator_type: SimulatorType,
    pub c_pos: f32,
    pub c_neg: f32,
    /// Added to the base thresholds to get the reset thresholds.
    pub c_offset: f32,
    /// Signed so that negative values from a file are reported, not wrapped.
    pub num_inter_frames: i64,
    /// Threshold divisor for dense variants.
    pub div_factor: f32,
    /// Threshold divisor for the sparse variant.
    pub sparse_div_factor: f32,
    pub intensity: IntensityTransform,
    pub patch_radius: usize,
    pub flow: FlowConfig,
    pub palette: EventPalette,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            simulator_type: SimulatorType::Basic,
            c_pos: 20.0,
            c_neg: 20.0,
            c_offset: 10.0,
            num_inter_frames: 10,
            div_factor: 1.0,
            sparse_div_factor: 2.0,
            intensity: IntensityTransform::Log,
            patch_radius: DEFAULT_PATCH_RADIUS,
            flow: FlowConfig::default(),
            palette: EventPalette::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn new(simulator_type: SimulatorType) -> Self {
        SimulatorConfig { simulator_type, ..Default::default() }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// `num_inter_frames` as a validated count.
    pub fn inter_frames(&self) -> Result<usize> {
        if self.num_inter_frames < 1 {
            return Err(Error::InvalidConfig(format!(
                "num_inter_frames must be at least 1, got {}",
                self.num_inter_frames
            )));
        }
        usize::try_from(self.num_inter_frames)
            .map_err(|_| Error::InvalidConfig(format!("num_inter_frames too large: {}", self.num_inter_frames)))
    }

    fn divisor(name: &str, value: f32) -> Result<f32> {
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(Error::InvalidConfig(format!("{name} must be positive, got {value}")))
        }
    }

    /// Thresholds the selected variant runs with.
    pub fn thresholds(&self) -> Result<ThresholdConfig> {
        let base = ThresholdConfig::asymmetric(self.c_pos, self.c_neg);
        let thresholds = match self.simulator_type {
            SimulatorType::Basic => ThresholdConfig::symmetric(self.c_pos),
            SimulatorType::BasicDifference => base,
            SimulatorType::Dense { .. } => base.scaled_down(Self::divisor("div_factor", self.div_factor)?),
            SimulatorType::Sparse { .. } => {
                base.scaled_down(Self::divisor("sparse_div_factor", self.sparse_div_factor)?)
            }
            SimulatorType::Difference { .. } => ThresholdConfig::with_offset(self.c_pos, self.c_neg, self.c_offset),
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    fn dense_config(&self, preset: DenseFlowPreset) -> DenseFlowConfig {
        self.flow.dense.unwrap_or_else(|| DenseFlowConfig::preset(preset))
    }

    /// Validate and construct the simulator.
    pub fn build(&self) -> Result<Box<dyn EventSimulator>> {
        let thresholds = self.thresholds()?;
        let n = self.inter_frames()?;

        let sim: Box<dyn EventSimulator> = match self.simulator_type {
            SimulatorType::Basic => Box::new(
                BasicEventSimulator::new(thresholds.c_pos)?
                    .with_intensity(self.intensity)
                    .with_palette(self.palette),
            ),
            SimulatorType::BasicDifference => Box::new(
                BasicDifferenceEventSimulator::new(thresholds.c_pos, thresholds.c_neg)?
                    .with_intensity(self.intensity)
                    .with_palette(self.palette),
            ),
            SimulatorType::Dense { preset, backend } => {
                let calculator = dense_calculator(backend, self.dense_config(preset))?;
                Box::new(
                    DenseInterpolatedEventSimulator::new(calculator, thresholds, n)?
                        .with_intensity(self.intensity)
                        .with_palette(self.palette),
                )
            }
            SimulatorType::Sparse { backend } => {
                let calculator = sparse_calculator(backend, self.flow.sparse)?;
                Box::new(
                    SparseInterpolatedEventSimulator::new(calculator, thresholds, n)?
                        .with_patch_radius(self.patch_radius)
                        .with_intensity(self.intensity)
                        .with_palette(self.palette),
                )
            }
            SimulatorType::Difference { backend } => {
                let calculator = sparse_calculator(backend, self.flow.sparse)?;
                Box::new(
                    DifferenceInterpolatedEventSimulator::new(calculator, thresholds, n)?
                        .with_patch_radius(self.patch_radius)
                        .with_intensity(self.intensity)
                        .with_palette(self.palette),
                )
            }
        };
        Ok(sim)
    }
}

// ---------------------------------------------------------------------------
// Backend factories
// ---------------------------------------------------------------------------

/// Sparse flow calculator on the requested backend.
pub fn sparse_calculator(backend: Backend, config: SparseFlowConfig) -> Result<Box<dyn SparseFlowCalculator>> {
    match backend {
        Backend::Software => Ok(Box::new(LkSparseFlow::new(config))),
        Backend::Accelerator => accelerated_sparse(config),
    }
}

/// Dense flow calculator on the requested backend.
pub fn dense_calculator(backend: Backend, config: DenseFlowConfig) -> Result<Box<dyn DenseFlowCalculator>> {
    match backend {
        Backend::Software => Ok(Box::new(LkDenseFlow::new(config))),
        Backend::Accelerator => accelerated_dense(config),
    }
}

#[cfg(feature = "gpu")]
fn accelerated_sparse(config: SparseFlowConfig) -> Result<Box<dyn SparseFlowCalculator>> {
    Ok(Box::new(crate::gpu::GpuSparseFlow::new(config)?))
}

#[cfg(feature = "gpu")]
fn accelerated_dense(config: DenseFlowConfig) -> Result<Box<dyn DenseFlowCalculator>> {
    Ok(Box::new(crate::gpu::GpuDenseFlow::new(config)?))
}

#[cfg(not(feature = "gpu"))]
fn accelerated_sparse(_config: SparseFlowConfig) -> Result<Box<dyn SparseFlowCalculator>> {
    Err(Error::BackendUnavailable("built without the `gpu` feature".into()))
}

#[cfg(not(feature = "gpu"))]
fn accelerated_dense(_config: DenseFlowConfig) -> Result<Box<dyn DenseFlowCalculator>> {
    Err(Error::BackendUnavailable("built without the `gpu` feature".into()))
}
