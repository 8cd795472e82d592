// event-simulator: synthesizes event-camera output from frame sequences.
//
// A simulator keeps a per-pixel reference log-intensity and emits an event
// whenever the signal drifts a contrast threshold away from it. Between two
// frames the signal is sampled at several sub-frame steps, either directly
// or along optical flow, so events carry sub-frame timestamps.

pub mod error;
pub mod image;
pub mod convolution;
pub mod gradient;
pub mod pyramid;
pub mod corners;
pub mod flow;

pub mod threshold;
pub mod event;
pub mod visualization;
pub mod simulator;
pub mod config;
pub mod player;
pub mod statistics;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use config::{SimulatorConfig, SimulatorType};
pub use error::{Error, Result};
pub use event::{Event, EventBatch, Polarity};
pub use image::{Frame, FrameSize};
pub use simulator::{EventSimulator, SimulationOutput};
pub use threshold::{IntensityTransform, ThresholdConfig};
pub use visualization::VisualizationFrame;
