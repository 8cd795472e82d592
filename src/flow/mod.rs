// flow/mod.rs — Optical flow between two frames.
//
// Two capability axes, each behind its own trait:
//
//   SparseFlowCalculator — picks a bounded set of points on the previous
//                          frame and returns where each one moved.
//   DenseFlowCalculator  — returns one displacement per pixel.
//
// Each axis has a software backend in this module tree and an accelerator
// backend in `crate::gpu` (cargo feature `gpu`). Backends of the same axis
// are interchangeable: same output shape, approximately equal numbers.
//
// Calculators are `&mut self` because they remember the frame size of the
// first pair they see (later pairs must match) and, for the accelerator,
// own their device context for their whole lifetime.

pub mod dense;
pub mod sparse;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::{Frame, FrameSize, Image};

pub use dense::{DenseFlowConfig, DenseFlowPreset, LkDenseFlow};
pub use sparse::{LkSparseFlow, SparseFlowConfig};

// ---------------------------------------------------------------------------
// Flow data
// ---------------------------------------------------------------------------

/// Outcome of tracking one point from the previous to the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    /// Successfully tracked to a new position.
    Tracked,
    /// The solver diverged or the window had no texture.
    Lost,
    /// The tracked position fell outside the frame.
    OutOfBounds,
}

/// Motion of a single tracked point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointFlow {
    /// Position in the previous frame.
    pub from: (f32, f32),
    /// Position in the current frame.
    pub to: (f32, f32),
    pub status: TrackStatus,
}

impl PointFlow {
    #[inline]
    pub fn displacement(&self) -> (f32, f32) {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }

    /// Position after a fraction `alpha ∈ [0, 1]` of the motion.
    #[inline]
    pub fn position_at(&self, alpha: f32) -> (f32, f32) {
        let (dx, dy) = self.displacement();
        (self.from.0 + alpha * dx, self.from.1 + alpha * dy)
    }
}

/// Sparse flow: one entry per detected point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseFlow {
    pub points: Vec<PointFlow>,
}

impl SparseFlow {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points that were not lost (tracked or clamped later by the caller).
    pub fn usable(&self) -> impl Iterator<Item = &PointFlow> {
        self.points.iter().filter(|p| p.status != TrackStatus::Lost)
    }
}

/// Dense flow: horizontal and vertical displacement per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseFlow {
    pub u: Image<f32>,
    pub v: Image<f32>,
}

impl DenseFlow {
    /// Zero flow of the given size.
    pub fn zeros(size: FrameSize) -> Self {
        DenseFlow {
            u: Image::new(size.width, size.height),
            v: Image::new(size.width, size.height),
        }
    }

    /// Uniform flow (used by tests and as a translation prior).
    pub fn uniform(size: FrameSize, u: f32, v: f32) -> Self {
        DenseFlow {
            u: Image::filled(size.width, size.height, u),
            v: Image::filled(size.width, size.height, v),
        }
    }

    pub fn size(&self) -> FrameSize {
        self.u.size()
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> (f32, f32) {
        (self.u.get(x, y), self.v.get(x, y))
    }

    /// Mean displacement over the whole field.
    pub fn mean(&self) -> (f32, f32) {
        let n = self.size().area().max(1) as f32;
        let su: f32 = self.u.pixels().map(|(_, _, v)| v).sum();
        let sv: f32 = self.v.pixels().map(|(_, _, v)| v).sum();
        (su / n, sv / n)
    }
}

/// A computed motion estimate between two frames.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowField {
    Dense(DenseFlow),
    Sparse(SparseFlow),
}

impl FlowField {
    pub fn capability(&self) -> Capability {
        match self {
            FlowField::Dense(_) => Capability::Dense,
            FlowField::Sparse(_) => Capability::Sparse,
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Sparse,
    Dense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Software,
    Accelerator,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Software => write!(f, "cpu"),
            Backend::Accelerator => write!(f, "gpu"),
        }
    }
}

/// Per-point motion between two frames.
pub trait SparseFlowCalculator: Send {
    fn backend(&self) -> Backend;

    fn calculate(&mut self, prev: &Frame, curr: &Frame) -> Result<SparseFlow>;

    fn compute(&mut self, prev: &Frame, curr: &Frame) -> Result<FlowField> {
        self.calculate(prev, curr).map(FlowField::Sparse)
    }
}

/// Per-pixel motion between two frames.
pub trait DenseFlowCalculator: Send {
    fn backend(&self) -> Backend;

    fn calculate(&mut self, prev: &Frame, curr: &Frame) -> Result<DenseFlow>;

    fn compute(&mut self, prev: &Frame, curr: &Frame) -> Result<FlowField> {
        self.calculate(prev, curr).map(FlowField::Dense)
    }
}

// ---------------------------------------------------------------------------
// Size bookkeeping shared by every backend
// ---------------------------------------------------------------------------

/// Remembers the frame size of the first pair and rejects mismatches.
#[derive(Debug, Clone, Default)]
pub struct SizeGuard {
    size: Option<FrameSize>,
}

impl SizeGuard {
    pub fn new() -> Self {
        SizeGuard { size: None }
    }

    pub fn size(&self) -> Option<FrameSize> {
        self.size
    }

    /// Check a frame pair. The first call fixes the size.
    pub fn check(&mut self, prev: &Frame, curr: &Frame) -> Result<FrameSize> {
        let expected = match self.size {
            Some(s) => s,
            None => {
                let s = prev.size();
                if s.is_empty() {
                    return Err(Error::InvalidConfig(format!("empty frame {s}")));
                }
                self.size = Some(s);
                s
            }
        };
        for frame in [prev, curr] {
            if frame.size() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: frame.size(),
                });
            }
        }
        Ok(expected)
    }
}
