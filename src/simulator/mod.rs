// simulator/mod.rs — Event simulator contract and the shared engine.
//
// A simulator turns a frame pair plus its time interval into events and/or
// visualization frames. All variants run the same loop:
//
//   1. map both frames to level images (IntensityTransform)
//   2. ask the variant for a SubFrameModel: how many sub-steps the interval
//      is split into, and for each sub-step which locations to compare and
//      their level at the start and end of the sub-step
//   3. for each sample, consume crossings against the ReferenceState arena
//      (threshold.rs) and timestamp each crossing where the level passes it
//
// Variants only differ in step 2 and in their thresholds:
//
//   Basic / BasicDifference — one step, every pixel, prev → curr
//   DenseInterpolated       — N steps, every pixel, warped along dense flow
//   SparseInterpolated      — N steps, patches around tracked points
//   DifferenceInterpolated  — as sparse, with elevated reset thresholds
//
// Lifecycle: Uninitialized --setup(size)--> Ready. The reference levels are
// seeded from the first previous frame seen after setup, because setup only
// receives the size.

mod basic;
mod dense;
mod difference;
mod sparse;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::event::{Event, EventBatch, Polarity};
use crate::image::{Frame, FrameSize, Image};
use crate::threshold::{consume, IntensityTransform, ThresholdConfig};
use crate::visualization::{EventPalette, VisualizationFrame};

pub use basic::{Basic, BasicDifference};
pub use dense::{DenseInterpolated, DenseWarpModel};
pub use difference::DifferenceInterpolated;
pub use sparse::{SparseInterpolated, SparseTrackModel, DEFAULT_PATCH_RADIUS};

pub type BasicEventSimulator = Simulator<Basic>;
pub type BasicDifferenceEventSimulator = Simulator<BasicDifference>;
pub type DenseInterpolatedEventSimulator = Simulator<DenseInterpolated>;
pub type SparseInterpolatedEventSimulator = Simulator<SparseInterpolated>;
pub type DifferenceInterpolatedEventSimulator = Simulator<DifferenceInterpolated>;

/// Events are addressed with 16-bit coordinates.
pub const MAX_FRAME_SIDE: usize = u16::MAX as usize + 1;

// ---------------------------------------------------------------------------
// Public contract
// ---------------------------------------------------------------------------

/// Events and visualization frames of one frame pair, from a single pass.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub batch: EventBatch,
    pub frames: Vec<VisualizationFrame>,
}

/// A stateful frame-pair → events converter.
///
/// Not reentrant: one call completes before the next starts. Independent
/// instances share nothing and may run on different threads.
pub trait EventSimulator: Send {
    /// Variant and backend, e.g. `sparse_interpolated_cpu`.
    fn name(&self) -> String;

    /// Sub-steps per frame pair.
    fn num_inter_frames(&self) -> usize;

    /// Frame size once set up.
    fn size(&self) -> Option<FrameSize>;

    fn is_ready(&self) -> bool {
        self.size().is_some()
    }

    /// Allocate reference state for `size`. Repeating it with the same size
    /// is a no-op; a different size is rejected.
    fn setup(&mut self, size: FrameSize) -> Result<()>;

    /// Events of the interval `[prev_ts, curr_ts)`, sorted by timestamp,
    /// and the number of sub-steps used.
    fn get_events(&mut self, prev: &Frame, curr: &Frame, prev_ts: u64, curr_ts: u64) -> Result<(EventBatch, usize)>;

    /// One visualization frame per sub-step, computed lazily.
    fn get_event_frame<'a>(&'a mut self, prev: &Frame, curr: &Frame) -> Result<EventFrames<'a>>;

    /// Events and visualization frames in one pass.
    fn simulate(&mut self, prev: &Frame, curr: &Frame, prev_ts: u64, curr_ts: u64) -> Result<SimulationOutput>;
}

// ---------------------------------------------------------------------------
// Variant seam
// ---------------------------------------------------------------------------

/// One location to compare during a sub-step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub x: usize,
    pub y: usize,
    /// Level at the start of the sub-step.
    pub from: f32,
    /// Level at the end of the sub-step.
    pub to: f32,
}

/// Sub-step decomposition of one frame pair.
pub trait SubFrameModel {
    fn num_steps(&self) -> usize;

    /// Visit every sample of `step`. Steps are visited in increasing order,
    /// each exactly once.
    fn for_each_sample(&mut self, step: usize, visit: &mut dyn FnMut(Sample));
}

/// What distinguishes one simulator variant from another.
pub trait Variant: Send {
    fn name(&self) -> String;

    fn thresholds(&self) -> &ThresholdConfig;

    fn num_inter_frames(&self) -> usize;

    /// Called once when the simulator becomes ready.
    fn setup(&mut self, _size: FrameSize) -> Result<()> {
        Ok(())
    }

    fn sub_frames(
        &mut self,
        prev: &Frame,
        curr: &Frame,
        prev_levels: Image<f32>,
        curr_levels: Image<f32>,
    ) -> Result<Box<dyn SubFrameModel>>;
}

/// Every pixel, one step, previous level to current level.
pub struct DirectModel {
    prev: Image<f32>,
    curr: Image<f32>,
}

impl DirectModel {
    pub fn new(prev: Image<f32>, curr: Image<f32>) -> Self {
        DirectModel { prev, curr }
    }
}

impl SubFrameModel for DirectModel {
    fn num_steps(&self) -> usize {
        1
    }

    fn for_each_sample(&mut self, _step: usize, visit: &mut dyn FnMut(Sample)) {
        for y in 0..self.curr.height() {
            for x in 0..self.curr.width() {
                visit(Sample { x, y, from: self.prev.get(x, y), to: self.curr.get(x, y) });
            }
        }
    }
}

pub(crate) fn validate_inter_frames(num_inter_frames: usize) -> Result<()> {
    if num_inter_frames == 0 {
        return Err(Error::InvalidConfig("num_inter_frames must be at least 1".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Per-pixel reference levels, exclusively owned by one simulator.
#[derive(Debug, Clone)]
pub struct ReferenceState {
    size: FrameSize,
    levels: Vec<f32>,
    fired: Vec<bool>,
    seeded: bool,
}

impl ReferenceState {
    pub fn new(size: FrameSize) -> Self {
        ReferenceState {
            size,
            levels: vec![0.0; size.area()],
            fired: vec![false; size.area()],
            seeded: false,
        }
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    #[inline]
    pub fn level(&self, x: usize, y: usize) -> f32 {
        self.levels[self.size.index(x, y)]
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    /// Take the first previous frame's levels as the starting reference.
    /// No-op once seeded.
    fn seed(&mut self, prev_levels: &Image<f32>) {
        if self.seeded {
            return;
        }
        for y in 0..self.size.height {
            let row = prev_levels.row(y);
            let start = y * self.size.width;
            self.levels[start..start + self.size.width].copy_from_slice(row);
        }
        self.seeded = true;
    }

    /// Clear the per-call fired flags.
    fn begin_call(&mut self) {
        self.fired.fill(false);
    }

    /// Consume one sample; report each crossing with its position inside
    /// the sub-step as a fraction in [0, 1).
    #[inline]
    fn apply(&mut self, sample: Sample, thresholds: &ThresholdConfig, mut emit: impl FnMut(Polarity, f64)) {
        let idx = self.size.index(sample.x, sample.y);
        let fired = self.fired[idx];
        let Some(crossing) = consume(&mut self.levels[idx], sample.to, thresholds, fired) else {
            return;
        };
        self.fired[idx] = true;

        let span = sample.to as f64 - sample.from as f64;
        for k in 0..crossing.count {
            let fraction = if span.abs() > f64::EPSILON {
                (crossing.level(k) as f64 - sample.from as f64) / span
            } else {
                0.0
            };
            emit(crossing.polarity, fraction.clamp(0.0, 1.0 - f64::EPSILON));
        }
    }
}

/// `Uninitialized → Ready`, with `setup` the only transition.
#[derive(Debug, Clone)]
pub enum SimulatorState {
    Uninitialized,
    Ready(ReferenceState),
}

impl SimulatorState {
    pub fn size(&self) -> Option<FrameSize> {
        match self {
            SimulatorState::Uninitialized => None,
            SimulatorState::Ready(r) => Some(r.size()),
        }
    }
}

/// Maps a sub-step and a fraction inside it to nanoseconds.
#[derive(Debug, Clone, Copy)]
struct StepClock {
    prev_ts: u64,
    curr_ts: u64,
    step_ns: f64,
}

impl StepClock {
    fn new(prev_ts: u64, curr_ts: u64, num_steps: usize) -> Self {
        let step_ns = (curr_ts - prev_ts) as f64 / num_steps.max(1) as f64;
        StepClock { prev_ts, curr_ts, step_ns }
    }

    fn timestamp(&self, step: usize, fraction: f64) -> u64 {
        let offset = ((step as f64 + fraction) * self.step_ns).floor() as u64;
        (self.prev_ts + offset).clamp(self.prev_ts, self.curr_ts - 1)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The shared simulator engine, parameterized by its variant.
pub struct Simulator<V: Variant> {
    variant: V,
    intensity: IntensityTransform,
    palette: EventPalette,
    state: SimulatorState,
}

impl<V: Variant> Simulator<V> {
    pub(crate) fn from_variant(variant: V) -> Self {
        info!(simulator = %variant.name(), "created event simulator");
        Simulator {
            variant,
            intensity: IntensityTransform::default(),
            palette: EventPalette::default(),
            state: SimulatorState::Uninitialized,
        }
    }

    pub fn with_intensity(mut self, intensity: IntensityTransform) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_palette(mut self, palette: EventPalette) -> Self {
        self.palette = palette;
        self
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    /// Reference state, once set up.
    pub fn reference(&self) -> Option<&ReferenceState> {
        match &self.state {
            SimulatorState::Ready(r) => Some(r),
            SimulatorState::Uninitialized => None,
        }
    }

    /// Check preconditions, map both frames to levels and build the
    /// sub-step model.
    fn prepare(&mut self, prev: &Frame, curr: &Frame) -> Result<(&mut ReferenceState, Box<dyn SubFrameModel>)> {
        let SimulatorState::Ready(reference) = &mut self.state else {
            return Err(Error::NotInitialized);
        };
        let expected = reference.size();
        for frame in [prev, curr] {
            if frame.size() != expected {
                return Err(Error::DimensionMismatch { expected, actual: frame.size() });
            }
        }

        let prev_levels = self.intensity.level_image(prev);
        let curr_levels = self.intensity.level_image(curr);
        let seed = (!reference.is_seeded()).then(|| prev_levels.clone());
        // Reference state is only touched once the model exists, so a failed
        // flow call leaves it as it was.
        let model = self.variant.sub_frames(prev, curr, prev_levels, curr_levels)?;
        if let Some(levels) = &seed {
            reference.seed(levels);
        }
        reference.begin_call();
        Ok((reference, model))
    }
}

fn check_timestamps(prev_ts: u64, curr_ts: u64) -> Result<()> {
    if curr_ts <= prev_ts {
        return Err(Error::InvalidTimestamps { prev: prev_ts, curr: curr_ts });
    }
    Ok(())
}

fn to_event(x: usize, y: usize, timestamp: u64, polarity: Polarity) -> Event {
    Event::new(x as u16, y as u16, timestamp, polarity)
}

impl<V: Variant> EventSimulator for Simulator<V> {
    fn name(&self) -> String {
        self.variant.name()
    }

    fn num_inter_frames(&self) -> usize {
        self.variant.num_inter_frames()
    }

    fn size(&self) -> Option<FrameSize> {
        self.state.size()
    }

    fn setup(&mut self, size: FrameSize) -> Result<()> {
        if let Some(current) = self.state.size() {
            if current == size {
                return Ok(());
            }
            return Err(Error::AlreadyInitialized { current, requested: size });
        }
        if size.is_empty() || size.width > MAX_FRAME_SIDE || size.height > MAX_FRAME_SIDE {
            return Err(Error::InvalidConfig(format!("unsupported frame size {size}")));
        }
        self.variant.setup(size)?;
        self.state = SimulatorState::Ready(ReferenceState::new(size));
        info!(simulator = %self.variant.name(), %size, "simulator ready");
        Ok(())
    }

    fn get_events(&mut self, prev: &Frame, curr: &Frame, prev_ts: u64, curr_ts: u64) -> Result<(EventBatch, usize)> {
        check_timestamps(prev_ts, curr_ts)?;
        let thresholds = *self.variant.thresholds();
        let (reference, mut model) = self.prepare(prev, curr)?;
        let size = reference.size();

        let steps = model.num_steps();
        let clock = StepClock::new(prev_ts, curr_ts, steps);
        let mut events = Vec::new();
        for step in 0..steps {
            model.for_each_sample(step, &mut |s| {
                reference.apply(s, &thresholds, |polarity, fraction| {
                    events.push(to_event(s.x, s.y, clock.timestamp(step, fraction), polarity));
                });
            });
        }

        let mut batch = EventBatch::new(size, curr_ts, events);
        batch.sort_by_time();
        debug!(simulator = %self.variant.name(), sub_frames = steps, events = batch.len(), "get_events");
        Ok((batch, steps))
    }

    fn get_event_frame<'a>(&'a mut self, prev: &Frame, curr: &Frame) -> Result<EventFrames<'a>> {
        let thresholds = *self.variant.thresholds();
        let palette = self.palette;
        let (reference, model) = self.prepare(prev, curr)?;
        Ok(EventFrames { reference, model, thresholds, palette, step: 0 })
    }

    fn simulate(&mut self, prev: &Frame, curr: &Frame, prev_ts: u64, curr_ts: u64) -> Result<SimulationOutput> {
        check_timestamps(prev_ts, curr_ts)?;
        let thresholds = *self.variant.thresholds();
        let palette = self.palette;
        let (reference, mut model) = self.prepare(prev, curr)?;
        let size = reference.size();

        let steps = model.num_steps();
        let clock = StepClock::new(prev_ts, curr_ts, steps);
        let mut events = Vec::new();
        let mut frames = Vec::with_capacity(steps);
        for step in 0..steps {
            let mut frame = VisualizationFrame::new(size, palette, step, steps);
            model.for_each_sample(step, &mut |s| {
                reference.apply(s, &thresholds, |polarity, fraction| {
                    events.push(to_event(s.x, s.y, clock.timestamp(step, fraction), polarity));
                    frame.paint(s.x, s.y, polarity);
                });
            });
            frames.push(frame);
        }

        let mut batch = EventBatch::new(size, curr_ts, events);
        batch.sort_by_time();
        debug!(simulator = %self.variant.name(), sub_frames = steps, events = batch.len(), "simulate");
        Ok(SimulationOutput { batch, frames })
    }
}

// ---------------------------------------------------------------------------
// Lazy visualization frames
// ---------------------------------------------------------------------------

/// Visualization frames of one frame pair, one per sub-step.
///
/// Each `next()` advances the reference state by one sub-step. Dropping the
/// iterator early runs the remaining sub-steps without painting, so the
/// reference state always ends the call fully advanced.
pub struct EventFrames<'a> {
    reference: &'a mut ReferenceState,
    model: Box<dyn SubFrameModel>,
    thresholds: ThresholdConfig,
    palette: EventPalette,
    step: usize,
}

impl EventFrames<'_> {
    pub fn num_steps(&self) -> usize {
        self.model.num_steps()
    }
}

impl Iterator for EventFrames<'_> {
    type Item = VisualizationFrame;

    fn next(&mut self) -> Option<VisualizationFrame> {
        let steps = self.model.num_steps();
        if self.step >= steps {
            return None;
        }
        let mut frame = VisualizationFrame::new(self.reference.size(), self.palette, self.step, steps);
        let reference = &mut *self.reference;
        let thresholds = &self.thresholds;
        self.model.for_each_sample(self.step, &mut |s| {
            reference.apply(s, thresholds, |polarity, _| frame.paint(s.x, s.y, polarity));
        });
        self.step += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.model.num_steps().saturating_sub(self.step);
        (left, Some(left))
    }
}

impl ExactSizeIterator for EventFrames<'_> {}

impl Drop for EventFrames<'_> {
    fn drop(&mut self) {
        let steps = self.model.num_steps();
        let reference = &mut *self.reference;
        let thresholds = &self.thresholds;
        while self.step < steps {
            self.model.for_each_sample(self.step, &mut |s| reference.apply(s, thresholds, |_, _| {}));
            self.step += 1;
        }
    }
}
