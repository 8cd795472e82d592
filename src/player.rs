// player.rs — Drives a simulator over a frame stream.
//
//   FrameSource ──(frame, ts)──▶ Player ──▶ EventSimulator ──▶ EventSink
//
// The player owns the simulator and keeps the previous frame. It performs
// the Uninitialized → Ready transition on the first frame, rejects
// non-increasing timestamps, and skips frames that fail to decode without
// touching the simulator (the next good frame pairs with the last good one).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::EventBatch;
use crate::image::{Frame, FrameSize, Roi};
use crate::simulator::EventSimulator;
use crate::visualization::{EventPalette, VisualizationFrame};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Ordered `(frame, timestamp_ns)` pairs.
pub trait FrameSource {
    /// `None` at end of stream; `Some(Err)` for a frame that failed.
    fn next_frame(&mut self) -> Option<Result<(Frame, u64)>>;
}

/// In-memory source, mostly for tests and benchmarks.
pub struct VecSource {
    frames: std::vec::IntoIter<(Frame, u64)>,
}

impl VecSource {
    pub fn new(frames: Vec<(Frame, u64)>) -> Self {
        VecSource { frames: frames.into_iter() }
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Option<Result<(Frame, u64)>> {
        self.frames.next().map(Ok)
    }
}

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "pgm", "ppm", "tiff"];

/// A directory of image files, read in file name order.
///
/// Timestamps come from `timestamps.txt` in the directory (one nanosecond
/// value per line, in file order) when present, else from `fps`.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    timestamps: Option<Vec<u64>>,
    fps: f64,
    roi: Option<Roi>,
    resize: Option<FrameSize>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::MissingInput(format!("{} is not a directory", dir.display())));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(Error::MissingInput(format!("no images in {}", dir.display())));
        }

        let ts_path = dir.join("timestamps.txt");
        let timestamps = if ts_path.is_file() {
            let text = fs::read_to_string(&ts_path)?;
            let values = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(|l| {
                    l.parse::<u64>()
                        .map_err(|e| Error::InvalidConfig(format!("{}: bad timestamp {l:?}: {e}", ts_path.display())))
                })
                .collect::<Result<Vec<u64>>>()?;
            if values.len() < paths.len() {
                return Err(Error::InvalidConfig(format!(
                    "{} has {} timestamps for {} images",
                    ts_path.display(),
                    values.len(),
                    paths.len()
                )));
            }
            Some(values)
        } else {
            None
        };

        info!(dir = %dir.display(), frames = paths.len(), "opened image sequence");
        Ok(ImageSequenceSource { paths, timestamps, fps: 30.0, roi: None, resize: None, next: 0 })
    }

    pub fn with_fps(mut self, fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::InvalidConfig(format!("fps must be positive, got {fps}")));
        }
        self.fps = fps;
        Ok(self)
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn with_resize(mut self, size: FrameSize) -> Self {
        self.resize = Some(size);
        self
    }

    /// Keep only the first `limit` frames.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.paths.truncate(limit);
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn timestamp(&self, index: usize) -> u64 {
        match &self.timestamps {
            Some(ts) => ts[index],
            None => (index as f64 * 1e9 / self.fps).round() as u64,
        }
    }

    fn load(&self, index: usize) -> Result<Frame> {
        let path = &self.paths[index];
        let decode_error = |reason: String| Error::FrameDecode { index, path: path.clone(), reason };

        let mut gray = image::open(path).map_err(|e| decode_error(e.to_string()))?.into_luma8();
        if let Some(size) = self.resize {
            gray = image::imageops::resize(
                &gray,
                size.width as u32,
                size.height as u32,
                image::imageops::FilterType::Triangle,
            );
        }
        let frame = Frame::from_gray(gray);
        match self.roi {
            Some(roi) if !roi.fits(frame.size()) => {
                Err(decode_error(format!("roi {roi:?} does not fit frame {}", frame.size())))
            }
            Some(roi) => Ok(frame.crop(&roi)),
            None => Ok(frame),
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Result<(Frame, u64)>> {
        if self.next >= self.paths.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.load(index).map(|f| (f, self.timestamp(index))))
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Consumer of simulator output.
pub trait EventSink {
    fn on_events(&mut self, batch: &EventBatch) -> Result<()>;

    /// One call per sub-step frame, tagged with the current frame timestamp.
    fn on_frame(&mut self, _frame: &VisualizationFrame, _timestamp: u64) -> Result<()> {
        Ok(())
    }

    /// Whether this sink wants visualization frames at all.
    fn wants_frames(&self) -> bool {
        false
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_events(&mut self, _batch: &EventBatch) -> Result<()> {
        Ok(())
    }
}

impl EventSink for Vec<Box<dyn EventSink>> {
    fn on_events(&mut self, batch: &EventBatch) -> Result<()> {
        self.iter_mut().try_for_each(|s| s.on_events(batch))
    }

    fn on_frame(&mut self, frame: &VisualizationFrame, timestamp: u64) -> Result<()> {
        self.iter_mut()
            .filter(|s| s.wants_frames())
            .try_for_each(|s| s.on_frame(frame, timestamp))
    }

    fn wants_frames(&self) -> bool {
        self.iter().any(|s| s.wants_frames())
    }

    fn finish(&mut self) -> Result<()> {
        self.iter_mut().try_for_each(|s| s.finish())
    }
}

/// Writes `x,y,timestamp,polarity` lines (polarity 1/0).
pub struct EventCsvWriter<W: Write> {
    out: W,
    written: usize,
}

impl EventCsvWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> EventCsvWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "x,y,timestamp,polarity")?;
        Ok(EventCsvWriter { out, written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for EventCsvWriter<W> {
    fn on_events(&mut self, batch: &EventBatch) -> Result<()> {
        for e in batch {
            writeln!(self.out, "{},{},{},{}", e.x, e.y, e.timestamp, e.polarity.as_bit())?;
        }
        self.written += batch.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Saves every visualization frame as `<timestamp>_<step>.png`.
pub struct FrameDirectoryWriter {
    dir: PathBuf,
    saved: usize,
}

impl FrameDirectoryWriter {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FrameDirectoryWriter { dir, saved: 0 })
    }

    pub fn saved(&self) -> usize {
        self.saved
    }
}

impl EventSink for FrameDirectoryWriter {
    fn on_events(&mut self, _batch: &EventBatch) -> Result<()> {
        Ok(())
    }

    fn on_frame(&mut self, frame: &VisualizationFrame, timestamp: u64) -> Result<()> {
        let path = self.dir.join(format!("{timestamp:020}_{:03}.png", frame.step));
        frame.save(path)?;
        self.saved += 1;
        Ok(())
    }

    fn wants_frames(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub frames: usize,
    pub skipped: usize,
    pub pairs: usize,
    pub events: usize,
}

/// Owns a simulator and feeds it frame pairs in order.
pub struct Player {
    simulator: Box<dyn EventSimulator>,
    last: Option<(Frame, u64)>,
    summary: PlaybackSummary,
}

impl Player {
    pub fn new(simulator: Box<dyn EventSimulator>) -> Self {
        Player { simulator, last: None, summary: PlaybackSummary::default() }
    }

    pub fn simulator(&self) -> &dyn EventSimulator {
        self.simulator.as_ref()
    }

    pub fn summary(&self) -> PlaybackSummary {
        self.summary
    }

    /// Feed one frame. The first frame only sets up the simulator.
    pub fn push(&mut self, frame: Frame, timestamp: u64, sink: &mut dyn EventSink) -> Result<()> {
        self.summary.frames += 1;
        let Some((prev, prev_ts)) = self.last.take() else {
            self.simulator.setup(frame.size())?;
            self.last = Some((frame, timestamp));
            return Ok(());
        };
        if timestamp <= prev_ts {
            self.last = Some((prev, prev_ts));
            return Err(Error::InvalidTimestamps { prev: prev_ts, curr: timestamp });
        }

        match self.play_pair(&prev, prev_ts, &frame, timestamp, sink) {
            Ok(events) => {
                self.summary.events += events;
                self.summary.pairs += 1;
                self.last = Some((frame, timestamp));
                Ok(())
            }
            Err(e) => {
                // The next frame still pairs with the last one that went through.
                self.last = Some((prev, prev_ts));
                Err(e)
            }
        }
    }

    fn play_pair(
        &mut self,
        prev: &Frame,
        prev_ts: u64,
        frame: &Frame,
        timestamp: u64,
        sink: &mut dyn EventSink,
    ) -> Result<usize> {
        if sink.wants_frames() {
            let output = self.simulator.simulate(prev, frame, prev_ts, timestamp)?;
            sink.on_events(&output.batch)?;
            for f in &output.frames {
                sink.on_frame(f, timestamp)?;
            }
            Ok(output.batch.len())
        } else {
            let (batch, _) = self.simulator.get_events(prev, frame, prev_ts, timestamp)?;
            sink.on_events(&batch)?;
            Ok(batch.len())
        }
    }

    /// Play a whole source into `sink`.
    pub fn run(&mut self, source: &mut dyn FrameSource, sink: &mut dyn EventSink) -> Result<PlaybackSummary> {
        while let Some(item) = source.next_frame() {
            match item {
                Ok((frame, ts)) => self.push(frame, ts, sink)?,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "skipping frame");
                    self.summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        sink.finish()?;
        info!(
            simulator = %self.simulator.name(),
            frames = self.summary.frames,
            skipped = self.summary.skipped,
            events = self.summary.events,
            "playback finished"
        );
        Ok(self.summary)
    }

    /// Play a whole source and return the wall-clock time in milliseconds.
    pub fn simulate_timed(&mut self, source: &mut dyn FrameSource, sink: &mut dyn EventSink) -> Result<f64> {
        let start = Instant::now();
        self.run(source, sink)?;
        let ms = start.elapsed().as_secs_f64() * 1e3;
        debug!(simulator = %self.simulator.name(), ms, "timed run");
        Ok(ms)
    }

    /// Play the source up to frame `index` and return all events of the
    /// pair ending there, accumulated into one image.
    pub fn save_single_frame(&mut self, source: &mut dyn FrameSource, index: usize) -> Result<VisualizationFrame> {
        if index == 0 {
            return Err(Error::InvalidConfig("snapshot index must be at least 1".into()));
        }
        let mut seen = 0;
        while let Some(item) = source.next_frame() {
            let (frame, ts) = match item {
                Ok(pair) => pair,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "skipping frame");
                    self.summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if seen < index {
                self.push(frame, ts, &mut NullSink)?;
                seen += 1;
                continue;
            }

            let Some((prev, prev_ts)) = self.last.take() else {
                return Err(Error::NotInitialized);
            };
            if ts <= prev_ts {
                self.last = Some((prev, prev_ts));
                return Err(Error::InvalidTimestamps { prev: prev_ts, curr: ts });
            }
            let (batch, _) = match self.simulator.get_events(&prev, &frame, prev_ts, ts) {
                Ok(out) => out,
                Err(e) => {
                    self.last = Some((prev, prev_ts));
                    return Err(e);
                }
            };
            let mut snapshot = VisualizationFrame::new(frame.size(), EventPalette::default(), 0, 1);
            snapshot.paint_batch(&batch);
            self.summary.frames += 1;
            self.summary.events += batch.len();
            self.summary.pairs += 1;
            self.last = Some((frame, ts));
            return Ok(snapshot);
        }
        Err(Error::MissingInput(format!("stream ended before frame {index}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Polarity};

    #[test]
    fn test_csv_writer() {
        let mut w = EventCsvWriter::new(Vec::new()).unwrap();
        let batch = EventBatch::new(
            FrameSize::new(4, 4),
            10,
            vec![Event::new(1, 2, 5, Polarity::Positive), Event::new(3, 0, 7, Polarity::Negative)],
        );
        w.on_events(&batch).unwrap();
        assert_eq!(w.written(), 2);
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(text, "x,y,timestamp,polarity\n1,2,5,1\n3,0,7,0\n");
    }

    #[test]
    fn test_vec_source() {
        let mut src = VecSource::new(vec![(Frame::new(2, 2), 0), (Frame::new(2, 2), 5)]);
        assert_eq!(src.next_frame().unwrap().unwrap().1, 0);
        assert_eq!(src.next_frame().unwrap().unwrap().1, 5);
        assert!(src.next_frame().is_none());
    }
}
