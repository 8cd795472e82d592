// statistics.rs — Per-pixel event statistics and run-time summaries.
//
// EventStatistics counts events per pixel and polarity over a stream and
// turns the counts into per-second rates. The JSON layout uses the same
// keys as the analysis scripts that compare simulated against recorded
// events:
//
//   total_events_per_pixel, pos_events_per_pixel, neg_events_per_pixel,
//   total_events_per_pixel_per_second, pos_..., neg_...
//
// each a row-major matrix `{ rows, cols, data }`.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{EventBatch, Polarity};
use crate::image::FrameSize;
use crate::player::EventSink;

/// Row-major matrix of per-pixel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl PixelMatrix {
    fn from_counts(size: FrameSize, counts: &[u32], scale: f64) -> Self {
        PixelMatrix {
            rows: size.height,
            cols: size.width,
            data: counts.iter().map(|&c| c as f64 * scale).collect(),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.data)
    }
}

/// Mean, population standard deviation and variance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub var: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Summary::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Summary { mean, std: var.sqrt(), var }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " mean: {}\n std: {}\n var: {}", self.mean, self.std, self.var)
    }
}

/// Serialized statistics of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub seconds: f64,
    pub total_events_per_pixel: PixelMatrix,
    pub pos_events_per_pixel: PixelMatrix,
    pub neg_events_per_pixel: PixelMatrix,
    pub total_events_per_pixel_per_second: PixelMatrix,
    pub pos_events_per_pixel_per_second: PixelMatrix,
    pub neg_events_per_pixel_per_second: PixelMatrix,
}

impl StatisticsReport {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Side-by-side summaries of a recorded and a simulated stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub events_per_pixel_real: Summary,
    pub events_per_pixel_sim: Summary,
    pub events_per_pixel_per_second_real: Summary,
    pub events_per_pixel_per_second_sim: Summary,
}

/// Compare two reports. Their frame sizes must match.
pub fn compare(real: &StatisticsReport, sim: &StatisticsReport) -> Result<Comparison> {
    let (r, s) = (&real.total_events_per_pixel, &sim.total_events_per_pixel);
    if (r.rows, r.cols) != (s.rows, s.cols) {
        return Err(Error::DimensionMismatch {
            expected: FrameSize::new(r.cols, r.rows),
            actual: FrameSize::new(s.cols, s.rows),
        });
    }
    Ok(Comparison {
        events_per_pixel_real: r.summary(),
        events_per_pixel_sim: s.summary(),
        events_per_pixel_per_second_real: real.total_events_per_pixel_per_second.summary(),
        events_per_pixel_per_second_sim: sim.total_events_per_pixel_per_second.summary(),
    })
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total_events_per_pixel_sim:\n{}", self.events_per_pixel_sim)?;
        writeln!(f, "total_events_per_pixel_real:\n{}", self.events_per_pixel_real)?;
        writeln!(f, "total_events_per_pixel_per_second_sim:\n{}", self.events_per_pixel_per_second_sim)?;
        write!(f, "total_events_per_pixel_per_second_real:\n{}", self.events_per_pixel_per_second_real)
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Per-pixel event counts over a stream.
#[derive(Debug, Clone, Default)]
pub struct EventStatistics {
    size: Option<FrameSize>,
    pos: Vec<u32>,
    neg: Vec<u32>,
    first_ts: Option<u64>,
    last_ts: Option<u64>,
}

impl EventStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch. The first batch fixes the frame size.
    pub fn record(&mut self, batch: &EventBatch) -> Result<()> {
        let size = batch.size();
        match self.size {
            None => {
                self.size = Some(size);
                self.pos = vec![0; size.area()];
                self.neg = vec![0; size.area()];
            }
            Some(expected) if expected != size => {
                return Err(Error::DimensionMismatch { expected, actual: size });
            }
            Some(_) => {}
        }

        for e in batch {
            let idx = size.index(e.x as usize, e.y as usize);
            match e.polarity {
                Polarity::Positive => self.pos[idx] += 1,
                Polarity::Negative => self.neg[idx] += 1,
            }
            self.first_ts = Some(self.first_ts.map_or(e.timestamp, |t| t.min(e.timestamp)));
            self.last_ts = Some(self.last_ts.map_or(e.timestamp, |t| t.max(e.timestamp)));
        }
        Ok(())
    }

    pub fn size(&self) -> Option<FrameSize> {
        self.size
    }

    pub fn positive(&self) -> u64 {
        self.pos.iter().map(|&c| c as u64).sum()
    }

    pub fn negative(&self) -> u64 {
        self.neg.iter().map(|&c| c as u64).sum()
    }

    pub fn total(&self) -> u64 {
        self.positive() + self.negative()
    }

    /// Time between the first and the last event.
    pub fn seconds(&self) -> f64 {
        match (self.first_ts, self.last_ts) {
            (Some(a), Some(b)) => (b - a) as f64 * 1e-9,
            _ => 0.0,
        }
    }

    /// Report over the observed span, or over `seconds` when given.
    pub fn report(&self, seconds: Option<f64>) -> Result<StatisticsReport> {
        let Some(size) = self.size else {
            return Err(Error::MissingInput("no events recorded".into()));
        };
        let seconds = seconds.unwrap_or_else(|| self.seconds());
        let rate = if seconds > 0.0 { 1.0 / seconds } else { 0.0 };
        let total: Vec<u32> = self.pos.iter().zip(&self.neg).map(|(p, n)| p + n).collect();

        Ok(StatisticsReport {
            seconds,
            total_events_per_pixel: PixelMatrix::from_counts(size, &total, 1.0),
            pos_events_per_pixel: PixelMatrix::from_counts(size, &self.pos, 1.0),
            neg_events_per_pixel: PixelMatrix::from_counts(size, &self.neg, 1.0),
            total_events_per_pixel_per_second: PixelMatrix::from_counts(size, &total, rate),
            pos_events_per_pixel_per_second: PixelMatrix::from_counts(size, &self.pos, rate),
            neg_events_per_pixel_per_second: PixelMatrix::from_counts(size, &self.neg, rate),
        })
    }
}

impl EventSink for EventStatistics {
    fn on_events(&mut self, batch: &EventBatch) -> Result<()> {
        self.record(batch)
    }
}

// ---------------------------------------------------------------------------
// Run times
// ---------------------------------------------------------------------------

/// Wall-clock run times of one simulator over repeated runs, in ms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTimeStats {
    pub name: String,
    pub samples: Vec<f64>,
}

impl RunTimeStats {
    pub fn new(name: impl Into<String>) -> Self {
        RunTimeStats { name: name.into(), samples: Vec::new() }
    }

    pub fn push(&mut self, ms: f64) {
        self.samples.push(ms);
    }

    pub fn mean(&self) -> f64 {
        Summary::of(&self.samples).mean
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        Summary::of(&self.samples).std
    }
}

impl fmt::Display for RunTimeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: run time: mean: {:.6}ms std. dev.: {:.6}", self.name, self.mean(), self.std_dev())
    }
}
