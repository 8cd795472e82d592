// visualization.rs — Accumulated-event images for inspection and recording.
//
// One VisualizationFrame per interpolation sub-step: a flat background with
// every location that crossed a threshold during that sub-step painted by
// polarity. When a location fires both ways in one sub-step the last
// crossing wins.

use std::path::Path;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{EventBatch, Polarity};
use crate::image::FrameSize;

/// Colors used to paint visualization frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPalette {
    pub background: [u8; 3],
    pub positive: [u8; 3],
    pub negative: [u8; 3],
}

impl Default for EventPalette {
    fn default() -> Self {
        EventPalette {
            background: [128, 128, 128],
            positive: [255, 255, 255],
            negative: [0, 0, 0],
        }
    }
}

impl EventPalette {
    pub fn color(&self, polarity: Polarity) -> [u8; 3] {
        match polarity {
            Polarity::Positive => self.positive,
            Polarity::Negative => self.negative,
        }
    }
}

/// Events of one sub-step, painted on a background.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationFrame {
    /// 0-based sub-step index.
    pub step: usize,
    /// Total sub-steps of the frame pair.
    pub num_steps: usize,
    palette: EventPalette,
    image: RgbImage,
}

impl VisualizationFrame {
    pub fn new(size: FrameSize, palette: EventPalette, step: usize, num_steps: usize) -> Self {
        let image = RgbImage::from_pixel(size.width as u32, size.height as u32, Rgb(palette.background));
        VisualizationFrame { step, num_steps, palette, image }
    }

    /// Fraction of the frame interval covered once this sub-step is done.
    pub fn time_fraction(&self) -> f64 {
        (self.step + 1) as f64 / self.num_steps.max(1) as f64
    }

    /// Timestamp at the end of this sub-step within `[prev_ts, curr_ts]`.
    pub fn timestamp(&self, prev_ts: u64, curr_ts: u64) -> u64 {
        let span = curr_ts.saturating_sub(prev_ts) as f64;
        prev_ts + (span * self.time_fraction()) as u64
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width() as usize, self.image.height() as usize)
    }

    #[inline]
    pub fn paint(&mut self, x: usize, y: usize, polarity: Polarity) {
        self.image.put_pixel(x as u32, y as u32, Rgb(self.palette.color(polarity)));
    }

    pub fn paint_batch(&mut self, batch: &EventBatch) {
        for e in batch {
            self.paint(e.x as usize, e.y as usize, e.polarity);
        }
    }

    /// Overlay every painted location of `other` onto this frame.
    pub fn accumulate(&mut self, other: &VisualizationFrame) {
        let background = Rgb(other.palette.background);
        for (x, y, p) in other.image.enumerate_pixels() {
            if *p != background {
                self.image.put_pixel(x, y, *p);
            }
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        self.image.get_pixel(x as u32, y as u32).0
    }

    /// Number of painted (non-background) locations.
    pub fn painted(&self) -> usize {
        let background = Rgb(self.palette.background);
        self.image.pixels().filter(|p| **p != background).count()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.image.save(path)?;
        Ok(())
    }
}
