// threshold.rs — Log-intensity transform and threshold-crossing helper.
//
// Every simulator variant shares one accumulation rule. For a location with
// reference level R and a new level L:
//
//   Δ = L - R,   polarity = sign(Δ)
//   first crossing at |Δ| ≥ c_first          (closed bound)
//   further crossings every c_then
//   count = 1 + ⌊(|Δ| - c_first) / c_then⌋
//   R    += sign(Δ) · (c_first + (count - 1) · c_then)
//
// R only ever moves by whole thresholds, so the residual |L - R| < c_then
// carries into the next sub-step or call and no crossing is lost or counted
// twice. Without reset thresholds c_first = c_then = c_pos or c_neg.
//
// With reset thresholds (difference variant) a location that already fired
// during the current call needs the elevated threshold for its first
// crossing, and every crossing after the first one in a burst also uses
// the elevated threshold.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::Polarity;
use crate::image::{Frame, Image};

/// Relative slack on threshold comparisons. A delta that is an exact
/// multiple of the threshold in real numbers must count as a crossing even
/// after float rounding of the log transform.
pub const CROSSING_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Intensity transform
// ---------------------------------------------------------------------------

/// How raw 8-bit intensities map onto the level scale thresholds act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityTransform {
    /// `L = 255 / ln(256) · ln(1 + I)`: log-compressed, same 0..255 range.
    #[default]
    Log,
    /// `L = I`.
    Linear,
}

impl IntensityTransform {
    #[inline]
    pub fn apply(self, intensity: u8) -> f32 {
        match self {
            IntensityTransform::Log => {
                let scale = 255.0 / 256.0f32.ln();
                scale * (1.0 + intensity as f32).ln()
            }
            IntensityTransform::Linear => intensity as f32,
        }
    }

    /// Level image of a frame, through a 256-entry lookup table.
    pub fn level_image(self, frame: &Frame) -> Image<f32> {
        let lut: Vec<f32> = (0..=255u8).map(|i| self.apply(i)).collect();
        frame.map(|v| lut[v as usize])
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Elevated thresholds used after a location fired.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetThresholds {
    pub c_pos: f32,
    pub c_neg: f32,
}

/// Contrast thresholds in level units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub c_pos: f32,
    pub c_neg: f32,
    #[serde(default)]
    pub reset: Option<ResetThresholds>,
}

impl ThresholdConfig {
    pub fn symmetric(c: f32) -> Self {
        Self::asymmetric(c, c)
    }

    pub fn asymmetric(c_pos: f32, c_neg: f32) -> Self {
        ThresholdConfig { c_pos, c_neg, reset: None }
    }

    /// Base `(c_pos, c_neg)` with reset thresholds `c + c_offset`.
    pub fn with_offset(c_pos: f32, c_neg: f32, c_offset: f32) -> Self {
        ThresholdConfig {
            c_pos,
            c_neg,
            reset: Some(ResetThresholds { c_pos: c_pos + c_offset, c_neg: c_neg + c_offset }),
        }
    }

    /// Divide every threshold by `factor`.
    pub fn scaled_down(&self, factor: f32) -> Self {
        ThresholdConfig {
            c_pos: self.c_pos / factor,
            c_neg: self.c_neg / factor,
            reset: self.reset.map(|r| ResetThresholds { c_pos: r.c_pos / factor, c_neg: r.c_neg / factor }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{name} must be a positive number, got {v}")))
            }
        };
        positive("c_pos", self.c_pos)?;
        positive("c_neg", self.c_neg)?;
        if let Some(r) = self.reset {
            positive("c_pos_reset", r.c_pos)?;
            positive("c_neg_reset", r.c_neg)?;
            if r.c_pos < self.c_pos || r.c_neg < self.c_neg {
                return Err(Error::InvalidConfig(format!(
                    "reset thresholds ({}, {}) must not be below base thresholds ({}, {})",
                    r.c_pos, r.c_neg, self.c_pos, self.c_neg
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn base(&self, polarity: Polarity) -> f32 {
        match polarity {
            Polarity::Positive => self.c_pos,
            Polarity::Negative => self.c_neg,
        }
    }

    /// Elevated threshold, or the base one when no reset pair is set.
    #[inline]
    pub fn elevated(&self, polarity: Polarity) -> f32 {
        match (self.reset, polarity) {
            (Some(r), Polarity::Positive) => r.c_pos,
            (Some(r), Polarity::Negative) => r.c_neg,
            (None, p) => self.base(p),
        }
    }

    pub fn has_reset(&self) -> bool {
        self.reset.is_some()
    }
}

// ---------------------------------------------------------------------------
// Crossing
// ---------------------------------------------------------------------------

/// A burst of crossings at one location within one sub-step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub polarity: Polarity,
    pub count: u32,
    /// Reference level before the burst.
    pub start_level: f32,
    /// Threshold of the first crossing.
    pub first: f32,
    /// Threshold of every later crossing.
    pub then: f32,
}

impl Crossing {
    /// Level at which the `k`-th crossing (0-based) happens.
    pub fn level(&self, k: u32) -> f32 {
        let distance = self.first + k as f32 * self.then;
        self.start_level + self.polarity.sign() * distance
    }

    /// Total distance the reference moved.
    pub fn consumed(&self) -> f32 {
        self.first + self.count.saturating_sub(1) as f32 * self.then
    }
}

/// Compare `value` against `reference`, emit crossings and advance the
/// reference by whole thresholds.
pub fn consume(
    reference: &mut f32,
    value: f32,
    thresholds: &ThresholdConfig,
    already_fired: bool,
) -> Option<Crossing> {
    let delta = value as f64 - *reference as f64;
    if delta == 0.0 || !delta.is_finite() {
        return None;
    }
    let polarity = if delta > 0.0 { Polarity::Positive } else { Polarity::Negative };
    let magnitude = delta.abs();

    let first = if already_fired { thresholds.elevated(polarity) } else { thresholds.base(polarity) };
    let then = thresholds.elevated(polarity);

    let first64 = first as f64;
    if magnitude < first64 * (1.0 - CROSSING_EPSILON) {
        return None;
    }
    let then64 = then as f64;
    let extra = ((magnitude - first64) / then64 + CROSSING_EPSILON).floor().max(0.0);
    let count = 1 + extra.min(u32::MAX as f64 - 1.0) as u32;

    let crossing = Crossing { polarity, count, start_level: *reference, first, then };
    *reference += polarity.sign() * crossing.consumed();
    Some(crossing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiple_counts() {
        let thr = ThresholdConfig::symmetric(10.0);
        let mut r = 100.0;
        let c = consume(&mut r, 120.0, &thr, false).unwrap();
        assert_eq!(c.polarity, Polarity::Positive);
        assert_eq!(c.count, 2);
        assert_eq!(r, 120.0);
        assert_eq!(c.level(0), 110.0);
        assert_eq!(c.level(1), 120.0);
    }

    #[test]
    fn test_below_threshold_keeps_reference() {
        let thr = ThresholdConfig::symmetric(10.0);
        let mut r = 50.0;
        assert!(consume(&mut r, 59.9, &thr, false).is_none());
        assert_eq!(r, 50.0);
        assert!(consume(&mut r, 50.0, &thr, false).is_none());
    }

    #[test]
    fn test_residual_carried() {
        let thr = ThresholdConfig::asymmetric(10.0, 4.0);
        let mut r = 100.0;
        let c = consume(&mut r, 89.0, &thr, false).unwrap();
        assert_eq!(c.polarity, Polarity::Negative);
        assert_eq!(c.count, 2);
        assert_eq!(r, 92.0);
        assert!((r - 89.0f32).abs() < 4.0);
    }

    #[test]
    fn test_reset_threshold_after_fire() {
        let thr = ThresholdConfig::with_offset(10.0, 10.0, 5.0);
        // First crossing at 10, then every 15.
        let mut r = 0.0;
        let c = consume(&mut r, 24.0, &thr, false).unwrap();
        assert_eq!(c.count, 1);
        assert_eq!(r, 10.0);
        // Already fired: needs 15 for the next one.
        assert!(consume(&mut r, 24.0, &thr, true).is_none());
        let c = consume(&mut r, 25.0, &thr, true).unwrap();
        assert_eq!(c.count, 1);
        assert_eq!(r, 25.0);
    }

    #[test]
    fn test_validate() {
        assert!(ThresholdConfig::symmetric(1.0).validate().is_ok());
        assert!(ThresholdConfig::symmetric(0.0).validate().is_err());
        assert!(ThresholdConfig::asymmetric(1.0, -2.0).validate().is_err());
        assert!(ThresholdConfig::asymmetric(f32::NAN, 2.0).validate().is_err());
        assert!(ThresholdConfig::with_offset(10.0, 10.0, -1.0).validate().is_err());
        assert!(ThresholdConfig::with_offset(10.0, 10.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_scaled_down() {
        let thr = ThresholdConfig::with_offset(20.0, 10.0, 10.0).scaled_down(2.0);
        assert_eq!((thr.c_pos, thr.c_neg), (10.0, 5.0));
        assert_eq!(thr.elevated(Polarity::Positive), 15.0);
        assert_eq!(thr.elevated(Polarity::Negative), 10.0);
    }

    #[test]
    fn test_log_transform_range() {
        let t = IntensityTransform::Log;
        assert_eq!(t.apply(0), 0.0);
        assert!((t.apply(255) - 255.0).abs() < 1e-3);
        assert!(t.apply(10) > 10.0);
        let frame = Image::from_fn(3, 1, |x, _| (x * 100) as u8);
        let levels = IntensityTransform::Linear.level_image(&frame);
        assert_eq!(levels.as_slice(), &[0.0, 100.0, 200.0]);
    }
}
