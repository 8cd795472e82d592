// event.rs — Events and event batches.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::FrameSize;

/// Sign of the level change that triggered an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }

    /// `1` for positive, `0` for negative (the usual event-file encoding).
    #[inline]
    pub fn as_bit(self) -> u8 {
        match self {
            Polarity::Positive => 1,
            Polarity::Negative => 0,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "positive"),
            Polarity::Negative => write!(f, "negative"),
        }
    }
}

/// One threshold crossing at one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub x: u16,
    pub y: u16,
    /// Nanoseconds.
    pub timestamp: u64,
    pub polarity: Polarity,
}

impl Event {
    pub fn new(x: u16, y: u16, timestamp: u64, polarity: Polarity) -> Self {
        Event { x, y, timestamp, polarity }
    }
}

/// All events of one frame pair, non-decreasing in timestamp.
///
/// Tagged with the frame size and the timestamp of the current frame so a
/// sink can handle it without knowing the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub width: u32,
    pub height: u32,
    pub timestamp: u64,
    pub events: Vec<Event>,
}

impl EventBatch {
    pub fn new(size: FrameSize, timestamp: u64, events: Vec<Event>) -> Self {
        EventBatch {
            width: size.width as u32,
            height: size.height as u32,
            timestamp,
            events,
        }
    }

    pub fn empty(size: FrameSize, timestamp: u64) -> Self {
        Self::new(size, timestamp, Vec::new())
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width as usize, self.height as usize)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn count(&self, polarity: Polarity) -> usize {
        self.events.iter().filter(|e| e.polarity == polarity).count()
    }

    /// Stable sort by timestamp.
    pub fn sort_by_time(&mut self) {
        self.events.sort_by_key(|e| e.timestamp);
    }

    pub fn is_time_ordered(&self) -> bool {
        self.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_stable() {
        let mut batch = EventBatch::new(
            FrameSize::new(4, 4),
            100,
            vec![
                Event::new(1, 0, 50, Polarity::Positive),
                Event::new(2, 0, 10, Polarity::Negative),
                Event::new(3, 0, 50, Polarity::Negative),
            ],
        );
        assert!(!batch.is_time_ordered());
        batch.sort_by_time();
        assert!(batch.is_time_ordered());
        let xs: Vec<u16> = batch.iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![2, 1, 3]);
        assert_eq!(batch.count(Polarity::Negative), 2);
        assert_eq!(batch.size(), FrameSize::new(4, 4));
    }

    #[test]
    fn test_polarity_encoding() {
        assert_eq!(Polarity::Positive.as_bit(), 1);
        assert_eq!(Polarity::Negative.sign(), -1.0);
        assert_eq!(Polarity::Negative.to_string(), "negative");
        let json = serde_json::to_string(&Event::new(1, 2, 3, Polarity::Positive)).unwrap();
        assert_eq!(json, r#"{"x":1,"y":2,"timestamp":3,"polarity":"positive"}"#);
    }
}
