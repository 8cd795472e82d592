// error.rs — Crate-wide error type.
//
// Three families of failure, matching how the player reacts to them:
//
//   configuration  — bad selector, bad thresholds, missing backend or input.
//                    Raised at construction. Never retried.
//   precondition   — the caller broke the simulator contract (no setup,
//                    wrong frame size, non-increasing timestamps).
//   transient      — one frame could not be decoded. The player logs it,
//                    skips the frame and keeps the reference state intact.
//
// Accelerator failures during a call are fatal for that call and bubble up
// unchanged; whoever drives the stream decides whether to abort.

use std::path::PathBuf;

use thiserror::Error;

use crate::image::FrameSize;

/// Errors produced by the event simulator and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    // --- configuration ---
    #[error("simulator type does not exist: {0:?}")]
    UnknownSimulatorType(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    // --- precondition ---
    #[error("simulator used before setup()")]
    NotInitialized,

    #[error("simulator already set up for {current}, cannot re-setup for {requested}")]
    AlreadyInitialized {
        current: FrameSize,
        requested: FrameSize,
    },

    #[error("frame size mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: FrameSize,
        actual: FrameSize,
    },

    #[error("timestamps must increase strictly (prev = {prev} ns, curr = {curr} ns)")]
    InvalidTimestamps { prev: u64, curr: u64 },

    // --- transient ---
    #[error("could not decode frame {index} ({}): {reason}", path.display())]
    FrameDecode {
        index: usize,
        path: PathBuf,
        reason: String,
    },

    // --- accelerator ---
    #[error("accelerator call failed: {0}")]
    Accelerator(String),

    // --- wrapped I/O ---
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors the player may skip over without aborting the stream.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::FrameDecode { .. })
    }

    /// True for contract violations by the caller.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::NotInitialized
                | Error::AlreadyInitialized { .. }
                | Error::DimensionMismatch { .. }
                | Error::InvalidTimestamps { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_decode_errors_are_transient() {
        let decode = Error::FrameDecode {
            index: 3,
            path: PathBuf::from("frame_0003.png"),
            reason: "truncated".into(),
        };
        assert!(decode.is_transient());
        assert!(!Error::NotInitialized.is_transient());
        assert!(!Error::Accelerator("lost device".into()).is_transient());
    }

    #[test]
    fn test_precondition_classification() {
        let size = FrameSize::new(4, 4);
        let other = FrameSize::new(8, 8);
        assert!(Error::NotInitialized.is_precondition());
        assert!(Error::DimensionMismatch { expected: size, actual: other }.is_precondition());
        assert!(!Error::UnknownSimulatorType("foo".into()).is_precondition());
    }

    #[test]
    fn test_display_mentions_sizes() {
        let e = Error::DimensionMismatch {
            expected: FrameSize::new(640, 480),
            actual: FrameSize::new(320, 240),
        };
        let msg = e.to_string();
        assert!(msg.contains("640×480"), "{msg}");
        assert!(msg.contains("320×240"), "{msg}");
    }
}
