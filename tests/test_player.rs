// tests/test_player.rs — Playing image directories through a simulator
// into sinks.

use std::fs;
use std::path::Path;

use image::GrayImage;
use tempfile::TempDir;

use event_simulator::config::{SimulatorConfig, SimulatorType};
use event_simulator::error::Error;
use event_simulator::flow::{Backend, PointFlow, SparseFlow, SparseFlowCalculator, TrackStatus};
use event_simulator::image::{Frame, Image, Roi};
use event_simulator::player::{
    EventCsvWriter, EventSink, FrameDirectoryWriter, FrameSource, ImageSequenceSource, NullSink, Player, VecSource,
};
use event_simulator::simulator::SparseInterpolatedEventSimulator;
use event_simulator::statistics::{EventStatistics, StatisticsReport};
use event_simulator::threshold::{IntensityTransform, ThresholdConfig};
use event_simulator::Result;

fn linear_basic() -> Player {
    let config = SimulatorConfig {
        c_pos: 10.0,
        c_neg: 10.0,
        intensity: IntensityTransform::Linear,
        ..SimulatorConfig::new(SimulatorType::Basic)
    };
    Player::new(config.build().unwrap())
}

/// Tracks the frame centre, except on call number `fail_on` (1-based).
struct FlakyFlow {
    fail_on: usize,
    calls: usize,
}

impl SparseFlowCalculator for FlakyFlow {
    fn backend(&self) -> Backend {
        Backend::Accelerator
    }

    fn calculate(&mut self, prev: &Frame, _curr: &Frame) -> Result<SparseFlow> {
        self.calls += 1;
        if self.calls == self.fail_on {
            return Err(Error::Accelerator("device lost".into()));
        }
        let at = ((prev.width() / 2) as f32, (prev.height() / 2) as f32);
        Ok(SparseFlow { points: vec![PointFlow { from: at, to: at, status: TrackStatus::Tracked }] })
    }
}

fn flaky_sparse(fail_on: usize) -> Player {
    let sim = SparseInterpolatedEventSimulator::new(
        Box::new(FlakyFlow { fail_on, calls: 0 }),
        ThresholdConfig::symmetric(10.0),
        1,
    )
    .unwrap()
    .with_intensity(IntensityTransform::Linear);
    Player::new(Box::new(sim))
}

/// A bright bar moving right by `4 · i` pixels.
fn bar_frame(i: usize) -> GrayImage {
    GrayImage::from_fn(32, 24, |x, _| {
        let x = x as usize;
        if x >= 4 + 4 * i && x < 10 + 4 * i {
            image::Luma([220])
        } else {
            image::Luma([40])
        }
    })
}

fn write_sequence(dir: &Path, count: usize) {
    for i in 0..count {
        bar_frame(i).save(dir.join(format!("frame_{i:04}.png"))).unwrap();
    }
}

// ===== Sources =====

#[test]
fn sequence_is_read_in_name_order_with_fps_timestamps() {
    let dir = TempDir::new().unwrap();
    write_sequence(dir.path(), 3);
    fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

    let mut source = ImageSequenceSource::open(dir.path()).unwrap().with_fps(10.0).unwrap();
    assert_eq!(source.len(), 3);

    let mut stamps = Vec::new();
    while let Some(item) = source.next_frame() {
        let (frame, ts) = item.unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        stamps.push(ts);
    }
    assert_eq!(stamps, vec![0, 100_000_000, 200_000_000]);
}

#[test]
fn timestamps_file_overrides_fps() {
    let dir = TempDir::new().unwrap();
    write_sequence(dir.path(), 2);
    fs::write(dir.path().join("timestamps.txt"), "# ns\n1000\n5000\n").unwrap();

    let mut source = ImageSequenceSource::open(dir.path()).unwrap();
    assert_eq!(source.next_frame().unwrap().unwrap().1, 1_000);
    assert_eq!(source.next_frame().unwrap().unwrap().1, 5_000);
    assert!(source.next_frame().is_none());
}

#[test]
fn roi_and_limit_apply_to_every_frame() {
    let dir = TempDir::new().unwrap();
    write_sequence(dir.path(), 4);
    let mut source = ImageSequenceSource::open(dir.path())
        .unwrap()
        .with_roi(Roi::new(2, 2, 16, 8))
        .with_limit(2);
    assert_eq!(source.len(), 2);
    let (frame, _) = source.next_frame().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (16, 8));
}

#[test]
fn missing_or_empty_directory_is_reported() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(ImageSequenceSource::open(dir.path()).err(), Some(Error::MissingInput(_))));
    assert!(matches!(
        ImageSequenceSource::open(dir.path().join("nope")).err(),
        Some(Error::MissingInput(_))
    ));
}

// ===== Playback =====

#[test]
fn corrupt_frame_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_sequence(dir.path(), 4);
    fs::write(dir.path().join("frame_0002.png"), b"garbage").unwrap();

    let mut player = linear_basic();
    let mut source = ImageSequenceSource::open(dir.path()).unwrap();
    let summary = player.run(&mut source, &mut NullSink).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.pairs, 2);
    assert!(summary.events > 0);
}

#[test]
fn csv_lists_every_event() {
    let dir = TempDir::new().unwrap();
    write_sequence(dir.path(), 3);

    let mut player = linear_basic();
    let mut csv = EventCsvWriter::new(Vec::new()).unwrap();
    let summary = player.run(&mut ImageSequenceSource::open(dir.path()).unwrap(), &mut csv).unwrap();
    assert_eq!(csv.written(), summary.events);

    let text = String::from_utf8(csv.into_inner()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("x,y,timestamp,polarity"));
    let rows: Vec<Vec<u64>> = lines
        .map(|l| l.split(',').map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), summary.events);
    for row in &rows {
        assert_eq!(row.len(), 4);
        assert!(row[0] < 32 && row[1] < 24);
        assert!(row[3] <= 1);
    }
    assert!(rows.windows(2).filter(|w| w[0][2] > w[1][2]).count() == 0);
}

#[test]
fn statistics_round_trip_through_json() {
    let dir = TempDir::new().unwrap();
    let frames = dir.path().join("frames");
    fs::create_dir(&frames).unwrap();
    write_sequence(&frames, 3);

    let mut player = linear_basic();
    let mut stats = EventStatistics::new();
    let summary = player.run(&mut ImageSequenceSource::open(&frames).unwrap(), &mut stats).unwrap();
    assert_eq!(stats.total(), summary.events as u64);

    let report = stats.report(Some(2.0)).unwrap();
    assert_eq!((report.total_events_per_pixel.rows, report.total_events_per_pixel.cols), (24, 32));
    let path = dir.path().join("stats.json");
    report.save_json(&path).unwrap();
    assert_eq!(StatisticsReport::from_json_file(&path).unwrap(), report);
}

#[test]
fn recorded_frames_land_in_directory() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("video");
    let frames = vec![
        (Frame::from_gray(bar_frame(0)), 0u64),
        (Frame::from_gray(bar_frame(1)), 1_000),
    ];

    let config = SimulatorConfig {
        num_inter_frames: 4,
        ..SimulatorConfig::new("dense_farneback_cpu".parse().unwrap())
    };
    let mut player = Player::new(config.build().unwrap());
    let mut writer = FrameDirectoryWriter::create(&out).unwrap();
    assert!(writer.wants_frames());
    player.run(&mut VecSource::new(frames), &mut writer).unwrap();

    assert_eq!(writer.saved(), 4);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 4);
}

#[test]
fn push_rejects_time_going_backwards() {
    let mut player = linear_basic();
    let f: Frame = Image::filled(8, 8, 50);
    player.push(f.clone(), 100, &mut NullSink).unwrap();
    assert!(matches!(
        player.push(f.clone(), 100, &mut NullSink),
        Err(Error::InvalidTimestamps { prev: 100, curr: 100 })
    ));
    // The previous frame is kept, so a later one still pairs.
    player.push(f, 200, &mut NullSink).unwrap();
    assert_eq!(player.summary().pairs, 1);
}

#[test]
fn failed_pair_keeps_previous_frame() {
    let mut player = flaky_sparse(1);
    player.push(Image::filled(8, 8, 50), 0, &mut NullSink).unwrap();
    assert!(matches!(
        player.push(Image::filled(8, 8, 90), 100, &mut NullSink),
        Err(Error::Accelerator(_))
    ));
    // Pairs with the frame at 0, not treated as a new first frame.
    player.push(Image::filled(8, 8, 70), 200, &mut NullSink).unwrap();
    let summary = player.summary();
    assert_eq!(summary.pairs, 1);
    assert_eq!(summary.events, 2 * 9);
}

#[test]
fn failed_snapshot_keeps_previous_frame() {
    let frames: Vec<(Frame, u64)> = (0..3).map(|i| (Image::filled(8, 8, 50 + 20 * i as u8), i as u64 * 100)).collect();
    let mut player = flaky_sparse(2);
    assert!(matches!(
        player.save_single_frame(&mut VecSource::new(frames), 2).err(),
        Some(Error::Accelerator(_))
    ));
    player.push(Image::filled(8, 8, 80), 300, &mut NullSink).unwrap();
    assert_eq!(player.summary().pairs, 2);
}

#[test]
fn single_frame_snapshot_accumulates_one_pair() {
    let frames: Vec<(Frame, u64)> = (0..4).map(|i| (Frame::from_gray(bar_frame(i)), i as u64 * 1_000)).collect();
    let mut player = linear_basic();
    let snapshot = player.save_single_frame(&mut VecSource::new(frames.clone()), 2).unwrap();
    // The bar's leading and trailing edges, 4 pixels wide each, all rows.
    assert_eq!(snapshot.painted(), 2 * 4 * 24);

    let mut short = linear_basic();
    assert!(matches!(
        short.save_single_frame(&mut VecSource::new(frames[..2].to_vec()), 3).err(),
        Some(Error::MissingInput(_))
    ));
    assert!(matches!(
        linear_basic().save_single_frame(&mut VecSource::new(frames), 0).err(),
        Some(Error::InvalidConfig(_))
    ));
}
