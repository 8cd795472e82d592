// event-simulator-video: run one simulator over an image sequence.
//
//   event-simulator-video --video frames/ --type sparse_cpu --events out.csv
//
// Settings come from `--config <yaml>` when given, then individual flags
// override single fields.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use event_simulator::config::{SimulatorConfig, SimulatorType};
use event_simulator::event::EventBatch;
use event_simulator::flow::Backend;
use event_simulator::image::{FrameSize, Roi};
use event_simulator::player::{EventCsvWriter, EventSink, FrameDirectoryWriter, ImageSequenceSource, Player};
use event_simulator::simulator::EventSimulator;
use event_simulator::statistics::EventStatistics;
use event_simulator::visualization::VisualizationFrame;
use event_simulator::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "event-simulator-video")]
#[command(about = "Synthesize events from a directory of frames")]
struct Cli {
    /// Directory of frames (sorted by file name)
    #[arg(long)]
    video: PathBuf,

    /// YAML simulator configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulator type, e.g. basic, dense_farneback_cpu, sparse_gpu, difference_cpu
    #[arg(long = "type")]
    simulator_type: Option<SimulatorType>,

    /// Resize frames to this width (0 keeps the original size)
    #[arg(long, default_value_t = 0)]
    width: usize,

    /// Resize frames to this height (0 keeps the original size)
    #[arg(long, default_value_t = 0)]
    height: usize,

    /// Frame rate used when the directory has no timestamps.txt
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Crop every frame to x y width height
    #[arg(long, num_args = 4, value_names = ["X", "Y", "W", "H"])]
    roi: Option<Vec<usize>>,

    /// Use only the first N frames
    #[arg(long)]
    num_frames: Option<usize>,

    #[arg(long)]
    c_pos: Option<f32>,

    #[arg(long)]
    c_neg: Option<f32>,

    #[arg(long)]
    c_offset: Option<f32>,

    #[arg(long)]
    num_inter_frames: Option<i64>,

    /// Write events as CSV
    #[arg(long)]
    events: Option<PathBuf>,

    /// Write per-pixel event statistics as JSON
    #[arg(long)]
    statistics: Option<PathBuf>,

    /// Save every accumulated sub-frame image into this directory
    #[arg(long)]
    record_video: Option<PathBuf>,
}

impl Cli {
    fn simulator_config(&self) -> Result<SimulatorConfig> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::from_yaml_file(path)?,
            None => SimulatorConfig::new(SimulatorType::Difference { backend: Backend::Software }),
        };
        if let Some(t) = self.simulator_type {
            config.simulator_type = t;
        }
        if let Some(c) = self.c_pos {
            config.c_pos = c;
        }
        if let Some(c) = self.c_neg {
            config.c_neg = c;
        }
        if let Some(c) = self.c_offset {
            config.c_offset = c;
        }
        if let Some(n) = self.num_inter_frames {
            config.num_inter_frames = n;
        }
        Ok(config)
    }

    fn source(&self) -> Result<ImageSequenceSource> {
        let mut source = ImageSequenceSource::open(&self.video)?.with_fps(self.fps)?;
        if self.width > 0 && self.height > 0 {
            source = source.with_resize(FrameSize::new(self.width, self.height));
        }
        if let Some(roi) = &self.roi {
            let &[x, y, w, h] = roi.as_slice() else {
                return Err(Error::InvalidConfig("--roi takes four values".into()));
            };
            source = source.with_roi(Roi::new(x, y, w, h));
        }
        if let Some(n) = self.num_frames {
            source = source.with_limit(n);
        }
        Ok(source)
    }
}

/// Fan-out to the outputs requested on the command line.
struct Outputs {
    csv: Option<EventCsvWriter<std::io::BufWriter<std::fs::File>>>,
    statistics: Option<EventStatistics>,
    frames: Option<FrameDirectoryWriter>,
}

impl EventSink for Outputs {
    fn on_events(&mut self, batch: &EventBatch) -> Result<()> {
        if let Some(csv) = &mut self.csv {
            csv.on_events(batch)?;
        }
        if let Some(stats) = &mut self.statistics {
            stats.on_events(batch)?;
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: &VisualizationFrame, timestamp: u64) -> Result<()> {
        match &mut self.frames {
            Some(frames) => frames.on_frame(frame, timestamp),
            None => Ok(()),
        }
    }

    fn wants_frames(&self) -> bool {
        self.frames.is_some()
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(csv) = &mut self.csv {
            csv.finish()?;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.simulator_config()?;
    let simulator = config.build()?;
    info!(simulator = %simulator.name(), c_pos = config.c_pos, c_neg = config.c_neg, "simulator ready");

    let mut outputs = Outputs {
        csv: cli.events.as_ref().map(|p| EventCsvWriter::create(p)).transpose()?,
        statistics: cli.statistics.as_ref().map(|_| EventStatistics::new()),
        frames: cli.record_video.as_ref().map(|p| FrameDirectoryWriter::create(p)).transpose()?,
    };

    let mut source = cli.source()?;
    let mut player = Player::new(simulator);
    let summary = player.run(&mut source, &mut outputs)?;
    println!(
        "{}: {} frames ({} skipped), {} events",
        player.simulator().name(),
        summary.frames,
        summary.skipped,
        summary.events
    );

    if let (Some(path), Some(stats)) = (&cli.statistics, &outputs.statistics) {
        let report = stats.report(None)?;
        report.save_json(path)?;
        println!("total_events_per_pixel:\n{}", report.total_events_per_pixel.summary());
        info!(path = %path.display(), "statistics written");
    }
    Ok(())
}
