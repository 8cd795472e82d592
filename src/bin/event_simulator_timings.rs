// event-simulator-timings: run every simulator variant over the same
// sequence and report run times.
//
// Each variant gets a freshly built simulator per iteration. With
// `--run-times` the mean and standard deviation per variant are printed and
// written to `run_times.txt`; `--acc-events-frame N` additionally saves the
// accumulated events of frame N (first iteration only).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use event_simulator::config::{SimulatorConfig, SimulatorType};
use event_simulator::flow::{Backend, DenseFlowPreset};
use event_simulator::image::{FrameSize, Roi};
use event_simulator::player::{EventSink, ImageSequenceSource, NullSink, Player};
use event_simulator::simulator::EventSimulator;
use event_simulator::statistics::{EventStatistics, RunTimeStats};
use event_simulator::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "event-simulator-timings")]
#[command(about = "Benchmark all event simulator variants on one sequence")]
struct Cli {
    /// Directory of frames (sorted by file name)
    #[arg(long)]
    video: PathBuf,

    #[arg(long, default_value_t = 0)]
    width: usize,

    #[arg(long, default_value_t = 0)]
    height: usize,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Runs per variant for the mean and standard deviation
    #[arg(long, default_value_t = 10)]
    iterations: usize,

    /// Use only the first N frames (0 uses all)
    #[arg(long, default_value_t = 0)]
    num_frames: usize,

    /// Collect event statistics while simulating
    #[arg(long)]
    statistics: bool,

    /// Measure run times and write run_times.txt
    #[arg(long)]
    run_times: bool,

    /// Save the accumulated events of this frame (0 disables)
    #[arg(long, default_value_t = 0)]
    acc_events_frame: usize,

    /// Region of interest: x y width height
    #[arg(long, num_args = 4, value_names = ["X", "Y", "W", "H"])]
    roi: Option<Vec<usize>>,

    /// Where snapshots and run_times.txt go
    #[arg(long, default_value = ".")]
    output: PathBuf,

    #[arg(long, default_value_t = 20.0)]
    c_pos_diff: f32,

    #[arg(long, default_value_t = 20.0)]
    c_neg_diff: f32,

    #[arg(long, default_value_t = 2.0)]
    c_pos_dense: f32,

    #[arg(long, default_value_t = 2.0)]
    c_neg_dense: f32,

    #[arg(long, default_value_t = 10.0)]
    c_pos_sparse: f32,

    #[arg(long, default_value_t = 10.0)]
    c_neg_sparse: f32,

    #[arg(long, default_value_t = 10.0)]
    c_offset: f32,

    #[arg(long, default_value_t = 10)]
    num_inter_frames: i64,
}

impl Cli {
    fn roi(&self) -> Result<Option<Roi>> {
        match self.roi.as_deref() {
            None => Ok(None),
            Some(&[x, y, w, h]) => Ok(Some(Roi::new(x, y, w, h))),
            Some(_) => Err(Error::InvalidConfig("--roi takes four values".into())),
        }
    }

    fn source(&self) -> Result<ImageSequenceSource> {
        let mut source = ImageSequenceSource::open(&self.video)?.with_fps(self.fps)?;
        if self.width > 0 && self.height > 0 {
            source = source.with_resize(FrameSize::new(self.width, self.height));
        }
        if let Some(roi) = self.roi()? {
            source = source.with_roi(roi);
        }
        if self.num_frames > 0 {
            source = source.with_limit(self.num_frames);
        }
        Ok(source)
    }

    fn variant(&self, simulator_type: SimulatorType, c_pos: f32, c_neg: f32) -> SimulatorConfig {
        SimulatorConfig {
            c_pos,
            c_neg,
            c_offset: self.c_offset,
            num_inter_frames: self.num_inter_frames,
            // thresholds are given per family, no extra scaling
            div_factor: 1.0,
            sparse_div_factor: 1.0,
            ..SimulatorConfig::new(simulator_type)
        }
    }

    /// Every variant in reporting order. Accelerated ones only with `gpu`.
    fn variants(&self) -> Vec<SimulatorConfig> {
        use Backend::{Accelerator, Software};
        let gpu = cfg!(feature = "gpu");
        let dense = |preset, backend| SimulatorType::Dense { preset, backend };

        let mut out = vec![
            self.variant(SimulatorType::Basic, self.c_pos_diff, self.c_neg_diff),
            self.variant(SimulatorType::BasicDifference, self.c_pos_diff, self.c_neg_diff),
            self.variant(dense(DenseFlowPreset::Fast, Software), self.c_pos_dense, self.c_neg_dense),
        ];
        if gpu {
            out.push(self.variant(dense(DenseFlowPreset::Fast, Accelerator), self.c_pos_dense, self.c_neg_dense));
        }
        out.push(self.variant(dense(DenseFlowPreset::LowQuality, Software), self.c_pos_dense, self.c_neg_dense));
        out.push(self.variant(dense(DenseFlowPreset::HighQuality, Software), self.c_pos_dense, self.c_neg_dense));
        out.push(self.variant(SimulatorType::Sparse { backend: Software }, self.c_pos_sparse, self.c_neg_sparse));
        if gpu {
            out.push(self.variant(SimulatorType::Sparse { backend: Accelerator }, self.c_pos_sparse, self.c_neg_sparse));
        }
        out.push(self.variant(SimulatorType::Difference { backend: Software }, self.c_pos_diff, self.c_neg_diff));
        if gpu {
            out.push(self.variant(SimulatorType::Difference { backend: Accelerator }, self.c_pos_diff, self.c_neg_diff));
        }
        out
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Some(roi) = cli.roi()? {
        println!("ROI: {}, {}, {}, {}", roi.x, roi.y, roi.width, roi.height);
    }
    info!(
        num_inter_frames = cli.num_inter_frames,
        c_pos_diff = cli.c_pos_diff,
        c_neg_diff = cli.c_neg_diff,
        c_pos_dense = cli.c_pos_dense,
        c_neg_dense = cli.c_neg_dense,
        c_pos_sparse = cli.c_pos_sparse,
        c_neg_sparse = cli.c_neg_sparse,
        c_offset = cli.c_offset,
        "timing all variants"
    );

    std::fs::create_dir_all(&cli.output)?;
    let mut run_times_file = if cli.run_times {
        Some(BufWriter::new(File::create(cli.output.join("run_times.txt"))?))
    } else {
        None
    };

    for config in cli.variants() {
        let mut stats = RunTimeStats::new(config.build()?.name());

        for i in 0..cli.iterations {
            let mut player = Player::new(config.build()?);
            let mut source = cli.source()?;
            let mut events = EventStatistics::new();
            let mut discard = NullSink;
            let sink: &mut dyn EventSink = if cli.statistics { &mut events } else { &mut discard };

            if cli.run_times {
                stats.push(player.simulate_timed(&mut source, sink)?);
            } else {
                player.run(&mut source, sink)?;
            }
            if cli.statistics && i == 0 {
                match events.report(None) {
                    Ok(report) => {
                        println!("{}: total_events_per_pixel:\n{}", stats.name, report.total_events_per_pixel.summary())
                    }
                    Err(e) => warn!(simulator = %stats.name, error = %e, "no event statistics"),
                }
            }

            if i == 0 && cli.acc_events_frame > 0 {
                let mut snapshot_player = Player::new(config.build()?);
                let frame = snapshot_player.save_single_frame(&mut cli.source()?, cli.acc_events_frame)?;
                let path = cli.output.join(format!("{}_frame_{}.png", stats.name, cli.acc_events_frame));
                frame.save(&path)?;
                info!(path = %path.display(), "saved accumulated events frame");
            }
        }

        if let Some(file) = &mut run_times_file {
            println!("{stats}");
            writeln!(file, "{stats}")?;
        }
    }

    if let Some(file) = &mut run_times_file {
        file.flush()?;
    }
    Ok(())
}
