//! X-ray Acquisition CLI
//!
//! Command-line interface for decoding sensor word streams and computing
//! and applying line-sensor calibrations. Raw image files are headerless
//! little-endian u16, row-major.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use xray_acquisition::{
    assembly::transpose,
    calibration::LineCalibration,
    capture::{FileConfig, MockSensor, SensorFamily, VecStream},
    demux::DemuxError,
    image::{raw, Image, ImageRole},
    metrics::{MetricsError, MetricsRegistry},
    pipeline::{self, PipelineContext, PipelineError, SensorPipeline},
};
#[cfg(feature = "metrics")]
use {std::sync::Arc, xray_acquisition::metrics::{MetricsServer, ServerError}};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[cfg(feature = "metrics")]
    #[error(transparent)]
    Server(#[from] ServerError),

    #[cfg(feature = "metrics")]
    #[error("cannot start the exporter runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Debug, Parser)]
#[command(name = "xray-acq", version, about = "X-ray sensor acquisition and calibration")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sensor family, overriding the configuration file
    #[arg(short, long, global = true, value_enum)]
    family: Option<Family>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Family {
    Pano,
    Ceph,
    Hds15,
    Hds20,
}

impl From<Family> for SensorFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Pano => SensorFamily::Pano,
            Family::Ceph => SensorFamily::Ceph,
            Family::Hds15 => SensorFamily::Hds15,
            Family::Hds20 => SensorFamily::Hds20,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a synthetic word stream
    Simulate {
        /// Output word file
        output: PathBuf,
        /// Number of lines
        #[arg(long, default_value_t = 256)]
        lines: usize,
        /// Header-free words before the first line
        #[arg(long, default_value_t = 64)]
        garbage: usize,
        /// Line carrying the half marker
        #[arg(long)]
        half_at: Option<usize>,
        #[arg(long, default_value_t = 1000)]
        level: u16,
        #[arg(long, default_value_t = 16)]
        noise: u16,
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
    /// Decode a word file into a raw image
    Decode {
        /// Input word file
        input: PathBuf,
        /// Output raw image
        output: PathBuf,
        /// Calibrate with the configured coefficient file
        #[arg(long)]
        calibrate: bool,
        /// Print Prometheus metrics after decoding
        #[arg(long)]
        metrics: bool,
    },
    /// Compute line-sensor coefficients from dark and bright scans
    LineCalibrate {
        dark: PathBuf,
        bright: PathBuf,
        /// Output coefficient file
        output: PathBuf,
        /// Inputs are line files (one row per scan line)
        #[arg(long)]
        line_files: bool,
    },
    /// Calibrate a raw line-sensor scan
    Apply {
        input: PathBuf,
        coefficients: PathBuf,
        output: PathBuf,
        /// Input is a line file (one row per scan line)
        #[arg(long)]
        line_file: bool,
        /// Subtract dark levels only
        #[arg(long)]
        dark_only: bool,
    },
    /// Decode word files and export metrics over HTTP
    #[cfg(feature = "metrics")]
    Serve {
        /// Word files, decoded in order into the output directory
        inputs: Vec<PathBuf>,
        /// Exporter port, overriding the configuration (0 picks a free port)
        #[arg(long)]
        metrics_port: Option<u16>,
        /// Calibrate with the configured coefficient file
        #[arg(long)]
        calibrate: bool,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("X-ray acquisition v{}", xray_acquisition::VERSION);

    if let Err(e) = run(cli) {
        match &e {
            CliError::Pipeline(e) => error!(kind = ?e.kind(), "{}", e),
            _ => error!("{}", e),
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => FileConfig::from_file(path).map_err(PipelineError::from)?,
        None => FileConfig::default(),
    };
    if let Some(family) = cli.family {
        let family = SensorFamily::from(family);
        if family != config.sensor.family {
            config.sensor = xray_acquisition::SensorConfig::for_family(family);
        }
    }
    #[cfg(feature = "metrics")]
    let output_config = config.output.clone();
    let context = PipelineContext::new(config).map_err(PipelineError::from)?;

    match cli.command {
        Command::Simulate {
            output,
            lines,
            garbage,
            half_at,
            level,
            noise,
            seed,
        } => {
            let mut sensor = MockSensor::new(&context.sensor, seed).with_signal(level, noise);
            if let Some(line) = half_at {
                sensor = sensor.with_half_at(line);
            }
            let mut words = sensor.garbage(garbage);
            words.extend(sensor.frame(lines));
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            std::fs::write(&output, bytes)
                .map_err(|source| PipelineError::from(raw_io(&output, source)))?;
            info!(words = words.len(), lines, path = %output.display(), "stream written");
        }

        Command::Decode {
            input,
            output,
            calibrate,
            metrics,
        } => {
            let mut pipeline = pipeline::for_context(context, None)?;
            decode_file(pipeline.as_mut(), &input, &output, calibrate)?;
            if metrics {
                print_metrics(&pipeline.snapshot())?;
            }
        }

        Command::LineCalibrate {
            dark,
            bright,
            output,
            line_files,
        } => {
            let dark = read_scan(&context, &dark, line_files)?;
            let bright = read_scan(&context, &bright, line_files)?;
            let mut pipeline = pipeline::PanoCephPipeline::new(context)?;
            let summary = pipeline.recalc(&dark, &bright)?;
            if summary.rejected_rows > 0 {
                warn!(rows = summary.rejected_rows, "rows rejected");
            }
            pipeline
                .calibration()
                .save(&output)
                .map_err(PipelineError::from)?;
        }

        Command::Apply {
            input,
            coefficients,
            output,
            line_file,
            dark_only,
        } => {
            let sensor = &context.sensor;
            let mut calibration = LineCalibration::new(
                sensor.chip_height,
                sensor.num_chips,
                sensor.family,
                &context.calibration,
            )
            .map_err(PipelineError::from)?;
            calibration
                .load(&coefficients)
                .map_err(PipelineError::from)?;
            calibration.set_dark_only(dark_only || context.calibration.dark_only);

            let scan = read_scan(&context, &input, line_file)?;
            let mut out = Image::new(scan.width(), scan.height());
            let offsets = calibration
                .apply(&scan, &mut out)
                .map_err(PipelineError::from)?;
            info!(ab = ?offsets.ab, bc = ?offsets.bc, "scan calibrated");
            raw::write_raw(&output, &out).map_err(PipelineError::from)?;
        }

        #[cfg(feature = "metrics")]
        Command::Serve {
            inputs,
            metrics_port,
            calibrate,
        } => {
            let port = metrics_port.unwrap_or(output_config.metrics_port);
            let registry = Arc::new(MetricsRegistry::new()?);
            let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
            let server = runtime.block_on(MetricsServer::bind(port, Arc::clone(&registry)))?;
            info!(addr = %server.local_addr()?, "serving metrics");
            let serving = runtime.spawn(server.run());

            let mut pipeline = pipeline::for_context(context, None)?;
            for input in &inputs {
                let name = input.file_stem().unwrap_or(input.as_os_str());
                let output = output_config.output_dir.join(name).with_extension("raw");
                // keep serving after a bad file
                if let Err(e) = decode_file(pipeline.as_mut(), input, &output, calibrate) {
                    warn!(kind = ?e.kind(), path = %input.display(), "{}", e);
                }
                registry.update(&pipeline.snapshot());
            }
            info!(files = inputs.len(), "inputs decoded, exporter still running");

            match runtime.block_on(serving) {
                Ok(result) => result?,
                Err(e) => error!("exporter task failed: {}", e),
            }
        }
    }
    Ok(())
}

/// Decodes one word file and writes the acquired or calibrated image.
fn decode_file(
    pipeline: &mut dyn SensorPipeline,
    input: &Path,
    output: &Path,
    calibrate: bool,
) -> Result<(), PipelineError> {
    let mut stream = VecStream::from_file(input).map_err(DemuxError::from)?;
    let total = stream.len();
    let report = pipeline.acquire(&mut stream)?;
    info!(
        lines = report.lines,
        images = report.images,
        ok = report.stats.ok,
        short = report.stats.short,
        long = report.stats.long,
        words = total,
        "stream decoded"
    );

    let image = if calibrate {
        pipeline.process()?
    } else {
        let (_, image) = pipeline
            .dataset()
            .with_role(ImageRole::Acquired)
            .last()
            .ok_or(PipelineError::NoData("image"))?;
        image.clone()
    };
    raw::write_raw(output, &image)?;
    info!(width = image.width(), height = image.height(), path = %output.display(), "image written");
    Ok(())
}

/// Reads a sensor-high raw scan, or a line file transposed into one.
fn read_scan(context: &PipelineContext, path: &Path, line_file: bool) -> Result<Image<u16>, PipelineError> {
    let sensor = &context.sensor;
    let rows = sensor.line_length();
    if line_file {
        let lines = raw::read_raw(path, rows)?;
        Ok(transpose(&lines, sensor.chip_height, sensor.num_chips, sensor.invert_c)?)
    } else {
        // sensor-high image: width follows from the file size
        let bytes = std::fs::metadata(path).map_err(|source| raw_io(path, source))?.len() as usize;
        let width = bytes / 2 / rows.max(1);
        Ok(raw::read_raw(path, width.max(1))?)
    }
}

fn raw_io(path: &Path, source: std::io::Error) -> xray_acquisition::image::ImageError {
    xray_acquisition::image::ImageError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn print_metrics(snapshot: &xray_acquisition::metrics::MetricsSnapshot) -> Result<(), MetricsError> {
    let registry = MetricsRegistry::new()?;
    registry.update(snapshot);
    println!("{}", registry.encode()?);
    Ok(())
}
