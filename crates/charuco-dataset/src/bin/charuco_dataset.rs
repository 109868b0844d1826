//! charuco-dataset CLI: turn a ChArUco capture into a NeRF-style dataset.

use charuco_dataset::aruco::DictionaryId;
use charuco_dataset::transforms::Convention;
use charuco_dataset::{Pipeline, ProcessConfig};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "charuco-dataset")]
#[command(about = "Process images of a scene with a ChArUco board into a NeRF-style dataset")]
#[command(version)]
struct Cli {
    /// Directory of input images.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Output directory (images, camera.json, poses.json, transforms.json).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON config; command-line options override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera model to use.
    #[arg(long)]
    camera_type: Option<String>,

    /// Number of 2x downscaling levels.
    #[arg(long)]
    num_downscales: Option<u32>,

    /// Reuse <output-dir>/images and only run detection, calibration and conversion.
    #[arg(long)]
    skip_image_processing: bool,

    /// Portion of the image to crop: top bottom left right, each in [0, 1).
    #[arg(long, num_args = 4, value_names = ["TOP", "BOTTOM", "LEFT", "RIGHT"])]
    crop_factor: Option<Vec<f64>>,

    /// Portion of the image to crop from the bottom.
    #[arg(long)]
    crop_bottom: Option<f64>,

    /// Board squares along X.
    #[arg(long)]
    squares_x: Option<u32>,

    /// Board squares along Y.
    #[arg(long)]
    squares_y: Option<u32>,

    /// Square side length (poses come out in this unit).
    #[arg(long)]
    square_length: Option<f64>,

    /// Marker side length, same unit as --square-length.
    #[arg(long)]
    marker_length: Option<f64>,

    /// Marker dictionary, e.g. GEN_4X4_50.
    #[arg(long)]
    dictionary: Option<DictionaryId>,

    /// Pose convention of transforms.json (opengl or opencv).
    #[arg(long)]
    convention: Option<Convention>,

    /// Detection threads (0 = all cores).
    #[arg(long)]
    workers: Option<usize>,

    /// Debug-level logging.
    #[arg(long, short)]
    verbose: bool,

    /// JSON log lines (tracing builds only).
    #[arg(long)]
    json_log: bool,
}

impl Cli {
    fn to_config(&self) -> CliResult<ProcessConfig> {
        let mut cfg = match &self.config {
            Some(path) => ProcessConfig::load_json(path)?,
            None => ProcessConfig::default(),
        };
        if let Some(data) = &self.data {
            cfg.data = data.clone();
        }
        if let Some(out) = &self.output_dir {
            cfg.output_dir = out.clone();
        }
        if let Some(camera_type) = &self.camera_type {
            cfg.camera_type = camera_type.clone();
        }
        if let Some(n) = self.num_downscales {
            cfg.num_downscales = n;
        }
        cfg.skip_image_processing |= self.skip_image_processing;
        if let Some(crop) = &self.crop_factor {
            cfg.crop_factor = [crop[0], crop[1], crop[2], crop[3]];
        }
        if let Some(crop_bottom) = self.crop_bottom {
            cfg.crop_bottom = crop_bottom;
        }
        if let Some(v) = self.squares_x {
            cfg.board.squares_x = v;
        }
        if let Some(v) = self.squares_y {
            cfg.board.squares_y = v;
        }
        if let Some(v) = self.square_length {
            cfg.board.square_length = v;
        }
        if let Some(v) = self.marker_length {
            cfg.board.marker_length = v;
        }
        if let Some(v) = self.dictionary {
            cfg.board.dictionary = v;
        }
        if let Some(v) = self.convention {
            cfg.converter.convention = v;
        }
        if let Some(v) = self.workers {
            cfg.workers = v;
        }
        Ok(cfg)
    }
}

#[cfg(feature = "tracing")]
fn init_logging(_verbose: bool, json: bool) {
    charuco_dataset::core::init_tracing(json);
    let _ = tracing_log::LogTracer::init();
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool, _json: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = charuco_dataset::core::init_with_level(level);
}

fn run(cli: &Cli) -> CliResult<()> {
    let cfg = cli.to_config()?.validate()?;
    let summary = Pipeline::new(cfg).run()?;

    println!("All done");
    print!("{summary}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_log);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
