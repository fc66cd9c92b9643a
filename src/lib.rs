//! yoloprep: dataset preparation for darknet/YOLO detectors.
//!
//! yoloprep takes a directory of images with YOLO label files and turns it
//! into a ready-to-train dataset: derived images (resized, tiled or randomly
//! zoomed) with remapped labels, small boxes filtered out, negative samples
//! balanced, a training/validation split, anchors fitted to the data and a
//! network configuration patched to match.
//!
//! # Modules
//!
//! - [`label`]: annotation model and YOLO label file I/O
//! - [`cfg`]: network configuration document editing
//! - [`anchors`]: k-means anchor clustering
//! - [`transform`]: resize / tile / zoom workers and their worker pool
//! - [`filter`]: small-annotation filter
//! - [`sample`]: negative balancing and the dataset split
//! - [`review`]: prediction-versus-ground-truth matching
//! - [`build`]: the full pipeline
//! - [`error`]: error types

pub mod anchors;
pub mod build;
pub mod cfg;
pub mod error;
pub mod filter;
pub mod label;
pub mod review;
pub mod sample;
pub mod transform;

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::debug;
use rand::{rngs::StdRng, RngExt, SeedableRng};

pub use error::PrepError;

use build::{BuildInputs, BuildOptions, BuildOutcome};
use transform::{Cancellation, OutputFormat, ProgressFn, StageProgress};

/// The yoloprep CLI application.
#[derive(Parser)]
#[command(name = "yoloprep")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a training dataset and network configuration.
    Build(BuildArgs),
    /// Calculate anchors for a labeled image set.
    Anchors(AnchorsArgs),
    /// Compare saved predictions with ground-truth labels.
    Review(ReviewArgs),
}

/// Arguments for the build subcommand.
#[derive(clap::Args)]
struct BuildArgs {
    /// Directory of images with YOLO label files.
    #[arg(long)]
    images: PathBuf,

    /// Class names file (one name per line).
    #[arg(long)]
    names: PathBuf,

    /// Network configuration template.
    #[arg(long)]
    template: PathBuf,

    /// Output directory.
    #[arg(long)]
    output: PathBuf,

    /// YAML file with build options; flags below override it.
    #[arg(long)]
    options: Option<PathBuf>,

    /// Network width (multiple of 32).
    #[arg(long)]
    width: Option<u32>,

    /// Network height (multiple of 32).
    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    batch: Option<u32>,

    #[arg(long)]
    subdivisions: Option<u32>,

    /// Training iterations (max_batches).
    #[arg(long)]
    iterations: Option<u32>,

    /// Share of images used for training (0.5-1.0).
    #[arg(long)]
    training_fraction: Option<f64>,

    /// Use the original images as they are.
    #[arg(long)]
    do_not_resize: bool,

    /// Do not write resized copies.
    #[arg(long)]
    no_resize: bool,

    /// Cut images into network-sized tiles.
    #[arg(long)]
    tile: bool,

    /// Write random zoomed crops of large images.
    #[arg(long)]
    zoom: bool,

    /// Remove annotations with a pixel area at or below this.
    #[arg(long)]
    small_threshold: Option<u64>,

    /// Keep every negative sample.
    #[arg(long)]
    keep_all_negatives: bool,

    /// Cap validation at 10 images per class.
    #[arg(long)]
    cap_validation: bool,

    /// Use every image for both training and validation.
    #[arg(long)]
    use_all: bool,

    /// Recalculate anchors from the training boxes.
    #[arg(long)]
    recalculate_anchors: bool,

    /// Number of anchors (defaults to the template's).
    #[arg(long)]
    clusters: Option<usize>,

    /// Write counters_per_class for class imbalance compensation.
    #[arg(long)]
    class_imbalance: bool,

    /// Encoding for derived images.
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Worker threads per stage (defaults to the number of CPUs).
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for reproducible builds.
    #[arg(long)]
    seed: Option<u64>,

    /// Output format for the summary ('text' or 'json').
    #[arg(long, default_value = "text")]
    report: String,
}

/// Arguments for the anchors subcommand.
#[derive(clap::Args)]
struct AnchorsArgs {
    /// Directory of images with YOLO label files.
    #[arg(long)]
    images: PathBuf,

    /// Class names file (one name per line).
    #[arg(long)]
    names: PathBuf,

    #[arg(long, default_value_t = 416)]
    width: u32,

    #[arg(long, default_value_t = 416)]
    height: u32,

    /// Number of anchors.
    #[arg(long, default_value_t = 9)]
    clusters: usize,

    /// Maximum number of k-means restarts.
    #[arg(long, default_value_t = 100)]
    attempts: usize,

    /// Seed for reproducible anchors.
    #[arg(long)]
    seed: Option<u64>,

    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Arguments for the review subcommand.
#[derive(clap::Args)]
struct ReviewArgs {
    /// Directory of images with YOLO label files.
    #[arg(long)]
    images: PathBuf,

    /// Class names file (one name per line).
    #[arg(long)]
    names: PathBuf,

    /// Directory of saved predictions mirroring the image tree.
    #[arg(long)]
    predictions: PathBuf,

    /// Output format ('text', 'json' or 'csv').
    #[arg(long, default_value = "text")]
    output: String,

    /// Store review statistics in each image's .json companion.
    #[arg(long)]
    update_markup: bool,
}

/// Run the yoloprep CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), PrepError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build(args)) => run_build(args),
        Some(Commands::Anchors(args)) => run_anchors(args),
        Some(Commands::Review(args)) => run_review(args),
        None => {
            println!("yoloprep {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Prepare labeled image sets for darknet/YOLO training.");
            println!();
            println!("Run 'yoloprep --help' for usage information.");
            Ok(())
        }
    }
}

fn check_report_format(format: &str, supported: &[&str]) -> Result<(), PrepError> {
    if supported.contains(&format) {
        Ok(())
    } else {
        Err(PrepError::UnsupportedFormat(format!(
            "'{}' (supported: {})",
            format,
            supported.join(", ")
        )))
    }
}

/// Merge command-line overrides into options loaded from file.
fn build_options(args: &BuildArgs) -> Result<BuildOptions, PrepError> {
    let mut opts = match &args.options {
        Some(path) => BuildOptions::load(path)?,
        None => BuildOptions::default(),
    };

    if let Some(width) = args.width {
        opts.width = width;
    }
    if let Some(height) = args.height {
        opts.height = height;
    }
    if let Some(batch) = args.batch {
        opts.batch = batch;
    }
    if let Some(subdivisions) = args.subdivisions {
        opts.subdivisions = subdivisions;
    }
    if args.iterations.is_some() {
        opts.iterations = args.iterations;
    }
    if let Some(fraction) = args.training_fraction {
        opts.training_fraction = fraction;
    }
    if args.do_not_resize {
        opts.do_not_resize = true;
        opts.resize = false;
        opts.tile = false;
        opts.zoom = false;
    }
    if args.no_resize {
        opts.resize = false;
    }
    opts.tile |= args.tile;
    opts.zoom |= args.zoom;
    if let Some(threshold) = args.small_threshold {
        opts.small_annotation_threshold = threshold;
    }
    if args.keep_all_negatives {
        opts.limit_negatives = false;
    }
    opts.cap_validation |= args.cap_validation;
    opts.use_all_images |= args.use_all;
    opts.recalculate_anchors |= args.recalculate_anchors;
    if args.clusters.is_some() {
        opts.anchor_clusters = args.clusters;
    }
    opts.class_imbalance |= args.class_imbalance;
    if let Some(format) = args.format {
        opts.output_format = format;
    }
    if args.workers.is_some() {
        opts.workers = args.workers;
    }
    if args.seed.is_some() {
        opts.seed = args.seed;
    }

    Ok(opts)
}

/// Execute the build subcommand.
fn run_build(args: BuildArgs) -> Result<(), PrepError> {
    check_report_format(&args.report, &["text", "json"])?;
    let opts = build_options(&args)?;
    let inputs = BuildInputs {
        images: args.images,
        names: args.names,
        template: args.template,
        output: args.output,
    };

    let report_progress: &ProgressFn<'_> =
        &|p: &StageProgress| debug!("{}: {}/{}", p.stage, p.done, p.total);
    let outcome = build::run_build(&inputs, &opts, &Cancellation::new(), Some(report_progress))?;

    match outcome {
        BuildOutcome::Completed(summary) => match args.report.as_str() {
            "json" => {
                let json = serde_json::to_string_pretty(&summary).map_err(PrepError::ReportJson)?;
                println!("{json}");
            }
            _ => print!("{summary}"),
        },
        BuildOutcome::Cancelled => println!("Build cancelled; nothing was written."),
    }
    Ok(())
}

/// Execute the anchors subcommand.
fn run_anchors(args: AnchorsArgs) -> Result<(), PrepError> {
    check_report_format(&args.output, &["text", "json"])?;
    let opts = anchors::AnchorOptions {
        clusters: args.clusters,
        width: args.width,
        height: args.height,
        max_attempts: args.attempts,
        ..Default::default()
    };

    let names = label::io::read_names_file(&args.names)?;
    let discovery = label::io::discover_images(&args.images, names.len())?;
    let boxes: Vec<label::Annotation> = discovery
        .records
        .iter()
        .flat_map(|record| record.annotations.iter().copied())
        .collect();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::seed_from_u64(rand::rng().random::<u64>()),
    };
    let set = anchors::calculate_anchors(&boxes, names.len(), &opts, &mut rng)?;

    match args.output.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&set).map_err(PrepError::ReportJson)?;
            println!("{json}");
        }
        _ => print!("{set}"),
    }
    Ok(())
}

/// Execute the review subcommand.
fn run_review(args: ReviewArgs) -> Result<(), PrepError> {
    check_report_format(&args.output, &["text", "json", "csv"])?;

    let names = label::io::read_names_file(&args.names)?;
    let discovery = label::io::discover_images(&args.images, names.len())?;
    let mut detector = review::LabelDirDetector::new(&args.images, &args.predictions);
    let opts = review::ReviewOptions {
        update_markup: args.update_markup,
    };
    let report = review::review_images(&args.images, &discovery.records, &mut detector, &names, &opts)?;

    match args.output.as_str() {
        "json" => println!("{}", report.to_json()?),
        "csv" => report.write_csv(io::stdout().lock())?,
        _ => print!("{report}"),
    }
    Ok(())
}
