//! Dataset build orchestration.
//!
//! discover -> resize / tile / zoom -> filter small annotations -> balance
//! negatives -> split -> anchors -> write manifests, `.data` and the
//! patched network configuration.
//!
//! Every stage after discovery checks the cancellation flag; a cancelled
//! build writes no manifests, `.data` or `.cfg`.

mod options;
mod report;

pub use options::BuildOptions;
pub use report::{BuildFiles, BuildOutcome, BuildSummary, StageSummary};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::anchors::{self, AnchorOptions};
use crate::cfg::{apply_network_patch, ConfigDocument, ConfigHeader, NetworkPatch};
use crate::error::PrepError;
use crate::filter::{self, FilterOptions};
use crate::label::io::{discover_images, read_label_file, read_names_file};
use crate::label::{Annotation, DerivedImage};
use crate::sample::{self, SplitOptions};
use crate::transform::{self, Cancellation, PoolOptions, ProgressFn, StageOutcome, TransformKind};

/// Paths a build reads from and writes to.
#[derive(Clone, Debug)]
pub struct BuildInputs {
    /// Root of the image tree; labels sit next to their images.
    pub images: PathBuf,
    /// Darknet `.names` file.
    pub names: PathBuf,
    /// Network configuration template.
    pub template: PathBuf,
    /// Output directory for derived images, manifests and configuration.
    pub output: PathBuf,
}

impl BuildInputs {
    /// Base name for the generated `.cfg` and `.data`: the names file stem.
    pub fn project_name(&self) -> String {
        self.names
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn create_dir(path: &Path) -> Result<(), PrepError> {
    fs::create_dir_all(path).map_err(|source| PrepError::OutputWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs the whole pipeline.
pub fn run_build(
    inputs: &BuildInputs,
    opts: &BuildOptions,
    cancel: &Cancellation,
    progress: Option<&ProgressFn<'_>>,
) -> Result<BuildOutcome, PrepError> {
    opts.validate()?;
    let mut template = ConfigDocument::load(&inputs.template)?;
    let class_names = read_names_file(&inputs.names)?;
    let classes = class_names.len();

    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::seed_from_u64(rand::rng().random::<u64>()),
    };
    let pool_opts = PoolOptions {
        workers: opts.workers,
        poll_interval: opts.poll_interval(),
    };

    let discovery = discover_images(&inputs.images, classes)?;
    if discovery.records.is_empty() {
        return Err(PrepError::InvalidBuildParams {
            message: format!("no labeled images found under {}", inputs.images.display()),
        });
    }
    info!(
        "found {} labeled image(s) ({} negative), {} unlabeled, {} with malformed labels",
        discovery.records.len(),
        discovery.negative_count(),
        discovery.unlabeled,
        discovery.malformed
    );

    let mut summary = BuildSummary {
        classes,
        source_images: discovery.records.len(),
        source_negatives: discovery.negative_count(),
        unlabeled: discovery.unlabeled,
        malformed: discovery.malformed,
        unreadable: discovery.unreadable,
        ..Default::default()
    };

    create_dir(&inputs.output)?;
    let output_dir = absolute(&inputs.output);
    let mut audit: Vec<String> = Vec::new();
    let mut images: Vec<DerivedImage> = Vec::new();

    if opts.do_not_resize {
        images.extend(discovery.records.iter().map(|record| DerivedImage {
            image_path: record.image_path.clone(),
            label_path: record.label_path.clone(),
            annotation_count: record.annotations.len(),
        }));
    } else {
        let settings = opts.transform_settings();
        let stages = [
            (opts.resize, TransformKind::Resize),
            (opts.tile, TransformKind::Tile),
            (opts.zoom, TransformKind::Zoom),
        ];
        for (_, kind) in stages.into_iter().filter(|(enabled, _)| *enabled) {
            let outcome = transform::run_transform(
                kind,
                &discovery.records,
                &output_dir,
                &settings,
                &pool_opts,
                &mut rng,
                cancel,
                progress,
            )?;
            if record_stage(&mut summary, &mut audit, kind.name(), &outcome) {
                return Ok(cancelled());
            }
            images.extend(outcome.images);
        }

        if opts.small_annotation_threshold > 0 {
            let filter_opts = FilterOptions {
                threshold: opts.small_annotation_threshold,
                target_width: opts.width,
                target_height: opts.height,
            };
            let outcome = filter::filter_small_annotations(
                &images,
                &filter_opts,
                &pool_opts,
                &mut rng,
                cancel,
                progress,
            )?;
            if record_stage(&mut summary, &mut audit, "filter", &outcome) {
                return Ok(cancelled());
            }
            images = outcome.images;
        }
    }

    if opts.limit_negatives {
        let (balanced, balance) = sample::balance_negatives(images, &mut rng);
        images = balanced;
        summary.balance = Some(balance);
    }
    if images.is_empty() {
        return Err(PrepError::InvalidBuildParams {
            message: "the build produced no images".to_string(),
        });
    }

    let split_opts = SplitOptions {
        training_fraction: opts.training_fraction,
        use_all: opts.use_all_images,
        cap_validation: opts.cap_validation,
        class_count: classes,
    };
    sample::validate_split_options(&split_opts)?;
    let split = sample::split_dataset(&images, &split_opts, &mut rng);
    summary.total_images = images.len();
    summary.training_images = split.training.len();
    summary.validation_images = split.validation.len();
    info!(
        "split {} image(s) into {} training and {} validation",
        images.len(),
        split.training.len(),
        split.validation.len()
    );

    let needs_training_boxes = opts.recalculate_anchors || opts.class_imbalance;
    let training_boxes = if needs_training_boxes {
        training_annotations(&split.training)
    } else {
        Vec::new()
    };
    let anchor_set = if opts.recalculate_anchors {
        let anchor_opts = AnchorOptions {
            clusters: opts
                .anchor_clusters
                .unwrap_or_else(|| match template.count_yolo_anchors() {
                    0 => AnchorOptions::default().clusters,
                    n => n,
                }),
            width: opts.width,
            height: opts.height,
            max_attempts: opts.anchor_attempts,
            time_budget: opts.anchor_time_budget(),
            ..Default::default()
        };
        Some(anchors::calculate_anchors(
            &training_boxes,
            classes,
            &anchor_opts,
            &mut rng,
        )?)
    } else {
        None
    };
    let counters = opts
        .class_imbalance
        .then(|| anchors::count_per_class(&training_boxes, classes));

    if cancel.is_cancelled() {
        return Ok(cancelled());
    }

    let project = inputs.project_name();
    let files = BuildFiles {
        cfg: output_dir.join(format!("{project}.cfg")),
        data: output_dir.join(format!("{project}.data")),
        train: output_dir.join("train.txt"),
        valid: output_dir.join("valid.txt"),
        log: output_dir.join("build.log"),
    };

    let manifest = |list: &[DerivedImage]| -> Vec<PathBuf> {
        list.iter().map(|img| absolute(&img.image_path)).collect()
    };
    sample::write_manifest(&files.train, &manifest(&split.training))?;
    sample::write_manifest(&files.valid, &manifest(&split.validation))?;

    let backup = output_dir.join("backup");
    create_dir(&backup)?;
    write_data_file(&files.data, classes, &files, &absolute(&inputs.names), &backup)?;

    let max_batches = opts.max_batches(classes);
    apply_network_patch(
        &mut template,
        &NetworkPatch {
            width: opts.width,
            height: opts.height,
            batch: opts.batch,
            subdivisions: opts.subdivisions,
            max_batches,
            classes,
            augmentation: &opts.augmentation,
            anchors: anchor_set.as_ref(),
            counters_per_class: counters.as_deref(),
        },
    )?;
    let header = ConfigHeader::new(&inputs.template, &files.cfg, &inputs.names);
    template.write(&files.cfg, &header)?;

    write_audit_log(&files.log, &audit)?;

    summary.max_batches = max_batches;
    summary.anchors = anchor_set;
    summary.files = files;
    info!(
        "build complete: {} training / {} validation image(s), configuration {}",
        summary.training_images,
        summary.validation_images,
        summary.files.cfg.display()
    );
    Ok(BuildOutcome::Completed(Box::new(summary)))
}

fn cancelled() -> BuildOutcome {
    warn!("build cancelled; no manifests or configuration written");
    BuildOutcome::Cancelled
}

/// Adds a stage's counters and audit lines; true when the stage was cancelled.
fn record_stage(
    summary: &mut BuildSummary,
    audit: &mut Vec<String>,
    stage: &'static str,
    outcome: &StageOutcome,
) -> bool {
    summary.stages.push(StageSummary {
        stage,
        counters: outcome.counters,
    });
    audit.extend(outcome.audit.iter().cloned());
    outcome.cancelled
}

/// Reads the annotations of every training image. Unreadable label files
/// are logged and skipped.
fn training_annotations(training: &[DerivedImage]) -> Vec<Annotation> {
    let mut annotations = Vec::new();
    for image in training.iter().filter(|img| img.annotation_count > 0) {
        match read_label_file(&image.label_path, None) {
            Ok(found) => annotations.extend(found),
            Err(err) => warn!("{}; ignored for anchors", err),
        }
    }
    annotations
}

/// Writes the darknet `.data` descriptor.
pub fn write_data_file(
    path: &Path,
    classes: usize,
    files: &BuildFiles,
    names: &Path,
    backup: &Path,
) -> Result<(), PrepError> {
    let text = format!(
        "classes = {}\ntrain = {}\nvalid = {}\nnames = {}\nbackup = {}\n",
        classes,
        files.train.display(),
        files.valid.display(),
        names.display(),
        backup.display()
    );
    fs::write(path, text).map_err(|source| PrepError::OutputWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn write_audit_log(path: &Path, lines: &[String]) -> Result<(), PrepError> {
    let to_err = |source| PrepError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(path).map_err(to_err)?;
    for line in lines {
        writeln!(file, "{line}").map_err(to_err)?;
    }
    Ok(())
}
