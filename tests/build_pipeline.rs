//! End-to-end tests for the dataset build pipeline.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use yoloprep::build::{run_build, BuildInputs, BuildOptions, BuildOutcome, BuildSummary};
use yoloprep::cfg::ConfigDocument;
use yoloprep::label::io::read_label_file;
use yoloprep::transform::Cancellation;
use yoloprep::PrepError;

mod common;
use common::{create_project, read_lines, Project};

fn inputs(project: &Project) -> BuildInputs {
    BuildInputs {
        images: project.images.clone(),
        names: project.names.clone(),
        template: project.template.clone(),
        output: project.output.clone(),
    }
}

fn seeded() -> BuildOptions {
    BuildOptions {
        seed: Some(7),
        workers: Some(2),
        poll_interval_ms: 5,
        ..Default::default()
    }
}

fn completed(outcome: BuildOutcome) -> BuildSummary {
    match outcome {
        BuildOutcome::Completed(summary) => *summary,
        BuildOutcome::Cancelled => panic!("build was cancelled"),
    }
}

fn value(doc: &ConfigDocument, section: &str, key: &str) -> Option<String> {
    let start = doc.find_sections(section)[0];
    doc.get_value(start, key).expect("read value")
}

#[test]
fn resize_build_writes_split_manifests_and_configuration() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 8, 2, 64, 48);

    let summary = completed(
        run_build(&inputs(&project), &seeded(), &Cancellation::new(), None).expect("build"),
    );

    assert_eq!(summary.classes, 2);
    assert_eq!(summary.source_images, 10);
    assert_eq!(summary.source_negatives, 2);
    assert_eq!(summary.total_images, 10);
    assert_eq!(summary.training_images, 8);
    assert_eq!(summary.validation_images, 2);
    assert_eq!(summary.stages.len(), 1);
    assert_eq!(summary.stages[0].stage, "resize");
    assert_eq!(summary.stages[0].counters.created, 10);
    assert_eq!(summary.stages[0].counters.errors, 0);

    let train = read_lines(&project.output.join("train.txt"));
    let valid = read_lines(&project.output.join("valid.txt"));
    assert_eq!(train.len(), 8);
    assert_eq!(valid.len(), 2);
    let train_set: HashSet<&String> = train.iter().collect();
    assert!(valid.iter().all(|v| !train_set.contains(v)));
    for line in train.iter().chain(valid.iter()) {
        let path = Path::new(line);
        assert!(path.is_absolute(), "{line} should be absolute");
        assert!(path.exists(), "{line} should exist");
        assert!(path.with_extension("txt").exists());
        assert_eq!(image::image_dimensions(path).expect("read dimensions"), (416, 416));
    }

    let data = fs::read_to_string(project.output.join("animals.data")).expect("read data");
    assert!(data.starts_with("classes = 2\n"));
    assert!(data.contains("train = "));
    assert!(data.contains("backup = "));
    assert!(project.output.join("backup").is_dir());

    let cfg_text = fs::read_to_string(project.output.join("animals.cfg")).expect("read cfg");
    assert!(cfg_text.starts_with("# Generated by yoloprep"));
    let cfg = ConfigDocument::parse(&cfg_text).expect("parse cfg");
    assert_eq!(value(&cfg, "net", "width").as_deref(), Some("416"));
    assert_eq!(value(&cfg, "net", "batch").as_deref(), Some("64"));
    assert_eq!(value(&cfg, "net", "max_batches").as_deref(), Some("6000"));
    assert_eq!(value(&cfg, "yolo", "classes").as_deref(), Some("2"));
    assert!(cfg_text.contains("filters=21"));
    assert!(!cfg_text.contains("filters=255"));

    let log = read_lines(&project.output.join("build.log"));
    assert_eq!(log.len(), 10);
}

#[test]
fn derived_labels_keep_every_box() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 6, 0, 100, 80);

    let opts = BuildOptions {
        training_fraction: 1.0,
        ..seeded()
    };
    completed(run_build(&inputs(&project), &opts, &Cancellation::new(), None).expect("build"));

    let mut total = 0;
    for line in read_lines(&project.output.join("train.txt")) {
        let labels = read_label_file(&Path::new(&line).with_extension("txt"), Some(2))
            .expect("read derived label");
        for ann in &labels {
            assert!(ann.is_valid());
        }
        total += labels.len();
    }
    assert_eq!(total, 6);
}

#[test]
fn negatives_beyond_ratio_are_dropped() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 4, 12, 32, 32);

    let opts = BuildOptions {
        do_not_resize: true,
        resize: false,
        training_fraction: 0.5,
        ..seeded()
    };
    let summary =
        completed(run_build(&inputs(&project), &opts, &Cancellation::new(), None).expect("build"));

    let balance = summary.balance.expect("balance report");
    assert_eq!(balance.annotated, 4);
    assert_eq!(balance.negatives_before, 12);
    assert_eq!(balance.negatives_kept, 4);
    assert_eq!(summary.total_images, 8);
    assert!(summary.stages.is_empty());

    // Passthrough manifests point at the source images.
    let train = read_lines(&project.output.join("train.txt"));
    let source = fs::canonicalize(&project.images).expect("canonical images dir");
    assert!(train.iter().all(|line| Path::new(line).starts_with(&source)));
}

#[test]
fn recalculated_anchors_and_counters_reach_the_configuration() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 10, 0, 64, 64);

    let opts = BuildOptions {
        do_not_resize: true,
        resize: false,
        training_fraction: 1.0,
        recalculate_anchors: true,
        anchor_clusters: Some(3),
        class_imbalance: true,
        ..seeded()
    };
    let summary =
        completed(run_build(&inputs(&project), &opts, &Cancellation::new(), None).expect("build"));

    let anchors = summary.anchors.expect("anchors");
    assert_eq!(anchors.anchors.len(), 3);
    assert_eq!(anchors.counters_per_class, vec![5, 5]);

    let cfg = ConfigDocument::load(&project.output.join("animals.cfg")).expect("load cfg");
    assert_eq!(value(&cfg, "yolo", "num").as_deref(), Some("3"));
    assert_eq!(
        value(&cfg, "yolo", "counters_per_class").as_deref(),
        Some("5, 5")
    );
    assert_eq!(value(&cfg, "yolo", "anchors"), Some(anchors.format_anchors()));
}

#[test]
fn cancelled_build_writes_no_configuration() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 4, 0, 64, 48);

    let cancel = Cancellation::new();
    cancel.cancel();
    let outcome = run_build(&inputs(&project), &seeded(), &cancel, None).expect("build");

    assert!(matches!(outcome, BuildOutcome::Cancelled));
    assert!(!project.output.join("train.txt").exists());
    assert!(!project.output.join("animals.cfg").exists());
    assert!(!project.output.join("animals.data").exists());
}

#[test]
fn empty_image_tree_is_an_error() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 0, 0, 32, 32);

    let err = run_build(&inputs(&project), &seeded(), &Cancellation::new(), None).unwrap_err();
    assert!(matches!(err, PrepError::InvalidBuildParams { .. }));
    assert!(!project.output.exists());
}

#[test]
fn same_seed_gives_same_split() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let project = create_project(temp.path(), 12, 0, 32, 32);
    let opts = BuildOptions {
        do_not_resize: true,
        resize: false,
        ..seeded()
    };

    completed(run_build(&inputs(&project), &opts, &Cancellation::new(), None).expect("first"));
    let first = read_lines(&project.output.join("valid.txt"));
    completed(run_build(&inputs(&project), &opts, &Cancellation::new(), None).expect("second"));
    let second = read_lines(&project.output.join("valid.txt"));

    assert_eq!(first, second);
}
