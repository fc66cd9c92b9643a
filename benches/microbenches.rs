//! Criterion microbenches for yoloprep's hot paths.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure:
//! - k-means anchor clustering over a synthetic set of boxes
//! - network configuration parsing and patching
//! - tile grid computation and annotation clipping

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::{rngs::StdRng, RngExt, SeedableRng};
use std::hint::black_box;

use yoloprep::anchors::{calculate_anchors, AnchorOptions};
use yoloprep::cfg::{apply_network_patch, AugmentationFlags, ConfigDocument, NetworkPatch};
use yoloprep::label::Annotation;
use yoloprep::transform::{clip_annotations, tile_grid};

const TEMPLATE: &str = "\
[net]
batch=1
subdivisions=1
width=416
height=416

[convolutional]
size=1
filters=255
activation=linear

[yolo]
mask = 3,4,5
anchors = 10,14,  23,27,  37,58,  81,82,  135,169,  344,319
classes=80
num=6

[route]
layers = -4

[convolutional]
size=1
filters=255
activation=linear

[yolo]
mask = 1,2,3
anchors = 10,14,  23,27,  37,58,  81,82,  135,169,  344,319
classes=80
num=6
";

fn synthetic_boxes(count: usize) -> Vec<Annotation> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|i| {
            let w = rng.random_range(0.02..0.6);
            let h = rng.random_range(0.02..0.6);
            Annotation::new(i % 4, 0.5, 0.5, w, h)
        })
        .collect()
}

fn bench_anchors(c: &mut Criterion) {
    let boxes = synthetic_boxes(2000);
    let opts = AnchorOptions {
        clusters: 9,
        max_attempts: 5,
        ..Default::default()
    };

    let mut group = c.benchmark_group("anchors");
    group.throughput(Throughput::Elements(boxes.len() as u64));
    group.sample_size(20);

    group.bench_function("calculate_anchors", |b| {
        let mut rng = StdRng::seed_from_u64(7);
        b.iter(|| {
            let set = calculate_anchors(black_box(&boxes), 4, &opts, &mut rng).unwrap();
            black_box(set)
        })
    });

    group.finish();
}

fn bench_cfg(c: &mut Criterion) {
    let mut group = c.benchmark_group("cfg");
    group.throughput(Throughput::Bytes(TEMPLATE.len() as u64));

    group.bench_function("parse", |b| {
        b.iter(|| {
            let doc = ConfigDocument::parse(black_box(TEMPLATE)).unwrap();
            black_box(doc)
        })
    });

    let augmentation = AugmentationFlags::default();
    group.bench_function("parse_and_patch", |b| {
        b.iter(|| {
            let mut doc = ConfigDocument::parse(black_box(TEMPLATE)).unwrap();
            apply_network_patch(
                &mut doc,
                &NetworkPatch {
                    width: 608,
                    height: 608,
                    batch: 64,
                    subdivisions: 16,
                    max_batches: 8000,
                    classes: 4,
                    augmentation: &augmentation,
                    anchors: None,
                    counters_per_class: None,
                },
            )
            .unwrap();
            black_box(doc)
        })
    });

    group.finish();
}

fn bench_tiling(c: &mut Criterion) {
    let boxes = synthetic_boxes(200);

    let mut group = c.benchmark_group("tiling");
    group.bench_function("grid_and_clip_4k", |b| {
        b.iter(|| {
            let mut kept = 0;
            for cell in tile_grid(black_box(3840), black_box(2160), 416, 416) {
                let (anns, _) = clip_annotations(&boxes, 3840, 2160, &cell.tile, 10);
                kept += anns.len();
            }
            black_box(kept)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_anchors, bench_cfg, bench_tiling);
criterion_main!(benches);
