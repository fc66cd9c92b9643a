#![allow(dead_code)]

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};
use yoloprep::label::Annotation;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Boxes that lie fully inside the image.
pub fn arb_inner_annotation(classes: usize) -> impl Strategy<Value = Annotation> {
    (0..classes, 0.01f64..0.4, 0.01f64..0.4).prop_flat_map(|(class_index, w, h)| {
        (
            Just(class_index),
            (w / 2.0)..(1.0 - w / 2.0),
            (h / 2.0)..(1.0 - h / 2.0),
            Just(w),
            Just(h),
        )
            .prop_map(|(c, cx, cy, w, h)| Annotation::new(c, cx, cy, w, h))
    })
}

/// Boxes anywhere, possibly hanging over the image edge.
pub fn arb_any_annotation(classes: usize) -> impl Strategy<Value = Annotation> {
    (0..classes, 0.0f64..=1.0, 0.0f64..=1.0, 0.001f64..1.0, 0.001f64..1.0)
        .prop_map(|(c, cx, cy, w, h)| Annotation::new(c, cx, cy, w, h))
}

pub fn arb_annotations(classes: usize, max: usize) -> impl Strategy<Value = Vec<Annotation>> {
    prop::collection::vec(arb_any_annotation(classes), 0..=max)
}
