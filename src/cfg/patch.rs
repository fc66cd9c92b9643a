//! Rewrites a network template to match a prepared dataset.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use super::ConfigDocument;
use crate::anchors::AnchorSet;
use crate::error::PrepError;

/// Data augmentation settings written to the `[net]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationFlags {
    pub flip: bool,
    pub mosaic: bool,
    pub cutmix: bool,
    pub mixup: bool,
    pub angle: f64,
    pub saturation: f64,
    pub exposure: f64,
    pub hue: f64,
}

impl Default for AugmentationFlags {
    fn default() -> Self {
        Self {
            flip: true,
            mosaic: false,
            cutmix: false,
            mixup: false,
            angle: 0.0,
            saturation: 1.5,
            exposure: 1.5,
            hue: 0.1,
        }
    }
}

/// Everything the template needs to know about the prepared dataset.
#[derive(Clone, Debug)]
pub struct NetworkPatch<'a> {
    pub width: u32,
    pub height: u32,
    pub batch: u32,
    pub subdivisions: u32,
    pub max_batches: u32,
    pub classes: usize,
    pub augmentation: &'a AugmentationFlags,
    /// Recalculated anchors; `None` keeps the template's.
    pub anchors: Option<&'a AnchorSet>,
    /// Per-class box counts for class-imbalance compensation.
    pub counters_per_class: Option<&'a [usize]>,
}

fn flag(value: bool) -> String {
    let text = if value { "1" } else { "0" };
    text.to_string()
}

/// `steps` for the default learning-rate policy: 80% and 90% of training.
pub fn learning_rate_steps(max_batches: u32) -> String {
    let max = u64::from(max_batches);
    format!("{},{}", max * 8 / 10, max * 9 / 10)
}

/// Applies `patch` to the document: `[net]` geometry and augmentation,
/// `[yolo]` classes/anchors/counters, then the output-layer filter counts.
pub fn apply_network_patch(doc: &mut ConfigDocument, patch: &NetworkPatch) -> Result<(), PrepError> {
    let aug = patch.augmentation;
    let net: BTreeMap<String, String> = [
        ("batch", patch.batch.to_string()),
        ("subdivisions", patch.subdivisions.to_string()),
        ("width", patch.width.to_string()),
        ("height", patch.height.to_string()),
        ("max_batches", patch.max_batches.to_string()),
        ("steps", learning_rate_steps(patch.max_batches)),
        ("flip", flag(aug.flip)),
        ("mosaic", flag(aug.mosaic)),
        ("cutmix", flag(aug.cutmix)),
        ("mixup", flag(aug.mixup)),
        ("angle", aug.angle.to_string()),
        ("saturation", aug.saturation.to_string()),
        ("exposure", aug.exposure.to_string()),
        ("hue", aug.hue.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    doc.apply_to_all_sections("net", &net)?;

    let mut yolo = BTreeMap::new();
    yolo.insert("classes".to_string(), patch.classes.to_string());
    if let Some(anchors) = patch.anchors {
        yolo.insert("anchors".to_string(), anchors.format_anchors());
        yolo.insert("num".to_string(), anchors.anchors.len().to_string());
    }
    if let Some(counters) = patch.counters_per_class {
        let joined = counters
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        yolo.insert("counters_per_class".to_string(), joined);
    }
    let yolo_sections = doc.apply_to_all_sections("yolo", &yolo)?;

    if patch.anchors.is_some() {
        fix_tiny_masks(doc)?;
    }

    let filters = doc.fix_filters_before_output()?;
    info!(
        "patched network: {} [yolo] section(s), {} output filter line(s)",
        yolo_sections, filters
    );
    Ok(())
}

/// Tiny templates shipped with `mask=1,2,3` in their last `[yolo]` layer,
/// which skips anchor 0. Recalculated anchors are meant to be used from 0.
fn fix_tiny_masks(doc: &mut ConfigDocument) -> Result<(), PrepError> {
    for start in doc.find_sections("yolo") {
        let Some(mask) = doc.get_value(start, "mask")? else {
            continue;
        };
        let compact: String = mask.chars().filter(|c| !c.is_whitespace()).collect();
        if compact == "1,2,3" {
            doc.set_or_insert(start, "mask", "0,1,2")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::Anchor;

    const TINY: &str = "\
[net]
batch=1
subdivisions=1
width=416
height=416

[convolutional]
filters=255

[yolo]
mask = 3,4,5
anchors = 10,14,  23,27,  37,58,  81,82,  135,169,  344,319
classes=80
num=6

[convolutional]
filters=255

[yolo]
mask = 1,2,3
anchors = 10,14,  23,27,  37,58,  81,82,  135,169,  344,319
classes=80
num=6
";

    fn anchor_set() -> AnchorSet {
        AnchorSet {
            anchors: vec![
                Anchor::new(12.0, 16.0),
                Anchor::new(30.0, 40.0),
                Anchor::new(60.0, 60.0),
                Anchor::new(90.0, 120.0),
                Anchor::new(150.0, 170.0),
                Anchor::new(300.0, 310.0),
            ],
            counters_per_class: vec![10, 3],
            average_iou: 71.5,
        }
    }

    #[test]
    fn steps_are_eighty_and_ninety_percent() {
        assert_eq!(learning_rate_steps(10000), "8000,9000");
        assert_eq!(learning_rate_steps(4000), "3200,3600");
    }

    #[test]
    fn patch_sets_net_and_yolo_keys() {
        let mut doc = ConfigDocument::parse(TINY).expect("parse");
        let aug = AugmentationFlags {
            mosaic: true,
            ..Default::default()
        };
        let anchors = anchor_set();
        let counters = [10usize, 3];
        let patch = NetworkPatch {
            width: 608,
            height: 416,
            batch: 64,
            subdivisions: 8,
            max_batches: 4000,
            classes: 2,
            augmentation: &aug,
            anchors: Some(&anchors),
            counters_per_class: Some(&counters),
        };
        apply_network_patch(&mut doc, &patch).expect("patch");

        let net = doc.find_sections("net")[0];
        let get = |start: usize, key: &str| doc.get_value(start, key).expect("ok");
        assert_eq!(get(net, "batch").as_deref(), Some("64"));
        assert_eq!(get(net, "subdivisions").as_deref(), Some("8"));
        assert_eq!(get(net, "width").as_deref(), Some("608"));
        assert_eq!(get(net, "max_batches").as_deref(), Some("4000"));
        assert_eq!(get(net, "steps").as_deref(), Some("3200,3600"));
        assert_eq!(get(net, "mosaic").as_deref(), Some("1"));
        assert_eq!(get(net, "flip").as_deref(), Some("1"));

        let yolos = doc.find_sections("yolo");
        assert_eq!(yolos.len(), 2);
        for &start in &yolos {
            assert_eq!(get(start, "classes").as_deref(), Some("2"));
            assert_eq!(
                get(start, "anchors").as_deref(),
                Some("12, 16, 30, 40, 60, 60, 90, 120, 150, 170, 300, 310")
            );
            assert_eq!(get(start, "counters_per_class").as_deref(), Some("10, 3"));
        }
        assert_eq!(get(yolos[0], "mask").as_deref(), Some("3,4,5"));
        assert_eq!(get(yolos[1], "mask").as_deref(), Some("0,1,2"));

        let filters: Vec<&String> = doc
            .lines()
            .iter()
            .filter(|line| line.starts_with("filters="))
            .collect();
        assert_eq!(filters, vec!["filters=21", "filters=21"]);
    }

    #[test]
    fn masks_untouched_without_new_anchors() {
        let mut doc = ConfigDocument::parse(TINY).expect("parse");
        let aug = AugmentationFlags::default();
        let patch = NetworkPatch {
            width: 416,
            height: 416,
            batch: 64,
            subdivisions: 16,
            max_batches: 6000,
            classes: 1,
            augmentation: &aug,
            anchors: None,
            counters_per_class: None,
        };
        apply_network_patch(&mut doc, &patch).expect("patch");

        let yolos = doc.find_sections("yolo");
        assert_eq!(
            doc.get_value(yolos[1], "mask").expect("ok").as_deref(),
            Some("1,2,3")
        );
        assert_eq!(doc.get_value(yolos[1], "counters_per_class").expect("ok"), None);
    }
}
