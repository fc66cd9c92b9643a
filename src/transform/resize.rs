use std::fs;
use std::path::Path;

use rand::Rng;

use super::codec::{open_image, random_filter, write_derived};
use super::{derived_stem, IndexedRecord, ItemOutput, TransformSettings};
use crate::error::PrepError;
use crate::label::io::write_label_file;
use crate::label::DerivedImage;

/// Stretches one source image to the network size.
///
/// Normalized annotations are unchanged by a stretch, so the labels are
/// rewritten as-is. Images already at the target size are copied without
/// re-encoding.
pub fn resize_record<R: Rng + ?Sized>(
    item: &IndexedRecord,
    out_dir: &Path,
    settings: &TransformSettings,
    rng: &mut R,
) -> Result<ItemOutput, PrepError> {
    let record = item.record;
    let stem = derived_stem(out_dir, item.index, &record.image_path, "resize");

    let derived = if settings.target_is(record.width, record.height) {
        let ext = record
            .image_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let image_path = stem.with_extension(ext);
        fs::copy(&record.image_path, &image_path).map_err(|source| PrepError::OutputWrite {
            path: image_path.clone(),
            source,
        })?;
        let label_path = image_path.with_extension("txt");
        write_label_file(&label_path, &record.annotations)?;
        DerivedImage {
            image_path,
            label_path,
            annotation_count: record.annotations.len(),
        }
    } else {
        let img = open_image(&record.image_path)?;
        let filter = random_filter(rng);
        let resized = img.resize_exact(settings.target_width, settings.target_height, filter);
        write_derived(&resized, &stem, &record.annotations, settings.codec(rng))?
    };

    Ok(ItemOutput {
        audit: Some(format!(
            "resize: {} -> {} ({}x{} -> {}x{}, {} annotation(s))",
            record.image_path.display(),
            derived.image_path.display(),
            record.width,
            record.height,
            settings.target_width,
            settings.target_height,
            derived.annotation_count
        )),
        images: vec![derived],
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::{Annotation, ImageRecord};
    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::tempdir;

    fn record(dir: &Path, name: &str, w: u32, h: u32, anns: Vec<Annotation>) -> ImageRecord {
        let image_path = dir.join(name);
        image::RgbImage::new(w, h).save(&image_path).expect("write image");
        ImageRecord {
            label_path: image_path.with_extension("txt"),
            image_path,
            width: w,
            height: h,
            annotations: anns,
        }
    }

    #[test]
    fn resizes_to_target_and_keeps_labels() {
        let dir = tempdir().expect("create temp dir");
        let out = dir.path().join("out");
        fs::create_dir_all(&out).expect("mkdir");
        let rec = record(dir.path(), "wide.png", 200, 100, vec![Annotation::new(1, 0.5, 0.5, 0.2, 0.4)]);
        let settings = TransformSettings {
            target_width: 64,
            target_height: 64,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);

        let output = resize_record(&IndexedRecord { index: 3, record: &rec }, &out, &settings, &mut rng)
            .expect("resize");

        let derived = &output.images[0];
        assert_eq!(image::image_dimensions(&derived.image_path).expect("dims"), (64, 64));
        let labels = fs::read_to_string(&derived.label_path).expect("read labels");
        assert_eq!(labels.trim(), "1 0.5000000000 0.5000000000 0.2000000000 0.4000000000");
        assert!(derived
            .image_path
            .file_name()
            .expect("name")
            .to_string_lossy()
            .starts_with("000003_wide_resize"));
    }

    #[test]
    fn same_size_is_copied_through() {
        let dir = tempdir().expect("create temp dir");
        let out = dir.path().join("out");
        fs::create_dir_all(&out).expect("mkdir");
        let rec = record(dir.path(), "exact.png", 32, 32, vec![]);
        let settings = TransformSettings {
            target_width: 32,
            target_height: 32,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(2);

        let output = resize_record(&IndexedRecord { index: 0, record: &rec }, &out, &settings, &mut rng)
            .expect("resize");

        let derived = &output.images[0];
        assert_eq!(derived.image_path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(
            fs::read(&derived.image_path).expect("copy"),
            fs::read(&rec.image_path).expect("source")
        );
        assert_eq!(fs::metadata(&derived.label_path).expect("label").len(), 0);
    }
}
