//! Reading and writing per-image YOLO label files.
//!
//! Every image `foo.jpg` has a sibling `foo.txt` with zero or more lines of
//! `class_idx cx cy w h`. A zero-byte label file marks a negative sample; a
//! missing label file means the image has not been annotated yet.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use super::model::{Annotation, ImageRecord};
use crate::error::PrepError;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "png", "jpeg", "bmp", "webp"];
pub const LABEL_EXTENSION: &str = "txt";

/// Images found under a root directory, plus the ones that were passed over.
#[derive(Clone, Debug, Default)]
pub struct Discovery {
    pub records: Vec<ImageRecord>,
    /// Images without a label file.
    pub unlabeled: usize,
    /// Images whose label file could not be parsed (kept with no annotations).
    pub malformed: usize,
    /// Images whose dimensions could not be read.
    pub unreadable: usize,
}

impl Discovery {
    pub fn negative_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_negative()).count()
    }
}

/// Label path for an image: same location, `.txt` extension.
pub fn label_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension(LABEL_EXTENSION)
}

/// Reads a darknet `.names` file. Blank lines are ignored.
pub fn read_names_file(path: &Path) -> Result<Vec<String>, PrepError> {
    let data = fs::read_to_string(path).map_err(PrepError::Io)?;
    let names: Vec<String> = data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        return Err(PrepError::NamesInvalid {
            path: path.to_path_buf(),
            message: "no class names found".to_string(),
        });
    }

    Ok(names)
}

/// Walks `root` for images that have a label file and loads their labels.
///
/// Malformed label files are logged and the image is treated as having no
/// annotations. Images whose size cannot be probed are skipped.
pub fn discover_images(root: &Path, class_count: usize) -> Result<Discovery, PrepError> {
    let mut image_files = collect_files_with_extensions(root, &IMAGE_EXTENSIONS)?;
    image_files.sort_by_cached_key(|image_path| rel_string(root, image_path));

    let mut discovery = Discovery::default();

    for image_path in image_files {
        let label_path = label_path_for(&image_path);
        if !label_path.is_file() {
            debug!("skipping unlabeled image {}", image_path.display());
            discovery.unlabeled += 1;
            continue;
        }

        let (width, height) = match read_image_dimensions(&image_path) {
            Ok(dims) => dims,
            Err(err) => {
                warn!("skipping {}: {}", image_path.display(), err);
                discovery.unreadable += 1;
                continue;
            }
        };

        let annotations = match read_label_file(&label_path, Some(class_count)) {
            Ok(annotations) => annotations,
            Err(err) => {
                warn!("{}; treating image as having no annotations", err);
                discovery.malformed += 1;
                Vec::new()
            }
        };

        discovery.records.push(ImageRecord {
            image_path,
            label_path,
            width,
            height,
            annotations,
        });
    }

    Ok(discovery)
}

/// Parses every line of a label file.
///
/// When `class_count` is given, class indexes at or above it are rejected.
pub fn read_label_file(
    path: &Path,
    class_count: Option<usize>,
) -> Result<Vec<Annotation>, PrepError> {
    let content = fs::read_to_string(path).map_err(PrepError::Io)?;
    let mut annotations = Vec::new();

    for (line_idx, line) in content.lines().enumerate() {
        let line_num = line_idx + 1;
        let Some(ann) = parse_label_line(line, path, line_num)? else {
            continue;
        };

        if let Some(count) = class_count {
            if ann.class_index >= count {
                return Err(PrepError::LabelParse {
                    path: path.to_path_buf(),
                    line: line_num,
                    message: format!(
                        "class index {} is out of range for {} class(es)",
                        ann.class_index, count
                    ),
                });
            }
        }

        annotations.push(ann);
    }

    Ok(annotations)
}

/// Writes a label file, one line per annotation. An empty slice produces a
/// zero-byte file, the negative-sample marker.
pub fn write_label_file(path: &Path, annotations: &[Annotation]) -> Result<(), PrepError> {
    let to_err = |source| PrepError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(path).map_err(to_err)?;
    for ann in annotations {
        writeln!(file, "{}", ann.to_label_line()).map_err(to_err)?;
    }
    Ok(())
}

pub fn read_image_dimensions(path: &Path) -> Result<(u32, u32), PrepError> {
    let size = imagesize::size(path).map_err(|source| PrepError::ImageDimensionRead {
        path: path.to_path_buf(),
        source,
    })?;

    let width: u32 = size
        .width
        .try_into()
        .map_err(|_| PrepError::InvalidBuildParams {
            message: format!(
                "image width {} of {} does not fit in u32",
                size.width,
                path.display()
            ),
        })?;
    let height: u32 = size
        .height
        .try_into()
        .map_err(|_| PrepError::InvalidBuildParams {
            message: format!(
                "image height {} of {} does not fit in u32",
                size.height,
                path.display()
            ),
        })?;

    Ok((width, height))
}

pub(crate) fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<Annotation>, PrepError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // At most 6 tokens so pathological lines do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();
    if tokens.len() != 5 {
        return Err(PrepError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("expected 5 tokens, found {}", tokens.len()),
        });
    }

    let class_index = tokens[0]
        .parse::<usize>()
        .map_err(|_| PrepError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class index '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    let cx = parse_f64_token(tokens[1], "x_center", file_path, line_num)?;
    let cy = parse_f64_token(tokens[2], "y_center", file_path, line_num)?;
    let w = parse_f64_token(tokens[3], "width", file_path, line_num)?;
    let h = parse_f64_token(tokens[4], "height", file_path, line_num)?;

    let ann = Annotation::new(class_index, cx, cy, w, h);
    if !ann.is_valid() {
        return Err(PrepError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: "box must have a positive size and a center inside the image".to_string(),
        });
    }

    Ok(Some(ann))
}

/// Fuzz-only entrypoint for single label-line parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), PrepError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

pub(crate) fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, PrepError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PrepError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("invalid {field_name} '{raw}'; expected a finite number"),
        }),
    }
}

pub(crate) fn collect_files_with_extensions(
    root: &Path,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, PrepError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|source| {
            PrepError::Io(std::io::Error::other(format!(
                "failed while traversing {}: {source}",
                root.display()
            )))
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.path().to_path_buf());
        }
    }

    Ok(files)
}

pub(crate) fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

pub(crate) fn rel_string(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}
