//! Output encoding for derived images.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use rand::{Rng, RngExt};
use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::label::io::write_label_file;
use crate::label::{Annotation, DerivedImage};

/// Encoding used for images written by the transform stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    /// Choose JPEG or PNG independently for every image.
    Random,
}

/// Concrete encoder settings for one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Jpeg { quality: u8 },
    Png,
}

impl Codec {
    /// Picks the codec for one image. JPEG quality is drawn from
    /// `quality_min..=quality_max`.
    pub fn choose<R: Rng + ?Sized>(
        format: OutputFormat,
        quality_min: u8,
        quality_max: u8,
        rng: &mut R,
    ) -> Self {
        let jpeg = |rng: &mut R| Codec::Jpeg {
            quality: rng.random_range(quality_min.min(quality_max)..=quality_max.max(quality_min)),
        };
        match format {
            OutputFormat::Jpeg => jpeg(rng),
            OutputFormat::Png => Codec::Png,
            OutputFormat::Random => {
                if rng.random_bool(0.5) {
                    jpeg(rng)
                } else {
                    Codec::Png
                }
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Jpeg { .. } => "jpg",
            Codec::Png => "png",
        }
    }
}

/// Interpolation filters resized images are drawn from. Nearest, bilinear,
/// bicubic and an area-style downsampling filter.
const RESIZE_FILTERS: [FilterType; 4] = [
    FilterType::Nearest,
    FilterType::Triangle,
    FilterType::CatmullRom,
    FilterType::Lanczos3,
];

/// Picks a random interpolation filter so the dataset does not learn the
/// artifacts of a single one.
pub fn random_filter<R: Rng + ?Sized>(rng: &mut R) -> FilterType {
    RESIZE_FILTERS[rng.random_range(0..RESIZE_FILTERS.len())]
}

/// Decodes a source image.
pub fn open_image(path: &Path) -> Result<DynamicImage, PrepError> {
    image::open(path).map_err(|source| PrepError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// Encodes `img` next to `stem` (the extension is replaced) and returns the
/// written path.
pub fn save_image(img: &DynamicImage, stem: &Path, codec: Codec) -> Result<PathBuf, PrepError> {
    let path = stem.with_extension(codec.extension());
    let to_err = |source| PrepError::ImageWrite {
        path: path.clone(),
        source,
    };

    match codec {
        Codec::Jpeg { quality } => {
            let file = File::create(&path).map_err(|source| PrepError::OutputWrite {
                path: path.clone(),
                source,
            })?;
            let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
            encoder.encode_image(&img.to_rgb8()).map_err(to_err)?;
        }
        Codec::Png => {
            img.save_with_format(&path, ImageFormat::Png).map_err(to_err)?;
        }
    }

    Ok(path)
}

/// Writes an image and its label file side by side.
pub fn write_derived(
    img: &DynamicImage,
    stem: &Path,
    annotations: &[Annotation],
    codec: Codec,
) -> Result<DerivedImage, PrepError> {
    let image_path = save_image(img, stem, codec)?;
    let label_path = image_path.with_extension("txt");
    write_label_file(&label_path, annotations)?;
    Ok(DerivedImage {
        image_path,
        label_path,
        annotation_count: annotations.len(),
    })
}
