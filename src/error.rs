use std::path::PathBuf;
use thiserror::Error;

/// The main error type for yoloprep operations.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read network template {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Network template {path} is empty")]
    ConfigEmpty { path: PathBuf },

    #[error("Network template must contain exactly one [net] section, found {count}")]
    NetSectionCount { count: usize },

    #[error("Line index {index} is out of range for a document of {len} line(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid build parameters: {message}")]
    InvalidBuildParams { message: String },

    #[error("Invalid anchor parameters: {message}")]
    InvalidAnchorParams { message: String },

    #[error("Failed to parse label file {path} at line {line}: {message}")]
    LabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid names file {path}: {message}")]
    NamesInvalid { path: PathBuf, message: String },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{stage} worker failed while processing {path}: {message}")]
    Worker {
        stage: String,
        path: PathBuf,
        message: String,
    },

    #[error("Failed to write {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse markup JSON {path}: {source}")]
    MarkupJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write markup JSON {path}: {source}")]
    MarkupJsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse build options {path}: {source}")]
    OptionsParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write review CSV: {0}")]
    ReviewCsv(#[from] csv::Error),

    #[error("Failed to serialize report as JSON: {0}")]
    ReportJson(#[source] serde_json::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}
