//! Darknet network configuration documents.
//!
//! A `.cfg` file is kept as an ordered list of text lines so that comments,
//! blank lines and unknown keys survive a load/patch/write cycle untouched.
//! A section starts at a line equal to `[name]` and runs to the next header;
//! trailing blank lines belong to the section but are never the insertion
//! point for new keys.

mod header;
pub mod parse;
mod patch;

pub use header::ConfigHeader;
pub use patch::{apply_network_patch, AugmentationFlags, NetworkPatch};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::warn;

use crate::error::PrepError;

/// How far above a `[yolo]` header to look for the `filters=` line.
const FILTERS_LOOKBACK: usize = 20;

/// An editable darknet configuration document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigDocument {
    lines: Vec<String>,
}

impl ConfigDocument {
    /// Loads and validates a template file.
    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let text = fs::read_to_string(path).map_err(|source| PrepError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|err| match err {
            PrepError::ConfigEmpty { .. } => PrepError::ConfigEmpty {
                path: path.to_path_buf(),
            },
            other => other,
        })
    }

    /// Parses a document from text. It must be non-empty and contain exactly
    /// one `[net]` section.
    pub fn parse(text: &str) -> Result<Self, PrepError> {
        let lines: Vec<String> = text
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();

        if lines.iter().all(|line| line.trim().is_empty()) {
            return Err(PrepError::ConfigEmpty {
                path: Default::default(),
            });
        }

        let doc = Self { lines };
        let net_count = doc.find_sections("net").len();
        if net_count != 1 {
            return Err(PrepError::NetSectionCount { count: net_count });
        }

        Ok(doc)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of every line exactly equal to `[name]`; indented or padded
    /// headers do not count.
    pub fn find_sections(&self, name: &str) -> Vec<usize> {
        let header = parse::bracketed(name);
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| **line == header)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Index of the last non-blank line of the section starting at `start`.
    ///
    /// Returns `start` itself for a section with no content.
    pub fn section_end(&self, start: usize) -> Result<usize, PrepError> {
        self.check_index(start)?;

        let mut last = start;
        for (idx, line) in self.lines.iter().enumerate().skip(start + 1) {
            if parse::section_header(line).is_some() {
                break;
            }
            if !line.trim().is_empty() {
                last = idx;
            }
        }
        Ok(last)
    }

    /// Line index of `key` inside the section starting at `start`.
    pub fn find_key(&self, start: usize, key: &str) -> Result<Option<usize>, PrepError> {
        let end = self.section_end(start)?;
        Ok((start + 1..=end).find(|&idx| {
            parse::key_value(&self.lines[idx])
                .map(|(k, _)| k == key)
                .unwrap_or(false)
        }))
    }

    /// Value of `key` inside the section starting at `start`.
    pub fn get_value(&self, start: usize, key: &str) -> Result<Option<String>, PrepError> {
        Ok(self
            .find_key(start, key)?
            .and_then(|idx| parse::key_value(&self.lines[idx]))
            .map(|(_, value)| value.to_string()))
    }

    /// Rewrites `key=value` in place, or inserts it after the section's last
    /// non-blank line.
    pub fn set_or_insert(&mut self, start: usize, key: &str, value: &str) -> Result<(), PrepError> {
        let line = format!("{key}={value}");
        match self.find_key(start, key)? {
            Some(idx) => self.lines[idx] = line,
            None => {
                let end = self.section_end(start)?;
                self.lines.insert(end + 1, line);
            }
        }
        Ok(())
    }

    /// Applies every pair to every section named `name`.
    ///
    /// Sections are visited last-to-first so insertions never shift the
    /// index of a section still waiting to be processed.
    pub fn apply_to_all_sections(
        &mut self,
        name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<usize, PrepError> {
        let sections = self.find_sections(name);
        for &start in sections.iter().rev() {
            for (key, value) in values {
                self.set_or_insert(start, key, value)?;
            }
        }
        Ok(sections.len())
    }

    /// Number of anchor pairs in the first `[yolo]` section, 0 if absent or
    /// not a list of numbers.
    pub fn count_yolo_anchors(&self) -> usize {
        let Some(&start) = self.find_sections("yolo").first() else {
            return 0;
        };
        let Ok(Some(anchors)) = self.get_value(start, "anchors") else {
            return 0;
        };
        let well_formed = !anchors.trim().is_empty()
            && anchors
                .split(',')
                .all(|token| token.trim().parse::<f64>().is_ok());
        if !well_formed {
            return 0;
        }
        (anchors.matches(',').count() + 1) / 2
    }

    /// Sets the `filters=` line feeding each `[yolo]` layer to
    /// `(classes + 5) * masks`. Returns how many lines were rewritten.
    pub fn fix_filters_before_output(&mut self) -> Result<usize, PrepError> {
        let mut fixed = 0;

        for start in self.find_sections("yolo") {
            let Some(classes) = self
                .get_value(start, "classes")?
                .and_then(|v| v.parse::<usize>().ok())
            else {
                warn!("[yolo] section at line {} has no usable classes=", start + 1);
                continue;
            };

            let masks = match self.get_value(start, "mask")? {
                Some(mask) => parse::list_len(&mask),
                None => self
                    .get_value(start, "anchors")?
                    .map(|anchors| parse::list_len(&anchors) / 2)
                    .unwrap_or(0),
            };
            if masks == 0 {
                warn!("[yolo] section at line {} has no mask or anchors", start + 1);
                continue;
            }

            let filters = (classes + 5) * masks;
            let lowest = start.saturating_sub(FILTERS_LOOKBACK);
            let target = (lowest..start).rev().find(|&idx| {
                parse::key_value(&self.lines[idx])
                    .map(|(k, _)| k == "filters")
                    .unwrap_or(false)
            });

            match target {
                Some(idx) => {
                    self.lines[idx] = format!("filters={filters}");
                    fixed += 1;
                }
                None => warn!(
                    "no filters= line within {} lines above [yolo] at line {}",
                    FILTERS_LOOKBACK,
                    start + 1
                ),
            }
        }

        Ok(fixed)
    }

    /// Renders the document, one line per entry, newline terminated.
    pub fn to_text(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Writes the document preceded by the generated-file header.
    pub fn write(&self, path: &Path, header: &ConfigHeader) -> Result<(), PrepError> {
        let text = format!("{}{}", header.render(), self.to_text());
        fs::write(path, text).map_err(|source| PrepError::OutputWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    fn check_index(&self, index: usize) -> Result<(), PrepError> {
        if index >= self.lines.len() {
            return Err(PrepError::IndexOutOfRange {
                index,
                len: self.lines.len(),
            });
        }
        Ok(())
    }
}

/// Fuzz-only entrypoint for document parsing and the read-only queries.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_config(input: &str) -> Result<(), PrepError> {
    let mut doc = ConfigDocument::parse(input)?;
    let _ = doc.count_yolo_anchors();
    doc.fix_filters_before_output()?;
    Ok(())
}
