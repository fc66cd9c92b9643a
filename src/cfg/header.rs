//! Comment block prepended to generated configuration files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Provenance written as `#` comments at the top of a generated `.cfg`.
#[derive(Clone, Debug)]
pub struct ConfigHeader {
    pub template: PathBuf,
    pub output: PathBuf,
    pub names: PathBuf,
    pub generated_at: DateTime<Local>,
}

impl ConfigHeader {
    pub fn new(template: &Path, output: &Path, names: &Path) -> Self {
        Self {
            template: template.to_path_buf(),
            output: output.to_path_buf(),
            names: names.to_path_buf(),
            generated_at: Local::now(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Generated by {} {} on {}.\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.generated_at.format("%Y-%m-%d %H:%M:%S %z")
        ));
        out.push_str(&format!("# Template: {}\n", self.template.display()));
        out.push_str(&format!("# Output:   {}\n", self.output.display()));
        out.push_str(&format!("# Names:    {}\n", self.names.display()));
        out.push_str("#\n");
        out.push_str("# WARNING: this file is regenerated on every dataset build.\n");
        out.push_str("# Manual edits will be discarded; change the template instead.\n");
        out.push_str("#\n\n");
        out
    }
}
