//! Build summary and terminal formatting.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::anchors::AnchorSet;
use crate::sample::BalanceReport;
use crate::transform::StageCounters;

/// Files written by a completed build.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BuildFiles {
    pub cfg: PathBuf,
    pub data: PathBuf,
    pub train: PathBuf,
    pub valid: PathBuf,
    pub log: PathBuf,
}

/// Counters from one pipeline stage.
#[derive(Clone, Debug, Serialize)]
pub struct StageSummary {
    pub stage: &'static str,
    #[serde(flatten)]
    pub counters: StageCounters,
}

/// Everything a completed build reports.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BuildSummary {
    pub classes: usize,
    pub source_images: usize,
    pub source_negatives: usize,
    pub unlabeled: usize,
    pub malformed: usize,
    pub unreadable: usize,
    pub stages: Vec<StageSummary>,
    pub balance: Option<BalanceReport>,
    pub total_images: usize,
    pub training_images: usize,
    pub validation_images: usize,
    pub max_batches: u32,
    pub anchors: Option<AnchorSet>,
    pub files: BuildFiles,
}

/// How a build ended. Cancellation is not an error.
#[derive(Clone, Debug)]
pub enum BuildOutcome {
    Completed(Box<BuildSummary>),
    Cancelled,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sources:     {} labeled image(s) ({} negative), {} unlabeled, {} malformed, {} unreadable",
            self.source_images, self.source_negatives, self.unlabeled, self.malformed, self.unreadable
        )?;
        for stage in &self.stages {
            let c = &stage.counters;
            writeln!(
                f,
                "{:<12} {} processed, {} created, {} negative, {} skipped, {} error(s), {} annotation(s) dropped",
                format!("{}:", stage.stage),
                c.processed,
                c.created,
                c.negatives,
                c.skipped,
                c.errors,
                c.dropped_annotations
            )?;
        }
        if let Some(balance) = &self.balance {
            writeln!(
                f,
                "Negatives:   {} of {} kept against {} annotated",
                balance.negatives_kept, balance.negatives_before, balance.annotated
            )?;
        }
        writeln!(
            f,
            "Split:       {} image(s): {} training, {} validation",
            self.total_images, self.training_images, self.validation_images
        )?;
        writeln!(f, "Classes:     {}", self.classes)?;
        writeln!(f, "Max batches: {}", self.max_batches)?;
        if let Some(anchors) = &self.anchors {
            writeln!(f)?;
            write!(f, "{anchors}")?;
        }
        writeln!(f)?;
        writeln!(f, "Wrote:")?;
        for path in [
            &self.files.cfg,
            &self.files.data,
            &self.files.train,
            &self.files.valid,
            &self.files.log,
        ] {
            writeln!(f, "  - {}", path.display())?;
        }
        Ok(())
    }
}
