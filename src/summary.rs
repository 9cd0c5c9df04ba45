//! Human-readable `CHANGES.txt` report written into every snapshot.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::clock::DISPLAY_TIMESTAMP_FORMAT;
use crate::detector::{compare_page, CandidatePage, PageComparison};
use crate::error::{write_atomic, SnapshotError};
use crate::manifest::SnapshotManifest;

/// File name of the report inside a snapshot directory.
pub const SUMMARY_FILE: &str = "CHANGES.txt";

const RULE_WIDTH: usize = 70;

/// Coarse classification of a content change by normalized length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Grew by more than 10%.
    Addition,
    /// Shrank by more than 10%.
    Removal,
    /// Anything in between.
    Modification,
}

impl ChangeKind {
    /// Classifies a change from `previous` to `current` characters.
    pub fn classify(previous: usize, current: usize) -> Self {
        let (previous, current) = (previous as f64, current as f64);
        if current > previous * 1.1 {
            Self::Addition
        } else if current < previous * 0.9 {
            Self::Removal
        } else {
            Self::Modification
        }
    }

    /// Label used in the report.
    pub fn label(self) -> &'static str {
        match self {
            Self::Addition => "Significant content addition",
            Self::Removal => "Significant content removal",
            Self::Modification => "Content modification",
        }
    }
}

/// Normalized length change of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChange {
    /// Page URL.
    pub url: String,
    /// Normalized previous length in characters.
    pub previous_len: usize,
    /// Normalized current length in characters.
    pub current_len: usize,
}

impl PageChange {
    /// Absolute length delta relative to the mean length, in percent.
    pub fn percent_change(&self) -> f64 {
        let previous = self.previous_len as f64;
        let current = self.current_len as f64;
        let average = (previous + current) / 2.0;
        if average > 0.0 {
            (current - previous).abs() / average * 100.0
        } else {
            0.0
        }
    }

    /// See [`ChangeKind::classify`].
    pub fn kind(&self) -> ChangeKind {
        ChangeKind::classify(self.previous_len, self.current_len)
    }
}

/// One line item of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryEntry {
    /// URL absent from the previous snapshot.
    NewPage(String),
    /// Normalized content differs.
    Changed(PageChange),
}

/// What the new snapshot was compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// No earlier snapshot exists.
    Initial,
    /// Earlier snapshot found and compared page by page.
    Compared {
        /// Directory name of the earlier snapshot.
        previous: String,
        /// Differences found; empty means every page matched.
        entries: Vec<SummaryEntry>,
    },
    /// Earlier snapshot found but its manifest is missing or unreadable.
    IncompletePrevious {
        /// Directory name of the earlier snapshot.
        previous: String,
    },
}

/// Report contents for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    /// Site base URL.
    pub base_url: String,
    /// When the report was generated.
    pub generated_at: NaiveDateTime,
    /// Comparison baseline.
    pub baseline: Baseline,
    /// Number of monitored pages, failed ones included.
    pub pages_monitored: usize,
    /// Where the snapshot was written.
    pub snapshot_dir: PathBuf,
}

impl ChangeSummary {
    /// Compares `candidates` with the `previous` snapshot directory captured before the new
    /// snapshot was created.
    pub fn build(
        previous: Option<&Path>,
        candidates: &[CandidatePage],
        base_url: &str,
        generated_at: NaiveDateTime,
        snapshot_dir: &Path,
    ) -> Result<Self, SnapshotError> {
        let baseline = match previous {
            None => Baseline::Initial,
            Some(previous_dir) => compare_with(previous_dir, candidates)?,
        };
        Ok(Self {
            base_url: base_url.to_string(),
            generated_at,
            baseline,
            pages_monitored: candidates.len(),
            snapshot_dir: snapshot_dir.to_path_buf(),
        })
    }

    /// Plain-text report.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Writes the rendered report to `<dir>/CHANGES.txt`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, SnapshotError> {
        let path = dir.join(SUMMARY_FILE);
        write_atomic(&path, self.render().as_bytes())?;
        info!(path = %path.display(), "change summary saved");
        Ok(path)
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{rule}")?;
        writeln!(f, "WEBSITE CHANGE SUMMARY")?;
        writeln!(
            f,
            "Snapshot Date: {}",
            self.generated_at.format(DISPLAY_TIMESTAMP_FORMAT)
        )?;
        writeln!(f, "Website: {}", self.base_url)?;
        writeln!(f, "{rule}")?;
        writeln!(f)?;

        match &self.baseline {
            Baseline::Initial => {
                writeln!(f, "INITIAL SNAPSHOT - No previous version to compare")?;
                writeln!(f, "Archived {} pages", self.pages_monitored)?;
            }
            Baseline::IncompletePrevious { previous } => {
                writeln!(f, "Compared to: {previous}")?;
                writeln!(f)?;
                writeln!(f, "Previous snapshot incomplete - treating as changed")?;
            }
            Baseline::Compared { previous, entries } => {
                writeln!(f, "Compared to: {previous}")?;
                writeln!(f)?;
                for entry in entries {
                    write!(f, "{entry}")?;
                }
                if entries.is_empty() {
                    writeln!(f, "NO CHANGES DETECTED")?;
                    writeln!(f, "All monitored pages remain identical to previous snapshot")?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Pages monitored: {}", self.pages_monitored)?;
        writeln!(f, "Snapshot stored at: {}", self.snapshot_dir.display())?;
        writeln!(f, "{rule}")
    }
}

fn compare_with(
    previous_dir: &Path,
    candidates: &[CandidatePage],
) -> Result<Baseline, SnapshotError> {
    let previous = previous_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let manifest = match SnapshotManifest::load(previous_dir) {
        Ok(Some(manifest)) => manifest,
        Ok(None) | Err(SnapshotError::Json { .. }) => {
            return Ok(Baseline::IncompletePrevious { previous })
        }
        Err(err) => return Err(err),
    };

    let mut entries = Vec::new();
    for candidate in candidates {
        let Some(html) = candidate.html() else {
            continue;
        };
        match compare_page(previous_dir, &manifest, &candidate.url, html)? {
            PageComparison::NewPage => entries.push(SummaryEntry::NewPage(candidate.url.clone())),
            PageComparison::Changed { previous, current } => {
                entries.push(SummaryEntry::Changed(PageChange {
                    url: candidate.url.clone(),
                    previous_len: previous.chars().count(),
                    current_len: current.chars().count(),
                }))
            }
            PageComparison::Unchanged | PageComparison::MissingPrevious(_) => {}
        }
    }
    Ok(Baseline::Compared { previous, entries })
}

impl fmt::Display for SummaryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryEntry::NewPage(url) => {
                writeln!(f, "NEW PAGE ADDED:")?;
                writeln!(f, "  URL: {url}")?;
            }
            SummaryEntry::Changed(change) => {
                writeln!(f, "CHANGES DETECTED:")?;
                writeln!(f, "  Page: {}", change.url)?;
                writeln!(
                    f,
                    "  Content length: {} → {} chars",
                    group_thousands(change.previous_len),
                    group_thousands(change.current_len)
                )?;
                writeln!(f, "  Approximate change: {:.1}%", change.percent_change())?;
                writeln!(f, "  Type: {}", change.kind().label())?;
            }
        }
        writeln!(f)
    }
}

/// `1234567` → `1,234,567`.
fn group_thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
