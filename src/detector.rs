//! Decides whether a freshly fetched page set differs from the latest stored snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::clock::{Clock, DEBUG_TIMESTAMP_FORMAT};
use crate::error::{IoContext, SnapshotError};
use crate::fetch::FetchError;
use crate::manifest::SnapshotManifest;
use crate::normalizer::normalize;

/// Directory (relative to the output root) receiving normalized dumps of the first mismatch.
pub const DEBUG_DIR: &str = "debug_comparison";
/// Characters of context logged on each side of the first differing position.
pub const DIFF_CONTEXT: usize = 150;

/// One monitored page as fetched during the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePage {
    /// Absolute page URL (or the raw configured entry when it could not be resolved).
    pub url: String,
    /// Fetched HTML or the reason it could not be fetched.
    pub result: Result<String, FetchError>,
}

impl CandidatePage {
    /// Fetched HTML, if any.
    pub fn html(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }
}

/// Most recent snapshot directory under `site_dir`, by lexicographic name.
///
/// Returns `Ok(None)` when the site directory does not exist yet or holds no snapshots.
pub fn latest_snapshot(site_dir: &Path) -> Result<Option<PathBuf>, SnapshotError> {
    if !site_dir.exists() {
        return Ok(None);
    }
    let mut latest: Option<PathBuf> = None;
    for entry in fs::read_dir(site_dir).at(site_dir)? {
        let entry = entry.at(site_dir)?;
        if !entry.file_type().at(&entry.path())?.is_dir() {
            continue;
        }
        let path = entry.path();
        if latest
            .as_ref()
            .map_or(true, |current| path.file_name() > current.file_name())
        {
            latest = Some(path);
        }
    }
    Ok(latest)
}

/// Outcome of comparing one candidate page with its stored counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageComparison {
    /// The previous snapshot has no successful record for this URL.
    NewPage,
    /// The manifest names a file that is no longer on disk.
    MissingPrevious(PathBuf),
    /// Normalized content is identical.
    Unchanged,
    /// Normalized content differs.
    Changed {
        /// Normalized stored HTML.
        previous: String,
        /// Normalized fetched HTML.
        current: String,
    },
}

/// Compares fetched `html` against the stored file the manifest lists for `url`.
pub fn compare_page(
    previous_dir: &Path,
    manifest: &SnapshotManifest,
    url: &str,
    html: &str,
) -> Result<PageComparison, SnapshotError> {
    let Some(file) = manifest
        .successful_page(url)
        .and_then(|record| record.comparison_file())
    else {
        return Ok(PageComparison::NewPage);
    };

    let path = previous_dir.join(file);
    if !path.exists() {
        return Ok(PageComparison::MissingPrevious(path));
    }
    let stored = fs::read(&path).at(&path)?;
    let previous = normalize(&String::from_utf8_lossy(&stored));
    let current = normalize(html);
    if previous == current {
        Ok(PageComparison::Unchanged)
    } else {
        Ok(PageComparison::Changed { previous, current })
    }
}

/// Byte index of the first differing character, or the shorter length when one string is a
/// prefix of the other. `None` for equal strings.
pub fn first_difference(a: &str, b: &str) -> Option<usize> {
    if a == b {
        return None;
    }
    let mismatch = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, left), right)| left != right)
        .map(|((idx, _), _)| idx);
    Some(mismatch.unwrap_or_else(|| a.len().min(b.len())))
}

/// Up to [`DIFF_CONTEXT`] characters either side of `at`, clamped to char boundaries.
fn context_window(text: &str, at: usize) -> &str {
    let at = floor_char_boundary(text, at.min(text.len()));
    let start = text[..at]
        .char_indices()
        .rev()
        .nth(DIFF_CONTEXT - 1)
        .map_or(0, |(idx, _)| idx);
    let end = text[at..]
        .char_indices()
        .nth(DIFF_CONTEXT)
        .map_or(text.len(), |(idx, _)| at + idx);
    &text[start..end]
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Change detector bound to one site's snapshot tree.
pub struct ChangeDetector<'a> {
    site_dir: &'a Path,
    debug_dir: PathBuf,
    clock: &'a dyn Clock,
}

impl<'a> ChangeDetector<'a> {
    /// `debug_dir` receives normalized dumps when a page mismatch is found.
    pub fn new(site_dir: &'a Path, debug_dir: impl Into<PathBuf>, clock: &'a dyn Clock) -> Self {
        Self {
            site_dir,
            debug_dir: debug_dir.into(),
            clock,
        }
    }

    /// True when a new snapshot should be written.
    ///
    /// Only the first mismatching page is logged and dumped. Failed candidates are skipped
    /// during content comparison but still count towards the record total.
    pub fn has_changed(&self, candidates: &[CandidatePage]) -> Result<bool, SnapshotError> {
        let Some(previous_dir) = latest_snapshot(self.site_dir)? else {
            info!("no previous snapshot found");
            return Ok(true);
        };

        let manifest = match SnapshotManifest::load(&previous_dir) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                info!(dir = %previous_dir.display(), "previous snapshot incomplete; no manifest");
                return Ok(true);
            }
            Err(err) => {
                warn!(error = %err, "previous manifest unreadable; treating as changed");
                return Ok(true);
            }
        };

        let previous_count = manifest.pages.len();
        let current_count = candidates.len();
        if previous_count != current_count {
            info!(previous_count, current_count, "page count changed");
            return Ok(true);
        }

        for candidate in candidates {
            let Some(html) = candidate.html() else {
                continue;
            };
            match compare_page(&previous_dir, &manifest, &candidate.url, html)? {
                PageComparison::Unchanged => {
                    debug!(url = %candidate.url, "page unchanged");
                }
                PageComparison::NewPage => {
                    info!(url = %candidate.url, "new page detected");
                    return Ok(true);
                }
                PageComparison::MissingPrevious(path) => {
                    info!(url = %candidate.url, path = %path.display(), "previous file missing");
                    return Ok(true);
                }
                PageComparison::Changed { previous, current } => {
                    self.report_mismatch(&candidate.url, &previous, &current);
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn report_mismatch(&self, url: &str, previous: &str, current: &str) {
        let delta = current.len() as i64 - previous.len() as i64;
        info!(
            url,
            previous_len = previous.len(),
            current_len = current.len(),
            delta,
            "content changed"
        );
        if let Some(at) = first_difference(previous, current) {
            debug!(position = at, "first difference");
            debug!(context = context_window(previous, at), "previous");
            debug!(context = context_window(current, at), "current");
        }

        if let Err(err) = self.dump(previous, current) {
            warn!(error = %err, "could not write comparison dump");
        }
    }

    fn dump(&self, previous: &str, current: &str) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.debug_dir).at(&self.debug_dir)?;
        let stamp = self.clock.now().format(DEBUG_TIMESTAMP_FORMAT).to_string();
        let current_path = self.debug_dir.join(format!("current_{stamp}.txt"));
        fs::write(&current_path, current).at(&current_path)?;
        let previous_path = self.debug_dir.join(format!("previous_{stamp}.txt"));
        fs::write(&previous_path, previous).at(&previous_path)?;
        debug!(dir = %self.debug_dir.display(), "comparison dumps written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::manifest::PageRecord;
    use chrono::NaiveDate;

    fn clock() -> ManualClock {
        ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        )
    }

    fn fetched(url: &str, html: &str) -> CandidatePage {
        CandidatePage {
            url: url.into(),
            result: Ok(html.into()),
        }
    }

    fn seed(site_dir: &Path, name: &str, pages: &[(&str, &str, &str)]) -> PathBuf {
        let dir = site_dir.join(name);
        fs::create_dir_all(&dir).unwrap();
        let mut records = Vec::new();
        for (url, file, html) in pages {
            let original = file.replace(".html", "_original.html");
            fs::write(dir.join(file), "<p>rewritten copy</p>").unwrap();
            fs::write(dir.join(&original), html).unwrap();
            records.push(PageRecord::Success {
                url: (*url).into(),
                file: (*file).into(),
                original_file: Some(original),
                assets: Vec::new(),
            });
        }
        SnapshotManifest::new(name.into(), "https://example.com".into(), records)
            .save(&dir)
            .unwrap();
        dir
    }

    #[test]
    fn first_difference_handles_prefixes_and_multibyte_text() {
        assert_eq!(first_difference("abc", "abc"), None);
        assert_eq!(first_difference("abc", "abd"), Some(2));
        assert_eq!(first_difference("abc", "abcdef"), Some(3));
        assert_eq!(first_difference("héllo", "hallo"), Some(1));
        assert_eq!(first_difference("日本語", "日本人"), Some(6));
    }

    #[test]
    fn context_window_stays_on_char_boundaries() {
        let text = "é".repeat(400);
        let window = context_window(&text, 401);
        assert_eq!(window.chars().count(), 2 * DIFF_CONTEXT);
    }

    #[test]
    fn latest_snapshot_picks_greatest_name_and_ignores_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_snapshot(&dir.path().join("missing")).unwrap(), None);
        fs::create_dir(dir.path().join("2026-01-01_00-00-00")).unwrap();
        fs::create_dir(dir.path().join("2026-02-01_00-00-00")).unwrap();
        fs::write(dir.path().join("zzz.txt"), "not a snapshot").unwrap();
        assert_eq!(
            latest_snapshot(dir.path()).unwrap(),
            Some(dir.path().join("2026-02-01_00-00-00"))
        );
    }

    #[test]
    fn unchanged_when_only_noise_differs() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        seed(
            dir.path(),
            "2026-02-28_20-00-00",
            &[(
                "https://example.com/",
                "index.html",
                "<p>Posted 3 hours ago</p>",
            )],
        );
        let detector = ChangeDetector::new(dir.path(), dir.path().join(DEBUG_DIR), &clock);
        let candidates = [fetched("https://example.com/", "<p>Posted 5 hours ago</p>")];
        assert!(!detector.has_changed(&candidates).unwrap());
        assert!(!dir.path().join(DEBUG_DIR).exists());
    }

    #[test]
    fn mismatch_writes_comparison_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        seed(
            dir.path(),
            "2026-02-28_20-00-00",
            &[("https://example.com/", "index.html", "<p>Old</p>")],
        );
        let debug_dir = dir.path().join(DEBUG_DIR);
        let detector = ChangeDetector::new(dir.path(), &debug_dir, &clock);
        assert!(detector
            .has_changed(&[fetched("https://example.com/", "<p>New</p>")])
            .unwrap());
        let current = fs::read_to_string(debug_dir.join("current_20260301_080000.txt")).unwrap();
        let previous = fs::read_to_string(debug_dir.join("previous_20260301_080000.txt")).unwrap();
        assert!(current.contains("New"));
        assert!(previous.contains("Old"));
    }

    #[test]
    fn structural_differences_count_as_changes() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let detector = ChangeDetector::new(dir.path(), dir.path().join(DEBUG_DIR), &clock);
        assert!(detector
            .has_changed(&[fetched("https://example.com/", "<p>a</p>")])
            .unwrap());

        let snapshot = seed(
            dir.path(),
            "2026-02-28_20-00-00",
            &[("https://example.com/", "index.html", "<p>a</p>")],
        );

        // page count differs
        assert!(detector
            .has_changed(&[
                fetched("https://example.com/", "<p>a</p>"),
                fetched("https://example.com/about", "<p>b</p>"),
            ])
            .unwrap());

        // same count, different URL
        assert!(detector
            .has_changed(&[fetched("https://example.com/other", "<p>a</p>")])
            .unwrap());

        fs::remove_file(snapshot.join("index_original.html")).unwrap();
        assert!(detector
            .has_changed(&[fetched("https://example.com/", "<p>a</p>")])
            .unwrap());

        fs::write(snapshot.join("manifest.json"), "{not json").unwrap();
        assert!(detector
            .has_changed(&[fetched("https://example.com/", "<p>a</p>")])
            .unwrap());

        fs::remove_file(snapshot.join("manifest.json")).unwrap();
        assert!(detector
            .has_changed(&[fetched("https://example.com/", "<p>a</p>")])
            .unwrap());
    }

    #[test]
    fn failed_fetches_count_as_records_but_are_not_compared() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let snapshot = seed(
            dir.path(),
            "2026-02-28_20-00-00",
            &[("https://example.com/", "index.html", "<p>a</p>")],
        );
        let mut manifest = SnapshotManifest::load(&snapshot).unwrap().unwrap();
        manifest.pages.push(PageRecord::Failed {
            url: "https://example.com/down".into(),
            error: "timed out after 15s".into(),
        });
        manifest.save(&snapshot).unwrap();

        let detector = ChangeDetector::new(dir.path(), dir.path().join(DEBUG_DIR), &clock);
        let candidates = [
            fetched("https://example.com/", "<p>a</p>"),
            CandidatePage {
                url: "https://example.com/down".into(),
                result: Err(FetchError::Timeout(std::time::Duration::from_secs(15))),
            },
        ];
        assert!(!detector.has_changed(&candidates).unwrap());
        assert!(detector.has_changed(&candidates[..1]).unwrap());
    }
}
