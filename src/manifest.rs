//! Per-snapshot manifest describing which pages were captured and how.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{write_atomic, IoContext, SnapshotError};

/// File name of the manifest inside every snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Outcome of capturing one monitored URL, tagged by `status` on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PageRecord {
    /// Page fetched and written.
    Success {
        /// Source URL.
        url: String,
        /// Rewritten HTML, relative to the snapshot directory.
        file: String,
        /// Untouched fetched HTML; absent in manifests written before originals were kept.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_file: Option<String>,
        /// Output-relative asset paths the page references.
        #[serde(default)]
        assets: Vec<String>,
    },
    /// Page could not be fetched; no files exist for it.
    Failed {
        /// Source URL.
        url: String,
        /// Human-readable failure reason.
        error: String,
    },
}

impl PageRecord {
    /// Source URL regardless of outcome.
    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    /// True for [`PageRecord::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// File holding the pristine fetched HTML, falling back to the rewritten file for legacy
    /// records. `None` for failed pages.
    pub fn comparison_file(&self) -> Option<&str> {
        match self {
            Self::Success {
                file,
                original_file,
                ..
            } => Some(original_file.as_deref().unwrap_or(file.as_str())),
            Self::Failed { .. } => None,
        }
    }

    /// Asset paths referenced by a successful page.
    pub fn assets(&self) -> &[String] {
        match self {
            Self::Success { assets, .. } => assets,
            Self::Failed { .. } => &[],
        }
    }
}

/// Index of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Snapshot timestamp; also the directory name.
    pub timestamp: String,
    /// Site base URL the page list was resolved against.
    pub base_url: String,
    /// One record per monitored page, in request order.
    pub pages: Vec<PageRecord>,
    /// Remote archive location once uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_archive_url: Option<String>,
}

impl SnapshotManifest {
    /// Creates a manifest without an archive URL.
    pub fn new(timestamp: String, base_url: String, pages: Vec<PageRecord>) -> Self {
        Self {
            timestamp,
            base_url,
            pages,
            internet_archive_url: None,
        }
    }

    /// Successful record for `url`, if any.
    pub fn successful_page(&self, url: &str) -> Option<&PageRecord> {
        self.pages
            .iter()
            .find(|page| page.is_success() && page.url() == url)
    }

    /// Reads `manifest.json` from a snapshot directory; `Ok(None)` when it does not exist.
    pub fn load(snapshot_dir: &Path) -> Result<Option<Self>, SnapshotError> {
        let path = snapshot_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path).at(&path)?;
        let manifest = serde_json::from_slice(&raw).map_err(|err| SnapshotError::json(&path, err))?;
        Ok(Some(manifest))
    }

    /// Writes `manifest.json` into `snapshot_dir` as pretty JSON.
    pub fn save(&self, snapshot_dir: &Path) -> Result<(), SnapshotError> {
        let path = snapshot_dir.join(MANIFEST_FILE);
        let encoded = serde_json::to_vec_pretty(self).map_err(|err| SnapshotError::json(&path, err))?;
        write_atomic(&path, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SnapshotManifest {
        SnapshotManifest {
            timestamp: "2026-01-02_03-04-05".into(),
            base_url: "https://example.com".into(),
            pages: vec![
                PageRecord::Success {
                    url: "https://example.com/".into(),
                    file: "index.html".into(),
                    original_file: Some("index_original.html".into()),
                    assets: vec![
                        "assets/css/0123456789abcdef.css".into(),
                        "assets/images/fedcba9876543210.png".into(),
                    ],
                },
                PageRecord::Failed {
                    url: "https://example.com/about".into(),
                    error: "HTTP status 500 Internal Server Error".into(),
                },
            ],
            internet_archive_url: Some("https://archive.org/details/example-com-snapshot".into()),
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample();
        manifest.save(dir.path()).unwrap();
        let loaded = SnapshotManifest::load(dir.path()).unwrap().expect("manifest");
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn wire_format_is_tagged_by_status() {
        let value = serde_json::to_value(sample()).unwrap();
        let pages = value["pages"].as_array().unwrap();
        assert_eq!(pages[0]["status"], "success");
        assert_eq!(pages[0]["original_file"], "index_original.html");
        assert_eq!(pages[1]["status"], "failed");
        assert!(pages[1].get("file").is_none());
        assert_eq!(
            value["internet_archive_url"],
            "https://archive.org/details/example-com-snapshot"
        );
    }

    #[test]
    fn legacy_records_fall_back_to_rewritten_file() {
        let raw = r#"{
            "timestamp": "2025-01-01_00-00-00",
            "base_url": "https://example.com",
            "pages": [
                {"url": "https://example.com/", "file": "index.html", "assets": [], "status": "success"}
            ]
        }"#;
        let manifest: SnapshotManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.internet_archive_url, None);
        let page = manifest.successful_page("https://example.com/").unwrap();
        assert_eq!(page.comparison_file(), Some("index.html"));
    }

    #[test]
    fn missing_manifest_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SnapshotManifest::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn failed_pages_are_not_comparison_candidates() {
        let manifest = sample();
        assert!(manifest.successful_page("https://example.com/about").is_none());
        assert_eq!(manifest.pages[1].comparison_file(), None);
        assert!(manifest.pages[1].assets().is_empty());
    }
}
