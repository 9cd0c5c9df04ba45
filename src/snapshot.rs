//! Orchestrates one archive run: fetch, compare, and materialize a snapshot when needed.
//!
//! Output layout under the configured root:
//!
//! ```text
//! <output>/assets/<bucket>/<hash><ext>        shared, deduplicated
//! <output>/assets/asset_cache.json
//! <output>/<domain>/<timestamp>/<page>.html
//! <output>/<domain>/<timestamp>/<page>_original.html
//! <output>/<domain>/<timestamp>/manifest.json
//! <output>/<domain>/<timestamp>/CHANGES.txt
//! <output>/debug_comparison/
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};
use url::Url;

use crate::assets::AssetStore;
use crate::bundle::create_bundle;
use crate::clock::{snapshot_timestamp, Clock, SystemClock};
use crate::controls::ArchiveControls;
use crate::detector::{latest_snapshot, CandidatePage, ChangeDetector, DEBUG_DIR};
use crate::error::{IoContext, SnapshotError};
use crate::fetch::{FetchError, Fetcher, DEFAULT_ASSET_TIMEOUT, DEFAULT_PAGE_TIMEOUT};
use crate::manifest::{PageRecord, SnapshotManifest};
use crate::rewriter::PageRewriter;
use crate::summary::ChangeSummary;
use crate::upload::{item_id, snapshot_metadata, ArchiveUploader, UploadError};

struct Publisher {
    uploader: Box<dyn ArchiveUploader>,
    collection: String,
}

/// A monitored page after the fetch phase.
struct FetchedPage {
    candidate: CandidatePage,
    url: Option<Url>,
}

/// Builds snapshots of one site into an output tree.
pub struct SnapshotBuilder<F: Fetcher> {
    fetcher: F,
    base_url: Url,
    base_url_raw: String,
    domain: String,
    output_dir: PathBuf,
    site_dir: PathBuf,
    store: AssetStore,
    clock: Box<dyn Clock>,
    page_timeout: Duration,
    asset_timeout: Duration,
    publisher: Option<Publisher>,
}

impl<F: Fetcher> SnapshotBuilder<F> {
    /// Opens the asset store under `output_dir` and binds the builder to `base_url`'s host.
    pub fn new(
        base_url: &str,
        output_dir: impl Into<PathBuf>,
        fetcher: F,
    ) -> Result<Self, SnapshotError> {
        let parsed = Url::parse(base_url).map_err(|source| SnapshotError::InvalidBaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        let domain = parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| SnapshotError::MissingHost(base_url.to_string()))?;
        let output_dir = output_dir.into();
        let store = AssetStore::open(&output_dir)?;
        let site_dir = output_dir.join(&domain);
        Ok(Self {
            fetcher,
            base_url: parsed,
            base_url_raw: base_url.to_string(),
            domain,
            output_dir,
            site_dir,
            store,
            clock: Box::new(SystemClock),
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            asset_timeout: DEFAULT_ASSET_TIMEOUT,
            publisher: None,
        })
    }

    /// Builder configured from parsed controls. Uploading still needs [`Self::with_uploader`].
    pub fn from_controls(controls: &ArchiveControls, fetcher: F) -> Result<Self, SnapshotError> {
        Ok(Self::new(controls.base_url(), controls.output_dir(), fetcher)?
            .with_timeouts(controls.page_timeout(), controls.asset_timeout()))
    }

    /// Replaces the wall clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Overrides per-request timeouts.
    pub fn with_timeouts(mut self, page: Duration, asset: Duration) -> Self {
        self.page_timeout = page;
        self.asset_timeout = asset;
        self
    }

    /// Publishes every new snapshot through `uploader` into `collection`.
    pub fn with_uploader(
        mut self,
        uploader: impl ArchiveUploader + 'static,
        collection: impl Into<String>,
    ) -> Self {
        self.publisher = Some(Publisher {
            uploader: Box::new(uploader),
            collection: collection.into(),
        });
        self
    }

    /// Host name snapshots are filed under.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `<output>/<domain>`.
    pub fn site_dir(&self) -> &Path {
        &self.site_dir
    }

    /// Shared asset store.
    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Runs one check. Returns the new snapshot directory, or `None` when nothing changed and
    /// nothing was written.
    pub fn run_snapshot(&mut self, pages: &[String]) -> Result<Option<PathBuf>, SnapshotError> {
        info!(pages = pages.len(), site = %self.base_url_raw, "checking for changes");
        let fetched = self.fetch_pages(pages);
        let candidates: Vec<CandidatePage> =
            fetched.iter().map(|page| page.candidate.clone()).collect();

        let previous = latest_snapshot(&self.site_dir)?;
        let detector = ChangeDetector::new(
            &self.site_dir,
            self.output_dir.join(DEBUG_DIR),
            self.clock.as_ref(),
        );
        if !detector.has_changed(&candidates)? {
            info!("NO CHANGES DETECTED; skipping snapshot");
            return Ok(None);
        }
        info!("changes detected; creating snapshot");

        let now = self.clock.now();
        let timestamp = snapshot_timestamp(now);
        let snapshot_dir = self.create_snapshot_dir(&timestamp)?;

        let mut records = Vec::with_capacity(fetched.len());
        let mut used_names = HashSet::new();
        for page in &fetched {
            let record = match (&page.candidate.result, &page.url) {
                (Ok(html), Some(url)) => {
                    self.write_page(&snapshot_dir, url, html, &mut used_names)?
                }
                (Err(err), _) => PageRecord::Failed {
                    url: page.candidate.url.clone(),
                    error: err.to_string(),
                },
                (Ok(_), None) => PageRecord::Failed {
                    url: page.candidate.url.clone(),
                    error: FetchError::InvalidUrl(page.candidate.url.clone()).to_string(),
                },
            };
            records.push(record);
        }

        let mut manifest = SnapshotManifest::new(timestamp, self.base_url_raw.clone(), records);
        manifest.save(&snapshot_dir)?;

        ChangeSummary::build(
            previous.as_deref(),
            &candidates,
            &self.base_url_raw,
            now,
            &snapshot_dir,
        )?
        .write(&snapshot_dir)?;

        info!(
            timestamp = %manifest.timestamp,
            pages = manifest.pages.len(),
            unique_assets = self.store.len(),
            dir = %snapshot_dir.display(),
            "snapshot complete"
        );

        self.publish(&snapshot_dir, &mut manifest)?;
        Ok(Some(snapshot_dir))
    }

    fn fetch_pages(&self, pages: &[String]) -> Vec<FetchedPage> {
        pages
            .iter()
            .map(|entry| {
                let Some(url) = self.resolve_page(entry) else {
                    warn!(page = %entry, "could not resolve page entry");
                    return FetchedPage {
                        candidate: CandidatePage {
                            url: entry.clone(),
                            result: Err(FetchError::InvalidUrl(entry.clone())),
                        },
                        url: None,
                    };
                };
                info!(%url, "fetching page");
                let result = self
                    .fetcher
                    .fetch(&url, self.page_timeout)
                    .map(|body| body.text)
                    .inspect_err(|err| warn!(%url, error = %err, "page fetch failed"));
                FetchedPage {
                    candidate: CandidatePage {
                        url: url.to_string(),
                        result,
                    },
                    url: Some(url),
                }
            })
            .collect()
    }

    fn resolve_page(&self, entry: &str) -> Option<Url> {
        if entry.starts_with("http") {
            Url::parse(entry).ok()
        } else {
            self.base_url.join(entry).ok()
        }
    }

    fn create_snapshot_dir(&self, timestamp: &str) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.site_dir).at(&self.site_dir)?;
        let dir = self.site_dir.join(timestamp);
        match fs::create_dir(&dir) {
            Ok(()) => Ok(dir),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(SnapshotError::SnapshotExists(dir))
            }
            Err(err) => Err(err).at(&dir),
        }
    }

    fn write_page(
        &mut self,
        snapshot_dir: &Path,
        url: &Url,
        html: &str,
        used_names: &mut HashSet<String>,
    ) -> Result<PageRecord, SnapshotError> {
        let rewritten = PageRewriter::new(&mut self.store, &self.fetcher)
            .with_asset_timeout(self.asset_timeout)
            .rewrite(html, url)?;

        let file = unique_filename(page_filename(url), used_names);
        let original_file = original_filename(&file);

        let path = snapshot_dir.join(&file);
        fs::write(&path, &rewritten.html).at(&path)?;
        let original_path = snapshot_dir.join(&original_file);
        fs::write(&original_path, html).at(&original_path)?;
        info!(%url, file = %file, assets = rewritten.assets.len(), "saved page");

        Ok(PageRecord::Success {
            url: url.to_string(),
            file,
            original_file: Some(original_file),
            assets: rewritten.assets,
        })
    }

    /// Uploads the snapshot when a publisher is configured. Upload failures are logged and the
    /// local snapshot stays as written; only re-saving the manifest can fail the run.
    fn publish(
        &self,
        snapshot_dir: &Path,
        manifest: &mut SnapshotManifest,
    ) -> Result<(), SnapshotError> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };
        match self.upload_bundle(publisher, snapshot_dir, manifest) {
            Ok(url) => {
                info!(%url, "uploaded snapshot");
                manifest.internet_archive_url = Some(url);
                manifest.save(snapshot_dir)
            }
            Err(err) => {
                error!(error = %err, "upload failed; snapshot saved locally but not uploaded");
                Ok(())
            }
        }
    }

    fn upload_bundle(
        &self,
        publisher: &Publisher,
        snapshot_dir: &Path,
        manifest: &SnapshotManifest,
    ) -> Result<String, UploadError> {
        let bundle = tempfile::Builder::new()
            .prefix("snapshot_bundle_")
            .tempdir()
            .map_err(|source| UploadError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        create_bundle(
            &self.output_dir,
            snapshot_dir,
            manifest,
            &self.domain,
            bundle.path(),
        )?;
        let item = item_id(&self.domain, &manifest.timestamp);
        let metadata = snapshot_metadata(&self.domain, manifest, &publisher.collection);
        info!(item_id = %item, "uploading to Internet Archive");
        publisher.uploader.upload(bundle.path(), &item, &metadata)
    }
}

/// On-disk name for a page: the URL path with slashes flattened, `index` for the root, and a
/// forced `.html` suffix.
pub fn page_filename(url: &Url) -> String {
    let path = url.path().trim_matches('/');
    let stem = if path.is_empty() {
        "index".to_string()
    } else {
        path.replace('/', "_")
    };
    if stem.ends_with(".html") {
        stem
    } else {
        format!("{stem}.html")
    }
}

/// Sibling file holding the untouched fetched HTML.
pub fn original_filename(file: &str) -> String {
    let stem = file.strip_suffix(".html").unwrap_or(file);
    format!("{stem}_original.html")
}

/// Picks a name whose rewritten file and `_original` sibling are both unclaimed, and claims both.
fn unique_filename(name: String, used: &mut HashSet<String>) -> String {
    if claim(&name, used) {
        return name;
    }
    let stem = name.strip_suffix(".html").unwrap_or(&name).to_string();
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}_{counter}.html");
        if claim(&candidate, used) {
            return candidate;
        }
        counter += 1;
    }
}

fn claim(file: &str, used: &mut HashSet<String>) -> bool {
    let original = original_filename(file);
    if used.contains(file) || used.contains(&original) {
        return false;
    }
    used.insert(file.to_string());
    used.insert(original);
    true
}
