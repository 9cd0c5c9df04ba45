//! Archive run configuration and the command-line interface that produces it.

use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::{DEFAULT_ASSET_TIMEOUT, DEFAULT_PAGE_TIMEOUT};
use crate::upload::DEFAULT_COLLECTION;

/// Internet Archive publication settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternetArchiveSettings {
    collection: String,
    access_key: String,
    secret_key: String,
}

impl InternetArchiveSettings {
    /// Constructs upload settings.
    pub fn new(collection: String, access_key: String, secret_key: String) -> Self {
        Self {
            collection,
            access_key,
            secret_key,
        }
    }

    /// Target collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// S3 access key.
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// S3 secret key.
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

/// Immutable knobs for one archiver instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveControls {
    base_url: String,
    pages: Vec<String>,
    output_dir: PathBuf,
    interval_hours: u32,
    page_timeout: Duration,
    asset_timeout: Duration,
    internet_archive: Option<InternetArchiveSettings>,
}

impl ArchiveControls {
    /// Controls for `base_url` with default timeouts, a 4 hour interval and no upload.
    ///
    /// An empty page list monitors the base URL alone.
    pub fn new(base_url: impl Into<String>, pages: Vec<String>, output_dir: PathBuf) -> Self {
        let base_url = base_url.into();
        let pages = if pages.is_empty() {
            vec![base_url.clone()]
        } else {
            pages
        };
        Self {
            base_url,
            pages,
            output_dir,
            interval_hours: 4,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            asset_timeout: DEFAULT_ASSET_TIMEOUT,
            internet_archive: None,
        }
    }

    /// Overrides the scheduling interval (clamped to 1..=24 hours).
    pub fn with_interval_hours(mut self, hours: u32) -> Self {
        self.interval_hours = hours.clamp(1, 24);
        self
    }

    /// Overrides per-request timeouts.
    pub fn with_timeouts(mut self, page: Duration, asset: Duration) -> Self {
        self.page_timeout = page;
        self.asset_timeout = asset;
        self
    }

    /// Enables Internet Archive upload of every new snapshot.
    pub fn with_internet_archive(mut self, settings: InternetArchiveSettings) -> Self {
        self.internet_archive = Some(settings);
        self
    }

    /// Site root that relative page entries resolve against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Monitored page entries, absolute or relative to [`Self::base_url`].
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    /// Root of the snapshot and asset trees.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Hours between scheduled runs.
    pub fn interval_hours(&self) -> u32 {
        self.interval_hours
    }

    /// Timeout for each page fetch.
    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }

    /// Timeout for each asset fetch.
    pub fn asset_timeout(&self) -> Duration {
        self.asset_timeout
    }

    /// Upload settings when publication is enabled.
    pub fn internet_archive(&self) -> Option<&InternetArchiveSettings> {
        self.internet_archive.as_ref()
    }
}

/// Command-line interface for the archiver binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sitesnap",
    version,
    about = "Change-aware website snapshots with deduplicated assets"
)]
pub struct Cli {
    /// Site root; relative page entries resolve against it
    #[arg(long, env = "SITESNAP_BASE_URL")]
    pub base_url: String,

    /// Page to monitor (repeatable or comma separated); defaults to the base URL
    #[arg(long = "page", env = "SITESNAP_PAGES", value_delimiter = ',')]
    pub pages: Vec<String>,

    /// Root directory for snapshots and the shared asset store
    #[arg(long, env = "SITESNAP_OUTPUT_DIR", default_value = "snapshots")]
    pub output_dir: PathBuf,

    /// Hours between runs, aligned to midnight
    #[arg(
        long,
        env = "SITESNAP_INTERVAL_HOURS",
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..=24)
    )]
    pub interval_hours: u32,

    /// Run a single snapshot immediately and exit
    #[arg(long, env = "SITESNAP_ONCE", default_value_t = false)]
    pub once: bool,

    /// Seconds to wait for each page
    #[arg(long, env = "SITESNAP_PAGE_TIMEOUT_SECS", default_value_t = 15)]
    pub page_timeout_secs: u64,

    /// Seconds to wait for each asset
    #[arg(long, env = "SITESNAP_ASSET_TIMEOUT_SECS", default_value_t = 10)]
    pub asset_timeout_secs: u64,

    /// Upload every new snapshot to the Internet Archive
    #[arg(long, env = "SITESNAP_INTERNET_ARCHIVE", default_value_t = false)]
    pub internet_archive: bool,

    /// Internet Archive collection
    #[arg(long, env = "SITESNAP_IA_COLLECTION", default_value = DEFAULT_COLLECTION)]
    pub ia_collection: String,

    /// Internet Archive S3 access key
    #[arg(long, env = "SITESNAP_IA_ACCESS_KEY", default_value = "", hide_env_values = true)]
    pub ia_access_key: String,

    /// Internet Archive S3 secret key
    #[arg(long, env = "SITESNAP_IA_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub ia_secret_key: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Converts the parsed CLI into `ArchiveControls`.
    pub fn build_controls(&self) -> ArchiveControls {
        let controls = ArchiveControls::new(
            self.base_url.trim(),
            self.pages_vec(),
            self.output_dir.clone(),
        )
        .with_interval_hours(self.interval_hours)
        .with_timeouts(
            Duration::from_secs(self.page_timeout_secs),
            Duration::from_secs(self.asset_timeout_secs),
        );
        if self.internet_archive {
            controls.with_internet_archive(InternetArchiveSettings::new(
                self.ia_collection.trim().to_string(),
                self.ia_access_key.clone(),
                self.ia_secret_key.clone(),
            ))
        } else {
            controls
        }
    }

    fn pages_vec(&self) -> Vec<String> {
        self.pages
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
