//! Content-addressed asset storage shared by every snapshot under one output directory.
//!
//! Layout: `<output>/assets/<bucket>/<hash><ext>` plus the `<output>/assets/asset_cache.json`
//! index mapping content hashes to output-relative paths. One physical file exists per distinct
//! byte sequence no matter how many pages or snapshots reference it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{write_atomic, IoContext, SnapshotError};
use crate::fetch::{FetchError, Fetcher};

/// Directory (relative to the output root) holding every stored asset.
pub const ASSETS_DIR: &str = "assets";
/// File name of the persistent hash → path index.
pub const INDEX_FILE: &str = "asset_cache.json";
/// Hex characters of the SHA-256 digest kept as the dedup key.
pub const HASH_LEN: usize = 16;
/// Extension used when the source URL carries none.
pub const FALLBACK_EXTENSION: &str = ".bin";

/// Type bucket an asset is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetBucket {
    /// Raster and vector images, favicons.
    Images,
    /// Stylesheets.
    Css,
    /// Scripts.
    Js,
    /// Web fonts.
    Fonts,
    /// Anything unrecognized.
    Other,
}

impl AssetBucket {
    /// Classifies a lowercase extension including its leading dot.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            ".jpg" | ".jpeg" | ".png" | ".gif" | ".svg" | ".webp" | ".ico" => Self::Images,
            ".css" => Self::Css,
            ".js" => Self::Js,
            ".woff" | ".woff2" | ".ttf" | ".eot" => Self::Fonts,
            _ => Self::Other,
        }
    }

    /// Directory name under `assets/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Css => "css",
            Self::Js => "js",
            Self::Fonts => "fonts",
            Self::Other => "other",
        }
    }
}

/// Truncated SHA-256 of the exact bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}

/// Extension of the URL's last path segment, lowercased, or [`FALLBACK_EXTENSION`].
pub fn asset_extension(url: &Url) -> String {
    let segment = url.path().rsplit('/').next().unwrap_or_default();
    match segment.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &segment[idx + 1..];
            if !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                format!(".{}", ext.to_ascii_lowercase())
            } else {
                FALLBACK_EXTENSION.to_string()
            }
        }
        _ => FALLBACK_EXTENSION.to_string(),
    }
}

/// Owner of the on-disk asset tree and its index.
///
/// The index is read once in [`AssetStore::open`] and rewritten after every insertion, so a
/// completed [`AssetStore::store`] call is durable before the caller moves on.
#[derive(Debug)]
pub struct AssetStore {
    output_dir: PathBuf,
    index: BTreeMap<String, String>,
}

impl AssetStore {
    /// Opens (creating if needed) the asset tree under `output_dir`.
    pub fn open(output_dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let output_dir = output_dir.into();
        let assets_dir = output_dir.join(ASSETS_DIR);
        fs::create_dir_all(&assets_dir).at(&assets_dir)?;

        let index_path = assets_dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = fs::read(&index_path).at(&index_path)?;
            serde_json::from_slice(&raw).map_err(|err| SnapshotError::json(&index_path, err))?
        } else {
            BTreeMap::new()
        };
        debug!(entries = index.len(), path = %index_path.display(), "loaded asset index");

        Ok(Self { output_dir, index })
    }

    /// Root directory that stored relative paths resolve against.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Location of the persistent index file.
    pub fn index_path(&self) -> PathBuf {
        self.output_dir.join(ASSETS_DIR).join(INDEX_FILE)
    }

    /// Number of distinct assets ever stored.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no asset has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Relative path registered for a content hash.
    pub fn path_for_hash(&self, hash: &str) -> Option<&str> {
        self.index.get(hash).map(String::as_str)
    }

    /// Downloads an asset. Failures are logged here and handed back for the caller to skip.
    pub fn fetch_bytes<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        url: &Url,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        fetcher
            .fetch(url, timeout)
            .map(|body| body.bytes)
            .inspect_err(|err| warn!(%url, error = %err, "failed to download asset"))
    }

    /// Stores `bytes`, returning the output-relative path of the single copy on disk.
    pub fn store(&mut self, url: &Url, bytes: &[u8]) -> Result<String, SnapshotError> {
        let hash = content_hash(bytes);
        if let Some(existing) = self.index.get(&hash) {
            debug!(%url, path = %existing, "asset already cached");
            return Ok(existing.clone());
        }

        let ext = asset_extension(url);
        let bucket = AssetBucket::from_extension(&ext);
        let bucket_dir = self.output_dir.join(ASSETS_DIR).join(bucket.dir_name());
        fs::create_dir_all(&bucket_dir).at(&bucket_dir)?;

        let filename = format!("{hash}{ext}");
        let file_path = bucket_dir.join(&filename);
        fs::write(&file_path, bytes).at(&file_path)?;

        let relative = format!("{ASSETS_DIR}/{}/{filename}", bucket.dir_name());
        self.index.insert(hash, relative.clone());
        self.persist()?;

        info!(%url, path = %relative, "saved new asset");
        Ok(relative)
    }

    fn persist(&self) -> Result<(), SnapshotError> {
        let path = self.index_path();
        let encoded =
            serde_json::to_vec_pretty(&self.index).map_err(|err| SnapshotError::json(&path, err))?;
        write_atomic(&path, &encoded)
    }
}
