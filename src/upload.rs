//! Optional publication of snapshot bundles to the Internet Archive.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

use crate::fetch::BROWSER_USER_AGENT;
use crate::manifest::SnapshotManifest;

/// archive.org S3-compatible upload endpoint.
pub const IA_S3_ENDPOINT: &str = "https://s3.us.archive.org/";
/// Public landing page prefix for uploaded items.
pub const IA_DETAILS_PREFIX: &str = "https://archive.org/details/";
/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "opensource";

const CREATOR: &str = "Automated Website Archiver";
const SUBJECTS: [&str; 3] = ["web archive", "accountability", "website snapshot"];

/// Upload failures. None of them affect the local snapshot.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Access or secret key missing.
    #[error("missing Internet Archive credentials")]
    MissingCredentials,
    /// The bundle directory could not be read.
    #[error("failed to read bundle file {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Walking the bundle directory failed.
    #[error("failed to walk bundle: {0}")]
    Walk(#[from] walkdir::Error),
    /// Transport failure after retries.
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success response after retries.
    #[error("upload of {file} rejected ({status}): {body}")]
    Status {
        /// File being uploaded, relative to the bundle.
        file: String,
        /// Final response status.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// A metadata value or credential cannot be sent as a header.
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
    /// The local bundle could not be assembled.
    #[error("failed to prepare bundle: {0}")]
    Bundle(#[from] crate::error::SnapshotError),
    /// The upload endpoint is not a valid URL.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    /// The bundle contained nothing to upload.
    #[error("bundle {} is empty", .0.display())]
    EmptyBundle(PathBuf),
}

/// Ordered item metadata; a key may repeat (e.g. `subject`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveMetadata {
    entries: Vec<(String, String)>,
}

impl ArchiveMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value for `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// First value stored for `key`.
    pub fn get<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.values(key).next()
    }

    /// Every value stored for `key`, in insertion order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `x-archive-meta-*` header pairs. Repeated keys are numbered `x-archive-meta01-<key>`,
    /// `x-archive-meta02-<key>` and so on.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut headers = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let name = if self.values(key).nth(1).is_some() {
                let index = seen.entry(key.as_str()).or_default();
                *index += 1;
                format!("x-archive-meta{:02}-{key}", *index)
            } else {
                format!("x-archive-meta-{key}")
            };
            headers.push((name, header_value(value)));
        }
        headers
    }
}

/// Header-safe metadata value; non-ASCII text uses the archive's `uri(...)` escape.
fn header_value(value: &str) -> String {
    if value.is_ascii() && !value.chars().any(|c| c.is_ascii_control()) {
        value.to_string()
    } else {
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        format!("uri({encoded})")
    }
}

/// Remote item identifier for a snapshot.
pub fn item_id(domain: &str, timestamp: &str) -> String {
    let timestamp = timestamp.replace(':', "-").replace(' ', "_");
    format!("{}-snapshot-{timestamp}", domain.replace('.', "-"))
}

/// Descriptive metadata attached to an uploaded snapshot.
pub fn snapshot_metadata(
    domain: &str,
    manifest: &SnapshotManifest,
    collection: &str,
) -> ArchiveMetadata {
    let mut metadata = ArchiveMetadata::new();
    metadata.push(
        "title",
        format!("{domain} Website Snapshot - {}", manifest.timestamp),
    );
    metadata.push("mediatype", "web");
    metadata.push("collection", collection);
    metadata.push(
        "description",
        format!(
            "Automated archive of {} for accountability and research purposes. Snapshot taken on {}.",
            manifest.base_url, manifest.timestamp
        ),
    );
    metadata.push("subject", SUBJECTS[0]);
    metadata.push("subject", SUBJECTS[1]);
    metadata.push("subject", domain);
    metadata.push("subject", SUBJECTS[2]);
    metadata.push("date", manifest.timestamp.as_str());
    metadata.push("creator", CREATOR);
    metadata.push("source_url", manifest.base_url.as_str());
    metadata.push("pages_archived", manifest.pages.len().to_string());
    metadata
}

/// Publishes a bundle directory and returns its durable public URL.
pub trait ArchiveUploader {
    /// Uploads every file under `bundle_dir` into item `item_id`.
    fn upload(
        &self,
        bundle_dir: &Path,
        item_id: &str,
        metadata: &ArchiveMetadata,
    ) -> Result<String, UploadError>;
}

/// Blocking client for the archive.org S3-compatible API.
#[derive(Clone)]
pub struct InternetArchiveUploader {
    client: Client,
    endpoint: Url,
    max_retries: usize,
}

impl InternetArchiveUploader {
    /// Builds a client authenticated with the given S3 keys.
    pub fn new(access_key: &str, secret_key: &str) -> Result<Self, UploadError> {
        let (access_key, secret_key) = (access_key.trim(), secret_key.trim());
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(UploadError::MissingCredentials);
        }
        let mut headers = HeaderMap::new();
        let auth = format!("LOW {access_key}:{secret_key}");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| UploadError::InvalidHeader(AUTHORIZATION.to_string()))?,
        );
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(300))
            .default_headers(headers)
            .build()?;
        let endpoint = Url::parse(IA_S3_ENDPOINT)?;
        Ok(Self {
            client,
            endpoint,
            max_retries: 3,
        })
    }

    /// Points the client at a different S3-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    fn object_url(&self, item_id: &str, relative: &Path) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(item_id);
            for component in relative.components() {
                segments.push(&component.as_os_str().to_string_lossy());
            }
        }
        url
    }

    fn put(
        &self,
        url: &Url,
        file: &str,
        body: Vec<u8>,
        headers: &HeaderMap,
    ) -> Result<(), UploadError> {
        let mut attempt = 0usize;
        loop {
            let response = self
                .client
                .put(url.as_str())
                .headers(headers.clone())
                .body(body.clone())
                .send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let body_text = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(UploadError::Status {
                        file: file.to_string(),
                        status,
                        body: body_text,
                    });
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

impl ArchiveUploader for InternetArchiveUploader {
    fn upload(
        &self,
        bundle_dir: &Path,
        item_id: &str,
        metadata: &ArchiveMetadata,
    ) -> Result<String, UploadError> {
        let files = bundle_files(bundle_dir)?;
        if files.is_empty() {
            return Err(UploadError::EmptyBundle(bundle_dir.to_path_buf()));
        }

        let mut item_headers = HeaderMap::new();
        item_headers.insert("x-archive-auto-make-bucket", HeaderValue::from_static("1"));
        for (name, value) in metadata.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UploadError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| UploadError::InvalidHeader(value.clone()))?;
            item_headers.insert(name, value);
        }

        info!(item_id, files = files.len(), "uploading bundle");
        for (index, relative) in files.iter().enumerate() {
            let path = bundle_dir.join(relative);
            let body = fs::read(&path).map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
            let url = self.object_url(item_id, relative);
            let name = relative.to_string_lossy();
            // bucket creation and metadata ride on the first request
            let headers = if index == 0 {
                item_headers.clone()
            } else {
                HeaderMap::new()
            };
            self.put(&url, &name, body, &headers)?;
            debug!(file = %name, "uploaded");
        }

        Ok(format!("{IA_DETAILS_PREFIX}{item_id}"))
    }
}

/// Regular files under `dir`, relative and sorted.
fn bundle_files(dir: &Path) -> Result<Vec<PathBuf>, UploadError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(dir) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PageRecord;
    use pretty_assertions::assert_eq;

    fn manifest() -> SnapshotManifest {
        SnapshotManifest::new(
            "2026-06-01_04-00-00".into(),
            "https://www.example.com".into(),
            vec![PageRecord::Failed {
                url: "https://www.example.com/".into(),
                error: "HTTP status 503 Service Unavailable".into(),
            }],
        )
    }

    #[test]
    fn item_ids_replace_dots() {
        assert_eq!(
            item_id("www.example.com", "2026-06-01_04-00-00"),
            "www-example-com-snapshot-2026-06-01_04-00-00"
        );
    }

    #[test]
    fn metadata_numbers_repeated_subjects() {
        let metadata = snapshot_metadata("www.example.com", &manifest(), DEFAULT_COLLECTION);
        assert_eq!(metadata.get("collection"), Some("opensource"));
        assert_eq!(metadata.get("pages_archived"), Some("1"));
        assert_eq!(
            metadata.values("subject").collect::<Vec<_>>(),
            vec!["web archive", "accountability", "www.example.com", "website snapshot"]
        );

        let headers = metadata.headers();
        let names: Vec<&str> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert!(names.contains(&"x-archive-meta-title"));
        assert!(names.contains(&"x-archive-meta-mediatype"));
        assert!(names.contains(&"x-archive-meta01-subject"));
        assert!(names.contains(&"x-archive-meta04-subject"));
        assert!(!names.contains(&"x-archive-meta-subject"));
    }

    #[test]
    fn non_ascii_values_are_uri_escaped() {
        assert_eq!(header_value("plain text"), "plain text");
        assert_eq!(header_value("café"), "uri(caf%C3%A9)");
        assert_eq!(header_value("a b→c"), "uri(a%20b%E2%86%92c)");
    }

    #[test]
    fn object_urls_escape_path_segments() {
        let uploader = InternetArchiveUploader::new("access", "secret").unwrap();
        let url = uploader.object_url("item-1", Path::new("assets/css/a b.css"));
        assert_eq!(
            url.as_str(),
            "https://s3.us.archive.org/item-1/assets/css/a%20b.css"
        );
    }

    #[test]
    fn blank_credentials_are_rejected() {
        assert!(matches!(
            InternetArchiveUploader::new(" ", "secret"),
            Err(UploadError::MissingCredentials)
        ));
    }

    #[test]
    fn bundle_files_are_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("assets/js")).unwrap();
        fs::write(dir.path().join("index.html"), "x").unwrap();
        fs::write(dir.path().join("assets/js/a.js"), "x").unwrap();
        fs::write(dir.path().join("README.md"), "x").unwrap();
        let files = bundle_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("README.md"),
                PathBuf::from("assets/js/a.js"),
                PathBuf::from("index.html"),
            ]
        );
    }
}
