#![warn(missing_docs)]
//! Core library entry points for the sitesnap website archiver.

pub mod assets;
pub mod bundle;
pub mod clock;
pub mod controls;
pub mod detector;
mod error;
pub mod fetch;
pub mod html;
pub mod manifest;
pub mod normalizer;
pub mod rewriter;
pub mod runtime;
pub mod snapshot;
pub mod summary;
pub mod upload;

pub use assets::{content_hash, AssetBucket, AssetStore};
pub use bundle::{create_bundle, BundleStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controls::{ArchiveControls, Cli, InternetArchiveSettings};
pub use detector::{CandidatePage, ChangeDetector};
pub use error::SnapshotError;
pub use fetch::{FetchError, FetchedBody, Fetcher, HttpFetcher, StaticFetcher};
pub use manifest::{PageRecord, SnapshotManifest};
pub use normalizer::normalize;
pub use rewriter::{PageRewriter, RewrittenPage};
pub use runtime::{next_run_after, run as run_archiver, RunOutcome};
pub use snapshot::SnapshotBuilder;
pub use summary::ChangeSummary;
pub use upload::{ArchiveUploader, InternetArchiveUploader, UploadError};
