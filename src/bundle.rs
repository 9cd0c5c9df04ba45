//! Packs one snapshot and the assets it references into a self-contained directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{IoContext, SnapshotError};
use crate::manifest::{PageRecord, SnapshotManifest, MANIFEST_FILE};
use crate::rewriter::ASSET_LINK_PREFIX;
use crate::summary::SUMMARY_FILE;

/// Name of the generated readme inside a bundle.
pub const README_FILE: &str = "README.md";

/// What ended up in a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleStats {
    /// Rewritten pages copied.
    pub pages: usize,
    /// Distinct assets referenced by those pages.
    pub assets: usize,
}

/// Builds a bundle of `snapshot_dir` under `dest`.
///
/// Pages are copied with their asset links pointing at `./assets/`, so the bundle opens in a
/// browser straight from disk. Assets missing from the store are skipped with a warning.
pub fn create_bundle(
    output_dir: &Path,
    snapshot_dir: &Path,
    manifest: &SnapshotManifest,
    domain: &str,
    dest: &Path,
) -> Result<BundleStats, SnapshotError> {
    fs::create_dir_all(dest).at(dest)?;
    let local_prefix = format!("{ASSET_LINK_PREFIX}assets/");

    let mut pages = 0;
    let mut assets_used = BTreeSet::new();
    for record in &manifest.pages {
        let PageRecord::Success { file, assets, .. } = record else {
            continue;
        };
        let source = snapshot_dir.join(file);
        let raw = fs::read(&source).at(&source)?;
        let html = String::from_utf8_lossy(&raw).replace(&local_prefix, "./assets/");
        let target = dest.join(file);
        copy_parent(&target)?;
        fs::write(&target, html).at(&target)?;
        pages += 1;
        assets_used.extend(assets.iter().map(String::as_str));
    }

    for asset in &assets_used {
        let source = output_dir.join(asset);
        if !source.exists() {
            warn!(asset, "asset missing from store; omitted from bundle");
            continue;
        }
        let target = dest.join(asset);
        copy_parent(&target)?;
        fs::copy(&source, &target).at(&source)?;
    }

    for name in [MANIFEST_FILE, SUMMARY_FILE] {
        let source = snapshot_dir.join(name);
        if source.exists() {
            fs::copy(&source, dest.join(name)).at(&source)?;
        }
    }

    let readme = dest.join(README_FILE);
    fs::write(&readme, render_readme(manifest, domain, assets_used.len())).at(&readme)?;

    let stats = BundleStats {
        pages,
        assets: assets_used.len(),
    };
    info!(pages = stats.pages, assets = stats.assets, dest = %dest.display(), "bundle created");
    Ok(stats)
}

fn copy_parent(target: &Path) -> Result<(), SnapshotError> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent).at(parent),
        None => Ok(()),
    }
}

fn render_readme(manifest: &SnapshotManifest, domain: &str, assets: usize) -> String {
    format!(
        "# Website Archive: {domain}
Snapshot taken: {timestamp}
Source: {source}

## How to view:
1. Extract this archive
2. Open any .html file in your web browser
3. All assets are included in the assets/ folder

## Contents:
- {pages} pages archived
- {assets} unique assets included
- CHANGES.txt - Summary of what changed since last snapshot

## About this archive:
This archive was created for accountability and research purposes.
Each snapshot is self-contained with all necessary assets to view the pages
exactly as they appeared at the time of archiving.

See CHANGES.txt for details on what changed compared to the previous snapshot.
",
        timestamp = manifest.timestamp,
        source = manifest.base_url,
        pages = manifest.pages.len(),
    )
}
