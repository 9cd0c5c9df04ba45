//! Localizes a fetched page's embedded resources into the shared asset tree.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::assets::AssetStore;
use crate::error::SnapshotError;
use crate::fetch::{Fetcher, DEFAULT_ASSET_TIMEOUT};
use crate::html::{rewrite_asset_references, scan_asset_references};

/// Prefix from a page file (`<output>/<domain>/<timestamp>/page.html`) back to `<output>/`.
pub const ASSET_LINK_PREFIX: &str = "../../";

/// Result of rewriting one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenPage {
    /// Page markup with localized references.
    pub html: String,
    /// Output-relative asset paths referenced by the page, in document order.
    pub assets: Vec<String>,
}

/// Rewrites image, stylesheet and script references to point at deduplicated local copies.
pub struct PageRewriter<'a, F: Fetcher + ?Sized> {
    store: &'a mut AssetStore,
    fetcher: &'a F,
    asset_timeout: Duration,
}

impl<'a, F: Fetcher + ?Sized> PageRewriter<'a, F> {
    /// Creates a rewriter using the default asset timeout.
    pub fn new(store: &'a mut AssetStore, fetcher: &'a F) -> Self {
        Self {
            store,
            fetcher,
            asset_timeout: DEFAULT_ASSET_TIMEOUT,
        }
    }

    /// Overrides the per-asset timeout.
    pub fn with_asset_timeout(mut self, timeout: Duration) -> Self {
        self.asset_timeout = timeout;
        self
    }

    /// Downloads and stores every referenced asset, then rewrites the references that succeeded.
    ///
    /// Asset download failures only leave the remote reference in place. Storage failures are
    /// returned because the asset tree can no longer be trusted.
    pub fn rewrite(&mut self, html: &str, page_url: &Url) -> Result<RewrittenPage, SnapshotError> {
        let scan = match scan_asset_references(html) {
            Ok(scan) => scan,
            Err(err) => {
                warn!(url = %page_url, error = %err, "could not scan page for assets; keeping markup as fetched");
                return Ok(unchanged(html));
            }
        };

        if scan.inline_style_urls > 0 {
            warn!(
                url = %page_url,
                count = scan.inline_style_urls,
                "inline style with url() found; left pointing at remote resources"
            );
        }

        let mut replacements: HashMap<String, String> = HashMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut assets = Vec::new();

        for reference in scan.references {
            if let Some(local) = replacements.get(&reference.value) {
                if let Some(path) = local.strip_prefix(ASSET_LINK_PREFIX) {
                    assets.push(path.to_string());
                }
                continue;
            }
            if failed.contains(&reference.value) {
                continue;
            }

            let Some(asset_url) = resolve_reference(page_url, &reference.value) else {
                debug!(url = %page_url, reference = %reference.value, "skipping non-fetchable reference");
                continue;
            };

            let bytes = match self
                .store
                .fetch_bytes(self.fetcher, &asset_url, self.asset_timeout)
            {
                Ok(bytes) => bytes,
                Err(_) => {
                    failed.insert(reference.value);
                    continue;
                }
            };

            let path = self.store.store(&asset_url, &bytes)?;
            replacements.insert(reference.value, format!("{ASSET_LINK_PREFIX}{path}"));
            assets.push(path);
        }

        if replacements.is_empty() {
            return Ok(RewrittenPage {
                html: html.to_string(),
                assets,
            });
        }

        match rewrite_asset_references(html, &replacements) {
            Ok(html) => Ok(RewrittenPage { html, assets }),
            Err(err) => {
                warn!(url = %page_url, error = %err, "asset rewrite failed; keeping markup as fetched");
                Ok(unchanged(html))
            }
        }
    }
}

fn unchanged(html: &str) -> RewrittenPage {
    RewrittenPage {
        html: html.to_string(),
        assets: Vec::new(),
    }
}

/// Resolves a (possibly relative) reference against the page; only http(s) targets qualify.
pub fn resolve_reference(page_url: &Url, reference: &str) -> Option<Url> {
    let resolved = page_url.join(reference).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::content_hash;
    use crate::fetch::{FetchError, StaticFetcher};

    fn page_url() -> Url {
        Url::parse("https://example.com/blog/post").unwrap()
    }

    #[test]
    fn resolves_relative_and_rejects_data_uris() {
        let base = page_url();
        assert_eq!(
            resolve_reference(&base, "../img/a.png").unwrap().as_str(),
            "https://example.com/img/a.png"
        );
        assert_eq!(
            resolve_reference(&base, "//cdn.test/x.js").unwrap().as_str(),
            "https://cdn.test/x.js"
        );
        assert!(resolve_reference(&base, "data:image/png;base64,AAAA").is_none());
        assert!(resolve_reference(&base, "javascript:void(0)").is_none());
    }

    #[test]
    fn rewrites_successful_assets_and_keeps_failed_ones_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AssetStore::open(dir.path()).unwrap();
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://example.com/logo.png", "PNG");
        fetcher.insert("https://example.com/site.css", "body{}");
        fetcher.insert_error(
            "https://example.com/app.js",
            FetchError::Connection("reset".into()),
        );

        let html = r#"<link rel="stylesheet" href="/site.css"><img src="/logo.png"><script src="/app.js"></script><img src="/logo.png">"#;
        let page = PageRewriter::new(&mut store, &fetcher)
            .rewrite(html, &page_url())
            .expect("rewrite");

        let png = format!("assets/images/{}.png", content_hash(b"PNG"));
        let css = format!("assets/css/{}.css", content_hash(b"body{}"));
        assert_eq!(page.assets, vec![css.clone(), png.clone(), png.clone()]);
        assert!(page.html.contains(&format!(r#"href="../../{css}""#)));
        assert!(page.html.contains(&format!(r#"src="../../{png}""#)));
        assert!(page.html.contains(r#"<script src="/app.js"></script>"#));
        assert_eq!(fetcher.request_count("https://example.com/logo.png"), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn page_without_assets_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AssetStore::open(dir.path()).unwrap();
        let fetcher = StaticFetcher::new();
        let html = "<html><body><p style=\"background:url(x.png)\">hi</p></body></html>";
        let page = PageRewriter::new(&mut store, &fetcher)
            .rewrite(html, &page_url())
            .expect("rewrite");
        assert_eq!(page.html, html);
        assert!(page.assets.is_empty());
        assert!(fetcher.requests().is_empty());
    }
}
