//! Attribute-level HTML helpers built on `lol_html`.
//!
//! Markup outside the touched attributes is passed through byte-for-byte, so a rewritten
//! page differs from the fetched one only where an asset reference was relocated.

use std::cell::RefCell;
use std::collections::HashMap;

use html_escape::decode_html_entities;
use lol_html::html_content::Element;
use lol_html::{element, rewrite_str, HandlerResult, RewriteStrSettings};
use thiserror::Error;

/// Embedded resource tags that get localized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// `<img src>`
    Image,
    /// `<link rel="stylesheet" href>`
    Stylesheet,
    /// `<script src>`
    Script,
}

impl AssetKind {
    /// Attribute carrying the reference.
    pub fn attribute(self) -> &'static str {
        match self {
            Self::Image | Self::Script => "src",
            Self::Stylesheet => "href",
        }
    }
}

const IMAGE_SELECTOR: &str = "img[src]";
const STYLESHEET_SELECTOR: &str = "link[rel~=\"stylesheet\"][href]";
const SCRIPT_SELECTOR: &str = "script[src]";

/// One embedded resource reference, entity-decoded, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    /// Which tag it came from.
    pub kind: AssetKind,
    /// Attribute value as written in the page (possibly relative).
    pub value: String,
}

/// Everything a single read-only pass over a page found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScan {
    /// Asset references in document order.
    pub references: Vec<AssetReference>,
    /// Elements whose inline `style` embeds `url(...)`; these are not localized.
    pub inline_style_urls: usize,
}

/// Errors surfaced while walking markup.
#[derive(Debug, Error)]
pub enum HtmlRewriteError {
    /// The rewriter rejected the markup or a handler failed.
    #[error("html rewrite error: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

/// Collects every image, stylesheet and script reference plus inline-style URL usage.
pub fn scan_asset_references(html: &str) -> Result<PageScan, HtmlRewriteError> {
    let scan = RefCell::new(PageScan::default());

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(IMAGE_SELECTOR, |el| {
                    record_reference(&scan, el, AssetKind::Image);
                    Ok(())
                }),
                element!(STYLESHEET_SELECTOR, |el| {
                    record_reference(&scan, el, AssetKind::Stylesheet);
                    Ok(())
                }),
                element!(SCRIPT_SELECTOR, |el| {
                    record_reference(&scan, el, AssetKind::Script);
                    Ok(())
                }),
                element!("[style]", |el| {
                    if el
                        .get_attribute("style")
                        .is_some_and(|style| style.contains("url("))
                    {
                        scan.borrow_mut().inline_style_urls += 1;
                    }
                    Ok(())
                }),
            ],
            strict: false,
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(scan.into_inner())
}

fn record_reference(scan: &RefCell<PageScan>, el: &Element<'_, '_>, kind: AssetKind) {
    if let Some(raw) = el.get_attribute(kind.attribute()) {
        let value = decode_html_entities(raw.trim()).into_owned();
        if !value.is_empty() {
            scan.borrow_mut()
                .references
                .push(AssetReference { kind, value });
        }
    }
}

/// Replaces asset references whose decoded value appears in `replacements`.
///
/// References without an entry keep pointing at their original location.
pub fn rewrite_asset_references(
    html: &str,
    replacements: &HashMap<String, String>,
) -> Result<String, HtmlRewriteError> {
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(IMAGE_SELECTOR, |el| {
                    replace_reference(el, AssetKind::Image, replacements)
                }),
                element!(STYLESHEET_SELECTOR, |el| {
                    replace_reference(el, AssetKind::Stylesheet, replacements)
                }),
                element!(SCRIPT_SELECTOR, |el| {
                    replace_reference(el, AssetKind::Script, replacements)
                }),
            ],
            strict: false,
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(rewritten)
}

fn replace_reference(
    el: &mut Element<'_, '_>,
    kind: AssetKind,
    replacements: &HashMap<String, String>,
) -> HandlerResult {
    let attribute = kind.attribute();
    let Some(raw) = el.get_attribute(attribute) else {
        return Ok(());
    };
    let value = decode_html_entities(raw.trim());
    if let Some(local) = replacements.get(value.as_ref()) {
        el.set_attribute(attribute, local)?;
    }
    Ok(())
}
