//! Canonicalizes fetched HTML into a comparison-stable string.
//!
//! The output is only ever compared for equality; it is never stored or served. Each pass
//! assumes the previous ones already ran, so the order in [`normalize`] is load-bearing:
//! the regex passes rely on the tag-tree round trip having fixed attribute quoting.

use std::borrow::Cow;
use std::sync::OnceLock;

use html5ever::driver::{parse_document, ParseOpts};
use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use lol_html::html_content::Element;
use lol_html::{element, rewrite_str, HandlerResult, RewriteStrSettings};
use regex::{NoExpand, Regex};
use scraper::Html;

/// Query parameters injected by analytics tooling; dropped from every `href`/`src`.
pub const TRACKING_PARAMS: &[&str] = &["_gl", "_ga"];
/// Replacement for relative-time phrases such as `5 days ago`.
pub const TIME_PLACEHOLDER: &str = "[TIME]";
/// Replacement for per-request platform tokens.
pub const REMOVED_PLACEHOLDER: &str = "[REMOVED]";

static RE_TRACKING: OnceLock<Regex> = OnceLock::new();
static RE_CF_PARAMS: OnceLock<Regex> = OnceLock::new();
static RE_CF_RAY: OnceLock<Regex> = OnceLock::new();
static RE_CF_TOKEN: OnceLock<Regex> = OnceLock::new();
static RE_RELATIVE_TIME: OnceLock<Regex> = OnceLock::new();
static RE_PIXEL: OnceLock<Regex> = OnceLock::new();

fn tracking_re() -> &'static Regex {
    RE_TRACKING.get_or_init(|| {
        let names = TRACKING_PARAMS
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        // `&amp;` covers attribute values read back before entity decoding.
        Regex::new(&format!(r#"(?:\?|&amp;|&)(?:{names})=[^"'>\s]+"#))
            .expect("tracking parameter regex")
    })
}

fn cf_params_re() -> &'static Regex {
    RE_CF_PARAMS.get_or_init(|| {
        Regex::new(r"window\.__CF\$cv\$params=\{[^}]+\}").expect("cf params regex")
    })
}

fn cf_ray_re() -> &'static Regex {
    RE_CF_RAY.get_or_init(|| Regex::new(r"r:'[a-f0-9]+'").expect("cf ray regex"))
}

fn cf_token_re() -> &'static Regex {
    RE_CF_TOKEN.get_or_init(|| Regex::new(r"t:'[A-Za-z0-9+/=]+'").expect("cf token regex"))
}

fn relative_time_re() -> &'static Regex {
    RE_RELATIVE_TIME.get_or_init(|| {
        // Longer unit spellings come first so `minutes` is not cut to `min`.
        Regex::new(r"(?i)\d+\s*(?:hours?|h\.|minutes?|mins?|days?|weeks?|months?)\s*(?:ago)?\.?")
            .expect("relative time regex")
    })
}

fn pixel_re() -> &'static Regex {
    RE_PIXEL.get_or_init(|| Regex::new(r"<img[^>]*facebook\.com/tr[^>]*>").expect("pixel regex"))
}

/// Normalizes raw HTML for equality comparison.
///
/// Pure and deterministic: two fetches of the same content that differ only in tracking
/// parameters, Cloudflare challenge tokens, relative timestamps, pixel tags or whitespace
/// produce identical output, and `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(html: &str) -> String {
    let serialized = parse_without_scripting(html).html();
    let text = strip_tracking_attributes(&serialized);
    let text = replace_ephemeral_tokens(&text);
    let text = relative_time_re().replace_all(&text, NoExpand(TIME_PLACEHOLDER));
    let text = pixel_re().replace_all(&text, NoExpand(""));
    collapse_whitespace(&text)
}

/// Parses as a browser with scripting off would, so `<noscript>` children are elements rather
/// than raw text that re-escapes on every serialization.
fn parse_without_scripting(html: &str) -> Html {
    let opts = ParseOpts {
        tree_builder: TreeBuilderOpts {
            scripting_enabled: false,
            ..TreeBuilderOpts::default()
        },
        ..ParseOpts::default()
    };
    parse_document(Html::new_document(), opts).one(html)
}

/// Removes tracking parameters from a single URL-ish attribute value.
///
/// Borrows when nothing matched so callers can skip rewriting untouched attributes.
pub fn strip_tracking_params(value: &str) -> Cow<'_, str> {
    tracking_re().replace_all(value, NoExpand(""))
}

fn strip_tracking_attributes(html: &str) -> String {
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("[href]", |el| strip_attribute(el, "href")),
                element!("[src]", |el| strip_attribute(el, "src")),
            ],
            strict: false,
            ..RewriteStrSettings::default()
        },
    );
    // Normalization never fails; the untouched serialization is still a stable key.
    rewritten.unwrap_or_else(|_| html.to_string())
}

fn strip_attribute(el: &mut Element<'_, '_>, name: &str) -> HandlerResult {
    if let Some(value) = el.get_attribute(name) {
        if let Cow::Owned(stripped) = strip_tracking_params(&value) {
            el.set_attribute(name, &stripped)?;
        }
    }
    Ok(())
}

fn replace_ephemeral_tokens(text: &str) -> String {
    let text = cf_params_re().replace_all(text, NoExpand("window.__CF$cv$params={[REMOVED]}"));
    let text = cf_ray_re().replace_all(&text, NoExpand("r:'[REMOVED]'"));
    let text = cf_token_re().replace_all(&text, NoExpand("t:'[REMOVED]'"));
    text.into_owned()
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Example</title>
    <link rel="stylesheet" href="/site.css?_ga=2.1234.5678">
    <script>window.__CF$cv$params={r:'8f1a2b3c4d',t:'MTczMDAwMDAwMC4wMDA='};</script>
  </head>
  <body>
    <h1>News</h1>
    <p>Posted 5 days ago by <a href="/team?_gl=1*abc*def">the team</a>.</p>
    <img height="1" width="1" src="https://www.facebook.com/tr?id=42&ev=PageView">
  </body>
</html>
"#;

    #[test]
    fn tracking_params_do_not_register_as_changes() {
        assert_eq!(
            normalize(r#"<a href="/p?_gl=abc">x</a>"#),
            normalize(r#"<a href="/p">x</a>"#)
        );
        assert_eq!(
            normalize(r#"<img src="/logo.png?_ga=GA1.2.3">"#),
            normalize(r#"<img src="/logo.png">"#)
        );
    }

    #[test]
    fn trailing_tracking_param_keeps_leading_query() {
        let normalized = normalize(r#"<a href="/p?id=7&_ga=1.2.3">x</a>"#);
        assert!(normalized.contains(r#"href="/p?id=7""#), "{normalized}");
        assert!(!normalized.contains("_ga"));
    }

    #[test]
    fn strip_tracking_params_borrows_clean_values() {
        assert!(matches!(strip_tracking_params("/clean?id=1"), Cow::Borrowed(_)));
        assert_eq!(strip_tracking_params("/p?_gl=x&y=2"), "/p");
        assert_eq!(strip_tracking_params("/p?a=1&amp;_gl=x"), "/p?a=1");
    }

    #[test]
    fn relative_times_collapse_to_placeholder() {
        let days = normalize("<p>Updated 5 days ago</p>");
        let hours = normalize("<p>Updated 3 h.</p>");
        assert_eq!(days, hours);
        assert!(days.contains("<p>Updated [TIME]</p>"), "{days}");

        let minutes = normalize("<p>12 Minutes ago</p>");
        assert!(minutes.contains("<p>[TIME]</p>"), "{minutes}");
    }

    #[test]
    fn cloudflare_tokens_are_replaced() {
        let a = normalize(
            "<script>window.__CF$cv$params={r:'8f1a2b',t:'MTczMDAwMDAwMC4wMDA='};</script>",
        );
        let b = normalize(
            "<script>window.__CF$cv$params={r:'99ffee',t:'OTk5OTk5OTk5OS45OTk='};</script>",
        );
        assert_eq!(a, b);
        assert!(a.contains("window.__CF$cv$params={[REMOVED]}"), "{a}");

        let ray = normalize("<script>var c={r:'abc123'};</script>");
        assert!(ray.contains("r:'[REMOVED]'"), "{ray}");
    }

    #[test]
    fn facebook_pixel_is_removed() {
        let normalized = normalize(
            r#"<p>a</p><img height="1" src="https://www.facebook.com/tr?id=1&ev=PageView">"#,
        );
        assert!(!normalized.contains("facebook.com/tr"));
        assert_eq!(normalized, normalize("<p>a</p>"));
    }

    #[test]
    fn noscript_pixel_is_removed_and_stays_stable() {
        let html = r#"<head><noscript><img height="1" src="https://www.facebook.com/tr?id=1&ev=PageView"></noscript></head><body><noscript><img src="https://facebook.com/tr?x"></noscript>text</body>"#;
        let once = normalize(html);
        assert!(!once.contains("facebook.com/tr"), "{once}");
        assert!(!once.contains("&lt;"), "{once}");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn noscript_markup_is_not_escaped() {
        let once = normalize("<body><noscript><p>Enable JavaScript</p></noscript></body>");
        assert!(once.contains("<noscript><p>Enable JavaScript</p></noscript>"), "{once}");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn whitespace_runs_collapse() {
        let normalized = normalize("<p>  hello\n\n\t world </p>");
        assert!(normalized.contains("<p> hello world </p>"), "{normalized}");
        assert!(!normalized.starts_with(' '));
        assert!(!normalized.ends_with(' '));
    }

    #[test]
    fn formatting_only_differences_are_ignored() {
        let a = normalize("<div class='x' id=main><br/><p>Hi</div>");
        let b = normalize("<div class=\"x\" id=\"main\"><br><p>Hi</p></div>");
        assert_eq!(a, b);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize(PAGE);
        assert_eq!(normalize(&once), once);
        assert!(once.contains(TIME_PLACEHOLDER));
        assert!(!once.contains("_gl="));
        assert!(!once.contains("_ga="));
    }

    #[test]
    fn noisy_and_clean_pages_normalize_identically() {
        let quiet = PAGE
            .replace("5 days ago", "19 hours ago")
            .replace("8f1a2b3c4d", "0000ffff")
            .replace("?_gl=1*abc*def", "")
            .replace("?_ga=2.1234.5678", "?_ga=9.9.9");
        assert_eq!(normalize(PAGE), normalize(&quiet));
    }

    #[test]
    fn real_edits_are_detected() {
        let edited = PAGE.replace("<h1>News</h1>", "<h1>Breaking news</h1>");
        assert!(normalize(PAGE) != normalize(&edited));
    }
}
