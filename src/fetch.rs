//! Blocking HTTP fetch collaborator used for pages and assets.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Conventional desktop browser user agent; some sites serve stripped markup to bots.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Per-request timeout for monitored pages.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-request timeout for embedded assets.
pub const DEFAULT_ASSET_TIMEOUT: Duration = Duration::from_secs(10);

/// Tagged failure reasons surfaced by a [`Fetcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request did not complete within the allotted time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The server answered with a non-2xx status.
    #[error("HTTP status {0}")]
    Status(StatusCode),
    /// DNS, TLS, connection reset or body read failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// Only http(s) URLs are fetched.
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
    /// The configured page entry could not be turned into an absolute URL.
    #[error("invalid URL `{0}`")]
    InvalidUrl(String),
}

/// Response body as both decoded text and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    /// Body decoded as UTF-8 (lossy when the payload is not valid UTF-8).
    pub text: String,
    /// Untouched response bytes.
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    /// Wraps raw bytes, decoding them into text once.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let text = decode_body(&bytes).into_owned();
        Self { text, bytes }
    }
}

fn decode_body(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Narrow interface over the network: given a URL, return the body or a tagged failure.
pub trait Fetcher {
    /// Performs one blocking GET. Expected HTTP errors come back as `Err`, never as panics.
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedBody, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedBody, FetchError> {
        (**self).fetch(url, timeout)
    }
}

/// `reqwest` backed fetcher identifying itself as a desktop browser.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a fetcher with the default browser user agent.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_user_agent(BROWSER_USER_AGENT)
    }

    /// Builds a fetcher that sends the provided user agent.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedBody, FetchError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }

        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .map_err(|err| classify_error(err, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response
            .bytes()
            .map_err(|err| classify_error(err, timeout))?;
        Ok(FetchedBody::from_bytes(bytes.to_vec()))
    }
}

fn classify_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Connection(err.to_string())
    }
}

/// Serves canned responses keyed by absolute URL; unknown URLs answer 404.
///
/// Useful for offline replays of a captured site and for tests.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: RefCell<HashMap<String, Result<Vec<u8>, FetchError>>>,
    requests: RefCell<Vec<String>>,
}

impl StaticFetcher {
    /// Creates an empty fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a successful response body for `url`.
    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), Ok(body.into()));
    }

    /// Registers (or replaces) a failure for `url`.
    pub fn insert_error(&self, url: &str, error: FetchError) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), Err(error));
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Number of times `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedBody, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        match self.responses.borrow().get(url.as_str()) {
            Some(Ok(bytes)) => Ok(FetchedBody::from_bytes(bytes.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Err(FetchError::Status(StatusCode::NOT_FOUND)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossy_decoding_keeps_raw_bytes() {
        let body = FetchedBody::from_bytes(vec![b'o', b'k', 0xff]);
        assert_eq!(body.bytes, vec![b'o', b'k', 0xff]);
        assert!(body.text.starts_with("ok"));
        assert!(body.text.contains('\u{FFFD}'));
    }

    #[test]
    fn static_fetcher_reports_missing_urls_as_not_found() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://example.com/", "<p>hi</p>");
        let url = Url::parse("https://example.com/missing").unwrap();
        let err = fetcher.fetch(&url, DEFAULT_PAGE_TIMEOUT).unwrap_err();
        assert_eq!(err, FetchError::Status(StatusCode::NOT_FOUND));
        assert_eq!(err.to_string(), "HTTP status 404 Not Found");

        let root = Url::parse("https://example.com/").unwrap();
        let body = fetcher.fetch(&root, DEFAULT_PAGE_TIMEOUT).unwrap();
        assert_eq!(body.text, "<p>hi</p>");
        assert_eq!(fetcher.request_count("https://example.com/"), 1);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[test]
    fn http_fetcher_rejects_non_http_schemes() {
        let fetcher = HttpFetcher::new().expect("client");
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert_eq!(
            fetcher.fetch(&url, DEFAULT_ASSET_TIMEOUT),
            Err(FetchError::UnsupportedScheme("ftp".into()))
        );
    }
}
