//! HTTP client wrapper used to fetch the resource.
//!
//! One GET per attempt. The body is either read fully into memory
//! ([`ResponseMode::Buffer`]) or handed back as a live stream
//! ([`ResponseMode::Stream`]) for the persistence layer to drain.

use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;
use crate::user_agent;

/// How the response body should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Read the whole body before returning.
    Buffer,
    /// Return as soon as headers arrive; the body is read later.
    Stream,
}

/// The inspectable part of a response, passed to the `on_response` hook.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    /// The URL that was requested.
    pub url: Url,
    /// The URL after redirects.
    pub final_url: Url,
    /// HTTP status code (always 2xx; other statuses become errors).
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed `Content-Length`, when present and numeric.
    pub content_length: Option<u64>,
}

/// Response body in the requested delivery mode.
#[derive(Debug)]
pub enum ResponseBody {
    /// Fully read body.
    Buffered(Vec<u8>),
    /// Unread body.
    Streamed(reqwest::Response),
}

/// A successful response split into metadata and body.
#[derive(Debug)]
pub struct FetchedResponse {
    /// Status, headers and size.
    pub info: ResponseInfo,
    /// Body in the requested mode.
    pub body: ResponseBody,
}

/// HTTP client for single-resource downloads.
///
/// Wraps a `reqwest::Client`; either one built with the crate defaults or one
/// supplied by the caller (custom TLS roots, proxies, connection pool).
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with gzip decoding and the default User-Agent.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if TLS backend initialization fails.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .gzip(true)
            .user_agent(user_agent::default_download_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Issues a GET for `url`.
    ///
    /// `timeout` bounds connecting plus waiting for the response headers, and
    /// then every gap between body chunks. A slow body that keeps delivering
    /// data never times out. The downloader applies the same idle bound while
    /// draining a [`ResponseBody::Streamed`] body.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] if the URL does not parse or is not http(s)
    /// - [`DownloadError::Timeout`] / [`DownloadError::Network`] on transport failure
    /// - [`DownloadError::HttpStatus`] on a non-2xx status
    #[instrument(level = "debug", skip(self, headers), fields(url = %url))]
    pub async fn get(
        &self,
        url: &str,
        headers: Option<&HeaderMap>,
        timeout: Duration,
        mode: ResponseMode,
    ) -> Result<FetchedResponse, DownloadError> {
        let parsed = parse_http_url(url)?;

        let mut request = self.client.get(parsed.clone());
        if let Some(headers) = headers {
            request = request.headers(headers.clone());
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| DownloadError::timeout(url))?
            .map_err(|e| DownloadError::from_transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let info = ResponseInfo {
            url: parsed,
            final_url: response.url().clone(),
            status: status.as_u16(),
            headers: response.headers().clone(),
            content_length: content_length(response.headers()),
        };
        debug!(
            status = info.status,
            content_length = ?info.content_length,
            ?mode,
            "response headers received"
        );

        let body = match mode {
            ResponseMode::Stream => ResponseBody::Streamed(response),
            ResponseMode::Buffer => {
                let mut data = Vec::new();
                let mut chunks = std::pin::pin!(with_idle_timeout(
                    response.bytes_stream(),
                    timeout,
                    url
                ));
                while let Some(chunk) = chunks.next().await {
                    data.extend_from_slice(&chunk?);
                }
                ResponseBody::Buffered(data)
            }
        };

        Ok(FetchedResponse { info, body })
    }
}

/// Bounds the wait for each chunk of `stream` by `idle`.
///
/// A stall longer than `idle` yields one [`DownloadError::Timeout`] and ends
/// the stream; transport errors are mapped with
/// [`DownloadError::from_transport`] and also end it.
pub(crate) fn with_idle_timeout<S, B>(
    stream: S,
    idle: Duration,
    url: &str,
) -> impl Stream<Item = Result<B, DownloadError>>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
{
    let state = (Box::pin(stream), url.to_string(), false);
    stream::unfold(state, move |(mut inner, url, finished)| async move {
        if finished {
            return None;
        }
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), (inner, url, false))),
            Ok(Some(Err(e))) => {
                let error = DownloadError::from_transport(url.as_str(), e);
                Some((Err(error), (inner, url, true)))
            }
            Ok(None) => None,
            Err(_) => {
                debug!(url = %url, ?idle, "body stalled");
                let error = DownloadError::timeout(url.as_str());
                Some((Err(error), (inner, url, true)))
            }
        }
    })
}

fn parse_http_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(DownloadError::invalid_url(url)),
    }
}

/// Parses `Content-Length`; `HeaderMap` lookups are case-insensitive.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_content_length_parses_numeric_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length", HeaderValue::from_static("1000"));
        assert_eq!(content_length(&headers), Some(1000));
    }

    #[test]
    fn test_content_length_absent_or_garbage_is_unknown() {
        assert_eq!(content_length(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(content_length(&headers), None);
    }

    #[test]
    fn test_parse_http_url_rejects_other_schemes() {
        assert!(matches!(
            parse_http_url("ftp://example.com/file"),
            Err(DownloadError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_http_url("not a url"),
            Err(DownloadError::InvalidUrl { .. })
        ));
        assert!(parse_http_url("https://example.com/file").is_ok());
    }

    #[test]
    fn test_get_invalid_url_fails_without_request() {
        let client = HttpClient::new().unwrap();
        let result = tokio_test::block_on(client.get(
            "not-a-valid-url",
            None,
            TIMEOUT,
            ResponseMode::Stream,
        ));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_get_buffered_reads_whole_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let url = format!("{}/data.bin", server.uri());
        let fetched = client
            .get(&url, None, TIMEOUT, ResponseMode::Buffer)
            .await
            .unwrap();

        assert_eq!(fetched.info.status, 200);
        assert_eq!(fetched.info.content_length, Some(5));
        match fetched.body {
            ResponseBody::Buffered(bytes) => assert_eq!(bytes, b"hello"),
            ResponseBody::Streamed(_) => panic!("expected buffered body"),
        }
    }

    #[tokio::test]
    async fn test_get_sends_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .and(header("x-api-key", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("s3cret"));

        let client = HttpClient::new().unwrap();
        let url = format!("{}/secure", server.uri());
        let fetched = client
            .get(&url, Some(&headers), TIMEOUT, ResponseMode::Stream)
            .await;
        assert!(fetched.is_ok(), "header matcher should accept request: {fetched:?}");
    }

    #[tokio::test]
    async fn test_get_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let result = client
            .get(&server.uri(), None, TIMEOUT, ResponseMode::Stream)
            .await;
        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_stalled_stream_with_timeout() {
        let chunks = stream::iter(vec![Ok::<_, reqwest::Error>(b"first".to_vec())])
            .chain(stream::pending());
        let mut guarded = std::pin::pin!(with_idle_timeout(
            chunks,
            Duration::from_millis(50),
            "http://example.test/stall"
        ));

        assert_eq!(guarded.next().await.unwrap().unwrap(), b"first");
        assert!(matches!(
            guarded.next().await,
            Some(Err(DownloadError::Timeout { .. }))
        ));
        assert!(guarded.next().await.is_none());
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let result = client
            .get(
                &server.uri(),
                None,
                Duration::from_millis(50),
                ResponseMode::Buffer,
            )
            .await;
        assert!(
            matches!(result, Err(DownloadError::Timeout { .. })),
            "expected timeout, got {result:?}"
        );
    }
}
