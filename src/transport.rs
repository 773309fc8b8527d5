//! Outbound HTTP plumbing shared by the lister and the downloader.
//!
//! [`Transport`] is the seam: the production implementation wraps
//! `reqwest::Client`, tests script replies per URL. [`RetryingTransport`]
//! layers bounded backoff on top of any transport and only retries
//! connection-level failures. A received response is returned as-is,
//! whatever its status.
//!
//! Listing pages are small and read whole through [`Transport::get`]. Media
//! bodies go through [`Transport::get_stream`] so they never sit in memory.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;

use crate::retry::{self, RetryAction, RetryConfig};

/// A fully received HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }

    pub fn is_client_error(&self) -> bool {
        is_client_error(self.status)
    }
}

/// Body chunks of a streamed response. An `Err` ends the body early.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A response whose headers have arrived but whose body is still in flight.
pub struct StreamedResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl std::fmt::Debug for StreamedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl StreamedResponse {
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }

    pub fn is_client_error(&self) -> bool {
        is_client_error(self.status)
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

/// Network-level failure: no complete response was received.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },
}

impl TransportError {
    /// Whether another attempt could succeed. A request that could not even
    /// be built (malformed URL, bad header) fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request { source, .. } => !source.is_builder(),
            TransportError::Connection { .. } => true,
        }
    }
}

/// Minimal async GET used by the sync engine.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issue a bearer-authenticated GET and read the full body.
    async fn get(&self, url: &str, bearer: &str) -> Result<Response, TransportError>;

    /// Issue a bearer-authenticated GET and hand back the body unread.
    async fn get_stream(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<StreamedResponse, TransportError>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, url: &str, bearer: &str) -> Result<Response, TransportError> {
        (**self).get(url, bearer).await
    }

    async fn get_stream(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<StreamedResponse, TransportError> {
        (**self).get_stream(url, bearer).await
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trackvault/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, bearer: &str) -> Result<Response, TransportError> {
        let to_err = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(to_err)?;
        let status = response.status().as_u16();
        // A body that breaks off mid-transfer is a transport failure, not a
        // response: the caller never saw the full payload.
        let body = response.bytes().await.map_err(to_err)?;
        Ok(Response { status, body })
    }

    async fn get_stream(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<StreamedResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status().as_u16();
        let url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|source| TransportError::Request {
                    url: url.clone(),
                    source,
                })
            })
            .boxed();
        Ok(StreamedResponse { status, body })
    }
}

/// Wraps a transport with exponential-backoff retry on connection failures.
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    retry: RetryConfig,
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    /// Issue one logical request. Exhausting retries surfaces the last
    /// transport error.
    pub async fn request(&self, url: &str, bearer: &str) -> Result<Response, TransportError> {
        retry::retry_with_backoff(&self.retry, classify, || self.inner.get(url, bearer)).await
    }

    /// Open a streamed request. Retries cover getting the response headers;
    /// an error while reading the body reaches the caller unretried.
    pub async fn request_stream(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<StreamedResponse, TransportError> {
        retry::retry_with_backoff(&self.retry, classify, || {
            self.inner.get_stream(url, bearer)
        })
        .await
    }
}

fn classify(e: &TransportError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

#[async_trait::async_trait]
impl Transport for RetryingTransport {
    async fn get(&self, url: &str, bearer: &str) -> Result<Response, TransportError> {
        self.request(url, bearer).await
    }

    async fn get_stream(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<StreamedResponse, TransportError> {
        self.request_stream(url, bearer).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted transport for tests. Each URL owns a queue of replies; the
    //! last reply repeats once the queue is drained. Unknown URLs get a 404.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use futures_util::stream;

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Complete(u16, Vec<u8>),
        /// A 200 whose body breaks off after the given bytes.
        CutOff(Vec<u8>),
        Refused(String),
    }

    #[derive(Default)]
    pub(crate) struct FakeTransport {
        routes: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<String>>,
        bearers: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push(&self, url: &str, reply: Reply) -> &Self {
            self.routes
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        pub(crate) fn json(&self, url: &str, value: serde_json::Value) -> &Self {
            self.push(url, Reply::Complete(200, value.to_string().into_bytes()))
        }

        pub(crate) fn body(&self, url: &str, body: &[u8]) -> &Self {
            self.push(url, Reply::Complete(200, body.to_vec()))
        }

        pub(crate) fn status(&self, url: &str, status: u16) -> &Self {
            self.push(url, Reply::Complete(status, Vec::new()))
        }

        pub(crate) fn fail(&self, url: &str) -> &Self {
            self.push(url, Reply::Refused("connection reset".to_string()))
        }

        pub(crate) fn cut_off(&self, url: &str, partial: &[u8]) -> &Self {
            self.push(url, Reply::CutOff(partial.to_vec()))
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }

        pub(crate) fn bearers(&self) -> Vec<String> {
            self.bearers.lock().unwrap().clone()
        }

        fn next_reply(&self, url: &str, bearer: &str) -> Reply {
            self.calls.lock().unwrap().push(url.to_string());
            self.bearers.lock().unwrap().push(bearer.to_string());
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap(),
                None => Reply::Complete(404, Vec::new()),
            }
        }
    }

    fn broken(url: &str, message: &str) -> TransportError {
        TransportError::Connection {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn get(&self, url: &str, bearer: &str) -> Result<Response, TransportError> {
            match self.next_reply(url, bearer) {
                Reply::Complete(status, body) => Ok(Response {
                    status,
                    body: Bytes::from(body),
                }),
                Reply::CutOff(_) => Err(broken(url, "body truncated")),
                Reply::Refused(message) => Err(broken(url, &message)),
            }
        }

        async fn get_stream(
            &self,
            url: &str,
            bearer: &str,
        ) -> Result<StreamedResponse, TransportError> {
            match self.next_reply(url, bearer) {
                Reply::Complete(status, body) => Ok(StreamedResponse {
                    status,
                    body: stream::iter(vec![Ok(Bytes::from(body))]).boxed(),
                }),
                Reply::CutOff(partial) => Ok(StreamedResponse {
                    status: 200,
                    body: stream::iter(vec![
                        Ok(Bytes::from(partial)),
                        Err(broken(url, "body truncated")),
                    ])
                    .boxed(),
                }),
                Reply::Refused(message) => Err(broken(url, &message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_retries_connection_failures_then_succeeds() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail("https://x/a").fail("https://x/a").body("https://x/a", b"ok");
        let transport = RetryingTransport::new(fake.clone(), no_delay(3));

        let response = transport.request("https://x/a", "tok").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"ok");
        assert_eq!(fake.call_count("https://x/a"), 3);
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let fake = Arc::new(FakeTransport::new());
        fake.status("https://x/a", 503);
        let transport = RetryingTransport::new(fake.clone(), no_delay(3));

        let response = transport.request("https://x/a", "tok").await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
        assert_eq!(fake.call_count("https://x/a"), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail("https://x/a");
        let transport = RetryingTransport::new(fake.clone(), no_delay(2));

        let err = transport.request("https://x/a", "tok").await.unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
        assert_eq!(fake.call_count("https://x/a"), 3);
    }

    #[tokio::test]
    async fn test_bearer_is_forwarded() {
        let fake = Arc::new(FakeTransport::new());
        fake.body("https://x/a", b"");
        let transport = RetryingTransport::new(fake.clone(), no_delay(0));
        transport.request("https://x/a", "secret").await.unwrap();
        assert_eq!(fake.bearers(), vec!["secret".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_retries_refused_connection_but_not_cut_off_body() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail("https://x/a").cut_off("https://x/a", b"half");
        let transport = RetryingTransport::new(fake.clone(), no_delay(3));

        let mut response = transport.request_stream("https://x/a", "tok").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body.next().await.unwrap().unwrap()[..], b"half");
        assert!(response.body.next().await.unwrap().is_err());
        assert_eq!(fake.call_count("https://x/a"), 2);
    }

    #[tokio::test]
    async fn test_malformed_url_is_not_retried() {
        let http = Arc::new(HttpTransport::new(Duration::from_secs(1)).unwrap());
        let transport = RetryingTransport::new(http, no_delay(3));
        let err = transport.request("not a url", "tok").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_classes() {
        let r = |status| Response {
            status,
            body: Bytes::new(),
        };
        assert!(r(200).is_success());
        assert!(r(204).is_success());
        assert!(!r(301).is_success());
        assert!(r(403).is_client_error());
        assert!(!r(500).is_client_error());
    }
}
