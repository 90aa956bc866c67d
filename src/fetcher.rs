//! Source retrieval
//!
//! [`HttpFetcher`] pulls one remote document fully into memory. Every request
//! is bounded by the configured timeout and retried per
//! [`FetchConfig::retry`] on network failures and 5xx answers. Failures come
//! back as a classified [`FetchError`] so callers can report something more
//! useful than the transport's own message.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::retry::with_retry;
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

/// Something that can turn a URL into bytes
///
/// The engine only talks to this trait, so tests and embedders can swap in
/// their own transport.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Retrieve `url` with the implementation's timeout and retry policy
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    telemetry: Telemetry,
}

impl HttpFetcher {
    /// Build the shared client from `config`
    ///
    /// TLS validation is relaxed only when `accept_invalid_certs` is set, and
    /// then for every source this fetcher touches.
    pub fn new(config: FetchConfig, telemetry: Telemetry) -> Result<Self> {
        if config.accept_invalid_certs {
            tracing::warn!("TLS certificate validation is disabled for source fetches");
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .no_proxy()
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            config,
            telemetry,
        })
    }

    /// One attempt; returns the body with the status it was served under
    async fn fetch_once(&self, url: &str) -> std::result::Result<(Vec<u8>, u16), FetchError> {
        let timeout = self.config.request_timeout;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().map(str::to_string),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&e, timeout))?;

        Ok((body.to_vec(), status.as_u16()))
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let started = Instant::now();

        let result = with_retry(&self.config.retry, || self.fetch_once(url)).await;

        let (status_code, error) = match &result {
            Ok((_, status)) => (Some(*status), None),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "source fetch failed");
                (e.status_code(), Some(e.to_string()))
            }
        };

        self.telemetry.record(TelemetryEvent::SourceFetched {
            url: url.to_string(),
            status_code,
            elapsed: started.elapsed(),
            error,
        });

        result.map(|(body, _)| body)
    }
}

/// Map a transport error onto the fetch failure taxonomy
pub fn classify_reqwest_error(error: &reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        return FetchError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };
    }

    // hyper buries the io::Error a few levels down
    let mut source: Option<&(dyn StdError + 'static)> = Some(error as &(dyn StdError + 'static));
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return FetchError::ConnectionRefused(io.to_string());
                }
                std::io::ErrorKind::TimedOut => {
                    return FetchError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    };
                }
                _ => {}
            }
        }
        source = err.source();
    }

    if let Some(status) = error.status() {
        return FetchError::HttpStatus {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
        };
    }

    classify_message(&error_chain(error))
}

/// Classify from the flattened error text when no typed cause is available
pub(crate) fn classify_message(detail: &str) -> FetchError {
    let lower = detail.to_lowercase();

    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
    {
        FetchError::Dns(detail.to_string())
    } else if lower.contains("connection refused") {
        FetchError::ConnectionRefused(detail.to_string())
    } else if lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("ssl")
        || lower.contains("handshake")
    {
        FetchError::Tls(detail.to_string())
    } else {
        FetchError::Network(detail.to_string())
    }
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source {
        parts.push(err.to_string());
        source = err.source();
    }
    parts.join(": ")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::telemetry::TelemetrySink;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetchConfig {
        FetchConfig {
            request_timeout: Duration::from_millis(500),
            retry: RetryConfig::fixed(3, Duration::from_millis(10)),
            ..Default::default()
        }
    }

    fn fetcher(config: FetchConfig) -> HttpFetcher {
        HttpFetcher::new(config, Telemetry::disabled()).unwrap()
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.5 body".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher(fast_config())
            .fetch(&format!("{}/doc.pdf", server.uri()))
            .await
            .unwrap();

        assert_eq!(body, b"%PDF-1.5 body");
    }

    struct ForwardingSink(mpsc::UnboundedSender<TelemetryEvent>);

    #[async_trait]
    impl TelemetrySink for ForwardingSink {
        async fn record(&self, event: TelemetryEvent) {
            self.0.send(event).ok();
        }
    }

    #[tokio::test]
    async fn telemetry_reports_the_served_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached.pdf"))
            .respond_with(ResponseTemplate::new(203).set_body_bytes(b"%PDF-1.5 copy".to_vec()))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let telemetry = Telemetry::spawn(Arc::new(ForwardingSink(tx)));
        let fetcher = HttpFetcher::new(fast_config(), telemetry).unwrap();

        let url = format!("{}/cached.pdf", server.uri());
        let body = fetcher.fetch(&url).await.unwrap();
        assert_eq!(body, b"%PDF-1.5 copy");

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TelemetryEvent::SourceFetched {
                url: recorded,
                status_code,
                error,
                ..
            } => {
                assert_eq!(recorded, url);
                assert_eq!(status_code, Some(203));
                assert!(error.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(fast_config())
            .fetch(&format!("{}/missing.pdf", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            FetchError::HttpStatus {
                status: 404,
                reason: Some("Not Found".into())
            }
        );
        assert_eq!(err.to_string(), "HTTP 404 Not Found");
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher(fast_config())
            .fetch(&format!("{}/flaky.pdf", server.uri()))
            .await
            .unwrap();

        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn persistent_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down.pdf"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let err = fetcher(fast_config())
            .fetch(&format!("{}/down.pdf", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(500));
    }

    #[tokio::test]
    async fn slow_server_is_classified_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.pdf"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
            .mount(&server)
            .await;

        let config = FetchConfig {
            request_timeout: Duration::from_millis(100),
            retry: RetryConfig::fixed(0, Duration::from_millis(0)),
            ..Default::default()
        };

        let err = fetcher(config)
            .fetch(&format!("{}/slow.pdf", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err, FetchError::Timeout { timeout_ms: 100 });
    }

    #[tokio::test]
    async fn closed_port_is_classified_as_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = FetchConfig {
            retry: RetryConfig::fixed(0, Duration::from_millis(0)),
            ..fast_config()
        };

        let err = fetcher(config)
            .fetch(&format!("http://{}/doc.pdf", addr))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "connection_refused", "got {err}");
    }

    #[test]
    fn message_classification() {
        assert_eq!(
            classify_message("error sending request: dns error: failed to lookup address").kind(),
            "dns"
        );
        assert_eq!(
            classify_message("tcp connect error: Connection refused (os error 111)").kind(),
            "connection_refused"
        );
        assert_eq!(
            classify_message("invalid peer certificate: UnknownIssuer").kind(),
            "tls"
        );
        assert_eq!(classify_message("connection reset by peer").kind(), "network");
    }
}
