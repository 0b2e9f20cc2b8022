use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use reqwest::header::{HeaderValue, RANGE};
use reqwest::{Client, IntoUrl, StatusCode, Url};
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::range_reader::RangeReader;

/// Credentials injected into every range request.
#[derive(Debug, Clone, Default)]
pub enum HttpAuth {
    /// No authentication.
    #[default]
    None,
    /// HTTP Basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password, if any.
        password: Option<String>,
    },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// An arbitrary header/value pair, e.g. `x-api-key`.
    ApiKey {
        /// Header name.
        header: String,
        /// Header value.
        value: String,
    },
}

/// Retry budget for transient failures (timeouts, 5xx, throttling).
///
/// The delay doubles per attempt. Once the budget is exhausted the last
/// transient error escalates unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// HTTP(S) backend issuing `Range` requests against a single URL.
pub struct HttpReader {
    client: Client,
    url: Url,
    source_id: String,
    auth: HttpAuth,
    retry: RetryPolicy,
    size: OnceCell<Option<u64>>,
}

impl HttpReader {
    /// Wrap an existing client and URL with default auth and retry policy.
    pub fn new(client: Client, url: impl IntoUrl) -> Result<Self> {
        let url = url.into_url().map_err(map_reqwest_error)?;
        validate_scheme(&url)?;
        Ok(Self {
            client,
            source_id: url.to_string(),
            url,
            auth: HttpAuth::None,
            retry: RetryPolicy::default(),
            size: OnceCell::new(),
        })
    }

    /// Start building a reader for `url`.
    pub fn builder(url: impl IntoUrl) -> Result<HttpReaderBuilder> {
        let url = url.into_url().map_err(map_reqwest_error)?;
        validate_scheme(&url)?;
        Ok(HttpReaderBuilder {
            url,
            auth: HttpAuth::None,
            retry: RetryPolicy::default(),
            trust_invalid_certs: false,
            client: None,
        })
    }

    async fn try_read(&self, offset: u64, length: u32) -> Result<Bytes> {
        let end = offset + u64::from(length) - 1;
        let range = HeaderValue::try_from(format!("bytes={offset}-{end}"))
            .map_err(|err| Error::IoFatal(Box::new(err)))?;

        let mut request = self.client.get(self.url.clone()).header(RANGE, range);
        request = match &self.auth {
            HttpAuth::None => request,
            HttpAuth::Basic { username, password } => {
                request.basic_auth(username, password.as_deref())
            }
            HttpAuth::Bearer(token) => request.bearer_auth(token),
            HttpAuth::ApiKey { header, value } => request.header(header.as_str(), value.as_str()),
        };

        let response = request.send().await.map_err(map_reqwest_error)?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            // The requested range starts at or past the end of the object.
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(Bytes::new()),
            StatusCode::OK => {
                return Err(Error::RangeRequestsUnsupported(self.source_id.clone()));
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(Error::NotFound(self.source_id.clone()));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::IoFatal(
                    format!("authentication failed with {}", response.status()).into(),
                ));
            }
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                return Err(Error::IoTransient(
                    format!("server responded with {status}").into(),
                ));
            }
            status => {
                return Err(Error::IoFatal(
                    format!("unexpected response status {status}").into(),
                ));
            }
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        if body.len() > length as usize {
            return Err(Error::ResponseBodyTooLong(body.len(), length as usize));
        }
        Ok(body)
    }
}

impl RangeReader for HttpReader {
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            if length == 0 {
                return Ok(Bytes::new());
            }
            let mut attempt = 0;
            loop {
                match self.try_read(offset, length).await {
                    Ok(body) => return Ok(body),
                    Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                        let delay = self.retry.backoff * 2u32.pow(attempt);
                        warn!(
                            "retrying range {offset}+{length} of {} after {err} (attempt {})",
                            self.source_id,
                            attempt + 1
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
        async move {
            self.size
                .get_or_try_init(|| async {
                    let response = self
                        .client
                        .head(self.url.clone())
                        .send()
                        .await
                        .map_err(map_reqwest_error)?;
                    if response.status().is_success() {
                        debug!("resolved size of {}: {:?}", self.source_id, response.content_length());
                        Ok(response.content_length())
                    } else {
                        // Servers without HEAD support still serve ranges.
                        Ok(None)
                    }
                })
                .await
                .copied()
        }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// Builder for [`HttpReader`].
pub struct HttpReaderBuilder {
    url: Url,
    auth: HttpAuth,
    retry: RetryPolicy,
    trust_invalid_certs: bool,
    client: Option<Client>,
}

impl HttpReaderBuilder {
    /// Credentials to attach to every request.
    #[must_use]
    pub fn auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Retry budget for transient failures.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Accept any TLS certificate. Development servers only.
    #[must_use]
    pub fn trust_invalid_certs(mut self, trust: bool) -> Self {
        self.trust_invalid_certs = trust;
        self
    }

    /// Use a pre-configured client instead of building one.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the reader.
    pub fn build(self) -> Result<HttpReader> {
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = Client::builder()
                    .use_rustls_tls()
                    .tcp_keepalive(Duration::from_secs(600));
                if self.trust_invalid_certs {
                    builder = builder.danger_accept_invalid_certs(true);
                }
                builder.build().map_err(map_reqwest_error)?
            }
        };
        Ok(HttpReader {
            client,
            source_id: self.url.to_string(),
            url: self.url,
            auth: self.auth,
            retry: self.retry,
            size: OnceCell::new(),
        })
    }
}

fn validate_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(Error::InvalidConfig("url scheme must be http or https")),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::IoTransient(Box::new(err))
    } else {
        Error::IoFatal(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            HttpReader::builder("ftp://example.com/archive.pmtiles"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(HttpReader::builder("https://example.com/archive.pmtiles").is_ok());
    }

    #[test]
    fn builder_configures_reader() {
        let reader = HttpReader::builder("https://example.com/tiles.pmtiles")
            .unwrap()
            .auth(HttpAuth::Bearer("token".into()))
            .retry(RetryPolicy {
                max_retries: 5,
                backoff: Duration::from_millis(10),
            })
            .trust_invalid_certs(true)
            .build()
            .unwrap();
        assert_eq!(reader.source_id(), "https://example.com/tiles.pmtiles");
        assert_eq!(reader.retry.max_retries, 5);
        assert!(matches!(reader.auth, HttpAuth::Bearer(_)));
    }
}
