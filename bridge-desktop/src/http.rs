//! Remote Lookup and Cover Download using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    CoverLoader, Freshness, ItemMetadata, MediaKind, RemoteLookupPort,
};
use bytes::Bytes;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use reqwest::{header, Client, Method, Response, StatusCode, Url};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENT: &str = "catalog-core/0.1.0";

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))
}

fn remote_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::Remote("Request timed out".to_string())
    } else if e.is_connect() {
        BridgeError::Remote(format!("Connection failed: {}", e))
    } else {
        BridgeError::Remote(e.to_string())
    }
}

/// Retry schedule for idempotent requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// JSON lookup service client.
///
/// Items are fetched from `GET {endpoint}/{kind}/{code}`; the body must
/// deserialize into [`ItemMetadata`]. A `404` means "not found". Freshness is
/// probed with a `HEAD` on the cover URL and read from `Last-Modified`.
///
/// Server errors and `429` are retried with exponential backoff.
pub struct HttpRemoteLookup {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl HttpRemoteLookup {
    /// # Errors
    ///
    /// Returns an error if `endpoint` is not an absolute http(s) URL
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            BridgeError::OperationFailed(format!("Invalid lookup endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(BridgeError::OperationFailed(format!(
                "Lookup endpoint must be an http(s) base URL: {}",
                endpoint
            )));
        }

        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// URL of the item `code` of `kind`. Path segments are percent-encoded.
    pub fn item_url(&self, code: &str, kind: MediaKind) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BridgeError::OperationFailed("Endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .push(kind.as_str())
            .push(code);
        Ok(url)
    }

    async fn send_with_retry(&self, method: Method, url: &Url) -> Result<Response> {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.retry.max_attempts {
            debug!(attempt = attempt + 1, %method, url = %url, "Executing lookup request");

            match self.client.request(method.clone(), url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(status = status.as_u16(), attempt = attempt + 1, "Retryable status");
                        last_error = Some(BridgeError::Remote(format!("HTTP {} from {}", status, url)));
                    } else {
                        return Ok(response);
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt + 1, "Lookup request failed");
                    last_error = Some(remote_error(e));
                }
            }

            attempt += 1;
            if attempt < self.retry.max_attempts {
                let delay = (self.retry.base_delay * 2u32.pow(attempt - 1)).min(self.retry.max_delay);
                sleep(delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| BridgeError::Remote("All retry attempts exhausted".to_string())))
    }
}

/// Parse an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`) into Unix seconds.
pub fn parse_http_date(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.timestamp())
}

#[async_trait]
impl RemoteLookupPort for HttpRemoteLookup {
    async fn find(&self, id: &str, kind: MediaKind) -> Result<Option<ItemMetadata>> {
        let url = self.item_url(id, kind)?;
        let response = self.send_with_retry(Method::GET, &url).await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(code = id, kind = %kind, "Lookup miss");
                Ok(None)
            }
            status if status.is_success() => {
                let metadata = response.json::<ItemMetadata>().await.map_err(|e| {
                    BridgeError::Remote(format!("Malformed lookup response for {}: {}", id, e))
                })?;
                Ok(Some(metadata))
            }
            status => Err(BridgeError::Remote(format!("HTTP {} looking up {}", status, id))),
        }
    }

    async fn fetch_freshness(&self, cover_url: &str) -> Result<Freshness> {
        let url = Url::parse(cover_url)
            .map_err(|e| BridgeError::Remote(format!("Invalid cover URL: {}", e)))?;
        let response = self.send_with_retry(Method::HEAD, &url).await?;

        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        Ok(Freshness {
            last_modified,
            status_code: response.status().as_u16(),
        })
    }
}

/// Downloads covers and re-encodes them as JPEG no larger than `max_edge`.
pub struct HttpCoverLoader {
    client: Client,
    max_edge: u32,
}

impl HttpCoverLoader {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            max_edge: 600,
        })
    }

    pub fn with_max_edge(mut self, max_edge: u32) -> Self {
        self.max_edge = max_edge.max(1);
        self
    }
}

/// Decode `data`, shrink it to fit `max_edge` and encode it as JPEG.
pub fn shrink_cover(data: &[u8], max_edge: u32) -> Result<Bytes> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| BridgeError::OperationFailed(format!("Undecodable cover: {}", e)))?;

    let resized = if decoded.width() > max_edge || decoded.height() > max_edge {
        decoded.resize(max_edge, max_edge, FilterType::Triangle)
    } else {
        decoded
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to encode cover: {}", e)))?;
    Ok(Bytes::from(out))
}

#[async_trait]
impl CoverLoader for HttpCoverLoader {
    async fn load(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await.map_err(remote_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Remote(format!("HTTP {} downloading cover", status)));
        }
        let body = response.bytes().await.map_err(remote_error)?;

        let max_edge = self.max_edge;
        let cover = tokio::task::spawn_blocking(move || shrink_cover(&body, max_edge))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Cover task failed: {}", e)))??;

        debug!(url, bytes = cover.len(), "Cover downloaded");
        Ok(cover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_item_url_encodes_code() {
        let lookup = HttpRemoteLookup::new("https://lookup.example.com/api/").unwrap();
        let url = lookup.item_url("978 0/1", MediaKind::Books).unwrap();
        assert_eq!(url.as_str(), "https://lookup.example.com/api/books/978%200%2F1");
    }

    #[test]
    fn test_endpoint_must_be_http() {
        assert!(HttpRemoteLookup::new("not a url").is_err());
        assert!(HttpRemoteLookup::new("file:///tmp/lookup").is_err());
    }

    #[test]
    fn test_parse_http_date() {
        assert_eq!(
            parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(1_445_412_480)
        );
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_shrink_cover_bounds_edges() {
        let cover = shrink_cover(&png(1200, 600), 600).unwrap();
        let decoded = image::load_from_memory(&cover).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (600, 300));
        assert_eq!(image::guess_format(&cover).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_shrink_cover_rejects_garbage() {
        assert!(shrink_cover(b"<html>not found</html>", 600).is_err());
    }
}
