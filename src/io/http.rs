use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};

use super::ReadAt;
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRY: u32 = 10;
const RETRY_STEP: Duration = Duration::from_millis(500);

/// Archive source that fetches byte ranges of a remote file over HTTP(S).
///
/// Only the parts of the archive that are actually read are downloaded, so
/// listing a large remote ZIP costs roughly the size of its central directory.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request.
    ///
    /// The server must advertise `Accept-Ranges: bytes` and send a
    /// `Content-Length`.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let resp = client.head(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Remote(format!("HEAD {url}: {}", resp.status())));
        }

        let headers = resp.headers();
        let ranges = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !ranges.contains("bytes") {
            return Err(Error::Remote(format!(
                "{url} does not support Range requests"
            )));
        }

        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Remote(format!("{url} sent no Content-Length")))?;

        log::debug!("remote archive {url}: {size} bytes");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: DEFAULT_MAX_RETRY,
        })
    }

    /// Number of transport attempts before a range read gives up.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total bytes received from the network so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let last = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (last - offset + 1) as usize;

        let mut received = 0;
        let mut failures = 0;

        while received < wanted {
            let start = offset + received as u64;
            let result = self
                .client
                .get(&self.url)
                .header(header::RANGE, format!("bytes={start}-{last}"))
                .send()
                .await;

            let resp = match result {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    failures += 1;
                    if failures >= self.max_retry {
                        return Err(e.into());
                    }
                    log::warn!("range request failed, retry {failures}/{}: {e}", self.max_retry);
                    tokio::time::sleep(RETRY_STEP * failures).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if resp.status() != StatusCode::PARTIAL_CONTENT {
                return Err(Error::Remote(format!(
                    "range {start}-{last}: {}",
                    resp.status()
                )));
            }

            let body = resp.bytes().await?;
            if body.is_empty() {
                return Err(Error::Remote(format!("range {start}-{last}: empty body")));
            }
            let n = body.len().min(wanted - received);
            buf[received..received + n].copy_from_slice(&body[..n]);
            received += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
