//! HTTP access to the portal.
//!
//! All outbound requests go through the `PortalClient` trait so the crawl
//! pipeline can be exercised against an in-memory portal in tests. The
//! real implementation rides on reqwest with transparent gzip/deflate
//! decoding; a magic-byte fallback gunzips sitemap bodies the portal
//! serves compressed without a `Content-Encoding` header.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::Client;

use crate::error::FetchError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A fetched response body plus status.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl PortalResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Decode the body to text, gunzipping when the payload itself is a
    /// gzip stream.
    pub fn text(&self) -> Result<String, FetchError> {
        let bytes = if self.body.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(self.body.as_slice());
            let mut decoded = Vec::new();
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            decoded
        } else {
            self.body.clone()
        };
        String::from_utf8(bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Outbound HTTP seam for everything that talks to the portal.
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// GET a URL. Non-2xx statuses are returned, not errors; callers
    /// decide what a miss means.
    async fn get(&self, url: &str) -> Result<PortalResponse, FetchError>;

    /// HEAD a URL, returning the status code.
    async fn head(&self, url: &str) -> Result<u16, FetchError>;
}

/// reqwest-backed portal client.
pub struct HttpPortalClient {
    client: Client,
}

impl HttpPortalClient {
    pub fn new(user_agent: &str) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .deflate(true)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl PortalClient for HttpPortalClient {
    async fn get(&self, url: &str) -> Result<PortalResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/xml, text/xml, */*")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(PortalResponse { status, body })
    }

    async fn head(&self, url: &str) -> Result<u16, FetchError> {
        let response = self.client.head(url).send().await?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn plain_body_decodes_as_utf8() {
        let response = PortalResponse {
            status: 200,
            body: b"<urlset/>".to_vec(),
        };
        assert_eq!(response.text().unwrap(), "<urlset/>");
    }

    #[test]
    fn gzip_body_is_transparently_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<sitemapindex><sitemap><loc>x</loc></sitemap></sitemapindex>").unwrap();
        let compressed = encoder.finish().unwrap();

        let response = PortalResponse {
            status: 200,
            body: compressed,
        };
        assert!(response.text().unwrap().contains("<sitemap>"));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let response = PortalResponse {
            status: 200,
            body: vec![0xff, 0xfe, 0x00],
        };
        assert!(matches!(response.text(), Err(FetchError::Decode(_))));
    }
}
