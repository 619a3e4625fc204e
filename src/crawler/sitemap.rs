//! Daily sitemap fetching and parsing.
//!
//! The portal publishes one sitemap index per day under
//! `/jportal/docs/eclicrawler/<YYYY>/<MM>/<DD>/sitemap_index_1.xml`,
//! pointing at leaf sitemaps whose `url` entries carry the document URL
//! (with a `docid=` query parameter) and a last-modified stamp.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::crawler::client::PortalClient;
use crate::error::FetchError;

/// One document entry from a leaf sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub url: String,
    pub last_modified: Option<String>,
    /// Parsed from the `docid=` query parameter of the loc URL.
    pub document_id: Option<String>,
}

impl SitemapEntry {
    fn new(url: String, last_modified: Option<String>) -> Self {
        let document_id = extract_document_id(&url);
        Self {
            url,
            last_modified,
            document_id,
        }
    }
}

/// Parse the `docid` query parameter out of a document URL.
pub fn extract_document_id(url: &str) -> Option<String> {
    let (_, after) = url.split_once("docid=")?;
    let id = after.split('&').next().unwrap_or(after);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Build the index URL for one day.
pub fn sitemap_index_url(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/jportal/docs/eclicrawler/{}/sitemap_index_1.xml",
        base_url.trim_end_matches('/'),
        date.format("%Y/%m/%d")
    )
}

/// Fetches and parses the portal's daily sitemaps.
pub struct SitemapCrawler {
    client: Arc<dyn PortalClient>,
    base_url: String,
    rate_limit: Duration,
}

impl SitemapCrawler {
    pub fn new(client: Arc<dyn PortalClient>, base_url: String, rate_limit_ms: u64) -> Self {
        Self {
            client,
            base_url,
            rate_limit: Duration::from_millis(rate_limit_ms),
        }
    }

    /// Fetch the sitemap index for a date and return the leaf sitemap URLs.
    pub async fn fetch_index(&self, date: NaiveDate) -> Result<Vec<String>, FetchError> {
        let url = sitemap_index_url(&self.base_url, date);
        tracing::info!(%url, "fetching sitemap index");

        let response = self.client.get(&url).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                status: response.status,
                url,
            });
        }
        let xml = response.text()?;
        Ok(parse_sitemap_index(&xml))
    }

    /// Fetch one leaf sitemap and return its document entries. Leaf
    /// fetches are paced; the single index fetch per date is not.
    pub async fn fetch_leaf(&self, sitemap_url: &str) -> Result<Vec<SitemapEntry>, FetchError> {
        tokio::time::sleep(self.rate_limit).await;
        tracing::info!(url = sitemap_url, "fetching sitemap");

        let response = self.client.get(sitemap_url).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                status: response.status,
                url: sitemap_url.to_string(),
            });
        }
        let xml = response.text()?;
        Ok(parse_leaf_sitemap(&xml))
    }
}

/// Pull `sitemap/loc` values out of a sitemap index.
pub fn parse_sitemap_index(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut in_sitemap = false;
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local(e.name().as_ref()).as_str() {
                "sitemap" => in_sitemap = true,
                "loc" if in_sitemap => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) => match local(e.name().as_ref()).as_str() {
                "sitemap" => in_sitemap = false,
                "loc" => in_loc = false,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_loc {
                    if let Ok(text) = t.unescape() {
                        let text = text.trim();
                        if !text.is_empty() {
                            urls.push(text.to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse sitemap index");
                break;
            }
        }
    }

    urls
}

/// Pull `url/{loc, lastmod}` entries out of a leaf sitemap.
pub fn parse_leaf_sitemap(xml: &str) -> Vec<SitemapEntry> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut in_url = false;
    let mut field: Option<&'static str> = None;
    let mut loc = String::new();
    let mut lastmod = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local(e.name().as_ref()).as_str() {
                "url" => {
                    in_url = true;
                    loc.clear();
                    lastmod.clear();
                }
                "loc" if in_url => field = Some("loc"),
                "lastmod" if in_url => field = Some("lastmod"),
                _ => {}
            },
            Ok(Event::End(e)) => match local(e.name().as_ref()).as_str() {
                "url" => {
                    in_url = false;
                    let url = loc.trim().to_string();
                    if !url.is_empty() {
                        let last_modified = {
                            let lm = lastmod.trim();
                            if lm.is_empty() {
                                None
                            } else {
                                Some(lm.to_string())
                            }
                        };
                        entries.push(SitemapEntry::new(url, last_modified));
                    }
                }
                "loc" | "lastmod" => field = None,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Ok(text) = t.unescape() {
                    match field {
                        Some("loc") => loc.push_str(&text),
                        Some("lastmod") => lastmod.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse leaf sitemap");
                break;
            }
        }
    }

    entries
}

fn local(qname: &[u8]) -> String {
    let raw = String::from_utf8_lossy(qname);
    match raw.rsplit_once(':') {
        Some((_, l)) => l.to_string(),
        None => raw.into_owned(),
    }
}
