//! Legal document model.
//!
//! Documents are keyed by the portal's opaque document id (KARE/KORE/KSRE/
//! WBRE prefixed). The court tag is derived from that prefix when a record
//! is first seen and refined later from the downloaded content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a document.
///
/// Transitions run forward only: `Pending -> Downloaded -> Processed`,
/// any state may drop to `Failed`, and the manual retry path resets
/// `Failed -> Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Downloaded,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Downloaded => "DOWNLOADED",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DOWNLOADED" => Some(Self::Downloaded),
            "PROCESSED" => Some(Self::Processed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True once the document body has been fetched and persisted.
    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Processed)
    }
}

/// A court decision from the portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalDocument {
    /// The portal's opaque document id; natural key, exactly one record per id.
    pub document_id: String,
    /// Court tag (BAG, BGH, BSG, BVerwG, ...); prefix-derived until refined.
    pub court: String,
    /// European Case Law Identifier, set after validation/extraction.
    pub ecli_identifier: Option<String>,
    /// Canonical URL the document was discovered under.
    pub source_url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub subject: Option<String>,
    pub case_number: Option<String>,
    pub document_type: Option<String>,
    /// Cited norms, as listed in the document header.
    pub norms: Option<String>,
    /// Guiding principle section.
    pub leitsatz: Option<String>,
    /// Operative part of the decision.
    pub tenor: Option<String>,
    /// Reasons section.
    pub gruende: Option<String>,
    /// Tag-stripped text for search, capped at 50k chars.
    pub full_text: Option<String>,
    /// Initialized to crawl time, overwritten from extracted content.
    pub decision_date: DateTime<Utc>,
    pub crawled_at: Option<DateTime<Utc>>,
    /// Archive location once the body has been written to disk.
    pub file_path: Option<String>,
    pub status: DocumentStatus,
}

impl LegalDocument {
    /// Create a fresh pending record as the orchestrator sees a new
    /// sitemap entry.
    pub fn new(document_id: String, court: String, source_url: String) -> Self {
        Self {
            document_id,
            court,
            ecli_identifier: None,
            source_url,
            title: None,
            summary: None,
            subject: None,
            case_number: None,
            document_type: None,
            norms: None,
            leitsatz: None,
            tenor: None,
            gruende: None,
            full_text: None,
            decision_date: Utc::now(),
            crawled_at: None,
            file_path: None,
            status: DocumentStatus::Pending,
        }
    }
}

/// Map a document id prefix to its federal court.
///
/// KARE -> BAG, KORE -> BGH, KSRE -> BSG, WBRE -> BVerwG. Unknown prefixes
/// fall back to UNKNOWN until extraction refines the court from content.
pub fn court_from_prefix(document_id: &str) -> &'static str {
    if document_id.starts_with("KARE") {
        "BAG"
    } else if document_id.starts_with("KORE") {
        "BGH"
    } else if document_id.starts_with("KSRE") {
        "BSG"
    } else if document_id.starts_with("WBRE") {
        "BVerwG"
    } else {
        "UNKNOWN"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Downloaded,
            DocumentStatus::Processed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::from_str("bogus"), None);
    }

    #[test]
    fn court_prefix_mapping() {
        assert_eq!(court_from_prefix("KARE500041892"), "BAG");
        assert_eq!(court_from_prefix("KORE300012345"), "BGH");
        assert_eq!(court_from_prefix("KSRE100000001"), "BSG");
        assert_eq!(court_from_prefix("WBRE201500042"), "BVerwG");
        assert_eq!(court_from_prefix("XYZE000000001"), "UNKNOWN");
    }

    #[test]
    fn new_document_starts_pending() {
        let doc = LegalDocument::new(
            "KARE500041892".into(),
            "BAG".into(),
            "https://example.org/doc?docid=KARE500041892".into(),
        );
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.crawled_at.is_none());
        assert!(doc.file_path.is_none());
    }
}
