//! Structured content extraction from portal HTML documents.
//!
//! The portal renders decisions with a stable layout: a metadata table
//! (label cells `td.TD30`, value cells `td.TD70`/`td.TD70BREAK`), a title
//! block, and named sections (Leitsatz, Tenor, Gründe) as a heading
//! followed by a content div. Extraction is best-effort: parse failures
//! leave fields unset, never fail the download.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Cap on extracted full text.
const FULL_TEXT_LIMIT: usize = 50_000;

/// Federal court tokens recognized during court-name normalization.
const COURT_TOKENS: &[&str] = &["BGH", "BVerfG", "BAG", "BSG", "BVerwG", "BFH", "BPatG"];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RESIDUAL_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#x[0-9A-Fa-f]+;").unwrap());

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static LABEL_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("table td.TD30").unwrap());
static VALUE_CELL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.TD70, td.TD70BREAK").unwrap());
static SUBJECT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".docLayoutTitel p, .RspDL dd p").unwrap());
static CONTENT_BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".docLayoutText, .docLayoutTitel, .RspDL").unwrap());
static SECTION_HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h4, h5, dt").unwrap());

/// Fields pulled out of one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub court: Option<String>,
    pub decision_date: Option<DateTime<Utc>>,
    pub case_number: Option<String>,
    pub ecli: Option<String>,
    pub document_type: Option<String>,
    pub norms: Option<String>,
    pub subject: Option<String>,
    pub leitsatz: Option<String>,
    pub tenor: Option<String>,
    pub gruende: Option<String>,
    pub full_text: Option<String>,
    /// Metadata rows with labels outside the recognized set.
    pub additional_fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract structured fields from a downloaded document body.
    pub fn extract(&self, content: &str) -> ExtractedContent {
        let mut extracted = ExtractedContent::default();
        let doc = Html::parse_document(content);

        if let Some(title) = doc.select(&TITLE).next() {
            let text = clean_text(&element_text(&title));
            if !text.is_empty() {
                extracted.title = Some(text);
            }
        }

        self.extract_metadata_table(&doc, &mut extracted);
        self.extract_subject(&doc, &mut extracted);
        self.extract_sections(&doc, &mut extracted);
        self.extract_full_text(&doc, &mut extracted);

        tracing::debug!(title = ?extracted.title, "extracted content from document");
        extracted
    }

    fn extract_metadata_table(&self, doc: &Html, extracted: &mut ExtractedContent) {
        for label_cell in doc.select(&LABEL_CELL) {
            let label = clean_text(&element_text(&label_cell));
            let Some(row) = label_cell.parent().and_then(ElementRef::wrap) else {
                continue;
            };
            let Some(value_cell) = row.select(&VALUE_CELL).next() else {
                continue;
            };
            let value = clean_text(&element_text(&value_cell));
            if value.is_empty() {
                continue;
            }

            match label.trim_end_matches(':').to_lowercase().as_str() {
                "gericht" => extracted.court = Some(normalize_court(&value)),
                "entscheidungsdatum" => {
                    extracted.decision_date = parse_german_date(&value);
                }
                "aktenzeichen" => extracted.case_number = Some(value),
                "ecli" => extracted.ecli = Some(value),
                "dokumenttyp" => extracted.document_type = Some(value),
                "normen" => extracted.norms = Some(value),
                other if !other.is_empty() => {
                    extracted
                        .additional_fields
                        .insert(label.trim_end_matches(':').to_string(), value);
                }
                _ => {}
            }
        }
    }

    fn extract_subject(&self, doc: &Html, extracted: &mut ExtractedContent) {
        if let Some(subject) = doc.select(&SUBJECT).next() {
            let text = clean_text(&element_text(&subject));
            if !text.is_empty() {
                extracted.subject = Some(text);
            }
        }
    }

    /// Sections are rendered as a heading element whose text names the
    /// section, followed by a sibling block carrying the content.
    fn extract_sections(&self, doc: &Html, extracted: &mut ExtractedContent) {
        for heading in doc.select(&SECTION_HEADING) {
            let name = clean_text(&element_text(&heading)).to_lowercase();
            let slot = match name.trim_end_matches(':') {
                "leitsatz" => &mut extracted.leitsatz,
                "tenor" => &mut extracted.tenor,
                "gründe" | "entscheidungsgründe" => &mut extracted.gruende,
                _ => continue,
            };
            if slot.is_some() {
                continue;
            }
            let content = heading
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .map(|el| clean_text(&element_text(&el)))
                .find(|text| !text.is_empty());
            if let Some(text) = content {
                *slot = Some(text);
            }
        }
    }

    fn extract_full_text(&self, doc: &Html, extracted: &mut ExtractedContent) {
        let mut full_text = String::new();

        if let Some(title) = &extracted.title {
            full_text.push_str(title);
            full_text.push_str("\n\n");
        }
        if let Some(subject) = &extracted.subject {
            full_text.push_str(subject);
            full_text.push_str("\n\n");
        }

        for block in doc.select(&CONTENT_BLOCKS) {
            let text = clean_text(&element_text(&block));
            if text.len() > 10 {
                full_text.push_str(&text);
                full_text.push('\n');
            }
        }

        // Metadata rendered as searchable text lines.
        full_text.push_str("\nGericht: ");
        full_text.push_str(extracted.court.as_deref().unwrap_or(""));
        full_text.push_str("\nAktenzeichen: ");
        full_text.push_str(extracted.case_number.as_deref().unwrap_or(""));
        full_text.push_str("\nDokumenttyp: ");
        full_text.push_str(extracted.document_type.as_deref().unwrap_or(""));
        full_text.push('\n');
        if let Some(norms) = &extracted.norms {
            if !norms.is_empty() {
                full_text.push_str("Normen: ");
                full_text.push_str(norms);
                full_text.push('\n');
            }
        }

        let trimmed = full_text.trim();
        if trimmed.is_empty() {
            return;
        }
        extracted.full_text = Some(cap_text(trimmed, FULL_TEXT_LIMIT));
    }
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace, drop pipes and residual numeric entities.
fn clean_text(text: &str) -> String {
    let no_entities = RESIDUAL_ENTITY.replace_all(text, " ");
    let no_pipes = no_entities.replace('|', " ");
    WHITESPACE.replace_all(&no_pipes, " ").trim().to_string()
}

/// If the court string carries a federal court token, return the token;
/// otherwise the court is unknown until refined from other sources.
fn normalize_court(court: &str) -> String {
    for token in COURT_TOKENS {
        if court.contains(token) {
            return (*token).to_string();
        }
    }
    "UNKNOWN".to_string()
}

/// Parse the portal's German date format `dd.MM.yyyy`.
fn parse_german_date(value: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value.trim(), "%d.%m.%Y").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

fn cap_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html><head><title>BAG 5 AZR 101/24 - Urteil</title></head>
<body>
<table>
  <tr><td class="TD30">Gericht:</td><td class="TD70">BAG 5. Senat</td></tr>
  <tr><td class="TD30">Entscheidungsdatum:</td><td class="TD70">15.03.2024</td></tr>
  <tr><td class="TD30">Aktenzeichen:</td><td class="TD70">5 AZR 101/24</td></tr>
  <tr><td class="TD30">ECLI:</td><td class="TD70BREAK">ECLI:DE:BAG:2024:150324.U.5AZR101.24.0</td></tr>
  <tr><td class="TD30">Dokumenttyp:</td><td class="TD70">Urteil</td></tr>
  <tr><td class="TD30">Normen:</td><td class="TD70">&sect; 611a BGB</td></tr>
  <tr><td class="TD30">Spruchk&ouml;rper:</td><td class="TD70">5. Senat</td></tr>
</table>
<div class="docLayoutTitel"><p>Verg&uuml;tung von Umkleidezeiten</p></div>
<h4>Leitsatz</h4>
<div class="docLayoutText"><p>Umkleidezeiten sind verg&uuml;tungspflichtige Arbeitszeit, wenn das Umkleiden fremdn&uuml;tzig ist.</p></div>
<h4>Tenor</h4>
<div class="docLayoutText"><p>Die Revision der Beklagten wird zur&uuml;ckgewiesen.</p></div>
<h4>Gr&uuml;nde</h4>
<div class="docLayoutText"><p>Die Parteien streiten &uuml;ber die Verg&uuml;tung von Umkleide- und Wegezeiten. Der Kl&auml;ger ist als Werker besch&auml;ftigt.</p></div>
</body></html>"#;

    #[test]
    fn extracts_metadata_table() {
        let extractor = ContentExtractor::new();
        let content = extractor.extract(SAMPLE);

        assert_eq!(content.title.as_deref(), Some("BAG 5 AZR 101/24 - Urteil"));
        assert_eq!(content.court.as_deref(), Some("BAG"));
        assert_eq!(content.case_number.as_deref(), Some("5 AZR 101/24"));
        assert_eq!(
            content.ecli.as_deref(),
            Some("ECLI:DE:BAG:2024:150324.U.5AZR101.24.0")
        );
        assert_eq!(content.document_type.as_deref(), Some("Urteil"));
        assert_eq!(content.norms.as_deref(), Some("§ 611a BGB"));
        assert_eq!(
            content.additional_fields.get("Spruchkörper").map(String::as_str),
            Some("5. Senat")
        );
    }

    #[test]
    fn parses_german_decision_date() {
        let extractor = ContentExtractor::new();
        let content = extractor.extract(SAMPLE);
        let date = content.decision_date.unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 15));
    }

    #[test]
    fn extracts_subject_and_sections() {
        let extractor = ContentExtractor::new();
        let content = extractor.extract(SAMPLE);
        assert_eq!(content.subject.as_deref(), Some("Vergütung von Umkleidezeiten"));
        assert!(content.leitsatz.unwrap().contains("fremdnützig"));
        assert!(content.tenor.unwrap().contains("zurückgewiesen"));
        assert!(content.gruende.unwrap().contains("Umkleide- und Wegezeiten"));
    }

    #[test]
    fn full_text_contains_body_and_metadata() {
        let extractor = ContentExtractor::new();
        let content = extractor.extract(SAMPLE);
        let full_text = content.full_text.unwrap();
        assert!(full_text.contains("Umkleidezeiten"));
        assert!(full_text.contains("Aktenzeichen: 5 AZR 101/24"));
        assert!(full_text.len() <= FULL_TEXT_LIMIT + '…'.len_utf8());
    }

    #[test]
    fn court_normalization_falls_back_to_unknown() {
        assert_eq!(normalize_court("Bundesgerichtshof BGH 1. Zivilsenat"), "BGH");
        assert_eq!(normalize_court("Landgericht Berlin"), "UNKNOWN");
    }

    #[test]
    fn full_text_is_capped() {
        let body = "wort ".repeat(20_000);
        let html = format!(
            r#"<html><head><title>Lang</title></head><body><div class="docLayoutText">{body}</div></body></html>"#
        );
        let extractor = ContentExtractor::new();
        let content = extractor.extract(&html);
        let full_text = content.full_text.unwrap();
        assert!(full_text.ends_with('…'));
        assert!(full_text.len() <= FULL_TEXT_LIMIT + '…'.len_utf8());
    }

    #[test]
    fn bad_input_yields_empty_extraction() {
        let extractor = ContentExtractor::new();
        let content = extractor.extract("\u{0000}%%% not html at all");
        assert!(content.court.is_none());
        assert!(content.case_number.is_none());
        assert!(content.decision_date.is_none());
    }
}
