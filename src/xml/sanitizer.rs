//! XML content sanitization and security validation.
//!
//! Rejects the classic XML attack vectors before any document reaches the
//! validators: external entities (XXE), DOCTYPE injection, entity-expansion
//! bombs, oversized payloads, and invalid control characters. The final
//! structural check runs through quick-xml, which resolves neither DTDs nor
//! external entities.

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

/// Default maximum accepted payload: 10 MiB.
pub const DEFAULT_MAX_XML_SIZE: usize = 10 * 1024 * 1024;

/// Default bound on the length-per-entity-reference ratio.
pub const DEFAULT_MAX_ENTITY_EXPANSION_RATIO: usize = 10;

static EXTERNAL_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)<!ENTITY\s+[^>]+\s+(SYSTEM|PUBLIC)\s+[^>]+>").unwrap());

static DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)<!DOCTYPE\s+[^>]+>").unwrap());

static XML_BOMB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?im)<!ENTITY\s+\w+\s+["'][^"']*(&\w+;[^"']*){10,}["']>"#).unwrap()
});

static ENTITY_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"&\w+;").unwrap());

/// Control characters that must not appear in legal documents.
static INVALID_CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap());

/// Why a document was rejected by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    #[error("external entity declaration detected")]
    ExternalEntity,

    #[error("DOCTYPE declaration detected")]
    DoctypeDeclaration,

    #[error("potential XML bomb detected: {0}")]
    XmlBomb(String),

    #[error("invalid character encoding: {0}")]
    InvalidEncoding(String),

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("{0}")]
    Generic(String),
}

/// Hardened sanitizer for inbound XML.
#[derive(Debug, Clone)]
pub struct XmlSanitizer {
    max_size: usize,
    max_entity_expansion_ratio: usize,
}

impl Default for XmlSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_XML_SIZE, DEFAULT_MAX_ENTITY_EXPANSION_RATIO)
    }
}

impl XmlSanitizer {
    pub fn new(max_size: usize, max_entity_expansion_ratio: usize) -> Self {
        Self {
            max_size,
            max_entity_expansion_ratio,
        }
    }

    /// Sanitize raw bytes, validating UTF-8 at the boundary.
    pub fn sanitize_bytes(&self, bytes: &[u8]) -> Result<String, SanitizeError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| SanitizeError::InvalidEncoding(e.to_string()))?;
        self.sanitize(text)
    }

    /// Sanitize XML content, returning the cleaned text or the first
    /// security violation found.
    pub fn sanitize(&self, xml: &str) -> Result<String, SanitizeError> {
        if xml.trim().is_empty() {
            return Err(SanitizeError::SecurityViolation(
                "XML content must not be empty".into(),
            ));
        }

        if xml.len() > self.max_size {
            return Err(SanitizeError::SecurityViolation(format!(
                "XML content exceeds maximum allowed size: {} bytes",
                xml.len()
            )));
        }

        let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);

        self.check_security_threats(xml)?;

        let cleaned = INVALID_CONTROL_CHARS.replace_all(xml, "").into_owned();

        check_well_formed(&cleaned)?;

        tracing::debug!(size = cleaned.len(), "XML content sanitized");
        Ok(cleaned)
    }

    fn check_security_threats(&self, xml: &str) -> Result<(), SanitizeError> {
        if EXTERNAL_ENTITY.is_match(xml) {
            return Err(SanitizeError::ExternalEntity);
        }
        if DOCTYPE.is_match(xml) {
            return Err(SanitizeError::DoctypeDeclaration);
        }
        if XML_BOMB.is_match(xml) {
            return Err(SanitizeError::XmlBomb("entity chain pattern".into()));
        }

        let entity_count = ENTITY_REFERENCE.find_iter(xml).count();
        if entity_count > 0 {
            let ratio = xml.len() / entity_count;
            if ratio > self.max_entity_expansion_ratio {
                return Err(SanitizeError::XmlBomb(format!(
                    "suspicious entity expansion ratio: {ratio}"
                )));
            }
        }

        Ok(())
    }

    /// Escape text for safe inclusion as XML element content.
    pub fn for_text_content(text: &str) -> String {
        quick_xml::escape::partial_escape(text).into_owned()
    }

    /// Escape text for safe inclusion as an XML attribute value.
    pub fn for_attribute_value(value: &str) -> String {
        quick_xml::escape::escape(value).into_owned()
    }
}

/// Check document well-formedness: exactly one root element, balanced
/// tags, no non-whitespace text outside the root.
fn check_well_formed(xml: &str) -> Result<(), SanitizeError> {
    let mut reader = Reader::from_str(xml);
    let mut depth: usize = 0;
    let mut roots = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    SanitizeError::MalformedXml("unbalanced closing tag".into())
                })?;
            }
            Ok(Event::Text(t)) => {
                if depth == 0 {
                    let text = t
                        .unescape()
                        .map_err(|e| SanitizeError::MalformedXml(e.to_string()))?;
                    if !text.trim().is_empty() {
                        return Err(SanitizeError::MalformedXml(
                            "text content outside the document root".into(),
                        ));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SanitizeError::MalformedXml(e.to_string())),
        }
    }

    if depth != 0 {
        return Err(SanitizeError::MalformedXml("unclosed element".into()));
    }
    if roots != 1 {
        return Err(SanitizeError::MalformedXml(format!(
            "expected exactly one root element, found {roots}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_XML: &str = r#"<?xml version="1.0"?><doc><p>Urteil des Senats</p></doc>"#;

    #[test]
    fn accepts_clean_document() {
        let sanitizer = XmlSanitizer::default();
        let out = sanitizer.sanitize(VALID_XML).unwrap();
        assert!(out.contains("<doc>"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let sanitizer = XmlSanitizer::default();
        let once = sanitizer.sanitize(VALID_XML).unwrap();
        let twice = sanitizer.sanitize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_external_entity_before_doctype() {
        let sanitizer = XmlSanitizer::default();
        let xxe = r#"<?xml version="1.0"?><!DOCTYPE d [<!ENTITY x SYSTEM "file:///etc/passwd">]><d>&x;</d>"#;
        assert_eq!(sanitizer.sanitize(xxe), Err(SanitizeError::ExternalEntity));
    }

    #[test]
    fn rejects_doctype_declaration() {
        let sanitizer = XmlSanitizer::default();
        let doc = r#"<!DOCTYPE html><html><body/></html>"#;
        assert_eq!(
            sanitizer.sanitize(doc),
            Err(SanitizeError::DoctypeDeclaration)
        );
    }

    #[test]
    fn rejects_suspicious_entity_expansion_ratio() {
        let sanitizer = XmlSanitizer::default();
        let padding = "a".repeat(200);
        let doc = format!("<d>{padding}&amp;</d>");
        assert!(matches!(
            sanitizer.sanitize(&doc),
            Err(SanitizeError::XmlBomb(_))
        ));
    }

    #[test]
    fn rejects_empty_and_oversized_input() {
        let sanitizer = XmlSanitizer::new(64, DEFAULT_MAX_ENTITY_EXPANSION_RATIO);
        assert!(matches!(
            sanitizer.sanitize("   "),
            Err(SanitizeError::SecurityViolation(_))
        ));
        let big = format!("<d>{}</d>", "x".repeat(128));
        assert!(matches!(
            sanitizer.sanitize(&big),
            Err(SanitizeError::SecurityViolation(_))
        ));
    }

    #[test]
    fn strips_bom_and_control_characters() {
        let sanitizer = XmlSanitizer::default();
        let doc = "\u{feff}<d>be\u{0008}schluss</d>";
        let out = sanitizer.sanitize(doc).unwrap();
        assert_eq!(out, "<d>beschluss</d>");
    }

    #[test]
    fn rejects_malformed_xml() {
        let sanitizer = XmlSanitizer::default();
        assert!(matches!(
            sanitizer.sanitize("<d><open></d>"),
            Err(SanitizeError::MalformedXml(_))
        ));
        assert!(matches!(
            sanitizer.sanitize("plain text, no markup at all"),
            Err(SanitizeError::MalformedXml(_))
        ));
        assert!(matches!(
            sanitizer.sanitize("<a/><b/>"),
            Err(SanitizeError::MalformedXml(_))
        ));
    }

    #[test]
    fn rejects_invalid_utf8_bytes() {
        let sanitizer = XmlSanitizer::default();
        assert!(matches!(
            sanitizer.sanitize_bytes(&[0x3c, 0x64, 0x3e, 0xff, 0xfe, 0x3c, 0x2f, 0x64, 0x3e]),
            Err(SanitizeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn escaping_helpers() {
        assert_eq!(
            XmlSanitizer::for_text_content("Tarifvertrag & <Anlage>"),
            "Tarifvertrag &amp; &lt;Anlage&gt;"
        );
        assert!(XmlSanitizer::for_attribute_value(r#"a "b" & c"#).contains("&quot;"));
    }
}
