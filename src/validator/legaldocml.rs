//! LegalDocML.de (Akoma Ntoso) structural validation.
//!
//! LegalDocML.de is the German application profile of the OASIS LegalDocML
//! standard. The validator checks namespace declarations, the root element,
//! mandatory metadata, FRBR levels, document structure, identifier formats
//! (eId, wId, GUID), and German judgment elements. Only missing namespaces
//! and a missing `meta` element are hard errors; everything else surfaces
//! as a warning or a recorded validation hit.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::xml::SanitizeError;

pub const AKN_NAMESPACE: &str = "http://docs.oasis-open.org/legaldocml/ns/akn/3.0";
pub const LEGALDOCML_DE_NAMESPACE: &str = "http://www.legaldocml.de/1.0/";

const VALID_ROOT_ELEMENTS: &[&str] = &[
    "akomaNtoso",
    "act",
    "bill",
    "doc",
    "judgment",
    "portion",
    "documentCollection",
];

const REQUIRED_METADATA_ELEMENTS: &[&str] = &["identification", "publication", "lifecycle"];

const FRBR_LEVELS: &[&str] = &["FRBRWork", "FRBRExpression", "FRBRManifestation"];

const STRUCTURE_ELEMENTS: &[&str] = &["meta", "preface", "preamble", "body", "conclusions"];

const GERMAN_COURT_ELEMENTS: &[&str] =
    &["courtType", "docketNumber", "decisionDate", "judges", "procedure"];

static EID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap());

static GUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

/// Outcome of a structural validation run.
#[derive(Debug, Clone, Default)]
pub struct LegalDocMlReport {
    pub valid: bool,
    pub errors: BTreeSet<String>,
    pub warnings: BTreeSet<String>,
    pub validations: BTreeSet<String>,
}

impl LegalDocMlReport {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.insert(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.insert(message.into());
    }

    fn validation(&mut self, category: &str, message: impl AsRef<str>) {
        self.validations
            .insert(format!("{category}: {}", message.as_ref()));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "LegalDocML validation: valid={}, errors={}, warnings={}, validations={}",
            self.valid,
            self.errors.len(),
            self.warnings.len(),
            self.validations.len()
        )
    }
}

/// Minimal element tree, enough for structural checks without ever
/// resolving DTDs or external entities.
#[derive(Debug, Clone, Default)]
struct XmlElement {
    local_name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first walk over self and all descendants.
    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a XmlElement)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    fn descendants_by_local_name<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.walk(&mut |el| {
            if el.local_name == name {
                found.push(el);
            }
        });
        found
    }
}

fn local_name(qname: &[u8]) -> String {
    let raw = String::from_utf8_lossy(qname);
    match raw.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => raw.into_owned(),
    }
}

fn parse_tree(xml: &str) -> Result<XmlElement, SanitizeError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let mut element = XmlElement {
                    local_name: local_name(start.name().as_ref()),
                    ..Default::default()
                };
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(|e| SanitizeError::MalformedXml(e.to_string()))?
                        .into_owned();
                    element.attributes.push((key, value));
                }
                stack.push(element);
            }
            Ok(Event::Empty(start)) => {
                let mut element = XmlElement {
                    local_name: local_name(start.name().as_ref()),
                    ..Default::default()
                };
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(|e| SanitizeError::MalformedXml(e.to_string()))?
                        .into_owned();
                    element.attributes.push((key, value));
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {
                        return Err(SanitizeError::MalformedXml(
                            "multiple root elements".into(),
                        ))
                    }
                }
            }
            Ok(Event::End(_)) => {
                let finished = stack.pop().ok_or_else(|| {
                    SanitizeError::MalformedXml("unbalanced closing tag".into())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(finished),
                    None if root.is_none() => root = Some(finished),
                    None => {
                        return Err(SanitizeError::MalformedXml(
                            "multiple root elements".into(),
                        ))
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| SanitizeError::MalformedXml(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SanitizeError::MalformedXml(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(SanitizeError::MalformedXml("unclosed element".into()));
    }
    root.ok_or_else(|| SanitizeError::MalformedXml("no root element".into()))
}

/// Parse-only structural check, shared with the validation pipeline.
pub fn structure_check(xml: &str) -> Result<(), SanitizeError> {
    parse_tree(xml).map(|_| ())
}

#[derive(Debug, Clone, Default)]
pub struct LegalDocMlValidator;

impl LegalDocMlValidator {
    pub fn new() -> Self {
        Self
    }

    /// Quick check whether content looks like LegalDocML at all.
    pub fn is_legaldocml_format(&self, xml: &str) -> bool {
        if xml.trim().is_empty() {
            return false;
        }
        xml.contains(AKN_NAMESPACE)
            || xml.contains(LEGALDOCML_DE_NAMESPACE)
            || xml.contains("akomaNtoso")
            || xml.contains("akn:")
    }

    /// Validate sanitized XML against the LegalDocML.de profile.
    pub fn validate(&self, xml: &str) -> Result<LegalDocMlReport, SanitizeError> {
        if xml.trim().is_empty() {
            return Err(SanitizeError::Generic("XML content must not be empty".into()));
        }

        let root = parse_tree(xml)?;
        let mut report = LegalDocMlReport::default();

        check_namespaces(&root, &mut report);
        check_root_element(&root, &mut report);
        check_metadata(&root, &mut report);
        check_structure(&root, &mut report);
        check_identifiers(&root, &mut report);
        check_german_elements(&root, &mut report);

        report.valid = !report.has_errors();
        if report.valid {
            tracing::debug!("LegalDocML validation successful");
        } else {
            tracing::warn!(errors = ?report.errors, "LegalDocML validation failed");
        }

        Ok(report)
    }

    /// Pull a document type out of LegalDocML content: the root `name`
    /// attribute, else the first `type` element, else the root tag itself.
    pub fn extract_document_type(&self, xml: &str) -> Result<String, SanitizeError> {
        let root = parse_tree(xml)?;
        if let Some(name) = root.attribute("name") {
            return Ok(name.to_string());
        }
        if let Some(el) = root.descendants_by_local_name("type").first() {
            let text = el.text.trim();
            if !text.is_empty() {
                return Ok(text.to_string());
            }
        }
        Ok(root.local_name.clone())
    }
}

fn has_legaldocml_namespace(root: &XmlElement) -> bool {
    root.attributes.iter().any(|(key, value)| {
        key.starts_with("xmlns") && (value == AKN_NAMESPACE || value == LEGALDOCML_DE_NAMESPACE)
    })
}

fn check_namespaces(root: &XmlElement, report: &mut LegalDocMlReport) {
    if has_legaldocml_namespace(root) {
        report.validation("Namespace", "valid LegalDocML namespace found");
    } else {
        report.error("missing LegalDocML namespace declaration");
    }
}

fn check_root_element(root: &XmlElement, report: &mut LegalDocMlReport) {
    if VALID_ROOT_ELEMENTS.contains(&root.local_name.as_str()) {
        report.validation("Root element", format!("valid root element: {}", root.local_name));
    } else {
        report.warning(format!("unexpected root element: {}", root.local_name));
    }
}

fn check_metadata(root: &XmlElement, report: &mut LegalDocMlReport) {
    let metas = root.descendants_by_local_name("meta");
    let Some(meta) = metas.first() else {
        report.error("missing required 'meta' element");
        return;
    };

    for required in REQUIRED_METADATA_ELEMENTS {
        if meta.descendants_by_local_name(required).is_empty() {
            report.warning(format!("missing recommended metadata element: {required}"));
        } else {
            report.validation("Metadata", format!("found required element: {required}"));
        }
    }

    if let Some(identification) = meta.descendants_by_local_name("identification").first() {
        for level in FRBR_LEVELS {
            if identification.descendants_by_local_name(level).is_empty() {
                report.warning(format!("missing FRBR element: {level}"));
            } else {
                report.validation("FRBR Model", format!("found {level} element"));
            }
        }
    }
}

fn check_structure(root: &XmlElement, report: &mut LegalDocMlReport) {
    for element in STRUCTURE_ELEMENTS {
        if !root.descendants_by_local_name(element).is_empty() {
            report.validation("Structure", format!("found structural element: {element}"));
        }
    }
    if root.descendants_by_local_name("body").is_empty() {
        report.warning("missing 'body' element - document may be incomplete");
    }
}

fn check_identifiers(root: &XmlElement, report: &mut LegalDocMlReport) {
    let mut e_ids = 0usize;
    let mut w_ids = 0usize;
    let mut guids = 0usize;

    root.walk(&mut |el| {
        if let Some(e_id) = el.attribute("eId") {
            e_ids += 1;
            let valid =
                EID_PATTERN.is_match(e_id) && !e_id.starts_with('.') && !e_id.ends_with('.');
            if !valid {
                report.warning(format!("invalid eId format: {e_id}"));
            }
        }
        if let Some(w_id) = el.attribute("wId") {
            w_ids += 1;
            if !EID_PATTERN.is_match(w_id) {
                report.warning(format!("invalid wId format: {w_id}"));
            }
        }
        if let Some(guid) = el.attribute("GUID") {
            guids += 1;
            if !GUID_PATTERN.is_match(guid) {
                report.warning(format!("invalid GUID format: {guid}"));
            }
        }
    });

    if e_ids > 0 {
        report.validation("Identifiers", format!("found {e_ids} eId attributes"));
    }
    if w_ids > 0 {
        report.validation("Identifiers", format!("found {w_ids} wId attributes"));
    }
    if guids > 0 {
        report.validation("Identifiers", format!("found {guids} GUID attributes"));
    }
}

fn check_german_elements(root: &XmlElement, report: &mut LegalDocMlReport) {
    let is_judgment =
        root.local_name == "judgment" || !root.descendants_by_local_name("judgment").is_empty();
    if !is_judgment {
        return;
    }
    for element in GERMAN_COURT_ELEMENTS {
        if !root.descendants_by_local_name(element).is_empty() {
            report.validation("German Elements", format!("found German court element: {element}"));
        }
    }
}
