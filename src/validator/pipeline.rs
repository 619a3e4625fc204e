//! Composed validation pipeline: sanitizer, structure check, LegalDocML
//! profile validation, and ECLI extraction in one call.
//!
//! Two modes: strict fails the document on any error, lenient keeps going
//! and downgrades everything but sanitization failures to warnings on the
//! report. `quick_validate` is the cheap path used by the CLI validate
//! command and by callers that only need a go/no-go answer.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::validator::ecli::EcliValidator;
use crate::validator::legaldocml::LegalDocMlValidator;
use crate::xml::XmlSanitizer;

static ELEMENT_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^/!?]").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Configuration for the validation pipeline.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Schema validation is accepted but currently a recorded no-op; the
    /// portal publishes no usable XSD for its export format.
    pub schema_enabled: bool,
    pub legaldocml_enabled: bool,
    pub ecli_enabled: bool,
    pub strict_mode: bool,
    pub max_size: usize,
    pub max_entity_expansion_ratio: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_enabled: true,
            legaldocml_enabled: true,
            ecli_enabled: true,
            strict_mode: false,
            max_size: crate::xml::sanitizer::DEFAULT_MAX_XML_SIZE,
            max_entity_expansion_ratio: crate::xml::sanitizer::DEFAULT_MAX_ENTITY_EXPANSION_RATIO,
        }
    }
}

/// Full validation report for one document.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub sanitization_passed: bool,
    pub structure_valid: bool,
    pub legaldocml_format: bool,
    pub document_type: Option<String>,
    pub ecli_identifiers: BTreeSet<String>,
    pub element_count: usize,
    pub has_substantial_content: bool,
    pub original_size: usize,
    pub sanitized_size: usize,
    pub validations: BTreeSet<String>,
    pub warnings: BTreeSet<String>,
    pub errors: BTreeSet<String>,
}

impl ValidationReport {
    fn validation(&mut self, category: &str, message: impl AsRef<str>) {
        self.validations
            .insert(format!("{category}: {}", message.as_ref()));
    }

    pub fn summary(&self) -> String {
        format!(
            "valid={}, sanitization={}, structure={}, legaldocml={}, eclis={}, errors={}, warnings={}",
            self.valid,
            self.sanitization_passed,
            self.structure_valid,
            self.legaldocml_format,
            self.ecli_identifiers.len(),
            self.errors.len(),
            self.warnings.len()
        )
    }
}

/// Minimal result of the quick validation path.
#[derive(Debug, Clone, Default)]
pub struct QuickValidation {
    pub valid: bool,
    pub sanitization_passed: bool,
    pub structure_valid: bool,
    pub legaldocml_format: bool,
    pub ecli_count: usize,
    pub error_message: Option<String>,
}

/// The composed validation service.
#[derive(Debug, Clone)]
pub struct ValidationService {
    config: ValidationConfig,
    sanitizer: XmlSanitizer,
    ecli: EcliValidator,
    legaldocml: LegalDocMlValidator,
}

impl Default for ValidationService {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl ValidationService {
    pub fn new(config: ValidationConfig) -> Self {
        let sanitizer = XmlSanitizer::new(config.max_size, config.max_entity_expansion_ratio);
        Self {
            config,
            sanitizer,
            ecli: EcliValidator::new(),
            legaldocml: LegalDocMlValidator::new(),
        }
    }

    pub fn strict_mode(&self) -> bool {
        self.config.strict_mode
    }

    /// Run the full pipeline over one document.
    pub fn validate(&self, xml: &str) -> ValidationReport {
        let mut report = ValidationReport {
            original_size: xml.len(),
            ..Default::default()
        };

        // Sanitization always runs. In lenient mode a failure is recorded
        // and the pipeline continues over the original content.
        let content = match self.sanitizer.sanitize(xml) {
            Ok(clean) => {
                report.sanitization_passed = true;
                report.validation("Security", "XML sanitization completed");
                clean
            }
            Err(e) => {
                report.sanitization_passed = false;
                report.errors.insert(format!("sanitization failed: {e}"));
                if self.config.strict_mode {
                    report.sanitized_size = 0;
                    report.valid = false;
                    return report;
                }
                tracing::warn!(error = %e, "sanitization failed, continuing in lenient mode");
                xml.to_string()
            }
        };
        report.sanitized_size = content.len();

        match crate::validator::legaldocml::structure_check(&content) {
            Ok(()) => {
                report.structure_valid = true;
                report.validation("Structure", "XML structure validation passed");
            }
            Err(e) => {
                report.structure_valid = false;
                report.errors.insert(format!("XML structure validation failed: {e}"));
            }
        }

        if self.config.schema_enabled {
            report.validation("Schema", "schema validation requested (no schema specified)");
        }

        if self.config.legaldocml_enabled {
            self.run_legaldocml(&content, &mut report);
        }

        if self.config.ecli_enabled {
            self.run_ecli(&content, &mut report);
        }

        self.analyze_content(&content, &mut report);

        report.valid = report.sanitization_passed
            && report.structure_valid
            && (!self.config.strict_mode || report.errors.is_empty());

        tracing::debug!(summary = %report.summary(), "XML validation completed");
        report
    }

    /// Cheap path: sanitize, structure-parse, detect format, count ECLIs.
    pub fn quick_validate(&self, xml: &str) -> QuickValidation {
        let mut summary = QuickValidation::default();

        let sanitized = match self.sanitizer.sanitize(xml) {
            Ok(clean) => {
                summary.sanitization_passed = true;
                clean
            }
            Err(e) => {
                summary.error_message = Some(e.to_string());
                return summary;
            }
        };

        match crate::validator::legaldocml::structure_check(&sanitized) {
            Ok(()) => summary.structure_valid = true,
            Err(e) => {
                summary.error_message = Some(e.to_string());
                return summary;
            }
        }

        summary.legaldocml_format = self.legaldocml.is_legaldocml_format(&sanitized);
        summary.ecli_count = self.ecli.extract_all(&sanitized).len();
        summary.valid = true;
        summary
    }

    fn run_legaldocml(&self, content: &str, report: &mut ValidationReport) {
        if !self.legaldocml.is_legaldocml_format(content) {
            report.legaldocml_format = false;
            report.validation("LegalDocML", "document is not in LegalDocML format");
            return;
        }

        report.legaldocml_format = true;
        match self.legaldocml.validate(content) {
            Ok(result) => {
                if result.valid {
                    report.validation("LegalDocML", "LegalDocML.de validation passed");
                } else {
                    report
                        .warnings
                        .insert("LegalDocML.de validation issues found".into());
                    for error in &result.errors {
                        report.errors.insert(format!("LegalDocML: {error}"));
                    }
                }
                for warning in &result.warnings {
                    report.warnings.insert(format!("LegalDocML: {warning}"));
                }
                report.validations.extend(result.validations);
            }
            Err(e) => {
                report.warnings.insert(format!("LegalDocML validation error: {e}"));
            }
        }

        if let Ok(doc_type) = self.legaldocml.extract_document_type(content) {
            report.document_type = Some(doc_type);
        }
    }

    fn run_ecli(&self, content: &str, report: &mut ValidationReport) {
        let identifiers = self.ecli.extract_all(content);

        if identifiers.is_empty() {
            report.validation("ECLI", "no ECLI identifiers found in document");
        } else {
            report.validation(
                "ECLI",
                format!("found {} valid ECLI identifier(s)", identifiers.len()),
            );
            for ecli in &identifiers {
                if let Ok(result) = self.ecli.validate(ecli) {
                    if result.components.is_german() {
                        report.validation("ECLI", format!("German court ECLI found: {ecli}"));
                    }
                }
            }
        }

        report.ecli_identifiers = identifiers;
    }

    fn analyze_content(&self, content: &str, report: &mut ValidationReport) {
        report.element_count = ELEMENT_OPEN.find_iter(content).count();
        let text_only = TAG.replace_all(content, "");
        report.has_substantial_content = text_only.trim().len() > 100;
        report.validation("Content", "content analysis completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LDML_DOC: &str = r#"<judgment name="urteil" xmlns="http://docs.oasis-open.org/legaldocml/ns/akn/3.0">
  <meta><identification><FRBRWork/></identification></meta>
  <body>
    <p>Im Namen des Volkes ergeht folgendes Urteil mit der Kennung ECLI:DE:BGH:2024:123
    und die Kosten des Rechtsstreits werden der Beklagten auferlegt.</p>
  </body>
</judgment>"#;

    #[test]
    fn full_pipeline_on_legaldocml_document() {
        let service = ValidationService::default();
        let report = service.validate(LDML_DOC);

        assert!(report.valid);
        assert!(report.sanitization_passed);
        assert!(report.structure_valid);
        assert!(report.legaldocml_format);
        assert_eq!(report.document_type.as_deref(), Some("urteil"));
        assert!(report.ecli_identifiers.contains("ECLI:DE:BGH:2024:123"));
        assert!(report.element_count > 0);
        assert!(report.has_substantial_content);
        assert_eq!(report.original_size, LDML_DOC.len());
    }

    #[test]
    fn strict_mode_fails_on_sanitization_violation() {
        let config = ValidationConfig {
            strict_mode: true,
            ..Default::default()
        };
        let service = ValidationService::new(config);
        let report = service.validate("<!DOCTYPE d><d/>");
        assert!(!report.valid);
        assert!(!report.sanitization_passed);
    }

    #[test]
    fn lenient_mode_continues_past_sanitization_failure() {
        let service = ValidationService::default();
        let report = service.validate("<!DOCTYPE d><d><p>text</p></d>");
        assert!(!report.valid); // sanitization still gates overall validity
        assert!(!report.sanitization_passed);
        // but the rest of the pipeline ran
        assert!(report.element_count > 0);
    }

    #[test]
    fn quick_validate_rejects_xxe() {
        let service = ValidationService::default();
        let xxe = r#"<?xml version="1.0"?><!DOCTYPE d [<!ENTITY x SYSTEM "file:///etc/passwd">]><d>&x;</d>"#;
        let summary = service.quick_validate(xxe);
        assert!(!summary.valid);
        assert!(!summary.sanitization_passed);
        assert!(summary.error_message.is_some());
    }

    #[test]
    fn quick_validate_counts_eclis() {
        let service = ValidationService::default();
        let doc = "<d><p>ECLI:DE:BGH:2024:123 und ECLI:DE:BAG:2023:456</p></d>";
        let summary = service.quick_validate(doc);
        assert!(summary.valid);
        assert!(summary.structure_valid);
        assert_eq!(summary.ecli_count, 2);
        assert!(!summary.legaldocml_format);
    }

    #[test]
    fn non_legaldocml_content_is_noted_not_failed() {
        let service = ValidationService::default();
        let report = service.validate("<d><p>Ein gewöhnliches Dokument ohne Profil.</p></d>");
        assert!(report.valid);
        assert!(!report.legaldocml_format);
        assert!(report
            .validations
            .iter()
            .any(|v| v.contains("not in LegalDocML format")));
    }
}
