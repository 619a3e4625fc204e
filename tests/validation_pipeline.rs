//! End-to-end validation scenarios: hostile XML is rejected at the
//! sanitization stage, ECLI identifiers are extracted and normalized,
//! and LegalDocML documents produce full reports.

use ecli_crawler::validator::pipeline::ValidationConfig;
use ecli_crawler::validator::{EcliValidator, ValidationService};

#[test]
fn xxe_payload_is_rejected_with_external_entity() {
    let service = ValidationService::default();
    let xxe = r#"<?xml version="1.0"?><!DOCTYPE d [<!ENTITY x SYSTEM "file:///etc/passwd">]><d>&x;</d>"#;

    let quick = service.quick_validate(xxe);
    assert!(!quick.valid);
    assert!(!quick.sanitization_passed);
    assert!(quick
        .error_message
        .as_deref()
        .unwrap()
        .contains("external entity"));

    let report = service.validate(xxe);
    assert!(!report.valid);
    assert!(!report.sanitization_passed);
}

#[test]
fn ecli_extraction_returns_exactly_the_valid_set() {
    let validator = EcliValidator::new();
    let text = "Die Entscheidungen ECLI:DE:BGH:2024:123 und ECLI:DE:BAG:2023:456 \
                verweisen auf EU:C:2005:446 und nicht erfasst wird INVALID:FORMAT.";

    let found = validator.extract_all(text);
    let expected: std::collections::BTreeSet<String> = [
        "ECLI:DE:BAG:2023:456",
        "ECLI:DE:BGH:2024:123",
        "EU:C:2005:446",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(found, expected);
}

#[test]
fn legaldocml_judgment_produces_a_full_report() {
    let xml = r#"<judgment name="urteil" xmlns="http://docs.oasis-open.org/legaldocml/ns/akn/3.0">
  <meta>
    <identification>
      <FRBRWork/><FRBRExpression/><FRBRManifestation/>
    </identification>
    <publication/>
    <lifecycle/>
  </meta>
  <body>
    <paragraph eId="para.1">Die Revision wird zurückgewiesen. Die Kennung der
    Entscheidung lautet ECLI:DE:BAG:2024:150324.U.5AZR101.24.0 und die Kosten des
    Rechtsstreits hat die Beklagte zu tragen.</paragraph>
    <courtType>BAG</courtType>
    <decisionDate>2024-03-15</decisionDate>
  </body>
</judgment>"#;

    let service = ValidationService::default();
    let report = service.validate(xml);

    assert!(report.valid, "errors: {:?}", report.errors);
    assert!(report.legaldocml_format);
    assert_eq!(report.document_type.as_deref(), Some("urteil"));
    assert!(report
        .ecli_identifiers
        .contains("ECLI:DE:BAG:2024:150324.U.5AZR101.24.0"));
    assert!(report.has_substantial_content);
}

#[test]
fn strict_mode_turns_profile_errors_fatal() {
    // LegalDocML content without the namespace declaration: an error in
    // the profile report, fatal only in strict mode.
    let xml = "<akomaNtoso><meta/><body><p>Ein kurzer Text im Dokument, der die \
               Schwelle für substanziellen Inhalt sicher überschreitet, damit nur \
               der Namensraum fehlt.</p></body></akomaNtoso>";

    let lenient = ValidationService::default().validate(xml);
    assert!(lenient.valid);
    assert!(!lenient.errors.is_empty());

    let strict = ValidationService::new(ValidationConfig {
        strict_mode: true,
        ..Default::default()
    })
    .validate(xml);
    assert!(!strict.valid);
}

#[test]
fn sanitizer_round_trip_is_stable_through_the_pipeline() {
    let xml = "<doc><p>Beschluss des Senats vom 15. März 2024</p></doc>";
    let service = ValidationService::default();

    let first = service.validate(xml);
    let second = service.validate(xml);
    assert_eq!(first.valid, second.valid);
    assert_eq!(first.sanitized_size, second.sanitized_size);
    assert_eq!(first.element_count, second.element_count);
}
