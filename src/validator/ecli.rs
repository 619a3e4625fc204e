//! European Case Law Identifier (ECLI) validation.
//!
//! Format: `ECLI:<country>:<court>:<year>:<ordinal>` where the country is a
//! two-letter ISO 3166-1 alpha-2 code (with the EL/UK exceptions and EU for
//! union courts), the court code is 1-7 characters starting with a letter,
//! the year is four digits, and the ordinal is 1-25 characters of letters,
//! digits, and dots. EU courts also publish the short `EU:C:<year>:<ord>`
//! form without the `ECLI:` prefix.

use std::collections::BTreeSet;

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static ECLI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^ECLI:[A-Z]{2}:[A-Z][A-Z0-9]{0,6}:\d{4}:[A-Z0-9.]{1,25}$").unwrap());

/// Alternative pattern without the ECLI prefix, used by EU courts.
static EU_ECLI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[A-Z]{2}:[A-Z]:\d{4}:[A-Z0-9.]{1,25}$").unwrap());

/// Scanning pattern for pulling candidate identifiers out of free text.
static SCAN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:ECLI:)?[A-Z]{2}:[A-Z][A-Z0-9]{0,6}:\d{4}:[A-Z0-9.]{1,25}").unwrap()
});

/// ISO 3166-1 alpha-2 codes of EU member states, plus the EL/UK exceptions
/// and EU for union courts.
const VALID_COUNTRY_CODES: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE", "EL", "UK", "EU",
];

/// Court codes of the German federal and state court systems.
const GERMAN_COURT_CODES: &[&str] = &[
    "BAG", "BGH", "BSG", "BVERWG", "BPATG", "BFH", "BVERFG", "LAG", "OLG", "LSG", "OVG", "VG",
    "SG", "FG", "AG",
];

/// Why an identifier was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ECLI: {0}")]
pub struct EcliError(pub String);

/// The four components of a normalized identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcliComponents {
    pub country_code: String,
    pub court_code: String,
    pub year: String,
    pub ordinal: String,
}

impl EcliComponents {
    pub fn is_german(&self) -> bool {
        self.country_code == "DE"
    }

    pub fn is_european_union(&self) -> bool {
        self.country_code == "EU"
    }
}

/// A validated, normalized identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEcli {
    pub normalized: String,
    pub components: EcliComponents,
}

#[derive(Debug, Clone, Default)]
pub struct EcliValidator;

impl EcliValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate an identifier, returning its normalized form and components.
    pub fn validate(&self, identifier: &str) -> Result<ValidatedEcli, EcliError> {
        if identifier.trim().is_empty() {
            return Err(EcliError("identifier must not be empty".into()));
        }

        let normalized = normalize(identifier);

        if !ECLI_PATTERN.is_match(&normalized) && !EU_ECLI_PATTERN.is_match(&normalized) {
            return Err(EcliError(format!("format does not match: {identifier}")));
        }

        let components = parse_components(&normalized)?;
        validate_country_code(&components.country_code)?;
        validate_court_code(&components.country_code, &components.court_code)?;
        validate_year(&components.year)?;
        validate_ordinal(&components.ordinal)?;

        tracing::debug!(ecli = %normalized, "ECLI validation successful");

        Ok(ValidatedEcli {
            normalized,
            components,
        })
    }

    /// Extract every valid identifier from free text, normalized and
    /// deduplicated. Invalid matches are dropped silently.
    pub fn extract_all(&self, text: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for candidate in SCAN_PATTERN.find_iter(text) {
            match self.validate(candidate.as_str()) {
                Ok(valid) => {
                    found.insert(valid.normalized);
                }
                Err(_) => {
                    tracing::debug!(candidate = candidate.as_str(), "invalid ECLI in content");
                }
            }
        }
        found
    }

    /// Whether the identifier names a German court decision.
    pub fn is_german(&self, identifier: &str) -> Result<bool, EcliError> {
        Ok(self.validate(identifier)?.components.is_german())
    }
}

fn normalize(identifier: &str) -> String {
    let upper = identifier.trim().to_uppercase();
    if upper.starts_with("ECLI:") || upper.starts_with("EU:") {
        upper
    } else {
        format!("ECLI:{upper}")
    }
}

fn parse_components(normalized: &str) -> Result<EcliComponents, EcliError> {
    let rest = normalized.strip_prefix("ECLI:").unwrap_or(normalized);
    let parts: Vec<&str> = rest.splitn(4, ':').collect();
    if parts.len() != 4 {
        return Err(EcliError(format!("component count {}", parts.len())));
    }
    Ok(EcliComponents {
        country_code: parts[0].to_string(),
        court_code: parts[1].to_string(),
        year: parts[2].to_string(),
        ordinal: parts[3].to_string(),
    })
}

fn validate_country_code(code: &str) -> Result<(), EcliError> {
    if VALID_COUNTRY_CODES.contains(&code) {
        Ok(())
    } else {
        Err(EcliError(format!("invalid country code: {code}")))
    }
}

fn validate_court_code(country: &str, court: &str) -> Result<(), EcliError> {
    if court.is_empty() || court.len() > 7 {
        return Err(EcliError(format!("court code must be 1-7 characters: {court}")));
    }
    if !court.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(EcliError(format!("court code must start with a letter: {court}")));
    }
    // Unknown German court codes are logged, never rejected; the portal
    // occasionally carries regional courts outside the common set.
    if country == "DE" && !GERMAN_COURT_CODES.contains(&court) {
        tracing::debug!(court, "unknown German court code");
    }
    Ok(())
}

fn validate_year(year: &str) -> Result<(), EcliError> {
    let value: i32 = year
        .parse()
        .map_err(|_| EcliError(format!("invalid year: {year}")))?;
    let current = Utc::now().year();
    if value < 1900 || value > current + 1 {
        return Err(EcliError(format!("year out of range: {value}")));
    }
    Ok(())
}

fn validate_ordinal(ordinal: &str) -> Result<(), EcliError> {
    if ordinal.is_empty() || ordinal.len() > 25 {
        return Err(EcliError(format!(
            "ordinal must be 1-25 characters: {ordinal}"
        )));
    }
    if !ordinal.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.') {
        return Err(EcliError(format!("ordinal contains invalid characters: {ordinal}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_german_identifier() {
        let validator = EcliValidator::new();
        let result = validator.validate("ECLI:DE:BGH:2024:123").unwrap();
        assert_eq!(result.normalized, "ECLI:DE:BGH:2024:123");
        assert_eq!(result.components.country_code, "DE");
        assert_eq!(result.components.court_code, "BGH");
        assert!(result.components.is_german());
    }

    #[test]
    fn normalizes_case_and_missing_prefix() {
        let validator = EcliValidator::new();
        let result = validator.validate("de:bag:2023:456").unwrap();
        assert_eq!(result.normalized, "ECLI:DE:BAG:2023:456");
    }

    #[test]
    fn accepts_eu_short_form() {
        let validator = EcliValidator::new();
        let result = validator.validate("EU:C:2005:446").unwrap();
        assert_eq!(result.normalized, "EU:C:2005:446");
        assert!(result.components.is_european_union());
    }

    #[test]
    fn validation_is_idempotent_under_normalization() {
        let validator = EcliValidator::new();
        let first = validator.validate("ecli:de:bverfg:2020:B.123").unwrap();
        let second = validator.validate(&first.normalized).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_bad_country_year_and_ordinal() {
        let validator = EcliValidator::new();
        assert!(validator.validate("ECLI:XX:BGH:2024:123").is_err());
        assert!(validator.validate("ECLI:DE:BGH:1850:123").is_err());
        assert!(validator.validate("ECLI:DE:BGH:3050:123").is_err());
        assert!(validator.validate("ECLI:DE:BGH:2024:").is_err());
        assert!(validator.validate("").is_err());
    }

    #[test]
    fn unknown_german_court_codes_are_tolerated() {
        let validator = EcliValidator::new();
        assert!(validator.validate("ECLI:DE:ARBGX:2022:9").is_ok());
    }

    #[test]
    fn extract_all_finds_only_valid_identifiers() {
        let validator = EcliValidator::new();
        let text = "Siehe ECLI:DE:BGH:2024:123 und ECLI:DE:BAG:2023:456, \
                    ferner EU:C:2005:446; dagegen INVALID:FORMAT.";
        let found = validator.extract_all(text);
        let expected: BTreeSet<String> = [
            "ECLI:DE:BGH:2024:123",
            "ECLI:DE:BAG:2023:456",
            "EU:C:2005:446",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn extract_all_is_closed_under_duplication() {
        let validator = EcliValidator::new();
        let once = validator.extract_all("ECLI:DE:BGH:2024:123");
        let twice = validator.extract_all("ECLI:DE:BGH:2024:123 ECLI:DE:BGH:2024:123");
        assert_eq!(once, twice);
    }

    #[test]
    fn is_german_distinguishes_countries() {
        let validator = EcliValidator::new();
        assert!(validator.is_german("ECLI:DE:BGH:2024:123").unwrap());
        assert!(!validator.is_german("ECLI:FR:CC:2024:123").unwrap());
    }
}
