//! Validators for ECLI identifiers and LegalDocML.de documents, plus the
//! pipeline that composes them with the sanitizer.

pub mod ecli;
pub mod legaldocml;
pub mod pipeline;

pub use ecli::{EcliComponents, EcliError, EcliValidator};
pub use legaldocml::{LegalDocMlReport, LegalDocMlValidator};
pub use pipeline::{QuickValidation, ValidationReport, ValidationService};
