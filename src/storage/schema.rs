//! Tantivy schema for the legal document index.
//!
//! Text fields run through a German analyzer (lowercase, German stop
//! words, light German stemming); identifier-like fields are indexed raw
//! for exact lookup. A unified `text_all` copy field backs default
//! queries across the document.

use tantivy::schema::{
    DateOptions, Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions,
    STORED, STRING,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer,
};
use tantivy::Index;

/// Name of the registered German analyzer.
pub const GERMAN_ANALYZER: &str = "de_text";

/// Names of all fields in the document schema.
pub struct FieldNames;

impl FieldNames {
    pub const DOCUMENT_ID: &'static str = "document_id";
    pub const COURT: &'static str = "court";
    pub const ECLI_IDENTIFIER: &'static str = "ecli_identifier";
    pub const SOURCE_URL: &'static str = "source_url";
    pub const TITLE: &'static str = "title";
    pub const SUMMARY: &'static str = "summary";
    pub const SUBJECT: &'static str = "subject";
    pub const NORMS: &'static str = "norms";
    pub const FULL_TEXT: &'static str = "full_text";
    pub const CASE_NUMBER: &'static str = "case_number";
    pub const DOCUMENT_TYPE: &'static str = "document_type";
    pub const DECISION_DATE: &'static str = "decision_date";
    pub const CRAWLED_AT: &'static str = "crawled_at";
    pub const INDEXED_AT: &'static str = "indexed_at";
    pub const STATUS: &'static str = "status";
    pub const FILE_PATH: &'static str = "file_path";
    pub const YEAR: &'static str = "year";
    pub const MONTH: &'static str = "month";
    pub const LEITSATZ: &'static str = "leitsatz";
    pub const TENOR: &'static str = "tenor";
    pub const GRUENDE: &'static str = "gruende";
    pub const TEXT_ALL: &'static str = "text_all";
}

/// Resolved field handles for document construction and reads.
#[derive(Debug, Clone)]
pub struct DocumentFields {
    pub document_id: Field,
    pub court: Field,
    pub ecli_identifier: Field,
    pub source_url: Field,
    pub title: Field,
    pub summary: Field,
    pub subject: Field,
    pub norms: Field,
    pub full_text: Field,
    pub case_number: Field,
    pub document_type: Field,
    pub decision_date: Field,
    pub crawled_at: Field,
    pub indexed_at: Field,
    pub status: Field,
    pub file_path: Field,
    pub year: Field,
    pub month: Field,
    pub leitsatz: Field,
    pub tenor: Field,
    pub gruende: Field,
    pub text_all: Field,
}

impl DocumentFields {
    /// Resolve handles from a schema built by [`build_schema`].
    pub fn from_schema(schema: &Schema) -> Self {
        let field = |name: &str| {
            schema
                .get_field(name)
                .unwrap_or_else(|_| panic!("schema missing field {name}"))
        };
        Self {
            document_id: field(FieldNames::DOCUMENT_ID),
            court: field(FieldNames::COURT),
            ecli_identifier: field(FieldNames::ECLI_IDENTIFIER),
            source_url: field(FieldNames::SOURCE_URL),
            title: field(FieldNames::TITLE),
            summary: field(FieldNames::SUMMARY),
            subject: field(FieldNames::SUBJECT),
            norms: field(FieldNames::NORMS),
            full_text: field(FieldNames::FULL_TEXT),
            case_number: field(FieldNames::CASE_NUMBER),
            document_type: field(FieldNames::DOCUMENT_TYPE),
            decision_date: field(FieldNames::DECISION_DATE),
            crawled_at: field(FieldNames::CRAWLED_AT),
            indexed_at: field(FieldNames::INDEXED_AT),
            status: field(FieldNames::STATUS),
            file_path: field(FieldNames::FILE_PATH),
            year: field(FieldNames::YEAR),
            month: field(FieldNames::MONTH),
            leitsatz: field(FieldNames::LEITSATZ),
            tenor: field(FieldNames::TENOR),
            gruende: field(FieldNames::GRUENDE),
            text_all: field(FieldNames::TEXT_ALL),
        }
    }
}

/// Build the document schema.
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    let de_indexing = TextFieldIndexing::default()
        .set_tokenizer(GERMAN_ANALYZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let de_stored = TextOptions::default()
        .set_indexing_options(de_indexing.clone())
        .set_stored();
    let de_indexed_only = TextOptions::default().set_indexing_options(de_indexing);

    // Exact-match identifier fields
    builder.add_text_field(FieldNames::DOCUMENT_ID, STRING | STORED);
    builder.add_text_field(FieldNames::COURT, STRING | STORED);
    builder.add_text_field(FieldNames::ECLI_IDENTIFIER, STRING | STORED);
    builder.add_text_field(FieldNames::SOURCE_URL, STRING | STORED);
    builder.add_text_field(FieldNames::STATUS, STRING | STORED);
    builder.add_text_field(FieldNames::CASE_NUMBER, STRING | STORED);
    builder.add_text_field(FieldNames::DOCUMENT_TYPE, STRING | STORED);
    builder.add_text_field(FieldNames::FILE_PATH, STORED);

    // German-analyzed text fields
    builder.add_text_field(FieldNames::TITLE, de_stored.clone());
    builder.add_text_field(FieldNames::SUMMARY, de_stored.clone());
    builder.add_text_field(FieldNames::SUBJECT, de_stored.clone());
    builder.add_text_field(FieldNames::NORMS, de_stored.clone());
    builder.add_text_field(FieldNames::FULL_TEXT, de_stored.clone());
    builder.add_text_field(FieldNames::LEITSATZ, de_stored.clone());
    builder.add_text_field(FieldNames::TENOR, de_stored.clone());
    builder.add_text_field(FieldNames::GRUENDE, de_stored);

    // Unified copy field backing default queries (indexed, not stored)
    builder.add_text_field(FieldNames::TEXT_ALL, de_indexed_only);

    // Dates
    let date_options = DateOptions::default().set_stored().set_indexed().set_fast();
    builder.add_date_field(FieldNames::DECISION_DATE, date_options.clone());
    builder.add_date_field(FieldNames::CRAWLED_AT, date_options.clone());
    builder.add_date_field(FieldNames::INDEXED_AT, date_options);

    // Facet-style numerics
    let numeric = NumericOptions::default().set_stored().set_indexed().set_fast();
    builder.add_u64_field(FieldNames::YEAR, numeric.clone());
    builder.add_u64_field(FieldNames::MONTH, numeric);

    builder.build()
}

/// Register the German analyzer on an index.
pub fn register_tokenizers(index: &Index) {
    let mut builder = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(64))
        .filter(LowerCaser)
        .dynamic();
    if let Some(stop_words) = StopWordFilter::new(Language::German) {
        builder = builder.filter_dynamic(stop_words);
    }
    let analyzer = builder.filter_dynamic(Stemmer::new(Language::German)).build();
    index.tokenizers().register(GERMAN_ANALYZER, analyzer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_expected_fields() {
        let schema = build_schema();
        for name in [
            FieldNames::DOCUMENT_ID,
            FieldNames::COURT,
            FieldNames::ECLI_IDENTIFIER,
            FieldNames::SOURCE_URL,
            FieldNames::TITLE,
            FieldNames::SUMMARY,
            FieldNames::FULL_TEXT,
            FieldNames::CASE_NUMBER,
            FieldNames::DOCUMENT_TYPE,
            FieldNames::DECISION_DATE,
            FieldNames::CRAWLED_AT,
            FieldNames::INDEXED_AT,
            FieldNames::STATUS,
            FieldNames::FILE_PATH,
            FieldNames::YEAR,
            FieldNames::MONTH,
            FieldNames::LEITSATZ,
            FieldNames::TENOR,
            FieldNames::GRUENDE,
            FieldNames::TEXT_ALL,
        ] {
            assert!(schema.get_field(name).is_ok(), "missing field {name}");
        }
    }

    #[test]
    fn fields_resolve_distinctly() {
        let schema = build_schema();
        let fields = DocumentFields::from_schema(&schema);
        assert_ne!(fields.title, fields.summary);
        assert_ne!(fields.decision_date, fields.crawled_at);
    }
}
