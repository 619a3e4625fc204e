//! Crawler for the German court-decision portal.
//!
//! Discovers daily ECLI sitemaps, downloads decision documents, validates
//! them against the LegalDocML.de profile, extracts metadata, and ingests
//! the results into an archive tree and a full-text search index.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod models;
pub mod storage;
pub mod validator;
pub mod xml;
