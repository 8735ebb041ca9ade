use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TaxonomyError {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to read {path}: {message}")]
    InputRead { path: String, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cannot reach query endpoint: {0}")]
    #[diagnostic(help("start the triple store (e.g. `./fuseki-server`) and retry the operation"))]
    Connectivity(String),

    #[error("query request failed: {0}")]
    QueryHttp(String),

    #[error("query endpoint returned status {status}: {message}")]
    QueryStatus { status: u16, message: String },

    #[error("malformed query response: {0}")]
    QueryResponse(String),

    #[error("dataset administration request failed: {0}")]
    AdminHttp(String),

    #[error("dataset administration returned status {status}: {message}")]
    AdminStatus { status: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("batch commit failed: {0}")]
    StorageWrite(String),

    #[error("triple store error: {0}")]
    Storage(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid taxon reference: {0}")]
    InvalidTaxon(String),

    #[error("invalid rank: {0}")]
    InvalidRank(String),

    #[error("IRI cannot be used in a query: {0}")]
    InvalidIri(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl TaxonomyError {
    /// True for failures raised by a single query round trip.
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            TaxonomyError::QueryHttp(_)
                | TaxonomyError::QueryStatus { .. }
                | TaxonomyError::QueryResponse(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TaxonomyError::QueryStatus { status, .. } | TaxonomyError::AdminStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TaxonomyError {
    fn from(err: rusqlite::Error) -> Self {
        TaxonomyError::Storage(err.to_string())
    }
}
