//! Error taxonomy for the document store and the ingestion pipeline.
//!
//! | Variant | Raised by | Recoverable |
//! |---------|-----------|-------------|
//! | [`Error::Validation`] | [`parser`](crate::parser) | fix the course files and reload |
//! | [`Error::InvalidField`] | [`query`](crate::query) | no, programming/config error |
//! | [`Error::NotFound`] | [`DocumentStore::get_many`](crate::store::DocumentStore::get_many) | caller decides |
//! | [`Error::StoreInvariant`] | [`DocumentStore::save`](crate::store::DocumentStore::save) | no, never retried |
//!
//! Single-document lookups (`get`, `find`) report absence as `Ok(None)`,
//! not as an error.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed course or author definition, or a referenced file is missing.
    #[error("invalid course content in {}: {message}", path.display())]
    Validation { path: PathBuf, message: String },

    /// Field names must match `^\w+$`.
    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    #[error("{doctype} not found: {}", keys.join(", "))]
    NotFound { doctype: String, keys: Vec<String> },

    /// A saved document could not be read back.
    #[error("store invariant violated: {doctype}/{key} was saved but cannot be read back")]
    StoreInvariant { doctype: String, key: String },

    #[error("document {doctype}/{key} does not match its doctype: {source}")]
    Decode {
        doctype: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// JSON field extraction (`->>`) needs SQLite 3.38 or newer.
    #[error("SQLite {0} is too old, 3.38.0 or newer is required")]
    UnsupportedSqlite(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Watch(#[from] notify::Error),
}

impl Error {
    pub(crate) fn validation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Validation {
            path: path.into(),
            message: message.into(),
        }
    }
}
