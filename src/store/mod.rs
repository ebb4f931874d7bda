//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the contract every backend implements:
//! documents of any shape, addressed by `(doctype, key)`, queried through
//! [`Query`]. Two backends ship with the crate:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | SQLite, single `document` table with JSON `data` | [`sqlite`] | the CLI and anything persistent |
//! | in-process `Vec` behind a lock | [`memory`] | tests, dry runs |
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`query`](DocumentStore::query) | all matches, storage order, optional limit/offset |
//! | [`count`](DocumentStore::count) | number of matches |
//! | [`get`](DocumentStore::get) | exact `(doctype, key)` lookup, `None` when absent |
//! | [`get_many`](DocumentStore::get_many) | several keys, returned in request order |
//! | [`find`](DocumentStore::find) | first match |
//! | [`save`](DocumentStore::save) | upsert with full replacement of `data` |
//! | [`delete`](DocumentStore::delete) | remove all matches |
//! | [`load`](DocumentStore::load) | query and decode through the registry |
//!
//! Multi-step writes go through [`Transactional::begin`], which returns a
//! [`UnitOfWork`]: itself a `DocumentStore`, whose writes become visible on
//! [`commit`](UnitOfWork::commit) and are discarded on
//! [`rollback`](UnitOfWork::rollback) or drop.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::doctypes::{DoctypeRegistry, Record};
use crate::error::{Error, Result};
use crate::models::Document;
use crate::query::Query;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Registry used by [`load`](DocumentStore::load).
    fn registry(&self) -> &DoctypeRegistry;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    async fn count(&self, query: &Query) -> Result<u64>;

    /// Inserts `(doctype, key)` or replaces its `data` wholesale.
    ///
    /// Returns the document as read back from the store; if it cannot be
    /// read back the store is broken and [`Error::StoreInvariant`] is
    /// returned.
    async fn save(&self, doctype: &str, key: &str, data: Map<String, Value>) -> Result<Document>;

    /// Deletes every document matching `query`, returning how many.
    async fn delete(&self, query: &Query) -> Result<u64>;

    async fn get(&self, doctype: &str, key: &str) -> Result<Option<Document>> {
        let query = Query::for_doctype(doctype).with_key(key).limit(1);
        Ok(self.query(&query).await?.into_iter().next())
    }

    /// Fetches `keys` in the order given.
    ///
    /// Fails with [`Error::NotFound`] listing every missing key if any is
    /// absent; callers that tolerate gaps should use
    /// [`query`](DocumentStore::query) with [`Query::with_keys`].
    async fn get_many(&self, doctype: &str, keys: &[&str]) -> Result<Vec<Document>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.query(&Query::for_doctype(doctype).with_keys(keys)).await?;
        order_by_keys(doctype, keys, docs)
    }

    /// First match in storage order. Which document wins among several
    /// matches is not part of the contract.
    async fn find(&self, query: &Query) -> Result<Option<Document>> {
        Ok(self.query(&query.limit(1)).await?.into_iter().next())
    }

    async fn load(&self, query: &Query) -> Result<Vec<Record>> {
        let docs = self.query(query).await?;
        docs.into_iter()
            .map(|doc| self.registry().decode(doc))
            .collect()
    }
}

/// A set of writes applied atomically.
#[async_trait]
pub trait UnitOfWork: DocumentStore {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Transactional: DocumentStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

fn order_by_keys(doctype: &str, keys: &[&str], docs: Vec<Document>) -> Result<Vec<Document>> {
    let by_key: HashMap<String, Document> =
        docs.into_iter().map(|d| (d.key.clone(), d)).collect();

    let mut missing: Vec<String> = Vec::new();
    for key in keys {
        if !by_key.contains_key(*key) && !missing.iter().any(|m| m == key) {
            missing.push(key.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(Error::NotFound {
            doctype: doctype.to_string(),
            keys: missing,
        });
    }

    Ok(keys.iter().map(|k| by_key[*k].clone()).collect())
}
