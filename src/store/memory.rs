//! In-memory [`DocumentStore`] implementation for tests and dry runs.
//!
//! Documents live in a `Vec` in insertion order, which plays the part of
//! SQLite's rowid order. Filters are evaluated with [`Query::matches`], so
//! both backends agree on comparison semantics.
//!
//! A [`MemoryUnitOfWork`] takes the write lock for its whole lifetime and
//! works on a copy of the documents; commit swaps the copy in.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};

use crate::doctypes::DoctypeRegistry;
use crate::error::{Error, Result};
use crate::models::Document;
use crate::query::{Query, DOCUMENT_TABLE};

use super::{DocumentStore, Transactional, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Documents {
    rows: Vec<Document>,
}

impl Documents {
    fn select(&self, query: &Query) -> Vec<Document> {
        if query.table() != DOCUMENT_TABLE {
            return Vec::new();
        }
        let matched = self
            .rows
            .iter()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        query.paginate(matched)
    }

    fn count(&self, query: &Query) -> u64 {
        if query.table() != DOCUMENT_TABLE {
            return 0;
        }
        self.rows.iter().filter(|d| query.matches(d)).count() as u64
    }

    fn save(&mut self, doctype: &str, key: &str, data: Map<String, Value>) -> Result<Document> {
        match self
            .rows
            .iter_mut()
            .find(|d| d.doctype == doctype && d.key == key)
        {
            Some(existing) => existing.data = data,
            None => self.rows.push(Document {
                id: Some(uuid::Uuid::new_v4().to_string()),
                doctype: doctype.to_string(),
                key: key.to_string(),
                data,
            }),
        }
        self.rows
            .iter()
            .find(|d| d.doctype == doctype && d.key == key)
            .cloned()
            .ok_or_else(|| Error::StoreInvariant {
                doctype: doctype.to_string(),
                key: key.to_string(),
            })
    }

    fn delete(&mut self, query: &Query) -> u64 {
        if query.table() != DOCUMENT_TABLE {
            return 0;
        }
        let before = self.rows.len();
        self.rows.retain(|d| !query.matches(d));
        (before - self.rows.len()) as u64
    }
}

/// In-memory store.
pub struct MemoryStore {
    docs: Arc<RwLock<Documents>>,
    registry: Arc<DoctypeRegistry>,
}

impl MemoryStore {
    pub fn new(registry: Arc<DoctypeRegistry>) -> Self {
        Self {
            docs: Arc::new(RwLock::new(Documents::default())),
            registry,
        }
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(DoctypeRegistry::course_doctypes()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn registry(&self) -> &DoctypeRegistry {
        &self.registry
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.docs.read().await.select(query))
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        Ok(self.docs.read().await.count(query))
    }

    async fn save(&self, doctype: &str, key: &str, data: Map<String, Value>) -> Result<Document> {
        self.docs.write().await.save(doctype, key, data)
    }

    async fn delete(&self, query: &Query) -> Result<u64> {
        Ok(self.docs.write().await.delete(query))
    }
}

#[async_trait]
impl Transactional for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.docs.clone().write_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working: Mutex::new(working),
            registry: self.registry.clone(),
        }))
    }
}

/// Exclusive write session over a [`MemoryStore`].
pub struct MemoryUnitOfWork {
    guard: OwnedRwLockWriteGuard<Documents>,
    working: Mutex<Documents>,
    registry: Arc<DoctypeRegistry>,
}

#[async_trait]
impl DocumentStore for MemoryUnitOfWork {
    fn registry(&self) -> &DoctypeRegistry {
        &self.registry
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.working.lock().await.select(query))
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        Ok(self.working.lock().await.count(query))
    }

    async fn save(&self, doctype: &str, key: &str, data: Map<String, Value>) -> Result<Document> {
        self.working.lock().await.save(doctype, key, data)
    }

    async fn delete(&self, query: &Query) -> Result<u64> {
        Ok(self.working.lock().await.delete(query))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working.into_inner();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_save_keeps_id_and_replaces_data() {
        let store = MemoryStore::default();
        let first = store
            .save("number", "one", fields(json!({"n": 1, "word": "one"})))
            .await
            .unwrap();
        let second = store
            .save("number", "one", fields(json!({"n": 1})))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.field("word").is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unit_of_work_isolated_until_commit() {
        let store = MemoryStore::default();
        store.save("number", "one", Map::new()).await.unwrap();

        let uow = store.begin().await.unwrap();
        uow.save("number", "two", Map::new()).await.unwrap();
        uow.delete(&Query::for_doctype("number").with_key("one"))
            .await
            .unwrap();
        assert_eq!(uow.count(&Query::for_doctype("number")).await.unwrap(), 1);
        uow.rollback().await.unwrap();

        let keys: Vec<_> = store
            .query(&Query::for_doctype("number"))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(keys, ["one"]);

        let uow = store.begin().await.unwrap();
        uow.save("number", "two", Map::new()).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.count(&Query::for_doctype("number")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_discards_writes() {
        let store = MemoryStore::default();
        {
            let uow = store.begin().await.unwrap();
            uow.save("number", "one", Map::new()).await.unwrap();
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_other_tables_are_empty() {
        let store = MemoryStore::default();
        store.save("number", "one", Map::new()).await.unwrap();
        let other = Query::on("archive").unwrap();
        assert!(store.query(&other).await.unwrap().is_empty());
        assert_eq!(store.delete(&other).await.unwrap(), 0);
    }
}
