//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Every document lives in one row of the `document` table; `data` is the
//! JSON text of its fields and dynamic filters go through SQLite's `->>`
//! extraction. Statements are rendered by [`Query`] and executed on a
//! connection borrowed from the pool for the duration of one call, or on
//! the open transaction of a [`SqliteUnitOfWork`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::cache::QueryCache;
use crate::config::Config;
use crate::db;
use crate::doctypes::DoctypeRegistry;
use crate::error::{Error, Result};
use crate::models::Document;
use crate::query::{Query, SqlValue};

use super::{DocumentStore, Transactional, UnitOfWork};

type SharedCache = Arc<Mutex<QueryCache>>;

/// SQLite implementation of [`DocumentStore`] and [`Transactional`].
pub struct SqliteStore {
    pool: SqlitePool,
    registry: Arc<DoctypeRegistry>,
    cache: Option<SharedCache>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, registry: Arc<DoctypeRegistry>) -> Self {
        Self {
            pool,
            registry,
            cache: None,
        }
    }

    /// Connects using `config.db` and enables the read cache when
    /// `config.cache.capacity` is non-zero. Migrations are not run.
    pub async fn open(config: &Config, registry: Arc<DoctypeRegistry>) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store = Self::new(pool, registry);
        Ok(if config.cache.capacity > 0 {
            store.with_cache(QueryCache::new(
                config.cache.capacity,
                Duration::from_secs(config.cache.ttl_secs),
            ))
        } else {
            store
        })
    }

    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(Arc::new(Mutex::new(cache)));
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Cached rows for `query`, plus the cache generation that fresh rows
    /// must be stored under.
    fn cached(&self, query: &Query) -> (Option<Vec<Document>>, u64) {
        match &self.cache {
            Some(cache) => {
                let mut cache = lock(cache);
                (cache.get(query), cache.generation())
            }
            None => (None, 0),
        }
    }

    fn remember(&self, generation: u64, query: &Query, docs: &[Document]) {
        if let Some(cache) = &self.cache {
            if !lock(cache).put_at(generation, query, docs.to_vec()) {
                tracing::debug!(doctype = ?query.doctype(), "skipped caching rows made stale by a write");
            }
        }
    }

    fn invalidate(&self, doctype: Option<&str>) {
        if let Some(cache) = &self.cache {
            let mut cache = lock(cache);
            match doctype {
                Some(doctype) => cache.invalidate(doctype),
                None => cache.clear(),
            }
        }
    }
}

fn lock(cache: &SharedCache) -> MutexGuard<'_, QueryCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn registry(&self) -> &DoctypeRegistry {
        &self.registry
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let (hit, generation) = self.cached(query);
        if let Some(hit) = hit {
            return Ok(hit);
        }
        let mut conn = self.pool.acquire().await?;
        let docs = select(&mut conn, query).await?;
        self.remember(generation, query, &docs);
        Ok(docs)
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        count(&mut conn, query).await
    }

    async fn save(&self, doctype: &str, key: &str, data: Map<String, Value>) -> Result<Document> {
        let mut conn = self.pool.acquire().await?;
        let doc = save(&mut conn, doctype, key, &data).await?;
        self.invalidate(Some(doctype));
        Ok(doc)
    }

    async fn delete(&self, query: &Query) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let deleted = delete(&mut conn, query).await?;
        self.invalidate(query.doctype());
        Ok(deleted)
    }
}

#[async_trait]
impl Transactional for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteUnitOfWork {
            tx: tokio::sync::Mutex::new(tx),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            touched: Mutex::new(Touched::default()),
        }))
    }
}

#[derive(Default)]
struct Touched {
    doctypes: HashSet<String>,
    everything: bool,
}

/// An open SQLite transaction.
///
/// Reads see the transaction's own writes and bypass the cache. The cache
/// is invalidated for every doctype written once the commit succeeds.
/// Dropping without committing rolls back.
pub struct SqliteUnitOfWork {
    tx: tokio::sync::Mutex<Transaction<'static, Sqlite>>,
    registry: Arc<DoctypeRegistry>,
    cache: Option<SharedCache>,
    touched: Mutex<Touched>,
}

impl SqliteUnitOfWork {
    fn touch(&self, doctype: Option<&str>) {
        let mut touched = self
            .touched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match doctype {
            Some(doctype) => {
                touched.doctypes.insert(doctype.to_string());
            }
            None => touched.everything = true,
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteUnitOfWork {
    fn registry(&self) -> &DoctypeRegistry {
        &self.registry
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut tx = self.tx.lock().await;
        select(&mut tx, query).await
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let mut tx = self.tx.lock().await;
        count(&mut tx, query).await
    }

    async fn save(&self, doctype: &str, key: &str, data: Map<String, Value>) -> Result<Document> {
        let doc = {
            let mut tx = self.tx.lock().await;
            save(&mut tx, doctype, key, &data).await?
        };
        self.touch(Some(doctype));
        Ok(doc)
    }

    async fn delete(&self, query: &Query) -> Result<u64> {
        let deleted = {
            let mut tx = self.tx.lock().await;
            delete(&mut tx, query).await?
        };
        self.touch(query.doctype());
        Ok(deleted)
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteUnitOfWork {
            tx, cache, touched, ..
        } = *self;
        tx.into_inner().commit().await?;

        let touched = touched
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cache) = cache {
            let mut cache = lock(&cache);
            if touched.everything {
                cache.clear();
            } else {
                for doctype in &touched.doctypes {
                    cache.invalidate(doctype);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.into_inner().rollback().await?;
        Ok(())
    }
}

// ─── Statements ─────────────────────────────────────────────────────

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &'q [SqlValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Real(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let doctype: String = row.get("doctype");
    let key: String = row.get("key");
    let raw: String = row.get("data");
    let data: Map<String, Value> =
        serde_json::from_str(&raw).map_err(|source| Error::Decode {
            doctype: doctype.clone(),
            key: key.clone(),
            source,
        })?;
    Ok(Document {
        id: Some(row.get("id")),
        doctype,
        key,
        data,
    })
}

async fn select(conn: &mut SqliteConnection, query: &Query) -> Result<Vec<Document>> {
    let (sql, params) = query.to_select_sql();
    tracing::debug!(%sql, ?params, "select");
    let rows = bind_all(sqlx::query(&sql), &params)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(row_to_document).collect()
}

async fn count(conn: &mut SqliteConnection, query: &Query) -> Result<u64> {
    let (sql, params) = query.to_count_sql();
    tracing::debug!(%sql, ?params, "count");
    let row = bind_all(sqlx::query(&sql), &params)
        .fetch_one(&mut *conn)
        .await?;
    let n: i64 = row.get(0);
    Ok(n.max(0) as u64)
}

async fn delete(conn: &mut SqliteConnection, query: &Query) -> Result<u64> {
    let (sql, params) = query.to_delete_sql();
    tracing::debug!(%sql, ?params, "delete");
    let result = bind_all(sqlx::query(&sql), &params)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn save(
    conn: &mut SqliteConnection,
    doctype: &str,
    key: &str,
    data: &Map<String, Value>,
) -> Result<Document> {
    let json = serde_json::to_string(data)?;
    let id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(doctype, key, "upsert");

    sqlx::query(
        r#"
        INSERT INTO document (id, doctype, key, data)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(doctype, key) DO UPDATE SET
            data = excluded.data
        "#,
    )
    .bind(&id)
    .bind(doctype)
    .bind(key)
    .bind(&json)
    .execute(&mut *conn)
    .await?;

    let readback = Query::for_doctype(doctype).with_key(key).limit(1);
    select(conn, &readback)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::StoreInvariant {
            doctype: doctype.to_string(),
            key: key.to_string(),
        })
}
