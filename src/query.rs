//! Predicate query builder for the schemaless `document` table.
//!
//! A [`Query`] is an immutable list of ANDed constraints. Every builder
//! method takes `&self` and returns a new query, so one base query can be
//! reused to derive a count, a page, and a delete without repeating its
//! constraints:
//!
//! ```rust
//! use syllabus::query::Query;
//!
//! let odd = Query::for_doctype("number").filter("parity", "odd")?;
//! let (count_sql, _) = odd.to_count_sql();
//! let (page_sql, params) = odd.limit(10).offset(20).to_select_sql();
//! assert!(count_sql.starts_with("SELECT COUNT(*)"));
//! assert_eq!(params.len(), 4);
//! # Ok::<(), syllabus::error::Error>(())
//! ```
//!
//! # Field mapping
//!
//! | Field name | SQL expression |
//! |------------|----------------|
//! | `key` | `key` column |
//! | `doctype` | `doctype` column |
//! | anything else | `data ->> '$."<name>"'` |
//!
//! Field names must match `^\w+$`; anything else is rejected with
//! [`Error::InvalidField`] before SQL is rendered. Values are always bound
//! as parameters.
//!
//! | Value | Predicate |
//! |-------|-----------|
//! | JSON array | `IN (?, ?, ...)`, one placeholder per element, caller order |
//! | empty array | constant false |
//! | `null` | `IS NULL` |
//! | anything else | `= ?` |

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::Document;

/// Default table of the schemaless store.
pub const DOCUMENT_TABLE: &str = "document";

fn field_pattern() -> &'static Regex {
    static FIELD: OnceLock<Regex> = OnceLock::new();
    FIELD.get_or_init(|| Regex::new(r"^\w+$").expect("field pattern is valid"))
}

/// A parameter as SQLite sees it after binding.
///
/// Booleans bind as integers and nested arrays/objects bind as their JSON
/// text, matching what `->>` extracts from the `data` column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl SqlValue {
    /// SQLite `=` semantics without type affinity: NULL never matches,
    /// numbers compare numerically, text compares to text only.
    fn sql_eq(&self, other: &SqlValue) -> bool {
        match (self, other) {
            (SqlValue::Integer(a), SqlValue::Integer(b)) => a == b,
            (SqlValue::Integer(a), SqlValue::Real(b)) | (SqlValue::Real(b), SqlValue::Integer(a)) => {
                (*a as f64) == *b
            }
            (SqlValue::Real(a), SqlValue::Real(b)) => a == b,
            (SqlValue::Text(a), SqlValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    Key,
    Doctype,
    Field(String),
}

impl Column {
    fn parse(name: &str) -> Result<Self> {
        if !field_pattern().is_match(name) {
            return Err(Error::InvalidField(name.to_string()));
        }
        Ok(match name {
            "key" => Column::Key,
            "doctype" => Column::Doctype,
            other => Column::Field(other.to_string()),
        })
    }

    fn expr(&self) -> String {
        match self {
            Column::Key => "key".to_string(),
            Column::Doctype => "doctype".to_string(),
            Column::Field(name) => format!("data ->> '$.\"{}\"'", name),
        }
    }

    fn extract(&self, doc: &Document) -> SqlValue {
        match self {
            Column::Key => SqlValue::Text(doc.key.clone()),
            Column::Doctype => SqlValue::Text(doc.doctype.clone()),
            Column::Field(name) => doc
                .data
                .get(name)
                .map(SqlValue::from)
                .unwrap_or(SqlValue::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq(SqlValue),
    In(Vec<SqlValue>),
    IsNull,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    column: Column,
    predicate: Predicate,
}

impl Clause {
    fn render(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        let expr = self.column.expr();
        match &self.predicate {
            Predicate::Eq(v) => {
                sql.push_str(&format!("{} = ?", expr));
                params.push(v.clone());
            }
            Predicate::In(values) if values.is_empty() => sql.push_str("1 = 0"),
            Predicate::In(values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{} IN ({})", expr, placeholders));
                params.extend(values.iter().cloned());
            }
            Predicate::IsNull => sql.push_str(&format!("{} IS NULL", expr)),
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        let actual = self.column.extract(doc);
        match &self.predicate {
            Predicate::Eq(v) => actual.sql_eq(v),
            Predicate::In(values) => values.iter().any(|v| actual.sql_eq(v)),
            Predicate::IsNull => actual == SqlValue::Null,
        }
    }
}

/// Immutable, parameterized query over a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    clauses: Vec<Clause>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    /// An unconstrained query over the `document` table.
    pub fn new() -> Self {
        Self {
            table: DOCUMENT_TABLE.to_string(),
            clauses: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// An unconstrained query over another table. The name is validated
    /// like a field name.
    pub fn on(table: &str) -> Result<Self> {
        if !field_pattern().is_match(table) {
            return Err(Error::InvalidField(table.to_string()));
        }
        Ok(Self {
            table: table.to_string(),
            ..Self::new()
        })
    }

    pub fn for_doctype(doctype: &str) -> Self {
        Self::new().push(Column::Doctype, Predicate::Eq(SqlValue::Text(doctype.to_string())))
    }

    /// Keyword-style constructor: `doctype` plus `(field, value)` pairs.
    pub fn build<V>(doctype: &str, constraints: &[(&str, V)]) -> Result<Self>
    where
        V: Clone + Into<Value>,
    {
        constraints
            .iter()
            .try_fold(Self::for_doctype(doctype), |q, (name, value)| {
                q.filter(name, value.clone())
            })
    }

    /// Adds a constraint. Arrays become set membership.
    pub fn filter(&self, name: &str, value: impl Into<Value>) -> Result<Self> {
        let column = Column::parse(name)?;
        let predicate = match value.into() {
            Value::Null => Predicate::IsNull,
            Value::Array(items) => Predicate::In(items.iter().map(SqlValue::from).collect()),
            other => Predicate::Eq(SqlValue::from(&other)),
        };
        Ok(self.push(column, predicate))
    }

    pub fn with_key(&self, key: &str) -> Self {
        self.push(Column::Key, Predicate::Eq(SqlValue::Text(key.to_string())))
    }

    pub fn with_keys<S: AsRef<str>>(&self, keys: &[S]) -> Self {
        let values = keys
            .iter()
            .map(|k| SqlValue::Text(k.as_ref().to_string()))
            .collect();
        self.push(Column::Key, Predicate::In(values))
    }

    pub fn limit(&self, limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    pub fn offset(&self, offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..self.clone()
        }
    }

    fn push(&self, column: Column, predicate: Predicate) -> Self {
        let mut next = self.clone();
        next.clauses.push(Clause { column, predicate });
        next
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// The doctype this query is pinned to by an equality constraint.
    pub fn doctype(&self) -> Option<&str> {
        self.clauses.iter().find_map(|c| match (&c.column, &c.predicate) {
            (Column::Doctype, Predicate::Eq(SqlValue::Text(d))) => Some(d.as_str()),
            _ => None,
        })
    }

    /// Keys named by a `key` equality or membership constraint.
    pub fn keys(&self) -> Option<Vec<&str>> {
        self.clauses.iter().find_map(|c| {
            let values: Vec<&SqlValue> = match (&c.column, &c.predicate) {
                (Column::Key, Predicate::Eq(v)) => vec![v],
                (Column::Key, Predicate::In(values)) => values.iter().collect(),
                _ => return None,
            };
            Some(
                values
                    .into_iter()
                    .filter_map(|v| match v {
                        SqlValue::Text(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect(),
            )
        })
    }

    fn where_clause(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        for (i, clause) in self.clauses.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            clause.render(sql, params);
        }
    }

    /// `SELECT id, doctype, key, data ...` in storage order.
    pub fn to_select_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = format!("SELECT id, doctype, key, data FROM {}", self.table);
        let mut params = Vec::new();
        self.where_clause(&mut sql, &mut params);
        sql.push_str(" ORDER BY rowid");

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(SqlValue::Integer(clamp(limit)));
                params.push(SqlValue::Integer(clamp(offset)));
            }
            (Some(limit), None) => {
                sql.push_str(" LIMIT ?");
                params.push(SqlValue::Integer(clamp(limit)));
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(SqlValue::Integer(clamp(offset)));
            }
            (None, None) => {}
        }

        (sql, params)
    }

    /// Row count, ignoring limit and offset.
    pub fn to_count_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let mut params = Vec::new();
        self.where_clause(&mut sql, &mut params);
        (sql, params)
    }

    /// Deletes every matching row, ignoring limit and offset.
    pub fn to_delete_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut params = Vec::new();
        self.where_clause(&mut sql, &mut params);
        (sql, params)
    }

    /// Evaluates the constraints against an in-memory document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }

    /// Applies offset and limit to already-filtered rows.
    pub fn paginate<T>(&self, rows: Vec<T>) -> Vec<T> {
        let offset = self.offset.map(clamp_usize).unwrap_or(0);
        let limit = self.limit.map(clamp_usize).unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }

    pub(crate) fn cache_key(&self) -> String {
        let (sql, params) = self.to_select_sql();
        format!("{}|{:?}", sql, params)
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn clamp_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, data: Value) -> Document {
        Document {
            id: Some(format!("id-{}", key)),
            doctype: "number".to_string(),
            key: key.to_string(),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_rejects_non_word_field_names() {
        for bad in ["", "a-b", "a.b", "name'", "x y", "$.x", "a;DROP"] {
            let err = Query::new().filter(bad, 1).unwrap_err();
            assert!(matches!(err, Error::InvalidField(ref f) if f == bad), "{}", bad);
        }
        assert!(Query::new().filter("multiple_of_3", true).is_ok());
        assert!(Query::on("document; --").is_err());
    }

    #[test]
    fn test_reserved_fields_map_to_columns() {
        let q = Query::for_doctype("lesson").filter("key", "a/b").unwrap();
        let (sql, params) = q.to_select_sql();
        assert_eq!(
            sql,
            "SELECT id, doctype, key, data FROM document WHERE doctype = ? AND key = ? ORDER BY rowid"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("lesson".to_string()),
                SqlValue::Text("a/b".to_string())
            ]
        );
    }

    #[test]
    fn test_dynamic_fields_use_json_extraction() {
        let q = Query::for_doctype("number").filter("parity", "odd").unwrap();
        let (sql, _) = q.to_select_sql();
        assert!(sql.contains("data ->> '$.\"parity\"' = ?"));
    }

    #[test]
    fn test_list_value_becomes_in_with_caller_order() {
        let q = Query::new().filter("key", json!(["two", "one", "three"])).unwrap();
        let (sql, params) = q.to_select_sql();
        assert!(sql.contains("key IN (?, ?, ?)"));
        let keys: Vec<_> = params
            .iter()
            .map(|p| match p {
                SqlValue::Text(s) => s.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(keys, ["two", "one", "three"]);
    }

    #[test]
    fn test_empty_list_is_false_and_null_is_is_null() {
        let (sql, params) = Query::new().filter("tag", json!([])).unwrap().to_select_sql();
        assert!(sql.contains("WHERE 1 = 0"));
        assert!(params.is_empty());

        let (sql, params) = Query::new().filter("photo", Value::Null).unwrap().to_select_sql();
        assert!(sql.contains("data ->> '$.\"photo\"' IS NULL"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_builder_is_reusable() {
        let base = Query::for_doctype("number");
        let odd = base.filter("parity", "odd").unwrap();
        let page = odd.limit(2).offset(4);

        assert_eq!(base.to_select_sql().1.len(), 1);
        assert_eq!(odd.to_select_sql().1.len(), 2);

        let (count_sql, count_params) = page.to_count_sql();
        assert!(!count_sql.contains("LIMIT"));
        assert_eq!(count_params.len(), 2);

        let (page_sql, page_params) = page.to_select_sql();
        assert!(page_sql.ends_with("ORDER BY rowid LIMIT ? OFFSET ?"));
        assert_eq!(page_params[2..], [SqlValue::Integer(2), SqlValue::Integer(4)]);
    }

    #[test]
    fn test_offset_without_limit() {
        let (sql, params) = Query::new().offset(3).to_select_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET ?"));
        assert_eq!(params, vec![SqlValue::Integer(3)]);
    }

    #[test]
    fn test_build_from_pairs() {
        let q = Query::build("lesson", &[("course", "alpha"), ("module", "uno-module")]).unwrap();
        assert_eq!(q.doctype(), Some("lesson"));
        assert_eq!(q.to_select_sql().1.len(), 3);
        assert!(Query::build("lesson", &[("bad name", "x")]).is_err());
    }

    #[test]
    fn test_keys_reports_membership() {
        assert_eq!(Query::new().keys(), None);
        assert_eq!(Query::new().with_key("a").keys(), Some(vec!["a"]));
        assert_eq!(
            Query::for_doctype("n").with_keys(&["b", "a"]).keys(),
            Some(vec!["b", "a"])
        );
    }

    #[test]
    fn test_matches_follows_sqlite_comparisons() {
        let d = doc("3", json!({"n": 3, "parity": "odd", "multiple_of_3": true, "tags": ["a"]}));

        assert!(Query::for_doctype("number").matches(&d));
        assert!(!Query::for_doctype("lesson").matches(&d));
        assert!(Query::new().filter("n", 3).unwrap().matches(&d));
        assert!(Query::new().filter("n", 3.0).unwrap().matches(&d));
        assert!(!Query::new().filter("n", "3").unwrap().matches(&d));
        assert!(Query::new().filter("multiple_of_3", true).unwrap().matches(&d));
        assert!(Query::new().filter("multiple_of_3", 1).unwrap().matches(&d));
        assert!(Query::new().filter("missing", Value::Null).unwrap().matches(&d));
        assert!(!Query::new().filter("parity", Value::Null).unwrap().matches(&d));
        assert!(Query::new().filter("key", json!(["1", "3"])).unwrap().matches(&d));
        assert!(!Query::new().filter("key", json!([])).unwrap().matches(&d));
        assert!(Query::new().filter("tags", json!([["a"]])).unwrap().matches(&d));
    }

    #[test]
    fn test_paginate() {
        let rows: Vec<u32> = (0..10).collect();
        assert_eq!(Query::new().limit(3).paginate(rows.clone()), vec![0, 1, 2]);
        assert_eq!(Query::new().offset(8).paginate(rows.clone()), vec![8, 9]);
        assert_eq!(Query::new().limit(2).offset(5).paginate(rows), vec![5, 6]);
    }
}
