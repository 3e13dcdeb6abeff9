//! Document storage behind the managed-database backend.
//!
//! Collections of JSON documents addressed by id, with the few query shapes
//! the backend needs: equality filters, one sort field and a limit.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::RemoteResult;

pub mod memory;

pub use memory::MemoryDocumentStore;

/// A document together with its id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

impl StoredDocument {
    /// The document's fields with its id folded in, as the wire types expect
    pub fn with_id(self) -> Value {
        let mut data = self.data;
        if let Value::Object(fields) = &mut data {
            fields
                .entry("id".to_string())
                .or_insert_with(|| Value::String(self.id.clone()));
        }
        data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| data.get(field) == Some(expected))
    }

    /// Sorts and truncates matching documents in place
    pub fn arrange(&self, documents: &mut Vec<StoredDocument>) {
        if let Some((field, direction)) = &self.order_by {
            documents.sort_by(|a, b| {
                let ordering = compare_values(a.data.get(field), b.data.get(field));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            documents.truncate(limit);
        }
    }
}

/// Orders numbers numerically and strings lexically; missing fields sort first
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>>;

    /// Creates or overwrites the document
    async fn set(&self, collection: &str, id: &str, data: Value) -> RemoteResult<()>;

    /// Merges top-level fields into an existing document; `NotFound` when absent
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>)
        -> RemoteResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Stores a new document under a generated id and returns the id
    async fn add(&self, collection: &str, data: Value) -> RemoteResult<String>;

    async fn query(&self, query: &Query) -> RemoteResult<Vec<StoredDocument>>;
}
