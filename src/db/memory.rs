use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{
    db::{DocumentStore, Query, StoredDocument},
    error::{RemoteError, RemoteResult},
};

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Process-local document store
///
/// Documents of a collection are kept in id order, which is also the order
/// of unsorted query results.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>> {
        let collections = self.collections.lock();
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> RemoteResult<()> {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> RemoteResult<()> {
        let mut collections = self.collections.lock();
        let document = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| RemoteError::NotFound(format!("Document {}/{} does not exist", collection, id)))?;

        match document {
            Value::Object(existing) => existing.extend(fields),
            other => *other = Value::Object(fields),
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        if let Some(documents) = self.collections.lock().get_mut(collection) {
            documents.remove(id);
        }
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> RemoteResult<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.set(collection, &id, data).await?;
        Ok(id)
    }

    async fn query(&self, query: &Query) -> RemoteResult<Vec<StoredDocument>> {
        let mut documents: Vec<StoredDocument> = {
            let collections = self.collections.lock();
            collections
                .get(&query.collection)
                .map(|documents| {
                    documents
                        .iter()
                        .filter(|(_, data)| query.matches(data))
                        .map(|(id, data)| StoredDocument {
                            id: id.clone(),
                            data: data.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        query.arrange(&mut documents);
        Ok(documents)
    }
}
