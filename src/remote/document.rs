use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex};

use crate::error::{AppError, Result};

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(anyhow::anyhow!("Document body must be an object, got {}", other).into()),
    }
}

/// A hierarchical JSON document store. Collections are addressed by
/// slash-separated paths such as `users/{uid}/workouts`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Creates or fully replaces a document.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    /// Replaces one field of an existing document.
    async fn update_field(&self, collection: &str, id: &str, field: &str, value: Value)
        -> Result<()>;

    /// Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    async fn query_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>> {
        let documents = self.list(collection).await?;
        Ok(documents
            .into_iter()
            .filter(|doc| doc.fields.get(field) == Some(value))
            .collect())
    }

    /// Live snapshots of a collection: the current contents first, then
    /// a new snapshot each time the contents change.
    fn watch(&self, collection: &str) -> BoxStream<'static, Result<Vec<Document>>>;
}

struct MemoryInner {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Fields>>>,
    revision: watch::Sender<u64>,
    unavailable: AtomicBool,
}

impl MemoryInner {
    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Remote("Document store unavailable".to_string()));
        }
        Ok(())
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    async fn snapshot(&self, collection: &str) -> Result<Vec<Document>> {
        self.check_available()?;
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// In-process document store with push-based watches.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                collections: Mutex::new(BTreeMap::new()),
                revision,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// While set, every call fails as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.check_available()?;
        let collections = self.inner.collections.lock().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        self.inner.check_available()?;
        self.inner
            .collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        self.inner.bump();
        Ok(())
    }

    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        self.inner.check_available()?;
        {
            let mut collections = self.inner.collections.lock().await;
            let fields = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| {
                    AppError::Remote(format!("No document to update: {}/{}", collection, id))
                })?;
            fields.insert(field.to_string(), value);
        }
        self.inner.bump();
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.check_available()?;
        let removed = self
            .inner
            .collections
            .lock()
            .await
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if removed.is_some() {
            self.inner.bump();
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.inner.snapshot(collection).await
    }

    fn watch(&self, collection: &str) -> BoxStream<'static, Result<Vec<Document>>> {
        let inner = Arc::clone(&self.inner);
        let revision = inner.revision.subscribe();
        let collection = collection.to_string();

        stream::unfold(
            (inner, revision, collection, None::<Vec<Document>>, true),
            |(inner, mut revision, collection, mut last, mut first)| async move {
                loop {
                    if !first && revision.changed().await.is_err() {
                        return None;
                    }
                    first = false;
                    revision.borrow_and_update();

                    match inner.snapshot(&collection).await {
                        Ok(docs) if last.as_ref() == Some(&docs) => continue,
                        Ok(docs) => {
                            last = Some(docs.clone());
                            return Some((Ok(docs), (inner, revision, collection, last, first)));
                        }
                        Err(e) => return Some((Err(e), (inner, revision, collection, last, first))),
                    }
                }
            },
        )
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn set_get_update_delete() {
        let store = MemoryDocumentStore::new();
        store
            .set("users/u1/workouts", "w1", fields(json!({"name": "Push Day", "exerciseIds": []})))
            .await
            .unwrap();

        store
            .update_field("users/u1/workouts", "w1", "exerciseIds", json!(["1"]))
            .await
            .unwrap();

        let doc = store.get("users/u1/workouts", "w1").await.unwrap().unwrap();
        assert_eq!(doc.fields["exerciseIds"], json!(["1"]));
        assert_eq!(doc.fields["name"], json!("Push Day"));

        store.delete("users/u1/workouts", "w1").await.unwrap();
        store.delete("users/u1/workouts", "w1").await.unwrap();
        assert!(store.get("users/u1/workouts", "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryDocumentStore::new();
        let result = store
            .update_field("users/u1/workouts", "nope", "name", json!("x"))
            .await;
        assert!(matches!(result, Err(AppError::Remote(_))));
    }

    #[tokio::test]
    async fn collections_are_isolated_per_path() {
        let store = MemoryDocumentStore::new();
        store.set("users/u1/exercises", "1", Fields::new()).await.unwrap();
        assert!(store.list("users/u2/exercises").await.unwrap().is_empty());
        assert_eq!(store.list("users/u1/exercises").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_eq_filters_on_field() {
        let store = MemoryDocumentStore::new();
        store
            .set("users/u1/images", "a", fields(json!({"workoutId": "W1"})))
            .await
            .unwrap();
        store
            .set("users/u1/images", "b", fields(json!({"workoutId": "W2"})))
            .await
            .unwrap();

        let hits = store
            .query_eq("users/u1/images", "workoutId", &json!("W1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn unavailable_store_rejects_calls() {
        let store = MemoryDocumentStore::new();
        store.set_unavailable(true);
        assert!(store.list("users/u1/exercises").await.is_err());
        assert!(store.set("users/u1/exercises", "1", Fields::new()).await.is_err());

        store.set_unavailable(false);
        assert!(store.list("users/u1/exercises").await.is_ok());
    }

    #[tokio::test]
    async fn watch_skips_unrelated_changes() {
        let store = MemoryDocumentStore::new();
        let mut exercises = store.watch("users/u1/exercises");
        assert!(exercises.next().await.unwrap().unwrap().is_empty());

        store.set("users/u1/workouts", "w1", Fields::new()).await.unwrap();
        store
            .set("users/u1/exercises", "1", fields(json!({"name": "Squats"})))
            .await
            .unwrap();

        let next = timeout(Duration::from_secs(2), exercises.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "1");
    }

    #[test]
    fn encode_rejects_non_objects() {
        assert!(encode(&vec![1, 2, 3]).is_err());
        assert_eq!(encode(&json!({"a": 1})).unwrap()["a"], json!(1));
    }
}
