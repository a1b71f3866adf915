//! # Meshwork Store
//!
//! The indexed document store backing every table in the overlay
//! runtime: peers, routes, queued messages, tickets, traces, and the
//! on-disk kvstore.
//!
//! A [`Store`] is a set of named collections of JSON objects. Declaring
//! an attribute on a collection indexes a JSON-pointer path (`/dest`,
//! `/create_time`, …) over every object, and [`Query`] clauses run
//! against those indexed values. Index values are stringified on insert
//! and re-coerced at query time, so `$lt:60` compares numerically
//! against a numeric field.
//!
//! Two flavors share one implementation: `Store::in_memory()` and
//! `Store::open(path)`, which loads a JSON snapshot and flushes it on
//! every mutation. Cloned handles share the same data and the same
//! coarse lock, so readers and writers serialize per store.

mod query;

pub use query::{Operator, Query};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object is not a JSON map")]
    NotAnObject,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A handle to a document store. Clones share the underlying data.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

struct Shared {
    /// Snapshot path for the persistent flavor; `None` for in-memory.
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

#[derive(Default, Serialize, Deserialize)]
struct Inner {
    collections: BTreeMap<String, CollectionData>,
}

#[derive(Default, Serialize, Deserialize)]
struct CollectionData {
    /// attribute name -> JSON-pointer path
    attributes: BTreeMap<String, String>,
    /// objuuid -> object
    objects: BTreeMap<String, Value>,
    /// attribute name -> objuuid -> stringified value. Rebuilt from
    /// `objects` on load, never persisted.
    #[serde(skip)]
    index: HashMap<String, HashMap<String, String>>,
}

impl Store {
    /// A fresh volatile store.
    pub fn in_memory() -> Store {
        Store {
            shared: Arc::new(Shared {
                path: None,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Open (or create) a persistent store backed by a JSON snapshot.
    /// A missing or unreadable snapshot starts the store empty.
    pub fn open(path: impl Into<PathBuf>) -> Store {
        let path = path.into();
        let mut inner = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Inner>(&text) {
                Ok(inner) => inner,
                Err(error) => {
                    warn!(path = %path.display(), %error, "store snapshot corrupted, starting empty");
                    Inner::default()
                }
            },
            Err(_) => Inner::default(),
        };
        for collection in inner.collections.values_mut() {
            collection.rebuild_index();
        }
        debug!(path = %path.display(), collections = inner.collections.len(), "store opened");
        Store {
            shared: Arc::new(Shared {
                path: Some(path),
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Handle to a named collection, created on first use.
    pub fn collection(&self, name: &str) -> Collection {
        self.lock().collections.entry(name.to_string()).or_default();
        Collection {
            store: self.clone(),
            name: name.to_string(),
        }
    }

    /// Names of every collection in the store.
    pub fn collection_names(&self) -> Vec<String> {
        self.lock().collections.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flush the snapshot while still holding the lock.
    fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let Some(path) = &self.shared.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(inner)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl CollectionData {
    fn rebuild_index(&mut self) {
        self.index.clear();
        let attributes: Vec<(String, String)> = self
            .attributes
            .iter()
            .map(|(a, p)| (a.clone(), p.clone()))
            .collect();
        let ids: Vec<String> = self.objects.keys().cloned().collect();
        for (attribute, path) in &attributes {
            for objuuid in &ids {
                self.index_one(attribute, path, objuuid);
            }
        }
    }

    fn index_one(&mut self, attribute: &str, path: &str, objuuid: &str) {
        let Some(object) = self.objects.get(objuuid) else {
            return;
        };
        match object.pointer(path) {
            Some(value) => {
                let rendered = index_string(value);
                self.index
                    .entry(attribute.to_string())
                    .or_default()
                    .insert(objuuid.to_string(), rendered);
            }
            None => {
                // The object still exists, it is just invisible to
                // queries on this attribute.
                debug!(attribute, objuuid, "index path missing, skipping attribute");
            }
        }
    }

    fn reindex_object(&mut self, objuuid: &str) {
        for map in self.index.values_mut() {
            map.remove(objuuid);
        }
        let attributes: Vec<(String, String)> = self
            .attributes
            .iter()
            .map(|(a, p)| (a.clone(), p.clone()))
            .collect();
        for (attribute, path) in &attributes {
            self.index_one(attribute, path, objuuid);
        }
    }

    fn unindex_object(&mut self, objuuid: &str) {
        for map in self.index.values_mut() {
            map.remove(objuuid);
        }
    }

    fn matching_objuuids(&self, query: &Query) -> Result<Vec<String>, StoreError> {
        if query.is_empty() {
            return Ok(self.objects.keys().cloned().collect());
        }

        let mut intersection: Option<Vec<String>> = None;
        for condition in query.conditions()? {
            let matches: Vec<String> = self
                .index
                .get(&condition.attribute)
                .map(|values| {
                    values
                        .iter()
                        .filter(|(_, value)| condition.matches(value))
                        .map(|(objuuid, _)| objuuid.clone())
                        .collect()
                })
                .unwrap_or_default();

            intersection = Some(match intersection {
                None => matches,
                Some(prev) => prev.into_iter().filter(|id| matches.contains(id)).collect(),
            });
        }

        let selected = intersection.unwrap_or_default();
        // Stable order: follow the collection's object ordering
        Ok(self
            .objects
            .keys()
            .filter(|id| selected.contains(*id))
            .cloned()
            .collect())
    }
}

/// A named collection inside a [`Store`].
#[derive(Clone)]
pub struct Collection {
    store: Store,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare (or re-point) an indexed attribute. Re-pointing rebuilds
    /// the attribute's index over the existing objects.
    pub fn create_attribute(&self, attribute: &str, path: &str) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        let data = inner.collections.entry(self.name.clone()).or_default();
        if data.attributes.get(attribute).map(String::as_str) == Some(path) {
            return Ok(());
        }
        data.attributes
            .insert(attribute.to_string(), path.to_string());
        if let Some(map) = data.index.get_mut(attribute) {
            map.clear();
        }
        let ids: Vec<String> = data.objects.keys().cloned().collect();
        for objuuid in &ids {
            data.index_one(attribute, path, objuuid);
        }
        self.store.persist(&inner)
    }

    /// Insert or replace an object. The object's identity is its
    /// `objuuid` field; one is generated and injected when absent.
    /// Returns the objuuid.
    pub fn upsert_object(&self, mut object: Value) -> Result<String, StoreError> {
        let map = object.as_object_mut().ok_or(StoreError::NotAnObject)?;
        let objuuid = match map.get("objuuid").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                map.insert("objuuid".to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut inner = self.store.lock();
        let data = inner.collections.entry(self.name.clone()).or_default();
        data.objects.insert(objuuid.clone(), object);
        data.reindex_object(&objuuid);
        self.store.persist(&inner)?;
        Ok(objuuid)
    }

    /// Insert a typed value under a fresh objuuid.
    pub fn upsert<T: Serialize>(&self, item: &T) -> Result<String, StoreError> {
        self.upsert_object(serde_json::to_value(item)?)
    }

    /// Replace the object stored under `objuuid` with a typed value.
    pub fn upsert_at<T: Serialize>(&self, objuuid: &str, item: &T) -> Result<(), StoreError> {
        let mut object = serde_json::to_value(item)?;
        let map = object.as_object_mut().ok_or(StoreError::NotAnObject)?;
        map.insert(
            "objuuid".to_string(),
            Value::String(objuuid.to_string()),
        );
        self.upsert_object(object)?;
        Ok(())
    }

    pub fn get_object(&self, objuuid: &str) -> Option<Value> {
        self.store
            .lock()
            .collections
            .get(&self.name)
            .and_then(|data| data.objects.get(objuuid).cloned())
    }

    pub fn get_as<T: DeserializeOwned>(&self, objuuid: &str) -> Option<T> {
        self.get_object(objuuid)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// All objects matching the query, in stable collection order.
    pub fn find(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let inner = self.store.lock();
        let Some(data) = inner.collections.get(&self.name) else {
            return Ok(Vec::new());
        };
        let ids = data.matching_objuuids(query)?;
        Ok(ids
            .iter()
            .filter_map(|id| data.objects.get(id).cloned())
            .collect())
    }

    /// Matching objects deserialized into `T`; rows that no longer fit
    /// the model are skipped with a warning.
    pub fn find_as<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, StoreError> {
        Ok(self
            .find(query)?
            .into_iter()
            .filter_map(|value| decode(&self.name, value))
            .collect())
    }

    /// Matching `(objuuid, T)` pairs, for callers that mutate rows.
    pub fn find_entries<T: DeserializeOwned>(
        &self,
        query: &Query,
    ) -> Result<Vec<(String, T)>, StoreError> {
        Ok(self
            .find(query)?
            .into_iter()
            .filter_map(|value| {
                let objuuid = value.get("objuuid")?.as_str()?.to_string();
                Some((objuuid, decode(&self.name, value)?))
            })
            .collect())
    }

    pub fn find_objuuids(&self, query: &Query) -> Result<Vec<String>, StoreError> {
        let inner = self.store.lock();
        match inner.collections.get(&self.name) {
            Some(data) => data.matching_objuuids(query),
            None => Ok(Vec::new()),
        }
    }

    pub fn list_objuuids(&self) -> Vec<String> {
        self.store
            .lock()
            .collections
            .get(&self.name)
            .map(|data| data.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove one object, returning it.
    pub fn remove(&self, objuuid: &str) -> Result<Option<Value>, StoreError> {
        let mut inner = self.store.lock();
        let Some(data) = inner.collections.get_mut(&self.name) else {
            return Ok(None);
        };
        let removed = data.objects.remove(objuuid);
        if removed.is_some() {
            data.unindex_object(objuuid);
            self.store.persist(&inner)?;
        }
        Ok(removed)
    }

    /// Atomically return-and-delete every object matching the query.
    pub fn pop(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.store.lock();
        let Some(data) = inner.collections.get_mut(&self.name) else {
            return Ok(Vec::new());
        };
        let ids = data.matching_objuuids(query)?;
        let mut popped = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(value) = data.objects.remove(id) {
                data.unindex_object(id);
                popped.push(value);
            }
        }
        if !popped.is_empty() {
            self.store.persist(&inner)?;
        }
        Ok(popped)
    }

    /// `pop` with typed decoding.
    pub fn pop_as<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, StoreError> {
        Ok(self
            .pop(query)?
            .into_iter()
            .filter_map(|value| decode(&self.name, value))
            .collect())
    }

    pub fn count(&self) -> usize {
        self.store
            .lock()
            .collections
            .get(&self.name)
            .map(|data| data.objects.len())
            .unwrap_or(0)
    }

    /// Drop every object but keep the attribute declarations.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        if let Some(data) = inner.collections.get_mut(&self.name) {
            data.objects.clear();
            data.index.clear();
            self.store.persist(&inner)?;
        }
        Ok(())
    }

    /// Delete the collection entirely.
    pub fn destroy(self) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        inner.collections.remove(&self.name);
        self.store.persist(&inner)
    }
}

fn decode<T: DeserializeOwned>(collection: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(item) => Some(item),
        Err(error) => {
            warn!(collection, %error, "skipping row that no longer matches its model");
            None
        }
    }
}

/// Stringify a JSON value the way the index stores it. Strings index
/// as their raw content, everything else as compact JSON.
pub(crate) fn index_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
