use super::query::QuerySpec;
use super::snapshot::{DocumentRecord, DocumentWrite};
use super::{DocumentStore, FirestoreError};
use crate::core::auto_id;
use crate::core::subscription::Subscription;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type Collection = BTreeMap<String, DocumentRecord>;

/// A registered listener and the last result it was sent.
enum Listener {
    Query {
        query: QuerySpec,
        last: Vec<DocumentRecord>,
        sender: mpsc::UnboundedSender<Vec<DocumentRecord>>,
    },
    Document {
        collection: String,
        id: String,
        last: Option<DocumentRecord>,
        sender: mpsc::UnboundedSender<Option<DocumentRecord>>,
    },
}

impl Listener {
    /// Sends the listener's result if it changed. Returns `false` once the
    /// subscriber is gone.
    fn refresh(&mut self, collections: &HashMap<String, Collection>) -> bool {
        match self {
            Self::Query {
                query,
                last,
                sender,
            } => {
                if sender.is_closed() {
                    return false;
                }
                let snapshot = evaluate(collections, query);
                if snapshot.len() == last.len()
                    && snapshot.iter().zip(last.iter()).all(|(a, b)| same_record(a, b))
                {
                    return true;
                }
                *last = snapshot.clone();
                sender.send(snapshot).is_ok()
            }
            Self::Document {
                collection,
                id,
                last,
                sender,
            } => {
                if sender.is_closed() {
                    return false;
                }
                let snapshot = lookup(collections, collection, id);
                let unchanged = match (&snapshot, &*last) {
                    (Some(a), Some(b)) => same_record(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if unchanged {
                    return true;
                }
                *last = snapshot.clone();
                sender.send(snapshot).is_ok()
            }
        }
    }
}

/// Field values compare by Firestore ordering, under which a stored NaN
/// equals itself.
fn same_record(a: &DocumentRecord, b: &DocumentRecord) -> bool {
    a.id == b.id
        && a.create_time == b.create_time
        && a.update_time == b.update_time
        && a.fields.len() == b.fields.len()
        && a.fields
            .iter()
            .zip(&b.fields)
            .all(|((ka, va), (kb, vb))| ka == kb && va.firestore_cmp(vb) == Ordering::Equal)
}

fn evaluate(collections: &HashMap<String, Collection>, query: &QuerySpec) -> Vec<DocumentRecord> {
    collections
        .get(&query.collection)
        .map(|docs| query.evaluate(docs.values()))
        .unwrap_or_default()
}

fn lookup(
    collections: &HashMap<String, Collection>,
    collection: &str,
    id: &str,
) -> Option<DocumentRecord> {
    collections.get(collection).and_then(|docs| docs.get(id)).cloned()
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Collection>,
    listeners: Vec<Listener>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl State {
    /// The store clock: microsecond precision and strictly increasing.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let now = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(now);
        now
    }

    fn notify(&mut self) {
        let collections = &self.collections;
        self.listeners
            .retain_mut(|listener| listener.refresh(collections));
    }

    fn put(&mut self, collection: &str, id: &str, write: &DocumentWrite) {
        let now = self.tick();
        let docs = self.collections.entry(collection.to_string()).or_default();
        let create_time = docs.get(id).and_then(|d| d.create_time).unwrap_or(now);
        docs.insert(
            id.to_string(),
            DocumentRecord {
                id: id.to_string(),
                fields: write.resolve(now),
                create_time: Some(create_time),
                update_time: Some(now),
            },
        );
    }
}

/// In-process [`DocumentStore`] with Firestore query semantics, for tests
/// and local development.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<State>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of listeners whose subscribers are still around.
    pub async fn listener_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.listeners.retain(|listener| match listener {
            Listener::Query { sender, .. } => !sender.is_closed(),
            Listener::Document { sender, .. } => !sender.is_closed(),
        });
        state.listeners.len()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_with_generated_id(
        &self,
        collection: &str,
        write: DocumentWrite,
    ) -> Result<String, FirestoreError> {
        let mut state = self.state.lock().await;
        let id = loop {
            let candidate = auto_id();
            let taken = state
                .collections
                .get(collection)
                .is_some_and(|docs| docs.contains_key(&candidate));
            if !taken {
                break candidate;
            }
        };
        state.put(collection, &id, &write);
        state.notify();
        Ok(id)
    }

    async fn upsert_with_id(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> Result<(), FirestoreError> {
        let mut state = self.state.lock().await;
        state.put(collection, id, &write);
        state.notify();
        Ok(())
    }

    async fn read_one(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<DocumentRecord>, FirestoreError> {
        let state = self.state.lock().await;
        Ok(lookup(&state.collections, collection, id))
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<DocumentRecord>, FirestoreError> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn read_filtered(
        &self,
        query: &QuerySpec,
    ) -> Result<Vec<DocumentRecord>, FirestoreError> {
        let state = self.state.lock().await;
        Ok(evaluate(&state.collections, query))
    }

    async fn merge_fields(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> Result<(), FirestoreError> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let doc = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| FirestoreError::NoDocumentToUpdate(format!("{}/{}", collection, id)))?;
        doc.fields.extend(write.resolve(now));
        doc.update_time = Some(now);
        state.notify();
        Ok(())
    }

    async fn remove_one(&self, collection: &str, id: &str) -> Result<(), FirestoreError> {
        let mut state = self.state.lock().await;
        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if removed.is_some() {
            state.notify();
        }
        Ok(())
    }

    async fn subscribe_query(
        &self,
        query: QuerySpec,
    ) -> Result<Subscription<Vec<DocumentRecord>>, FirestoreError> {
        let mut state = self.state.lock().await;
        let initial = evaluate(&state.collections, &query);
        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so the first send cannot fail.
        let _ = sender.send(initial.clone());
        state.listeners.push(Listener::Query {
            query,
            last: initial,
            sender,
        });
        Ok(Subscription::from_receiver(receiver))
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<DocumentRecord>>, FirestoreError> {
        let mut state = self.state.lock().await;
        let initial = lookup(&state.collections, collection, id);
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(initial.clone());
        state.listeners.push(Listener::Document {
            collection: collection.to_string(),
            id: id.to_string(),
            last: initial,
            sender,
        });
        Ok(Subscription::from_receiver(receiver))
    }
}
