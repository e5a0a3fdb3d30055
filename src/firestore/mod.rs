//! Cloud Firestore facade.
//!
//! [`DocumentStoreFacade`] addresses documents by `(collection, id)`, stamps
//! `createdAt` / `updatedAt` with the store's clock on every write and wraps
//! each outcome in a [`ResultEnvelope`].
//!
//! # Real-time Updates
//!
//! [`DocumentStoreFacade::watch_collection`] and
//! [`DocumentStoreFacade::watch_document`] return a [`Subscription`] that
//! yields the full current result first and again after every visible change.
//!
//! ```rust,no_run
//! # use firebase_client_facade::FirebaseApp;
//! # use firebase_client_facade::firestore::{FieldValue, Fields};
//! # async fn run(app: FirebaseApp) {
//! let store = app.firestore();
//!
//! let mut users = store.watch_collection("users").await;
//! store
//!     .add_document("users", Fields::from([("name".to_string(), FieldValue::from("Ada"))]))
//!     .await;
//!
//! while let Some(snapshot) = users.next().await {
//!     println!("{} users", snapshot.len());
//! }
//! # }
//! ```

mod convert;
pub mod listen;
pub mod memory;
pub mod models;
pub mod query;
pub mod rest;
pub mod snapshot;
pub mod value;


pub use self::query::{Direction, FieldOperator, QuerySpec};
pub use self::snapshot::{DocumentId, DocumentRecord, DocumentWrite};
pub use self::value::{fields_from_serializable, FieldValue, Fields};

use crate::core::envelope::ResultEnvelope;
use crate::core::observer::{settle, FacadeObserver, TracingObserver};
use crate::core::subscription::Subscription;
use crate::core::ApiFailure;
use std::sync::Arc;
use thiserror::Error;

/// Field stamped with the store's clock when a document is added.
pub const CREATED_AT: &str = "createdAt";
/// Field stamped with the store's clock when a document is set or updated.
pub const UPDATED_AT: &str = "updatedAt";

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Firestore API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Document not found")]
    DocumentNotFound,
    #[error("No document to update: {0}")]
    NoDocumentToUpdate(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A real-time listener could not be opened or was ended by the server.
    #[error("Listen failed: {0}")]
    ListenError(String),
}

impl From<ApiFailure> for FirestoreError {
    fn from(failure: ApiFailure) -> Self {
        Self::ApiError(failure.message)
    }
}

/// The document store boundary.
///
/// Collections are slash-separated paths relative to the database root
/// (`users`, `users/u1/posts`). Server timestamps listed in a
/// [`DocumentWrite`] are resolved by the store.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document under a generated id and returns the id.
    async fn insert_with_generated_id(
        &self,
        collection: &str,
        write: DocumentWrite,
    ) -> Result<String, FirestoreError>;

    /// Creates the document or replaces all of its fields.
    async fn upsert_with_id(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> Result<(), FirestoreError>;

    async fn read_one(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<DocumentRecord>, FirestoreError>;

    async fn read_all(&self, collection: &str) -> Result<Vec<DocumentRecord>, FirestoreError>;

    async fn read_filtered(&self, query: &QuerySpec)
        -> Result<Vec<DocumentRecord>, FirestoreError>;

    /// Overwrites the given fields and keeps the rest. Fails with
    /// [`FirestoreError::NoDocumentToUpdate`] when the document is missing.
    async fn merge_fields(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> Result<(), FirestoreError>;

    /// Deletes the document. Deleting a missing document succeeds.
    async fn remove_one(&self, collection: &str, id: &str) -> Result<(), FirestoreError>;

    async fn subscribe_query(
        &self,
        query: QuerySpec,
    ) -> Result<Subscription<Vec<DocumentRecord>>, FirestoreError>;

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<DocumentRecord>>, FirestoreError>;
}

const MAX_SEGMENT_BYTES: usize = 1500;

/// Firestore rejects `.`, `..`, `__name__`-style ids and ids over 1500 bytes.
fn valid_segment(segment: &str) -> bool {
    let reserved = segment.len() >= 4 && segment.starts_with("__") && segment.ends_with("__");
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !reserved
        && segment.len() <= MAX_SEGMENT_BYTES
}

/// A collection path has an odd number of valid segments.
pub(crate) fn validate_collection(collection: &str) -> Result<(), FirestoreError> {
    let segments: Vec<&str> = collection.split('/').collect();
    if !segments.iter().all(|s| valid_segment(s)) || segments.len() % 2 == 0 {
        return Err(FirestoreError::InvalidArgument(format!(
            "Invalid collection path: '{}'",
            collection
        )));
    }
    Ok(())
}

pub(crate) fn validate_document_path(collection: &str, id: &str) -> Result<(), FirestoreError> {
    validate_collection(collection)?;
    if id.contains('/') || !valid_segment(id) {
        return Err(FirestoreError::InvalidArgument(format!(
            "Invalid document id: '{}'",
            id
        )));
    }
    Ok(())
}

/// Envelope-returning front for a [`DocumentStore`].
pub struct DocumentStoreFacade<S> {
    store: S,
    observer: Arc<dyn FacadeObserver>,
}

impl<S: DocumentStore> DocumentStoreFacade<S> {
    /// Wraps `store`. Outcomes are reported through [`TracingObserver`].
    pub fn new(store: S) -> Self {
        Self {
            store,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FacadeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds a document under a generated 20-character id and stamps
    /// `createdAt`.
    pub async fn add_document(
        &self,
        collection: &str,
        payload: Fields,
    ) -> ResultEnvelope<DocumentId> {
        let result = async {
            validate_collection(collection)?;
            let write = DocumentWrite::new(payload).with_server_timestamp(CREATED_AT);
            let id = self.store.insert_with_generated_id(collection, write).await?;
            Ok::<_, FirestoreError>(DocumentId { id })
        }
        .await;
        settle(self.observer.as_ref(), "add_document", result, |doc| {
            format!("document added: {}/{}", collection, doc.id)
        })
    }

    /// Creates or fully replaces a document and stamps `updatedAt`.
    pub async fn set_document(&self, collection: &str, id: &str, payload: Fields) -> ResultEnvelope<()> {
        let result = async {
            validate_document_path(collection, id)?;
            let write = DocumentWrite::new(payload).with_server_timestamp(UPDATED_AT);
            self.store.upsert_with_id(collection, id, write).await
        }
        .await;
        settle(self.observer.as_ref(), "set_document", result, |_| {
            format!("document set: {}/{}", collection, id)
        })
    }

    pub async fn get_document(&self, collection: &str, id: &str) -> ResultEnvelope<DocumentRecord> {
        let result = async {
            validate_document_path(collection, id)?;
            self.store
                .read_one(collection, id)
                .await?
                .ok_or(FirestoreError::DocumentNotFound)
        }
        .await;
        settle(self.observer.as_ref(), "get_document", result, |doc| {
            format!("document read: {}/{}", collection, doc.id)
        })
    }

    pub async fn get_all_documents(&self, collection: &str) -> ResultEnvelope<Vec<DocumentRecord>> {
        let result = async {
            validate_collection(collection)?;
            self.store.read_all(collection).await
        }
        .await;
        settle(self.observer.as_ref(), "get_all_documents", result, |docs| {
            format!("{} documents read from {}", docs.len(), collection)
        })
    }

    /// Equality filter on one field, sorted by another, capped at `limit`.
    pub async fn query_documents(
        &self,
        collection: &str,
        filter_field: &str,
        filter_value: impl Into<FieldValue>,
        sort_field: &str,
        direction: Direction,
        limit: u32,
    ) -> ResultEnvelope<Vec<DocumentRecord>> {
        let query = QuerySpec::new(collection)
            .where_eq(filter_field, filter_value)
            .order_by(sort_field, direction)
            .limit(limit);
        let result = self.query(&query).await;
        settle(self.observer.as_ref(), "query_documents", result, |docs| {
            format!("{} documents matched in {}", docs.len(), collection)
        })
    }

    /// Runs an arbitrary query.
    pub async fn run_query(&self, query: &QuerySpec) -> ResultEnvelope<Vec<DocumentRecord>> {
        let result = self.query(query).await;
        settle(self.observer.as_ref(), "run_query", result, |docs| {
            format!("{} documents matched in {}", docs.len(), query.collection)
        })
    }

    async fn query(&self, query: &QuerySpec) -> Result<Vec<DocumentRecord>, FirestoreError> {
        validate_collection(&query.collection)?;
        self.store.read_filtered(query).await
    }

    /// Merges `partial` into an existing document and stamps `updatedAt`.
    pub async fn update_document(&self, collection: &str, id: &str, partial: Fields) -> ResultEnvelope<()> {
        let result = async {
            validate_document_path(collection, id)?;
            let write = DocumentWrite::new(partial).with_server_timestamp(UPDATED_AT);
            self.store.merge_fields(collection, id, write).await
        }
        .await;
        settle(self.observer.as_ref(), "update_document", result, |_| {
            format!("document updated: {}/{}", collection, id)
        })
    }

    pub async fn delete_document(&self, collection: &str, id: &str) -> ResultEnvelope<()> {
        let result = async {
            validate_document_path(collection, id)?;
            self.store.remove_one(collection, id).await
        }
        .await;
        settle(self.observer.as_ref(), "delete_document", result, |_| {
            format!("document deleted: {}/{}", collection, id)
        })
    }

    /// The whole collection ordered by `createdAt`, newest first. Documents
    /// without `createdAt` are not part of the result.
    ///
    /// A listener that cannot be registered is reported to the observer and
    /// yields a closed subscription.
    pub async fn watch_collection(&self, collection: &str) -> Subscription<Vec<DocumentRecord>> {
        let registered = async {
            validate_collection(collection)?;
            let query = QuerySpec::new(collection).order_by(CREATED_AT, Direction::Descending);
            self.store.subscribe_query(query).await
        }
        .await;

        match registered {
            Ok(subscription) => {
                let observer = Arc::clone(&self.observer);
                let collection = collection.to_string();
                subscription.map(move |docs| {
                    observer.delivered(
                        "watch_collection",
                        &format!("{}: {} documents", collection, docs.len()),
                    );
                    docs
                })
            }
            Err(e) => {
                self.observer.failed("watch_collection", &e.to_string());
                Subscription::closed()
            }
        }
    }

    /// The document, or `None` while it does not exist.
    pub async fn watch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Subscription<Option<DocumentRecord>> {
        let registered = async {
            validate_document_path(collection, id)?;
            self.store.subscribe_document(collection, id).await
        }
        .await;

        match registered {
            Ok(subscription) => {
                let observer = Arc::clone(&self.observer);
                let path = format!("{}/{}", collection, id);
                subscription.map(move |doc| {
                    let detail = match &doc {
                        Some(_) => format!("{} changed", path),
                        None => format!("{} does not exist", path),
                    };
                    observer.delivered("watch_document", &detail);
                    doc
                })
            }
            Err(e) => {
                self.observer.failed("watch_document", &e.to_string());
                Subscription::closed()
            }
        }
    }
}
