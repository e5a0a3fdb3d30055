use super::convert::{document_to_record, fields_to_wire};
use super::listen::{listen_request, pump, TARGET_ID};
use super::models::{
    CommitRequest, CommitResponse, Document, DocumentMask, DocumentsTarget, FieldTransform,
    ListDocumentsResponse, ListenRequest, Precondition, QueryTarget, RunQueryRequest,
    RunQueryResponse, ServerValue, Target, TargetType, Write,
};
use super::query::{quote_field_path, QuerySpec};
use super::snapshot::{DocumentRecord, DocumentWrite};
use super::{DocumentStore, FirestoreError};
use crate::auth::identity_toolkit::TokenRefresher;
use crate::auth::session::SessionStore;
use crate::config::FirebaseOptions;
use crate::core::middleware::{ApiKeyMiddleware, SessionTokenMiddleware};
use crate::core::subscription::Subscription;
use crate::core::{auto_id, build_client, parse_error_response};
use reqwest::{header, Client, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

fn parse_url(raw: &str) -> Result<Url, FirestoreError> {
    Url::parse(raw)
        .map_err(|e| FirestoreError::InvalidArgument(format!("Invalid Firestore URL {}: {}", raw, e)))
}

/// [`DocumentStore`] backed by the Firestore v1 REST API.
#[derive(Clone)]
pub struct FirestoreRestClient {
    client: ClientWithMiddleware,
    /// HTTP prefix of the documents resource, e.g.
    /// `https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents`.
    base_url: String,
    /// Resource name of the database, e.g. `projects/p/databases/(default)`.
    database: String,
}

impl FirestoreRestClient {
    /// Creates a client for the project described by `options`. Requests
    /// carry the API key and, while a user is signed in, their ID token.
    pub fn new(options: &FirebaseOptions, http: Client, session: SessionStore) -> Self {
        let api_key = ApiKeyMiddleware::new(options.api_key.clone());
        let refresher = TokenRefresher::new(
            build_client(
                http.clone(),
                options.max_transport_retries,
                vec![Arc::new(api_key.clone())],
            ),
            options.secure_token_url().to_string(),
            session.clone(),
        );
        let client = build_client(
            http,
            options.max_transport_retries,
            vec![
                Arc::new(api_key),
                Arc::new(SessionTokenMiddleware::new(session).with_refresher(refresher)),
            ],
        );
        Self::new_with_client(client, options.documents_url(), options.database_name())
    }

    /// Creates a client with a prepared HTTP client (useful for testing).
    pub fn new_with_client(client: ClientWithMiddleware, base_url: String, database: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database,
        }
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_root(), collection, id)
    }

    /// HTTP URL of the resource at `path` under the documents prefix.
    /// Each path segment is percent-encoded on its own; `method` (such as
    /// `:runQuery`) is appended to the last one.
    fn resource_url(&self, path: &str, method: &str) -> Result<Url, FirestoreError> {
        let mut url = parse_url(&self.base_url)?;
        let mut segments: Vec<&str> = path.split('/').collect();
        let last = segments.pop().map(|segment| format!("{}{}", segment, method));
        url.path_segments_mut()
            .map_err(|()| {
                FirestoreError::InvalidArgument(format!(
                    "Firestore URL {} cannot carry a document path",
                    self.base_url
                ))
            })?
            .extend(segments)
            .extend(last);
        Ok(url)
    }

    fn document_url(&self, collection: &str, id: &str) -> Result<Url, FirestoreError> {
        self.resource_url(&format!("{}/{}", collection, id), "")
    }

    fn to_write(
        &self,
        collection: &str,
        id: &str,
        write: &DocumentWrite,
        merge: bool,
        exists: Option<bool>,
    ) -> Write {
        let update_mask = merge.then(|| DocumentMask {
            field_paths: write.fields.keys().map(|k| quote_field_path(k)).collect(),
        });

        Write {
            update: Document {
                name: self.document_name(collection, id),
                fields: fields_to_wire(&write.fields),
                create_time: None,
                update_time: None,
            },
            update_mask,
            update_transforms: write
                .server_timestamps
                .iter()
                .map(|field| FieldTransform {
                    field_path: quote_field_path(field),
                    set_to_server_value: ServerValue::RequestTime,
                })
                .collect(),
            current_document: exists.map(|exists| Precondition { exists }),
        }
    }

    async fn commit(&self, write: Write) -> Result<CommitResponse, FirestoreError> {
        let url = format!("{}:commit", self.base_url);
        let must_exist = write.current_document.as_ref().is_some_and(|p| p.exists);
        let root = format!("{}/", self.documents_root());
        let path = write
            .update
            .name
            .strip_prefix(&root)
            .unwrap_or(&write.update.name)
            .to_string();
        let request = CommitRequest {
            writes: vec![write],
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = parse_error_response(response, "Commit failed").await;
            if must_exist && failure.code == StatusCode::NOT_FOUND.as_u16() {
                return Err(FirestoreError::NoDocumentToUpdate(path));
            }
            return Err(failure.into());
        }

        Ok(response.json().await?)
    }

    fn listen_url(&self) -> String {
        format!("{}:listen", self.base_url)
    }
}

#[async_trait::async_trait]
impl DocumentStore for FirestoreRestClient {
    async fn insert_with_generated_id(
        &self,
        collection: &str,
        write: DocumentWrite,
    ) -> Result<String, FirestoreError> {
        let id = auto_id();
        self.commit(self.to_write(collection, &id, &write, false, Some(false)))
            .await?;
        Ok(id)
    }

    async fn upsert_with_id(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> Result<(), FirestoreError> {
        self.commit(self.to_write(collection, id, &write, false, None))
            .await?;
        Ok(())
    }

    async fn read_one(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<DocumentRecord>, FirestoreError> {
        let response = self
            .client
            .get(self.document_url(collection, id)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(parse_error_response(response, "Get document failed").await.into());
        }

        let doc: Document = response.json().await?;
        Ok(Some(document_to_record(doc)?))
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<DocumentRecord>, FirestoreError> {
        let url = self.resource_url(collection, "")?;
        let mut records = Vec::new();
        let mut next_page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(token) = &next_page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await?;

            if !response.status().is_success() {
                return Err(parse_error_response(response, "List documents failed").await.into());
            }

            let page: ListDocumentsResponse = response.json().await?;
            for doc in page.documents {
                records.push(document_to_record(doc)?);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => next_page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn read_filtered(
        &self,
        query: &QuerySpec,
    ) -> Result<Vec<DocumentRecord>, FirestoreError> {
        let url = match query.split_collection() {
            (Some(parent), _) => self.resource_url(parent, ":runQuery")?,
            (None, _) => parse_url(&format!("{}:runQuery", self.base_url))?,
        };
        let request = RunQueryRequest {
            structured_query: query.to_structured_query(),
        };

        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(parse_error_response(response, "Run query failed").await.into());
        }

        // The response is a JSON array of results; entries without a
        // document only carry progress information.
        let results: Vec<RunQueryResponse> = response.json().await?;
        results
            .into_iter()
            .filter_map(|r| r.document)
            .map(document_to_record)
            .collect()
    }

    async fn merge_fields(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> Result<(), FirestoreError> {
        self.commit(self.to_write(collection, id, &write, true, Some(true)))
            .await?;
        Ok(())
    }

    async fn remove_one(&self, collection: &str, id: &str) -> Result<(), FirestoreError> {
        let response = self
            .client
            .delete(self.document_url(collection, id)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(parse_error_response(response, "Delete document failed").await.into());
        }

        Ok(())
    }

    async fn subscribe_query(
        &self,
        query: QuerySpec,
    ) -> Result<Subscription<Vec<DocumentRecord>>, FirestoreError> {
        let parent = match query.split_collection() {
            (Some(parent), _) => format!("{}/{}", self.documents_root(), parent),
            (None, _) => self.documents_root(),
        };
        let request = ListenRequest {
            database: self.database.clone(),
            add_target: Target {
                target_type: TargetType::Query(QueryTarget {
                    parent,
                    structured_query: query.to_structured_query(),
                }),
                target_id: TARGET_ID,
            },
        };

        let stream = listen_request(&self.client, &self.listen_url(), &request).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let target = query.collection.clone();
        let task = tokio::spawn(pump(stream, sender, target, move |state| {
            state.query_snapshot(&query)
        }));

        Ok(Subscription::from_task(receiver, task.abort_handle()))
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<DocumentRecord>>, FirestoreError> {
        let name = self.document_name(collection, id);
        let request = ListenRequest {
            database: self.database.clone(),
            add_target: Target {
                target_type: TargetType::Documents(DocumentsTarget {
                    documents: vec![name],
                }),
                target_id: TARGET_ID,
            },
        };

        let stream = listen_request(&self.client, &self.listen_url(), &request).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let target = format!("{}/{}", collection, id);
        let task = tokio::spawn(pump(stream, sender, target, |state| {
            state.document_snapshot()
        }));

        Ok(Subscription::from_task(receiver, task.abort_handle()))
    }
}
