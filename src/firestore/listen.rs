use super::convert::document_to_record;
use super::models::{Document, ListenRequest, ListenResponse, TargetChangeType};
use super::query::QuerySpec;
use super::snapshot::DocumentRecord;
use super::FirestoreError;
use crate::core::parse_error_response;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use reqwest_middleware::ClientWithMiddleware;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Target id used for the single target each listen stream carries.
pub(crate) const TARGET_ID: i32 = 1;

/// A stream of `ListenResponse` messages.
///
/// The endpoint streams a JSON array whose elements arrive over time; the
/// stream yields each element as soon as it is complete.
pub struct ListenStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
}

impl ListenStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, FirestoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // 1. Try to cut a complete object out of the buffer.
            if let Some((start, end)) = find_message(&self.buffer) {
                let frame = self.buffer.split_to(end);
                return match serde_json::from_slice::<ListenResponse>(&frame[start..]) {
                    Ok(msg) => Poll::Ready(Some(Ok(msg))),
                    Err(e) => Poll::Ready(Some(Err(FirestoreError::SerializationError(e)))),
                };
            }

            // 2. Otherwise wait for more bytes.
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FirestoreError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    if self.buffer.iter().any(|b| !is_separator(*b)) {
                        self.buffer.clear();
                        return Poll::Ready(Some(Err(FirestoreError::ListenError(
                            "Stream ended with incomplete JSON".into(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Bytes that may appear between array elements.
fn is_separator(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b',')
}

/// Finds the first complete top-level object in the buffer, skipping the
/// array punctuation around it. Returns its start and end offsets.
fn find_message(buf: &[u8]) -> Option<(usize, usize)> {
    let start = buf.iter().position(|b| !is_separator(*b))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in buf.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some((start, i + 1));
                }
            }
            _ => {}
        }
    }

    None
}

pub async fn listen_request(
    client: &ClientWithMiddleware,
    listen_url: &str,
    request: &ListenRequest,
) -> Result<ListenStream, FirestoreError> {
    let response = client.post(listen_url).json(request).send().await?;

    if !response.status().is_success() {
        return Err(parse_error_response(response, "Listen failed").await.into());
    }

    // Use unfold to create a stream from response.chunk()
    let stream = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => Some((Err(e), resp)),
        }
    });

    Ok(ListenStream::new(Box::pin(stream)))
}

/// Documents currently matching a listen target, rebuilt from the change
/// messages of the stream.
#[derive(Debug, Default)]
pub(crate) struct WatchState {
    documents: BTreeMap<String, Document>,
    current: bool,
    dirty: bool,
}

impl WatchState {
    /// Applies one message. Returns `true` when the state is a consistent
    /// snapshot that has not been delivered yet.
    ///
    /// An existence filter whose count differs from the documents held means
    /// deletions were missed; the state cannot be repaired without listening
    /// again, so it fails like a removed target.
    pub(crate) fn apply(&mut self, message: ListenResponse) -> Result<bool, FirestoreError> {
        if let Some(filter) = &message.filter {
            let held = self.documents.len();
            if filter.target_id == TARGET_ID && usize::try_from(filter.count).ok() != Some(held) {
                return Err(FirestoreError::ListenError(format!(
                    "existence filter mismatch: server has {} documents, {} held",
                    filter.count, held
                )));
            }
        }

        if let Some(change) = message.target_change {
            match change.target_change_type {
                TargetChangeType::Add => {}
                TargetChangeType::Remove => {
                    let reason = change
                        .cause
                        .map(|c| format!("{} (code: {})", c.message, c.code))
                        .unwrap_or_else(|| "target removed by server".to_string());
                    return Err(FirestoreError::ListenError(reason));
                }
                TargetChangeType::Reset => {
                    self.documents.clear();
                    self.current = false;
                    self.dirty = true;
                }
                TargetChangeType::Current => {
                    self.current = true;
                    self.dirty = false;
                    return Ok(true);
                }
                TargetChangeType::NoChange => {
                    if change.target_ids.is_empty() && self.current && self.dirty {
                        self.dirty = false;
                        return Ok(true);
                    }
                }
            }
        }

        if let Some(change) = message.document_change {
            if change.removed_target_ids.contains(&TARGET_ID) {
                self.documents.remove(&change.document.name);
            } else if change.target_ids.contains(&TARGET_ID) {
                self.documents
                    .insert(change.document.name.clone(), change.document);
            }
            self.dirty = true;
        }

        for removed in [message.document_delete, message.document_remove]
            .into_iter()
            .flatten()
        {
            self.documents.remove(&removed.document);
            self.dirty = true;
        }

        Ok(false)
    }

    fn records(&self) -> Result<Vec<DocumentRecord>, FirestoreError> {
        self.documents
            .values()
            .cloned()
            .map(document_to_record)
            .collect()
    }

    pub(crate) fn query_snapshot(
        &self,
        query: &QuerySpec,
    ) -> Result<Vec<DocumentRecord>, FirestoreError> {
        Ok(query.arrange(self.records()?))
    }

    pub(crate) fn document_snapshot(&self) -> Result<Option<DocumentRecord>, FirestoreError> {
        Ok(self.records()?.into_iter().next())
    }
}

/// Feeds a listen stream into `sender` until the stream ends, fails or the
/// receiving side goes away. Failures end the subscription.
pub(crate) async fn pump<T, F>(
    mut stream: ListenStream,
    sender: mpsc::UnboundedSender<T>,
    target: String,
    mut snapshot: F,
) where
    F: FnMut(&WatchState) -> Result<T, FirestoreError>,
{
    let mut state = WatchState::default();

    while let Some(message) = stream.next().await {
        let ready = match message.and_then(|m| state.apply(m)) {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "listen stream failed");
                return;
            }
        };
        if !ready {
            continue;
        }
        match snapshot(&state) {
            Ok(event) => {
                if sender.send(event).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "listen snapshot could not be decoded");
                return;
            }
        }
    }

    tracing::debug!(target = %target, "listen stream closed by server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::query::Direction;
    use serde_json::json;

    #[test]
    fn test_find_message() {
        // Simple object
        let buf = br#"{"a":1}"#;
        assert_eq!(find_message(buf), Some((0, 7)));

        // Array framing and whitespace
        let buf = b"[ {\"a\":1}\n,{\"b\":2}]";
        assert_eq!(find_message(buf), Some((2, 9)));

        // Nested object
        let buf = br#"{"a":{"b":2}}"#;
        assert_eq!(find_message(buf), Some((0, 13)));

        // Incomplete
        let buf = br#"[{"a":1"#;
        assert_eq!(find_message(buf), None);

        // String with braces
        let buf = br#"{"a":"}"}"#;
        assert_eq!(find_message(buf), Some((0, 9)));

        // Escaped quote
        let buf = br#"{"a":"\"}"}"#;
        assert_eq!(find_message(buf), Some((0, 11)));

        // Inner array
        let buf = br#",{"a":[1,2]}"#;
        assert_eq!(find_message(buf), Some((1, 12)));

        // Only punctuation
        assert_eq!(find_message(b" ]\n"), None);
    }

    #[tokio::test]
    async fn test_stream_splits_chunked_array() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"[{\"targetChange\":{\"targetChange")),
            Ok(Bytes::from_static(b"Type\":\"ADD\",\"targetIds\":[1]}}\n,")),
            Ok(Bytes::from_static(b"{\"targetChange\":{\"targetChangeType\":\"CURRENT\"}}]")),
        ];
        let mut stream = ListenStream::new(Box::pin(stream::iter(chunks)));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first.target_change.unwrap().target_change_type,
            TargetChangeType::Add
        );
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(
            second.target_change.unwrap().target_change_type,
            TargetChangeType::Current
        );
        assert!(stream.next().await.is_none());
    }

    fn message(value: serde_json::Value) -> ListenResponse {
        serde_json::from_value(value).unwrap()
    }

    fn doc_change(id: &str, created: &str) -> ListenResponse {
        message(json!({
            "documentChange": {
                "document": {
                    "name": format!("projects/p/databases/(default)/documents/users/{}", id),
                    "fields": { "createdAt": { "timestampValue": created } },
                    "createTime": created,
                    "updateTime": created
                },
                "targetIds": [1]
            }
        }))
    }

    #[test]
    fn test_watch_state_emits_on_current_and_global_no_change() {
        let mut state = WatchState::default();
        let query = QuerySpec::new("users").order_by("createdAt", Direction::Descending);

        assert!(!state
            .apply(message(json!({"targetChange": {"targetChangeType": "ADD", "targetIds": [1]}})))
            .unwrap());
        assert!(!state.apply(doc_change("a", "2024-01-01T00:00:00Z")).unwrap());
        assert!(state
            .apply(message(json!({"targetChange": {"targetChangeType": "CURRENT", "targetIds": [1]}})))
            .unwrap());
        // Global consistency marker with nothing new: no duplicate snapshot.
        assert!(!state
            .apply(message(json!({"targetChange": {"readTime": "2024-01-01T00:00:01Z"}})))
            .unwrap());

        assert!(!state.apply(doc_change("b", "2024-01-02T00:00:00Z")).unwrap());
        assert!(state
            .apply(message(json!({"targetChange": {"readTime": "2024-01-02T00:00:01Z"}})))
            .unwrap());

        let ids: Vec<_> = state
            .query_snapshot(&query)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["b", "a"]);

        state
            .apply(message(json!({
                "documentDelete": {
                    "document": "projects/p/databases/(default)/documents/users/b",
                    "removedTargetIds": [1]
                }
            })))
            .unwrap();
        assert_eq!(state.query_snapshot(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_watch_state_target_removal_is_an_error() {
        let mut state = WatchState::default();
        let err = state
            .apply(message(json!({
                "targetChange": {
                    "targetChangeType": "REMOVE",
                    "targetIds": [1],
                    "cause": { "code": 7, "message": "Missing or insufficient permissions." }
                }
            })))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Listen failed: Missing or insufficient permissions. (code: 7)"
        );
    }

    #[test]
    fn test_watch_state_checks_existence_filter() {
        let mut state = WatchState::default();
        state
            .apply(message(json!({"targetChange": {"targetChangeType": "ADD", "targetIds": [1]}})))
            .unwrap();
        state.apply(doc_change("a", "2024-01-01T00:00:00Z")).unwrap();
        state.apply(doc_change("b", "2024-01-02T00:00:00Z")).unwrap();

        // Matching count, or a filter for another target, changes nothing.
        assert!(!state
            .apply(message(json!({"filter": {"targetId": 1, "count": 2}})))
            .unwrap());
        assert!(!state
            .apply(message(json!({"filter": {"targetId": 9, "count": 0}})))
            .unwrap());

        let err = state
            .apply(message(json!({"filter": {"targetId": 1, "count": 1}})))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Listen failed: existence filter mismatch: server has 1 documents, 2 held"
        );
    }
}
