use super::value::{FieldValue, Fields};
use super::FirestoreError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// A document read from the store.
///
/// Serializes as a single object: the `id` followed by the document's fields
/// (a field named `id` overrides the document id in that view).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub fields: Fields,
    /// When the store created the document, if it reports it.
    pub create_time: Option<DateTime<Utc>>,
    /// When the store last changed the document, if it reports it.
    pub update_time: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            create_time: None,
            update_time: None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// The record as a JSON object with the id merged into the fields.
    pub fn to_json(&self) -> Result<serde_json::Value, FirestoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes the merged JSON view into `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, FirestoreError> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }
}

impl Serialize for DocumentRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let shadowed = self.fields.contains_key("id");
        let len = self.fields.len() + usize::from(!shadowed);
        let mut map = serializer.serialize_map(Some(len))?;
        if !shadowed {
            map.serialize_entry("id", &self.id)?;
        }
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A write payload plus the fields the store must set to its own clock.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentWrite {
    pub fields: Fields,
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            server_timestamps: Vec::new(),
        }
    }

    /// Marks `field` as a server timestamp. Any caller-supplied value for the
    /// field is dropped.
    pub fn with_server_timestamp(mut self, field: &str) -> Self {
        self.fields.remove(field);
        if !self.server_timestamps.iter().any(|f| f == field) {
            self.server_timestamps.push(field.to_string());
        }
        self
    }

    /// Fields with every server timestamp set to `now`.
    pub(crate) fn resolve(&self, now: DateTime<Utc>) -> Fields {
        let mut fields = self.fields.clone();
        for field in &self.server_timestamps {
            fields.insert(field.clone(), FieldValue::Timestamp(now));
        }
        fields
    }
}

/// Identifier assigned to a newly added document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentId {
    pub id: String,
}
