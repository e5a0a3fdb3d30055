// Conversions between the wire `Value` representation and `FieldValue`.

use super::models::{ArrayValue, Document, MapValue, Value};
use super::snapshot::DocumentRecord;
use super::value::{format_timestamp, FieldValue, Fields};
use super::FirestoreError;
use chrono::{DateTime, Utc};
use serde::de::Error;
use std::collections::BTreeMap;

fn invalid(message: String) -> FirestoreError {
    FirestoreError::SerializationError(<serde_json::Error as Error>::custom(message))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, FirestoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| invalid(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

pub(crate) fn value_to_field(value: Value) -> Result<FieldValue, FirestoreError> {
    Ok(match value {
        Value::NullValue(_) => FieldValue::Null,
        Value::BooleanValue(b) => FieldValue::Boolean(b),
        Value::IntegerValue(s) => FieldValue::Integer(
            s.parse()
                .map_err(|e| invalid(format!("Failed to parse integer string '{}': {}", s, e)))?,
        ),
        Value::DoubleValue(d) => FieldValue::Double(d),
        Value::TimestampValue(s) => FieldValue::Timestamp(parse_timestamp(&s)?),
        Value::StringValue(s) | Value::BytesValue(s) | Value::ReferenceValue(s) => {
            FieldValue::String(s)
        }
        Value::GeoPointValue(gp) => FieldValue::Map(BTreeMap::from([
            ("latitude".to_string(), FieldValue::Double(gp.latitude)),
            ("longitude".to_string(), FieldValue::Double(gp.longitude)),
        ])),
        Value::ArrayValue(array) => FieldValue::Array(
            array
                .values
                .into_iter()
                .map(value_to_field)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::MapValue(map) => FieldValue::Map(wire_to_fields(map.fields)?),
    })
}

pub(crate) fn wire_to_fields(fields: BTreeMap<String, Value>) -> Result<Fields, FirestoreError> {
    fields
        .into_iter()
        .map(|(k, v)| Ok((k, value_to_field(v)?)))
        .collect()
}

pub(crate) fn field_to_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::NullValue(None),
        FieldValue::Boolean(b) => Value::BooleanValue(*b),
        FieldValue::Integer(i) => Value::IntegerValue(i.to_string()),
        FieldValue::Double(d) => Value::DoubleValue(*d),
        FieldValue::Timestamp(ts) => Value::TimestampValue(format_timestamp(ts)),
        FieldValue::String(s) => Value::StringValue(s.clone()),
        FieldValue::Array(values) => Value::ArrayValue(ArrayValue {
            values: values.iter().map(field_to_value).collect(),
        }),
        FieldValue::Map(fields) => Value::MapValue(MapValue {
            fields: fields_to_wire(fields),
        }),
    }
}

pub(crate) fn fields_to_wire(fields: &Fields) -> BTreeMap<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), field_to_value(v)))
        .collect()
}

/// Last path segment of a document resource name.
pub(crate) fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

pub(crate) fn document_to_record(doc: Document) -> Result<DocumentRecord, FirestoreError> {
    let create_time = doc.create_time.as_deref().map(parse_timestamp).transpose()?;
    let update_time = doc.update_time.as_deref().map(parse_timestamp).transpose()?;
    Ok(DocumentRecord {
        id: document_id(&doc.name).to_string(),
        fields: wire_to_fields(doc.fields)?,
        create_time,
        update_time,
    })
}
