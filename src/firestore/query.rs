use super::convert::field_to_value;
use super::models::{
    CollectionSelector, CompositeFilter, FieldFilter as WireFieldFilter, FieldReference, Filter,
    Order as WireOrder, StructuredQuery,
};
use super::snapshot::DocumentRecord;
use super::value::FieldValue;
use std::cmp::Ordering;

/// Sort direction of an `order_by` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Ascending => "ASCENDING",
            Self::Descending => "DESCENDING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl FieldOperator {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::LessThan => "LESS_THAN",
            Self::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        }
    }

    /// Whether `actual` (the document's value) satisfies the filter. Range
    /// comparisons only match values of the same type; `NotEqual` never
    /// matches null.
    fn matches(self, actual: &FieldValue, expected: &FieldValue) -> bool {
        let ordering = actual.firestore_cmp(expected);
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => !actual.is_null() && ordering != Ordering::Equal,
            _ if actual.type_rank() != expected.type_rank() => false,
            Self::LessThan => ordering == Ordering::Less,
            Self::LessThanOrEqual => ordering != Ordering::Greater,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: FieldOperator,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// A query over one collection: conjunctive field filters, sort clauses and
/// a result cap.
///
/// Stores translate it to their own query language; [`QuerySpec::evaluate`]
/// runs it over records held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Vec<Order>,
    pub limit: Option<u32>,
}

impl QuerySpec {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_filter(
        mut self,
        field: &str,
        op: FieldOperator,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.filters.push(FieldFilter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.where_filter(field, FieldOperator::Equal, value)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(Order {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parent path of the collection relative to the documents root and the
    /// collection id itself. `users/u1/posts` splits into `users/u1` and `posts`.
    pub(crate) fn split_collection(&self) -> (Option<&str>, &str) {
        match self.collection.rsplit_once('/') {
            Some((parent, id)) => (Some(parent), id),
            None => (None, self.collection.as_str()),
        }
    }

    pub(crate) fn to_structured_query(&self) -> StructuredQuery {
        let (_, collection_id) = self.split_collection();

        let mut filters: Vec<Filter> = self
            .filters
            .iter()
            .map(|f| {
                Filter::FieldFilter(WireFieldFilter {
                    field: FieldReference {
                        field_path: quote_field_path(&f.field),
                    },
                    op: f.op.wire_name(),
                    value: field_to_value(&f.value),
                })
            })
            .collect();

        let where_clause = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::CompositeFilter(CompositeFilter {
                op: "AND",
                filters,
            })),
        };

        StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: collection_id.to_string(),
            }],
            where_clause,
            order_by: self
                .order_by
                .iter()
                .map(|o| WireOrder {
                    field: FieldReference {
                        field_path: quote_field_path(&o.field),
                    },
                    direction: o.direction.wire_name(),
                })
                .collect(),
            limit: self.limit,
        }
    }

    /// Whether a document passes every filter and has every ordered field.
    pub fn matches(&self, record: &DocumentRecord) -> bool {
        self.filters.iter().all(|f| {
            record
                .get(&f.field)
                .is_some_and(|actual| f.op.matches(actual, &f.value))
        }) && self
            .order_by
            .iter()
            .all(|o| record.fields.contains_key(&o.field))
    }

    /// Sorts by the order clauses, then by document id, and applies the limit.
    pub fn arrange(&self, mut records: Vec<DocumentRecord>) -> Vec<DocumentRecord> {
        let tie_break = self
            .order_by
            .last()
            .map(|o| o.direction)
            .unwrap_or_default();

        records.sort_by(|a, b| {
            for order in &self.order_by {
                let ord = match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => x.firestore_cmp(y),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                let ord = match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            match tie_break {
                Direction::Ascending => a.id.cmp(&b.id),
                Direction::Descending => b.id.cmp(&a.id),
            }
        });

        if let Some(limit) = self.limit {
            records.truncate(limit as usize);
        }
        records
    }

    /// Filters, sorts and limits `records` the way the store would.
    pub fn evaluate<'a>(
        &self,
        records: impl IntoIterator<Item = &'a DocumentRecord>,
    ) -> Vec<DocumentRecord> {
        let matching = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        self.arrange(matching)
    }
}

/// Quotes a field name for use as a field path when it is not a plain
/// identifier.
pub(crate) fn quote_field_path(field: &str) -> String {
    let mut chars = field.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::value::Fields;
    use serde_json::json;

    fn record(id: &str, fields: &[(&str, FieldValue)]) -> DocumentRecord {
        DocumentRecord::new(
            id,
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<Fields>(),
        )
    }

    #[test]
    fn test_structured_query_shape() {
        let query = QuerySpec::new("users")
            .where_eq("status", "active")
            .order_by("createdAt", Direction::Descending)
            .limit(10);

        let wire = serde_json::to_value(query.to_structured_query()).unwrap();

        assert_eq!(
            wire,
            json!({
                "from": [{ "collectionId": "users" }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "status" },
                        "op": "EQUAL",
                        "value": { "stringValue": "active" }
                    }
                },
                "orderBy": [
                    { "field": { "fieldPath": "createdAt" }, "direction": "DESCENDING" }
                ],
                "limit": 10
            })
        );
    }

    #[test]
    fn test_multiple_filters_become_composite() {
        let query = QuerySpec::new("users/u1/posts")
            .where_eq("draft", false)
            .where_filter("likes", FieldOperator::GreaterThan, 3);

        let wire = serde_json::to_value(query.to_structured_query()).unwrap();

        assert_eq!(wire["from"], json!([{ "collectionId": "posts" }]));
        assert_eq!(wire["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            wire["where"]["compositeFilter"]["filters"][1]["fieldFilter"]["op"],
            "GREATER_THAN"
        );
        assert_eq!(query.split_collection(), (Some("users/u1"), "posts"));
    }

    #[test]
    fn test_quote_field_path() {
        assert_eq!(quote_field_path("createdAt"), "createdAt");
        assert_eq!(quote_field_path("_private1"), "_private1");
        assert_eq!(quote_field_path("first name"), "`first name`");
        assert_eq!(quote_field_path("a.b"), "`a.b`");
        assert_eq!(quote_field_path("tick`"), "`tick\\``");
    }

    #[test]
    fn test_evaluate_filters_orders_and_limits() {
        let records = vec![
            record("a", &[("status", "active".into()), ("rank", 2.into())]),
            record("b", &[("status", "inactive".into()), ("rank", 5.into())]),
            record("c", &[("status", "active".into()), ("rank", 9.into())]),
            record("d", &[("status", "active".into())]),
            record("e", &[("status", "active".into()), ("rank", 7.5.into())]),
        ];

        let result = QuerySpec::new("users")
            .where_eq("status", "active")
            .order_by("rank", Direction::Descending)
            .limit(2)
            .evaluate(&records);

        let ids: Vec<_> = result.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "e"]);
    }

    #[test]
    fn test_range_filters_only_match_same_type() {
        let records = vec![
            record("n", &[("v", 10.into())]),
            record("s", &[("v", "10".into())]),
            record("z", &[("v", FieldValue::Null)]),
        ];

        let greater = QuerySpec::new("c")
            .where_filter("v", FieldOperator::GreaterThanOrEqual, 1)
            .evaluate(&records);
        assert_eq!(greater.len(), 1);
        assert_eq!(greater[0].id, "n");

        let not_equal = QuerySpec::new("c")
            .where_filter("v", FieldOperator::NotEqual, 10)
            .evaluate(&records);
        let ids: Vec<_> = not_equal.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["s"]);
    }

    #[test]
    fn test_integer_and_double_compare_numerically() {
        let records = vec![record("x", &[("v", 1.0.into())])];
        let matched = QuerySpec::new("c").where_eq("v", 1).evaluate(&records);
        assert_eq!(matched.len(), 1);
    }
}
