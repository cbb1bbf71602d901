//! Bulk-read filters for remote collections.
//!
//! A `QueryFilter` is handed to `RemoteDataService::query` as-is; hosts map it
//! onto their backend's query language. `apply` evaluates the same filter
//! locally, which is how cached snapshots are narrowed while offline.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::Record;

/// Half-open time window `[from, to)` over an RFC 3339 timestamp field.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub field: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    /// Field equality constraints, all of which must hold.
    pub eq: Vec<(String, Value)>,
    pub range: Option<TimeRange>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((field.into(), value.into()));
        self
    }

    pub fn between(
        mut self,
        field: impl Into<String>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.range = Some(TimeRange {
            field: field.into(),
            from,
            to,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a single record passes the equality and time-range constraints.
    /// A record whose range field is missing or unparsable never matches.
    pub fn matches(&self, record: &Record) -> bool {
        let eq_ok = self
            .eq
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected));
        if !eq_ok {
            return false;
        }

        let Some(range) = &self.range else {
            return true;
        };
        let Some(at) = record
            .get(&range.field)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            return false;
        };
        range.from.map_or(true, |from| at >= from) && range.to.map_or(true, |to| at < to)
    }

    /// Filter, order and truncate a set of records.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(order) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Total order used for sorting: missing/null first, then numbers, then
/// strings, then everything else by its JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => match rank(a).cmp(&rank(b)) {
            Ordering::Equal => {
                let x = a.map(Value::to_string).unwrap_or_default();
                let y = b.map(Value::to_string).unwrap_or_default();
                x.cmp(&y)
            }
            other => other,
        },
    }
}
