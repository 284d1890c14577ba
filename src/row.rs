// ABOUTME: Typed row model shared by the store drivers and the sync engine
// ABOUTME: Tagged field values, ordered rows, row keys, and comparison normalization

use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

/// Format used when a timestamp is rendered as text (ISO-8601, no zone).
///
/// Fractional seconds are printed only when present.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Format used when a calendar date is rendered as text.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Text layouts accepted when parsing a timestamp out of a text column.
const TIMESTAMP_INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single field value as read from either store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reduce the value to the form used for cross-store comparison.
    ///
    /// Temporal values keep their parsed form, so a native timestamp on one
    /// side equals any parseable text layout of the same instant on the other.
    pub fn normalized(&self) -> Normalized {
        match self {
            Value::Null => Normalized::Null,
            Value::Int(i) => Normalized::Int(*i),
            Value::Float(f) => Normalized::Float(*f),
            Value::Bool(b) => Normalized::Bool(*b),
            Value::Text(s) => Normalized::Text(s.clone()),
            Value::Timestamp(ts) => Normalized::Timestamp(*ts),
            Value::Date(d) => Normalized::Date(*d),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(true),
                "false" | "f" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::Text(s) => parse_date(s).or_else(|| parse_timestamp(s).map(|ts| ts.date())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Timestamp(ts) => write!(f, "{}", format_timestamp(ts)),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Comparison form of a [`Value`].
///
/// Numbers compare by numeric value across `Int`, `Float` and `Bool`, so a
/// store that keeps booleans as 0/1 or integers as reals does not produce
/// spurious differences. Text never equals a number.
///
/// Timestamps and dates equal text that parses to the same instant, so a
/// DATETIME column on one side and a TEXT column on the other converge. Two
/// texts always compare verbatim.
#[derive(Debug, Clone)]
pub enum Normalized {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl Normalized {
    fn numeric(&self) -> Option<f64> {
        match self {
            Normalized::Int(i) => Some(*i as f64),
            Normalized::Float(f) => Some(*f),
            Normalized::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn instant(&self) -> Option<NaiveDateTime> {
        match self {
            Normalized::Timestamp(ts) => Some(*ts),
            Normalized::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }
}

impl PartialEq for Normalized {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Normalized::Null, Normalized::Null) => true,
            (Normalized::Text(a), Normalized::Text(b)) => a == b,
            (Normalized::Timestamp(a), Normalized::Timestamp(b)) => a == b,
            (Normalized::Date(a), Normalized::Date(b)) => a == b,
            (
                Normalized::Timestamp(_) | Normalized::Date(_),
                Normalized::Timestamp(_) | Normalized::Date(_),
            ) => self.instant() == other.instant(),
            (Normalized::Timestamp(ts), Normalized::Text(s))
            | (Normalized::Text(s), Normalized::Timestamp(ts)) => parse_timestamp(s) == Some(*ts),
            (Normalized::Date(d), Normalized::Text(s)) | (Normalized::Text(s), Normalized::Date(d)) => {
                parse_timestamp(s) == d.and_hms_opt(0, 0, 0)
            }
            (Normalized::Int(a), Normalized::Int(b)) => a == b,
            (Normalized::Bool(a), Normalized::Bool(b)) => a == b,
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

/// Render a timestamp in the canonical ISO-8601 text form.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a bare `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// Parse a timestamp out of text, accepting ISO-8601 and the space-separated
/// layout SQLite uses for `CURRENT_TIMESTAMP`. A bare date parses as midnight.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in TIMESTAMP_INPUT_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    parse_date(text).and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// The value of a row's key field, in canonical text form.
///
/// `Int(1)`, `Float(1.0)` and `Text("1")` all index as `"1"`, so keys match
/// across stores that type the key column differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(String);

impl RowKey {
    /// Build a key from a field value. `Null` cannot be a key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            other => Some(RowKey(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered mapping from field name to value.
///
/// Fields keep the column order of the source query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Set a field, keeping its original position when it already exists.
    ///
    /// Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The row's key for `key_field`, or `None` when the field is missing or null.
    pub fn key(&self, key_field: &str) -> Option<RowKey> {
        self.get(key_field).and_then(RowKey::from_value)
    }

    /// A copy of this row without `field`.
    pub fn without(&self, field: &str) -> Row {
        Row {
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| name != field)
                .cloned()
                .collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
