use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rendering used for any field the feed left out.
pub const ABSENT: &str = "(unknown)";

/// Result of looking up a field that may not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Present(T),
    Absent,
}

impl<T> Field<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn present(self) -> Option<T> {
        match self {
            Self::Present(v) => Some(v),
            Self::Absent => None,
        }
    }

    /// Use `other` when this field is absent.
    pub fn or(self, other: Field<T>) -> Field<T> {
        match self {
            Self::Present(_) => self,
            Self::Absent => other,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Present(v) => Field::Present(f(v)),
            Self::Absent => Field::Absent,
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Option<U>) -> Field<U> {
        match self {
            Self::Present(v) => f(v).into(),
            Self::Absent => Field::Absent,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Present(v) => v,
            Self::Absent => default,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Present(v),
            None => Self::Absent,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(v) => v.fmt(f),
            Self::Absent => f.write_str(ABSENT),
        }
    }
}

/// Cursor into a JSON document. Walking past a missing key, a null, or a
/// non-container yields an empty cursor instead of failing.
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    value: Option<&'a Value>,
}

impl<'a> Node<'a> {
    fn new(value: Option<&'a Value>) -> Self {
        Self {
            value: value.filter(|v| !v.is_null()),
        }
    }

    /// Follow a dotted path such as `payload.pull_request.html_url`.
    /// Numeric segments index into arrays.
    pub fn get(&self, path: &str) -> Node<'a> {
        path.split('.')
            .filter(|seg| !seg.is_empty())
            .fold(*self, |node, seg| node.child(seg))
    }

    fn child(&self, segment: &str) -> Node<'a> {
        let next = match self.value {
            Some(Value::Object(map)) => map.get(segment),
            Some(Value::Array(items)) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        Node::new(next)
    }

    pub fn value(&self) -> Field<&'a Value> {
        self.value.into()
    }

    pub fn str(&self) -> Field<&'a str> {
        self.value.and_then(Value::as_str).into()
    }

    /// Numeric value; numeric strings (GitHub sends event ids as strings)
    /// are accepted too.
    pub fn u64(&self) -> Field<u64> {
        match self.value {
            Some(Value::Number(n)) => n.as_u64().into(),
            Some(Value::String(s)) => s.parse().ok().into(),
            _ => Field::Absent,
        }
    }

    pub fn bool(&self) -> Field<bool> {
        self.value.and_then(Value::as_bool).into()
    }

    pub fn timestamp(&self) -> Field<DateTime<Utc>> {
        self.str().and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    /// Array elements, or nothing when the field is absent or not an array.
    pub fn items(&self) -> Vec<Node<'a>> {
        match self.value {
            Some(Value::Array(items)) => items.iter().map(|v| Node::new(Some(v))).collect(),
            _ => Vec::new(),
        }
    }
}

/// Why a feed entry could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEntry {
    #[error("feed entry is not a JSON object")]
    NotAnObject,
    #[error("feed entry has no usable {0}")]
    MissingIdentifier(&'static str),
}

/// A feed entry exactly as the upstream delivered it. Always a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct RawEvent(Value);

impl RawEvent {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl TryFrom<Value> for RawEvent {
    type Error = MalformedEntry;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(MalformedEntry::NotAnObject)
        }
    }
}

impl From<RawEvent> for Value {
    fn from(raw: RawEvent) -> Self {
        raw.0
    }
}

/// Field-tolerant view over a [`RawEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    raw: RawEvent,
}

impl EventRecord {
    pub fn new(raw: RawEvent) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &RawEvent {
        &self.raw
    }

    pub fn root(&self) -> Node<'_> {
        Node::new(Some(self.raw.as_value()))
    }

    pub fn get(&self, path: &str) -> Node<'_> {
        self.root().get(path)
    }

    /// Type discriminator, e.g. `PushEvent`.
    pub fn event_type(&self) -> Field<&str> {
        self.get("type").str()
    }

    pub fn id(&self) -> Field<u64> {
        self.get("id").u64()
    }

    pub fn created_at(&self) -> Field<DateTime<Utc>> {
        self.get("created_at").timestamp()
    }

    pub fn action(&self) -> Field<&str> {
        self.get("payload.action").str()
    }

    pub fn repo_name(&self) -> Field<&str> {
        self.get("repo.name").str()
    }

    /// Display login when the feed has one, plain login otherwise.
    pub fn actor(&self) -> Field<&str> {
        self.get("actor.display_login")
            .str()
            .or(self.get("actor.login").str())
    }
}

impl From<RawEvent> for EventRecord {
    fn from(raw: RawEvent) -> Self {
        Self::new(raw)
    }
}
