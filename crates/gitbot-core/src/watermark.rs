//! Watermark reconciliation: picks the feed entries that are new since the
//! last successful poll and advances the per-resource dedup state.
//!
//! Numeric ids compare strictly (`new > watermark`). Timestamps compare
//! inclusively (`new >= watermark`) because the feed's one-second
//! granularity lets several entries share a timestamp; an entry seen before
//! a restart can therefore be emitted again when it shares the watermark's
//! timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventRecord, MalformedEntry};
use crate::fetch::FetchResult;
use crate::resource::TrackedResource;

/// Identifier of the most recently processed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Watermark {
    Id(u64),
    Timestamp(DateTime<Utc>),
}

/// Which identifier a resource's watermark is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    #[default]
    Id,
    Timestamp,
}

impl Watermark {
    pub fn kind(&self) -> WatermarkKind {
        match self {
            Self::Id(_) => WatermarkKind::Id,
            Self::Timestamp(_) => WatermarkKind::Timestamp,
        }
    }

    /// Read this kind of identifier off an entry.
    pub fn of(kind: WatermarkKind, event: &EventRecord) -> Result<Self, MalformedEntry> {
        match kind {
            WatermarkKind::Id => event
                .id()
                .present()
                .map(Self::Id)
                .ok_or(MalformedEntry::MissingIdentifier("id")),
            WatermarkKind::Timestamp => event
                .created_at()
                .present()
                .map(Self::Timestamp)
                .ok_or(MalformedEntry::MissingIdentifier("created_at")),
        }
    }

    /// Whether `self` qualifies as new relative to `previous`.
    pub fn is_newer_than(&self, previous: &Watermark) -> bool {
        match (self, previous) {
            (Self::Id(new), Self::Id(old)) => new > old,
            (Self::Timestamp(new), Self::Timestamp(old)) => new >= old,
            _ => false,
        }
    }
}

/// Output of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// New entries, oldest first.
    pub events: Vec<EventRecord>,
    pub resource: TrackedResource,
}

/// Compute the entries of `result` that are new for `resource`, plus the
/// resource's updated dedup state. `resource` itself is left untouched.
pub fn reconcile(resource: &TrackedResource, result: &FetchResult) -> Reconciled {
    let unchanged = || Reconciled {
        events: Vec::new(),
        resource: resource.clone(),
    };

    let FetchResult::Fresh {
        change_token,
        entries,
        ..
    } = result
    else {
        return unchanged();
    };

    if resource.change_token.is_some() && *change_token == resource.change_token {
        tracing::debug!(
            repo = %resource.full_name(),
            "Fresh response carried the stored change token, skipping"
        );
        return unchanged();
    }

    let kind = resource
        .watermark
        .map(|w| w.kind())
        .unwrap_or(resource.watermark_kind);
    let mut watermark = resource.watermark;
    let mut events = Vec::new();

    // The feed is newest-first; walk it oldest-first.
    for raw in entries.iter().rev() {
        let event = EventRecord::new(raw.clone());
        let id = match Watermark::of(kind, &event) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    repo = %resource.full_name(),
                    error = %e,
                    "Skipping malformed feed entry"
                );
                continue;
            },
        };
        if watermark.is_none_or(|w| id.is_newer_than(&w)) {
            watermark = Some(id);
            events.push(event);
        }
    }

    let mut updated = resource.clone();
    updated.change_token = change_token.clone();
    updated.watermark = watermark;

    Reconciled {
        events,
        resource: updated,
    }
}
