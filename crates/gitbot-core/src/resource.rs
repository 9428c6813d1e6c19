use serde::{Deserialize, Serialize};

use crate::watermark::{Watermark, WatermarkKind};

/// Identifier of a destination chat channel.
pub type ChannelId = String;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("not a valid repo format, expected OWNER/REPO: {0:?}")]
    InvalidFormat(String),
}

/// One remote feed plus the dedup state and subscriptions attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChannelId>,
    /// Event types to deliver. `None` or empty delivers everything.
    #[serde(default)]
    pub events: Option<Vec<String>>,
    /// Last `ETag` the feed answered with.
    #[serde(default)]
    pub change_token: Option<String>,
    /// Comparison used until the first watermark is stored.
    #[serde(default)]
    pub watermark_kind: WatermarkKind,
    #[serde(default)]
    pub watermark: Option<Watermark>,
}

impl TrackedResource {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            channels: Vec::new(),
            events: None,
            change_token: None,
            watermark_kind: WatermarkKind::default(),
            watermark: None,
        }
    }

    /// Parse `owner/repo` into its two halves.
    pub fn parse_full_name(full_name: &str) -> Result<(String, String), ResourceError> {
        let invalid = || ResourceError::InvalidFormat(full_name.to_string());
        let (owner, name) = full_name.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok((owner.to_string(), name.to_string()))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Whether both values describe the same upstream feed.
    pub fn same_feed(&self, owner: &str, name: &str) -> bool {
        self.owner.eq_ignore_ascii_case(owner) && self.name.eq_ignore_ascii_case(name)
    }

    /// Whether an event of this type passes the allow-list.
    pub fn accepts(&self, event_type: Option<&str>) -> bool {
        match self.events.as_deref() {
            None | Some([]) => true,
            Some(allowed) => event_type.is_some_and(|t| allowed.iter().any(|a| a == t)),
        }
    }
}
