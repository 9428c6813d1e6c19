//! Chat commands: `register`, `unregister`, `list`, and the usage text for
//! anything else.

use std::sync::Arc;

use gitbot_core::fetch::{FetchError, FetchResult};
use gitbot_core::resource::TrackedResource;
use gitbot_core::watermark::{WatermarkKind, reconcile};
use gitbot_github::ChangeTokenFetcher;

use crate::registry::FileRegistry;

pub const USAGE: &str = "```
Usage:
  @gitbot register REPO [EVENT]...
    Register a repo for updates, by default all events will trigger an update
  @gitbot unregister REPO
    Unregister a repo
  @gitbot list
    List repos that are registered

REPO should be in the form OWNER/REPOSITORY
```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { repo: String, events: Vec<String> },
    Unregister { repo: String },
    List,
    /// A known verb without its repo argument.
    MissingRepo,
    Help,
}

impl Command {
    /// Parse a chat message. Leading mentions (`<@123>`, `@gitbot`) are
    /// ignored and the verb is case-insensitive.
    pub fn parse(text: &str) -> Self {
        let mut words = text
            .split_whitespace()
            .skip_while(|w| w.starts_with("<@") || w.starts_with('@'));
        let Some(verb) = words.next() else {
            return Self::Help;
        };

        match verb.to_ascii_lowercase().as_str() {
            "register" | "add" => match words.next() {
                Some(repo) => Self::Register {
                    repo: repo.to_string(),
                    events: words.map(String::from).collect(),
                },
                None => Self::MissingRepo,
            },
            "unregister" | "remove" => match words.next() {
                Some(repo) => Self::Unregister {
                    repo: repo.to_string(),
                },
                None => Self::MissingRepo,
            },
            "list" => Self::List,
            _ => Self::Help,
        }
    }
}

/// Runs parsed commands against the registry for one channel at a time.
#[derive(Clone)]
pub struct CommandHandler {
    registry: Arc<FileRegistry>,
    fetcher: Arc<ChangeTokenFetcher>,
    github_token: Option<String>,
    watermark_kind: WatermarkKind,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<FileRegistry>,
        fetcher: Arc<ChangeTokenFetcher>,
        github_token: Option<String>,
        watermark_kind: WatermarkKind,
    ) -> Self {
        Self {
            registry,
            fetcher,
            github_token,
            watermark_kind,
        }
    }

    /// Execute `command` on behalf of `channel` and return the reply text.
    pub async fn execute(&self, channel: &str, command: Command) -> String {
        match command {
            Command::Register { repo, events } => {
                match self.register(channel, &repo, events).await {
                    Ok(full_name) => format!("Added repo {full_name}"),
                    Err(reason) => format!("Could not add repo, {reason}"),
                }
            },
            Command::Unregister { repo } => match self.registry.unregister(&repo, channel).await {
                Ok(()) => format!("Removed repo {repo}"),
                Err(e) => format!("Could not remove repo, {e}"),
            },
            Command::List => {
                let repos = self.registry.list(channel).await;
                if repos.is_empty() {
                    "There are no repos active in this channel".to_string()
                } else {
                    format!(
                        "The following repos are active in this channel:\n{}",
                        repos.join("\n")
                    )
                }
            },
            Command::MissingRepo => "You need to specify a repo".to_string(),
            Command::Help => USAGE.to_string(),
        }
    }

    /// Verify the repo exists and prime its change token and watermark with
    /// one fetch. The fetched events are discarded so registration never
    /// replays history into the channel.
    async fn register(
        &self,
        channel: &str,
        repo: &str,
        events: Vec<String>,
    ) -> Result<String, String> {
        let (owner, name) = TrackedResource::parse_full_name(repo).map_err(|e| e.to_string())?;
        if self.registry.is_registered(&owner, &name, channel).await {
            return Err("repo already added".to_string());
        }

        let mut candidate = TrackedResource::new(owner, name);
        candidate.watermark_kind = self.watermark_kind;
        candidate.events = (!events.is_empty()).then_some(events);

        let result = self
            .fetcher
            .fetch(&candidate, self.github_token.as_deref())
            .await;
        let primed = match result {
            FetchResult::Error(FetchError::NotFound) => {
                return Err("it does not exist".to_string());
            },
            FetchResult::Error(e) => return Err(e.to_string()),
            FetchResult::Unchanged => candidate,
            fresh @ FetchResult::Fresh { .. } => {
                let reconciled = reconcile(&candidate, &fresh);
                tracing::debug!(
                    repo = %candidate.full_name(),
                    skipped = reconciled.events.len(),
                    "Primed new registration"
                );
                reconciled.resource
            },
        };

        let full_name = primed.full_name();
        self.registry
            .register(primed, channel)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(repo = %full_name, channel, "Registered repo");
        Ok(full_name)
    }
}
