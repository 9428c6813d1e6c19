use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use gitbot_core::collab::ResourceRegistry;
use gitbot_core::resource::{ResourceError, TrackedResource};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidFormat(#[from] ResourceError),
    #[error("repo already added")]
    AlreadyRegistered,
    #[error("repo is not registered in this channel")]
    NotRegistered,
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("state could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    repos: Vec<TrackedResource>,
}

/// Tracked repos persisted to a TOML state file.
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename, while holding the write lock, so the file always holds a complete
/// snapshot.
pub struct FileRegistry {
    path: PathBuf,
    repos: RwLock<Vec<TrackedResource>>,
}

impl FileRegistry {
    /// Open the state file at `path`. A missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => toml::from_str::<StateFile>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No state file found, starting empty");
                StateFile::default()
            },
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), repos = state.repos.len(), "Loaded state file");
        Ok(Self {
            path,
            repos: RwLock::new(state.repos),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_registered(&self, owner: &str, name: &str, channel: &str) -> bool {
        self.repos
            .read()
            .await
            .iter()
            .any(|r| r.same_feed(owner, name) && r.channels.iter().any(|c| c == channel))
    }

    /// Subscribe `channel` to `candidate`'s feed.
    ///
    /// A feed that is already tracked for another channel gains the channel
    /// and keeps its dedup state and allow-list. Otherwise `candidate` is
    /// stored as given, with `channel` as its only subscriber.
    pub async fn register(
        &self,
        mut candidate: TrackedResource,
        channel: &str,
    ) -> Result<(), RegistryError> {
        let mut repos = self.repos.write().await;
        match repos
            .iter_mut()
            .find(|r| r.same_feed(&candidate.owner, &candidate.name))
        {
            Some(existing) if existing.channels.iter().any(|c| c == channel) => {
                return Err(RegistryError::AlreadyRegistered);
            },
            Some(existing) => existing.channels.push(channel.to_string()),
            None => {
                candidate.channels = vec![channel.to_string()];
                repos.push(candidate);
            },
        }
        save(&self.path, &repos).await
    }

    /// Unsubscribe `channel` from `full_name`. The repo is dropped once no
    /// channel is left.
    pub async fn unregister(&self, full_name: &str, channel: &str) -> Result<(), RegistryError> {
        let (owner, name) = TrackedResource::parse_full_name(full_name)?;
        let mut repos = self.repos.write().await;
        let Some(index) = repos
            .iter()
            .position(|r| r.same_feed(&owner, &name) && r.channels.iter().any(|c| c == channel))
        else {
            return Err(RegistryError::NotRegistered);
        };

        repos[index].channels.retain(|c| c != channel);
        if repos[index].channels.is_empty() {
            repos.remove(index);
        }
        save(&self.path, &repos).await
    }

    /// Full names of the repos `channel` is subscribed to.
    pub async fn list(&self, channel: &str) -> Vec<String> {
        self.repos
            .read()
            .await
            .iter()
            .filter(|r| r.channels.iter().any(|c| c == channel))
            .map(TrackedResource::full_name)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.repos.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.repos.read().await.is_empty()
    }
}

async fn save(path: &Path, repos: &[TrackedResource]) -> Result<(), RegistryError> {
    #[derive(Serialize)]
    struct StateRef<'a> {
        repos: &'a [TrackedResource],
    }

    let content = toml::to_string_pretty(&StateRef { repos })?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ResourceRegistry for FileRegistry {
    async fn list_resources(&self) -> Vec<TrackedResource> {
        self.repos.read().await.clone()
    }

    /// Write back change token and watermark only. Subscriptions edited while
    /// the tick ran are kept, and repos removed meanwhile stay removed.
    async fn persist(&self, resources: &[TrackedResource]) -> anyhow::Result<()> {
        let mut repos = self.repos.write().await;
        for updated in resources {
            if let Some(stored) = repos
                .iter_mut()
                .find(|r| r.same_feed(&updated.owner, &updated.name))
            {
                stored.change_token = updated.change_token.clone();
                stored.watermark = updated.watermark;
            }
        }
        save(&self.path, &repos).await?;
        Ok(())
    }

    async fn report_missing(&self, resource: &TrackedResource) {
        tracing::warn!(
            repo = %resource.full_name(),
            channels = ?resource.channels,
            "Tracked repo no longer exists upstream, keeping it until unregistered"
        );
    }
}
