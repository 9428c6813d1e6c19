use std::sync::Arc;

use tokio::sync::watch;

use gitbot_github::{ChangeTokenFetcher, TickReport};

use crate::auth::AuthConfig;
use crate::commands::CommandHandler;
use crate::config::BotConfig;
use crate::registry::FileRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BotConfig>,
    pub registry: Arc<FileRegistry>,
    pub fetcher: Arc<ChangeTokenFetcher>,
    pub commands: CommandHandler,
    pub auth: AuthConfig,
    /// Latest poll tick; tick 0 means no tick has finished yet.
    pub ticks: Arc<watch::Sender<TickReport>>,
}

impl AppState {
    /// Open the state file and build the shared fetcher.
    pub async fn new(config: BotConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(FileRegistry::open(&config.state_file).await?);
        let fetcher = Arc::new(ChangeTokenFetcher::new(&config.poller_config())?);
        let commands = CommandHandler::new(
            Arc::clone(&registry),
            Arc::clone(&fetcher),
            config.github.token.clone(),
            config.github.watermark_kind,
        );
        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        let (ticks, _) = watch::channel(TickReport::default());
        Ok(Self {
            config: Arc::new(config),
            registry,
            fetcher,
            commands,
            auth,
            ticks: Arc::new(ticks),
        })
    }

    pub fn last_tick(&self) -> Option<TickReport> {
        let report = self.ticks.borrow();
        (report.tick > 0).then(|| report.clone())
    }
}
