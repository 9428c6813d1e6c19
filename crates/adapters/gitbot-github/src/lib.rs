pub mod config;
pub mod fetcher;
pub mod poller;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::GitHubPollerConfig;
pub use fetcher::ChangeTokenFetcher;
pub use poller::{Poller, TickReport};
