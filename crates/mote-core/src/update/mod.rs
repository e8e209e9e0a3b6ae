//! Self-update subsystem.
//!
//! A notifier polls one checker (stable: version file; bleeding edge: HEAD
//! commit) on a fixed interval and publishes a status line on the transport
//! the first time an update shows up. Runtime failures are absorbed inside
//! the subsystem and logged once; callers only ever see a "no update" result.

pub mod edge;
pub mod fetcher;
pub mod github;
pub mod install;
pub mod notifier;
pub mod stable;
pub mod vcs;
pub mod version;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::{UpdateConfig, UpdateModel},
    Result,
};

use self::{
    edge::EdgeUpdateChecker, fetcher::ArtifactFetcher, github::GitHubClient, install::Installer,
    stable::StableUpdateChecker, vcs::Vcs,
};

/// Failure kinds absorbed by the update subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("remote version is indeterminate")]
    VersionIndeterminate,

    #[error("vcs operation `{op}` failed: {reason}")]
    Vcs { op: &'static str, reason: String },
}

/// Outcome of a single `check()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub update_available: bool,
    /// Semantic version string (stable) or commit hash (bleeding edge).
    pub remote_version: Option<String>,
}

impl CheckResult {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Capability shared by the stable and bleeding-edge checkers.
#[async_trait]
pub trait UpdateCheck: Send + Sync {
    fn model(&self) -> UpdateModel;

    /// Query the remote. Never fails: any failure reads as "no update".
    async fn check(&self) -> CheckResult;

    /// Descriptor recorded by the latest `check()`, if any.
    fn update_version(&self) -> Option<String>;

    /// Try to bring the local install up to date. `Ok(false)` on any runtime
    /// failure; `Err` only for strategies this checker does not implement.
    async fn download_update(&self) -> Result<bool>;
}

/// The checker selected by configuration.
pub enum UpdateChecker {
    Stable(StableUpdateChecker),
    Edge(EdgeUpdateChecker),
}

impl UpdateChecker {
    /// Build the checker for `cfg.model`. Bleeding edge probes the local
    /// checkout and VCS tool once, here.
    pub async fn from_config(
        cfg: &UpdateConfig,
        vcs: Arc<dyn Vcs>,
        installer: Arc<dyn Installer>,
    ) -> Result<Self> {
        let api = GitHubClient::new(&cfg.api_url, cfg.http_timeout)?;
        let fetcher = ArtifactFetcher::new(api.http().clone(), cfg.download_dir.clone());
        match cfg.model {
            UpdateModel::Stable => Ok(Self::Stable(StableUpdateChecker::new(
                api,
                fetcher,
                cfg.repo.clone(),
                cfg.version_file.clone(),
                cfg.local_version.clone(),
            ))),
            UpdateModel::Bleeding => {
                let checker = EdgeUpdateChecker::probe(
                    api,
                    fetcher,
                    vcs,
                    installer,
                    edge::EdgeSettings::from_config(cfg),
                )
                .await;
                Ok(Self::Edge(checker))
            }
        }
    }
}

#[async_trait]
impl UpdateCheck for UpdateChecker {
    fn model(&self) -> UpdateModel {
        match self {
            Self::Stable(c) => c.model(),
            Self::Edge(c) => c.model(),
        }
    }

    async fn check(&self) -> CheckResult {
        match self {
            Self::Stable(c) => c.check().await,
            Self::Edge(c) => c.check().await,
        }
    }

    fn update_version(&self) -> Option<String> {
        match self {
            Self::Stable(c) => c.update_version(),
            Self::Edge(c) => c.update_version(),
        }
    }

    async fn download_update(&self) -> Result<bool> {
        match self {
            Self::Stable(c) => c.download_update().await,
            Self::Edge(c) => c.download_update().await,
        }
    }
}
