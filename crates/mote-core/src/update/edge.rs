//! Bleeding-edge updates: track the remote HEAD commit.
//!
//! With a local checkout and a usable `git`, an update is applied in place
//! (fetch, stash, merge, pop). Without either, the branch tarball is
//! downloaded and handed to the installer.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    config::{UpdateConfig, UpdateModel, DEFAULT_GIT_MAJOR},
    domain::RepositoryRef,
    Result,
};

use super::{
    fetcher::{ArtifactFetcher, TarballSource},
    github::GitHubClient,
    install::Installer,
    vcs::{major_version, StashOutcome, Vcs},
    CheckResult, UpdateCheck, UpdateError,
};

#[derive(Clone, Debug)]
pub struct EdgeSettings {
    pub repo: RepositoryRef,
    pub host_url: String,
    pub project_root: PathBuf,
    pub remote: String,
    pub branch: String,
    pub expected_git_major: u32,
}

impl EdgeSettings {
    pub fn new(repo: RepositoryRef, project_root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            host_url: crate::config::DEFAULT_HOST_URL.to_string(),
            project_root: project_root.into(),
            remote: "origin".to_string(),
            branch: "master".to_string(),
            expected_git_major: DEFAULT_GIT_MAJOR,
        }
    }

    pub fn from_config(cfg: &UpdateConfig) -> Self {
        Self {
            repo: cfg.repo.clone(),
            host_url: cfg.host_url.clone(),
            project_root: cfg.project_root.clone(),
            remote: cfg.remote.clone(),
            branch: cfg.branch.clone(),
            expected_git_major: cfg.expected_git_major,
        }
    }

    fn tracking_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

/// Local facts probed once at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalState {
    pub local_head: Option<String>,
    pub is_local_checkout: bool,
    pub has_vcs_tool: bool,
}

pub struct EdgeUpdateChecker {
    api: GitHubClient,
    fetcher: ArtifactFetcher,
    vcs: Arc<dyn Vcs>,
    installer: Arc<dyn Installer>,
    settings: EdgeSettings,
    local: LocalState,
    remote_head: Mutex<Option<String>>,
}

impl EdgeUpdateChecker {
    /// Probe the local checkout and tool, then build the checker.
    pub async fn probe(
        api: GitHubClient,
        fetcher: ArtifactFetcher,
        vcs: Arc<dyn Vcs>,
        installer: Arc<dyn Installer>,
        settings: EdgeSettings,
    ) -> Self {
        let local = probe_local(vcs.as_ref(), &settings).await;
        tracing::info!(
            root = %settings.project_root.display(),
            checkout = local.is_local_checkout,
            vcs = local.has_vcs_tool,
            head = local.local_head.as_deref().unwrap_or("-"),
            "bleeding-edge updates enabled"
        );

        Self {
            api,
            fetcher,
            vcs,
            installer,
            settings,
            local,
            remote_head: Mutex::new(None),
        }
    }

    pub fn is_local_checkout(&self) -> bool {
        self.local.is_local_checkout
    }

    pub fn has_vcs_tool(&self) -> bool {
        self.local.has_vcs_tool
    }

    pub fn local_head(&self) -> Option<&str> {
        self.local.local_head.as_deref()
    }

    fn record(&self, head: Option<String>) {
        if let Ok(mut guard) = self.remote_head.lock() {
            *guard = head;
        }
    }

    async fn fetch_from_origin(&self) -> bool {
        match self.vcs.fetch(&self.settings.remote).await {
            Ok(()) => true,
            Err(e) => {
                let e = vcs_error("fetch", e);
                tracing::warn!(error = %e, "update fetch failed");
                false
            }
        }
    }

    /// Merge the fetched branch into the working tree, keeping local edits.
    ///
    /// A failing merge or stash pop resets the tree to the pre-merge commit
    /// exactly once.
    async fn merge_with_origin(&self) -> bool {
        let prior = match self.vcs.head().await {
            Ok(h) => h,
            Err(e) => {
                let e = vcs_error("head", e);
                tracing::warn!(error = %e, "cannot record pre-merge commit; merge aborted");
                return false;
            }
        };

        let stash = match self.vcs.save_stash().await {
            Ok(s) => s,
            Err(e) => {
                let e = vcs_error("stash", e);
                tracing::warn!(error = %e, "stashing local changes failed");
                return false;
            }
        };

        let tracking = self.settings.tracking_ref();
        if let Err(e) = self.vcs.merge(&tracking).await {
            let e = vcs_error("merge", e);
            tracing::warn!(error = %e, %tracking, "merge failed; resetting to {prior}");
            self.reset_to(&prior).await;
            return false;
        }

        if stash == StashOutcome::Saved {
            if let Err(e) = self.vcs.pop_stash().await {
                let e = vcs_error("stash pop", e);
                tracing::warn!(error = %e, "restoring local changes failed; resetting to {prior}");
                self.reset_to(&prior).await;
                return false;
            }
        }

        tracing::info!(%tracking, "merged update");
        true
    }

    async fn reset_to(&self, commit: &str) {
        if let Err(e) = self.vcs.reset_hard(commit).await {
            let e = vcs_error("reset", e);
            tracing::error!(error = %e, %commit, "reset after failed update did not complete");
        }
    }

    async fn download_and_install(&self) -> Result<bool> {
        let Some(path) = self.fetcher.fetch_tarball(self, &self.settings.repo).await? else {
            return Ok(false);
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "downloaded tarball is missing");
            return Ok(false);
        }

        match self.installer.install(&path).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "installing update failed");
                Ok(false)
            }
        }
    }
}

impl TarballSource for EdgeUpdateChecker {
    fn tarball_url(&self, repo: &RepositoryRef) -> Result<String> {
        Ok(format!(
            "{}/{}/{}/tarball/{}",
            self.settings.host_url.trim_end_matches('/'),
            repo.owner(),
            repo.name(),
            self.settings.branch
        ))
    }
}

#[async_trait]
impl UpdateCheck for EdgeUpdateChecker {
    fn model(&self) -> UpdateModel {
        UpdateModel::Bleeding
    }

    async fn check(&self) -> CheckResult {
        self.record(None);

        let remote = match self.api.head_commit_sha(&self.settings.repo).await {
            Ok(sha) => sha,
            Err(e) => {
                tracing::info!(repo = %self.settings.repo, error = %e, "bleeding-edge update check failed");
                return CheckResult::none();
            }
        };
        self.record(Some(remote.clone()));

        let update_available = self.local.local_head.as_deref() != Some(remote.as_str());
        tracing::debug!(
            local = self.local_head().unwrap_or("-"),
            %remote,
            update_available,
            "bleeding-edge update check"
        );

        CheckResult {
            update_available,
            remote_version: Some(remote),
        }
    }

    fn update_version(&self) -> Option<String> {
        self.remote_head.lock().ok().and_then(|g| g.clone())
    }

    async fn download_update(&self) -> Result<bool> {
        if self.local.is_local_checkout && self.local.has_vcs_tool {
            if !self.fetch_from_origin().await {
                return Ok(false);
            }
            return Ok(self.merge_with_origin().await);
        }
        self.download_and_install().await
    }
}

async fn probe_local(vcs: &dyn Vcs, settings: &EdgeSettings) -> LocalState {
    let is_local_checkout = is_checkout(&settings.project_root).await;
    if !is_local_checkout {
        return LocalState::default();
    }

    let has_vcs_tool = match vcs.version().await {
        Ok(v) => match major_version(&v) {
            Some(major) if major == settings.expected_git_major => true,
            _ => {
                tracing::warn!(
                    version = %v,
                    expected = settings.expected_git_major,
                    "unsupported git version; in-place updates disabled"
                );
                false
            }
        },
        Err(e) => {
            tracing::info!(error = %e, "git unavailable; in-place updates disabled");
            false
        }
    };

    let local_head = if has_vcs_tool {
        match vcs.head().await {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read local HEAD");
                None
            }
        }
    } else {
        None
    };

    LocalState {
        local_head,
        is_local_checkout,
        has_vcs_tool,
    }
}

async fn is_checkout(root: &Path) -> bool {
    tokio::fs::try_exists(root.join(".git"))
        .await
        .unwrap_or(false)
}

fn vcs_error(op: &'static str, e: crate::errors::Error) -> UpdateError {
    UpdateError::Vcs {
        op,
        reason: e.to_string(),
    }
}
