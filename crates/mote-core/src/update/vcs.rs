use async_trait::async_trait;

use crate::Result;

/// Whether `save_stash` actually put anything on the stash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StashOutcome {
    Saved,
    NothingToSave,
}

/// Port over the local version-control tool.
///
/// Every operation may fail with a tool-specific error; the bleeding-edge
/// checker catches each one at its call site.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Commit hash of the local HEAD.
    async fn head(&self) -> Result<String>;

    /// Version string reported by the tool (`2.39.2`).
    async fn version(&self) -> Result<String>;

    async fn fetch(&self, remote: &str) -> Result<()>;
    async fn save_stash(&self) -> Result<StashOutcome>;
    async fn merge(&self, branch_ref: &str) -> Result<()>;
    async fn pop_stash(&self) -> Result<()>;
    async fn reset_hard(&self, commit: &str) -> Result<()>;
}

/// Major component of a tool version string (`"2.39.2"` → `2`).
pub fn major_version(version: &str) -> Option<u32> {
    version
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())?
        .parse()
        .ok()
}
