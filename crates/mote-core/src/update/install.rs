//! Hand-off point for downloaded release tarballs.
//!
//! `StagingInstaller` unpacks a `.tar.gz` into a fresh staging directory.
//! Entries must stay inside it: no `..` or absolute paths, no links or
//! device nodes, and the whole archive must fit the extraction budget.
//!
//! Swapping the staged tree in for the running install is left to the
//! operator (or the daemon's restart hook).

use std::{
    fs,
    io::Read,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tar::Archive;

use crate::{errors::Error, Result};

#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, tarball: &Path) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct ExtractLimits {
    /// Maximum number of regular files staged.
    pub max_files: usize,
    /// Maximum bytes staged across all files.
    pub max_total_bytes: u64,
    /// Maximum bytes of a single file.
    pub max_file_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_files: 10_000,
            max_total_bytes: 256 * 1024 * 1024,
            max_file_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StagedTree {
    /// Paths relative to the staging directory.
    pub files: Vec<PathBuf>,
    pub bytes: u64,
}

#[derive(Clone, Debug)]
pub struct StagingInstaller {
    staging_dir: PathBuf,
    limits: ExtractLimits,
}

impl StagingInstaller {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            limits: ExtractLimits::default(),
        }
    }
}

#[async_trait]
impl Installer for StagingInstaller {
    async fn install(&self, tarball: &Path) -> Result<()> {
        let tarball = tarball.to_path_buf();
        let dest = self.staging_dir.clone();
        let limits = self.limits;

        let staged = tokio::task::spawn_blocking(move || stage_tarball(&tarball, &dest, limits))
            .await
            .map_err(|e| Error::External(format!("staging task failed: {e}")))??;

        tracing::info!(
            staging = %self.staging_dir.display(),
            files = staged.files.len(),
            bytes = staged.bytes,
            "update staged; restart into the staged tree to complete the upgrade"
        );
        Ok(())
    }
}

/// Replace `dest` with the contents of the gzip'd tarball at `tarball`.
pub fn stage_tarball(tarball: &Path, dest: &Path, limits: ExtractLimits) -> Result<StagedTree> {
    let f = fs::File::open(tarball)?;
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;
    stage_entries(GzDecoder::new(f), dest, limits)
}

fn stage_entries<R: Read>(r: R, dest: &Path, limits: ExtractLimits) -> Result<StagedTree> {
    let mut archive = Archive::new(r);
    let mut budget = Budget::new(limits);

    for entry in archive.entries()? {
        let entry = entry?;
        let kind = entry.header().entry_type();
        let raw_path = entry.path()?.into_owned();

        match kind {
            // GitHub tarballs carry the commit id in a pax global header.
            k if k.is_pax_global_extensions() => {}
            k if k.is_dir() => fs::create_dir_all(dest.join(staged_path(&raw_path)?))?,
            k if k.is_file() => {
                let rel = staged_path(&raw_path)?;
                budget.admit(&rel, entry.header().size().unwrap_or(0))?;

                let out_path = dest.join(&rel);
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = fs::File::create(&out_path)?;
                budget.copy(entry, &rel, &mut out)?;
            }
            other => {
                return Err(Error::Security(format!(
                    "refusing {other:?} entry in update archive: {}",
                    raw_path.display()
                )))
            }
        }
    }

    Ok(budget.into_tree())
}

/// Running totals checked against `ExtractLimits` as entries are staged.
struct Budget {
    limits: ExtractLimits,
    tree: StagedTree,
}

impl Budget {
    fn new(limits: ExtractLimits) -> Self {
        Self {
            limits,
            tree: StagedTree::default(),
        }
    }

    /// Check the declared size of the next file before writing it.
    fn admit(&self, rel: &Path, declared: u64) -> Result<()> {
        if self.tree.files.len() >= self.limits.max_files {
            return Err(Error::Security(format!(
                "update archive has more than {} files",
                self.limits.max_files
            )));
        }
        if declared > self.limits.max_file_bytes {
            return Err(Error::Security(format!(
                "{} is {declared} bytes (max {})",
                rel.display(),
                self.limits.max_file_bytes
            )));
        }
        if self.tree.bytes.saturating_add(declared) > self.limits.max_total_bytes {
            return Err(Error::Security(format!(
                "update archive exceeds {} bytes",
                self.limits.max_total_bytes
            )));
        }
        Ok(())
    }

    /// Copy at most `max_file_bytes` (the header size may lie) and record it.
    fn copy(&mut self, src: impl Read, rel: &Path, out: &mut fs::File) -> Result<()> {
        let cap = self.limits.max_file_bytes;
        let written = std::io::copy(&mut src.take(cap.saturating_add(1)), out)?;
        if written > cap || self.tree.bytes.saturating_add(written) > self.limits.max_total_bytes {
            return Err(Error::Security(format!(
                "{} grew past the extraction budget while staging",
                rel.display()
            )));
        }
        self.tree.bytes += written;
        self.tree.files.push(rel.to_path_buf());
        Ok(())
    }

    fn into_tree(self) -> StagedTree {
        self.tree
    }
}

/// Relative path of an entry inside the staging directory.
fn staged_path(p: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Security(format!(
                    "update archive entry escapes the staging dir: {}",
                    p.display()
                )))
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(Error::Security(
            "update archive entry has an empty path".to_string(),
        ));
    }
    Ok(out)
}
