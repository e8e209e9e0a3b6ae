//! Release tarball download.

use std::path::PathBuf;

use reqwest::header::CONTENT_DISPOSITION;
use tokio::io::AsyncWriteExt;

use crate::{domain::RepositoryRef, errors::Error, Result};

use super::UpdateError;

const FALLBACK_SUFFIX: &str = ".tar.gz";
const FALLBACK_STEM: &str = "tarball";

/// Where a checker's release tarball lives.
pub trait TarballSource: Send + Sync {
    /// Resolve the tarball URL for `repo`. Checkers that cannot be applied
    /// from a tarball keep this default.
    fn tarball_url(&self, repo: &RepositoryRef) -> Result<String> {
        let _ = repo;
        Err(Error::Unimplemented("tarball url resolution"))
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactFetcher {
    http: reqwest::Client,
    target_dir: PathBuf,
}

impl ArtifactFetcher {
    pub fn new(http: reqwest::Client, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            target_dir: target_dir.into(),
        }
    }

    /// Download the tarball `source` resolves for `repo`.
    ///
    /// Returns the absolute path of the written file, or `None` when the
    /// download failed (already logged). The only error is an unimplemented
    /// URL strategy.
    pub async fn fetch_tarball(
        &self,
        source: &dyn TarballSource,
        repo: &RepositoryRef,
    ) -> Result<Option<PathBuf>> {
        let url = source.tarball_url(repo)?;

        match self.download(&url).await {
            Ok(path) => {
                tracing::info!(%url, path = %path.display(), "downloaded update tarball");
                Ok(Some(path))
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "tarball download failed");
                Ok(None)
            }
        }
    }

    async fn download(&self, url: &str) -> std::result::Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(&self.target_dir).await?;
        let dir = tokio::fs::canonicalize(&self.target_dir).await?;

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpdateError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                status,
                url: url.to_string(),
            }
            .into());
        }

        let file_name = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| fallback_filename(url));
        let path = dir.join(&file_name);
        let partial = dir.join(format!("{file_name}.part"));

        let mut resp = resp;
        let mut out = tokio::fs::File::create(&partial).await?;
        let written = async {
            while let Some(chunk) = resp
                .chunk()
                .await
                .map_err(|e| UpdateError::Transport(format!("reading body: {e}")))?
            {
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            out.sync_all().await?;
            Ok::<(), DownloadError>(())
        }
        .await;
        drop(out);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &path).await?;
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// `attachment; filename=<name>` → `<name>`, reduced to a bare file name.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let value = header.split(';').map(str::trim).find_map(|part| {
        let (k, v) = part.split_once('=')?;
        k.trim().eq_ignore_ascii_case("filename").then_some(v.trim())
    })?;

    let unquoted = value.trim_matches(|c| c == '"' || c == '\'');
    let bare = unquoted.rsplit(['/', '\\']).next()?.trim();
    if bare.is_empty() || bare == "." || bare == ".." {
        return None;
    }
    Some(bare.to_string())
}

/// Deterministic name for a download without a usable header:
/// `<basename of url>.tar.gz`.
pub fn fallback_filename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let base = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim();
    let base = if base.is_empty() || base.contains(':') || base == "." || base == ".." {
        FALLBACK_STEM
    } else {
        base
    };
    format!("{base}{FALLBACK_SUFFIX}")
}
