use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{ChatId, RepositoryRef},
    errors::Error,
    Result,
};

pub const DEFAULT_REPO: &str = "nthorne/xmppmote";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_HOST_URL: &str = "https://github.com";
pub const DEFAULT_VERSION_FILE: &str = "version.py";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_GIT_MAJOR: u32 = 2;

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub telegram_admin_chats: Vec<ChatId>,

    /// `None` when no update action is configured.
    pub updates: Option<UpdateConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(env_str)
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_admin_chats = parse_csv_i64(get("TELEGRAM_ADMIN_CHATS"))
            .into_iter()
            .map(ChatId)
            .collect::<Vec<_>>();

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if telegram_admin_chats.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ADMIN_CHATS environment variable is required".to_string(),
            ));
        }

        let updates = UpdateConfig::from_vars(&get)?;

        Ok(Self {
            telegram_bot_token,
            telegram_admin_chats,
            updates,
        })
    }
}

/// What the notifier does once an update shows up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    /// Publish a status line.
    Notify,
    /// Publish a status line, then try to apply the update.
    Apply,
}

impl UpdateAction {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "notify" => Ok(Self::Notify),
            "apply" => Ok(Self::Apply),
            other => Err(Error::Config(format!("unknown update action: {other}"))),
        }
    }
}

/// How update availability is detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateModel {
    /// Declared version string in a tracked source file.
    Stable,
    /// Remote HEAD commit vs. local HEAD commit.
    Bleeding,
}

impl UpdateModel {
    fn parse(s: Option<&str>) -> Result<Self> {
        let Some(s) = s.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::Stable);
        };
        match s.to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "bleeding" => Ok(Self::Bleeding),
            other => Err(Error::Config(format!("unknown update model: {other}"))),
        }
    }

    pub fn is_bleeding_edge(self) -> bool {
        matches!(self, Self::Bleeding)
    }
}

/// Settings of the self-update subsystem.
#[derive(Clone, Debug)]
pub struct UpdateConfig {
    pub action: UpdateAction,
    pub model: UpdateModel,
    pub interval: Duration,

    // Remote
    pub repo: RepositoryRef,
    pub api_url: String,
    pub host_url: String,
    pub version_file: String,

    // Local
    pub local_version: Option<String>,
    pub project_root: PathBuf,
    pub download_dir: PathBuf,
    pub staging_dir: PathBuf,

    // VCS
    pub remote: String,
    pub branch: String,
    pub expected_git_major: u32,

    // Timeouts
    pub http_timeout: Duration,
    pub vcs_timeout: Duration,
}

impl UpdateConfig {
    /// Defaults for `repo`: notify on stable releases every hour.
    pub fn with_repo(repo: RepositoryRef) -> Self {
        let download_dir = PathBuf::from("/tmp/mote-updates");
        Self {
            action: UpdateAction::Notify,
            model: UpdateModel::Stable,
            interval: DEFAULT_INTERVAL,
            repo,
            api_url: DEFAULT_API_URL.to_string(),
            host_url: DEFAULT_HOST_URL.to_string(),
            version_file: DEFAULT_VERSION_FILE.to_string(),
            local_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            project_root: PathBuf::from("."),
            staging_dir: download_dir.join("staging"),
            download_dir,
            remote: "origin".to_string(),
            branch: "master".to_string(),
            expected_git_major: DEFAULT_GIT_MAJOR,
            http_timeout: Duration::from_secs(30),
            vcs_timeout: Duration::from_secs(120),
        }
    }

    /// Returns `Ok(None)` when `UPDATE_ACTION` is unset (updates disabled).
    pub fn from_vars(get: &impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(action) = get("UPDATE_ACTION").and_then(non_empty) else {
            return Ok(None);
        };
        let action = UpdateAction::parse(&action)?;
        let model = UpdateModel::parse(get("UPDATE_MODEL").as_deref())?;

        if action == UpdateAction::Apply && model == UpdateModel::Stable {
            return Err(Error::Config(
                "UPDATE_ACTION=apply requires UPDATE_MODEL=bleeding".to_string(),
            ));
        }

        let repo = RepositoryRef::parse(
            &get("UPDATE_REPO")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_REPO.to_string()),
        )?;

        let mut cfg = Self::with_repo(repo);
        cfg.action = action;
        cfg.model = model;

        // A malformed interval falls back to the default rather than failing startup.
        if let Some(secs) = parse_u64(get("UPDATE_INTERVAL")).filter(|s| *s > 0) {
            cfg.interval = Duration::from_secs(secs);
        }

        if let Some(v) = get("UPDATE_API_URL").and_then(non_empty) {
            cfg.api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("UPDATE_HOST_URL").and_then(non_empty) {
            cfg.host_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("UPDATE_VERSION_FILE").and_then(non_empty) {
            cfg.version_file = v.trim_start_matches('/').to_string();
        }
        if let Some(v) = get("UPDATE_LOCAL_VERSION") {
            cfg.local_version = non_empty(v);
        }

        cfg.project_root = match get("UPDATE_PROJECT_ROOT").and_then(non_empty) {
            Some(v) => PathBuf::from(v),
            None => env::current_dir()?,
        };
        if let Some(v) = get("UPDATE_DIR").and_then(non_empty) {
            cfg.download_dir = PathBuf::from(v);
        }
        cfg.staging_dir = get("UPDATE_STAGING_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| cfg.download_dir.join("staging"));

        if let Some(v) = get("UPDATE_REMOTE").and_then(non_empty) {
            cfg.remote = v;
        }
        if let Some(v) = get("UPDATE_BRANCH").and_then(non_empty) {
            cfg.branch = v;
        }
        if let Some(major) = get("UPDATE_GIT_MAJOR").and_then(|s| s.trim().parse::<u32>().ok()) {
            cfg.expected_git_major = major;
        }

        if let Some(secs) = parse_u64(get("UPDATE_HTTP_TIMEOUT_SECS")).filter(|s| *s > 0) {
            cfg.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(get("UPDATE_VCS_TIMEOUT_SECS")).filter(|s| *s > 0) {
            cfg.vcs_timeout = Duration::from_secs(secs);
        }

        Ok(Some(cfg))
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
