use std::fmt;

use crate::{errors::Error, Result};

/// Chat id (numeric) of an operator conversation on the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// `owner/name` of the remote source repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    owner: String,
    name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        if owner.trim().is_empty() || name.trim().is_empty() {
            return Err(Error::Config(format!(
                "repository must be owner/name, got {owner:?}/{name:?}"
            )));
        }
        if owner.contains('/') || name.contains('/') {
            return Err(Error::Config(format!(
                "repository owner/name may not contain '/': {owner}/{name}"
            )));
        }
        Ok(Self { owner, name })
    }

    /// Parse `"owner/name"`.
    pub fn parse(s: &str) -> Result<Self> {
        let Some((owner, name)) = s.trim().split_once('/') else {
            return Err(Error::Config(format!("repository must be owner/name: {s}")));
        };
        Self::new(owner.trim(), name.trim())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
