//! Version declarations in the remote version file.
//!
//! The file is plain text with a single `version = <value>` line. The value
//! reduces to a dotted numeric token (`1.3.3.7`); anything else, or more than
//! one declaration, leaves the remote version indeterminate.

use std::sync::OnceLock;

use regex::Regex;

use super::UpdateError;

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"version\s*=.*").expect("static regex"))
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*version[^0-9]*([.0-9]+).*$").expect("static regex"))
}

/// Extract the single declared version from `source`.
pub fn parse_remote_version(source: &str) -> Result<String, UpdateError> {
    let declarations: Vec<&str> = declaration_re()
        .find_iter(source)
        .map(|m| m.as_str())
        .collect();

    let [declaration] = declarations.as_slice() else {
        return Err(UpdateError::VersionIndeterminate);
    };

    let token = token_re()
        .captures(declaration)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or(UpdateError::VersionIndeterminate)?;

    if token.is_empty() || token.chars().any(|c| c != '.' && !c.is_ascii_digit()) {
        return Err(UpdateError::VersionIndeterminate);
    }

    Ok(token.to_string())
}

/// Whether `remote` is newer than `local`.
///
/// Plain string ordering, not semantic-version ordering: `"9" > "10"`.
pub fn is_newer(local: &str, remote: &str) -> bool {
    local < remote
}
