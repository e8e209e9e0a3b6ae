use std::sync::Mutex;

use async_trait::async_trait;

use crate::{config::UpdateModel, domain::RepositoryRef, Result};

use super::{
    fetcher::{ArtifactFetcher, TarballSource},
    github::GitHubClient,
    version::{is_newer, parse_remote_version},
    CheckResult, UpdateCheck, UpdateError,
};

/// Detects updates through the version declared in a tracked source file.
pub struct StableUpdateChecker {
    api: GitHubClient,
    fetcher: ArtifactFetcher,
    repo: RepositoryRef,
    version_file: String,
    local_version: Option<String>,
    remote_version: Mutex<Option<String>>,
}

impl StableUpdateChecker {
    pub fn new(
        api: GitHubClient,
        fetcher: ArtifactFetcher,
        repo: RepositoryRef,
        version_file: impl Into<String>,
        local_version: Option<String>,
    ) -> Self {
        Self {
            api,
            fetcher,
            repo,
            version_file: version_file.into(),
            local_version,
            remote_version: Mutex::new(None),
        }
    }

    async fn fetch_remote_version(&self) -> std::result::Result<String, UpdateError> {
        let source = self.api.file_contents(&self.repo, &self.version_file).await?;
        parse_remote_version(&source)
    }

    fn record(&self, version: Option<String>) {
        if let Ok(mut guard) = self.remote_version.lock() {
            *guard = version;
        }
    }
}

// Stable releases are not applied from a tarball; the default strategy stays.
impl TarballSource for StableUpdateChecker {}

#[async_trait]
impl UpdateCheck for StableUpdateChecker {
    fn model(&self) -> UpdateModel {
        UpdateModel::Stable
    }

    async fn check(&self) -> CheckResult {
        self.record(None);

        let remote = match self.fetch_remote_version().await {
            Ok(v) => v,
            Err(e) => {
                tracing::info!(repo = %self.repo, file = %self.version_file, error = %e, "stable update check failed");
                return CheckResult::none();
            }
        };
        self.record(Some(remote.clone()));

        let update_available = match self.local_version.as_deref() {
            Some(local) => is_newer(local, &remote),
            None => {
                tracing::warn!("no local version configured; cannot compare with {remote}");
                false
            }
        };

        tracing::debug!(
            local = self.local_version.as_deref().unwrap_or("-"),
            %remote,
            update_available,
            "stable update check"
        );

        CheckResult {
            update_available,
            remote_version: Some(remote),
        }
    }

    fn update_version(&self) -> Option<String> {
        self.remote_version.lock().ok().and_then(|g| g.clone())
    }

    async fn download_update(&self) -> Result<bool> {
        let path = self.fetcher.fetch_tarball(self, &self.repo).await?;
        Ok(path.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use base64::Engine as _;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROPER: &str = "\n# This is a properly formed version file.\n\nversion = 1.3.3.7\n";
    const MULTIPLE: &str = "\nversion = \"1.3.3.7\"\nversion = \"1.3.3.8\"\n";
    const MALFORMED: &str = "\nversion =\n";

    fn envelope(src: &str) -> serde_json::Value {
        json!({ "content": base64::engine::general_purpose::STANDARD.encode(src) })
    }

    fn checker(api_url: &str, local: Option<&str>) -> StableUpdateChecker {
        let api = GitHubClient::new(api_url, Duration::from_secs(5)).unwrap();
        let fetcher = ArtifactFetcher::new(api.http().clone(), std::env::temp_dir());
        StableUpdateChecker::new(
            api,
            fetcher,
            RepositoryRef::parse("foo/bar").unwrap(),
            "version.py",
            local.map(str::to_string),
        )
    }

    async fn serve(body: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/foo/bar/contents/version.py"))
            .respond_with(body)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn newer_remote_version_is_an_update() {
        let server = serve(ResponseTemplate::new(200).set_body_json(envelope(PROPER))).await;
        let c = checker(&server.uri(), Some("0.0"));

        let res = c.check().await;
        assert!(res.update_available);
        assert_eq!(res.remote_version.as_deref(), Some("1.3.3.7"));
        assert_eq!(c.update_version().as_deref(), Some("1.3.3.7"));
    }

    #[tokio::test]
    async fn equal_or_older_remote_version_is_not_an_update() {
        let server = serve(ResponseTemplate::new(200).set_body_json(envelope(PROPER))).await;

        let same = checker(&server.uri(), Some("1.3.3.7"));
        assert!(!same.check().await.update_available);
        assert_eq!(same.update_version().as_deref(), Some("1.3.3.7"));

        let newer_local = checker(&server.uri(), Some("1.3.3.8"));
        assert!(!newer_local.check().await.update_available);
    }

    #[tokio::test]
    async fn missing_local_version_is_not_an_update() {
        let server = serve(ResponseTemplate::new(200).set_body_json(envelope(PROPER))).await;
        let c = checker(&server.uri(), None);
        assert!(!c.check().await.update_available);
    }

    #[tokio::test]
    async fn indeterminate_versions_are_not_updates() {
        for src in ["# only comments\n", MULTIPLE, MALFORMED] {
            let server = serve(ResponseTemplate::new(200).set_body_json(envelope(src))).await;
            let c = checker(&server.uri(), Some("0.0"));
            assert!(!c.check().await.update_available, "source: {src:?}");
            assert_eq!(c.update_version(), None, "source: {src:?}");
        }
    }

    #[tokio::test]
    async fn malformed_responses_degrade_to_no_update() {
        for body in [
            ResponseTemplate::new(200).set_body_string(""),
            ResponseTemplate::new(200).set_body_string("<html>not json</html>"),
            ResponseTemplate::new(200).set_body_json(json!({"name": "version.py"})),
            ResponseTemplate::new(200).set_body_json(json!({"content": "@@not base64@@"})),
            ResponseTemplate::new(500),
        ] {
            let server = serve(body).await;
            let c = checker(&server.uri(), Some("0.0"));
            assert_eq!(c.check().await, CheckResult::none());
            assert_eq!(c.update_version(), None);
        }
    }

    #[tokio::test]
    async fn unreachable_remote_degrades_to_no_update() {
        let c = checker("http://127.0.0.1:9", Some("0.0"));
        assert_eq!(c.check().await, CheckResult::none());
    }

    #[tokio::test]
    async fn failing_second_check_clears_recorded_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/foo/bar/contents/version.py"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(PROPER)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/foo/bar/contents/version.py"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let c = checker(&server.uri(), Some("0.0"));
        assert!(c.check().await.update_available);
        assert_eq!(c.update_version().as_deref(), Some("1.3.3.7"));

        assert!(!c.check().await.update_available);
        assert_eq!(c.update_version(), None);
    }

    #[tokio::test]
    async fn download_update_is_not_implemented_for_stable() {
        let c = checker("http://127.0.0.1:9", Some("0.0"));
        assert!(matches!(
            c.download_update().await,
            Err(Error::Unimplemented(_))
        ));
    }
}
