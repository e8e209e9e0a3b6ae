//! Thin client for the two repository endpoints the checkers poll.

use std::time::Duration;

use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{domain::RepositoryRef, errors::Error, Result};

use super::UpdateError;

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Clone, Debug)]
pub struct GitHubClient {
    api_url: String,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("mote/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn contents_url(&self, repo: &RepositoryRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            repo.owner(),
            repo.name(),
            path.trim_start_matches('/')
        )
    }

    pub fn head_commit_url(&self, repo: &RepositoryRef) -> String {
        format!(
            "{}/repos/{}/{}/commits/HEAD",
            self.api_url,
            repo.owner(),
            repo.name()
        )
    }

    /// Fetch a file through the "contents" API and return it decoded.
    pub async fn file_contents(
        &self,
        repo: &RepositoryRef,
        path: &str,
    ) -> std::result::Result<String, UpdateError> {
        let envelope: ContentsResponse = self.get_json(&self.contents_url(repo, path)).await?;
        decode_content(&envelope.content)
    }

    /// SHA of the remote HEAD commit.
    pub async fn head_commit_sha(
        &self,
        repo: &RepositoryRef,
    ) -> std::result::Result<String, UpdateError> {
        let commit: CommitResponse = self.get_json(&self.head_commit_url(repo)).await?;
        let sha = commit.sha.trim().to_string();
        if sha.is_empty() {
            return Err(UpdateError::ResponseFormat("empty sha".to_string()));
        }
        Ok(sha)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> std::result::Result<T, UpdateError> {
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| UpdateError::Transport(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| UpdateError::Transport(format!("{url}: reading body: {e}")))?;
        if body.trim().is_empty() {
            return Err(UpdateError::ResponseFormat(format!("{url}: empty body")));
        }

        serde_json::from_str(&body)
            .map_err(|e| UpdateError::ResponseFormat(format!("{url}: invalid json: {e}")))
    }
}

/// Decode the base64 payload of a "contents" envelope.
///
/// The API wraps the payload with newlines; whitespace is not part of the
/// alphabet and is dropped before decoding.
pub fn decode_content(encoded: &str) -> std::result::Result<String, UpdateError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| UpdateError::ResponseFormat(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| UpdateError::ResponseFormat(format!("content is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo() -> RepositoryRef {
        RepositoryRef::parse("foo/bar").unwrap()
    }

    #[test]
    fn builds_endpoint_urls() {
        let api = GitHubClient::new("https://api.github.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.contents_url(&repo(), "/version.py"),
            "https://api.github.com/repos/foo/bar/contents/version.py"
        );
        assert_eq!(
            api.head_commit_url(&repo()),
            "https://api.github.com/repos/foo/bar/commits/HEAD"
        );
    }

    #[test]
    fn decodes_wrapped_base64() {
        // "version = 1.3.3.7\n" split across lines like the contents API does.
        let wrapped = "dmVyc2lvbiA9\nIDEuMy4zLjcK\n";
        assert_eq!(decode_content(wrapped).unwrap(), "version = 1.3.3.7\n");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_content("!!!not base64!!!"),
            Err(UpdateError::ResponseFormat(_))
        ));
    }

    #[tokio::test]
    async fn head_commit_sha_reads_sha_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/foo/bar/commits/HEAD"))
            .and(header("accept", "application/vnd.github+json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "deadbeef"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = GitHubClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert_eq!(api.head_commit_sha(&repo()).await.unwrap(), "deadbeef");
    }

    #[tokio::test]
    async fn missing_sha_is_a_format_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/foo/bar/commits/HEAD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"commit": {}})))
            .mount(&server)
            .await;

        let api = GitHubClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            api.head_commit_sha(&repo()).await,
            Err(UpdateError::ResponseFormat(_))
        ));
    }

    #[tokio::test]
    async fn http_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let api = GitHubClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        match api.file_contents(&repo(), "version.py").await {
            Err(UpdateError::HttpStatus { status, .. }) => assert_eq!(status.as_u16(), 403),
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_a_format_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let api = GitHubClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            api.file_contents(&repo(), "version.py").await,
            Err(UpdateError::ResponseFormat(_))
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_failure() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let api = GitHubClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            api.head_commit_sha(&repo()).await,
            Err(UpdateError::Transport(_))
        ));
    }
}
