//! The RFD repository on GitHub: its coordinates, and the REST client used to read and
//! create its branches.

use crate::{constants::USER_AGENT, session::RepoToken};
use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    StatusCode,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;
use url::Url;

pub mod branch;
pub mod permissions;

/// Errors produced when parsing a repository location.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoInfoError {
    /// The input is not a URL.
    #[error("`{0}` is not a valid repository URL")]
    InvalidUrl(String),
    /// The URL does not name an owner and a repository.
    #[error("`{0}` does not name a repository; expected `host/owner/repo`")]
    MissingPath(String),
}

/// Coordinates of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    /// Host name, including the port if one is given, e.g. `github.com`.
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoInfo {
    /// Parses a repository from a full URL (`https://github.com/owner/repo`) or a bare
    /// host and path (`github.com/owner/repo`).
    pub fn parse(input: &str) -> Result<Self, RepoInfoError> {
        let trimmed = input.trim();
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("https://{trimmed}"))
        }
        .map_err(|_| RepoInfoError::InvalidUrl(input.to_string()))?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(RepoInfoError::InvalidUrl(input.to_string())),
        };

        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty());
        let (Some(owner), Some(repo)) = (segments.next(), segments.next()) else {
            return Err(RepoInfoError::MissingPath(input.to_string()));
        };

        Ok(Self {
            host,
            owner: owner.to_string(),
            repo: repo.trim_end_matches(".git").to_string(),
        })
    }

    /// Returns the web URL of the repository.
    pub fn web_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.repo)
    }

    /// Returns the REST API base for the repository's host.
    ///
    /// `github.com` is served from `api.github.com`; GitHub Enterprise hosts serve the API
    /// under `/api/v3`.
    pub fn default_api_base(&self) -> String {
        if self.host == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.host)
        }
    }

    /// Returns the web base, which also serves the OAuth endpoints.
    pub fn default_web_base(&self) -> String {
        format!("https://{}", self.host)
    }
}

impl fmt::Display for RepoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.repo)
    }
}

/// A failed call to the GitHub API.
#[derive(Error, Debug)]
pub enum HostError {
    /// GitHub answered with a non-success status.
    #[error("GitHub responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
    /// The request never produced a response, or its body could not be read.
    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl HostError {
    /// Returns the HTTP status GitHub answered with, if there was a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
        }
    }
}

/// Permission flags GitHub reports for the authenticated user on a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub maintain: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

/// The parts of `GET /repos/{owner}/{repo}` this crate reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoView {
    #[serde(default)]
    pub permissions: Option<RepoPermissions>,
}

/// The operations this crate performs against the RFD repository.
///
/// Every call is authorized with the repository credential of the user on whose behalf it
/// is made.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Reads the repository as seen by the credential's owner.
    async fn repository(&self, token: &RepoToken) -> Result<RepoView, HostError>;

    /// Returns whether `branch` exists.
    ///
    /// ## Returns
    /// - `Ok(true)` - The branch ref was found.
    /// - `Ok(false)` - GitHub answered 404.
    /// - `Err(HostError)` - Any other failure.
    async fn branch_exists(&self, token: &RepoToken, branch: &str) -> Result<bool, HostError>;

    /// Returns the commit SHA `branch` points at.
    async fn branch_head(&self, token: &RepoToken, branch: &str) -> Result<String, HostError>;

    /// Creates `refs/heads/{branch}` pointing at `sha`.
    async fn create_branch_ref(
        &self,
        token: &RepoToken,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError>;
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Serialize)]
struct NewRef<'a> {
    #[serde(rename = "ref")]
    reference: String,
    sha: &'a str,
}

/// [RepoHost] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoInfo,
}

impl GitHubClient {
    /// Creates a new [GitHubClient].
    ///
    /// ## Takes
    /// - `api_base` - REST API base, e.g. `https://api.github.com`.
    /// - `repo` - The repository every call targets.
    /// - `timeout` - Timeout applied to each request.
    pub fn new(api_base: &str, repo: RepoInfo, timeout: Duration) -> Result<Self, HostError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base, self.repo.owner, self.repo.repo, suffix
        )
    }

    /// Sends `request` with `token` and turns non-success statuses into [HostError::Status].
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        token: &RepoToken,
    ) -> Result<reqwest::Response, HostError> {
        let response = request.bearer_auth(token.expose()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body.get("message")?.as_str().map(ToOwned::to_owned))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        Err(HostError::Status { status, message })
    }
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn repository(&self, token: &RepoToken) -> Result<RepoView, HostError> {
        let response = self.send(self.http.get(self.repo_url("")), token).await?;
        Ok(response.json().await?)
    }

    async fn branch_exists(&self, token: &RepoToken, branch: &str) -> Result<bool, HostError> {
        let url = self.repo_url(&format!("/git/ref/heads/{branch}"));
        match self.send(self.http.get(url), token).await {
            Ok(_) => Ok(true),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn branch_head(&self, token: &RepoToken, branch: &str) -> Result<String, HostError> {
        let url = self.repo_url(&format!("/git/ref/heads/{branch}"));
        let git_ref: GitRef = self.send(self.http.get(url), token).await?.json().await?;
        Ok(git_ref.object.sha)
    }

    async fn create_branch_ref(
        &self,
        token: &RepoToken,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        let body = NewRef {
            reference: format!("refs/heads/{branch}"),
            sha,
        };
        self.send(self.http.post(self.repo_url("/git/refs")).json(&body), token)
            .await?;
        Ok(())
    }
}


#[cfg(test)]
pub(crate) mod test_support {
    use super::{HostError, RepoHost, RepoPermissions, RepoView};
    use crate::session::RepoToken;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    /// A call observed by [FakeHost].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Repository,
        Exists(String),
        Head(String),
        Create(String, String),
    }

    /// An in-memory [RepoHost] that records every call.
    pub(crate) struct FakeHost {
        repository: Result<RepoView, StatusCode>,
        branches: Mutex<HashSet<String>>,
        probe_failures: HashMap<String, StatusCode>,
        head: Result<String, StatusCode>,
        create_failure: Option<StatusCode>,
        calls: Mutex<Vec<Call>>,
    }

    impl Default for FakeHost {
        fn default() -> Self {
            Self {
                repository: Ok(RepoView {
                    permissions: Some(RepoPermissions {
                        push: true,
                        pull: true,
                        ..Default::default()
                    }),
                }),
                branches: Mutex::new(HashSet::new()),
                probe_failures: HashMap::new(),
                head: Ok("base-sha".to_string()),
                create_failure: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    fn status_error(status: StatusCode) -> HostError {
        HostError::Status {
            status,
            message: "fake".to_string(),
        }
    }

    impl FakeHost {
        pub(crate) fn with_repository(mut self, repository: Result<RepoView, StatusCode>) -> Self {
            self.repository = repository;
            self
        }

        pub(crate) fn with_branches(self, branches: &[&str]) -> Self {
            self.branches
                .lock()
                .unwrap()
                .extend(branches.iter().map(|b| b.to_string()));
            self
        }

        pub(crate) fn with_probe_failure(mut self, branch: &str, status: StatusCode) -> Self {
            self.probe_failures.insert(branch.to_string(), status);
            self
        }

        pub(crate) fn with_head(mut self, head: Result<String, StatusCode>) -> Self {
            self.head = head;
            self
        }

        pub(crate) fn with_create_failure(mut self, status: StatusCode) -> Self {
            self.create_failure = Some(status);
            self
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Branch names probed for existence, in order.
        pub(crate) fn probes(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Exists(branch) => Some(branch),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl RepoHost for FakeHost {
        async fn repository(&self, _: &RepoToken) -> Result<RepoView, HostError> {
            self.record(Call::Repository);
            self.repository.clone().map_err(status_error)
        }

        async fn branch_exists(&self, _: &RepoToken, branch: &str) -> Result<bool, HostError> {
            self.record(Call::Exists(branch.to_string()));
            if let Some(status) = self.probe_failures.get(branch) {
                return Err(status_error(*status));
            }
            Ok(self.branches.lock().unwrap().contains(branch))
        }

        async fn branch_head(&self, _: &RepoToken, branch: &str) -> Result<String, HostError> {
            self.record(Call::Head(branch.to_string()));
            self.head.clone().map_err(status_error)
        }

        async fn create_branch_ref(
            &self,
            _: &RepoToken,
            branch: &str,
            sha: &str,
        ) -> Result<(), HostError> {
            self.record(Call::Create(branch.to_string(), sha.to_string()));
            if let Some(status) = self.create_failure {
                return Err(status_error(status));
            }
            if !self.branches.lock().unwrap().insert(branch.to_string()) {
                return Err(status_error(StatusCode::UNPROCESSABLE_ENTITY));
            }
            Ok(())
        }
    }
}
