//! Service configuration, resolved once at startup.
//!
//! Values come from an optional TOML file, overlaid by command line flags and environment
//! variables. The result is an immutable [Config] shared with every request handler.

use crate::{
    constants::{
        CLIENT_ID_VAR, CLIENT_SECRET_VAR, DEFAULT_BASE_BRANCH, DEFAULT_CONFIG_FILE_NAME,
        DEFAULT_MAX_ATTEMPTS, DEFAULT_REPOSITORY,
    },
    github::RepoInfo,
};
use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

/// Minimum length of the session secret, in bytes.
const MIN_SESSION_SECRET_LEN: usize = 64;

/// The on-disk configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<SocketAddr>,
    pub public_url: Option<String>,
    pub repository: Option<String>,
    pub github_api_url: Option<String>,
    pub github_web_url: Option<String>,
    pub base_branch: Option<String>,
    pub search: SearchFileConfig,
    pub request_timeout_secs: Option<u64>,
    pub secure_cookies: Option<bool>,
    pub rfd_api: Option<String>,
    pub local_repo: Option<PathBuf>,
}

/// The `[search]` table of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SearchFileConfig {
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
}

impl FileConfig {
    /// Loads the configuration file.
    ///
    /// ## Takes
    /// - `path` - An explicit path, which must exist. When `None`, `rfd.toml` in the working
    ///   directory is read if present.
    ///
    /// ## Returns
    /// - `Ok(FileConfig)` - The parsed file, or the defaults when there is no file.
    /// - `Err(_)` - The file could not be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE_NAME);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config at {}", path.display()))
    }
}

/// Values from flags and the environment. They take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub public_url: Option<String>,
    pub repository: Option<String>,
    pub rfd_api: Option<String>,
    pub local_repo: Option<PathBuf>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub session_secret: Option<String>,
}

/// Bounds of the branch availability search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::ZERO,
        }
    }
}

/// Where existing RFDs are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deployment {
    /// RFDs are read from a local checkout. Number allocation is unavailable.
    Local(PathBuf),
    /// RFDs are read from the RFD API.
    Remote { rfd_api: Url },
}

impl Deployment {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Client credentials of the GitHub OAuth app used for repository access.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Whether the repository OAuth integration can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoOAuthStatus {
    Enabled(OAuthCredentials),
    /// Names the variables that are unset or empty.
    Disabled { missing: Vec<&'static str> },
}

impl RepoOAuthStatus {
    /// Validates the OAuth app secrets. Empty values count as missing.
    pub fn from_values(client_id: Option<String>, client_secret: Option<String>) -> Self {
        let client_id = client_id.filter(|v| !v.trim().is_empty());
        let client_secret = client_secret.filter(|v| !v.trim().is_empty());
        match (client_id, client_secret) {
            (Some(id), Some(secret)) => Self::Enabled(OAuthCredentials::new(id, secret)),
            (id, secret) => Self::Disabled {
                missing: [(CLIENT_ID_VAR, id.is_none()), (CLIENT_SECRET_VAR, secret.is_none())]
                    .into_iter()
                    .filter_map(|(name, missing)| missing.then_some(name))
                    .collect(),
            },
        }
    }

    pub fn credentials(&self) -> Option<&OAuthCredentials> {
        match self {
            Self::Enabled(credentials) => Some(credentials),
            Self::Disabled { .. } => None,
        }
    }

    /// Returns the missing variables joined for display, e.g. in a log line.
    pub fn missing_vars(&self) -> String {
        match self {
            Self::Enabled(_) => String::new(),
            Self::Disabled { missing } => missing.iter().join(", "),
        }
    }
}

/// Key material for the session cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret(Vec<u8>);

impl SessionSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(<redacted>)")
    }
}

/// The resolved configuration of the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    /// Origin the service is reachable at; the OAuth callback URL is built from it.
    pub public_url: Url,
    pub repo: RepoInfo,
    pub github_api_base: Url,
    pub github_web_base: Url,
    pub base_branch: String,
    pub search: SearchConfig,
    pub request_timeout: Duration,
    pub secure_cookies: bool,
    pub deployment: Deployment,
    pub repo_oauth: RepoOAuthStatus,
    /// `None` means a random key is generated at startup.
    pub session_secret: Option<SessionSecret>,
}

impl Config {
    /// Resolves the configuration from the file and the overrides.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self> {
        let bind = overrides
            .bind
            .or(file.bind)
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3000)));

        let public_url = non_empty(overrides.public_url)
            .or(non_empty(file.public_url))
            .unwrap_or_else(|| format!("http://{bind}"));
        let public_url = Url::parse(&public_url)
            .with_context(|| format!("invalid public URL `{public_url}`"))?;

        let repository = non_empty(overrides.repository)
            .or(non_empty(file.repository))
            .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string());
        let repo = RepoInfo::parse(&repository)?;

        let github_api_base = non_empty(file.github_api_url)
            .unwrap_or_else(|| repo.default_api_base());
        let github_api_base = Url::parse(&github_api_base)
            .with_context(|| format!("invalid GitHub API URL `{github_api_base}`"))?;
        let github_web_base = non_empty(file.github_web_url)
            .unwrap_or_else(|| repo.default_web_base());
        let github_web_base = Url::parse(&github_web_base)
            .with_context(|| format!("invalid GitHub web URL `{github_web_base}`"))?;

        let deployment = match overrides.local_repo.or(file.local_repo) {
            Some(path) => Deployment::Local(path),
            None => {
                let rfd_api = non_empty(overrides.rfd_api)
                    .or(non_empty(file.rfd_api))
                    .ok_or_else(|| {
                        anyhow!("an RFD API URL is required unless a local repository is set")
                    })?;
                let rfd_api = Url::parse(&rfd_api)
                    .with_context(|| format!("invalid RFD API URL `{rfd_api}`"))?;
                Deployment::Remote { rfd_api }
            }
        };

        let session_secret = match non_empty(overrides.session_secret) {
            Some(secret) if secret.len() < MIN_SESSION_SECRET_LEN => {
                bail!("the session secret must be at least {MIN_SESSION_SECRET_LEN} bytes long")
            }
            Some(secret) => Some(SessionSecret(secret.into_bytes())),
            None => None,
        };

        let secure_cookies = file
            .secure_cookies
            .unwrap_or(public_url.scheme() != "http");

        Ok(Self {
            bind,
            repo_oauth: RepoOAuthStatus::from_values(overrides.client_id, overrides.client_secret),
            public_url,
            repo,
            github_api_base,
            github_web_base,
            base_branch: non_empty(file.base_branch)
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
            search: SearchConfig {
                max_attempts: file.search.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                backoff: Duration::from_millis(file.search.backoff_ms.unwrap_or_default()),
            },
            request_timeout: Duration::from_secs(file.request_timeout_secs.unwrap_or(10).max(1)),
            secure_cookies,
            deployment,
            session_secret,
        })
    }

    /// Returns the absolute URL of `path` on this service.
    pub fn public_endpoint(&self, path: &str) -> Result<Url> {
        self.public_url
            .join(path)
            .with_context(|| format!("cannot build URL for `{path}`"))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
pub(crate) mod test {
    use super::{Config, Deployment, FileConfig, OAuthCredentials, Overrides, RepoOAuthStatus};
    use std::time::Duration;

    /// A remote-mode configuration pointing GitHub and the RFD API at `server`.
    pub(crate) fn config(server: &str) -> Config {
        let file = FileConfig {
            github_api_url: Some(server.to_string()),
            github_web_url: Some(server.to_string()),
            rfd_api: Some(server.to_string()),
            ..Default::default()
        };
        let overrides = Overrides {
            public_url: Some("http://rfd.test".to_string()),
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            ..Default::default()
        };
        Config::resolve(file, overrides).unwrap()
    }

    #[test]
    fn empty_secrets_count_as_missing() {
        assert_eq!(
            RepoOAuthStatus::from_values(Some("id".into()), Some("secret".into())),
            RepoOAuthStatus::Enabled(OAuthCredentials::new("id", "secret"))
        );

        let cases = [
            (None, None, vec!["GITHUB_REPO_CLIENT_ID", "GITHUB_REPO_CLIENT_SECRET"]),
            (Some("id"), None, vec!["GITHUB_REPO_CLIENT_SECRET"]),
            (None, Some("secret"), vec!["GITHUB_REPO_CLIENT_ID"]),
            (Some(""), Some("secret"), vec!["GITHUB_REPO_CLIENT_ID"]),
            (Some("id"), Some(""), vec!["GITHUB_REPO_CLIENT_SECRET"]),
        ];
        for (id, secret, missing) in cases {
            let status =
                RepoOAuthStatus::from_values(id.map(Into::into), secret.map(Into::into));
            assert_eq!(status, RepoOAuthStatus::Disabled { missing: missing.clone() });
            assert!(status.credentials().is_none());
            assert_eq!(status.missing_vars(), missing.join(", "));
        }
    }

    #[test]
    fn resolves_defaults() {
        let config = Config::resolve(
            FileConfig::default(),
            Overrides {
                rfd_api: Some("https://rfd-api.example".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.bind.to_string(), "127.0.0.1:3000");
        assert_eq!(config.public_url.as_str(), "http://127.0.0.1:3000/");
        assert_eq!(config.repo.to_string(), "github.com/oxidecomputer/rfd");
        assert_eq!(config.github_api_base.as_str(), "https://api.github.com/");
        assert_eq!(config.github_web_base.as_str(), "https://github.com/");
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.search.max_attempts, 10);
        assert_eq!(config.search.backoff, Duration::ZERO);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.secure_cookies);
        assert!(config.repo_oauth.credentials().is_none());
        assert!(config.session_secret.is_none());
    }

    #[test]
    fn enterprise_hosts_use_the_v3_api() {
        let config = Config::resolve(
            FileConfig::default(),
            Overrides {
                repository: Some("git.corp.example/docs/rfd".to_string()),
                rfd_api: Some("https://rfd-api.example".to_string()),
                public_url: Some("https://rfd.corp.example".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            config.github_api_base.as_str(),
            "https://git.corp.example/api/v3"
        );
        assert!(config.secure_cookies);
    }

    #[test]
    fn parses_the_file_format() {
        let file: FileConfig = toml::from_str(
            r#"
            bind = "0.0.0.0:8080"
            repository = "github.com/acme/rfd"
            base-branch = "trunk"
            request-timeout-secs = 3
            local-repo = "/srv/rfd"

            [search]
            max-attempts = 4
            backoff-ms = 250
            "#,
        )
        .unwrap();

        let config = Config::resolve(file, Overrides::default()).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.repo.owner, "acme");
        assert_eq!(config.base_branch, "trunk");
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.search.max_attempts, 4);
        assert_eq!(config.search.backoff, Duration::from_millis(250));
        assert!(config.deployment.is_local());

        assert!(toml::from_str::<FileConfig>("bogus = 1").is_err());
    }

    #[test]
    fn overrides_win_over_the_file() {
        let file = FileConfig {
            repository: Some("github.com/acme/rfd".to_string()),
            rfd_api: Some("https://file.example".to_string()),
            ..Default::default()
        };
        let overrides = Overrides {
            repository: Some("github.com/other/rfds".to_string()),
            rfd_api: Some("https://env.example".to_string()),
            ..Default::default()
        };
        let config = Config::resolve(file, overrides).unwrap();
        assert_eq!(config.repo.owner, "other");
        assert!(matches!(
            config.deployment,
            Deployment::Remote { ref rfd_api } if rfd_api.as_str() == "https://env.example/"
        ));
    }

    #[test]
    fn rejects_invalid_settings() {
        // Remote mode without an RFD API.
        assert!(Config::resolve(FileConfig::default(), Overrides::default()).is_err());

        let short_secret = Overrides {
            rfd_api: Some("https://rfd-api.example".to_string()),
            session_secret: Some("too short".to_string()),
            ..Default::default()
        };
        assert!(Config::resolve(FileConfig::default(), short_secret).is_err());

        let bad_repo = Overrides {
            rfd_api: Some("https://rfd-api.example".to_string()),
            repository: Some("github.com/only-owner".to_string()),
            ..Default::default()
        };
        assert!(Config::resolve(FileConfig::default(), bad_repo).is_err());
    }

    #[test]
    fn secrets_are_redacted_from_debug_output() {
        let rendered = format!("{:?}", config("http://127.0.0.1:1"));
        assert!(rendered.contains("client-id"));
        assert!(!rendered.contains("client-secret"));
    }
}
