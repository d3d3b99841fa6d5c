//! The HTTP service behind `rfd serve`.

use crate::{
    config::{Config, Deployment},
    constants::REPO_OAUTH_CALLBACK_PATH,
    github::{GitHubClient, RepoHost},
    oauth::RepoOAuth,
    session::{Authenticator, SessionAuthenticator},
    source::{RemoteRfdSource, RfdSource},
};
use anyhow::{anyhow, Context, Result};
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod routes;

pub use routes::router;

/// State shared by every request handler. Immutable once built.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Encrypts the session cookies.
    pub key: Key,
    /// `None` when the OAuth app secrets are missing.
    pub oauth: Option<Arc<RepoOAuth>>,
    pub host: Arc<dyn RepoHost>,
    /// `None` in local mode.
    pub source: Option<Arc<dyn RfdSource>>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

impl AppState {
    /// Builds the production state from the resolved configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let key = match &config.session_secret {
            Some(secret) => Key::try_from(secret.as_bytes())
                .map_err(|err| anyhow!("invalid session secret: {err}"))?,
            None => {
                warn!("no session secret configured; sessions will not survive a restart");
                Key::generate()
            }
        };

        let oauth = match config.repo_oauth.credentials() {
            Some(credentials) => Some(Arc::new(RepoOAuth::new(
                credentials.clone(),
                &config.github_web_base,
                config.public_endpoint(REPO_OAUTH_CALLBACK_PATH)?,
                config.request_timeout,
            )?)),
            None => {
                warn!(
                    missing = %config.repo_oauth.missing_vars(),
                    "GitHub repo OAuth is not configured; branch creation is disabled"
                );
                None
            }
        };

        let host = GitHubClient::new(
            config.github_api_base.as_str(),
            config.repo.clone(),
            config.request_timeout,
        )
        .context("failed to create GitHub client")?;

        let source: Option<Arc<dyn RfdSource>> = match &config.deployment {
            Deployment::Local(path) => {
                info!(path = %path.display(), "running in local mode; number allocation is disabled");
                None
            }
            Deployment::Remote { rfd_api } => Some(Arc::new(
                RemoteRfdSource::new(rfd_api, config.request_timeout)
                    .context("failed to create RFD API client")?,
            )),
        };

        Ok(Self {
            config: Arc::new(config),
            key,
            oauth,
            host: Arc::new(host),
            source,
            authenticator: Arc::new(SessionAuthenticator),
        })
    }
}

/// Serves the API until `shutdown` is cancelled.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let bind = state.config.bind;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, repo = %state.config.repo, "rfd listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server failed")
}
