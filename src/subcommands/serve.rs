//! `serve` subcommand.

use crate::{
    config::{Config, FileConfig, Overrides},
    constants::{CLIENT_ID_VAR, CLIENT_SECRET_VAR},
    server::{self, AppState},
};
use anyhow::Result;
use clap::Args;
use std::{net::SocketAddr, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// CLI arguments for the `serve` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct ServeArgs {
    /// Path to the configuration file. Defaults to `rfd.toml` in the working directory, if present.
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Address to listen on.
    #[arg(long, env = "RFD_BIND")]
    bind: Option<SocketAddr>,
    /// Public origin of the service. The OAuth callback URL is built from it.
    #[arg(long, env = "RFD_PUBLIC_URL")]
    public_url: Option<String>,
    /// The RFD repository, e.g. `github.com/oxidecomputer/rfd`.
    #[arg(long, env = "GITHUB_HOST")]
    repository: Option<String>,
    /// Base URL of the RFD API that lists existing RFDs.
    #[arg(long, env = "RFD_API_BACKEND_URL")]
    rfd_api: Option<String>,
    #[arg(long = "legacy-rfd-api", env = "RFD_API", hide = true)]
    legacy_rfd_api: Option<String>,
    /// Read RFDs from a local checkout. Number allocation and branch creation are disabled.
    #[arg(long, env = "LOCAL_RFD_REPO")]
    local_repo: Option<PathBuf>,
    /// Client ID of the GitHub OAuth app granting repository access.
    #[arg(long, env = CLIENT_ID_VAR, hide_env_values = true)]
    client_id: Option<String>,
    /// Client secret of the GitHub OAuth app granting repository access.
    #[arg(long, env = CLIENT_SECRET_VAR, hide_env_values = true)]
    client_secret: Option<String>,
    /// Key material for the session cookies, at least 64 bytes.
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    session_secret: Option<String>,
}

impl ServeArgs {
    /// Run the `serve` subcommand.
    pub async fn run(self) -> Result<()> {
        let file = FileConfig::load(self.config.as_deref())?;
        let config = Config::resolve(file, self.overrides())?;
        let state = AppState::from_config(config)?;

        let shutdown = CancellationToken::new();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("shutting down");
                        shutdown.cancel();
                    }
                    Err(err) => error!(%err, "failed to listen for ctrl-c"),
                }
            }
        });

        server::serve(state, shutdown).await
    }

    fn overrides(self) -> Overrides {
        Overrides {
            bind: self.bind,
            public_url: self.public_url,
            repository: self.repository,
            rfd_api: self
                .rfd_api
                .filter(|url| !url.is_empty())
                .or(self.legacy_rfd_api),
            local_repo: self.local_repo,
            client_id: self.client_id,
            client_secret: self.client_secret,
            session_secret: self.session_secret,
        }
    }
}
