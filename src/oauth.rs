//! The GitHub OAuth handshake that grants the repository credential.
//!
//! This is separate from the primary sign-in: it requests the `repo` scope, and the token it
//! yields lives under its own session key. Each handshake is bound to the session that
//! started it by a single-use nonce.

use crate::{
    config::OAuthCredentials,
    constants::{REPO_OAUTH_SCOPE, USER_AGENT},
    session::{RepoToken, Session},
};
use anyhow::{Context, Result};
use rand::RngCore;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use url::Url;

/// Number of random bytes in an anti-forgery nonce.
const NONCE_LEN: usize = 16;

/// Query parameters GitHub sends to the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Why a handshake did not produce a credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The user declined, or GitHub reported an error.
    #[error("authorization denied")]
    Denied,
    /// The callback lacks `code` or `state`.
    #[error("callback is missing parameters")]
    MissingParams,
    /// The callback's `state` does not match the session's nonce.
    #[error("state does not match the pending handshake")]
    StateMismatch,
    /// The code could not be exchanged for a token. Carries the detail for logging.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}

impl HandshakeError {
    /// Returns the coarse reason reported to the browser.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::MissingParams => "missing_params",
            Self::StateMismatch => "state_mismatch",
            Self::TokenExchange(_) => "token_exchange",
        }
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// The OAuth app used for repository access.
#[derive(Debug, Clone)]
pub struct RepoOAuth {
    http: reqwest::Client,
    credentials: OAuthCredentials,
    authorize_url: Url,
    token_url: Url,
    callback_url: Url,
}

impl RepoOAuth {
    /// Creates a new [RepoOAuth].
    ///
    /// ## Takes
    /// - `credentials` - The OAuth app's client credentials.
    /// - `web_base` - GitHub web base serving `/login/oauth/*`.
    /// - `callback_url` - Absolute URL of this service's callback endpoint.
    /// - `timeout` - Timeout of the token exchange.
    pub fn new(
        credentials: OAuthCredentials,
        web_base: &Url,
        callback_url: Url,
        timeout: Duration,
    ) -> Result<Self> {
        let base = web_base.as_str().trim_end_matches('/');
        let authorize_url = Url::parse(&format!("{base}/login/oauth/authorize"))
            .context("invalid OAuth authorize URL")?;
        let token_url = Url::parse(&format!("{base}/login/oauth/access_token"))
            .context("invalid OAuth token URL")?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to create OAuth client")?;

        Ok(Self {
            http,
            credentials,
            authorize_url,
            token_url,
            callback_url,
        })
    }

    /// Starts a handshake: stores a fresh nonce in `session` and returns the GitHub URL to
    /// send the browser to.
    ///
    /// A nonce left over from an abandoned handshake is replaced.
    pub fn initiate(&self, session: &mut Session) -> Url {
        let nonce = generate_nonce();
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", self.callback_url.as_str())
            .append_pair("scope", REPO_OAUTH_SCOPE)
            .append_pair("state", &nonce);
        session.store_oauth_state(nonce);
        url
    }

    /// Finishes a handshake from the callback `params`.
    ///
    /// The session's nonce is consumed before anything else is looked at, so a callback can
    /// never be replayed, whatever its outcome. On success the credential is stored in
    /// `session` and returned.
    pub async fn complete(
        &self,
        session: &mut Session,
        params: &CallbackParams,
    ) -> Result<RepoToken, HandshakeError> {
        let stored = session.take_oauth_state();

        if let Some(err) = &params.error {
            warn!(
                error = %err,
                description = params.error_description.as_deref().unwrap_or_default(),
                "GitHub declined the repository authorization"
            );
            return Err(HandshakeError::Denied);
        }

        let code = params.code.as_deref().filter(|v| !v.is_empty());
        let state = params.state.as_deref().filter(|v| !v.is_empty());
        let (Some(code), Some(state)) = (code, state) else {
            return Err(HandshakeError::MissingParams);
        };

        match stored {
            Some(stored) if constant_time_eq(stored.as_bytes(), state.as_bytes()) => {}
            _ => {
                warn!("OAuth state mismatch");
                return Err(HandshakeError::StateMismatch);
            }
        }

        let token = self.exchange(code).await.inspect_err(|err| {
            error!(%err, "failed to exchange GitHub code for token");
        })?;
        session.set_repo_token(token.clone());
        Ok(token)
    }

    async fn exchange(&self, code: &str) -> Result<RepoToken, HandshakeError> {
        let body = TokenRequest {
            client_id: &self.credentials.client_id,
            client_secret: self.credentials.client_secret(),
            code,
            redirect_uri: self.callback_url.as_str(),
        };
        let response = self
            .http
            .post(self.token_url.clone())
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| HandshakeError::TokenExchange(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::TokenExchange(format!(
                "token endpoint responded with {status}"
            )));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|err| HandshakeError::TokenExchange(err.to_string()))?;
        if let Some(err) = data.error {
            return Err(HandshakeError::TokenExchange(
                data.error_description.unwrap_or(err),
            ));
        }
        data.access_token
            .filter(|token| !token.is_empty())
            .map(RepoToken::new)
            .ok_or_else(|| HandshakeError::TokenExchange("response carries no token".to_string()))
    }
}

/// Returns a fresh hex-encoded nonce.
fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |diff, (l, r)| diff | (l ^ r))
        == 0
}
