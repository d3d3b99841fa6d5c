//! The RFDs that already exist, as far as number allocation is concerned.

use crate::{constants::USER_AGENT, session::User};
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failures while listing existing RFDs.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The user's primary credential was rejected.
    #[error("the RFD API rejected the session")]
    SessionExpired,
    /// Any other failure.
    #[error("failed to fetch RFDs: {0}")]
    Fetch(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

/// Lists the numbers of the RFDs visible to a user.
#[async_trait]
pub trait RfdSource: Send + Sync {
    /// Returns the raw numbers of every RFD `user` can see. The list may hold malformed
    /// entries such as zero; the allocator discards them.
    async fn used_numbers(&self, user: &User) -> Result<Vec<u32>, SourceError>;
}

#[derive(Deserialize)]
struct RfdSummary {
    rfd_number: i64,
}

/// [RfdSource] backed by the RFD API.
#[derive(Debug, Clone)]
pub struct RemoteRfdSource {
    http: reqwest::Client,
    list_url: Url,
}

impl RemoteRfdSource {
    /// Creates a new [RemoteRfdSource] for the API rooted at `api_base`.
    pub fn new(api_base: &Url, timeout: Duration) -> Result<Self, SourceError> {
        let base = api_base.as_str().trim_end_matches('/');
        let list_url = Url::parse(&format!("{base}/rfd"))
            .map_err(|err| SourceError::Fetch(err.to_string()))?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, list_url })
    }
}

#[async_trait]
impl RfdSource for RemoteRfdSource {
    async fn used_numbers(&self, user: &User) -> Result<Vec<u32>, SourceError> {
        let response = self
            .http
            .get(self.list_url.clone())
            .bearer_auth(&user.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(SourceError::SessionExpired),
            status if !status.is_success() => {
                return Err(SourceError::Fetch(format!("RFD API responded with {status}")))
            }
            _ => {}
        }

        let rfds: Vec<RfdSummary> = response.json().await?;
        // Out-of-range entries are malformed; zero passes through and is dropped later.
        Ok(rfds
            .into_iter()
            .filter_map(|rfd| u32::try_from(rfd.rfd_number).ok())
            .collect())
    }
}
