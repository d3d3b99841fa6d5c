//! HTTP client for a running `rfd serve`, used by `rfd new`.

use crate::{
    constants::{SESSION_COOKIE, USER_AGENT},
    flow::{driver::FlowApi, ApiFailure},
    number::RfdNumber,
    wire::{CreateBranchRequest, CreatedBranch, ErrorBody, NextNumber, RepoStatus},
};
use async_trait::async_trait;
use reqwest::{header, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::debug;
use url::Url;

/// The value of the user's session cookie, shared between the client and the prompt that
/// refreshes it after the repository handshake.
#[derive(Debug, Clone, Default)]
pub struct SessionCookie(Arc<Mutex<String>>);

impl SessionCookie {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(value.into())))
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, value: impl Into<String>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = value.into();
    }
}

/// [FlowApi] over HTTP.
#[derive(Debug, Clone)]
pub struct RfdClient {
    http: reqwest::Client,
    base: Url,
    cookie: SessionCookie,
}

impl RfdClient {
    /// Creates a new [RfdClient] for the service at `base`.
    pub fn new(base: Url, cookie: SessionCookie, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base, cookie })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiFailure> {
        self.base
            .join(path)
            .map_err(|err| ApiFailure::Network(err.to_string()))
    }

    /// Sends `request` with the session cookie and decodes the response.
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiFailure> {
        let cookie = self.cookie.get();
        let request = if cookie.is_empty() {
            request
        } else {
            request.header(header::COOKIE, format!("{SESSION_COOKIE}={cookie}"))
        };

        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| ApiFailure::Network(err.to_string()))?;
        self.absorb_session(&response);

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ErrorBody>().await.unwrap_or_default();
            debug!(%status, ?body, "request failed");
            return Err(ApiFailure::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|err| ApiFailure::Network(err.to_string()))
    }

    /// Picks up a refreshed session cookie, the way a browser would.
    fn absorb_session(&self, response: &Response) {
        let prefix = format!("{SESSION_COOKIE}=");
        let refreshed = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .filter_map(|pair| pair.trim().strip_prefix(prefix.as_str()))
            .last();
        if let Some(value) = refreshed {
            self.cookie.set(value);
        }
    }
}

#[async_trait]
impl FlowApi for RfdClient {
    async fn repo_status(&self) -> Result<RepoStatus, ApiFailure> {
        let url = self.endpoint("/api/rfd/github-status")?;
        self.call(self.http.get(url)).await
    }

    async fn next_number(&self) -> Result<NextNumber, ApiFailure> {
        let url = self.endpoint("/api/rfd/next-number")?;
        self.call(self.http.get(url)).await
    }

    async fn create_branch(&self, number: RfdNumber) -> Result<CreatedBranch, ApiFailure> {
        let url = self.endpoint("/api/rfd/create-branch")?;
        let body = CreateBranchRequest {
            rfd_number: number,
            base_branch: None,
        };
        self.call(self.http.post(url).json(&body)).await
    }
}
