//! Finding a free RFD branch and creating it.

use super::{HostError, RepoHost};
use crate::{number::RfdNumber, session::RepoToken};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::form_urlencoded;

/// Result of a [BranchProber::search].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    /// The number to offer.
    pub available: RfdNumber,
    /// Whether `available` differs from the number the search started at.
    pub adjusted: bool,
}

impl Availability {
    fn new(start: RfdNumber, available: RfdNumber) -> Self {
        Self {
            available,
            adjusted: available != start,
        }
    }
}

/// Walks forward from a candidate number until it finds one whose branch does not exist.
pub struct BranchProber<'a> {
    host: &'a dyn RepoHost,
    max_attempts: u32,
    backoff: Duration,
}

impl<'a> BranchProber<'a> {
    /// Creates a new [BranchProber].
    ///
    /// ## Takes
    /// - `host` - The repository host to probe.
    /// - `max_attempts` - Upper bound on the number of existence probes.
    /// - `backoff` - Pause between consecutive probes.
    pub fn new(host: &'a dyn RepoHost, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            host,
            max_attempts,
            backoff,
        }
    }

    /// Searches `start`, `start + 1`, ... for a number whose branch is free.
    ///
    /// Probes run one at a time, in increasing order, and never more than `max_attempts` of
    /// them. If every probed branch exists, the last probed number is returned anyway: the
    /// create call for it then fails with an exact `branch_exists` error. A probe that fails
    /// for any reason other than 404 is logged and its number treated as free, for the same
    /// reason.
    pub async fn search(&self, token: &RepoToken, start: RfdNumber) -> Availability {
        let mut last = start;
        for attempt in 0..self.max_attempts {
            let Some(candidate) = start.checked_add(attempt) else {
                break;
            };
            if attempt > 0 && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff).await;
            }
            last = candidate;

            let branch = candidate.branch_name();
            match self.host.branch_exists(token, &branch).await {
                Ok(true) => debug!(%branch, "branch already exists"),
                Ok(false) => return Availability::new(start, candidate),
                Err(err) => {
                    warn!(%branch, %err, "branch probe failed, offering the number anyway");
                    return Availability::new(start, candidate);
                }
            }
        }

        debug!(%start, attempts = self.max_attempts, "no free branch found");
        Availability::new(start, last)
    }
}

/// Failures of [BranchCreator::create].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreateBranchError {
    /// GitHub refused to create the ref because it exists.
    #[error("Branch \"{0}\" already exists")]
    BranchExists(String),
    /// GitHub rejected the credential.
    #[error("GitHub authentication failed. Please reconnect your GitHub account.")]
    Auth,
    /// Anything else. Carries the detail for logging.
    #[error("{0}")]
    Api(String),
}

/// Creates RFD branches off a base branch.
pub struct BranchCreator<'a> {
    host: &'a dyn RepoHost,
}

impl<'a> BranchCreator<'a> {
    pub fn new(host: &'a dyn RepoHost) -> Self {
        Self { host }
    }

    /// Creates `branch` at the head of `base`.
    ///
    /// Only a ref is created; no commit is authored.
    ///
    /// ## Returns
    /// - `Ok(String)` - The name of the created branch.
    /// - `Err(CreateBranchError)` - The classified failure.
    pub async fn create(
        &self,
        token: &RepoToken,
        branch: &str,
        base: &str,
    ) -> Result<String, CreateBranchError> {
        let sha = self
            .host
            .branch_head(token, base)
            .await
            .map_err(|err| classify(err, branch, false))?;
        self.host
            .create_branch_ref(token, branch, &sha)
            .await
            .map_err(|err| classify(err, branch, true))?;
        Ok(branch.to_string())
    }
}

fn classify(err: HostError, branch: &str, creating: bool) -> CreateBranchError {
    match err.status() {
        Some(StatusCode::UNPROCESSABLE_ENTITY) if creating => {
            CreateBranchError::BranchExists(branch.to_string())
        }
        Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => CreateBranchError::Auth,
        _ => CreateBranchError::Api(err.to_string()),
    }
}

/// Returns the GitHub "new file" URL that opens the editor on `branch`, pre-filled with
/// `template` at `rfd/NNNN/README.adoc`.
pub fn editor_url(repo_url: &str, branch: &str, number: RfdNumber, template: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("filename", &format!("rfd/{}/README.adoc", number.formatted()))
        .append_pair("value", template)
        .finish();
    format!("{repo_url}/new/{branch}?{query}")
}

/// Returns the AsciiDoc skeleton of a new RFD.
pub fn rfd_template(author: Option<&str>) -> String {
    let author = author.filter(|name| !name.trim().is_empty()).unwrap_or("Your Name");
    format!(
        ":authors: {author}
:state: prediscussion
:discussion:
:labels:

= RFD Title Here

== Introduction

Describe the problem or opportunity this RFD addresses.

== Background

Provide relevant background information.

== Proposal

Describe your proposed solution.
"
    )
}
