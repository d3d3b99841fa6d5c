//! Repository visibility and write access for a credential.

use super::{HostError, RepoHost};
use crate::session::RepoToken;
use reqwest::StatusCode;

/// What a repository credential may do with the RFD repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoAccess {
    /// GitHub rejected the credential outright.
    TokenInvalid,
    /// The credential is valid but cannot see the repository.
    NoAccess,
    /// The repository is visible but the credential cannot push to it.
    ReadOnly,
    /// The credential can push branches.
    ReadWrite,
}

impl RepoAccess {
    /// Returns whether the repository is visible to the credential.
    pub fn has_access(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Returns whether the credential can create branches.
    pub fn can_push(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Determines what `token` may do with the repository behind `host`.
///
/// Derived fresh on every call. A rejected credential and a missing repository are answers,
/// not errors; only failures that say nothing about the credential are returned as `Err`.
///
/// ## Takes
/// - `host` - The repository host.
/// - `token` - The credential to check.
///
/// ## Returns
/// - `Ok(RepoAccess)` - The access level of the credential.
/// - `Err(HostError)` - GitHub could not be asked.
pub async fn check_repo_permissions(
    host: &dyn RepoHost,
    token: &RepoToken,
) -> Result<RepoAccess, HostError> {
    match host.repository(token).await {
        Ok(view) => {
            let permissions = view.permissions.unwrap_or_default();
            let access = if permissions.push || permissions.maintain || permissions.admin {
                RepoAccess::ReadWrite
            } else {
                RepoAccess::ReadOnly
            };
            Ok(access)
        }
        Err(err) => match err.status() {
            Some(StatusCode::UNAUTHORIZED) => Ok(RepoAccess::TokenInvalid),
            // Private repositories are reported as missing to those who cannot see them.
            Some(StatusCode::FORBIDDEN | StatusCode::NOT_FOUND) => Ok(RepoAccess::NoAccess),
            _ => Err(err),
        },
    }
}
