//! Errors surfaced by the `rfd` HTTP endpoints.

use crate::wire::{ErrorBody, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Every failure an endpoint can answer with.
///
/// The [std::fmt::Display] text of each variant is the message shown to the user. Detail
/// from remote systems is logged where it is translated into one of these variants and never
/// makes it into a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The service reads RFDs from a local checkout and has no remote repository.
    #[error("Not available in local mode")]
    LocalMode,
    /// The repository OAuth integration is missing its secrets.
    #[error("GitHub repo integration is not configured")]
    NotConfigured,
    /// The request carries no primary session.
    #[error("Authentication required")]
    Unauthenticated,
    /// The primary credential was rejected by the RFD API.
    #[error("Session expired")]
    SessionExpired,
    /// No repository credential is stored in the session.
    #[error("GitHub repository access required")]
    CredentialMissing,
    /// The repository credential was rejected while listing numbers.
    #[error("GitHub authentication expired. Please reconnect your GitHub account.")]
    CredentialExpired,
    /// The repository credential was rejected while creating a branch.
    #[error("GitHub authentication failed. Please reconnect your GitHub account.")]
    CredentialInvalid,
    /// The credential cannot see the repository.
    #[error("You do not have access to the RFD repository. The repository may be private or you may need to be added as a collaborator.")]
    NoRepoAccess,
    /// The credential can see the repository but cannot push to it.
    #[error("You do not have write access to the RFD repository. Please contact a repository administrator.")]
    ReadOnlyAccess,
    /// The request body does not carry a positive RFD number.
    #[error("rfdNumber is required and must be a number")]
    MalformedNumber,
    /// The branch for the requested number already exists.
    #[error("Branch \"{0}\" already exists")]
    BranchExists(String),
    /// GitHub failed in a way that may succeed on retry.
    #[error("Failed to create branch on GitHub")]
    Api,
    /// No next number can be derived from the existing RFDs.
    #[error("Unable to determine next RFD number")]
    AllocationUndetermined,
    /// Anything else, including failures to reach the RFD API.
    #[error("Failed to determine next RFD number")]
    Internal,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Returns the HTTP status the error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::LocalMode | Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated | Self::SessionExpired | Self::CredentialExpired => {
                StatusCode::UNAUTHORIZED
            }
            Self::CredentialMissing | Self::NoRepoAccess | Self::ReadOnlyAccess => {
                StatusCode::FORBIDDEN
            }
            Self::MalformedNumber => StatusCode::BAD_REQUEST,
            Self::BranchExists(_) => StatusCode::CONFLICT,
            Self::CredentialInvalid | Self::Api | Self::AllocationUndetermined | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the machine-readable code, if the error carries one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::NotConfigured => Some(ErrorCode::GithubNotConfigured),
            Self::SessionExpired => Some(ErrorCode::SessionExpired),
            Self::CredentialMissing => Some(ErrorCode::GithubAuthRequired),
            Self::CredentialExpired | Self::CredentialInvalid => Some(ErrorCode::AuthError),
            Self::NoRepoAccess | Self::ReadOnlyAccess => Some(ErrorCode::PermissionDenied),
            Self::BranchExists(_) => Some(ErrorCode::BranchExists),
            Self::Api => Some(ErrorCode::ApiError),
            Self::LocalMode
            | Self::Unauthenticated
            | Self::MalformedNumber
            | Self::AllocationUndetermined
            | Self::Internal => None,
        }
    }

    /// Returns the JSON body of the error.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::ApiError;
    use crate::wire::ErrorCode;
    use axum::http::StatusCode;

    #[test]
    fn branch_exists_names_the_branch() {
        let err = ApiError::BranchExists("rfd-0012".to_string());
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), Some(ErrorCode::BranchExists));
        assert_eq!(err.body().error, "Branch \"rfd-0012\" already exists");
    }

    #[test]
    fn credential_failures_share_the_auth_code() {
        assert_eq!(ApiError::CredentialExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::CredentialInvalid.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::CredentialExpired.code(), Some(ErrorCode::AuthError));
        assert_eq!(ApiError::CredentialInvalid.code(), Some(ErrorCode::AuthError));
    }

    #[test]
    fn disabled_features_are_unavailable() {
        assert_eq!(ApiError::LocalMode.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::NotConfigured.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::LocalMode.code(), None);
        assert_eq!(
            ApiError::NotConfigured.code(),
            Some(ErrorCode::GithubNotConfigured)
        );
    }
}
