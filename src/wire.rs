//! JSON bodies exchanged between the `rfd` service and its clients.

use crate::number::RfdNumber;
use serde::{Deserialize, Serialize};

/// Machine-readable failure codes carried in [ErrorBody].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionExpired,
    GithubAuthRequired,
    GithubNotConfigured,
    AuthError,
    PermissionDenied,
    BranchExists,
    ApiError,
    /// A code this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human readable message, safe to show to the user.
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Response of `GET /api/rfd/next-number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextNumber {
    pub next_number: RfdNumber,
    pub formatted_number: String,
    /// The allocator's candidate, present when the availability search moved past it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_from: Option<RfdNumber>,
}

/// Request body of `POST /api/rfd/create-branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranchRequest {
    pub rfd_number: RfdNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

/// Response of a successful `POST /api/rfd/create-branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBranch {
    pub success: bool,
    pub branch_name: String,
    pub rfd_number: RfdNumber,
    pub formatted_number: String,
}

/// Response of `GET /api/rfd/github-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub local_mode: bool,
    /// Whether the repository OAuth integration is configured.
    pub configured: bool,
    /// Whether the session holds a repository credential.
    pub connected: bool,
    pub repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}
