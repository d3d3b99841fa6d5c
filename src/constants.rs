//! Constants for the `rfd` application.

/// Prefix of every RFD branch name, followed by the zero-padded number.
pub(crate) const BRANCH_PREFIX: &str = "rfd-";

/// Width the RFD number is zero-padded to in its canonical form.
pub(crate) const NUMBER_WIDTH: usize = 4;

/// Name of the encrypted session cookie.
pub(crate) const SESSION_COOKIE: &str = "rfd_session";

/// Name of the short-lived cookie remembering where to send the user after the handshake.
pub(crate) const RETURN_TO_COOKIE: &str = "rfd_return_to";

/// Lifetime of the [RETURN_TO_COOKIE], in minutes.
pub(crate) const RETURN_TO_TTL_MINUTES: i64 = 10;

/// OAuth scope requested for the repository credential.
pub(crate) const REPO_OAUTH_SCOPE: &str = "repo";

/// Path of the OAuth callback, relative to the public URL.
pub(crate) const REPO_OAUTH_CALLBACK_PATH: &str = "/auth/github-repo/callback";

/// Query flag appended to the return target when the credential cannot push.
pub(crate) const NO_PUSH_FLAG: &str = "github_no_push";

/// Query parameter carrying the coarse handshake failure reason.
pub(crate) const AUTH_ERROR_PARAM: &str = "github_auth_error";

/// Environment variable holding the OAuth app client ID.
pub(crate) const CLIENT_ID_VAR: &str = "GITHUB_REPO_CLIENT_ID";

/// Environment variable holding the OAuth app client secret.
pub(crate) const CLIENT_SECRET_VAR: &str = "GITHUB_REPO_CLIENT_SECRET";

pub(crate) const DEFAULT_REPOSITORY: &str = "https://github.com/oxidecomputer/rfd";
pub(crate) const DEFAULT_BASE_BRANCH: &str = "main";
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub(crate) const DEFAULT_CONFIG_FILE_NAME: &str = "rfd.toml";

/// Grace delay before a dismissed flow resets to idle.
pub(crate) const FLOW_RESET_DELAY_MS: u64 = 200;

/// User agent sent on outbound requests.
pub(crate) const USER_AGENT: &str = concat!("rfd/", env!("CARGO_PKG_VERSION"));

/// Where the client sends the user when the primary session has expired.
pub(crate) const SIGN_IN_EXPIRED_PATH: &str = "/login?expired=true";
