//! The encrypted, cookie-backed user session.
//!
//! The whole session is one JSON document inside a private (encrypted and authenticated)
//! cookie. It holds the primary identity written by sign-in, the repository credential
//! obtained through the GitHub handshake, and the handshake's pending anti-forgery nonce.
//! Each request decodes the cookie, mutates it, and re-serializes it into the response, so
//! nothing about a session is held in server memory.

use crate::constants::SESSION_COOKIE;
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The signed-in user, as established by the primary sign-in.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Credential for the RFD API, used to list existing RFDs.
    pub token: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// A repository-scoped GitHub access token.
///
/// Independent of the primary credential. The token is never printed; use
/// [RepoToken::expose] at the single point where it is sent to GitHub.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoToken(String);

impl RepoToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RepoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RepoToken(<redacted>)")
    }
}

/// Serialized contents of the session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(
        rename = "githubRepoToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    repo_token: Option<RepoToken>,
    #[serde(
        rename = "githubRepoOAuthState",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    oauth_state: Option<String>,
}

#[cfg(test)]
impl SessionData {
    /// Creates session data for a signed-in user.
    pub fn signed_in(user: User) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }

    /// Adds a repository credential.
    pub fn with_repo_token(mut self, token: RepoToken) -> Self {
        self.repo_token = Some(token);
        self
    }
}

/// A decoded session for the duration of one request.
#[derive(Debug, Clone, Default)]
pub struct Session {
    data: SessionData,
}

impl Session {
    /// Decodes the session from the request's private cookie jar.
    ///
    /// A missing cookie, or one that fails to decrypt or parse, yields an empty session.
    pub fn from_jar(jar: &PrivateCookieJar) -> Self {
        let data = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| match serde_json::from_str(cookie.value()) {
                Ok(data) => Some(data),
                Err(err) => {
                    tracing::debug!(%err, "discarding undecodable session");
                    None
                }
            })
            .unwrap_or_default();
        Self { data }
    }

    /// Returns the signed-in user, if any.
    pub fn user(&self) -> Option<&User> {
        self.data.user.as_ref()
    }

    /// Returns the stored repository credential.
    pub fn repo_token(&self) -> Option<&RepoToken> {
        self.data.repo_token.as_ref()
    }

    /// Stores the repository credential, replacing any previous one.
    pub fn set_repo_token(&mut self, token: RepoToken) {
        self.data.repo_token = Some(token);
    }

    /// Forgets the repository credential.
    pub fn clear_repo_token(&mut self) {
        self.data.repo_token = None;
    }

    /// Remembers the anti-forgery nonce of a handshake in progress.
    pub fn store_oauth_state(&mut self, state: String) {
        self.data.oauth_state = Some(state);
    }

    /// Reads and clears the pending anti-forgery nonce.
    pub fn take_oauth_state(&mut self) -> Option<String> {
        self.data.oauth_state.take()
    }

    /// Re-serializes the session into `jar`, to be returned with the response.
    pub fn commit(self, jar: PrivateCookieJar, secure: bool) -> PrivateCookieJar {
        // Serializing plain strings and options cannot fail.
        let value = serde_json::to_string(&self.data).unwrap_or_default();
        jar.add(
            Cookie::build((SESSION_COOKIE, value))
                .path("/")
                .http_only(true)
                .secure(secure)
                .same_site(SameSite::Lax),
        )
    }
}

/// The primary sign-in, seen from this service.
pub trait Authenticator: Send + Sync {
    /// Returns the user the request is signed in as.
    fn authenticate(&self, session: &Session) -> Option<User>;
}

/// Reads the identity the primary sign-in stored in the shared session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAuthenticator;

impl Authenticator for SessionAuthenticator {
    fn authenticate(&self, session: &Session) -> Option<User> {
        session.user().cloned()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{RepoToken, Session, SessionData, User};
    use crate::constants::SESSION_COOKIE;
    use axum::{http::header::SET_COOKIE, response::IntoResponse};
    use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar};

    pub(crate) fn user() -> User {
        User {
            id: "user-1".to_string(),
            display_name: Some("Ada Lovelace".to_string()),
            token: "primary-token".to_string(),
        }
    }

    /// Encrypts `data` with `key` and returns a `Cookie` request header value.
    pub(crate) fn session_cookie(key: &Key, data: &SessionData) -> String {
        let jar = PrivateCookieJar::new(key.clone()).add(Cookie::new(
            SESSION_COOKIE,
            serde_json::to_string(data).unwrap(),
        ));
        let response = jar.into_response();
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn jar_with(key: &Key, data: &SessionData) -> PrivateCookieJar {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            session_cookie(key, data).parse().unwrap(),
        );
        PrivateCookieJar::from_headers(&headers, key.clone())
    }

    #[test]
    fn round_trips_through_the_private_jar() {
        let key = Key::generate();
        let data = SessionData::signed_in(user()).with_repo_token(RepoToken::new("gho_abc"));

        let session = Session::from_jar(&jar_with(&key, &data));
        assert_eq!(session.user(), Some(&user()));
        assert_eq!(session.repo_token(), Some(&RepoToken::new("gho_abc")));
    }

    #[test]
    fn foreign_key_yields_empty_session() {
        let data = SessionData::signed_in(user());
        let jar = jar_with(&Key::generate(), &data);
        let other = PrivateCookieJar::new(Key::generate());

        // Same cookie header, different key.
        let headers = {
            let mut headers = axum::http::HeaderMap::new();
            let cookie = jar.get(SESSION_COOKIE).unwrap();
            headers.insert(
                axum::http::header::COOKIE,
                format!("{}={}", SESSION_COOKIE, cookie.value()).parse().unwrap(),
            );
            headers
        };
        let foreign = PrivateCookieJar::from_headers(&headers, Key::generate());
        assert!(Session::from_jar(&foreign).user().is_none());
        assert!(Session::from_jar(&other).user().is_none());
    }

    #[test]
    fn nonce_is_taken_once() {
        let mut session = Session::default();
        session.store_oauth_state("abc".to_string());
        assert_eq!(session.take_oauth_state().as_deref(), Some("abc"));
        assert_eq!(session.take_oauth_state(), None);
    }

    #[test]
    fn token_is_cleared_independently_of_user() {
        let key = Key::generate();
        let data = SessionData::signed_in(user()).with_repo_token(RepoToken::new("gho_abc"));
        let mut session = Session::from_jar(&jar_with(&key, &data));
        session.clear_repo_token();

        let jar = session.commit(PrivateCookieJar::new(key.clone()), true);
        let reloaded = Session::from_jar(&jar);
        assert!(reloaded.repo_token().is_none());
        assert_eq!(reloaded.user(), Some(&user()));
    }

    #[test]
    fn secrets_are_redacted_from_debug_output() {
        let rendered = format!("{:?} {:?}", RepoToken::new("gho_abc"), user());
        assert!(!rendered.contains("gho_abc"));
        assert!(!rendered.contains("primary-token"));
    }
}
