//! Endpoint handlers.

use super::AppState;
use crate::{
    constants::{AUTH_ERROR_PARAM, NO_PUSH_FLAG, RETURN_TO_COOKIE, RETURN_TO_TTL_MINUTES},
    errors::{ApiError, ApiResult},
    github::{
        branch::{BranchCreator, BranchProber, CreateBranchError},
        permissions::{check_repo_permissions, RepoAccess},
    },
    number::{allocate_next, RfdNumber},
    oauth::CallbackParams,
    session::{Session, User},
    source::SourceError,
    wire::{CreateBranchRequest, CreatedBranch, NextNumber, RepoStatus},
};
use axum::{
    body::Bytes,
    extract::{rejection::FormRejection, rejection::QueryRejection, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Builds the router for the service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/rfd/next-number", get(next_number))
        .route("/api/rfd/create-branch", post(create_branch))
        .route("/api/rfd/github-status", get(github_status))
        .route("/auth/github-repo", get(|| async { Redirect::to("/") }).post(initiate))
        .route("/auth/github-repo/callback", get(callback))
        .route("/auth/github-repo/disconnect", post(disconnect))
        .layer(
            // Headers stay out of spans: the cookies carry credentials.
            TraceLayer::new_for_http().make_span_with(|req: &Request| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    path = %req.uri().path(),
                )
            }),
        )
        .with_state(state)
}

/// Resolves the signed-in user, or fails with [ApiError::Unauthenticated].
fn require_user(state: &AppState, session: &Session) -> ApiResult<User> {
    state
        .authenticator
        .authenticate(session)
        .ok_or(ApiError::Unauthenticated)
}

async fn next_number(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    let mut session = Session::from_jar(&jar);
    let result = allocate(&state, &mut session).await;
    let jar = session.commit(jar, state.config.secure_cookies);
    match result {
        Ok(body) => (jar, Json(body)).into_response(),
        Err(err) => (jar, err).into_response(),
    }
}

/// Computes the next number, checked against the repository when the session holds a
/// repository credential.
async fn allocate(state: &AppState, session: &mut Session) -> ApiResult<NextNumber> {
    let Some(source) = &state.source else {
        return Err(ApiError::LocalMode);
    };
    let user = require_user(state, session)?;

    let used = source.used_numbers(&user).await.map_err(|err| match err {
        SourceError::SessionExpired => ApiError::SessionExpired,
        SourceError::Fetch(detail) => {
            error!(%detail, "failed to fetch RFDs");
            ApiError::Internal
        }
    })?;
    let candidate = allocate_next(&used).ok_or(ApiError::AllocationUndetermined)?;

    let Some(token) = session.repo_token().cloned() else {
        return Ok(next_number_body(candidate, None));
    };

    match check_repo_permissions(state.host.as_ref(), &token).await {
        Ok(RepoAccess::ReadWrite) => {}
        Ok(RepoAccess::ReadOnly) => return Err(ApiError::ReadOnlyAccess),
        Ok(RepoAccess::NoAccess) => return Err(ApiError::NoRepoAccess),
        Ok(RepoAccess::TokenInvalid) => {
            info!(user = %user.id, "GitHub rejected the repository credential; clearing it");
            session.clear_repo_token();
            return Err(ApiError::CredentialExpired);
        }
        Err(err) => {
            error!(%err, "failed to check repository permissions");
            return Err(ApiError::Internal);
        }
    }

    let search = &state.config.search;
    let availability = BranchProber::new(state.host.as_ref(), search.max_attempts, search.backoff)
        .search(&token, candidate)
        .await;
    Ok(next_number_body(
        availability.available,
        availability.adjusted.then_some(candidate),
    ))
}

fn next_number_body(number: RfdNumber, adjusted_from: Option<RfdNumber>) -> NextNumber {
    NextNumber {
        next_number: number,
        formatted_number: number.formatted(),
        adjusted_from,
    }
}

async fn create_branch(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    body: Bytes,
) -> ApiResult<Json<CreatedBranch>> {
    if state.source.is_none() {
        return Err(ApiError::LocalMode);
    }
    let session = Session::from_jar(&jar);
    require_user(&state, &session)?;

    if state.oauth.is_none() {
        warn!(
            missing = %state.config.repo_oauth.missing_vars(),
            "branch creation requested but GitHub repo OAuth is not configured"
        );
        return Err(ApiError::NotConfigured);
    }
    let token = session.repo_token().ok_or(ApiError::CredentialMissing)?;

    let request: CreateBranchRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::MalformedNumber)?;
    let branch = request.rfd_number.branch_name();
    let base = request
        .base_branch
        .as_deref()
        .filter(|base| !base.is_empty())
        .unwrap_or(&state.config.base_branch);

    let created = BranchCreator::new(state.host.as_ref())
        .create(token, &branch, base)
        .await
        .map_err(|err| match err {
            CreateBranchError::BranchExists(branch) => ApiError::BranchExists(branch),
            CreateBranchError::Auth => {
                warn!(%branch, "GitHub rejected the credential while creating a branch");
                ApiError::CredentialInvalid
            }
            CreateBranchError::Api(detail) => {
                error!(%branch, %detail, "failed to create branch");
                ApiError::Api
            }
        })?;

    info!(branch = %created, "created RFD branch");
    Ok(Json(CreatedBranch {
        success: true,
        branch_name: created,
        rfd_number: request.rfd_number,
        formatted_number: request.rfd_number.formatted(),
    }))
}

async fn github_status(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> ApiResult<Json<RepoStatus>> {
    let session = Session::from_jar(&jar);
    let user = require_user(&state, &session)?;
    Ok(Json(RepoStatus {
        local_mode: state.config.deployment.is_local(),
        configured: state.oauth.is_some(),
        connected: session.repo_token().is_some(),
        repository_url: state.config.repo.web_url(),
        display_name: user.display_name,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReturnToForm {
    return_to: Option<String>,
}

async fn initiate(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    form: Result<Form<ReturnToForm>, FormRejection>,
) -> Response {
    let Some(oauth) = &state.oauth else {
        warn!(
            missing = %state.config.repo_oauth.missing_vars(),
            "GitHub repo OAuth requested but not configured"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "GitHub repo OAuth is not configured",
        )
            .into_response();
    };

    let secure = state.config.secure_cookies;
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let return_to = sanitize_return_to(form.return_to.as_deref());

    let mut session = Session::from_jar(&jar);
    let authorize_url = oauth.initiate(&mut session);
    let jar = session.commit(jar, secure).add(
        Cookie::build((RETURN_TO_COOKIE, return_to))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::minutes(RETURN_TO_TTL_MINUTES)),
    );
    (jar, Redirect::to(authorize_url.as_str())).into_response()
}

async fn callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let Some(oauth) = &state.oauth else {
        return Redirect::to("/").into_response();
    };
    let params = params.map(|Query(params)| params).unwrap_or_default();
    let return_to = sanitize_return_to(jar.get(RETURN_TO_COOKIE).as_ref().map(Cookie::value));

    let mut session = Session::from_jar(&jar);
    let target = match oauth.complete(&mut session, &params).await {
        Ok(token) => match check_repo_permissions(state.host.as_ref(), &token).await {
            Ok(access) if access.has_access() && !access.can_push() => {
                append_query_flag(&return_to, NO_PUSH_FLAG)
            }
            Ok(_) => return_to,
            Err(err) => {
                warn!(%err, "could not check repository permissions after connecting");
                return_to
            }
        },
        Err(err) => format!("/?{AUTH_ERROR_PARAM}={}", err.reason()),
    };

    let jar = session
        .commit(jar, state.config.secure_cookies)
        .remove(Cookie::build(RETURN_TO_COOKIE).path("/"));
    (jar, Redirect::to(&target)).into_response()
}

async fn disconnect(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    form: Result<Form<ReturnToForm>, FormRejection>,
) -> Response {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let target = sanitize_return_to(form.return_to.as_deref());

    let mut session = Session::from_jar(&jar);
    session.clear_repo_token();
    let jar = session.commit(jar, state.config.secure_cookies);
    (jar, Redirect::to(&target)).into_response()
}

/// Returns `target` if it is a path on this site, or `/` otherwise.
fn sanitize_return_to(target: Option<&str>) -> String {
    match target {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

/// Appends `flag=1` to the query of `target`.
fn append_query_flag(target: &str, flag: &str) -> String {
    let separator = if target.contains('?') { '&' } else { '?' };
    format!("{target}{separator}{flag}=1")
}
