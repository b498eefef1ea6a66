use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use url::Url;

use super::config::RouteSettings;
use super::cookies;
use super::error::{RouteError, login_location};
use super::sessions::ClientSessions;
use super::state::RouteState;
use crate::callback::{CallbackHandler, CallbackOutcome, CallbackParams};
use crate::error::Error;
use crate::guard::{GuardDecision, RouteGuard};
use crate::manager::AuthManager;
use crate::session::{ERROR_DISPLAY_DURATION, SessionState};
use crate::types::ProviderId;

const REFRESH: HeaderName = HeaderName::from_static("refresh");
const STATE_MISMATCH: &str = "State mismatch";

/// Create the login router: login page, provider redirects, callbacks, logout,
/// a protected home page and a catch-all redirect to it.
pub fn auth_routes(sessions: Arc<ClientSessions>, settings: RouteSettings) -> Router {
    let login_path = settings.login_path.clone();
    let auth_path = settings.auth_path.clone();
    let logout_path = settings.logout_path.clone();
    let home_path = settings.home_path.clone();

    let state = RouteState { sessions, settings };

    Router::new()
        .route(&login_path, get(login_page))
        .route(&format!("{login_path}/{{provider}}"), get(login))
        .route(&format!("{auth_path}/{{provider}}/callback"), get(callback))
        .route(&logout_path, get(logout).post(logout))
        .route(&home_path, get(home))
        .fallback(fallback)
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginPageParams {
    error: Option<String>,
}

async fn login_page(
    State(state): State<RouteState>,
    Query(params): Query<LoginPageParams>,
    jar: PrivateCookieJar,
) -> Response {
    let guard = RouteGuard::guest_only(state.settings.home_path.clone());
    match guard_client(&state, &jar, &guard) {
        GuardDecision::Pending => return pending_page(&state.settings.login_path),
        GuardDecision::Redirect(path) => return Redirect::to(&path).into_response(),
        GuardDecision::Render => {}
    }

    let mut body = String::from("<h1>Sign in</h1>\n");
    let error = params.error.as_deref().filter(|e| !e.is_empty());
    if let Some(error) = error {
        body.push_str(&format!("<p class=\"error\">{}</p>\n", escape_html(error)));
    }
    body.push_str("<ul>\n");
    for provider in state.sessions.template().configured_providers() {
        body.push_str(&format!(
            "<li><a href=\"{}/{provider}\">Continue with {}</a></li>\n",
            escape_html(&state.settings.login_path),
            provider_label(provider),
        ));
    }
    body.push_str("</ul>\n");

    let response = Html(page("Sign in", &body)).into_response();
    if error.is_some() {
        // Dismisses the error once it has been on screen long enough.
        return with_refresh(
            response,
            ERROR_DISPLAY_DURATION.as_secs(),
            &state.settings.login_path,
        );
    }
    response
}

async fn login(
    State(state): State<RouteState>,
    Path(provider): Path<String>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), RouteError> {
    let provider = parse_provider(&provider)?;
    let settings = &state.settings;

    let url = state
        .sessions
        .template()
        .authorization_url(provider)
        .map_err(|e| RouteError::from_auth(&settings.login_path, e))?;
    let mut url = Url::parse(&url).map_err(|e| {
        RouteError::from_auth(
            &settings.login_path,
            Error::Config(format!("authorization URL: {e}")),
        )
    })?;

    let csrf_state = cookies::generate_state();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "state")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("state", &csrf_state);

    let (jar, _) = ensure_session_id(&state, jar);
    let jar = jar.add(cookies::state_cookie(
        &csrf_state,
        settings.secure_cookies,
        &settings.auth_path,
    ));

    tracing::info!(provider = %provider, "Redirecting to provider authorization");
    Ok((jar, Redirect::to(url.as_str())))
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback(
    State(state): State<RouteState>,
    Path(provider): Path<String>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(PrivateCookieJar, Response), RouteError> {
    let provider = parse_provider(&provider)?;
    let settings = &state.settings;

    // A legitimate round trip always carries the session cookie set by `login`.
    let (jar, manager) = match cookies::get_session_id(&jar) {
        Some(_) => {
            let (jar, session_id) = ensure_session_id(&state, jar);
            (jar, state.sessions.client(&session_id))
        }
        None => (jar, state.sessions.ephemeral()),
    };

    // Dropped with the request, which cancels the in-process redirect timer. The
    // browser follows the Refresh header instead.
    let handler = CallbackHandler::new(provider, Arc::clone(&manager))
        .with_settings(settings.callback_settings());

    let expected_state = cookies::get_state(&jar);
    let jar = jar.remove(cookies::clear_state_cookie(&settings.auth_path));

    let checks_state = params.provider_error().is_none() && params.authorization_code().is_some();
    let outcome = if checks_state
        && !state_matches(params.state.as_deref(), expected_state.as_deref())
    {
        tracing::warn!(provider = %provider, "OAuth state mismatch");
        handler.reject(STATE_MISMATCH)
    } else {
        handler.handle(&params).await
    };

    let response = match outcome {
        CallbackOutcome::Authenticated(user) => {
            tracing::info!(provider = %provider, user_id = %user.id, "OAuth2 login successful");
            Redirect::to(&settings.home_path).into_response()
        }
        CallbackOutcome::AlreadyHandled => {
            let target = if manager.session().is_authenticated() {
                &settings.home_path
            } else {
                &settings.login_path
            };
            Redirect::to(target).into_response()
        }
        CallbackOutcome::Failed { message } => failure_page(settings, &message),
    };

    Ok((jar, response))
}

fn state_matches(received: Option<&str>, expected: Option<&str>) -> bool {
    matches!((received, expected), (Some(r), Some(e)) if !e.is_empty() && r == e)
}

// ── Logout / Home ──────────────────────────────────────────────────

async fn logout(
    State(state): State<RouteState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    if let Some(session_id) = cookies::get_session_id(&jar) {
        state.sessions.client(&session_id).logout().await;
        state.sessions.remove(&session_id);
    }
    let jar = jar.remove(cookies::clear_session_cookie());
    (jar, Redirect::to(&state.settings.login_path))
}

async fn home(State(state): State<RouteState>, jar: PrivateCookieJar) -> Response {
    let guard = RouteGuard::protected().with_redirect_to(state.settings.login_path.clone());

    match guard_client(&state, &jar, &guard) {
        GuardDecision::Pending => pending_page(&state.settings.home_path),
        GuardDecision::Redirect(path) => Redirect::to(&path).into_response(),
        GuardDecision::Render => {
            let name = client(&state.sessions, &jar)
                .and_then(|manager| manager.session().user())
                .map(|user| user.display_name().to_string())
                .unwrap_or_default();
            let body = format!(
                "<h1>Welcome, {}</h1>\n\
                 <form method=\"post\" action=\"{}\"><button>Sign out</button></form>\n",
                escape_html(&name),
                escape_html(&state.settings.logout_path),
            );
            Html(page("Home", &body)).into_response()
        }
    }
}

async fn fallback(State(state): State<RouteState>) -> Redirect {
    Redirect::to(&state.settings.home_path)
}

// ── Sessions ───────────────────────────────────────────────────────

fn client(sessions: &ClientSessions, jar: &PrivateCookieJar) -> Option<Arc<AuthManager>> {
    cookies::get_session_id(jar).map(|session_id| sessions.client(&session_id))
}

/// Guards the requesting browser's session. A browser without a session cookie
/// is anonymous.
fn guard_client(state: &RouteState, jar: &PrivateCookieJar, guard: &RouteGuard) -> GuardDecision {
    match client(&state.sessions, jar) {
        Some(manager) => guard.enforce(manager.session(), manager.navigator().as_ref()),
        None => guard.decide(&SessionState::default()),
    }
}

/// Reuses the browser's session id or issues a new one. The cookie is re-sent
/// either way to extend its lifetime.
fn ensure_session_id(state: &RouteState, jar: PrivateCookieJar) -> (PrivateCookieJar, String) {
    let session_id = cookies::get_session_id(&jar).unwrap_or_else(cookies::generate_session_id);
    let jar = jar.add(cookies::session_cookie(
        &session_id,
        state.sessions.idle_timeout(),
        state.settings.secure_cookies,
    ));
    (jar, session_id)
}

// ── Helpers ────────────────────────────────────────────────────────

fn parse_provider(raw: &str) -> Result<ProviderId, RouteError> {
    raw.parse()
        .map_err(|_| RouteError::UnknownProvider(raw.to_string()))
}

fn provider_label(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::Google => "Google",
        ProviderId::Kakao => "Kakao",
    }
}

fn failure_page(settings: &RouteSettings, message: &str) -> Response {
    let location = login_location(&settings.login_path, message);
    let body = format!(
        "<h1>Authentication failed</h1>\n<p>{}</p>\n<p><a href=\"{}\">Back to sign in</a></p>\n",
        escape_html(message),
        escape_html(&location),
    );
    with_refresh(
        Html(page("Authentication failed", &body)).into_response(),
        settings.failure_delay.as_secs(),
        &location,
    )
}

fn pending_page(location: &str) -> Response {
    with_refresh(
        Html(page("Signing in", "<p>Signing in…</p>\n")).into_response(),
        1,
        location,
    )
}

fn with_refresh(mut response: Response, secs: u64, location: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(&format!("{secs}; url={location}")) {
        response.headers_mut().insert(REFRESH, value);
    }
    response
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{body}</body></html>\n",
        escape_html(title),
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
