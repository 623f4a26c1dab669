//! Per-request pipeline wrapped around every route.
//!
//! # Order
//! ```text
//! (a) refresh session (always)          → page protection for /dashboard, /admin
//! (b) outside the API prefix            → handler, session cookies, done
//! (c) CSRF guard                        → 403 on rejection (session cookies kept)
//!     handler
//!     token issuance fallback           → Set-Cookie csrf_token when needed
//! (d) rate-limit headers from handler   → X-RateLimit-Remaining / -Reset
//! ```
//!
//! Session cookies from (a) are appended to whatever response the request
//! ends with; dropping them would sign the user out.

use std::convert::Infallible;
use std::time::Instant;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::SessionConfig;
use crate::http::response::apply_rate_limit_headers;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::csrf::RouteClass;
use crate::services::{Session, User};

/// Authenticated user for this request, set by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<User>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentUser>().cloned().unwrap_or_default())
    }
}

pub async fn request_pipeline(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let headers = request.headers().clone();
    let session = match state.services.identity.refresh_session(&headers).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "Session refresh failed, continuing anonymously");
            Session::anonymous()
        }
    };

    if let Some(redirect) = page_redirect(&state.config.session, &path, session.user.as_ref()) {
        tracing::debug!(path = %path, "Protected page redirect");
        return finish(redirect.into_response(), &session, &method, start);
    }

    request
        .extensions_mut()
        .insert(CurrentUser(session.user.clone()));

    let class = state.csrf.classify(&method, &path);
    if class == RouteClass::NotApi {
        let response = next.run(request).await;
        return finish(response, &session, &method, start);
    }

    let jar = CookieJar::from_headers(request.headers());
    let existing = state.csrf.cookie_token(&jar).map(str::to_string);

    if let Err(rejection) = state.csrf.enforce(class, request.headers(), existing.as_deref()) {
        tracing::warn!(
            method = %method,
            path = %path,
            code = rejection.code(),
            "CSRF validation failed"
        );
        metrics::record_csrf_rejection(rejection.code());
        return finish(rejection.into_response(), &session, &method, start);
    }

    let mut response = next.run(request).await;

    if class.issues_token() && state.csrf.needs_fresh_token(existing.as_deref()) {
        match state.csrf.issue_cookie() {
            Ok(cookie) => {
                append_cookie(&mut response, &cookie);
                metrics::record_token_issued();
            }
            Err(err) => tracing::error!(error = %err, "Failed to issue CSRF token"),
        }
    }

    apply_rate_limit_headers(&mut response);
    finish(response, &session, &method, start)
}

/// Redirect for protected pages: anonymous → login, non-admin on admin pages → fallback.
pub fn page_redirect(config: &SessionConfig, path: &str, user: Option<&User>) -> Option<Redirect> {
    let under = |prefixes: &[String]| prefixes.iter().any(|p| path.starts_with(p.as_str()));
    let admin_page = under(&config.admin_prefixes);

    if !admin_page && !under(&config.protected_prefixes) {
        return None;
    }

    match user {
        None => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("redirectTo", path)
                .finish();
            Some(Redirect::temporary(&format!("{}?{}", config.login_path, query)))
        }
        Some(user) if admin_page && !user.is_admin() => {
            Some(Redirect::temporary(&config.fallback_path))
        }
        Some(_) => None,
    }
}

fn finish(
    mut response: Response,
    session: &Session,
    method: &axum::http::Method,
    start: Instant,
) -> Response {
    // A handler that signed the user in already set the session cookie.
    let already_set: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split_once('=').map(|(name, _)| name.trim().to_string()))
        .collect();

    for cookie in &session.set_cookies {
        if already_set.iter().any(|name| name == cookie.name()) {
            continue;
        }
        append_cookie(&mut response, cookie);
    }
    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

fn append_cookie(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(err) => tracing::error!(cookie = cookie.name(), error = %err, "Unencodable cookie"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Role;
    use uuid::Uuid;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            email: "u@example.com".to_string(),
            role,
        }
    }

    fn location(redirect: Redirect) -> String {
        redirect.into_response().headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_public_pages_pass() {
        let config = SessionConfig::default();
        assert!(page_redirect(&config, "/blog/post", None).is_none());
        assert!(page_redirect(&config, "/api/contact", None).is_none());
    }

    #[test]
    fn test_anonymous_sent_to_login() {
        let config = SessionConfig::default();
        let redirect = page_redirect(&config, "/dashboard/assessments", None).unwrap();
        assert_eq!(
            location(redirect),
            "/auth/login?redirectTo=%2Fdashboard%2Fassessments"
        );
        assert!(page_redirect(&config, "/admin", None).is_some());
    }

    #[test]
    fn test_admin_pages_need_admin_role() {
        let config = SessionConfig::default();
        assert!(page_redirect(&config, "/dashboard", Some(&user(Role::User))).is_none());

        let redirect = page_redirect(&config, "/admin/seed", Some(&user(Role::User))).unwrap();
        assert_eq!(location(redirect), "/dashboard");

        assert!(page_redirect(&config, "/admin/seed", Some(&user(Role::Admin))).is_none());
    }
}
