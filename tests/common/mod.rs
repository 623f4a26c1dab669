//! Shared utilities for integration tests.
//!
//! Every test builds its own router over fresh in-memory collaborators and
//! drives it with `oneshot`; no sockets are opened.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use cilab_edge::config::{EdgeConfig, RetryConfig};
use cilab_edge::services::identity::SESSION_COOKIE;
use cilab_edge::services::{
    ContentGenerator, DisabledGenerator, MemoryDataStore, MemoryGateway, MemoryIdentity,
    MemoryMailer, Role, Services, User,
};
use cilab_edge::HttpServer;

pub const CSRF_SECRET: &str = "integration-test-csrf-secret-0123456789";
pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "rzp-test-key-secret";
pub const WEBHOOK_SECRET: &str = "rzp-test-webhook-secret";

pub fn test_config() -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.csrf.secret = Some(CSRF_SECRET.to_string());
    config.payments.key_id = Some(KEY_ID.to_string());
    config.payments.key_secret = Some(KEY_SECRET.to_string());
    config.payments.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    config.payments.credit_retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
    };
    config
}

/// Router plus handles on the collaborators behind it.
pub struct TestApp {
    pub router: Router,
    pub identity: Arc<MemoryIdentity>,
    pub store: Arc<MemoryDataStore>,
    pub gateway: Arc<MemoryGateway>,
    pub mailer: Arc<MemoryMailer>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), Arc::new(DisabledGenerator))
    }

    pub fn with_config(config: EdgeConfig) -> Self {
        Self::with(config, Arc::new(DisabledGenerator))
    }

    pub fn with(config: EdgeConfig, generator: Arc<dyn ContentGenerator>) -> Self {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryDataStore::new());
        let gateway = Arc::new(MemoryGateway::new());
        let mailer = Arc::new(MemoryMailer::new());

        let services = Services {
            identity: identity.clone(),
            store: store.clone(),
            payments: gateway.clone(),
            mailer: mailer.clone(),
            generator,
        };
        let server = HttpServer::new(config, services).expect("server builds");

        Self {
            router: server.router(),
            identity,
            store,
            gateway,
            mailer,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("infallible")
    }

    /// Fetch a token the way a browser would: any safe API request.
    pub async fn csrf_token(&self) -> String {
        let response = self.send(get("/api/health").build()).await;
        set_cookie(&response, "csrf_token").expect("health issues a token")
    }

    /// Session id for a freshly added account.
    pub fn sign_in_as(&self, email: &str, role: Role) -> (User, String) {
        let user = self.identity.add_user(email, "password-123", role);
        let sid = self.identity.open_session(email).expect("account exists");
        (user, sid)
    }
}

/// Request builder that knows the site's cookies and headers.
pub struct Call {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
}

pub fn get(path: &str) -> Call {
    Call::new(Method::GET, path)
}

pub fn post(path: &str) -> Call {
    Call::new(Method::POST, path)
}

pub fn patch(path: &str) -> Call {
    Call::new(Method::PATCH, path)
}

pub fn delete(path: &str) -> Call {
    Call::new(Method::DELETE, path)
}

impl Call {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(format!("{name}={value}"));
        self
    }

    /// Double-submit: same token in cookie and header.
    pub fn csrf(self, token: &str) -> Self {
        self.cookie("csrf_token", token).header("x-csrf-token", token)
    }

    pub fn session(self, sid: &str) -> Self {
        self.cookie(SESSION_COOKIE, sid)
    }

    pub fn from_ip(self, ip: &str) -> Self {
        self.header("x-forwarded-for", ip)
    }

    fn builder(&self) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(self.method.clone()).uri(&self.path);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !self.cookies.is_empty() {
            builder = builder.header(header::COOKIE, self.cookies.join("; "));
        }
        builder
    }

    pub fn build(self) -> Request<Body> {
        self.builder().body(Body::empty()).unwrap()
    }

    pub fn json(self, body: Value) -> Request<Body> {
        self.builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn raw(self, body: impl Into<Body>) -> Request<Body> {
        self.builder().body(body.into()).unwrap()
    }
}

/// Value of the named cookie among the response's `Set-Cookie` headers.
pub fn set_cookie(response: &Response, name: &str) -> Option<String> {
    set_cookie_header(response, name).and_then(|full| {
        full.split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
    })
}

/// Full `Set-Cookie` line for the named cookie.
pub fn set_cookie_header(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&prefix))
        .map(str::to_string)
}

pub fn set_cookie_count(response: &Response, name: &str) -> usize {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(&prefix))
        .count()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(response: &Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}
