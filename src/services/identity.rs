//! Identity provider seam and the in-memory provider.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::security::token::constant_time_eq;
use crate::services::ServiceError;

/// Cookie carrying the in-memory provider's session id.
pub const SESSION_COOKIE: &str = "cilab_session";

const SESSION_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Result of any session-producing call.
///
/// `set_cookies` must reach the client on whatever response the request ends
/// with, or the refreshed session is lost.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<User>,
    pub set_cookies: Vec<Cookie<'static>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Result of a sign-up.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    /// The address must be confirmed before the first sign-in.
    pub requires_confirmation: bool,
}

pub trait IdentityProvider: Send + Sync {
    /// Re-validate the caller's session from request headers.
    fn refresh_session<'a>(&'a self, headers: &'a HeaderMap)
        -> BoxFuture<'a, Result<Session, ServiceError>>;

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Session, ServiceError>>;

    /// `profile` is stored as user metadata (full name, organization, role).
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        profile: &'a Value,
    ) -> BoxFuture<'a, Result<Registration, ServiceError>>;

    /// Never reveals whether the address is registered.
    fn send_password_reset<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Trade a one-time OAuth/magic-link code for a session.
    fn exchange_code_for_session<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<Session, ServiceError>>;
}

struct Account {
    user: User,
    password_hash: String,
    profile: Value,
}

/// Process-local provider: accounts, sessions and one-time codes in maps.
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: DashMap<String, Account>,
    sessions: DashMap<String, String>,
    codes: DashMap<String, String>,
    reset_requests: DashMap<String, u32>,
    secure_cookies: bool,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Register an account directly (seeding, tests).
    pub fn add_user(&self, email: &str, password: &str, role: Role) -> User {
        let email = email.trim().to_lowercase();
        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            role,
        };
        self.accounts.insert(
            email,
            Account {
                user: user.clone(),
                password_hash: hash_password(password),
                profile: Value::Null,
            },
        );
        user
    }

    /// Open a session for a registered address and return its id.
    pub fn open_session(&self, email: &str) -> Option<String> {
        let email = email.trim().to_lowercase();
        if !self.accounts.contains_key(&email) {
            return None;
        }
        let sid = Uuid::new_v4().simple().to_string();
        self.sessions.insert(sid.clone(), email);
        Some(sid)
    }

    /// Mint a one-time code for `exchange_code_for_session`.
    pub fn issue_code(&self, email: &str) -> Option<String> {
        let email = email.trim().to_lowercase();
        if !self.accounts.contains_key(&email) {
            return None;
        }
        let code = Uuid::new_v4().simple().to_string();
        self.codes.insert(code.clone(), email);
        Some(code)
    }

    pub fn profile(&self, email: &str) -> Option<Value> {
        self.accounts.get(email).map(|a| a.profile.clone())
    }

    pub fn reset_requests(&self, email: &str) -> u32 {
        self.reset_requests.get(email).map(|c| *c).unwrap_or(0)
    }

    fn user_for_session(&self, sid: &str) -> Option<User> {
        let email = self.sessions.get(sid)?.value().clone();
        self.accounts.get(&email).map(|a| a.user.clone())
    }

    fn session_cookie(&self, sid: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, sid))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(SESSION_MAX_AGE_SECS))
            .build()
    }

    fn expired_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .max_age(time::Duration::ZERO)
            .build()
    }

    fn start_session(&self, email: String) -> Session {
        let user = self.accounts.get(&email).map(|a| a.user.clone());
        let sid = Uuid::new_v4().simple().to_string();
        self.sessions.insert(sid.clone(), email);
        Session {
            user,
            set_cookies: vec![self.session_cookie(sid)],
        }
    }
}

impl IdentityProvider for MemoryIdentity {
    fn refresh_session<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Result<Session, ServiceError>> {
        Box::pin(async move {
            let jar = CookieJar::from_headers(headers);
            let Some(sid) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
                return Ok(Session::anonymous());
            };

            match self.user_for_session(&sid) {
                // Rolling expiry: every refresh re-issues the cookie.
                Some(user) => Ok(Session {
                    user: Some(user),
                    set_cookies: vec![self.session_cookie(sid)],
                }),
                None => Ok(Session {
                    user: None,
                    set_cookies: vec![self.expired_cookie()],
                }),
            }
        })
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Session, ServiceError>> {
        Box::pin(async move {
            let email = email.trim().to_lowercase();
            let verified = self.accounts.get(&email).is_some_and(|account| {
                constant_time_eq(
                    account.password_hash.as_bytes(),
                    hash_password(password).as_bytes(),
                )
            });
            if !verified {
                return Err(ServiceError::Rejected("Invalid login credentials".to_string()));
            }
            Ok(self.start_session(email))
        })
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        profile: &'a Value,
    ) -> BoxFuture<'a, Result<Registration, ServiceError>> {
        Box::pin(async move {
            let key = email.trim().to_lowercase();
            // The entry guard makes check and insert one step per address.
            match self.accounts.entry(key.clone()) {
                Entry::Occupied(_) => {
                    Err(ServiceError::Conflict("User already registered".to_string()))
                }
                Entry::Vacant(slot) => {
                    let user = User {
                        id: Uuid::new_v4(),
                        email: key,
                        role: Role::User,
                    };
                    slot.insert(Account {
                        user: user.clone(),
                        password_hash: hash_password(password),
                        profile: profile.clone(),
                    });
                    Ok(Registration {
                        user,
                        requires_confirmation: false,
                    })
                }
            }
        })
    }

    fn send_password_reset<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let email = email.trim().to_lowercase();
            if self.accounts.contains_key(&email) {
                *self.reset_requests.entry(email).or_insert(0) += 1;
            }
            Ok(())
        })
    }

    fn exchange_code_for_session<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<Session, ServiceError>> {
        Box::pin(async move {
            match self.codes.remove(code) {
                Some((_, email)) => Ok(self.start_session(email)),
                None => Err(ServiceError::Rejected("invalid or expired code".to_string())),
            }
        })
    }
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
