//! Login boundary.
//!
//! The runtime takes already-authenticated players through
//! [`ServerEvent::Connect`](crate::server::ServerEvent). Whatever checks
//! credentials sits behind this trait; no implementation ships here.

use async_trait::async_trait;
use hearth_db::{PlayerId, PlayerName};
use std::fmt;
use thiserror::Error;

#[derive(Clone)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Who logged in, without any secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: PlayerId,
    pub name: PlayerName,
}

#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque credential for later requests, e.g. a cookie value.
    pub credential: String,
    pub identity: Identity,
}

#[derive(Debug, Error)]
pub enum LoginRejected {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn login(&self, request: LoginRequest) -> Result<Session, LoginRejected>;
}
