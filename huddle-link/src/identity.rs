//! Connection identity and endpoint URL.
//!
//! Resolution order: short-lived token from the [`CredentialResolver`],
//! then the stored profile's user id, then anonymous. A failure at any
//! step only lowers the identity; it never blocks connecting. A resolver
//! that does not answer within the deadline counts as a failure.
//!
//! ```text
//! wss://<host>/realtime/stream/<stream_id>?token=<credential>
//! wss://<host>/realtime/stream/<stream_id>?user_id=<local id>
//! wss://<host>/realtime/stream/<stream_id>
//! ```

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::environment::Environment;

/// Identity presented on the connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Token(String),
    UserId(String),
    Anonymous,
}

/// Source of short-lived connection credentials. Consumed, never minted here.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self) -> Result<String, AuthError>;
}

/// Resolver for clients that never hold a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

#[async_trait]
impl CredentialResolver for NoCredentials {
    async fn resolve(&self) -> Result<String, AuthError> {
        Err(AuthError::Unavailable)
    }
}

/// Resolver returning a fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl CredentialResolver for StaticToken {
    async fn resolve(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Work out the best identity currently available.
pub async fn resolve_identity(
    resolver: &dyn CredentialResolver,
    env: &dyn Environment,
    deadline: Duration,
) -> Identity {
    let resolved = tokio::time::timeout(deadline, resolver.resolve())
        .await
        .unwrap_or(Err(AuthError::TimedOut(deadline)));
    match resolved {
        Ok(token) if !token.is_empty() => return Identity::Token(token),
        Ok(_) => log::warn!("Credential resolver returned an empty token"),
        Err(e) => log::warn!("Credential resolution failed, falling back: {e}"),
    }

    match env.profile_user_id() {
        Some(user_id) => Identity::UserId(user_id),
        None => {
            log::info!("No stored profile, connecting anonymously");
            Identity::Anonymous
        }
    }
}

/// Build the realtime endpoint for a stream.
pub fn stream_url(
    host: &str,
    secure: bool,
    stream_id: &str,
    identity: &Identity,
) -> Result<Url, url::ParseError> {
    let scheme = if secure { "wss" } else { "ws" };
    let mut url = Url::parse(&format!("{scheme}://{host}"))?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["realtime", "stream", stream_id]);

    match identity {
        Identity::Token(token) => {
            url.query_pairs_mut().append_pair("token", token);
        }
        Identity::UserId(user_id) => {
            url.query_pairs_mut().append_pair("user_id", user_id);
        }
        Identity::Anonymous => {}
    }
    Ok(url)
}

/// Credential failures. Never fatal: they only lower the identity.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// No credential is available (signed out, no session).
    Unavailable,
    /// The credential source refused to issue one.
    Rejected(String),
    /// The credential source did not answer in time.
    TimedOut(Duration),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "No credential available"),
            Self::Rejected(e) => write!(f, "Credential rejected: {e}"),
            Self::TimedOut(after) => write!(f, "Credential resolution timed out after {after:?}"),
        }
    }
}

impl std::error::Error for AuthError {}
