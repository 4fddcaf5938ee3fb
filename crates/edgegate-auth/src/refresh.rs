//! Exchanging a refresh credential for a new session.

use crate::cookie::ACCESS_COOKIE;
use edgegate_api::{AuthService, RefreshResponse, SetCookie};
use serde_json::Value;
use std::sync::Arc;

/// Why a refresh did not produce a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// No refresh token to exchange.
    MissingToken,
    /// Auth service answered with a non-2xx status.
    Status(u16),
    /// 2xx, but the body did not say `success: true`.
    NotConfirmed,
    /// 2xx and confirmed, but no cookies came back.
    NoCookies,
    /// The call itself failed (timeout, connection, decoding).
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The directives to forward to the client, untouched and in order.
    Refreshed(Vec<SetCookie>),
    Failed(RefreshFailure),
}

/// Performs at most one refresh call per invocation.
pub struct RefreshCoordinator {
    auth: Arc<dyn AuthService>,
}

impl RefreshCoordinator {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        Self { auth }
    }

    pub async fn refresh(&self, refresh_token: &str) -> RefreshOutcome {
        if refresh_token.trim().is_empty() {
            return RefreshOutcome::Failed(RefreshFailure::MissingToken);
        }

        let outcome = match self.auth.refresh(refresh_token).await {
            Ok(resp) => interpret(resp),
            Err(err) => RefreshOutcome::Failed(RefreshFailure::Transport(err.to_string())),
        };

        match &outcome {
            RefreshOutcome::Refreshed(cookies) => {
                tracing::debug!(directives = cookies.len(), "session refreshed");
            }
            RefreshOutcome::Failed(reason) => {
                tracing::info!(?reason, "session refresh failed");
            }
        }
        outcome
    }

    /// The new access token carried by a set of refresh directives, if any.
    pub fn new_access_token(cookies: &[SetCookie]) -> Option<&str> {
        cookies
            .iter()
            .rev()
            .find(|c| c.name() == ACCESS_COOKIE)
            .map(SetCookie::value)
            .filter(|v| !v.is_empty())
    }
}

fn interpret(resp: RefreshResponse) -> RefreshOutcome {
    if !(200..300).contains(&resp.status) {
        return RefreshOutcome::Failed(RefreshFailure::Status(resp.status));
    }
    let confirmed = resp
        .body
        .as_ref()
        .and_then(|b| b.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !confirmed {
        return RefreshOutcome::Failed(RefreshFailure::NotConfirmed);
    }
    if resp.set_cookies.is_empty() {
        return RefreshOutcome::Failed(RefreshFailure::NoCookies);
    }
    RefreshOutcome::Refreshed(resp.set_cookies)
}
