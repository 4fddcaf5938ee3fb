use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type TenantId = String;
pub type TenantSlug = String;
pub type SubjectId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    SuperAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Role::Admin),
            "operator" => Some(Role::Operator),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles that always belong to exactly one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantRole {
    Admin,
    Operator,
}

/// Who a credential speaks for.
///
/// Only platform operators (`super_admin`) may exist without a tenant, so the
/// tenant id is mandatory in the `Tenant` arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    Platform { tenant_id: Option<TenantId> },
    Tenant { role: TenantRole, tenant_id: TenantId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub subject: SubjectId,
    pub email: String,
    pub scope: Scope,
    pub issued_at: Option<i64>,
    pub expires_at: i64,
}

impl AccessCredential {
    pub fn role(&self) -> Role {
        match &self.scope {
            Scope::Platform { .. } => Role::SuperAdmin,
            Scope::Tenant {
                role: TenantRole::Admin,
                ..
            } => Role::Admin,
            Scope::Tenant {
                role: TenantRole::Operator,
                ..
            } => Role::Operator,
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match &self.scope {
            Scope::Platform { tenant_id } => tenant_id.as_deref(),
            Scope::Tenant { tenant_id, .. } => Some(tenant_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantBranding {
    pub slug: TenantSlug,
    pub name: String,
    pub primary_color: String,
    pub accent_color: String,
    pub font_family: String,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

/// A `Set-Cookie` directive exactly as the auth service produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetCookie(String);

impl SetCookie {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.pair().0
    }

    pub fn value(&self) -> &str {
        self.pair().1
    }

    fn pair(&self) -> (&str, &str) {
        let first = self.0.split(';').next().unwrap_or_default();
        match first.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (first.trim(), ""),
        }
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", content = "roles", rename_all = "snake_case")]
pub enum RouteClass {
    Public,
    Protected,
    Restricted(BTreeSet<Role>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectKind {
    Login,
    Unauthorized,
    Landing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub location: String,
    pub set_cookies: Vec<SetCookie>,
}

/// What the edge layer decided for one request. The caller is the only
/// place that writes these into an actual response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    Pass,
    PassWithCookies { set_cookies: Vec<SetCookie> },
    Redirect(Redirect),
}

impl GateOutcome {
    pub fn set_cookies(&self) -> &[SetCookie] {
        match self {
            GateOutcome::Pass => &[],
            GateOutcome::PassWithCookies { set_cookies } => set_cookies,
            GateOutcome::Redirect(redirect) => &redirect.set_cookies,
        }
    }

    pub fn redirect_kind(&self) -> Option<RedirectKind> {
        match self {
            GateOutcome::Redirect(redirect) => Some(redirect.kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResponse {
    pub status: u16,
    pub set_cookies: Vec<SetCookie>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub trait SecretStore: Send + Sync {
    fn get(&self, secret_ref: &str) -> Result<String, EdgeError>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn by_domain(&self, domain: &str) -> Result<Option<TenantBranding>, EdgeError>;
    async fn branding(&self, slug: &str) -> Result<Option<TenantBranding>, EdgeError>;
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, EdgeError>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u128;

    fn now_secs(&self) -> i64 {
        i64::try_from(self.now_ms() / 1000).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    pub fn at_secs(secs: u64) -> Self {
        Self {
            ms: AtomicU64::new(secs.saturating_mul(1000)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.ms.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u128 {
        u128::from(self.ms.load(Ordering::SeqCst))
    }
}
