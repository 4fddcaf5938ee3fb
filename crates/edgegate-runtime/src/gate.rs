use std::collections::BTreeSet;
use std::sync::Arc;

use edgegate_api::{
    AccessCredential, GateOutcome, Redirect, RedirectKind, Role, RouteClass, SetCookie,
};
use edgegate_auth::{
    ACCESS_COOKIE, CookieJar, CookieOptions, CredentialVerifier, REFRESH_COOKIE,
    RefreshCoordinator, RefreshOutcome, clear_session_cookies,
};
use edgegate_core::{RouteSettings, RoutePolicy};
use url::form_urlencoded;

/// The parts of an inbound request the gate looks at.
#[derive(Debug, Clone, Default)]
pub struct GateRequest {
    pub path: String,
    pub query: Option<String>,
    pub host: String,
    pub tenant_domain: Option<String>,
    pub cookies: CookieJar,
}

impl GateRequest {
    /// Split `path_and_query` (`/admin?tab=1`) into path and query.
    pub fn new(path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string()).filter(|q| !q.is_empty())),
            None => (path_and_query, None),
        };
        let path = if path.is_empty() { "/" } else { path };
        Self {
            path: path.to_string(),
            query,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_tenant_domain(mut self, domain: Option<String>) -> Self {
        self.tenant_domain = domain.filter(|d| !d.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_cookie_header(mut self, header: &str) -> Self {
        self.cookies = CookieJar::parse(header);
        self
    }

    fn original_target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }
}

/// Per-request authentication and authorization decision.
pub struct RequestGate {
    policy: RoutePolicy,
    routes: RouteSettings,
    verifier: Arc<CredentialVerifier>,
    refresher: RefreshCoordinator,
    cookie_opts: CookieOptions,
}

impl RequestGate {
    pub fn new(
        routes: RouteSettings,
        verifier: Arc<CredentialVerifier>,
        refresher: RefreshCoordinator,
        cookie_opts: CookieOptions,
    ) -> Self {
        Self {
            policy: RoutePolicy::from_settings(&routes),
            routes,
            verifier,
            refresher,
            cookie_opts,
        }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    pub async fn evaluate(&self, req: &GateRequest) -> GateOutcome {
        let outcome = match self.policy.classify(&req.path) {
            RouteClass::Public => self.public_path(req),
            RouteClass::Protected => self.protected_path(req, None).await,
            RouteClass::Restricted(roles) => self.protected_path(req, Some(&roles)).await,
        };
        tracing::debug!(outcome = outcome_label(&outcome), "gate decision");
        outcome
    }

    fn public_path(&self, req: &GateRequest) -> GateOutcome {
        if !is_same_path(&req.path, &self.routes.login_path) {
            return GateOutcome::Pass;
        }
        // Stale credentials on public pages are ignored, never refreshed.
        match req.cookies.get(ACCESS_COOKIE).map(|t| self.verifier.verify(t)) {
            Some(Ok(credential)) => self.landing_redirect(&credential),
            _ => GateOutcome::Pass,
        }
    }

    async fn protected_path(&self, req: &GateRequest, required: Option<&BTreeSet<Role>>) -> GateOutcome {
        let Some(token) = req.cookies.get(ACCESS_COOKIE) else {
            // Only the refresh cookie left: try a refresh before sending to login.
            if req.cookies.get(REFRESH_COOKIE).is_some() {
                return self.refresh_path(req, required).await;
            }
            return self.login_redirect(req, Vec::new());
        };

        match self.verifier.verify(token) {
            Ok(credential) => match required {
                Some(roles) if !roles.contains(&credential.role()) => {
                    tracing::info!(role = %credential.role(), "role not allowed on restricted path");
                    self.unauthorized_redirect(Vec::new())
                }
                _ => GateOutcome::Pass,
            },
            Err(rejection) => {
                tracing::debug!(%rejection, "access credential rejected");
                self.refresh_path(req, required).await
            }
        }
    }

    async fn refresh_path(&self, req: &GateRequest, required: Option<&BTreeSet<Role>>) -> GateOutcome {
        let Some(refresh_token) = req.cookies.get(REFRESH_COOKIE) else {
            return self.login_redirect(req, clear_session_cookies(&self.cookie_opts));
        };

        let cookies = match self.refresher.refresh(refresh_token).await {
            RefreshOutcome::Refreshed(cookies) => cookies,
            RefreshOutcome::Failed(_) => {
                return self.login_redirect(req, clear_session_cookies(&self.cookie_opts));
            }
        };

        let Some(roles) = required else {
            // Served on the old request; the next one carries the new credential.
            return GateOutcome::PassWithCookies {
                set_cookies: cookies,
            };
        };

        // A restricted path needs the role proven, so check the new credential now.
        let role = RefreshCoordinator::new_access_token(&cookies)
            .and_then(|t| self.verifier.verify(t).ok())
            .map(|c| c.role());
        match role {
            Some(role) if roles.contains(&role) => GateOutcome::PassWithCookies {
                set_cookies: cookies,
            },
            _ => self.unauthorized_redirect(cookies),
        }
    }

    fn login_redirect(&self, req: &GateRequest, set_cookies: Vec<SetCookie>) -> GateOutcome {
        let target: String =
            form_urlencoded::byte_serialize(req.original_target().as_bytes()).collect();
        let separator = if self.routes.login_path.contains('?') { '&' } else { '?' };
        GateOutcome::Redirect(Redirect {
            kind: RedirectKind::Login,
            location: format!("{}{separator}redirect={target}", self.routes.login_path),
            set_cookies,
        })
    }

    fn unauthorized_redirect(&self, set_cookies: Vec<SetCookie>) -> GateOutcome {
        GateOutcome::Redirect(Redirect {
            kind: RedirectKind::Unauthorized,
            location: self.routes.unauthorized_path.clone(),
            set_cookies,
        })
    }

    fn landing_redirect(&self, credential: &AccessCredential) -> GateOutcome {
        let location = match credential.role() {
            Role::SuperAdmin => &self.routes.platform_admin_root,
            Role::Admin | Role::Operator => &self.routes.tenant_admin_root,
        };
        GateOutcome::Redirect(Redirect {
            kind: RedirectKind::Landing,
            location: location.clone(),
            set_cookies: Vec::new(),
        })
    }
}

fn is_same_path(a: &str, b: &str) -> bool {
    let trim = |p: &str| -> String {
        let t = p.trim_end_matches('/');
        if t.is_empty() { "/".to_string() } else { t.to_string() }
    };
    trim(a) == trim(b)
}

fn outcome_label(outcome: &GateOutcome) -> &'static str {
    match outcome {
        GateOutcome::Pass => "pass",
        GateOutcome::PassWithCookies { .. } => "pass_with_cookies",
        GateOutcome::Redirect(r) => match r.kind {
            RedirectKind::Login => "redirect_login",
            RedirectKind::Unauthorized => "redirect_unauthorized",
            RedirectKind::Landing => "redirect_landing",
        },
    }
}
