use std::sync::Arc;
use std::time::Duration;

use edgegate_api::{
    AuthService, Clock, EdgeError, GateOutcome, SecretStore, SystemClock, TenantBranding,
    TenantDirectory,
};
use edgegate_auth::{
    Algorithm, CookieOptions, CredentialVerifier, RefreshCoordinator, TenantConfig,
    TenantResolver, TtlCache, VerifierKey, VerifyOptions,
};
use edgegate_connectors::{HttpAuthService, HttpTenantDirectory, build_http_client};
use edgegate_core::{GateConfig, validate_config};
use serde::Serialize;

mod gate;

pub use gate::{GateRequest, RequestGate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeDecision {
    pub outcome: GateOutcome,
    pub tenant: Option<TenantBranding>,
}

/// Everything the edge layer needs, built once per process.
pub struct EdgeRuntime {
    gate: RequestGate,
    tenants: TenantResolver,
    trust_tenant_header: bool,
}

impl EdgeRuntime {
    /// Wire the runtime against the HTTP services named in `cfg`.
    pub fn from_config(cfg: &GateConfig, secrets: &dyn SecretStore) -> Result<Self, EdgeError> {
        validate_config(cfg)?;
        let client = build_http_client(
            cfg.services.connect_timeout_ms,
            cfg.services.request_timeout_ms,
        )?;
        let directory = Arc::new(HttpTenantDirectory::new(
            cfg.services.tenant_base_url.clone(),
            client.clone(),
        ));
        let auth = Arc::new(HttpAuthService::new(
            cfg.services.auth_base_url.clone(),
            client,
        ));
        let key = verifier_key(cfg, secrets)?;
        Self::from_parts(cfg, &key, directory, auth, Arc::new(SystemClock))
    }

    pub fn from_parts(
        cfg: &GateConfig,
        key: &VerifierKey,
        directory: Arc<dyn TenantDirectory>,
        auth: Arc<dyn AuthService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EdgeError> {
        let verifier = CredentialVerifier::with_clock(key, verify_options(cfg)?, clock.clone())?;

        let cookie_opts = CookieOptions {
            path: cfg.cookies.path.clone(),
            domain: cfg.cookies.domain.clone(),
            secure: cfg.cookies.secure,
            http_only: true,
            same_site: cfg.cookies.same_site,
        };
        cookie_opts.validate()?;

        let gate = RequestGate::new(
            cfg.routes.clone(),
            Arc::new(verifier),
            RefreshCoordinator::new(auth),
            cookie_opts,
        );

        let cache = Arc::new(TtlCache::new(
            Duration::from_secs(cfg.tenants.cache_ttl_seconds),
            clock,
        ));
        let tenants = TenantResolver::new(
            directory,
            cache,
            TenantConfig {
                base_domains: cfg.tenants.base_domains.clone(),
                reserved_subdomains: cfg.tenants.reserved_subdomains.clone(),
            },
        );

        Ok(Self {
            gate,
            tenants,
            trust_tenant_header: cfg.tenants.trust_tenant_domain_header,
        })
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn tenants(&self) -> &TenantResolver {
        &self.tenants
    }

    /// Decide one request. Tenant resolution runs next to the gate and
    /// never changes its decision.
    #[tracing::instrument(name = "edge.request", skip_all, fields(path = %req.path, host = %req.host))]
    pub async fn handle(&self, req: &GateRequest) -> EdgeDecision {
        if self.gate.policy().is_bypassed(&req.path) {
            tracing::trace!("bypassed path");
            return EdgeDecision {
                outcome: GateOutcome::Pass,
                tenant: None,
            };
        }

        let tenant_domain = if self.trust_tenant_header {
            req.tenant_domain.as_deref()
        } else {
            None
        };

        let (outcome, tenant) = tokio::join!(
            self.gate.evaluate(req),
            self.tenants.resolve(&req.host, tenant_domain)
        );
        EdgeDecision { outcome, tenant }
    }
}

fn verify_options(cfg: &GateConfig) -> Result<VerifyOptions, EdgeError> {
    let algorithm: Algorithm = cfg.verifier.algorithm.parse().map_err(|_| {
        EdgeError::Config(format!(
            "unknown verifier algorithm {:?}",
            cfg.verifier.algorithm
        ))
    })?;
    Ok(VerifyOptions {
        algorithm,
        leeway_seconds: cfg.verifier.leeway_seconds,
        tenant_claim: cfg.verifier.tenant_claim.clone(),
        issuer: cfg.verifier.issuer.clone(),
        audience: cfg.verifier.audience.clone(),
    })
}

pub fn verifier_key(cfg: &GateConfig, secrets: &dyn SecretStore) -> Result<VerifierKey, EdgeError> {
    let options = verify_options(cfg)?;
    let material = secrets.get(&cfg.verifier.secret_ref)?;
    Ok(VerifierKey::for_algorithm(options.algorithm, &material))
}

/// A standalone verifier for tooling (`edgegate token verify`).
pub fn build_verifier(cfg: &GateConfig, secrets: &dyn SecretStore) -> Result<CredentialVerifier, EdgeError> {
    let key = verifier_key(cfg, secrets)?;
    Ok(CredentialVerifier::new(&key, verify_options(cfg)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use edgegate_api::{
        ManualClock, RedirectKind, RefreshResponse, Role, SetCookie, TenantDirectory,
    };
    use edgegate_core::demo_config;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use url::form_urlencoded;

    const SECRET: &str = "edge-test-secret";
    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct FakeDirectory {
        domains: BTreeMap<String, TenantBranding>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl TenantDirectory for FakeDirectory {
        async fn by_domain(&self, domain: &str) -> Result<Option<TenantBranding>, EdgeError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.domains.get(domain).cloned())
        }

        async fn branding(&self, _slug: &str) -> Result<Option<TenantBranding>, EdgeError> {
            *self.calls.lock().unwrap() += 1;
            Ok(None)
        }
    }

    struct FakeAuth {
        status: u16,
        set_cookies: Vec<SetCookie>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeAuth {
        fn new(status: u16, set_cookies: Vec<SetCookie>) -> Arc<Self> {
            Arc::new(Self {
                status,
                set_cookies,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, EdgeError> {
            self.calls.lock().unwrap().push(refresh_token.to_string());
            let ok = (200..300).contains(&self.status);
            Ok(RefreshResponse {
                status: self.status,
                set_cookies: self.set_cookies.clone(),
                body: Some(json!({ "success": ok })),
            })
        }
    }

    fn token(role: &str, tenant: Value, exp: i64) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &json!({
                "sub": "user-1",
                "email": "user@example.com",
                "role": role,
                "tenantId": tenant,
                "iat": exp - 900,
                "exp": exp,
            }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn valid(role: &str) -> String {
        let tenant = if role == "super_admin" { Value::Null } else { json!("t-1") };
        token(role, tenant, NOW + 600)
    }

    fn expired(role: &str) -> String {
        token(role, json!("t-1"), NOW - 60)
    }

    fn coworking() -> TenantBranding {
        TenantBranding {
            slug: "coworkingco".to_string(),
            name: "Coworking Co".to_string(),
            primary_color: "#0f172a".to_string(),
            accent_color: "#f97316".to_string(),
            font_family: "Inter".to_string(),
            features: BTreeMap::new(),
        }
    }

    struct Harness {
        runtime: EdgeRuntime,
        auth: Arc<FakeAuth>,
        directory: Arc<FakeDirectory>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(cfg: &GateConfig, auth: Arc<FakeAuth>) -> Harness {
        let directory = Arc::new(FakeDirectory {
            domains: BTreeMap::from([("coworkingco.example".to_string(), coworking())]),
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::at_secs(u64::try_from(NOW).unwrap()));
        let runtime = EdgeRuntime::from_parts(
            cfg,
            &VerifierKey::Secret(SECRET.as_bytes().to_vec()),
            directory.clone(),
            auth.clone(),
            clock.clone(),
        )
        .unwrap();
        Harness {
            runtime,
            auth,
            directory,
            clock,
        }
    }

    fn harness(auth: Arc<FakeAuth>) -> Harness {
        let mut cfg = demo_config();
        cfg.tenants.base_domains = vec!["platform.example".to_string()];
        harness_with(&cfg, auth)
    }

    fn refreshed_cookies(role: &str) -> Vec<SetCookie> {
        vec![
            SetCookie::new(format!(
                "access_token={}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=900",
                valid(role)
            )),
            SetCookie::new("refresh_token=rotated-rt; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=2592000"),
        ]
    }

    fn redirect_param(location: &str) -> Option<String> {
        let (_, query) = location.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "redirect")
            .map(|(_, v)| v.into_owned())
    }

    async fn outcome(h: &Harness, path: &str, cookies: &str) -> GateOutcome {
        let req = GateRequest::new(path)
            .with_host("platform.example")
            .with_cookie_header(cookies);
        h.runtime.handle(&req).await.outcome
    }

    #[tokio::test]
    async fn no_credentials_redirects_to_login_with_original_path() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        for path in ["/admin", "/admin/bookings/42", "/super-admin/tenants", "/settings?tab=team"] {
            let GateOutcome::Redirect(r) = outcome(&h, path, "").await else {
                panic!("expected redirect for {path}");
            };
            assert_eq!(r.kind, RedirectKind::Login);
            assert!(r.location.starts_with("/login?"));
            assert_eq!(redirect_param(&r.location).as_deref(), Some(path));
            assert!(r.set_cookies.is_empty());
        }
        assert!(h.auth.calls().is_empty());
    }

    #[tokio::test]
    async fn valid_credential_passes_untouched() {
        let h = harness(FakeAuth::new(200, refreshed_cookies("admin")));
        for role in ["admin", "operator", "super_admin"] {
            let cookies = format!("access_token={}; refresh_token=rt-1", valid(role));
            assert_eq!(outcome(&h, "/admin/bookings", &cookies).await, GateOutcome::Pass);
        }
        assert!(h.auth.calls().is_empty());
    }

    #[tokio::test]
    async fn expired_credential_refreshes_and_forwards_cookies_verbatim() {
        let directives = refreshed_cookies("admin");
        let h = harness(FakeAuth::new(200, directives.clone()));
        let cookies = format!("access_token={}; refresh_token=rt-1", expired("admin"));
        let out = outcome(&h, "/admin", &cookies).await;
        assert_eq!(
            out,
            GateOutcome::PassWithCookies {
                set_cookies: directives.clone()
            }
        );
        let forwarded: Vec<&str> = out.set_cookies().iter().map(SetCookie::as_str).collect();
        let sent: Vec<&str> = directives.iter().map(SetCookie::as_str).collect();
        assert_eq!(forwarded, sent);
        assert_eq!(h.auth.calls(), vec!["rt-1".to_string()]);
    }

    #[tokio::test]
    async fn failed_refresh_redirects_and_clears_session_cookies() {
        let h = harness(FakeAuth::new(401, Vec::new()));
        let cookies = format!(
            "access_token={}; refresh_token=revoked; csrf_token=c1",
            expired("admin")
        );
        let GateOutcome::Redirect(r) = outcome(&h, "/admin/devices", &cookies).await else {
            panic!("expected redirect");
        };
        assert_eq!(r.kind, RedirectKind::Login);
        assert_eq!(redirect_param(&r.location).as_deref(), Some("/admin/devices"));
        let cleared: Vec<&str> = r.set_cookies.iter().map(SetCookie::name).collect();
        assert_eq!(cleared, vec!["access_token", "refresh_token", "csrf_token"]);
        assert!(r.set_cookies.iter().all(|c| c.as_str().contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn stale_access_without_refresh_token_clears_cookies() {
        let h = harness(FakeAuth::new(200, refreshed_cookies("admin")));
        let cookies = format!("access_token={}", expired("admin"));
        let GateOutcome::Redirect(r) = outcome(&h, "/admin", &cookies).await else {
            panic!("expected redirect");
        };
        assert_eq!(r.kind, RedirectKind::Login);
        assert_eq!(r.set_cookies.len(), 3);
        assert!(h.auth.calls().is_empty());
    }

    #[tokio::test]
    async fn refresh_token_alone_is_exchanged() {
        let directives = refreshed_cookies("operator");
        let h = harness(FakeAuth::new(200, directives.clone()));
        let out = outcome(&h, "/admin", "refresh_token=rt-2").await;
        assert_eq!(out, GateOutcome::PassWithCookies { set_cookies: directives });
        assert_eq!(h.auth.calls(), vec!["rt-2".to_string()]);
    }

    #[tokio::test]
    async fn admin_without_tenant_is_not_authenticated() {
        let h = harness(FakeAuth::new(401, Vec::new()));
        let cookies = format!(
            "access_token={}; refresh_token=rt-1",
            token("admin", Value::Null, NOW + 600)
        );
        let out = outcome(&h, "/admin", &cookies).await;
        assert_eq!(out.redirect_kind(), Some(RedirectKind::Login));
        assert_eq!(h.auth.calls().len(), 1);
    }

    #[tokio::test]
    async fn admin_on_super_admin_path_is_unauthorized_not_login() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        let cookies = format!("access_token={}", valid("admin"));
        let GateOutcome::Redirect(r) = outcome(&h, "/super-admin/tenants", &cookies).await else {
            panic!("expected redirect");
        };
        assert_eq!(r.kind, RedirectKind::Unauthorized);
        assert_eq!(r.location, "/unauthorized");
        assert!(r.set_cookies.is_empty());

        let cookies = format!("access_token={}", valid("super_admin"));
        assert_eq!(outcome(&h, "/super-admin/tenants", &cookies).await, GateOutcome::Pass);
    }

    #[tokio::test]
    async fn non_canonical_super_admin_paths_stay_restricted() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        let admin = format!("access_token={}", valid("admin"));
        let super_admin = format!("access_token={}", valid("super_admin"));
        for path in [
            "//super-admin/tenants",
            "/./super-admin/tenants",
            "/admin/../super-admin",
            "/%73uper-admin",
            "/api/../super-admin",
            "/super-admin%2ftenants",
        ] {
            let GateOutcome::Redirect(r) = outcome(&h, path, &admin).await else {
                panic!("expected redirect for {path}");
            };
            assert_eq!(r.kind, RedirectKind::Unauthorized, "{path}");
            assert_eq!(outcome(&h, path, &super_admin).await, GateOutcome::Pass, "{path}");
        }
    }

    #[tokio::test]
    async fn restricted_path_after_refresh_checks_new_role() {
        let ok = harness(FakeAuth::new(200, refreshed_cookies("super_admin")));
        let cookies = format!("access_token={}; refresh_token=rt-1", expired("super_admin"));
        let out = outcome(&ok, "/super-admin", &cookies).await;
        assert_eq!(
            out,
            GateOutcome::PassWithCookies {
                set_cookies: refreshed_cookies("super_admin")
            }
        );

        let denied = harness(FakeAuth::new(200, refreshed_cookies("admin")));
        let GateOutcome::Redirect(r) = outcome(&denied, "/super-admin", &cookies).await else {
            panic!("expected redirect");
        };
        assert_eq!(r.kind, RedirectKind::Unauthorized);
        // The rotated refresh credential still reaches the client.
        assert_eq!(r.set_cookies, refreshed_cookies("admin"));
    }

    #[tokio::test]
    async fn login_page_redirects_authenticated_users_to_landing() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        let cases = [("super_admin", "/super-admin"), ("admin", "/admin"), ("operator", "/admin")];
        for (role, landing) in cases {
            let cookies = format!("access_token={}", valid(role));
            let GateOutcome::Redirect(r) = outcome(&h, "/login", &cookies).await else {
                panic!("expected redirect for {role}");
            };
            assert_eq!(r.kind, RedirectKind::Landing);
            assert_eq!(r.location, landing);
        }
    }

    #[tokio::test]
    async fn public_paths_ignore_stale_credentials() {
        let h = harness(FakeAuth::new(200, refreshed_cookies("admin")));
        let cookies = format!("access_token={}; refresh_token=rt-1", expired("admin"));
        assert_eq!(outcome(&h, "/login", &cookies).await, GateOutcome::Pass);
        assert_eq!(outcome(&h, "/", &cookies).await, GateOutcome::Pass);
        let valid_cookie = format!("access_token={}", valid("admin"));
        assert_eq!(outcome(&h, "/signup", &valid_cookie).await, GateOutcome::Pass);
        assert!(h.auth.calls().is_empty());
    }

    #[tokio::test]
    async fn bypassed_paths_skip_everything() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        let req = GateRequest::new("/_next/static/app.js").with_host("coworkingco.example");
        let decision = h.runtime.handle(&req).await;
        assert_eq!(decision.outcome, GateOutcome::Pass);
        assert_eq!(decision.tenant, None);
        assert_eq!(*h.directory.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn custom_domain_header_and_super_admin_login() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        let req = GateRequest::new("/login")
            .with_host("platform.example")
            .with_tenant_domain(Some("coworkingco.example".to_string()))
            .with_cookie_header(&format!("access_token={}", valid("super_admin")));
        let decision = h.runtime.handle(&req).await;

        assert_eq!(decision.tenant.as_ref().map(|t| t.slug.as_str()), Some("coworkingco"));
        let GateOutcome::Redirect(r) = decision.outcome else {
            panic!("expected redirect");
        };
        assert_eq!(r.kind, RedirectKind::Landing);
        assert_eq!(r.location, "/super-admin");
    }

    #[tokio::test]
    async fn tenant_lookups_are_cached_for_the_ttl() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        let req = GateRequest::new("/").with_host("coworkingco.example:443");
        let first = h.runtime.handle(&req).await.tenant;
        let second = h.runtime.handle(&req).await.tenant;
        assert_eq!(first, second);
        assert_eq!(*h.directory.calls.lock().unwrap(), 1);

        h.clock.advance(Duration::from_secs(300));
        let third = h.runtime.handle(&req).await.tenant;
        assert_eq!(third, first);
        assert_eq!(*h.directory.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn untrusted_tenant_header_is_ignored() {
        let mut cfg = demo_config();
        cfg.tenants.base_domains = vec!["platform.example".to_string()];
        cfg.tenants.trust_tenant_domain_header = false;
        let h = harness_with(&cfg, FakeAuth::new(200, Vec::new()));
        let req = GateRequest::new("/")
            .with_host("platform.example")
            .with_tenant_domain(Some("coworkingco.example".to_string()));
        assert_eq!(h.runtime.handle(&req).await.tenant, None);
        assert_eq!(*h.directory.calls.lock().unwrap(), 0);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let mut cfg = demo_config();
        cfg.verifier.algorithm = "none".to_string();
        assert!(matches!(verify_options(&cfg), Err(EdgeError::Config(_))));
    }

    #[test]
    fn gate_request_splits_query() {
        let req = GateRequest::new("/admin?tab=team");
        assert_eq!(req.path, "/admin");
        assert_eq!(req.query.as_deref(), Some("tab=team"));
        assert_eq!(GateRequest::new("").path, "/");
    }

    #[test]
    fn restricted_class_is_reported() {
        let h = harness(FakeAuth::new(200, Vec::new()));
        assert!(matches!(
            h.runtime.gate().policy().classify("/super-admin"),
            edgegate_api::RouteClass::Restricted(roles) if roles.contains(&Role::SuperAdmin)
        ));
    }
}
