use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use edgegate_api::{EdgeError, Role, SameSite};
use serde::{Deserialize, Serialize};

mod policy;

pub use policy::RoutePolicy;

pub const CONFIG_FILE: &str = "edgegate.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub services: ServiceEndpoints,
    pub verifier: VerifierSettings,
    pub routes: RouteSettings,
    pub tenants: TenantSettings,
    pub cookies: CookieSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub auth_base_url: String,
    pub tenant_base_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            auth_base_url: "http://127.0.0.1:4000".to_string(),
            tenant_base_url: "http://127.0.0.1:4000".to_string(),
            connect_timeout_ms: 1_000,
            request_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    pub algorithm: String,
    /// Name of the secret holding the signing secret or public key PEM.
    pub secret_ref: String,
    pub leeway_seconds: u64,
    pub tenant_claim: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            algorithm: "HS256".to_string(),
            secret_ref: "EDGEGATE_JWT_SECRET".to_string(),
            leeway_seconds: 0,
            tenant_claim: "tenantId".to_string(),
            issuer: None,
            audience: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedRule {
    pub prefix: String,
    pub roles: BTreeSet<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    pub login_path: String,
    pub unauthorized_path: String,
    pub platform_admin_root: String,
    pub tenant_admin_root: String,
    pub public: Vec<String>,
    pub restricted: Vec<RestrictedRule>,
    pub bypass: Vec<String>,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            unauthorized_path: "/unauthorized".to_string(),
            platform_admin_root: "/super-admin".to_string(),
            tenant_admin_root: "/admin".to_string(),
            public: [
                "/",
                "/login",
                "/signup",
                "/forgot-password",
                "/reset-password",
                "/unauthorized",
                "/book",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            restricted: vec![RestrictedRule {
                prefix: "/super-admin".to_string(),
                roles: BTreeSet::from([Role::SuperAdmin]),
            }],
            bypass: ["/_next", "/api", "/static", "/favicon.ico"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub base_domains: Vec<String>,
    pub reserved_subdomains: Vec<String>,
    pub cache_ttl_seconds: u64,
    /// Only enable behind a proxy that strips client-supplied `x-tenant-domain`.
    pub trust_tenant_domain_header: bool,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            base_domains: vec!["localhost".to_string()],
            reserved_subdomains: vec!["www".to_string(), "app".to_string(), "api".to_string()],
            cache_ttl_seconds: 300,
            trust_tenant_domain_header: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            secure: true,
            same_site: SameSite::Lax,
        }
    }
}

pub fn validate_config(cfg: &GateConfig) -> Result<(), EdgeError> {
    for (name, url) in [
        ("services.auth_base_url", &cfg.services.auth_base_url),
        ("services.tenant_base_url", &cfg.services.tenant_base_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EdgeError::Config(format!(
                "{name} must be an http(s) URL, got {url:?}"
            )));
        }
    }
    if cfg.services.connect_timeout_ms == 0 || cfg.services.request_timeout_ms == 0 {
        return Err(EdgeError::Config(
            "service timeouts must be greater than zero".to_string(),
        ));
    }
    if cfg.verifier.secret_ref.trim().is_empty() {
        return Err(EdgeError::Config("verifier.secret_ref is empty".to_string()));
    }
    if cfg.tenants.cache_ttl_seconds == 0 {
        return Err(EdgeError::Config(
            "tenants.cache_ttl_seconds must be greater than zero".to_string(),
        ));
    }

    let routes = &cfg.routes;
    let fixed = [
        ("routes.login_path", &routes.login_path),
        ("routes.unauthorized_path", &routes.unauthorized_path),
        ("routes.platform_admin_root", &routes.platform_admin_root),
        ("routes.tenant_admin_root", &routes.tenant_admin_root),
    ];
    let listed = routes
        .public
        .iter()
        .chain(routes.bypass.iter())
        .chain(routes.restricted.iter().map(|r| &r.prefix))
        .map(|p| ("routes pattern", p));
    for (name, path) in fixed.into_iter().chain(listed) {
        if !path.starts_with('/') {
            return Err(EdgeError::Config(format!(
                "{name} must be an absolute path, got {path:?}"
            )));
        }
    }
    if let Some(rule) = routes.restricted.iter().find(|r| r.roles.is_empty()) {
        return Err(EdgeError::Config(format!(
            "restricted rule {} has no roles",
            rule.prefix
        )));
    }

    let policy = RoutePolicy::from_settings(routes);
    if policy.classify(&routes.login_path) != edgegate_api::RouteClass::Public {
        return Err(EdgeError::Config(format!(
            "login path {} must be public",
            routes.login_path
        )));
    }
    Ok(())
}

pub fn demo_config() -> GateConfig {
    GateConfig::default()
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("edgegate")
    } else {
        PathBuf::from(".edgegate")
    }
}

pub fn load_config_from_dir(dir: &Path) -> Result<GateConfig, EdgeError> {
    load_config_from_file(&dir.join(CONFIG_FILE))
}

pub fn load_config_from_file(path: &Path) -> Result<GateConfig, EdgeError> {
    let cfg = read_config_file(path)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<GateConfig, EdgeError> {
    let content = fs::read_to_string(path)
        .map_err(|e| EdgeError::NotFound(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| EdgeError::Config(format!("invalid TOML in {}: {e}", path.display())))
}

/// File config (or the demo config when the file is missing), then the
/// process environment on top. Validated once, after the overrides.
pub fn load_config(dir: &Path) -> Result<GateConfig, EdgeError> {
    load_config_with_env(dir, |key| std::env::var(key).ok())
}

fn load_config_with_env(
    dir: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GateConfig, EdgeError> {
    let cfg = match read_config_file(&dir.join(CONFIG_FILE)) {
        Ok(cfg) => cfg,
        Err(EdgeError::NotFound(reason)) => {
            tracing::debug!(%reason, "no config file, using demo config");
            demo_config()
        }
        Err(err) => return Err(err),
    };
    let cfg = apply_env_overrides(cfg, lookup);
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Apply `EDGEGATE_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(
    mut cfg: GateConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> GateConfig {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("EDGEGATE_AUTH_URL") {
        cfg.services.auth_base_url = v;
    }
    if let Some(v) = get("EDGEGATE_TENANT_URL") {
        cfg.services.tenant_base_url = v;
    }
    if let Some(v) = get("EDGEGATE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        cfg.services.request_timeout_ms = v;
    }
    if let Some(v) = get("EDGEGATE_JWT_SECRET_REF") {
        cfg.verifier.secret_ref = v;
    }
    if let Some(v) = get("EDGEGATE_JWT_ALGORITHM") {
        cfg.verifier.algorithm = v;
    }
    if let Some(v) = get("EDGEGATE_PUBLIC_PATHS") {
        cfg.routes.public = split_list(&v);
    }
    if let Some(v) = get("EDGEGATE_SUPER_ADMIN_PATHS") {
        cfg.routes.restricted = split_list(&v)
            .into_iter()
            .map(|prefix| RestrictedRule {
                prefix,
                roles: BTreeSet::from([Role::SuperAdmin]),
            })
            .collect();
    }
    if let Some(v) = get("EDGEGATE_BASE_DOMAINS") {
        cfg.tenants.base_domains = split_list(&v);
    }
    cfg
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn write_default_config_file(dir: &Path) -> Result<PathBuf, EdgeError> {
    fs::create_dir_all(dir)
        .map_err(|e| EdgeError::Internal(format!("failed to create {}: {e}", dir.display())))?;

    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        fs::write(
            &path,
            include_str!("../../../docs/edgegate/edgegate.toml.example"),
        )
        .map_err(|e| EdgeError::Internal(format!("failed to write {}: {e}", path.display())))?;
    }
    Ok(path)
}
