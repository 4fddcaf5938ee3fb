//! Tenant resolution from the request host.

use crate::cache::TtlCache;
use edgegate_api::{TenantBranding, TenantDirectory};
use std::sync::Arc;

/// Host classification settings.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Domains owned by the platform itself, e.g. `platform.example`.
    /// A host equal to one of them carries no tenant; a subdomain of one
    /// names a tenant slug.
    pub base_domains: Vec<String>,

    /// Platform subdomains that are never tenant slugs.
    pub reserved_subdomains: Vec<String>,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            base_domains: Vec::new(),
            reserved_subdomains: vec!["www".to_string(), "app".to_string(), "api".to_string()],
        }
    }
}

/// How a host will be looked up in the tenant directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantLookup {
    /// A custom domain mapped to a tenant.
    Domain(String),
    /// A platform subdomain. `domain` is `{slug}.{base_domain}` so nested
    /// hosts for one tenant share a cache entry.
    Slug { domain: String, slug: String },
}

impl TenantLookup {
    pub fn cache_key(&self) -> &str {
        match self {
            TenantLookup::Domain(domain) | TenantLookup::Slug { domain, .. } => domain,
        }
    }
}

/// Maps hosts to tenant branding through a TTL cache.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    cache: Arc<TtlCache<String, TenantBranding>>,
    cfg: TenantConfig,
}

impl TenantResolver {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        cache: Arc<TtlCache<String, TenantBranding>>,
        mut cfg: TenantConfig,
    ) -> Self {
        cfg.base_domains = cfg
            .base_domains
            .iter()
            .filter_map(|d| normalize_host(d.trim_start_matches('.')))
            .collect();
        cfg.reserved_subdomains = cfg
            .reserved_subdomains
            .iter()
            .map(|s| s.trim().to_lowercase())
            .collect();
        Self {
            directory,
            cache,
            cfg,
        }
    }

    /// Branding for the tenant behind this request, if any.
    ///
    /// Lookup failures are logged and reported as "no tenant".
    pub async fn resolve(&self, host: &str, tenant_domain: Option<&str>) -> Option<TenantBranding> {
        let lookup = self.lookup_for(host, tenant_domain)?;
        let key = lookup.cache_key().to_string();

        if let Some(hit) = self.cache.get(&key) {
            tracing::trace!(domain = %key, "tenant cache hit");
            return Some(hit);
        }

        let found = match &lookup {
            TenantLookup::Domain(domain) => self.directory.by_domain(domain).await,
            TenantLookup::Slug { slug, .. } => self.directory.branding(slug).await,
        };

        match found {
            Ok(Some(branding)) => {
                tracing::debug!(domain = %key, slug = %branding.slug, "tenant resolved");
                self.cache.insert(key, branding.clone());
                Some(branding)
            }
            Ok(None) => {
                tracing::debug!(domain = %key, "no tenant for domain");
                None
            }
            Err(err) => {
                tracing::warn!(domain = %key, error = %err, "tenant lookup failed");
                None
            }
        }
    }

    /// Decide what to look up, without doing any I/O.
    pub fn lookup_for(&self, host: &str, tenant_domain: Option<&str>) -> Option<TenantLookup> {
        if let Some(domain) = tenant_domain.and_then(normalize_host) {
            return Some(TenantLookup::Domain(domain));
        }

        let host = normalize_host(host)?;
        for root in &self.cfg.base_domains {
            if &host == root {
                return None;
            }
            if let Some(prefix) = host.strip_suffix(root.as_str()) {
                let Some(prefix) = prefix.strip_suffix('.') else {
                    continue;
                };
                let slug = subdomain_slug(prefix)?;
                if self.cfg.reserved_subdomains.iter().any(|r| r == &slug) {
                    return None;
                }
                let domain = format!("{slug}.{root}");
                return Some(TenantLookup::Slug { domain, slug });
            }
        }

        Some(TenantLookup::Domain(host))
    }
}

/// Lowercase a host and drop port and trailing dot.
pub fn normalize_host(raw: &str) -> Option<String> {
    let host = raw.trim().to_lowercase();

    let host = if host.starts_with('[') {
        // IPv6 literal, optionally followed by a port.
        let end = host.find(']')?;
        host[..=end].to_string()
    } else {
        match host.split_once(':') {
            Some((h, _port)) => h.to_string(),
            None => host,
        }
    };

    let host = host.trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn subdomain_slug(prefix: &str) -> Option<String> {
    // Use the label directly below the root (supports nested subdomains).
    let slug = prefix.rsplit('.').next()?;
    if !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        Some(slug.to_string())
    } else {
        None
    }
}
