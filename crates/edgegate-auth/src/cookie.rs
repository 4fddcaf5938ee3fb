//! Cookie helpers.

use crate::{Error, Result};
use edgegate_api::{SameSite, SetCookie};
use httpdate::fmt_http_date;
use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

/// Short-lived access credential.
pub const ACCESS_COOKIE: &str = "access_token";
/// Long-lived refresh credential.
pub const REFRESH_COOKIE: &str = "refresh_token";
/// CSRF double-submit token.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Every cookie that belongs to a session, in the order they are cleared.
pub const SESSION_COOKIES: [&str; 3] = [ACCESS_COOKIE, REFRESH_COOKIE, CSRF_COOKIE];

/// Cookies sent by the client on one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    values: BTreeMap<String, String>,
}

impl CookieJar {
    /// Parse a `Cookie` request header. The first occurrence of a name wins.
    pub fn parse(header: &str) -> Self {
        let mut values = BTreeMap::new();
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            values
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
        Self { values }
    }

    /// Non-empty value of cookie `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Attributes used when this layer deletes cookies.
///
/// They must match the attributes the auth service set, otherwise the browser
/// treats the deletion as a different cookie.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// Cookie path.
    pub path: String,

    /// Optional cookie domain.
    pub domain: Option<String>,

    /// Send on HTTPS only.
    pub secure: bool,

    /// Not accessible to JS.
    pub http_only: bool,

    /// SameSite attribute.
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieOptions {
    /// Reject attribute combinations browsers would ignore.
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::Cookie("cookie path must start with '/'".to_string()));
        }
        if self.same_site == SameSite::None && !self.secure {
            return Err(Error::Cookie(
                "SameSite=None cookies must be Secure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build a `Set-Cookie` header value that clears cookie `name`.
pub fn build_clear_cookie(name: &str, opts: &CookieOptions) -> SetCookie {
    let mut parts: Vec<String> = Vec::new();
    parts.push(format!("{name}="));
    parts.push(format!("Path={}", opts.path));

    if let Some(domain) = &opts.domain {
        parts.push(format!("Domain={domain}"));
    }

    if opts.secure {
        parts.push("Secure".to_string());
    }
    if opts.http_only {
        parts.push("HttpOnly".to_string());
    }

    parts.push(format!("SameSite={}", opts.same_site.as_str()));
    parts.push("Max-Age=0".to_string());
    parts.push(format!("Expires={}", fmt_http_date(UNIX_EPOCH)));

    SetCookie::new(parts.join("; "))
}

/// Deletions for the access, refresh and csrf cookies.
pub fn clear_session_cookies(opts: &CookieOptions) -> Vec<SetCookie> {
    SESSION_COOKIES
        .iter()
        .map(|name| build_clear_cookie(name, opts))
        .collect()
}
