use std::time::Duration;

use async_trait::async_trait;
use edgegate_api::{
    AuthService, EdgeError, RefreshResponse, SecretStore, SetCookie, TenantBranding,
    TenantDirectory,
};
use reqwest::header::{COOKIE, HeaderValue, SET_COOKIE};
use serde::Deserialize;
use url::Url;

pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, secret_ref: &str) -> Result<String, EdgeError> {
        std::env::var(secret_ref)
            .map_err(|_| EdgeError::NotFound(format!("missing secret env var {secret_ref}")))
    }
}

/// One client for every outbound call, with hard timeouts.
pub fn build_http_client(
    connect_timeout_ms: u64,
    request_timeout_ms: u64,
) -> Result<reqwest::Client, EdgeError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .timeout(Duration::from_millis(request_timeout_ms))
        .build()
        .map_err(|e| EdgeError::Internal(format!("failed to build http client: {e}")))
}

fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, EdgeError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| EdgeError::Config(format!("invalid base url {base_url:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| EdgeError::Config(format!("base url {base_url:?} cannot have a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

pub struct HttpTenantDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTenantDirectory {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn fetch(&self, url: Url) -> Result<Option<TenantBranding>, EdgeError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| EdgeError::Connection(format!("GET {url}: {e}")))?;

        if !resp.status().is_success() {
            tracing::debug!(%url, status = resp.status().as_u16(), "tenant directory miss");
            return Ok(None);
        }

        let body: DataEnvelope<TenantBranding> = resp
            .json()
            .await
            .map_err(|e| EdgeError::Connection(format!("GET {url}: invalid body: {e}")))?;
        Ok(Some(body.data))
    }
}

#[async_trait]
impl TenantDirectory for HttpTenantDirectory {
    async fn by_domain(&self, domain: &str) -> Result<Option<TenantBranding>, EdgeError> {
        let url = endpoint(&self.base_url, &["tenants", "by-domain", domain])?;
        self.fetch(url).await
    }

    async fn branding(&self, slug: &str) -> Result<Option<TenantBranding>, EdgeError> {
        let url = endpoint(&self.base_url, &["tenants", slug, "branding"])?;
        self.fetch(url).await
    }
}

pub struct HttpAuthService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthService {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, EdgeError> {
        let url = endpoint(&self.base_url, &["auth", "refresh"])?;
        let cookie = HeaderValue::from_str(&format!("refresh_token={refresh_token}"))
            .map_err(|_| EdgeError::Validation("refresh token is not a valid header value".to_string()))?;

        let resp = self
            .client
            .post(url.clone())
            .header(COOKIE, cookie)
            .send()
            .await
            .map_err(|e| EdgeError::Connection(format!("POST {url}: {e}")))?;

        let status = resp.status().as_u16();
        let set_cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| {
                v.to_str().map(SetCookie::new).map_err(|_| {
                    EdgeError::Validation("auth service sent a non-UTF-8 Set-Cookie".to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| EdgeError::Connection(format!("POST {url}: {e}")))?;
        let body = serde_json::from_slice(&bytes).ok();

        Ok(RefreshResponse {
            status,
            set_cookies,
            body,
        })
    }
}
