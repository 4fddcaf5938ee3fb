//! Access credential verification.

use crate::{Error, Result};

use edgegate_api::{AccessCredential, Clock, Role, Scope, SystemClock, TenantRole};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Key material used to check access credential signatures.
#[derive(Clone)]
pub enum VerifierKey {
    /// Shared HMAC secret (HS256/HS384/HS512).
    Secret(Vec<u8>),
    /// RSA public key, PEM encoded (RS*/PS*).
    RsaPem(Vec<u8>),
    /// EC public key, PEM encoded (ES256/ES384).
    EcPem(Vec<u8>),
    /// Ed25519 public key, PEM encoded (EdDSA).
    EdPem(Vec<u8>),
}

impl std::fmt::Debug for VerifierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes.
        let kind = match self {
            VerifierKey::Secret(_) => "Secret",
            VerifierKey::RsaPem(_) => "RsaPem",
            VerifierKey::EcPem(_) => "EcPem",
            VerifierKey::EdPem(_) => "EdPem",
        };
        f.debug_tuple(kind).field(&"..").finish()
    }
}

impl VerifierKey {
    /// Interpret raw key material the way `alg` expects it.
    pub fn for_algorithm(alg: Algorithm, material: &str) -> Self {
        let bytes = material.as_bytes().to_vec();
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => VerifierKey::Secret(bytes),
            Algorithm::ES256 | Algorithm::ES384 => VerifierKey::EcPem(bytes),
            Algorithm::EdDSA => VerifierKey::EdPem(bytes),
            _ => VerifierKey::RsaPem(bytes),
        }
    }

    fn decoding_key(&self, alg: Algorithm) -> Result<DecodingKey> {
        match (self, alg) {
            (VerifierKey::Secret(s), Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) => {
                if s.is_empty() {
                    return Err(Error::Key("HMAC secret is empty".to_string()));
                }
                Ok(DecodingKey::from_secret(s))
            }
            (
                VerifierKey::RsaPem(pem),
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => Ok(DecodingKey::from_rsa_pem(pem)?),
            (VerifierKey::EcPem(pem), Algorithm::ES256 | Algorithm::ES384) => {
                Ok(DecodingKey::from_ec_pem(pem)?)
            }
            (VerifierKey::EdPem(pem), Algorithm::EdDSA) => Ok(DecodingKey::from_ed_pem(pem)?),
            (_, other) => Err(Error::UnsupportedAlg(other)),
        }
    }
}

/// Options for credential verification.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// The only algorithm accepted.
    pub algorithm: Algorithm,

    /// Clock skew allowed on `exp`/`nbf`, in seconds.
    pub leeway_seconds: u64,

    /// Claim holding the tenant id. `tenant_id` is accepted as a fallback.
    pub tenant_claim: String,

    /// Expected issuer (`iss`).
    pub issuer: Option<String>,

    /// Expected audience (`aud`).
    pub audience: Option<String>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::HS256,
            leeway_seconds: 0,
            tenant_claim: "tenantId".to_string(),
            issuer: None,
            audience: None,
        }
    }
}

/// Why a credential was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Not a decodable JWT, or signed with a different algorithm.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Signature did not verify.
    #[error("bad signature")]
    BadSignature,
    /// `exp` is in the past.
    #[error("token expired")]
    Expired,
    /// Claims are missing or inconsistent.
    #[error("invalid claims: {0}")]
    Claims(String),
}

/// Verifies access credentials. Cheap to share; holds no mutable state.
pub struct CredentialVerifier {
    key: DecodingKey,
    validation: Validation,
    opts: VerifyOptions,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    /// Build a verifier that reads the system clock.
    pub fn new(key: &VerifierKey, opts: VerifyOptions) -> Result<Self> {
        Self::with_clock(key, opts, Arc::new(SystemClock))
    }

    /// Build a verifier with an explicit clock.
    pub fn with_clock(key: &VerifierKey, opts: VerifyOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        let key = key.decoding_key(opts.algorithm)?;

        let mut validation = Validation::new(opts.algorithm);
        // Time-based claims are checked against our own clock below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;
        match &opts.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = &opts.issuer {
            validation.set_issuer(&[iss]);
        }

        Ok(Self {
            key,
            validation,
            opts,
            clock,
        })
    }

    /// Verify `token` and return the credential it carries.
    pub fn verify(&self, token: &str) -> std::result::Result<AccessCredential, Rejection> {
        let data = jsonwebtoken::decode::<Value>(token, &self.key, &self.validation)
            .map_err(|e| rejection_from(&e))?;
        let credential = credential_from_claims(&data.claims, &self.opts.tenant_claim)?;

        let now = self.clock.now_secs();
        let leeway = i64::try_from(self.opts.leeway_seconds).unwrap_or(i64::MAX);
        if credential.expires_at.saturating_add(leeway) <= now {
            return Err(Rejection::Expired);
        }
        if let Some(nbf) = data.claims.get("nbf").and_then(Value::as_i64) {
            if nbf > now.saturating_add(leeway) {
                return Err(Rejection::Claims("token not yet valid".to_string()));
            }
        }

        Ok(credential)
    }
}

fn rejection_from(err: &jsonwebtoken::errors::Error) -> Rejection {
    match err.kind() {
        ErrorKind::InvalidSignature => Rejection::BadSignature,
        ErrorKind::ExpiredSignature => Rejection::Expired,
        ErrorKind::InvalidIssuer => Rejection::Claims("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => Rejection::Claims("audience mismatch".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => Rejection::Claims(format!("missing {claim}")),
        _ => Rejection::Malformed(err.to_string()),
    }
}

fn credential_from_claims(
    claims: &Value,
    tenant_claim: &str,
) -> std::result::Result<AccessCredential, Rejection> {
    let subject = required_str(claims, "sub")?;
    let email = required_str(claims, "email")?;
    let role_raw = required_str(claims, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| Rejection::Claims(format!("unknown role {role_raw:?}")))?;

    let tenant = claims
        .get(tenant_claim)
        .or_else(|| claims.get("tenant_id"))
        .ok_or_else(|| Rejection::Claims(format!("missing {tenant_claim}")))?;
    let tenant_id = match tenant {
        Value::Null => None,
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => {
            return Err(Rejection::Claims(format!(
                "{tenant_claim} must be a non-empty string or null"
            )));
        }
    };

    let expires_at = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| Rejection::Claims("missing exp".to_string()))?;
    let issued_at = claims.get("iat").and_then(Value::as_i64);

    let scope = match (role, tenant_id) {
        (Role::SuperAdmin, tenant_id) => Scope::Platform { tenant_id },
        (Role::Admin, Some(tenant_id)) => Scope::Tenant {
            role: TenantRole::Admin,
            tenant_id,
        },
        (Role::Operator, Some(tenant_id)) => Scope::Tenant {
            role: TenantRole::Operator,
            tenant_id,
        },
        (role, None) => {
            return Err(Rejection::Claims(format!("role {role} requires a tenant")));
        }
    };

    Ok(AccessCredential {
        subject,
        email,
        scope,
        issued_at,
        expires_at,
    })
}

fn required_str(claims: &Value, key: &str) -> std::result::Result<String, Rejection> {
    match claims.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(Rejection::Claims(format!("missing {key}"))),
    }
}
