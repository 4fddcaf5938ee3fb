//! edgegate-auth
//!
//! The per-request building blocks of the edge layer. Each one is a function
//! of its inputs; none of them writes to a response.
//!
//! - **Verifying access credentials** (signature, expiry, role/tenant shape)
//! - **Resolving the tenant** behind a host, through a TTL cache
//! - **Refreshing sessions** against the auth service and forwarding its cookies
//! - **Reading and clearing cookies**
//!
//! ## Quick start
//! ```no_run
//! use edgegate_auth::{CredentialVerifier, VerifierKey, VerifyOptions};
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = CredentialVerifier::new(
//!     &VerifierKey::Secret(b"signing-secret".to_vec()),
//!     VerifyOptions::default(),
//! )?;
//!
//! match verifier.verify("eyJ...") {
//!     Ok(credential) => println!("role={}", credential.role()),
//!     Err(rejection) => println!("rejected: {rejection}"),
//! }
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]

mod cache;
mod cookie;
mod error;
mod jwt;
mod refresh;
mod tenant;

pub use cache::TtlCache;
pub use cookie::{
    ACCESS_COOKIE, CSRF_COOKIE, CookieJar, CookieOptions, REFRESH_COOKIE, SESSION_COOKIES,
    build_clear_cookie, clear_session_cookies,
};
pub use error::{Error, Result};
pub use jsonwebtoken::Algorithm;
pub use jwt::{CredentialVerifier, Rejection, VerifierKey, VerifyOptions};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
pub use tenant::{TenantConfig, TenantLookup, TenantResolver, normalize_host};
