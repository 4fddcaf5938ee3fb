//! Error types.

use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned while setting this crate's components up.
///
/// Per-request failures (a bad token, a failed refresh, an unknown tenant) are
/// ordinary values and never show up here.
#[derive(Debug, Error)]
pub enum Error {
    /// Algorithm does not match the kind of key material supplied.
    #[error("unsupported algorithm for this key: {0:?}")]
    UnsupportedAlg(jsonwebtoken::Algorithm),

    /// Key material could not be parsed.
    #[error("invalid key material: {0}")]
    Key(String),

    /// Cookie options are not usable.
    #[error("invalid cookie options: {0}")]
    Cookie(String),

    /// jsonwebtoken error.
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<Error> for edgegate_api::EdgeError {
    fn from(err: Error) -> Self {
        edgegate_api::EdgeError::Config(err.to_string())
    }
}
