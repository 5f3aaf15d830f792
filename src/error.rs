//! Typed errors, following the single-enum `thiserror` pattern used
//! throughout the teacher crate family (see `shipwright-cli::error::ShipwrightError`).

use thiserror::Error;

/// Every error kind spec'd for the core (spec.md §7).
#[derive(Error, Debug)]
pub enum Error {
    #[error("template parse error: {0}")]
    TemplateParse(String),

    #[error("template execution error in fragment {fragment}: {message}")]
    TemplateExecution { fragment: String, message: String },

    /// Advisory: a construct could not be statically analyzed and was
    /// marked opaque. Not fatal — callers may ignore this variant or log it.
    #[error("analysis could not see through an opaque construct at {path}")]
    AnalysisOpaque { path: String },

    /// Advisory: two fragments hashed to the same ID and one was
    /// disambiguated with a numeric suffix.
    #[error("fragment id collision on {base_id}, resolved as {resolved_id}")]
    FragmentIdCollision {
        base_id: String,
        resolved_id: String,
    },

    #[error("page is closed")]
    PageClosed,

    #[error("page not found")]
    PageNotFound,

    #[error("token is invalid")]
    TokenInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("token nonce has already been used")]
    TokenReplay,

    #[error("session has expired")]
    SessionExpired,

    #[error("operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Collapse any token-related error into the single `unauthorized`
    /// surface spec.md §4.8 requires at the transport boundary: callers
    /// must never be able to distinguish invalid/expired/replayed from the
    /// error alone.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Error::TokenInvalid | Error::TokenExpired | Error::TokenReplay
        )
    }

    pub fn unauthorized() -> Self {
        Error::TokenInvalid
    }
}

pub type Result<T> = std::result::Result<T, Error>;
