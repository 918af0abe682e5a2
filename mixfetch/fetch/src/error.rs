use std::{io, time::Duration};

use mixfetch_transport::{AddressError, CanonicalAddress, MixnetError, RegistryError};
use thiserror::Error;
use url::Url;

use crate::{
    config::ConfigError,
    options::{RedirectMode, ReferrerPolicy, RequestMode},
    redirect::MAX_REDIRECTS,
    tls::TlsSetupError,
};

/// Terminal error of one fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid `{field}` value `{value}`")]
    InvalidOption { field: &'static str, value: String },
    #[error("`{0}` mode is not supported")]
    UnsupportedMode(RequestMode),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("cross-origin request to `{0}` is not allowed in same-origin mode")]
    CrossOrigin(Url),
    #[error("no-cors requests must follow redirects, but redirect mode is `{0}`")]
    NoCorsRedirect(RedirectMode),
    #[error("scheme `{0}` is not allowed in cors mode")]
    SchemeNotAllowed(String),
    #[error("stopped after {} redirects", MAX_REDIRECTS)]
    TooManyRedirects,
    #[error("redirect loop detected at `{0}`")]
    RedirectLoop(Url),
    #[error("redirect to `{0}` is not allowed when redirect mode is `error`")]
    RedirectNotAllowed(Url),
    #[error("invalid redirect location `{0}`")]
    InvalidRedirectLocation(String),
    #[error("CORS check failed: {0}")]
    Cors(#[from] CorsError),

    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request was aborted")]
    Aborted,

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("`{0}` referrer policy is not implemented")]
    UnimplementedReferrerPolicy(ReferrerPolicy),
}

/// Coarse classification of [`FetchError`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Bad input or a broken internal invariant, never caused by the remote.
    Usage,
    /// The fetch rules forbid this request or response.
    Policy,
    /// The mixnet, TLS or HTTP exchange failed.
    Transport,
    /// The request needs behavior this crate deliberately does not provide.
    Unimplemented,
    /// The caller's signal fired.
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::InvalidOption { .. } | Self::UnsupportedMode(..) | Self::InvalidUrl(..) => {
                FetchErrorKind::Usage
            }
            Self::Transport(TransportError::Registry(..)) => FetchErrorKind::Usage,
            Self::CrossOrigin(..)
            | Self::NoCorsRedirect(..)
            | Self::SchemeNotAllowed(..)
            | Self::TooManyRedirects
            | Self::RedirectLoop(..)
            | Self::RedirectNotAllowed(..)
            | Self::InvalidRedirectLocation(..)
            | Self::Cors(..) => FetchErrorKind::Policy,
            Self::Transport(..) | Self::Timeout(..) => FetchErrorKind::Transport,
            Self::Aborted => FetchErrorKind::Cancelled,
            Self::NotImplemented(..) | Self::UnimplementedReferrerPolicy(..) => {
                FetchErrorKind::Unimplemented
            }
        }
    }
}

/// Failure of the CORS check on a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorsError {
    #[error("response has no `access-control-allow-origin` header")]
    MissingAllowOrigin,
    #[error("there is no origin to match `access-control-allow-origin: {0}` against")]
    NullOrigin(String),
    #[error("`access-control-allow-origin` is `{received}`, expected `{expected}`")]
    OriginMismatch { expected: String, received: String },
    #[error("credentialed requests require `access-control-allow-credentials: true`")]
    MissingAllowCredentials,
}

/// Errors raised while moving a request over the virtual transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("scheme `{0}` cannot be fetched over the mixnet")]
    UnsupportedScheme(String),
    #[error("invalid remote address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("a connection to {0} is already in flight")]
    DuplicateConnection(CanonicalAddress),
    #[error("connection registry invariant violated: {0}")]
    Registry(RegistryError),
    #[error("mixnet request failed: {0}")]
    Mixnet(#[from] MixnetError),
    #[error("`{0}` is not a valid TLS server name")]
    InvalidServerName(String),
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),
    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("failed to build the HTTP request: {0}")]
    Request(#[from] http::Error),
}

impl From<RegistryError> for TransportError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::DuplicateAddress(address) => Self::DuplicateConnection(address),
            other => Self::Registry(other),
        }
    }
}

impl From<RegistryError> for FetchError {
    fn from(value: RegistryError) -> Self {
        Self::Transport(value.into())
    }
}

impl From<MixnetError> for FetchError {
    fn from(value: MixnetError) -> Self {
        Self::Transport(value.into())
    }
}

impl From<hyper::Error> for FetchError {
    fn from(value: hyper::Error) -> Self {
        Self::Transport(value.into())
    }
}

/// Errors that can occur when building a [`FetchEngine`](crate::engine::FetchEngine).
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tls(#[from] TlsSetupError),
}

pub type Result<T, E = FetchError> = core::result::Result<T, E>;
