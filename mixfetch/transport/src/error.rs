use thiserror::Error;

use crate::{address::CanonicalAddress, mixnet::RequestId};

/// Misuse of the [`ConnectionRegistry`](crate::registry::ConnectionRegistry).
///
/// These are never caused by the remote side. Getting one means the orchestration layer lost
/// track of its connections, so callers should abort the current request instead of retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateRequestId(RequestId),
    #[error("a connection to {0} is already in flight")]
    DuplicateAddress(CanonicalAddress),
    #[error("connection {0} does not exist")]
    NotFound(RequestId),
}

impl RegistryError {
    /// Whether this error can only be the result of a bug in the caller.
    ///
    /// [`RegistryError::DuplicateAddress`] is the exception: two fetches racing for the same
    /// destination is a runtime condition.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(self, Self::DuplicateAddress(..))
    }
}

/// Errors that can occur when turning a URL into a [`CanonicalAddress`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("`{0}` has no host")]
    MissingHost(String),
    #[error("scheme `{0}` has no default port and none was given")]
    UnknownPort(String),
}

/// Failure reported by the host's mixnet service, carried verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MixnetError(pub String);

impl From<&str> for MixnetError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MixnetError {
    fn from(value: String) -> Self {
        Self(value)
    }
}
