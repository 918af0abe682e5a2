//! Boundary with the host's mixnet client.
//!
//! The host owns the real delivery primitives. This crate only asks it to open, feed and close
//! connections, and the host pushes inbound events back through the
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry), correlated by [`RequestId`].

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{address::CanonicalAddress, error::MixnetError};

/// Identifies exactly one in-flight virtual connection.
///
/// Allocated by the [`MixnetService`] when a connection is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound half of the host boundary.
///
/// Every call is a round trip to the host, so each one suspends the calling task until the host
/// acknowledges or fails it.
#[async_trait]
pub trait MixnetService: Send + Sync + 'static {
    /// Asks the host for a fresh connection towards `address`.
    async fn open_connection(&self, address: &CanonicalAddress) -> Result<RequestId, MixnetError>;

    /// Hands the whole `bytes` buffer to the host for delivery on connection `id`.
    async fn send_bytes(&self, id: RequestId, bytes: Bytes) -> Result<(), MixnetError>;

    /// Tells the host that connection `id` is gone on our side.
    async fn close_connection(&self, id: RequestId) -> Result<(), MixnetError>;
}
