use std::{
    collections::HashMap,
    io,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tracing::Level;

use crate::{
    address::CanonicalAddress, error::RegistryError, mixnet::RequestId, socket::Injector,
};

struct RegisteredConnection {
    address: CanonicalAddress,
    injector: Injector,
}

#[derive(Default)]
struct Connections {
    by_id: HashMap<RequestId, RegisteredConnection>,
    by_address: HashMap<CanonicalAddress, RequestId>,
}

impl Connections {
    fn assert_consistent(&self) {
        debug_assert_eq!(self.by_id.len(), self.by_address.len());
        debug_assert!(self
            .by_id
            .iter()
            .all(|(id, conn)| self.by_address.get(&conn.address) == Some(id)));
    }
}

/// Tracks live [`VirtualSocket`](crate::socket::VirtualSocket)s.
///
/// Maps each [`RequestId`] to its inbound event injector and [`CanonicalAddress`], and each
/// address back to its [`RequestId`]. The two maps are always inverses of each other, which
/// gives us single-flight per destination: a second connection to an address that is already
/// in flight cannot be registered.
///
/// Every operation takes one short lock over both maps and never awaits while holding it.
///
/// The host's inbound events ([`Self::inject_data`], [`Self::signal_remote_closed`],
/// [`Self::signal_remote_error`]) enter the crate here.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Connections>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn exists(&self, id: RequestId) -> bool {
        self.lock().by_id.contains_key(&id)
    }

    pub fn exists_for_address(&self, address: &CanonicalAddress) -> bool {
        self.lock().by_address.contains_key(address)
    }

    pub fn find_by_address(&self, address: &CanonicalAddress) -> Option<RequestId> {
        self.lock().by_address.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new connection. Fails if either `id` or `address` is already present.
    ///
    /// A taken `address` is a lost single-flight race and is only logged at debug level.
    #[tracing::instrument(level = Level::TRACE, skip(self, injector), err(level = Level::DEBUG))]
    pub(crate) fn insert(
        &self,
        id: RequestId,
        address: CanonicalAddress,
        injector: Injector,
    ) -> Result<(), RegistryError> {
        let mut connections = self.lock();

        if connections.by_id.contains_key(&id) {
            tracing::error!(%id, %address, "Request id is already registered.");
            return Err(RegistryError::DuplicateRequestId(id));
        }
        if connections.by_address.contains_key(&address) {
            return Err(RegistryError::DuplicateAddress(address));
        }

        connections.by_address.insert(address.clone(), id);
        connections
            .by_id
            .insert(id, RegisteredConnection { address, injector });
        connections.assert_consistent();

        Ok(())
    }

    /// Removes both directions of the mapping for `id`.
    ///
    /// Dropping the injector disconnects the socket's inbound queue, so a socket removed here
    /// sees end-of-stream once it has drained what was already queued.
    pub fn remove(&self, id: RequestId) -> Result<CanonicalAddress, RegistryError> {
        self.take(id).map(|conn| conn.address)
    }

    /// Like [`Self::remove`], but also fails any read suspended on the socket with
    /// [`io::ErrorKind::ConnectionAborted`].
    ///
    /// Used when a fetch is abandoned while its socket is still owned by the HTTP layer.
    pub fn abort(&self, id: RequestId) -> Result<CanonicalAddress, RegistryError> {
        let RegisteredConnection {
            address,
            mut injector,
        } = self.take(id)?;

        injector.remote_error(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("connection {id} to {address} was aborted"),
        ));

        Ok(address)
    }

    fn take(&self, id: RequestId) -> Result<RegisteredConnection, RegistryError> {
        let mut connections = self.lock();

        let conn = connections
            .by_id
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;
        connections.by_address.remove(&conn.address);
        connections.assert_consistent();

        Ok(conn)
    }

    /// Queues a chunk of inbound bytes for connection `id`.
    ///
    /// An empty chunk is delivered as end-of-stream.
    #[tracing::instrument(
        level = Level::TRACE,
        skip(self, bytes),
        fields(len = bytes.len()),
        err(level = Level::ERROR)
    )]
    pub fn inject_data(&self, id: RequestId, bytes: Bytes) -> Result<(), RegistryError> {
        let connections = self.lock();
        let conn = connections
            .by_id
            .get(&id)
            .ok_or(RegistryError::NotFound(id))?;
        conn.injector.data(bytes);

        Ok(())
    }

    /// The remote side closed connection `id`.
    ///
    /// Teardown races with the host are expected, so a missing connection is only logged.
    pub fn signal_remote_closed(&self, id: RequestId) {
        let mut connections = self.lock();
        let Some(conn) = connections.by_id.get_mut(&id) else {
            tracing::warn!(%id, "Remote closed a connection that no longer exists.");
            return;
        };

        if !conn.injector.remote_closed() {
            tracing::debug!(%id, "Connection was already marked as closed by the remote.");
        }
    }

    /// The host failed connection `id`. The `message` is returned verbatim to the socket reader.
    #[tracing::instrument(level = Level::TRACE, skip(self, message), err(level = Level::ERROR))]
    pub fn signal_remote_error(
        &self,
        id: RequestId,
        message: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let mut connections = self.lock();
        let conn = connections
            .by_id
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if !conn.injector.remote_error(io::Error::other(message.into())) {
            tracing::debug!(%id, "Connection already received a remote error.");
        }

        Ok(())
    }
}
