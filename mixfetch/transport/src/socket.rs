use std::{
    cmp,
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Instant,
};

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    runtime::Handle,
    sync::{mpsc, oneshot},
};

use crate::{
    address::CanonicalAddress,
    error::{MixnetError, RegistryError},
    mixnet::{MixnetService, RequestId},
    registry::ConnectionRegistry,
};

/// Creates the two ends of a socket's inbound path.
pub(crate) fn channel() -> (Injector, Inbound) {
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = oneshot::channel();
    let (error_tx, error_rx) = oneshot::channel();

    let injector = Injector {
        data_tx,
        closed_tx: Some(closed_tx),
        error_tx: Some(error_tx),
    };
    let inbound = Inbound {
        data_rx,
        closed_rx: Some(closed_rx),
        error_rx: Some(error_rx),
        leftover: Bytes::new(),
        finished: false,
    };

    (injector, inbound)
}

/// Held by the [`ConnectionRegistry`], pushes host events into one socket.
pub(crate) struct Injector {
    data_tx: mpsc::UnboundedSender<Bytes>,
    closed_tx: Option<oneshot::Sender<()>>,
    error_tx: Option<oneshot::Sender<io::Error>>,
}

impl Injector {
    pub(crate) fn data(&self, bytes: Bytes) {
        if self.data_tx.send(bytes).is_err() {
            tracing::trace!("Inbound data for a socket that is no longer read.");
        }
    }

    /// Returns `false` if the signal already fired.
    pub(crate) fn remote_closed(&mut self) -> bool {
        match self.closed_tx.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the signal already fired.
    pub(crate) fn remote_error(&mut self, error: io::Error) -> bool {
        match self.error_tx.take() {
            Some(tx) => {
                let _ = tx.send(error);
                true
            }
            None => false,
        }
    }
}

/// Read side of a [`VirtualSocket`].
///
/// Sources are consulted in a fixed order on every poll: the unread remainder of the last
/// chunk, then queued chunks, then the error and closed signals. A chunk that does not fit in
/// the caller's buffer is kept as the remainder, so bytes are never reordered or dropped.
pub(crate) struct Inbound {
    data_rx: mpsc::UnboundedReceiver<Bytes>,
    closed_rx: Option<oneshot::Receiver<()>>,
    error_rx: Option<oneshot::Receiver<io::Error>>,
    leftover: Bytes,
    /// End-of-stream was reached, every following read returns 0 bytes.
    finished: bool,
}

impl Inbound {
    fn fill_from_leftover(&mut self, buf: &mut ReadBuf<'_>) {
        let len = cmp::min(buf.remaining(), self.leftover.len());
        buf.put_slice(&self.leftover.split_to(len));
    }

    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if !self.leftover.is_empty() {
            self.fill_from_leftover(buf);
            return Poll::Ready(Ok(()));
        }

        if self.finished {
            return Poll::Ready(Ok(()));
        }

        let disconnected = match self.data_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) if chunk.is_empty() => {
                self.finished = true;
                return Poll::Ready(Ok(()));
            }
            Poll::Ready(Some(chunk)) => {
                self.leftover = chunk;
                self.fill_from_leftover(buf);
                return Poll::Ready(Ok(()));
            }
            Poll::Ready(None) => true,
            Poll::Pending => false,
        };

        if let Some(error_rx) = self.error_rx.as_mut() {
            match Pin::new(error_rx).poll(cx) {
                Poll::Ready(Ok(error)) => {
                    self.error_rx = None;
                    self.finished = true;
                    return Poll::Ready(Err(error));
                }
                Poll::Ready(Err(..)) => self.error_rx = None,
                Poll::Pending => {}
            }
        }

        if let Some(closed_rx) = self.closed_rx.as_mut() {
            match Pin::new(closed_rx).poll(cx) {
                Poll::Ready(Ok(())) => {
                    self.closed_rx = None;
                    self.finished = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Err(..)) => self.closed_rx = None,
                Poll::Pending => {}
            }
        }

        // Injector is gone, the socket was removed from the registry.
        if disconnected {
            self.finished = true;
            return Poll::Ready(Ok(()));
        }

        Poll::Pending
    }
}

struct PendingWrite {
    len: usize,
    send: BoxFuture<'static, Result<(), MixnetError>>,
}

/// Connected stream socket whose bytes cross the mixnet instead of the network.
///
/// * Inbound bytes, remote close and remote errors are pushed by the host through the
///   [`ConnectionRegistry`] and surface here through [`AsyncRead`].
/// * Each [`AsyncWrite::poll_write`] hands the whole buffer to
///   [`MixnetService::send_bytes`] and completes when the host acknowledges it.
/// * [`AsyncWrite::poll_shutdown`] removes the socket from the registry and notifies the host.
///   Dropping an unclosed socket does the same, with the notification spawned on the current
///   runtime.
pub struct VirtualSocket {
    id: RequestId,
    address: CanonicalAddress,
    registry: Arc<ConnectionRegistry>,
    mixnet: Arc<dyn MixnetService>,
    inbound: Inbound,
    pending_write: Option<PendingWrite>,
    pending_close: Option<BoxFuture<'static, Result<(), MixnetError>>>,
    closed: bool,
}

impl VirtualSocket {
    /// Creates a socket for the connection the host opened as `id` and registers it.
    pub fn register(
        id: RequestId,
        address: CanonicalAddress,
        registry: Arc<ConnectionRegistry>,
        mixnet: Arc<dyn MixnetService>,
    ) -> Result<Self, RegistryError> {
        let (injector, inbound) = channel();
        registry.insert(id, address.clone(), injector)?;

        tracing::debug!(%id, %address, "Registered a virtual socket.");

        Ok(Self {
            id,
            address,
            registry,
            mixnet,
            inbound,
            pending_write: None,
            pending_close: None,
            closed: false,
        })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn remote_address(&self) -> &CanonicalAddress {
        &self.address
    }

    /// Deadlines are accepted but not enforced.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.warn_deadline("read/write", deadline);
    }

    /// Deadlines are accepted but not enforced.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.warn_deadline("read", deadline);
    }

    /// Deadlines are accepted but not enforced.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.warn_deadline("write", deadline);
    }

    fn warn_deadline(&self, kind: &str, deadline: Option<Instant>) {
        tracing::warn!(
            id = %self.id,
            ?deadline,
            "Virtual sockets do not enforce {kind} deadlines, the deadline is ignored."
        );
    }

    /// Removes this socket from the registry.
    ///
    /// Returns whether the host still needs to be notified. It does not when fetch cleanup has
    /// already force-removed the entry.
    fn deregister(&self) -> bool {
        match self.registry.remove(self.id) {
            Ok(..) => true,
            Err(error) => {
                tracing::debug!(
                    %error,
                    id = %self.id,
                    "Virtual socket was already removed from the registry."
                );
                false
            }
        }
    }

    fn teardown(&self) -> BoxFuture<'static, Result<(), MixnetError>> {
        let mixnet = self.mixnet.clone();
        let id = self.id;

        async move { mixnet.close_connection(id).await }.boxed()
    }
}

impl AsyncRead for VirtualSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().inbound.poll_read(cx, buf)
    }
}

impl AsyncWrite for VirtualSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let Self {
            id,
            mixnet,
            pending_write,
            closed,
            ..
        } = self.get_mut();

        if *closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection {id} is closed"),
            )));
        }

        let pending = pending_write.get_or_insert_with(|| {
            let mixnet = mixnet.clone();
            let id = *id;
            let bytes = Bytes::copy_from_slice(buf);

            PendingWrite {
                len: bytes.len(),
                send: async move { mixnet.send_bytes(id, bytes).await }.boxed(),
            }
        });

        let result = ready!(pending.send.as_mut().poll(cx));
        let len = pending.len;
        *pending_write = None;

        Poll::Ready(result.map(|()| len).map_err(io::Error::other))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending_close.is_none() {
            if this.closed {
                return Poll::Ready(Ok(()));
            }

            this.closed = true;
            if !this.deregister() {
                return Poll::Ready(Ok(()));
            }

            this.pending_close = Some(this.teardown());
        }

        let Some(close) = this.pending_close.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(close.as_mut().poll(cx));
        this.pending_close = None;

        tracing::debug!(
            id = %this.id,
            address = %this.address,
            ?result,
            "Closed a virtual socket."
        );

        Poll::Ready(result.map_err(io::Error::other))
    }
}

impl Drop for VirtualSocket {
    fn drop(&mut self) {
        let teardown = match self.pending_close.take() {
            Some(close) => close,
            None if !self.closed && self.deregister() => self.teardown(),
            None => return,
        };

        let id = self.id;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = teardown.await {
                        tracing::warn!(
                            %error,
                            %id,
                            "Failed to notify the mixnet about a closed connection."
                        );
                    }
                });
            }
            Err(..) => {
                tracing::warn!(
                    %id,
                    "No runtime available, the mixnet will not be notified about a closed connection."
                );
            }
        }
    }
}
