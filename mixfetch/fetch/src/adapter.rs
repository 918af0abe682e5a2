//! HTTP/1.1 over virtual sockets.
//!
//! Every request of a fetch, redirects included, gets its own virtual connection, which is closed
//! once the response is read.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use http::{
    header::{self, HeaderValue},
    HeaderMap, Method, Request, StatusCode,
};
use http_body_util::{BodyExt, Full};
use hyper::{client::conn::http1, ext::ReasonPhrase};
use hyper_util::rt::TokioIo;
use mixfetch_transport::{
    CanonicalAddress, ConnectionRegistry, MixnetService, RequestId, VirtualSocket,
};
use rustls::{pki_types::ServerName, ClientConfig};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    runtime::Handle,
    task::JoinHandle,
    time,
};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::Level;
use url::Url;

use crate::{
    error::{FetchError, Result, TransportError},
    redirect::RedirectAction,
    response::{CanonicalResponse, ResponseType},
    tls,
};

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Headers describing the request body, dropped when a redirect turns the request into a `GET`.
const BODY_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::CONTENT_LANGUAGE,
];

/// One HTTP request on the wire.
#[derive(Clone, Debug)]
pub struct HopRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HopRequest {
    /// Request target in origin-form, `Host` taken from the URL and `Connection: close`.
    fn to_hyper(&self) -> Result<Request<Full<Bytes>>, http::Error> {
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }

        let host = self.url.host_str().unwrap_or_default();
        let host = match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(target)
            .body(Full::new(self.body.clone()))?;

        let headers = request.headers_mut();
        *headers = self.headers.clone();
        headers.insert(header::HOST, HeaderValue::from_str(&host)?);
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

        Ok(request)
    }

    /// The request to issue after a `status` redirect to `target`.
    ///
    /// <https://fetch.spec.whatwg.org/#http-redirect-fetch>, steps 12 and 13.
    fn redirect(mut self, status: u16, target: Url) -> Self {
        let to_get = match status {
            301 | 302 => self.method == Method::POST,
            303 => self.method != Method::GET && self.method != Method::HEAD,
            _ => false,
        };

        if to_get {
            self.method = Method::GET;
            self.body = Bytes::new();
            for name in &BODY_HEADERS {
                self.headers.remove(name);
            }
        }

        if self.url.origin() != target.origin() {
            self.headers.remove(header::AUTHORIZATION);
            self.headers.remove(header::COOKIE);
        }

        self.url = target;
        self
    }
}

/// Resolved `Location` of a redirect response, [`None`] for other responses.
fn redirect_target(response: &CanonicalResponse) -> Result<Option<Url>> {
    if !REDIRECT_STATUSES.contains(&response.status) {
        return Ok(None);
    }

    let Some(location) = response.headers.get(header::LOCATION) else {
        return Ok(None);
    };

    let location = location
        .to_str()
        .map_err(|_| FetchError::InvalidRedirectLocation(format!("{location:?}")))?;

    response
        .url
        .join(location)
        .map(Some)
        .map_err(|_| FetchError::InvalidRedirectLocation(location.to_string()))
}

/// A virtual connection, with or without TLS on top.
enum MixStream {
    Plain(VirtualSocket),
    Tls(Box<TlsStream<VirtualSocket>>),
}

impl MixStream {
    fn socket(&self) -> &VirtualSocket {
        match self {
            Self::Plain(socket) => socket,
            Self::Tls(stream) => stream.get_ref().0,
        }
    }
}

impl AsyncRead for MixStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(socket) => Pin::new(socket).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MixStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(socket) => Pin::new(socket).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(socket) => Pin::new(socket).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(socket) => Pin::new(socket).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Tears down the virtual connection of a request that did not complete.
///
/// The socket itself is owned by the HTTP connection task, so when the fetch is abandoned this
/// force-removes the registry entry (waking any suspended read), notifies the host and aborts
/// the task. Does nothing if the socket already deregistered itself.
struct DialGuard {
    registry: Arc<ConnectionRegistry>,
    mixnet: Arc<dyn MixnetService>,
    address: CanonicalAddress,
    id: RequestId,
    connection: Option<JoinHandle<hyper::Result<()>>>,
}

impl DialGuard {
    /// Waits for the HTTP connection task to close the socket.
    async fn finish(mut self, timeout: Duration) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        match time::timeout(timeout, connection).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(error))) => {
                tracing::debug!(%error, id = %self.id, "HTTP connection closed with an error.")
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, id = %self.id, "HTTP connection task failed.")
            }
            Err(..) => tracing::warn!(
                id = %self.id,
                ?timeout,
                "HTTP connection did not close in time, tearing it down."
            ),
        }
    }
}

impl Drop for DialGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }

        if self.registry.find_by_address(&self.address) != Some(self.id) {
            return;
        }

        if let Err(error) = self.registry.abort(self.id) {
            tracing::debug!(%error, id = %self.id, "Connection was removed concurrently.");
            return;
        }

        tracing::debug!(
            id = %self.id,
            address = %self.address,
            "Aborted an unfinished connection."
        );

        let mixnet = self.mixnet.clone();
        let id = self.id;
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(error) = mixnet.close_connection(id).await {
                        tracing::warn!(%error, %id, "Failed to close an aborted connection.");
                    }
                });
            }
            Err(..) => tracing::warn!(
                %id,
                "No runtime to close an aborted connection on, the host is not notified."
            ),
        }
    }
}

/// Runs HTTP exchanges over the mixnet.
pub struct TransportAdapter {
    registry: Arc<ConnectionRegistry>,
    mixnet: Arc<dyn MixnetService>,
    tls: TlsConnector,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl TransportAdapter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        mixnet: Arc<dyn MixnetService>,
        tls_config: Arc<ClientConfig>,
        request_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            mixnet,
            tls: TlsConnector::from(tls_config),
            request_timeout,
            shutdown_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Opens a virtual connection to `address`.
    ///
    /// At most one connection per address may be in flight, a second dial fails with
    /// [`TransportError::DuplicateConnection`] without reaching the host.
    #[tracing::instrument(level = Level::DEBUG, skip(self), err(level = Level::DEBUG))]
    pub async fn dial(&self, address: &CanonicalAddress) -> Result<VirtualSocket, TransportError> {
        if self.registry.exists_for_address(address) {
            return Err(TransportError::DuplicateConnection(address.clone()));
        }

        let id = self.mixnet.open_connection(address).await?;

        match VirtualSocket::register(
            id,
            address.clone(),
            self.registry.clone(),
            self.mixnet.clone(),
        ) {
            Ok(socket) => Ok(socket),
            Err(error) => {
                if let Err(close_error) = self.mixnet.close_connection(id).await {
                    tracing::warn!(
                        error = %close_error,
                        %id,
                        "Failed to close a connection that could not be registered."
                    );
                }

                Err(error.into())
            }
        }
    }

    /// [`Self::dial`] followed by a TLS handshake with `server_name`.
    #[tracing::instrument(level = Level::DEBUG, skip(self), err(level = Level::DEBUG))]
    pub async fn dial_tls(
        &self,
        address: &CanonicalAddress,
        server_name: ServerName<'static>,
    ) -> Result<TlsStream<VirtualSocket>, TransportError> {
        let socket = self.dial(address).await?;

        self.tls
            .connect(server_name, socket)
            .await
            .map_err(TransportError::Tls)
    }

    /// Sends `request` and follows redirects for as long as `check_redirect` allows, all within
    /// the request timeout.
    ///
    /// `check_redirect` is given the redirect target and the URLs requested so far.
    #[tracing::instrument(
        level = Level::DEBUG,
        skip_all,
        fields(method = %request.method, url = %request.url),
        err(level = Level::DEBUG)
    )]
    pub async fn execute<F>(
        &self,
        request: HopRequest,
        check_redirect: F,
    ) -> Result<CanonicalResponse>
    where
        F: FnMut(&Url, &[Url]) -> Result<RedirectAction>,
    {
        time::timeout(
            self.request_timeout,
            self.follow_redirects(request, check_redirect),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.request_timeout))?
    }

    async fn follow_redirects<F>(
        &self,
        mut request: HopRequest,
        mut check_redirect: F,
    ) -> Result<CanonicalResponse>
    where
        F: FnMut(&Url, &[Url]) -> Result<RedirectAction>,
    {
        let mut via = Vec::new();

        loop {
            let response = self.round_trip(&request).await?;

            let Some(target) = redirect_target(&response)? else {
                return Ok(response);
            };

            via.push(request.url.clone());
            match check_redirect(&target, &via)? {
                RedirectAction::UseLastResponse => return Ok(response),
                RedirectAction::Follow => {
                    tracing::debug!(
                        status = response.status,
                        from = %request.url,
                        to = %target,
                        "Following a redirect."
                    );
                    request = request.redirect(response.status, target);
                }
            }
        }
    }

    /// One request over a fresh virtual connection.
    async fn round_trip(&self, request: &HopRequest) -> Result<CanonicalResponse> {
        let use_tls = match request.url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(TransportError::UnsupportedScheme(other.to_string()).into()),
        };

        let address = CanonicalAddress::from_url(&request.url).map_err(TransportError::from)?;
        let stream = if use_tls {
            let server_name = tls::server_name(&request.url)?;
            MixStream::Tls(Box::new(self.dial_tls(&address, server_name).await?))
        } else {
            MixStream::Plain(self.dial(&address).await?)
        };

        let mut guard = DialGuard {
            registry: self.registry.clone(),
            mixnet: self.mixnet.clone(),
            address,
            id: stream.socket().id(),
            connection: None,
        };

        let (mut sender, connection) = http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
            .await
            .map_err(TransportError::from)?;
        guard.connection = Some(tokio::spawn(connection));

        let hyper_request = request.to_hyper().map_err(TransportError::from)?;
        sender.ready().await.map_err(TransportError::from)?;
        let response = sender
            .send_request(hyper_request)
            .await
            .map_err(TransportError::from)?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(TransportError::from)?
            .to_bytes();
        drop(sender);

        guard.finish(self.shutdown_timeout).await;

        Ok(CanonicalResponse {
            status: parts.status.as_u16(),
            status_text: status_text(parts.status, parts.extensions.get::<ReasonPhrase>()),
            headers: parts.headers,
            body,
            url: request.url.clone(),
            redirected: false,
            response_type: ResponseType::Default,
        })
    }
}

fn status_text(status: StatusCode, reason: Option<&ReasonPhrase>) -> String {
    match reason {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    }
}
