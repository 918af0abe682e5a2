use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use mixfetch_transport::{
    CanonicalAddress, ConnectionRegistry, MixnetError, MixnetService, RequestId,
};
use rcgen::{
    BasicConstraints, CertificateParams, CertifiedKey, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::{
    pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer},
    ClientConfig, RootCertStore, ServerConfig,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc,
    time,
};
use tokio_rustls::TlsAcceptor;
use url::Url;

/// Generates a certificate for `name` with a fresh key pair, self-signed when there is no
/// `issuer`.
pub(crate) fn generate_cert(
    name: &str,
    issuer: Option<&CertifiedKey>,
    can_sign_others: bool,
) -> CertifiedKey {
    generate_cert_for(&[name], issuer, can_sign_others)
}

fn generate_cert_for(
    names: &[&str],
    issuer: Option<&CertifiedKey>,
    can_sign_others: bool,
) -> CertifiedKey {
    let key_pair = KeyPair::generate().unwrap();

    let mut params =
        CertificateParams::new(names.iter().map(ToString::to_string).collect::<Vec<_>>()).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, DnValue::Utf8String(names[0].to_string()));

    if can_sign_others {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    }

    let cert = match issuer {
        Some(issuer) => params
            .signed_by(&key_pair, &issuer.cert, &issuer.key_pair)
            .unwrap(),
        None => params.self_signed(&key_pair).unwrap(),
    };

    CertifiedKey { cert, key_pair }
}

/// A root plus one server certificate valid for every name the tests fetch over `https`.
pub(crate) struct TestPki {
    pub(crate) acceptor: TlsAcceptor,
    pub(crate) client_config: Arc<ClientConfig>,
}

impl TestPki {
    pub(crate) const SERVER_NAMES: [&'static str; 4] =
        ["example.com", "other.example", "app.example", "slow.example"];

    pub(crate) fn new() -> Self {
        let root = generate_cert("mixfetch test root", None, true);
        let server = generate_cert_for(&Self::SERVER_NAMES, Some(&root), false);

        let mut server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![server.cert.der().clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server.key_pair.serialize_der())),
            )
            .unwrap();
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let mut roots = RootCertStore::empty();
        roots.add(root.cert.der().clone()).unwrap();
        let mut client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        client_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            client_config: Arc::new(client_config),
        }
    }
}

/// A request as the loopback server saw it.
#[derive(Clone, Debug)]
pub(crate) struct SeenRequest {
    pub(crate) address: CanonicalAddress,
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

pub(crate) type Handler =
    Arc<dyn Fn(&CanonicalAddress, &Request<Bytes>) -> Response<Full<Bytes>> + Send + Sync>;

/// [`MixnetService`] that serves every connection with an in-process HTTP/1.1 server.
///
/// Bytes from the server are delivered through the [`ConnectionRegistry`] like a real host
/// would, and the server closing its end is reported as a remote close.
pub(crate) struct LoopbackMixnet {
    registry: Arc<ConnectionRegistry>,
    handler: Handler,
    tls: Option<TlsAcceptor>,
    next_id: AtomicU64,
    writers: Mutex<HashMap<RequestId, mpsc::UnboundedSender<Bytes>>>,
    silent: HashSet<CanonicalAddress>,
    parked: Mutex<Vec<DuplexStream>>,
    open_failure: Mutex<Option<String>>,
    opened: Mutex<Vec<(RequestId, CanonicalAddress)>>,
    closed: Mutex<Vec<RequestId>>,
    writes: AtomicUsize,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl LoopbackMixnet {
    pub(crate) fn new<H>(registry: Arc<ConnectionRegistry>, handler: H) -> Self
    where
        H: Fn(&CanonicalAddress, &Request<Bytes>) -> Response<Full<Bytes>> + Send + Sync + 'static,
    {
        Self {
            registry,
            handler: Arc::new(handler),
            tls: None,
            next_id: Default::default(),
            writers: Default::default(),
            silent: Default::default(),
            parked: Default::default(),
            open_failure: Default::default(),
            opened: Default::default(),
            closed: Default::default(),
            writes: Default::default(),
            seen: Default::default(),
        }
    }

    /// Serves `https` ports behind TLS.
    pub(crate) fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Connections to `address` are accepted but never answered.
    pub(crate) fn with_silent(mut self, address: CanonicalAddress) -> Self {
        self.silent.insert(address);
        self
    }

    pub(crate) fn fail_opens(&self, message: &str) {
        self.open_failure.lock().unwrap().replace(message.into());
    }

    pub(crate) fn opened(&self) -> Vec<CanonicalAddress> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(_, address)| address.clone())
            .collect()
    }

    pub(crate) fn opened_ids(&self) -> Vec<RequestId> {
        self.opened.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn closed(&self) -> Vec<RequestId> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub(crate) fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn serve(&self, address: CanonicalAddress, io: DuplexStream) {
        let handler = self.handler.clone();
        let seen = self.seen.clone();
        let tls = self
            .tls
            .clone()
            .filter(|_| address.as_str().ends_with(":443"));

        let service = service_fn(move |request: Request<Incoming>| {
            let handler = handler.clone();
            let seen = seen.clone();
            let address = address.clone();

            async move {
                let (parts, body) = request.into_parts();
                let body = body.collect().await?.to_bytes();
                let request = Request::from_parts(parts, body);

                seen.lock().unwrap().push(SeenRequest {
                    address: address.clone(),
                    method: request.method().clone(),
                    uri: request.uri().clone(),
                    headers: request.headers().clone(),
                    body: request.body().clone(),
                });

                Ok::<_, hyper::Error>(handler(&address, &request))
            }
        });

        tokio::spawn(async move {
            let result = match tls {
                Some(acceptor) => match acceptor.accept(io).await {
                    Ok(stream) => {
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                    }
                    Err(error) => {
                        tracing::debug!(%error, "Loopback TLS accept failed.");
                        return;
                    }
                },
                None => {
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(io), service)
                        .await
                }
            };

            if let Err(error) = result {
                tracing::debug!(%error, "Loopback HTTP connection failed.");
            }
        });
    }
}

#[async_trait]
impl MixnetService for LoopbackMixnet {
    async fn open_connection(&self, address: &CanonicalAddress) -> Result<RequestId, MixnetError> {
        if let Some(message) = self.open_failure.lock().unwrap().clone() {
            return Err(MixnetError(message));
        }

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.opened.lock().unwrap().push((id, address.clone()));

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        self.writers.lock().unwrap().insert(id, tx);
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if client_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            let _ = client_write.shutdown().await;
        });

        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut buf = vec![0; 16 * 1024];
            loop {
                match client_read.read(&mut buf).await {
                    Ok(0) | Err(..) => {
                        registry.signal_remote_closed(id);
                        break;
                    }
                    Ok(read) => {
                        let chunk = Bytes::copy_from_slice(&buf[..read]);
                        if registry.inject_data(id, chunk).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        if self.silent.contains(address) {
            self.parked.lock().unwrap().push(server);
        } else {
            self.serve(address.clone(), server);
        }

        Ok(id)
    }

    async fn send_bytes(&self, id: RequestId, bytes: Bytes) -> Result<(), MixnetError> {
        let writer = self.writers.lock().unwrap().get(&id).cloned();
        let writer = writer.ok_or_else(|| MixnetError(format!("connection {id} is not open")))?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        writer
            .send(bytes)
            .map_err(|_| MixnetError(format!("connection {id} is gone")))
    }

    async fn close_connection(&self, id: RequestId) -> Result<(), MixnetError> {
        self.writers.lock().unwrap().remove(&id);
        self.closed.lock().unwrap().push(id);
        Ok(())
    }
}

pub(crate) fn address(url: &str) -> CanonicalAddress {
    CanonicalAddress::from_url(&Url::parse(url).unwrap()).unwrap()
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !condition() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}
