//! TLS for `https` fetches. The handshake runs end to end over the mixnet, the exit gateway only
//! ever sees ciphertext.

use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{pki_types::ServerName, ClientConfig, RootCertStore};
use thiserror::Error;
use url::{Host, Url};

use crate::error::TransportError;

/// We only ever speak HTTP/1.1 over a virtual connection.
const ALPN_HTTP1: &[u8] = b"http/1.1";

#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("no good trust root certificate was found")]
    NoGoodRoot,
}

/// PEM files named by `path`: the file itself, or the files directly inside a directory.
fn pem_files(path: PathBuf) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path];
    }

    match fs::read_dir(&path) {
        Ok(entries) => entries
            .filter_map(|entry| {
                entry
                    .inspect_err(|error| {
                        tracing::error!(
                            %error,
                            ?path,
                            "Failed to read a trust roots directory entry."
                        )
                    })
                    .ok()
            })
            .map(|entry| entry.path())
            .filter(|path| !path.is_dir())
            .collect(),
        Err(error) => {
            tracing::error!(%error, ?path, "Failed to list a trust roots directory.");
            Vec::new()
        }
    }
}

fn add_pem_file(store: &mut RootCertStore, path: &Path) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            tracing::error!(%error, ?path, "Failed to open a trust roots file.");
            return;
        }
    };

    let mut file = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut file).filter_map(|cert| {
        cert.inspect_err(|error| {
            tracing::error!(%error, ?path, "Failed to parse a trust roots file.")
        })
        .ok()
    });

    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        tracing::warn!(?path, added, ignored, "Ignored invalid trust root certificates.");
    }
}

/// Collects every certificate found under `paths`, which may be PEM files or directories of
/// them. Directories are not traversed recursively.
///
/// Unreadable entries are logged and skipped, check [`RootCertStore::is_empty`] on the result.
pub fn best_effort_root_store<P: IntoIterator<Item = PathBuf>>(paths: P) -> RootCertStore {
    let mut store = RootCertStore::empty();

    paths
        .into_iter()
        .flat_map(pem_files)
        .for_each(|path| add_pem_file(&mut store, &path));

    store
}

/// Trust roots of the platform certificate store.
pub fn native_root_store() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(%error, "Failed to load a native trust root certificate.");
    }

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "Loaded native trust root certificates.");

    store
}

/// Builds the client config for `https` fetches, trusting `trust_roots` if given and the
/// platform store otherwise.
#[tracing::instrument(level = "debug", err)]
pub fn client_config(
    trust_roots: Option<&[PathBuf]>,
) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let store = match trust_roots {
        Some(paths) => best_effort_root_store(paths.iter().cloned()),
        None => native_root_store(),
    };

    if store.is_empty() {
        return Err(TlsSetupError::NoGoodRoot);
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(store)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

    Ok(Arc::new(config))
}

/// The name the server certificate is verified against.
pub(crate) fn server_name(url: &Url) -> Result<ServerName<'static>, TransportError> {
    let name = match url.host() {
        Some(Host::Domain(domain)) => ServerName::try_from(domain.to_string())
            .map_err(|_| TransportError::InvalidServerName(domain.to_string()))?,
        Some(Host::Ipv4(ip)) => ServerName::IpAddress(std::net::IpAddr::V4(ip).into()),
        Some(Host::Ipv6(ip)) => ServerName::IpAddress(std::net::IpAddr::V6(ip).into()),
        None => return Err(TransportError::InvalidServerName(url.to_string())),
    };

    Ok(name)
}
