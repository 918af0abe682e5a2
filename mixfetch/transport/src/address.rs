use std::fmt;

use url::Url;

use crate::error::AddressError;

/// `host:port` of a remote endpoint, with the scheme's default port filled in when the URL
/// omits it.
///
/// Used as the key for single-flight checks in the
/// [`ConnectionRegistry`](crate::registry::ConnectionRegistry), so `https://example.com` and
/// `https://example.com:443` must produce the same value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalAddress(String);

impl CanonicalAddress {
    pub fn from_url(url: &Url) -> Result<Self, AddressError> {
        // `host_str` keeps the brackets around IPv6 literals.
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| AddressError::MissingHost(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AddressError::UnknownPort(url.scheme().to_string()))?;

        Ok(Self(format!("{host}:{port}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
