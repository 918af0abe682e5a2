use std::{fmt, ops::Deref};

use bytes::Bytes;
use http::HeaderMap;
use url::Url;

use crate::options::ResponseTainting;

/// <https://fetch.spec.whatwg.org/#concept-response-type>
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Basic,
    Cors,
    Default,
    Error,
    Opaque,
    OpaqueRedirect,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Cors => "cors",
            Self::Default => "default",
            Self::Error => "error",
            Self::Opaque => "opaque",
            Self::OpaqueRedirect => "opaqueredirect",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ResponseTainting> for ResponseType {
    fn from(value: ResponseTainting) -> Self {
        match value {
            ResponseTainting::Basic => Self::Basic,
            ResponseTainting::Cors => Self::Cors,
            ResponseTainting::Opaque => Self::Opaque,
            ResponseTainting::UnsafeIgnoreCors => Self::Default,
        }
    }
}

/// A fully read HTTP response.
///
/// `status` is a plain `u16` because opaque responses report status 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL of the last request in the redirect chain.
    pub url: Url,
    pub redirected: bool,
    pub response_type: ResponseType,
}

/// What the caller gets back from a fetch: the filtered view it may observe, plus the
/// unfiltered response it was derived from.
///
/// Dereferences to the filtered view.
#[derive(Clone, Debug)]
pub struct FilteredResponse {
    response: CanonicalResponse,
    internal: CanonicalResponse,
}

impl FilteredResponse {
    pub(crate) fn new(response: CanonicalResponse, internal: CanonicalResponse) -> Self {
        Self { response, internal }
    }

    /// The unfiltered response, never to be exposed to the caller's page.
    pub fn internal(&self) -> &CanonicalResponse {
        &self.internal
    }

    pub fn into_response(self) -> CanonicalResponse {
        self.response
    }
}

impl Deref for FilteredResponse {
    type Target = CanonicalResponse;

    fn deref(&self) -> &Self::Target {
        &self.response
    }
}
