use bytes::Bytes;
use http::{
    header::{self, HeaderName},
    HeaderMap, HeaderValue, Method,
};
use tokio_util::sync::CancellationToken;
use url::{Origin, Url};

use crate::{
    error::{FetchError, Result, TransportError},
    options::{ReferrerPolicy, RequestMode, RequestOptions},
};

/// One fetch as handed to [`FetchEngine::fetch`](crate::engine::FetchEngine::fetch).
#[derive(Clone, Debug)]
pub struct CanonicalRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub options: RequestOptions,
    /// Cancels the fetch when triggered.
    pub signal: Option<CancellationToken>,
}

impl CanonicalRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            options: RequestOptions::new(method.clone()),
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            signal: None,
        }
    }

    /// A `GET` to `url` with default options.
    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    /// Replaces the options, keeping their method in sync with the request's.
    pub fn with_options(mut self, mut options: RequestOptions) -> Self {
        options.method = self.method.clone();
        self.options = options;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// <https://fetch.spec.whatwg.org/#cors-safelisted-method>
pub fn is_cors_safelisted_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::POST)
}

/// <https://fetch.spec.whatwg.org/#cors-safelisted-request-header>
pub fn is_cors_safelisted_request_header(name: &HeaderName, value: &HeaderValue) -> bool {
    const MAX_VALUE_LEN: usize = 128;

    if value.len() > MAX_VALUE_LEN {
        return false;
    }

    match name.as_str() {
        "accept" | "accept-language" | "content-language" => true,
        "content-type" => {
            let Ok(value) = value.to_str() else {
                return false;
            };
            let essence = value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();

            matches!(
                essence.as_str(),
                "application/x-www-form-urlencoded" | "multipart/form-data" | "text/plain"
            )
        }
        _ => false,
    }
}

/// A cors request whose method or headers fall outside the safelists would need a preflight.
pub(crate) fn needs_preflight(method: &Method, headers: &HeaderMap) -> bool {
    !is_cors_safelisted_method(method)
        || headers
            .iter()
            .any(|(name, value)| !is_cors_safelisted_request_header(name, value))
}

/// <https://fetch.spec.whatwg.org/#origin-header>
///
/// Requests other than `GET` and `HEAD` carry the serialized `origin`, unless the referrer
/// policy of a non-cors request suppresses it.
pub(crate) fn append_origin_header(
    headers: &mut HeaderMap,
    options: &RequestOptions,
    origin: Option<&Origin>,
) -> Result<()> {
    if options.method == Method::GET || options.method == Method::HEAD {
        return Ok(());
    }

    let Some(origin) = origin else {
        return Ok(());
    };

    if options.mode != RequestMode::Cors {
        match options.referrer_policy {
            ReferrerPolicy::NoReferrer => return Ok(()),
            policy @ (ReferrerPolicy::NoReferrerWhenDowngrade
            | ReferrerPolicy::StrictOrigin
            | ReferrerPolicy::StrictOriginWhenCrossOrigin
            | ReferrerPolicy::SameOrigin) => {
                return Err(FetchError::UnimplementedReferrerPolicy(policy));
            }
            _ => {}
        }
    }

    let value = HeaderValue::from_str(&origin.ascii_serialization())
        .map_err(|error| TransportError::Request(error.into()))?;
    headers.insert(header::ORIGIN, value);

    Ok(())
}
