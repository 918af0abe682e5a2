//! <https://fetch.spec.whatwg.org/#cors-check>

use http::{header, HeaderMap};
use url::Origin;

use crate::{
    error::CorsError,
    options::{CredentialsMode, RequestOptions},
};

/// Checks a response to a cors-tainted request against the requesting `origin`.
///
/// `None` and opaque origins serialize to `null` and never pass a non-wildcard check.
pub fn cors_check(
    options: &RequestOptions,
    origin: Option<&Origin>,
    headers: &HeaderMap,
) -> Result<(), CorsError> {
    let allow_origin = headers
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .ok_or(CorsError::MissingAllowOrigin)?;
    let allow_origin = String::from_utf8_lossy(allow_origin.as_bytes());

    if options.credentials != CredentialsMode::Include && allow_origin == "*" {
        return Ok(());
    }

    let Some(origin) = origin.filter(|origin| origin.is_tuple()) else {
        return Err(CorsError::NullOrigin(allow_origin.into_owned()));
    };

    let expected = origin.ascii_serialization();
    if allow_origin != expected {
        return Err(CorsError::OriginMismatch {
            expected,
            received: allow_origin.into_owned(),
        });
    }

    if options.credentials != CredentialsMode::Include {
        return Ok(());
    }

    match headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS) {
        Some(value) if value.as_bytes() == b"true" => Ok(()),
        _ => Err(CorsError::MissingAllowCredentials),
    }
}
