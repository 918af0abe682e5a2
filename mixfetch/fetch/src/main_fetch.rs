//! The pre-dispatch part of <https://fetch.spec.whatwg.org/#main-fetch>.

use http::{HeaderMap, Method};
use url::{Origin, Url};

use crate::{
    error::{FetchError, Result},
    options::{RedirectMode, RequestMode, RequestOptions, ResponseTainting},
    request::needs_preflight,
};

/// Decides the response tainting of a request, or rejects it before anything is sent.
///
/// Only [`RequestOptions::response_tainting`] is written.
#[tracing::instrument(
    level = "trace",
    skip(headers, options),
    fields(mode = %options.mode),
    err(level = "debug")
)]
pub(crate) fn main_fetch_checks(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    options: &mut RequestOptions,
    origin: Option<&Origin>,
) -> Result<()> {
    if options.mode == RequestMode::UnsafeIgnoreCors {
        options.response_tainting = ResponseTainting::UnsafeIgnoreCors;
        return Ok(());
    }

    let same_origin = origin.is_some_and(|origin| *origin == url.origin());

    if (same_origin && options.response_tainting == ResponseTainting::Basic)
        || url.scheme() == "data"
        || matches!(options.mode, RequestMode::Navigate | RequestMode::Websocket)
    {
        options.response_tainting = ResponseTainting::Basic;
        return Ok(());
    }

    match options.mode {
        RequestMode::SameOrigin => Err(FetchError::CrossOrigin(url.clone())),
        RequestMode::NoCors => {
            if options.redirect != RedirectMode::Follow {
                return Err(FetchError::NoCorsRedirect(options.redirect));
            }
            options.response_tainting = ResponseTainting::Opaque;
            Ok(())
        }
        _ => {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(FetchError::SchemeNotAllowed(url.scheme().to_string()));
            }
            if needs_preflight(method, headers) {
                return Err(FetchError::NotImplemented("CORS preflight"));
            }
            options.response_tainting = ResponseTainting::Cors;
            Ok(())
        }
    }
}
