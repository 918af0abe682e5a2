use url::Url;

use crate::{
    error::{FetchError, Result},
    options::{RedirectMode, RequestOptions},
    response::ResponseType,
};

/// Redirects followed before a fetch gives up.
pub const MAX_REDIRECTS: usize = 20;

/// State a fetch accumulates while its redirect chain is followed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// At least one redirect was followed.
    pub redirected: bool,
    /// Replaces the response type derived from the request's tainting.
    pub response_type_override: Option<ResponseType>,
}

/// What the transport should do with a redirect response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectAction {
    /// Issue the next request to the redirect target.
    Follow,
    /// Stop and hand the redirect response back as the final one.
    UseLastResponse,
}

/// Decides whether a redirect to `target` may be followed.
///
/// `via` holds the URLs of every request already made in this fetch, oldest first, so its length
/// is the number of hops taken so far including the original request.
#[tracing::instrument(
    level = "debug",
    skip(options, context),
    fields(hops = via.len()),
    ret,
    err(level = "debug")
)]
pub fn check_redirect(
    options: &RequestOptions,
    context: &mut RequestContext,
    target: &Url,
    via: &[Url],
) -> Result<RedirectAction> {
    if via.len() > MAX_REDIRECTS {
        return Err(FetchError::TooManyRedirects);
    }

    if via.contains(target) {
        return Err(FetchError::RedirectLoop(target.clone()));
    }

    match options.redirect {
        RedirectMode::Error => Err(FetchError::RedirectNotAllowed(target.clone())),
        RedirectMode::Manual => {
            context.response_type_override = Some(ResponseType::OpaqueRedirect);
            Ok(RedirectAction::UseLastResponse)
        }
        RedirectMode::Follow => {
            context.redirected = true;
            Ok(RedirectAction::Follow)
        }
    }
}
