//! Response filtering, see <https://fetch.spec.whatwg.org/#concept-filtered-response>.

use bytes::Bytes;
use http::{
    header::{self, HeaderName},
    HeaderMap, Method,
};

use crate::{
    options::{CredentialsMode, RequestOptions},
    redirect::RequestContext,
    response::{CanonicalResponse, FilteredResponse, ResponseType},
};

/// <https://fetch.spec.whatwg.org/#forbidden-response-header-name>
const FORBIDDEN_RESPONSE_HEADERS: [&str; 2] = ["set-cookie", "set-cookie2"];

/// <https://fetch.spec.whatwg.org/#cors-safelisted-response-header-name>
const CORS_SAFELISTED_RESPONSE_HEADERS: [&str; 7] = [
    "cache-control",
    "content-language",
    "content-length",
    "content-type",
    "expires",
    "last-modified",
    "pragma",
];

/// <https://fetch.spec.whatwg.org/#null-body-status>
const NULL_BODY_STATUSES: [u16; 5] = [101, 103, 204, 205, 304];

fn is_forbidden(name: &HeaderName) -> bool {
    FORBIDDEN_RESPONSE_HEADERS.contains(&name.as_str())
}

/// Values of a comma separated list header, lowercased.
fn header_list(headers: &HeaderMap, name: HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Turns the raw response into the form the caller is allowed to observe.
pub struct ResponseFilter;

impl ResponseFilter {
    /// Picks the filter from the context's override, or else from the request's tainting.
    #[tracing::instrument(level = "trace", skip_all, ret)]
    pub fn apply(
        options: &RequestOptions,
        context: &RequestContext,
        internal: CanonicalResponse,
    ) -> FilteredResponse {
        let response_type = context
            .response_type_override
            .unwrap_or_else(|| options.response_tainting.into());

        let mut response = internal.clone();
        response.response_type = response_type;

        match response_type {
            ResponseType::Basic => {
                response.headers = Self::basic_headers(&internal.headers);
            }
            ResponseType::Cors => {
                response.headers = Self::cors_headers(&internal.headers, options.credentials);
            }
            ResponseType::Opaque | ResponseType::OpaqueRedirect => {
                response.status = 0;
                response.status_text.clear();
                response.headers.clear();
                response.body = Bytes::new();
            }
            ResponseType::Default | ResponseType::Error => {}
        }

        if options.method == Method::HEAD
            || options.method == Method::CONNECT
            || NULL_BODY_STATUSES.contains(&internal.status)
        {
            response.body = Bytes::new();
        }

        FilteredResponse::new(response, internal)
    }

    fn basic_headers(headers: &HeaderMap) -> HeaderMap {
        let mut filtered = headers.clone();
        for name in FORBIDDEN_RESPONSE_HEADERS {
            filtered.remove(name);
        }
        filtered
    }

    fn cors_headers(headers: &HeaderMap, credentials: CredentialsMode) -> HeaderMap {
        let exposed = header_list(headers, header::ACCESS_CONTROL_EXPOSE_HEADERS);
        let expose_all =
            credentials != CredentialsMode::Include && exposed.iter().any(|name| name == "*");

        let mut filtered = HeaderMap::new();
        for (name, value) in headers {
            let visible = !is_forbidden(name)
                && (expose_all
                    || CORS_SAFELISTED_RESPONSE_HEADERS.contains(&name.as_str())
                    || exposed.iter().any(|exposed| exposed == name.as_str()));

            if visible {
                filtered.append(name.clone(), value.clone());
            }
        }
        filtered
    }
}
