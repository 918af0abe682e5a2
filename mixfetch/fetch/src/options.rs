//! Per-request fetch options, using the string values of the fetch standard.

use std::{fmt, str::FromStr};

use http::Method;
use url::Url;

use crate::error::{FetchError, Result};

/// Declares a fieldless enum whose variants map one-to-one onto fetch standard strings.
///
/// Generates `as_str`, [`fmt::Display`], [`FromStr`] (failing with
/// [`FetchError::InvalidOption`] named after `$field`) and [`Default`].
macro_rules! fetch_enum {
    (
        $(#[$meta: meta])*
        $name: ident ($field: literal, default = $default: ident) {
            $($(#[$variant_meta: meta])* $variant: ident => $value: literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$variant_meta])* $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = FetchError;

            fn from_str(value: &str) -> Result<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(FetchError::InvalidOption {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }
    };
}

fetch_enum! {
    /// <https://fetch.spec.whatwg.org/#concept-request-redirect-mode>
    RedirectMode("redirect", default = Follow) {
        Follow => "follow",
        Error => "error",
        Manual => "manual",
    }
}

fetch_enum! {
    /// <https://fetch.spec.whatwg.org/#concept-request-mode>
    RequestMode("mode", default = NoCors) {
        Cors => "cors",
        SameOrigin => "same-origin",
        NoCors => "no-cors",
        Navigate => "navigate",
        Websocket => "websocket",
        /// Skips every CORS rule. Not part of the fetch standard.
        UnsafeIgnoreCors => "unsafe-ignore-cors",
    }
}

impl RequestMode {
    /// `navigate` and `websocket` requests cannot be made over the mixnet.
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Navigate | Self::Websocket)
    }
}

fetch_enum! {
    /// <https://fetch.spec.whatwg.org/#concept-request-credentials-mode>
    CredentialsMode("credentials", default = SameOrigin) {
        Omit => "omit",
        SameOrigin => "same-origin",
        Include => "include",
    }
}

fetch_enum! {
    /// <https://fetch.spec.whatwg.org/#concept-request-response-tainting>
    ResponseTainting("responseTainting", default = Basic) {
        Basic => "basic",
        Cors => "cors",
        Opaque => "opaque",
        UnsafeIgnoreCors => "unsafe-ignore-cors",
    }
}

fetch_enum! {
    /// <https://w3c.github.io/webappsec-referrer-policy/#referrer-policies>
    ReferrerPolicy("referrerPolicy", default = Unset) {
        Unset => "",
        NoReferrer => "no-referrer",
        NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
        Origin => "origin",
        OriginWhenCrossOrigin => "origin-when-cross-origin",
        SameOrigin => "same-origin",
        StrictOrigin => "strict-origin",
        StrictOriginWhenCrossOrigin => "strict-origin-when-cross-origin",
        UnsafeUrl => "unsafe-url",
    }
}

/// <https://fetch.spec.whatwg.org/#concept-request-referrer>
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Referrer {
    NoReferrer,
    #[default]
    Client,
    Url(Url),
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReferrer => f.write_str("no-referrer"),
            Self::Client => f.write_str("client"),
            Self::Url(url) => f.write_str(url.as_str()),
        }
    }
}

impl FromStr for Referrer {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "no-referrer" => Ok(Self::NoReferrer),
            "client" => Ok(Self::Client),
            url => Url::parse(url)
                .map(Self::Url)
                .map_err(|_| FetchError::InvalidOption {
                    field: "referrer",
                    value: url.to_string(),
                }),
        }
    }
}

/// Raw option strings as handed over by the embedding environment.
///
/// [`None`] means the attribute was not set on the request.
#[derive(Clone, Debug, Default)]
pub struct RequestInit {
    pub redirect: Option<String>,
    pub mode: Option<String>,
    pub credentials: Option<String>,
    pub referrer: Option<String>,
    pub referrer_policy: Option<String>,
    /// Accepted but ignored, every request bypasses caches.
    pub cache: Option<String>,
}

/// Options of one fetch.
///
/// Everything except [`RequestOptions::response_tainting`] is fixed once the fetch starts, the
/// tainting is decided by the main fetch checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    pub redirect: RedirectMode,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
    pub referrer: Referrer,
    pub referrer_policy: ReferrerPolicy,
    pub response_tainting: ResponseTainting,
    pub method: Method,
}

impl RequestOptions {
    /// Options with every attribute at its fetch standard default.
    pub fn new(method: Method) -> Self {
        Self {
            redirect: Default::default(),
            mode: Default::default(),
            credentials: Default::default(),
            referrer: Default::default(),
            referrer_policy: Default::default(),
            response_tainting: Default::default(),
            method,
        }
    }

    /// Validates the raw attributes, applying defaults for the missing ones.
    ///
    /// With `unsafe_ignore_cors` the requested mode is ignored and
    /// [`RequestMode::UnsafeIgnoreCors`] is used instead.
    pub fn from_init(
        method: Method,
        init: &RequestInit,
        unsafe_ignore_cors: bool,
    ) -> Result<Self> {
        fn parse<T: FromStr<Err = FetchError> + Default>(value: Option<&String>) -> Result<T> {
            value.map(|value| value.parse()).unwrap_or(Ok(T::default()))
        }

        let mode = if unsafe_ignore_cors {
            RequestMode::UnsafeIgnoreCors
        } else {
            parse(init.mode.as_ref())?
        };
        if !mode.is_supported() {
            return Err(FetchError::UnsupportedMode(mode));
        }

        if let Some(cache) = &init.cache {
            tracing::warn!(%cache, "The `cache` attribute is set on a request, it is ignored.");
        }

        Ok(Self {
            redirect: parse(init.redirect.as_ref())?,
            mode,
            credentials: parse(init.credentials.as_ref())?,
            referrer: parse(init.referrer.as_ref())?,
            referrer_policy: parse(init.referrer_policy.as_ref())?,
            response_tainting: ResponseTainting::Basic,
            method,
        })
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_referrer_policy(mut self, referrer_policy: ReferrerPolicy) -> Self {
        self.referrer_policy = referrer_policy;
        self
    }
}

impl fmt::Display for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ redirect: {}, mode: {}, credentials: {}, referrerPolicy: {}, referrer: {}, responseTainting: {}, method: {} }}",
            self.redirect,
            self.mode,
            self.credentials,
            self.referrer_policy,
            self.referrer,
            self.response_tainting,
            self.method,
        )
    }
}
