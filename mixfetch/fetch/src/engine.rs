use std::sync::Arc;

use mixfetch_transport::{ConnectionRegistry, MixnetService};
use rustls::ClientConfig;
use tracing::Level;
use url::Origin;

use crate::{
    adapter::{HopRequest, TransportAdapter},
    config::MixFetchConfig,
    cors::cors_check,
    error::{FetchError, Result, SetupError},
    filter::ResponseFilter,
    main_fetch::main_fetch_checks,
    options::{RequestMode, ResponseTainting},
    redirect::{check_redirect, RequestContext},
    request::{append_origin_header, CanonicalRequest},
    response::FilteredResponse,
    tls,
};

/// Runs fetches over the mixnet.
///
/// Concurrent fetches on one engine only contend on the [`ConnectionRegistry`].
pub struct FetchEngine {
    adapter: TransportAdapter,
    origin: Option<Origin>,
    unsafe_ignore_cors: bool,
}

impl FetchEngine {
    /// Builds an engine trusting the roots named by [`MixFetchConfig::trust_roots`].
    pub fn new(
        config: &MixFetchConfig,
        registry: Arc<ConnectionRegistry>,
        mixnet: Arc<dyn MixnetService>,
    ) -> Result<Self, SetupError> {
        let tls_config = tls::client_config(config.trust_roots.as_deref())?;
        Self::with_tls_config(config, registry, mixnet, tls_config)
    }

    /// Like [`Self::new`], with a ready TLS client config.
    pub fn with_tls_config(
        config: &MixFetchConfig,
        registry: Arc<ConnectionRegistry>,
        mixnet: Arc<dyn MixnetService>,
        tls_config: Arc<ClientConfig>,
    ) -> Result<Self, SetupError> {
        let origin = config.parsed_origin()?;

        tracing::debug!(?origin, ?config, "Created a fetch engine.");

        Ok(Self {
            adapter: TransportAdapter::new(
                registry,
                mixnet,
                tls_config,
                config.request_timeout(),
                config.connection_shutdown_timeout(),
            ),
            origin,
            unsafe_ignore_cors: config.unsafe_ignore_cors,
        })
    }

    /// Where the host delivers inbound bytes, remote closes and remote errors.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.adapter.registry()
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Fetches `request`, returning its response filtered the way the request's mode demands.
    ///
    /// Policy checks run before anything is sent. The exchange is bounded by the request timeout
    /// and ends early with [`FetchError::Aborted`] when the request's signal fires, either way
    /// its virtual connection is torn down.
    #[tracing::instrument(
        level = Level::DEBUG,
        skip_all,
        fields(method = %request.method, url = %request.url),
        err(level = Level::WARN)
    )]
    pub async fn fetch(&self, request: CanonicalRequest) -> Result<FilteredResponse> {
        let CanonicalRequest {
            method,
            url,
            mut headers,
            body,
            mut options,
            signal,
        } = request;

        options.method = method.clone();
        if self.unsafe_ignore_cors {
            options.mode = RequestMode::UnsafeIgnoreCors;
        }
        if !options.mode.is_supported() {
            return Err(FetchError::UnsupportedMode(options.mode));
        }

        main_fetch_checks(&method, &url, &headers, &mut options, self.origin.as_ref())?;
        append_origin_header(&mut headers, &options, self.origin.as_ref())?;

        tracing::debug!(%options, "Dispatching a fetch.");

        let mut context = RequestContext::default();
        let dispatch = self.adapter.execute(
            HopRequest {
                method,
                url,
                headers,
                body,
            },
            |target, via| check_redirect(&options, &mut context, target, via),
        );

        let mut response = match signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => return Err(FetchError::Aborted),
                    response = dispatch => response?,
                }
            }
            None => dispatch.await?,
        };
        response.redirected = context.redirected;

        if options.response_tainting == ResponseTainting::Cors
            && context.response_type_override.is_none()
        {
            cors_check(&options, self.origin.as_ref(), &response.headers)?;
        }

        let filtered = ResponseFilter::apply(&options, &context, response);
        tracing::debug!(
            status = filtered.status,
            response_type = %filtered.response_type,
            redirected = filtered.redirected,
            "Fetch finished."
        );

        Ok(filtered)
    }
}
