//! Browser-style `fetch` over a mixnet.
//!
//! [`FetchEngine::fetch`] applies the fetch standard's request policy (modes, CORS, redirects,
//! response filtering) and runs the HTTP/1.1 exchange, with TLS for `https`, over
//! [`VirtualSocket`](mixfetch_transport::VirtualSocket)s instead of TCP. Bytes only ever leave
//! through the host's [`MixnetService`](mixfetch_transport::MixnetService), and come back
//! through the engine's [`ConnectionRegistry`](mixfetch_transport::ConnectionRegistry).
#![warn(clippy::indexing_slicing)]

pub mod adapter;
pub mod config;
pub mod cors;
pub mod engine;
pub mod error;
pub mod filter;
mod main_fetch;
pub mod options;
pub mod redirect;
pub mod request;
pub mod response;
pub mod tls;

#[cfg(test)]
mod testing;

pub use config::MixFetchConfig;
pub use engine::FetchEngine;
pub use error::{FetchError, FetchErrorKind, Result, SetupError};
pub use options::{RequestInit, RequestOptions};
pub use request::CanonicalRequest;
pub use response::{CanonicalResponse, FilteredResponse, ResponseType};
