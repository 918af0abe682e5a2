//! Virtual stream sockets carried over a mixnet.
//!
//! A [`VirtualSocket`] looks like a connected TCP stream to whoever reads and writes it, but
//! never touches the network. Outbound bytes are handed to the host's [`MixnetService`], and
//! the host pushes inbound bytes, closure and errors back through the [`ConnectionRegistry`],
//! keyed by the [`RequestId`] it allocated for the connection.
#![warn(clippy::indexing_slicing)]

pub mod address;
pub mod error;
pub mod mixnet;
pub mod registry;
pub mod socket;
#[cfg(test)]
mod testing;

pub use address::CanonicalAddress;
pub use error::{AddressError, MixnetError, RegistryError};
pub use mixnet::{MixnetService, RequestId};
pub use registry::ConnectionRegistry;
pub use socket::VirtualSocket;
