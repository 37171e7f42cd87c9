#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Destination Service core.
//!
//! Leaf domain types and pure logic shared by the gRPC surface and the
//! Kubernetes-backed index: the address/endpoint model, address-set
//! diffing, and the profile translator. Nothing in this crate talks to
//! Kubernetes or to the network, which keeps it exercisable with plain
//! unit tests.

mod address;
mod error;
pub mod profile;
pub mod resolver;
pub mod retry;

pub use self::{
    address::{Address, AddressSet, ProtocolHint, ServiceId, ServicePortKey, WorkloadMetadata},
    error::{AuthorityError, ResolveError},
    resolver::{Resolver, ResolverChain},
};

use anyhow::Result;
use futures::prelude::*;
use std::{net::SocketAddr, pin::Pin};

/// An update pushed to a single endpoint subscriber.
///
/// Mirrors the wire `Update` oneof (`Add`/`Remove`/`NoEndpoints`). A fresh
/// subscription always observes either `NoEndpoints` or `Add` before any
/// other variant. `Remove` carries the full `(ip, port)` of each address
/// being withdrawn — it must match the address as it was `Add`ed, not just
/// its ip, or the proxy can never find the entry to remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointsUpdate {
    Add(Vec<Address>),
    Remove(Vec<SocketAddr>),
    NoEndpoints { exists: bool },
}

pub type EndpointsStream = Pin<Box<dyn Stream<Item = EndpointsUpdate> + Send + Sync + 'static>>;

/// Discovers and watches the address set backing a logical destination.
#[async_trait::async_trait]
pub trait DiscoverEndpoints<T> {
    async fn get_endpoints(&self, target: T) -> Result<Option<AddressSet>>;

    async fn watch_endpoints(&self, target: T) -> Result<Option<EndpointsStream>>;
}

/// Discovers and watches the routing profile for a logical destination.
#[async_trait::async_trait]
pub trait DiscoverProfile<T> {
    async fn get_profile(&self, target: T) -> Result<Option<profile::Profile>>;

    async fn watch_profile(&self, target: T) -> Result<Option<ProfileStream>>;
}

pub type ProfileStream = Pin<Box<dyn Stream<Item = profile::Profile> + Send + Sync + 'static>>;
