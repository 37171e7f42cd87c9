use crate::{error::ResolveError, EndpointsStream, ProfileStream};
use std::sync::Arc;

/// A capability that decides, for a given `(host, port)` authority, whether
/// and how it resolves.
///
/// The server holds an ordered, immutable list of resolvers and picks the
/// first whose [`Resolver::can_resolve`] accepts the authority. Streaming
/// methods are only ever called on a resolver that has already accepted
/// the authority.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Reports whether this resolver claims `(host, port)`. An `Err` here
    /// aborts stream setup for the whole chain, not just this resolver.
    fn can_resolve(&self, host: &str, port: u16) -> Result<bool, ResolveError>;

    async fn stream_endpoints(&self, host: &str, port: u16) -> Result<EndpointsStream, ResolveError>;

    async fn stream_profile(&self, host: &str, port: u16) -> Result<ProfileStream, ResolveError>;

    /// Releases any resources held for the lifetime of the process. Most
    /// resolvers have nothing to release.
    fn stop(&self) {}
}

pub type ResolverChain = Vec<Arc<dyn Resolver>>;

/// Picks the first resolver in `chain` that claims `(host, port)` and opens
/// an endpoints stream through it.
pub async fn resolve_endpoints(
    chain: &[Arc<dyn Resolver>],
    host: &str,
    port: u16,
) -> Result<EndpointsStream, ResolveError> {
    let resolver = select(chain, host, port)?;
    resolver.stream_endpoints(host, port).await
}

/// Picks the first resolver in `chain` that claims `(host, port)` and opens
/// a profile stream through it.
pub async fn resolve_profile(
    chain: &[Arc<dyn Resolver>],
    host: &str,
    port: u16,
) -> Result<ProfileStream, ResolveError> {
    let resolver = select(chain, host, port)?;
    resolver.stream_profile(host, port).await
}

fn select<'c>(
    chain: &'c [Arc<dyn Resolver>],
    host: &str,
    port: u16,
) -> Result<&'c Arc<dyn Resolver>, ResolveError> {
    for resolver in chain {
        if resolver.can_resolve(host, port)? {
            return Ok(resolver);
        }
    }
    Err(ResolveError::Unresolvable(format!("{host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointsUpdate;
    use futures::stream;

    struct Accepts(&'static str);

    #[async_trait::async_trait]
    impl Resolver for Accepts {
        fn can_resolve(&self, host: &str, _port: u16) -> Result<bool, ResolveError> {
            Ok(host.ends_with(self.0))
        }

        async fn stream_endpoints(
            &self,
            _host: &str,
            _port: u16,
        ) -> Result<EndpointsStream, ResolveError> {
            Ok(Box::pin(stream::once(async {
                EndpointsUpdate::NoEndpoints { exists: false }
            })))
        }

        async fn stream_profile(
            &self,
            _host: &str,
            _port: u16,
        ) -> Result<ProfileStream, ResolveError> {
            Ok(Box::pin(stream::empty()))
        }
    }

    #[tokio::test]
    async fn first_match_wins() {
        let chain: ResolverChain = vec![Arc::new(Accepts(".cluster.local")), Arc::new(Accepts(""))];
        assert!(resolve_endpoints(&chain, "svc.ns.svc.cluster.local", 80)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn no_match_is_unresolvable() {
        let chain: ResolverChain = vec![Arc::new(Accepts(".cluster.local"))];
        let err = resolve_endpoints(&chain, "example.com", 80).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable(_)));
    }
}
