use crate::{cluster_info::ClusterInfo, endpoints_watcher::EndpointsWatcher, profile_index::ProfileIndex};
use destination_core::{EndpointsStream, ProfileStream, ResolveError, Resolver, ServiceId};
use std::sync::Arc;

/// The cluster's only [`Resolver`]: authorities of the form
/// `<service>.<namespace>.svc.<dns_zone>` (optionally with a trailing port
/// label, which is ignored — the port travels alongside the authority, not
/// inside it) resolve against the cluster-local endpoints and profile
/// indices.
pub struct ClusterLocalResolver {
    cluster: Arc<ClusterInfo>,
    endpoints: Arc<EndpointsWatcher>,
    profiles: Arc<ProfileIndex>,
}

impl ClusterLocalResolver {
    pub fn new(
        cluster: Arc<ClusterInfo>,
        endpoints: Arc<EndpointsWatcher>,
        profiles: Arc<ProfileIndex>,
    ) -> Self {
        Self {
            cluster,
            endpoints,
            profiles,
        }
    }

    /// Parses `<service>.<namespace>.svc.<dns_zone>` out of a request
    /// authority's host part. Any other suffix (including another cluster's
    /// zone) is left for another resolver in the chain, or for
    /// `resolve_endpoints`/`resolve_profile` to report as `Unresolvable`.
    fn parse(&self, host: &str) -> Option<ServiceId> {
        let suffix = format!(".svc.{}", self.cluster.dns_zone);
        let prefix = host.strip_suffix(&suffix)?;
        let mut labels = prefix.rsplitn(2, '.');
        let namespace = labels.next()?;
        let name = labels.next()?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(ServiceId::new(namespace, name))
    }
}

#[async_trait::async_trait]
impl Resolver for ClusterLocalResolver {
    fn can_resolve(&self, host: &str, _port: u16) -> Result<bool, ResolveError> {
        Ok(self.parse(host).is_some())
    }

    async fn stream_endpoints(&self, host: &str, port: u16) -> Result<EndpointsStream, ResolveError> {
        let id = self
            .parse(host)
            .ok_or_else(|| ResolveError::Unresolvable(host.to_string()))?;
        self.endpoints.subscribe_endpoints(id, port).ok_or_else(|| {
            ResolveError::Rejected(host.to_string(), "service is in the control namespace".to_string())
        })
    }

    async fn stream_profile(&self, host: &str, _port: u16) -> Result<ProfileStream, ResolveError> {
        let id = self
            .parse(host)
            .ok_or_else(|| ResolveError::Unresolvable(host.to_string()))?;
        if self.cluster.is_control_namespace(&id.namespace) {
            return Err(ResolveError::Rejected(
                host.to_string(),
                "service is in the control namespace".to_string(),
            ));
        }
        Ok(self.profiles.subscribe(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IndexMetrics;
    use prometheus_client::registry::Registry;

    fn cluster() -> Arc<ClusterInfo> {
        Arc::new(ClusterInfo::new("cluster.local", "linkerd", false).unwrap())
    }

    fn resolver() -> ClusterLocalResolver {
        let metrics = Arc::new(IndexMetrics::register(&mut Registry::default()));
        ClusterLocalResolver::new(
            cluster(),
            EndpointsWatcher::new(cluster(), metrics),
            Arc::new(ProfileIndex::new()),
        )
    }

    #[test]
    fn parses_well_formed_authority() {
        let r = resolver();
        let id = r.parse("web.emojivoto.svc.cluster.local").unwrap();
        assert_eq!(id.namespace, "emojivoto");
        assert_eq!(id.name, "web");
    }

    #[test]
    fn rejects_foreign_zone() {
        let r = resolver();
        assert!(r.parse("web.emojivoto.svc.other.zone").is_none());
        assert!(!r.can_resolve("web.emojivoto.svc.other.zone", 80).unwrap());
    }

    #[test]
    fn rejects_malformed_prefix() {
        let r = resolver();
        assert!(r.parse("svc.cluster.local").is_none());
    }
}
