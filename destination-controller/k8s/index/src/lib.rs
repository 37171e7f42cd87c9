//! Destination Service index
//!
//! Watches the cluster's Services, Endpoints, Pods, and ServiceProfiles and
//! maintains the in-memory state the gRPC Destination Server reads from:
//! an [`EndpointsWatcher`] registry of `(Service, port)` address-set watches
//! and a [`ProfileIndex`] of translated routing profiles.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_info;
mod endpoints_watcher;
mod metrics;
mod pod_cache;
mod profile_index;
mod resolver;
mod service_port;
mod target;

pub use self::{
    cluster_info::ClusterInfo, endpoints_watcher::EndpointsWatcher, metrics::IndexMetrics,
    profile_index::ProfileIndex, resolver::ClusterLocalResolver,
};

use destination_k8s_api as k8s;
use std::sync::Arc;

/// The top-level `kubert` index: dispatches informer events for every
/// resource kind this service watches into the shared [`EndpointsWatcher`]
/// and [`ProfileIndex`].
///
/// Cheap to clone — every field is an `Arc` — so one `Index` can be handed
/// to `kubert::index::namespaced` once per watched resource kind while all
/// of them drive the same underlying state.
#[derive(Clone)]
pub struct Index {
    endpoints: Arc<EndpointsWatcher>,
    profiles: Arc<ProfileIndex>,
    metrics: Arc<IndexMetrics>,
}

impl Index {
    pub fn new(cluster: Arc<ClusterInfo>, metrics: Arc<IndexMetrics>) -> Self {
        Self {
            endpoints: EndpointsWatcher::new(cluster, metrics.clone()),
            profiles: Arc::new(ProfileIndex::new()),
            metrics,
        }
    }

    pub fn endpoints(&self) -> Arc<EndpointsWatcher> {
        self.endpoints.clone()
    }

    pub fn profiles(&self) -> Arc<ProfileIndex> {
        self.profiles.clone()
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, svc: k8s::Service) {
        self.metrics.observe_apply("service");
        self.endpoints.on_service_applied(svc);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.metrics.observe_delete("service");
        self.endpoints.on_service_deleted(namespace, name);
    }

    fn reset(&mut self, services: Vec<k8s::Service>, removed: kubert::index::NamespacedRemoved) {
        self.metrics.observe_reset("service");
        for svc in services {
            self.endpoints.on_service_applied(svc);
        }
        for (namespace, names) in removed {
            for name in names {
                self.endpoints.on_service_deleted(namespace.clone(), name);
            }
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Endpoints> for Index {
    fn apply(&mut self, ep: k8s::Endpoints) {
        self.metrics.observe_apply("endpoints");
        self.endpoints.on_endpoints_applied(ep);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.metrics.observe_delete("endpoints");
        self.endpoints.on_endpoints_deleted(namespace, name);
    }

    fn reset(&mut self, endpoints: Vec<k8s::Endpoints>, removed: kubert::index::NamespacedRemoved) {
        self.metrics.observe_reset("endpoints");
        for ep in endpoints {
            self.endpoints.on_endpoints_applied(ep);
        }
        for (namespace, names) in removed {
            for name in names {
                self.endpoints.on_endpoints_deleted(namespace.clone(), name);
            }
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, pod: k8s::Pod) {
        self.metrics.observe_apply("pod");
        self.endpoints.on_pod_applied(pod);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.metrics.observe_delete("pod");
        self.endpoints.on_pod_deleted(namespace, name);
    }

    fn reset(&mut self, pods: Vec<k8s::Pod>, _removed: kubert::index::NamespacedRemoved) {
        self.metrics.observe_reset("pod");
        self.endpoints.on_pods_reset(pods);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::profile::ServiceProfile> for Index {
    fn apply(&mut self, profile: k8s::profile::ServiceProfile) {
        self.metrics.observe_apply("serviceprofile");
        let Some(id) = profile_index::profile_service_id(&profile) else {
            return;
        };
        let doc = profile_index::document_of(&profile.spec);
        self.profiles.apply(id, &doc);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.metrics.observe_delete("serviceprofile");
        let id = destination_core::ServiceId::new(namespace, name);
        self.profiles.delete(&id);
    }

    fn reset(
        &mut self,
        profiles: Vec<k8s::profile::ServiceProfile>,
        removed: kubert::index::NamespacedRemoved,
    ) {
        self.metrics.observe_reset("serviceprofile");
        for profile in profiles {
            self.apply(profile);
        }
        for (namespace, names) in removed {
            for name in names {
                self.profiles
                    .delete(&destination_core::ServiceId::new(namespace.clone(), name));
            }
        }
    }
}
