use crate::{
    cluster_info::ClusterInfo,
    metrics::IndexMetrics,
    pod_cache::PodCache,
    service_port::{self, ServicePort},
};
use ahash::AHashMap as HashMap;
use destination_core::{AddressSet, EndpointsStream, EndpointsUpdate, ServiceId, ServicePortKey};
use destination_k8s_api::{self as k8s, ResourceExt};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One Service's cached port specs, kept so that a freshly-subscribed or
/// newly-created `ServicePort` can initialize without waiting for another
/// Service event (§4.5).
#[derive(Clone, Debug, Default)]
struct ServiceSnapshot {
    exists: bool,
    ports: Vec<k8s::ServicePort>,
}

/// Cluster-wide registry of `(Service, port)` watches (§4.5).
///
/// The top-level map uses a read/write lock: reads (dispatch, subscribe)
/// take the read side except when inserting a new entry; each
/// `ServicePort`'s internal state has its own lock so that no subscriber
/// send is ever made while holding the map lock (§5).
pub struct EndpointsWatcher {
    cluster: Arc<ClusterInfo>,
    metrics: Arc<IndexMetrics>,
    registry: RwLock<HashMap<ServicePortKey, Arc<Mutex<ServicePort>>>>,
    services: RwLock<HashMap<ServiceId, ServiceSnapshot>>,
    endpoints: RwLock<HashMap<ServiceId, k8s::Endpoints>>,
    pods: RwLock<PodCache>,
}

impl EndpointsWatcher {
    pub fn new(cluster: Arc<ClusterInfo>, metrics: Arc<IndexMetrics>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            metrics,
            registry: RwLock::new(HashMap::default()),
            services: RwLock::new(HashMap::default()),
            endpoints: RwLock::new(HashMap::default()),
            pods: RwLock::new(PodCache::default()),
        })
    }

    /// Reads the current address set for `key` without creating a
    /// subscription, for the server's non-streaming `Get` equivalent and for
    /// tests. Returns `None` if the Service has never been observed.
    pub fn current(&self, key: &ServicePortKey) -> Option<AddressSet> {
        let registry = self.registry.read();
        registry.get(key).map(|sp| sp.lock().current_addresses())
    }

    /// Subscribes to `(service, port)`, creating the `ServicePort` entry (and
    /// seeding it from any already-observed Service/Endpoints) if this is
    /// the first subscriber (§4.5).
    ///
    /// Returns `None` if `service`'s namespace is the orchestrator's control
    /// namespace, which is never watched (§4.5, redesign note b — and its
    /// ExternalName carve-out is honored inside `ServicePort::update_service`
    /// via the `exists` flag the caller computes from the Service's type).
    pub fn subscribe_endpoints(
        self: &Arc<Self>,
        service: ServiceId,
        port: u16,
    ) -> Option<EndpointsStream> {
        if self.cluster.is_control_namespace(&service.namespace) {
            return None;
        }
        let key = ServicePortKey::new(service, port);
        let entry = {
            let mut registry = self.registry.write();
            let is_new = !registry.contains_key(&key);
            let entry = registry
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ServicePort::new(key.clone()))))
                .clone();
            if is_new {
                self.metrics.set_watched_service_ports(registry.len() as i64);
            }
            entry
        };

        let id = service_port::next_subscriber_id();
        let (tx, rx) = mpsc::channel(256);
        {
            let services = self.services.read();
            let endpoints = self.endpoints.read();
            let pods = self.pods.read();
            let mut sp = entry.lock();
            if sp.subscriber_count() == 0 {
                // First subscriber: seed from whatever we've already
                // observed, so `subscribe` below doesn't hand back a bare
                // NoEndpoints{false} for a Service that actually exists.
                if let Some(snapshot) = services.get(&key.service) {
                    sp.update_service(
                        &snapshot.ports,
                        snapshot.exists,
                        endpoints.get(&key.service),
                        &pods,
                    );
                }
            }
            sp.subscribe(id, tx);
        }
        self.metrics.subscribed();

        let watcher = self.clone();
        let key_for_drop = key;
        Some(Box::pin(SubscriptionStream {
            inner: ReceiverStream::new(rx),
            cleanup: Some(DropUnsubscribe {
                watcher,
                key: key_for_drop,
                id,
            }),
        }))
    }

    fn unsubscribe_endpoints(&self, key: &ServicePortKey, id: u64) {
        // Hold the write lock across the read-modify-maybe-remove sequence
        // so a concurrent subscribe can't land between "count reached zero"
        // and "entry removed" without being observed (§4.5).
        let mut registry = self.registry.write();
        let Some(entry) = registry.get(key).cloned() else {
            return;
        };
        let (removed, remaining) = {
            let mut sp = entry.lock();
            sp.unsubscribe(id)
        };
        if removed {
            self.metrics.unsubscribed();
        }
        if remaining == 0 {
            registry.remove(key);
            self.metrics.set_watched_service_ports(registry.len() as i64);
        }
    }

    pub(crate) fn on_service_applied(&self, svc: k8s::Service) {
        let Some(namespace) = svc.namespace() else {
            return;
        };
        if self.cluster.is_control_namespace(&namespace) {
            return;
        }
        let id = ServiceId::new(namespace, svc.name_unchecked());
        let spec = svc.spec.unwrap_or_default();
        // ExternalName services have no cluster-assigned endpoints; the
        // proxy-facing contract treats them as non-existent (§9 open
        // question b). A headless Service (`clusterIP: None`) is likewise
        // treated as non-existent unless the operator opts into resolving
        // it straight from its per-pod Endpoints.
        let is_external_name = spec.type_.as_deref() == Some("ExternalName");
        let is_headless = spec.cluster_ip.as_deref() == Some("None");
        let exists = !is_external_name && (!is_headless || self.cluster.enable_headless_services);
        let ports = spec.ports.unwrap_or_default();

        self.services.write().insert(
            id.clone(),
            ServiceSnapshot {
                exists,
                ports: ports.clone(),
            },
        );

        self.for_each_port(&id, |sp, endpoints, pods| {
            sp.update_service(&ports, exists, endpoints, pods);
        });
    }

    pub(crate) fn on_service_deleted(&self, namespace: String, name: String) {
        let id = ServiceId::new(namespace, name);
        self.services.write().remove(&id);
        self.for_each_port(&id, |sp, _endpoints, pods| {
            sp.update_service(&[], false, None, pods);
        });
    }

    pub(crate) fn on_endpoints_applied(&self, ep: k8s::Endpoints) {
        let Some(namespace) = ep.namespace() else {
            return;
        };
        if self.cluster.is_control_namespace(&namespace) {
            return;
        }
        let id = ServiceId::new(namespace, ep.name_unchecked());
        self.endpoints.write().insert(id.clone(), ep.clone());

        let pods = self.pods.read();
        self.for_each_port_locked(&id, |sp| sp.update_endpoints(&ep, &pods));
    }

    pub(crate) fn on_endpoints_deleted(&self, namespace: String, name: String) {
        let id = ServiceId::new(namespace, name);
        self.endpoints.write().remove(&id);
        self.for_each_port(&id, |sp, _endpoints, _pods| sp.delete_endpoints());
    }

    pub(crate) fn on_pod_applied(&self, pod: k8s::Pod) {
        self.pods.write().apply(pod);
    }

    pub(crate) fn on_pod_deleted(&self, namespace: String, name: String) {
        self.pods.write().delete(namespace, name);
    }

    pub(crate) fn on_pods_reset(&self, pods: Vec<k8s::Pod>) {
        self.pods.write().reset(pods);
    }

    /// Applies `f` to every `ServicePort` registered for `id`, supplying the
    /// latest cached Endpoints snapshot and the Pod cache. Used by Service
    /// events, which may need to recompute addresses against unchanged
    /// Endpoints.
    fn for_each_port(
        &self,
        id: &ServiceId,
        f: impl Fn(&mut ServicePort, Option<&k8s::Endpoints>, &PodCache),
    ) {
        let endpoints = self.endpoints.read();
        let pods = self.pods.read();
        let registry = self.registry.read();
        for (key, sp) in registry.iter() {
            if &key.service == id {
                f(&mut sp.lock(), endpoints.get(id), &pods);
            }
        }
    }

    fn for_each_port_locked(&self, id: &ServiceId, f: impl Fn(&mut ServicePort)) {
        let registry = self.registry.read();
        for (key, sp) in registry.iter() {
            if &key.service == id {
                f(&mut sp.lock());
            }
        }
    }
}

/// A subscription's stream, paired with a drop guard that unsubscribes it
/// from its `ServicePort` as soon as the RPC stream is torn down — whether
/// by client disconnect, server error, or process shutdown (§5
/// cancellation).
struct SubscriptionStream {
    inner: ReceiverStream<EndpointsUpdate>,
    cleanup: Option<DropUnsubscribe>,
}

impl Stream for SubscriptionStream {
    type Item = EndpointsUpdate;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_next(cx)
    }
}

struct DropUnsubscribe {
    watcher: Arc<EndpointsWatcher>,
    key: ServicePortKey,
    id: u64,
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.watcher.unsubscribe_endpoints(&cleanup.key, cleanup.id);
        }
    }
}
