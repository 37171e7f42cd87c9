use crate::{
    pod_cache::PodCache,
    target::{self, Target},
};
use destination_core::{diff, Address, AddressSet, EndpointsUpdate, ServicePortKey, WorkloadMetadata};
use destination_k8s_api as k8s;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Bound on each subscriber's outbox. A subscriber that can't keep up
/// is dropped rather than allowed to stall its `ServicePort`'s other
/// subscribers.
const OUTBOX_CAPACITY: usize = 128;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// A live subscriber's identity plus its outbox.
///
/// `id` gives `unsubscribe` an identity to match on that doesn't require
/// `mpsc::Sender` to implement equality.
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<EndpointsUpdate>,
}

/// A fresh, process-unique subscriber id, handed back to the caller so it
/// can later ask to be removed by identity.
pub(crate) fn next_subscriber_id() -> u64 {
    NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed)
}

/// The mutable state of one `(Service, port)` watch.
///
/// Owned exclusively by the registry; mutated under the registry's
/// per-entry lock. A `ServicePort` never blocks: subscriber sends are
/// non-blocking `try_send`s against a bounded outbox, so one slow
/// subscriber can never stall the others or the dispatching thread.
pub(crate) struct ServicePort {
    key: ServicePortKey,
    target: Target,
    exists: bool,
    addresses: AddressSet,
    /// Whether the most recently broadcast state was "no endpoints" of any
    /// kind. A transition back to having endpoints must be reported as a
    /// fresh full snapshot, never a diff.
    reported_empty: bool,
    subscribers: Vec<Subscriber>,
}

impl ServicePort {
    pub(crate) fn new(key: ServicePortKey) -> Self {
        Self {
            key,
            target: Target::Number(0),
            exists: false,
            addresses: AddressSet::new(),
            reported_empty: true,
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn current_addresses(&self) -> AddressSet {
        self.addresses.clone()
    }

    /// Registers `tx` and immediately sends it exactly one message
    /// describing current state. Must run under the port's lock so
    /// no intervening broadcast can land between registration and this
    /// send.
    pub(crate) fn subscribe(&mut self, id: u64, tx: mpsc::Sender<EndpointsUpdate>) {
        let initial = if !self.exists {
            EndpointsUpdate::NoEndpoints { exists: false }
        } else if self.addresses.is_empty() {
            EndpointsUpdate::NoEndpoints { exists: true }
        } else {
            EndpointsUpdate::Add(self.addresses.iter().collect())
        };
        let _ = tx.try_send(initial);
        self.subscribers.push(Subscriber { id, tx });
    }

    /// Removes a subscriber by identity. Idempotent: a repeat call (or one
    /// racing a subscriber that already overflowed its outbox) reports
    /// `removed=false` rather than erroring.
    pub(crate) fn unsubscribe(&mut self, id: u64) -> (bool, u32) {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        let removed = self.subscribers.len() < before;
        (removed, self.subscribers.len() as u32)
    }

    /// Terminal: drops every subscriber's outbox, ending their streams. The
    /// `ServicePort` is not reused after this.
    pub(crate) fn unsubscribe_all(&mut self) {
        self.subscribers.clear();
    }

    /// Recomputes target-port resolution from a Service's port specs and,
    /// if it changed, recomputes the address set from the last-known
    /// Endpoints snapshot and fans out.
    pub(crate) fn update_service(
        &mut self,
        ports: &[k8s::ServicePort],
        exists: bool,
        endpoints: Option<&k8s::Endpoints>,
        pods: &PodCache,
    ) {
        let prev_exists = self.exists;
        let new_target = target::resolve(ports, self.key.port);
        let target_changed = new_target != self.target;
        self.target = new_target;
        self.exists = exists;

        if !exists {
            self.addresses = AddressSet::new();
            if prev_exists || !self.reported_empty {
                self.broadcast_no_endpoints(false);
            } else {
                self.reported_empty = true;
            }
            return;
        }

        if target_changed {
            let new_set = endpoints
                .map(|ep| resolve_addresses(ep, &self.target, pods))
                .unwrap_or_default();
            self.apply_new_set(new_set);
        } else if self.reported_empty {
            // Service transitioned from non-existent to existent with an
            // unchanged target: re-derive from the latest Endpoints so a
            // waiting subscriber gets its fresh snapshot.
            let new_set = endpoints
                .map(|ep| resolve_addresses(ep, &self.target, pods))
                .unwrap_or_default();
            self.apply_new_set(new_set);
        }
    }

    /// Sets the address set from a new Endpoints snapshot and fans out the
    /// diff.
    pub(crate) fn update_endpoints(&mut self, endpoints: &k8s::Endpoints, pods: &PodCache) {
        let new_set = resolve_addresses(endpoints, &self.target, pods);
        self.apply_new_set(new_set);
    }

    /// The Endpoints object was deleted: the Service still exists, but has
    /// no backends (§4.4).
    pub(crate) fn delete_endpoints(&mut self) {
        self.addresses = AddressSet::new();
        self.broadcast_no_endpoints(true);
    }

    fn apply_new_set(&mut self, new_set: AddressSet) {
        if new_set.is_empty() {
            self.addresses = new_set;
            self.broadcast_no_endpoints(true);
            return;
        }

        if self.reported_empty {
            self.addresses = new_set.clone();
            self.reported_empty = false;
            self.broadcast(EndpointsUpdate::Add(new_set.iter().collect()));
            return;
        }

        let (added, removed) = diff(&self.addresses, &new_set);
        self.addresses = new_set;
        if added.is_empty() && removed.is_empty() {
            return;
        }
        if !removed.is_empty() {
            self.broadcast(EndpointsUpdate::Remove(removed.iter().map(|a| a.addr).collect()));
        }
        if !added.is_empty() {
            self.broadcast(EndpointsUpdate::Add(added));
        }
    }

    fn broadcast_no_endpoints(&mut self, exists: bool) {
        let already = self.reported_empty;
        self.reported_empty = true;
        // `exists=false` after `exists=true` is a state change subscribers
        // still need to hear about even if both report "empty".
        if already && exists {
            return;
        }
        self.broadcast(EndpointsUpdate::NoEndpoints { exists });
    }

    fn broadcast(&mut self, update: EndpointsUpdate) {
        self.subscribers.retain(|s| s.tx.try_send(update.clone()).is_ok());
    }
}

/// Builds the current address set from an Endpoints object: subsets whose
/// port entries match `target`, with each address's metadata resolved
/// through `pods`. An address whose `targetRef` doesn't resolve to a known
/// Pod is skipped, not treated as a failure (§4.4).
fn resolve_addresses(endpoints: &k8s::Endpoints, target: &Target, pods: &PodCache) -> AddressSet {
    let mut set = AddressSet::new();
    for subset in endpoints.subsets.iter().flatten() {
        let matching_port = subset
            .ports
            .iter()
            .flatten()
            .find(|p| target.matches(p.name.as_deref(), p.port));
        let Some(port) = matching_port else {
            continue;
        };
        let Ok(port) = u16::try_from(port.port) else {
            continue;
        };
        for addr in subset.addresses.iter().flatten() {
            let Ok(ip) = addr.ip.parse() else {
                tracing::debug!(ip = %addr.ip, "skipping endpoint address with unparseable ip");
                continue;
            };
            let pod_meta = addr
                .target_ref
                .as_ref()
                .and_then(|r| match (r.namespace.as_deref(), r.name.as_deref()) {
                    (Some(ns), Some(name)) => pods.get(ns, name),
                    _ => None,
                });
            let metadata = match pod_meta {
                Some(meta) => WorkloadMetadata {
                    protocol_hint: meta.protocol_hint(port),
                    ..WorkloadMetadata::from(meta.clone())
                },
                None => {
                    tracing::debug!(?addr.target_ref, "endpoint address has no resolvable pod");
                    WorkloadMetadata::default()
                }
            };
            set.insert(Address::new(std::net::SocketAddr::new(ip, port), metadata));
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use destination_core::ServiceId;
    use tokio::sync::mpsc::error::TryRecvError;

    fn key() -> ServicePortKey {
        ServicePortKey::new(ServiceId::new("ns", "svc"), 80)
    }

    /// A Service port spec forwarding `key().port` (80) to the named
    /// container port Endpoints subsets key their entries by at
    /// `target_port`. Subsets carry an unnamed port entry, so the Service
    /// port spec is likewise unnamed — `Target::Name("")` matches it.
    fn ports(target_port: i32) -> Vec<k8s::ServicePort> {
        vec![k8s::ServicePort {
            name: None,
            port: 80,
            target_port: Some(k8s::IntOrString::Int(target_port)),
            ..Default::default()
        }]
    }

    fn endpoints(ips: &[&str], port: i32) -> k8s::Endpoints {
        k8s::Endpoints {
            metadata: Default::default(),
            subsets: Some(vec![k8s::EndpointSubset {
                addresses: Some(
                    ips.iter()
                        .map(|ip| k8s::EndpointAddress {
                            ip: ip.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                not_ready_addresses: None,
                ports: Some(vec![k8s::EndpointPort {
                    name: None,
                    port,
                    protocol: None,
                    app_protocol: None,
                }]),
            }]),
        }
    }

    #[tokio::test]
    async fn subscribe_before_any_service_seen_is_no_endpoints_missing() {
        let mut sp = ServicePort::new(key());
        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            EndpointsUpdate::NoEndpoints { exists: false }
        );
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn scenario_1_add_on_subscribe() {
        let mut sp = ServicePort::new(key());
        let pods = PodCache::default();
        sp.update_service(&ports(8080), true, Some(&endpoints(&["10.0.0.1"], 8080)), &pods);

        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        match rx.try_recv().unwrap() {
            EndpointsUpdate::Add(addrs) => {
                assert_eq!(addrs.len(), 1);
                assert_eq!(addrs[0].addr.to_string(), "10.0.0.1:8080");
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_2_service_exists_endpoints_absent() {
        let mut sp = ServicePort::new(key());
        let pods = PodCache::default();
        sp.update_service(&[], true, None, &pods);

        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            EndpointsUpdate::NoEndpoints { exists: true }
        );
    }

    #[tokio::test]
    async fn scenario_3_service_missing() {
        let mut sp = ServicePort::new(key());
        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            EndpointsUpdate::NoEndpoints { exists: false }
        );
    }

    #[tokio::test]
    async fn scenario_4_endpoints_grow_emits_add_only() {
        let mut sp = ServicePort::new(key());
        let pods = PodCache::default();
        sp.update_service(&ports(8080), true, Some(&endpoints(&["10.0.0.1"], 8080)), &pods);

        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        let _ = rx.try_recv().unwrap();

        sp.update_endpoints(&endpoints(&["10.0.0.1", "10.0.0.2"], 8080), &pods);
        match rx.try_recv().unwrap() {
            EndpointsUpdate::Add(addrs) => {
                assert_eq!(addrs.len(), 1);
                assert_eq!(addrs[0].addr.to_string(), "10.0.0.2:8080");
            }
            other => panic!("expected Add, got {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn endpoints_shrink_emits_remove_with_the_original_port() {
        let mut sp = ServicePort::new(key());
        let pods = PodCache::default();
        sp.update_service(
            &ports(8080),
            true,
            Some(&endpoints(&["10.0.0.1", "10.0.0.2"], 8080)),
            &pods,
        );

        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        let _ = rx.try_recv().unwrap();

        sp.update_endpoints(&endpoints(&["10.0.0.1"], 8080), &pods);
        match rx.try_recv().unwrap() {
            EndpointsUpdate::Remove(addrs) => {
                // The removed address must carry the same port it was
                // `Add`ed with; a bare ip (port 0) would never match the
                // entry the proxy is holding.
                assert_eq!(addrs, vec!["10.0.0.2:8080".parse().unwrap()]);
            }
            other => panic!("expected Remove, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exists_false_transition_to_true_is_fresh_snapshot() {
        let mut sp = ServicePort::new(key());
        let pods = PodCache::default();

        let (tx, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            EndpointsUpdate::NoEndpoints { exists: false }
        );

        sp.update_service(&ports(8080), true, Some(&endpoints(&["10.0.0.1"], 8080)), &pods);
        match rx.try_recv().unwrap() {
            EndpointsUpdate::Add(addrs) => assert_eq!(addrs.len(), 1),
            other => panic!("expected a fresh Add snapshot (I1), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let mut sp = ServicePort::new(key());
        let (tx, _rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = next_subscriber_id();
        sp.subscribe(id, tx);
        assert_eq!(sp.unsubscribe(id), (true, 0));
        assert_eq!(sp.unsubscribe(id), (false, 0));
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_dropped_without_blocking_others() {
        let mut sp = ServicePort::new(key());
        let pods = PodCache::default();
        sp.update_service(&ports(8080), true, Some(&endpoints(&["10.0.0.1"], 8080)), &pods);

        let (slow_tx, slow_rx) = mpsc::channel(1);
        sp.subscribe(next_subscriber_id(), slow_tx);
        let _ = slow_rx; // never drained, so its outbox will overflow

        let (fast_tx, mut fast_rx) = mpsc::channel(OUTBOX_CAPACITY);
        sp.subscribe(next_subscriber_id(), fast_tx);
        let _ = fast_rx.try_recv().unwrap();

        for i in 0..5u8 {
            sp.update_endpoints(&endpoints(&["10.0.0.1", &format!("10.0.0.{}", 2 + i)], 8080), &pods);
        }

        // The fast subscriber keeps receiving updates regardless of the slow one.
        assert!(fast_rx.try_recv().is_ok());
    }
}
