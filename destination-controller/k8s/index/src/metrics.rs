use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Index-wide metrics, registered once at startup and updated from the
/// informer callbacks and the registry's subscribe/unsubscribe paths.
///
/// Grouped separately from the gRPC-surface metrics (`destination_grpc::metrics`)
/// since this side instruments the control-plane index itself, not the RPCs
/// clients make against it.
pub struct IndexMetrics {
    resource_events: Family<ResourceLabels, Counter>,
    watched_service_ports: Gauge,
    subscribers: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResourceLabels {
    kind: &'static str,
    event: &'static str,
}

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let resource_events = Family::default();
        prom.register(
            "resource_events",
            "Count of apply/delete/reset events observed from the orchestrator's watch API",
            resource_events.clone(),
        );

        let watched_service_ports = Gauge::default();
        prom.register(
            "watched_service_ports",
            "Number of (Service, port) entries currently subscribed to",
            watched_service_ports.clone(),
        );

        let subscribers = Gauge::default();
        prom.register(
            "subscribers",
            "Number of live endpoint subscriptions across all watched service ports",
            subscribers.clone(),
        );

        Self {
            resource_events,
            watched_service_ports,
            subscribers,
        }
    }

    pub fn observe_apply(&self, kind: &'static str) {
        self.resource_events
            .get_or_create(&ResourceLabels {
                kind,
                event: "apply",
            })
            .inc();
    }

    pub fn observe_delete(&self, kind: &'static str) {
        self.resource_events
            .get_or_create(&ResourceLabels {
                kind,
                event: "delete",
            })
            .inc();
    }

    pub fn observe_reset(&self, kind: &'static str) {
        self.resource_events
            .get_or_create(&ResourceLabels {
                kind,
                event: "reset",
            })
            .inc();
    }

    pub fn subscribed(&self) {
        self.subscribers.inc();
    }

    pub fn unsubscribed(&self) {
        self.subscribers.dec();
    }

    pub fn set_watched_service_ports(&self, n: i64) {
        self.watched_service_ports.set(n);
    }
}
