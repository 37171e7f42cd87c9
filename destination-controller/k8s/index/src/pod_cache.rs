use ahash::AHashMap as HashMap;
use destination_core::{ProtocolHint, WorkloadMetadata};
use destination_k8s_api::{self as k8s, ResourceExt};
use std::collections::HashSet;

/// The subset of Pod metadata the endpoints watcher needs to stamp an
/// `Address`: owning controller, mesh identity, and the per-port protocol
/// hint (§3 supplement).
///
/// Kept in a flat cache rather than re-reading the Pod object at diff time,
/// since `Endpoints.subsets[].addresses[].target_ref` only carries a
/// namespace/name, not the full object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PodMeta {
    pub pod_name: String,
    pub pod_namespace: String,
    pub controller_kind: Option<String>,
    pub controller_name: Option<String>,
    pub identity: Option<String>,
    /// Ports listed in the pod's `config.linkerd.io/opaque-ports`
    /// annotation (the teacher's own annotation convention, `k8s/index/
    /// src/pod.rs`'s `opaque_ports` setting).
    opaque_ports: HashSet<u16>,
    /// Container ports named `h2`, the proxy's named-port convention for
    /// skipping protocol detection on a backend known to speak HTTP/2.
    h2_ports: HashSet<u16>,
}

impl PodMeta {
    /// The protocol hint for traffic to this pod on `port`: `Opaque` wins
    /// over `H2` if a port is (unusually) listed in both, since opaque
    /// takes the proxy out of HTTP handling entirely.
    pub(crate) fn protocol_hint(&self, port: u16) -> ProtocolHint {
        if self.opaque_ports.contains(&port) {
            ProtocolHint::Opaque
        } else if self.h2_ports.contains(&port) {
            ProtocolHint::H2
        } else {
            ProtocolHint::Unknown
        }
    }
}

/// Cluster-wide cache of live Pods, keyed by `(namespace, name)`.
///
/// Populated by the Pod informer; consulted, read-only, whenever the
/// Endpoints watcher resolves a `targetRef` into address metadata. An
/// address whose `targetRef` doesn't resolve to a known Pod is skipped by
/// the caller, not treated as a hard failure.
#[derive(Debug, Default)]
pub(crate) struct PodCache {
    by_key: HashMap<(String, String), PodMeta>,
}

impl PodCache {
    pub(crate) fn apply(&mut self, pod: k8s::Pod) {
        let ns = match pod.namespace() {
            Some(ns) => ns,
            None => return,
        };
        let name = pod.name_unchecked();
        let meta = Self::meta_of(&pod);
        self.by_key.insert((ns, name), meta);
    }

    pub(crate) fn delete(&mut self, namespace: String, name: String) {
        self.by_key.remove(&(namespace, name));
    }

    pub(crate) fn reset(&mut self, pods: Vec<k8s::Pod>) {
        self.by_key.clear();
        for pod in pods {
            self.apply(pod);
        }
    }

    pub(crate) fn get(&self, namespace: &str, name: &str) -> Option<&PodMeta> {
        self.by_key.get(&(namespace.to_string(), name.to_string()))
    }

    fn meta_of(pod: &k8s::Pod) -> PodMeta {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let owner = pod
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)));
        let opaque_ports = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|anns| anns.get("config.linkerd.io/opaque-ports"))
            .map(|spec| parse_port_set(spec))
            .unwrap_or_default();
        let h2_ports = pod.spec.as_ref().map(named_h2_ports).unwrap_or_default();
        PodMeta {
            pod_name: pod.name_unchecked(),
            identity: pod
                .spec
                .as_ref()
                .and_then(|s| s.service_account_name.clone())
                // The proxy derives the mesh identity from the owning
                // ServiceAccount using the same convention the identity
                // controller uses.
                .map(|sa| format!("{sa}.{namespace}.serviceaccount.identity")),
            pod_namespace: namespace,
            controller_kind: owner.map(|o| o.kind.clone()),
            controller_name: owner.map(|o| o.name.clone()),
            opaque_ports,
            h2_ports,
        }
    }
}

/// Reads a comma-separated list of ports or port ranges (e.g. `"8080,9090-9091"`),
/// the teacher's own `config.linkerd.io/opaque-ports` annotation grammar
/// (`k8s/index/src/pod.rs`'s `parse_portset`). Unparseable entries are
/// skipped rather than failing the whole annotation.
fn parse_port_set(spec: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
                    ports.extend(start..=end);
                }
            }
            None => {
                if let Ok(port) = part.parse::<u16>() {
                    ports.insert(port);
                }
            }
        }
    }
    ports
}

/// Container ports named `h2`: the named-port convention the proxy uses to
/// learn a backend speaks HTTP/2 without a detection round-trip.
fn named_h2_ports(spec: &k8s::PodSpec) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for container in &spec.containers {
        for port in container.ports.iter().flatten() {
            if port.name.as_deref() == Some("h2") {
                if let Ok(port) = u16::try_from(port.container_port) {
                    ports.insert(port);
                }
            }
        }
    }
    ports
}

impl From<PodMeta> for WorkloadMetadata {
    fn from(meta: PodMeta) -> Self {
        WorkloadMetadata {
            pod_name: Some(meta.pod_name),
            pod_namespace: Some(meta.pod_namespace),
            controller_kind: meta.controller_kind,
            controller_name: meta.controller_name,
            identity: meta.identity,
            ..Default::default()
        }
    }
}
