use indexmap::IndexMap;
use std::net::{IpAddr, SocketAddr};

/// The `(namespace, name)` pair identifying a Service.
///
/// Ordered lexically by `(namespace, name)` for stable iteration; carries no
/// other notion of identity.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceId {
    pub namespace: String,
    pub name: String,
}

impl ServiceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

/// Uniquely identifies a watch: a Service plus the logical port a client
/// asked for.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServicePortKey {
    pub service: ServiceId,
    pub port: u16,
}

impl ServicePortKey {
    pub fn new(service: ServiceId, port: u16) -> Self {
        Self { service, port }
    }
}

impl std::fmt::Display for ServicePortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.port)
    }
}

/// Whether the backend is known to speak a particular application protocol,
/// letting the proxy skip protocol detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtocolHint {
    #[default]
    Unknown,
    H2,
    Opaque,
}

/// Labels describing the workload backing an `Address`, carried alongside
/// but not part of its identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadMetadata {
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    pub controller_kind: Option<String>,
    pub controller_name: Option<String>,

    /// The mesh identity the backend presents, if any.
    pub identity: Option<String>,

    /// Load-balancing weight, carried through from the wire `WeightedAddr`.
    /// Defaults to the orchestrator's neutral weight unit.
    pub weight: u32,

    pub protocol_hint: ProtocolHint,
}

impl WorkloadMetadata {
    pub const DEFAULT_WEIGHT: u32 = 10_000;
}

impl Default for WorkloadMetadata {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: None,
            controller_kind: None,
            controller_name: None,
            identity: None,
            weight: Self::DEFAULT_WEIGHT,
            protocol_hint: ProtocolHint::default(),
        }
    }
}

/// A single resolved backend address.
///
/// Two addresses are equal iff `(ip, port)` are equal; `metadata` is
/// associated data, not part of identity.
#[derive(Clone, Debug)]
pub struct Address {
    pub addr: SocketAddr,
    pub metadata: WorkloadMetadata,
}

impl Address {
    pub fn new(addr: SocketAddr, metadata: WorkloadMetadata) -> Self {
        Self { addr, metadata }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

/// The current set of backend addresses for a `ServicePort`.
///
/// Backed by an `IndexMap` keyed by `(ip, port)` so iteration order is
/// stable across calls on an otherwise-unchanged set, which keeps diff
/// output order deterministic for byte-identical inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressSet(IndexMap<SocketAddr, WorkloadMetadata>);

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, addr: Address) {
        self.0.insert(addr.addr, addr.metadata);
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.0.contains_key(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = Address> + '_ {
        self.0
            .iter()
            .map(|(addr, meta)| Address::new(*addr, meta.clone()))
    }
}

impl FromIterator<Address> for AddressSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut set = Self::new();
        for addr in iter {
            set.insert(addr);
        }
        set
    }
}

/// Computes `(added, removed)` between two address sets.
///
/// `added = new \ old`, `removed = old \ new`, both keyed by `(ip, port)`.
/// An address whose `(ip, port)` is unchanged but whose metadata differs is
/// reported as a `removed` + `added` pair of the same `(ip, port)`, so
/// downstream consumers observe a replacement rather than an in-place
/// update. Output order follows each set's own iteration order, which is
/// stable for byte-identical inputs (satisfies determinism across repeat
/// diffs).
pub fn diff(old: &AddressSet, new: &AddressSet) -> (Vec<Address>, Vec<Address>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for (addr, meta) in &old.0 {
        match new.0.get(addr) {
            None => removed.push(Address::new(*addr, meta.clone())),
            Some(new_meta) if new_meta != meta => {
                removed.push(Address::new(*addr, meta.clone()));
                added.push(Address::new(*addr, new_meta.clone()));
            }
            Some(_) => {}
        }
    }

    for (addr, meta) in &new.0 {
        if !old.0.contains_key(addr) {
            added.push(Address::new(*addr, meta.clone()));
        }
    }

    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str, port: u16) -> Address {
        Address::new(format!("{ip}:{port}").parse().unwrap(), WorkloadMetadata::default())
    }

    #[test]
    fn diff_idempotence() {
        let set: AddressSet = vec![addr("10.0.0.1", 8080), addr("10.0.0.2", 8080)]
            .into_iter()
            .collect();
        let (added, removed) = diff(&set, &set);
        assert!(added.is_empty(), "P3: diff(S,S) added must be empty");
        assert!(removed.is_empty(), "P3: diff(S,S) removed must be empty");
    }

    #[test]
    fn diff_added_removed_disjoint() {
        let old: AddressSet = vec![addr("10.0.0.1", 8080), addr("10.0.0.2", 8080)]
            .into_iter()
            .collect();
        let new: AddressSet = vec![addr("10.0.0.2", 8080), addr("10.0.0.3", 8080)]
            .into_iter()
            .collect();
        let (added, removed) = diff(&old, &new);
        let added_ips: std::collections::HashSet<_> = added.iter().map(|a| a.addr).collect();
        let removed_ips: std::collections::HashSet<_> = removed.iter().map(|a| a.addr).collect();
        assert!(
            added_ips.is_disjoint(&removed_ips),
            "P4: added and removed must be disjoint"
        );
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].addr, "10.0.0.3:8080".parse().unwrap());
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].addr, "10.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn diff_metadata_change_is_replacement() {
        let old: AddressSet = vec![addr("10.0.0.1", 8080)].into_iter().collect();
        let mut changed_meta = WorkloadMetadata::default();
        changed_meta.weight = 1;
        let mut new = AddressSet::new();
        new.insert(Address::new("10.0.0.1:8080".parse().unwrap(), changed_meta));

        let (added, removed) = diff(&old, &new);
        assert_eq!(added.len(), 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(added[0].addr, removed[0].addr);
    }

    #[test]
    fn scenario_endpoints_grow() {
        // Scenario 4: subscriber observes only the newly added address.
        let old: AddressSet = vec![addr("10.0.0.1", 8080)].into_iter().collect();
        let new: AddressSet = vec![addr("10.0.0.1", 8080), addr("10.0.0.2", 8080)]
            .into_iter()
            .collect();
        let (added, removed) = diff(&old, &new);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].addr, "10.0.0.2:8080".parse().unwrap());
        assert!(removed.is_empty());
    }
}
