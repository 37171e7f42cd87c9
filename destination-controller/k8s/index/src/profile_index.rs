use ahash::AHashMap as HashMap;
use destination_core::{
    profile::{translate, Profile, ServiceProfileDocument},
    ProfileStream, ServiceId,
};
use destination_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Cluster-wide index of translated routing profiles, one per Service
/// (§4.3).
///
/// Bridges the declarative `ServiceProfile` custom resource to the wire
/// [`Profile`] via [`destination_core::profile::translate`]; a subscriber's
/// stream is a `tokio::sync::watch` receiver, so a late subscriber sees the
/// latest profile immediately and every subsequent `apply`/`delete` pushes
/// exactly one message (§4.3 "push one message on each change").
pub struct ProfileIndex {
    by_service: RwLock<HashMap<ServiceId, watch::Sender<Profile>>>,
}

impl ProfileIndex {
    pub fn new() -> Self {
        Self {
            by_service: RwLock::new(HashMap::default()),
        }
    }

    /// Subscribes to the profile for `id`. If no `ServiceProfile` has ever
    /// been observed for it, the stream starts at the zero-route profile
    /// (`update` called with the empty profile, §4.3).
    pub fn subscribe(&self, id: ServiceId) -> ProfileStream {
        let mut by_service = self.by_service.write();
        let tx = by_service
            .entry(id)
            .or_insert_with(|| watch::channel(Profile::default()).0);
        Box::pin(WatchStream::new(tx.subscribe()))
    }

    pub(crate) fn apply(&self, id: ServiceId, doc: &ServiceProfileDocument) {
        let profile = translate(doc);
        let mut by_service = self.by_service.write();
        match by_service.get(&id) {
            Some(tx) => {
                tx.send_replace(profile);
            }
            None => {
                by_service.insert(id, watch::channel(profile).0);
            }
        }
    }

    /// A `ServiceProfile` was deleted: subscribers fall back to the
    /// zero-route "no overrides" profile rather than being torn down
    /// (§4.3).
    pub(crate) fn delete(&self, id: &ServiceId) {
        let by_service = self.by_service.read();
        if let Some(tx) = by_service.get(id) {
            tx.send_replace(Profile::default());
        }
    }
}

impl Default for ProfileIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a `ServiceProfile` custom resource into the core translator's
/// input document (§4.2, §6).
pub(crate) fn document_of(spec: &k8s::profile::ServiceProfileSpec) -> ServiceProfileDocument {
    spec.into()
}

pub(crate) fn profile_service_id(profile: &k8s::profile::ServiceProfile) -> Option<ServiceId> {
    Some(ServiceId::new(profile.namespace()?, profile.name_unchecked()))
}
