use destination_k8s_api::{self as k8s, IntOrString};

/// The resolved backend port for a `ServicePort`, derived from the Service's
/// port spec.
///
/// Endpoints subsets are matched against this, not against the requested
/// port number directly, because a Service may forward a well-known port to
/// an arbitrarily-named container port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    /// No Service port spec matched; fall back to matching Endpoints subset
    /// ports by the requested number directly.
    Number(u16),
    /// The Service port spec names a target; Endpoints subset ports are
    /// matched by name (empty name matches an unnamed subset port).
    Name(String),
}

/// Resolves the backend target for `requested_port` from a Service's port
/// specs.
///
/// A port spec matches when its own `port` equals `requested_port`. If that
/// spec's `targetPort` is set and non-zero, the match is reported as the
/// *name* of the port spec (which is what Endpoints subsets key their port
/// entries by), not the target port's own value. Absent a match, resolution
/// falls back to the requested number so that Endpoints subset ports are
/// matched directly.
pub(crate) fn resolve(ports: &[k8s::ServicePort], requested_port: u16) -> Target {
    for port in ports {
        if port.port != i32::from(requested_port) {
            continue;
        }
        let has_target = match &port.target_port {
            Some(IntOrString::Int(n)) => *n != 0,
            Some(IntOrString::String(s)) => !s.is_empty(),
            None => false,
        };
        if has_target {
            return Target::Name(port.name.clone().unwrap_or_default());
        }
        break;
    }
    Target::Number(requested_port)
}

impl Target {
    /// Whether a subset's port entry (`name`, `port`) backs this target.
    pub(crate) fn matches(&self, name: Option<&str>, port: i32) -> bool {
        match self {
            Target::Number(n) => port == i32::from(*n),
            Target::Name(want) => name.unwrap_or_default() == want,
        }
    }
}
