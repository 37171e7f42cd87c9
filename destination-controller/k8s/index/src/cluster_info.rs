use anyhow::{bail, Result};

/// Cluster-wide configuration needed to resolve authorities and label
/// addresses.
///
/// `dns_zone` is validated eagerly at construction: building a
/// [`ClusterInfo`] with an invalid zone is a fatal configuration error,
/// causing the process to fail to start rather than silently refusing
/// every subsequent lookup.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    pub dns_zone: String,
    pub control_namespace: String,
    pub enable_headless_services: bool,
}

impl ClusterInfo {
    pub fn new(
        dns_zone: impl Into<String>,
        control_namespace: impl Into<String>,
        enable_headless_services: bool,
    ) -> Result<Self> {
        let dns_zone = dns_zone.into();
        validate_dns_zone(&dns_zone)?;
        Ok(Self {
            dns_zone,
            control_namespace: control_namespace.into(),
            enable_headless_services,
        })
    }

    /// Whether `namespace` is the orchestrator's own control namespace,
    /// which must never be watched as an ordinary destination.
    pub fn is_control_namespace(&self, namespace: &str) -> bool {
        namespace == self.control_namespace
    }
}

fn validate_dns_zone(zone: &str) -> Result<()> {
    if zone.is_empty() {
        bail!("cluster DNS zone must not be empty");
    }
    for label in zone.split('.') {
        if label.is_empty() {
            bail!("cluster DNS zone {zone:?} has an empty label");
        }
        let first = label.as_bytes()[0] as char;
        let last = label.as_bytes()[label.len() - 1] as char;
        if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
            bail!(
                "cluster DNS zone label {label:?} must start and end with an alphanumeric character"
            );
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            bail!("cluster DNS zone label {label:?} has an invalid character");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_cluster_local() {
        assert!(ClusterInfo::new("cluster.local", "linkerd", false).is_ok());
    }

    #[test]
    fn rejects_empty_zone() {
        assert!(ClusterInfo::new("", "linkerd", false).is_err());
    }

    #[test]
    fn rejects_empty_label() {
        assert!(ClusterInfo::new("cluster..local", "linkerd", false).is_err());
    }

    #[test]
    fn rejects_leading_hyphen() {
        assert!(ClusterInfo::new("-cluster.local", "linkerd", false).is_err());
    }
}
