use destination_core::{
    profile::{Profile, RequestMatch, ResponseMatch, Route},
    resolver::{resolve_endpoints, resolve_profile},
    Address, AuthorityError, EndpointsUpdate, ProtocolHint, ResolverChain,
};
use futures::prelude::*;
use linkerd2_proxy_api::{
    destination::{
        self as api, destination_server,
        protocol_hint::{Protocol as PbProtocol, H2 as PbH2},
        tls_identity, update,
    },
    net::{ip_address, IpAddress, TcpAddress},
};
use std::{net::IpAddr, pin::Pin};

/// The `Destination` gRPC surface: `Get` and `GetProfile`.
///
/// Authority parsing and error mapping are done here; resolution itself is
/// delegated to the [`ResolverChain`].
#[derive(Clone)]
pub struct DestinationServer {
    resolvers: ResolverChain,
    metrics: crate::metrics::GrpcServerMetricsFamily,
    drain: drain::Watch,
}

impl DestinationServer {
    pub fn new(
        resolvers: ResolverChain,
        metrics: crate::metrics::GrpcServerMetricsFamily,
        drain: drain::Watch,
    ) -> Self {
        Self {
            resolvers,
            metrics,
            drain,
        }
    }

    pub fn svc(self) -> destination_server::DestinationServer<Self> {
        destination_server::DestinationServer::new(self)
    }
}

/// Splits `"<host>:<port>"` into its parts, validating the port is in
/// `[1, 65535]`.
pub fn parse_authority(authority: &str) -> Result<(String, u16), AuthorityError> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| AuthorityError::MissingPort(authority.to_string()))?;
    if host.is_empty() {
        return Err(AuthorityError::Malformed(authority.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| AuthorityError::InvalidPort(authority.to_string()))?;
    if port == 0 {
        return Err(AuthorityError::InvalidPort(authority.to_string()));
    }
    Ok((host.to_string(), port))
}

fn resolve_error_status(err: destination_core::ResolveError) -> tonic::Status {
    match err {
        destination_core::ResolveError::Unresolvable(auth) => {
            tonic::Status::not_found(format!("no resolver for {auth}"))
        }
        destination_core::ResolveError::Rejected(auth, reason) => {
            tonic::Status::unavailable(format!("{auth}: {reason}"))
        }
    }
}

fn authority_error_status(err: AuthorityError) -> tonic::Status {
    tonic::Status::invalid_argument(err.to_string())
}

type UpdateStream = Pin<Box<dyn Stream<Item = Result<api::Update, tonic::Status>> + Send + 'static>>;
type ProfileStream =
    Pin<Box<dyn Stream<Item = Result<api::DestinationProfile, tonic::Status>> + Send + 'static>>;

#[async_trait::async_trait]
impl destination_server::Destination for DestinationServer {
    type GetStream = UpdateStream;

    async fn get(
        &self,
        req: tonic::Request<api::GetDestination>,
    ) -> Result<tonic::Response<UpdateStream>, tonic::Status> {
        let metrics = self.metrics.server_stream_rpc("Destination", "Get");
        let observer = metrics.start();

        let api::GetDestination { path, .. } = req.into_inner();
        let (host, port) = match parse_authority(&path) {
            Ok(hp) => hp,
            Err(e) => {
                let status = authority_error_status(e);
                observer.end(status.code());
                return Err(status);
            }
        };

        let updates = match resolve_endpoints(&self.resolvers, &host, port).await {
            Ok(updates) => updates,
            Err(e) => {
                let status = resolve_error_status(e);
                observer.end(status.code());
                return Err(status);
            }
        };

        let drain = self.drain.clone();
        Ok(tonic::Response::new(Box::pin(async_stream::try_stream! {
            let mut updates = updates;
            tokio::pin! {
                let shutdown = drain.signaled();
            }
            loop {
                tokio::select! {
                    next = updates.next() => match next {
                        Some(update) => {
                            observer.msg_sent();
                            yield to_wire_update(update);
                        }
                        None => return,
                    },
                    _ = &mut shutdown => return,
                }
            }
        })))
    }

    type GetProfileStream = ProfileStream;

    async fn get_profile(
        &self,
        req: tonic::Request<api::GetDestination>,
    ) -> Result<tonic::Response<ProfileStream>, tonic::Status> {
        let metrics = self.metrics.server_stream_rpc("Destination", "GetProfile");
        let observer = metrics.start();

        let api::GetDestination { path, .. } = req.into_inner();
        let (host, port) = match parse_authority(&path) {
            Ok(hp) => hp,
            Err(e) => {
                let status = authority_error_status(e);
                observer.end(status.code());
                return Err(status);
            }
        };

        let profiles = match resolve_profile(&self.resolvers, &host, port).await {
            Ok(profiles) => profiles,
            Err(e) => {
                let status = resolve_error_status(e);
                observer.end(status.code());
                return Err(status);
            }
        };

        let drain = self.drain.clone();
        Ok(tonic::Response::new(Box::pin(async_stream::try_stream! {
            let mut profiles = profiles;
            tokio::pin! {
                let shutdown = drain.signaled();
            }
            loop {
                tokio::select! {
                    next = profiles.next() => match next {
                        Some(profile) => {
                            observer.msg_sent();
                            yield to_wire_profile(profile);
                        }
                        None => return,
                    },
                    _ = &mut shutdown => return,
                }
            }
        })))
    }
}

fn to_wire_update(update: EndpointsUpdate) -> api::Update {
    let update = match update {
        EndpointsUpdate::NoEndpoints { exists } => {
            update::Update::NoEndpoints(api::NoEndpoints { exists })
        }
        EndpointsUpdate::Add(addrs) => update::Update::Add(api::WeightedAddrSet {
            addrs: addrs.iter().map(to_weighted_addr).collect(),
            metric_labels: Default::default(),
        }),
        EndpointsUpdate::Remove(addrs) => update::Update::Remove(api::AddrSet {
            addrs: addrs.iter().map(|a| to_tcp_address(a.ip(), a.port())).collect(),
        }),
    };
    api::Update {
        update: Some(update),
    }
}

fn to_weighted_addr(addr: &Address) -> api::WeightedAddr {
    let protocol_hint = match addr.metadata.protocol_hint {
        ProtocolHint::H2 => Some(api::ProtocolHint {
            protocol: Some(PbProtocol::H2(PbH2 {})),
        }),
        ProtocolHint::Opaque | ProtocolHint::Unknown => None,
    };

    let tls_identity = addr
        .metadata
        .identity
        .clone()
        .map(|name| tls_identity::DnsLikeIdentity { name })
        .map(|dns| api::TlsIdentity {
            strategy: Some(tls_identity::Strategy::DnsLikeIdentity(dns)),
        });

    api::WeightedAddr {
        addr: Some(to_tcp_address(addr.ip(), addr.port())),
        weight: addr.metadata.weight,
        metric_labels: Default::default(),
        tls_identity,
        protocol_hint,
    }
}

fn to_tcp_address(ip: IpAddr, port: u16) -> TcpAddress {
    let ip = match ip {
        IpAddr::V4(v4) => ip_address::Ip::Ipv4(u32::from_be_bytes(v4.octets())),
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let (high, low) = octets.split_at(8);
            ip_address::Ip::Ipv6(ip_address::Ipv6 {
                first: u64::from_be_bytes(high.try_into().expect("8 bytes")),
                last: u64::from_be_bytes(low.try_into().expect("8 bytes")),
            })
        }
    };
    TcpAddress {
        ip: Some(IpAddress { ip: Some(ip) }),
        port: u32::from(port),
    }
}

fn to_wire_profile(profile: Profile) -> api::DestinationProfile {
    api::DestinationProfile {
        routes: profile.routes.iter().map(to_wire_route).collect(),
        retry_budget: profile.retry_budget.as_ref().map(|b| api::RetryBudget {
            retry_ratio: b.retry_ratio,
            min_retries_per_second: b.min_retries_per_second,
            ttl: Some(
                prost_types::Duration::try_from(b.ttl)
                    .unwrap_or(prost_types::Duration { seconds: 0, nanos: 0 }),
            ),
        }),
        ..Default::default()
    }
}

fn to_wire_route(route: &Route) -> api::Route {
    api::Route {
        condition: Some(to_wire_request_match(&route.condition)),
        response_classes: route
            .response_classes
            .iter()
            .map(|c| api::ResponseClass {
                condition: Some(to_wire_response_match(&c.condition)),
                is_failure: c.is_failure,
            })
            .collect(),
        metrics_labels: route.labels.clone().into_iter().collect(),
        is_retryable: route.is_retryable,
        timeout: route.timeout.and_then(|d| prost_types::Duration::try_from(d).ok()),
    }
}

fn to_wire_request_match(m: &RequestMatch) -> api::RequestMatch {
    use api::request_match::Match;
    let matched = match m {
        RequestMatch::All(children) => Match::All(api::request_match::Seq {
            matches: children.iter().map(to_wire_request_match).collect(),
        }),
        RequestMatch::Any(children) => Match::Any(api::request_match::Seq {
            matches: children.iter().map(to_wire_request_match).collect(),
        }),
        RequestMatch::Not(child) => {
            Match::Not(Box::new(to_wire_request_match(child)))
        }
        RequestMatch::Path(path) => Match::Path(api::PathMatch { regex: path.clone() }),
        RequestMatch::Method(method) => Match::Method(to_wire_method(method)),
    };
    api::RequestMatch { r#match: Some(matched) }
}

/// Maps a method name onto the wire's `Registered` enum where possible,
/// falling back to `Unregistered` for anything non-standard — the
/// translator accepts any method string, the wire schema only enumerates
/// the common ones.
fn to_wire_method(method: &str) -> api::HttpMethod {
    use api::http_method::{Registered, Type};
    let registered = match method.to_ascii_uppercase().as_str() {
        "GET" => Some(Registered::Get),
        "POST" => Some(Registered::Post),
        "PUT" => Some(Registered::Put),
        "DELETE" => Some(Registered::Delete),
        "PATCH" => Some(Registered::Patch),
        "OPTIONS" => Some(Registered::Options),
        "CONNECT" => Some(Registered::Connect),
        "HEAD" => Some(Registered::Head),
        "TRACE" => Some(Registered::Trace),
        _ => None,
    };
    let r#type = match registered {
        Some(r) => Type::Registered(r as i32),
        None => Type::Unregistered(method.to_string()),
    };
    api::HttpMethod { r#type: Some(r#type) }
}

fn to_wire_response_match(m: &ResponseMatch) -> api::ResponseMatch {
    use api::response_match::Match;
    let matched = match m {
        ResponseMatch::All(children) => Match::All(api::response_match::Seq {
            matches: children.iter().map(to_wire_response_match).collect(),
        }),
        ResponseMatch::Any(children) => Match::Any(api::response_match::Seq {
            matches: children.iter().map(to_wire_response_match).collect(),
        }),
        ResponseMatch::Not(child) => {
            Match::Not(Box::new(to_wire_response_match(child)))
        }
        ResponseMatch::Status { min, max } => Match::Status(api::HttpStatusRange {
            min: u32::from(*min),
            max: u32::from(*max),
        }),
    };
    api::ResponseMatch { r#match: Some(matched) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_authority("svc.ns.svc.cluster.local:80").unwrap(),
            ("svc.ns.svc.cluster.local".to_string(), 80)
        );
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(
            parse_authority("svc.ns.svc.cluster.local"),
            Err(AuthorityError::MissingPort(_))
        ));
    }

    #[test]
    fn rejects_zero_port() {
        assert!(matches!(
            parse_authority("svc.ns.svc.cluster.local:0"),
            Err(AuthorityError::InvalidPort(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(matches!(
            parse_authority("svc.ns.svc.cluster.local:http"),
            Err(AuthorityError::InvalidPort(_))
        ));
    }
}
