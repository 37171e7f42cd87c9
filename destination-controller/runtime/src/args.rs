use crate::{grpc, index, k8s};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tonic::transport::Server;
use tracing::{info, info_span, instrument, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "destination", about = "A service-mesh destination service")]
pub struct Args {
    #[clap(
        long,
        default_value = "linkerd=info,warn",
        env = "LINKERD_DESTINATION_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address the Destination gRPC server binds to.
    #[clap(long, default_value = "0.0.0.0:8086")]
    grpc_addr: SocketAddr,

    /// Cluster DNS zone authorities are resolved against.
    #[clap(long, default_value = "cluster.local")]
    cluster_dns_zone: String,

    /// Namespace excluded from endpoint/profile watches.
    #[clap(long, default_value = "linkerd")]
    control_namespace: String,

    /// Resolves a headless Service (`clusterIP: None`) directly from its
    /// per-pod Endpoints instead of treating it as non-existent.
    #[clap(long)]
    enable_headless_services: bool,

    /// Remote identity issuer to call at startup. Unset by default: most
    /// deployments never need the destination server's own identity
    /// reissued.
    #[clap(long, env = "LINKERD_DESTINATION_IDENTITY_ISSUER_URL")]
    identity_issuer_url: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            grpc_addr,
            cluster_dns_zone,
            control_namespace,
            enable_headless_services,
            identity_issuer_url,
        } = self;

        // An invalid DNS zone is a configuration error, not a runtime one:
        // fail fast rather than start a server that can never resolve
        // anything.
        let cluster_info = Arc::new(index::ClusterInfo::new(
            cluster_dns_zone,
            control_namespace,
            enable_headless_services,
        )?);

        let mut prom = <Registry>::default();
        let index_metrics = Arc::new(index::IndexMetrics::register(
            prom.sub_registry_with_prefix("index"),
        ));
        let grpc_metrics = grpc::metrics::GrpcServerMetricsFamily::register(
            prom.sub_registry_with_prefix("grpc_server"),
        );

        let idx = index::Index::new(cluster_info.clone(), index_metrics);

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), services).instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), endpoints).instrument(info_span!("endpoints")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(idx.clone(), pods).instrument(info_span!("pods")));

        let profiles = runtime
            .watch_all::<k8s::profile::ServiceProfile>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), profiles)
                .instrument(info_span!("serviceprofiles")),
        );

        let resolver: Arc<dyn destination_core::Resolver> = Arc::new(index::ClusterLocalResolver::new(
            cluster_info,
            idx.endpoints(),
            idx.profiles(),
        ));
        let resolvers: destination_core::ResolverChain = vec![resolver];

        if let Some(issuer_url) = identity_issuer_url {
            let client = reqwest::Client::new();
            tokio::spawn(async move {
                crate::identity::fetch_identity(&client, &issuer_url).await;
            });
        }

        tokio::spawn(serve(grpc_addr, resolvers, grpc_metrics, runtime.shutdown_handle()));

        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn serve(
    addr: SocketAddr,
    resolvers: destination_core::ResolverChain,
    metrics: grpc::metrics::GrpcServerMetricsFamily,
    drain: drain::Watch,
) -> Result<()> {
    let svc = grpc::DestinationServer::new(resolvers, metrics, drain.clone()).svc();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder()
            .add_service(svc)
            .serve_with_shutdown(addr, async move { let _ = close_rx.await; });
    }

    info!(%addr, "destination gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}
