use crate::{
    admission::Admission,
    gateway::HttpAdminApi,
    index::{ring, Index, IngressClass},
    k8s, lease,
    metrics::Metrics,
    status::StatusSyncer,
    sync::{Settings, SyncController},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

const MIN_SYNC_PERIOD: u64 = 10;

/// The informer channel is a ring: on overflow the oldest trigger is
/// dropped, which is safe because each sync rebuilds from scratch.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Parser)]
#[clap(name = "manba-ingress", about = "A Manba ingress controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "manba_ingress=info,warn",
        env = "MANBA_INGRESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Address of the Manba admin API, e.g. http://manba-api:9092.
    #[clap(long, env = "MANBA_API_SERVER_ADDR")]
    gateway_addr: String,

    /// Timeout for Manba admin API connections, in seconds.
    #[clap(long, default_value = "10")]
    gateway_timeout: u64,

    /// Namespace to watch for resources. Empty watches all namespaces.
    #[clap(long, default_value = "")]
    watch_namespace: String,

    /// Name of the ingress class to route through this controller.
    #[clap(long, default_value = "manba")]
    ingress_class: String,

    /// Election id to use for leader election and status updates.
    #[clap(long, default_value = "ingress-controller-leader")]
    election_id: String,

    /// Relist and reconcile gateway state this often, in seconds.
    #[clap(long, default_value = "600")]
    sync_period: u64,

    /// Upper bound on sync frequency, in syncs per second.
    #[clap(long, default_value = "0.3")]
    sync_rate_limit: f64,

    /// Number of concurrent gateway mutations per sync.
    #[clap(long, default_value = "10")]
    concurrency: usize,

    /// Publish controller addresses to ManbaIngress status subresources.
    #[clap(long)]
    update_status: bool,

    /// Service whose addresses are published, in namespace/name form.
    #[clap(long)]
    publish_service: Option<String>,

    /// Fixed address to publish instead of a service's.
    #[clap(long)]
    publish_status_address: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            admission_controller_disabled,
            gateway_addr,
            gateway_timeout,
            watch_namespace,
            ingress_class,
            election_id,
            sync_period,
            sync_rate_limit,
            concurrency,
            update_status,
            publish_service,
            publish_status_address,
        } = self;

        if sync_period < MIN_SYNC_PERIOD {
            bail!("resync period ({sync_period}s) is too low");
        }
        if concurrency < 1 {
            bail!("concurrency must be at least 1");
        }
        if update_status && publish_service.is_none() && publish_status_address.is_none() {
            bail!("--update-status requires --publish-service or --publish-status-address");
        }

        let pod_name = std::env::var("POD_NAME").context("POD_NAME must be set")?;
        let pod_namespace = std::env::var("POD_NAMESPACE").context("POD_NAMESPACE must be set")?;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("manba_ingress"));

        let (notify, triggers) = ring::channel(CHANGE_CHANNEL_CAPACITY);
        let namespace = (!watch_namespace.is_empty()).then_some(watch_namespace);
        let index = Index::shared(IngressClass::new(ingress_class), namespace, notify);

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let gateway = Arc::new(
            HttpAdminApi::new(&gateway_addr, Duration::from_secs(gateway_timeout))
                .context("building gateway client")?,
        );

        let claims = lease::init(&runtime, &pod_namespace, &election_id, &pod_name).await?;

        // Resource watches feed the shared index; each accepted change nudges
        // the sync loop through the ring channel.
        let ingresses = runtime.watch_all::<k8s::ManbaIngress>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), ingresses)
                .instrument(info_span!("manbaingresses")),
        );

        let clusters = runtime.watch_all::<k8s::ManbaCluster>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), clusters)
                .instrument(info_span!("manbaclusters")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), secrets).instrument(info_span!("secrets")),
        );

        if update_status {
            let status = StatusSyncer::new(
                runtime.client(),
                index.clone(),
                claims.clone(),
                pod_name.clone(),
                publish_service,
                publish_status_address,
            );
            tokio::spawn(
                status
                    .run(runtime.shutdown_handle())
                    .instrument(info_span!("status")),
            );
        }

        let controller = SyncController::new(
            index.clone(),
            triggers,
            gateway,
            metrics,
            claims,
            pod_name,
            Settings {
                concurrency,
                sync_rate_limit,
                sync_period: Duration::from_secs(sync_period),
            },
        );
        tokio::spawn(
            controller
                .run(runtime.shutdown_handle())
                .instrument(info_span!("sync")),
        );

        let runtime = runtime.spawn_server(|| Admission::new(index));

        // Block the main task on the shutdown signal; once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
