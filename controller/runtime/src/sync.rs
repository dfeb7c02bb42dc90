//! The sync controller.
//!
//! A single worker drains the coalescing change channel, so at most one sync
//! runs at a time. Each sync: rate-limit token, parse, hash short-circuit,
//! dump, id reconciliation, validity filter, diff + solve. The content hash
//! is stored only after a fully successful sync so that failures retry on
//! the next trigger.

use crate::core::{
    check,
    diff::Syncer,
    dump, id,
    solver::{self, Stats},
    AdminApi, Bind, ManbaState,
};
use crate::index::{parser, ring, DesiredState, SharedIndex};
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};

/// A token bucket with burst 1: syncs may not start more often than `rate`
/// per second.
#[derive(Debug)]
pub(crate) struct RateLimit {
    interval: Duration,
    next: Instant,
}

impl RateLimit {
    pub(crate) fn new(rate: f64) -> Self {
        let interval = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next: Instant::now(),
        }
    }

    pub(crate) async fn acquire(&mut self) {
        let now = Instant::now();
        if self.next > now {
            time::sleep_until(self.next).await;
        }
        self.next = self.next.max(now) + self.interval;
    }
}

pub struct Settings {
    pub concurrency: usize,
    pub sync_rate_limit: f64,
    pub sync_period: Duration,
}

pub struct SyncController {
    index: SharedIndex,
    triggers: ring::Receiver,
    client: Arc<dyn AdminApi>,
    ids: id::Allocator,
    limiter: RateLimit,
    metrics: Metrics,
    claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    claimant: String,
    concurrency: usize,
    sync_period: Duration,
    last_applied: Option<[u8; 32]>,
}

#[derive(Debug)]
enum Outcome {
    Applied(Stats),
    Skipped,
}

impl SyncController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: SharedIndex,
        triggers: ring::Receiver,
        client: Arc<dyn AdminApi>,
        metrics: Metrics,
        claims: watch::Receiver<Arc<kubert::lease::Claim>>,
        claimant: String,
        settings: Settings,
    ) -> Self {
        Self {
            index,
            triggers,
            client,
            ids: id::Allocator::default(),
            limiter: RateLimit::new(settings.sync_rate_limit),
            metrics,
            claims,
            claimant,
            concurrency: settings.concurrency,
            sync_period: settings.sync_period,
            last_applied: None,
        }
    }

    pub async fn run(mut self, drain: drain::Watch) {
        // The first interval tick fires immediately, seeding the initial
        // sync; later ticks provide the periodic resync.
        let mut resync = time::interval(self.sync_period);
        resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown signaled, stopping sync loop");
                    return;
                }
                _ = resync.tick() => {
                    tracing::debug!("periodic resync");
                }
                res = self.claims.changed() => {
                    if res.is_err() {
                        tracing::info!("lease task ended, stopping sync loop");
                        return;
                    }
                    // Force a sync when leadership changes hands.
                    tracing::debug!("lease claim changed");
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(trigger) => tracing::debug!(?trigger, "change notification"),
                    None => {
                        tracing::info!("change channel closed, stopping sync loop");
                        return;
                    }
                },
            }

            if !self.is_leader() {
                tracing::trace!("not the leader, skipping sync");
                continue;
            }

            self.limiter.acquire().await;
            self.metrics.attempt();
            match self.sync_once().await {
                Ok(Outcome::Applied(stats)) => {
                    self.metrics.applied(&stats);
                    tracing::info!(
                        creates = stats.create_ops,
                        updates = stats.update_ops,
                        deletes = stats.delete_ops,
                        "sync applied",
                    );
                }
                Ok(Outcome::Skipped) => {
                    self.metrics.skip();
                    tracing::debug!("desired state unchanged, sync skipped");
                }
                Err(error) => {
                    self.metrics.error();
                    tracing::error!(%error, "sync failed");
                }
            }
        }
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.claimant)
    }

    async fn sync_once(&mut self) -> Result<Outcome> {
        let snapshot = self.index.read().snapshot();
        let desired = parser::build(&snapshot);

        let digest = digest(&desired)?;
        if self.last_applied == Some(digest) {
            return Ok(Outcome::Skipped);
        }

        let current = dump::fetch(&*self.client)
            .await
            .context("dumping gateway state")?
            .into_state();
        let target = reconcile(&desired, &current, &self.ids)?;

        let syncer = Syncer::new(Arc::new(current), Arc::new(target));
        let stats = solver::solve(syncer, self.client.clone(), self.concurrency).await?;

        self.last_applied = Some(digest);
        Ok(Outcome::Applied(stats))
    }
}

/// SHA-256 over the canonical raw projection. Computed before ids are
/// reconciled, so the digest is a pure function of the cluster snapshot.
pub(crate) fn digest(desired: &DesiredState) -> Result<[u8; 32]> {
    let bytes = serde_json::to_vec(&desired.to_raw()).context("marshaling desired state")?;
    Ok(Sha256::digest(&bytes).into())
}

/// Resolves the desired model against the current gateway state: entities
/// keep the id the gateway already knows them by, new entities get a fresh
/// one, binds are re-derived from the now-known ids, and anything that fails
/// pre-submit validation is dropped.
pub(crate) fn reconcile(
    desired: &DesiredState,
    current: &ManbaState,
    ids: &id::Allocator,
) -> Result<ManbaState> {
    use crate::core::state::StoreError;

    fn inherit(current_id: Result<u64, StoreError>, ids: &id::Allocator) -> Result<u64> {
        match current_id {
            Ok(id) => Ok(id),
            Err(StoreError::NotFound) => Ok(ids.next()),
            Err(error) => Err(error).context("looking up current id"),
        }
    }

    let target = ManbaState::new();

    let mut server_ids: HashMap<String, u64> = HashMap::new();
    for server in &desired.servers {
        let mut server = server.clone();
        if server.id == 0 {
            server.id = inherit(current.servers.get(&server.addr).map(|s| s.id), ids)?;
        }
        if !check::server_ok(&server) {
            continue;
        }
        server_ids.insert(server.addr.clone(), server.id);
        target
            .servers
            .add(server)
            .context("indexing target server")?;
    }

    let mut cluster_ids: HashMap<String, u64> = HashMap::new();
    for desired_cluster in &desired.clusters {
        let mut cluster = desired_cluster.cluster.clone();
        if cluster.id == 0 {
            cluster.id = inherit(current.clusters.get(&cluster.name).map(|c| c.id), ids)?;
        }
        if !check::cluster_ok(&cluster) {
            continue;
        }
        cluster_ids.insert(cluster.name.clone(), cluster.id);
        target
            .clusters
            .add(cluster)
            .context("indexing target cluster")?;
    }

    for desired_cluster in &desired.clusters {
        let Some(&cluster_id) = cluster_ids.get(&desired_cluster.cluster.name) else {
            continue;
        };
        for addr in &desired_cluster.server_addrs {
            let Some(&server_id) = server_ids.get(addr) else {
                continue;
            };
            let bind = Bind {
                cluster_id,
                server_id,
            };
            if let Err(error) = target.binds.add(bind) {
                // A server may legitimately back several clusters, but the
                // same pair twice is a parser bug.
                if error != StoreError::AlreadyExists {
                    return Err(error).context("indexing target bind");
                }
            }
        }
    }

    let mut api_ids: HashMap<String, u64> = HashMap::new();
    for desired_api in &desired.apis {
        let mut api = desired_api.api.clone();
        if api.id == 0 {
            api.id = inherit(current.apis.get(&api.name).map(|a| a.id), ids)?;
        }

        let mut nodes = Vec::with_capacity(api.nodes.len());
        for (node, cluster_name) in api.nodes.iter().zip(&desired_api.node_clusters) {
            match cluster_ids.get(cluster_name) {
                Some(&cluster_id) => {
                    let mut node = node.clone();
                    node.cluster_id = cluster_id;
                    nodes.push(node);
                }
                None => {
                    tracing::warn!(
                        api = %api.name,
                        cluster = %cluster_name,
                        "dropping dispatch node with unresolved cluster",
                    );
                }
            }
        }
        api.nodes = nodes;

        if !check::api_ok(&api) {
            continue;
        }
        api_ids.insert(api.name.clone(), api.id);
        target.apis.add(api).context("indexing target api")?;
    }

    for desired_routing in &desired.routings {
        let mut routing = desired_routing.routing.clone();
        let Some(&api_id) = api_ids.get(&desired_routing.api_name) else {
            tracing::warn!(
                routing = %routing.name,
                api = %desired_routing.api_name,
                "dropping routing with unresolved api",
            );
            continue;
        };
        let Some(&cluster_id) = cluster_ids.get(&desired_routing.cluster_name) else {
            tracing::warn!(
                routing = %routing.name,
                cluster = %desired_routing.cluster_name,
                "dropping routing with unresolved cluster",
            );
            continue;
        };
        routing.api_id = api_id;
        routing.cluster_id = cluster_id;
        if routing.id == 0 {
            routing.id = inherit(current.routings.get(&routing.name).map(|r| r.id), ids)?;
        }
        if !check::routing_ok(&routing) {
            continue;
        }
        target
            .routings
            .add(routing)
            .context("indexing target routing")?;
    }

    Ok(target)
}
