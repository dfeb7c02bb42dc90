//! The solver: applies the diff event stream to the gateway.
//!
//! A pool of workers consumes events, invokes the matching gateway mutation,
//! and mirrors each successful mutation into the current state store so that
//! later phases of the same sync observe it. The first failure raises the
//! shared abort flag: the producer stops, and remaining queued events are
//! drained without being applied.

use crate::client::AdminApi;
use crate::diff::{Event, Item, Op, Syncer, EVENT_BUFFER};
use crate::state::{Entity, ManbaState};
use anyhow::Context;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// Operation counts for one sync.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub create_ops: usize,
    pub update_ops: usize,
    pub delete_ops: usize,
}

#[derive(Debug, Default)]
struct Counters {
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

impl Counters {
    fn bump(&self, op: Op) {
        let counter = match op {
            Op::Create => &self.create,
            Op::Update => &self.update,
            Op::Delete => &self.delete,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> Stats {
        Stats {
            create_ops: self.create.load(Ordering::Relaxed),
            update_ops: self.update.load(Ordering::Relaxed),
            delete_ops: self.delete.load(Ordering::Relaxed),
        }
    }
}

/// Diffs and applies in one pass, fanning events out to `concurrency`
/// workers.
pub async fn solve(
    syncer: Syncer,
    client: Arc<dyn AdminApi>,
    concurrency: usize,
) -> anyhow::Result<Stats> {
    anyhow::ensure!(concurrency >= 1, "concurrency must be at least 1");

    let (tx, rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let counters = Arc::new(Counters::default());
    let errors = Arc::new(Mutex::new(Vec::<anyhow::Error>::new()));

    let workers: Vec<_> = (0..concurrency)
        .map(|worker| {
            let rx = rx.clone();
            let client = client.clone();
            let current = syncer.current.clone();
            let in_flight = syncer.in_flight.clone();
            let abort = syncer.abort.clone();
            let counters = counters.clone();
            let errors = errors.clone();
            tokio::spawn(async move {
                loop {
                    let event = { rx.lock().await.recv().await };
                    let Some(event) = event else { break };

                    if !abort.load(Ordering::Acquire) {
                        match apply(&*client, &current, &event).await {
                            Ok(()) => counters.bump(event.op),
                            Err(error) => {
                                tracing::warn!(
                                    %error,
                                    worker,
                                    kind = event.item.kind(),
                                    id = %event.item.identifier(),
                                    "gateway mutation failed, aborting sync",
                                );
                                abort.store(true, Ordering::Release);
                                errors.lock().push(error);
                            }
                        }
                    }
                    in_flight.done();
                }
            })
        })
        .collect();

    let produced = syncer.produce(tx).await;
    for worker in workers {
        let _ = worker.await;
    }
    produced?;

    let mut errors = std::mem::take(&mut *errors.lock());
    if let Some(first) = errors.pop() {
        let skipped = errors.len();
        if skipped > 0 {
            return Err(first.context(format!("and {skipped} further sync error(s)")));
        }
        return Err(first);
    }

    Ok(counters.stats())
}

async fn apply(client: &dyn AdminApi, current: &ManbaState, event: &Event) -> anyhow::Result<()> {
    if event.op == Op::Update {
        log_update(event);
    }

    match (&event.item, event.op) {
        (Item::Server(server), Op::Create) => {
            let mut server = server.clone();
            let id = client.put_server(&server).await.context("creating server")?;
            server.id = id;
            current.servers.add(server).context("mirroring server")?;
        }
        (Item::Server(server), Op::Update) => {
            client.put_server(server).await.context("updating server")?;
            current
                .servers
                .update(server.clone())
                .context("mirroring server")?;
        }
        (Item::Server(server), Op::Delete) => {
            client
                .remove_server(server.id)
                .await
                .context("deleting server")?;
            current
                .servers
                .delete(&server.identifier())
                .context("mirroring server delete")?;
        }

        (Item::Cluster(cluster), Op::Create) => {
            let mut cluster = cluster.clone();
            let id = client
                .put_cluster(&cluster)
                .await
                .context("creating cluster")?;
            cluster.id = id;
            current.clusters.add(cluster).context("mirroring cluster")?;
        }
        (Item::Cluster(cluster), Op::Update) => {
            client
                .put_cluster(cluster)
                .await
                .context("updating cluster")?;
            current
                .clusters
                .update(cluster.clone())
                .context("mirroring cluster")?;
        }
        (Item::Cluster(cluster), Op::Delete) => {
            client
                .remove_cluster(cluster.id)
                .await
                .context("deleting cluster")?;
            current
                .clusters
                .delete(&cluster.identifier())
                .context("mirroring cluster delete")?;
        }

        (Item::Bind(bind), Op::Create) => {
            client.add_bind(bind).await.context("creating bind")?;
            current.binds.add(bind.clone()).context("mirroring bind")?;
        }
        (Item::Bind(bind), Op::Delete) => {
            client.remove_bind(bind).await.context("deleting bind")?;
            current
                .binds
                .delete(&bind.identifier())
                .context("mirroring bind delete")?;
        }
        (Item::Bind(_), Op::Update) => {
            // A bind's identity is its entire value; the diff never updates
            // one in place.
            anyhow::bail!("bind update is not a valid operation");
        }

        (Item::Api(api), Op::Create) => {
            let mut api = api.clone();
            let id = client.put_api(&api).await.context("creating api")?;
            api.id = id;
            current.apis.add(api).context("mirroring api")?;
        }
        (Item::Api(api), Op::Update) => {
            client.put_api(api).await.context("updating api")?;
            current.apis.update(api.clone()).context("mirroring api")?;
        }
        (Item::Api(api), Op::Delete) => {
            client.remove_api(api.id).await.context("deleting api")?;
            current
                .apis
                .delete(&api.identifier())
                .context("mirroring api delete")?;
        }

        (Item::Routing(routing), Op::Create) => {
            let mut routing = routing.clone();
            let id = client
                .put_routing(&routing)
                .await
                .context("creating routing")?;
            routing.id = id;
            current.routings.add(routing).context("mirroring routing")?;
        }
        (Item::Routing(routing), Op::Update) => {
            client
                .put_routing(routing)
                .await
                .context("updating routing")?;
            current
                .routings
                .update(routing.clone())
                .context("mirroring routing")?;
        }
        (Item::Routing(routing), Op::Delete) => {
            client
                .remove_routing(routing.id)
                .await
                .context("deleting routing")?;
            current
                .routings
                .delete(&routing.identifier())
                .context("mirroring routing delete")?;
        }
    }

    Ok(())
}

fn log_update(event: &Event) {
    let old = event
        .old
        .as_ref()
        .and_then(|item| serde_json::to_string(&item_json(item)).ok())
        .unwrap_or_default();
    let new = serde_json::to_string(&item_json(&event.item)).unwrap_or_default();
    tracing::debug!(
        kind = event.item.kind(),
        id = %event.item.identifier(),
        %old,
        %new,
        "updating gateway entity",
    );
}

fn item_json(item: &Item) -> serde_json::Value {
    match item {
        Item::Server(s) => serde_json::to_value(s),
        Item::Cluster(c) => serde_json::to_value(c),
        Item::Bind(b) => serde_json::to_value(b),
        Item::Api(a) => serde_json::to_value(a),
        Item::Routing(r) => serde_json::to_value(r),
    }
    .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeAdminApi;
    use crate::model::*;

    fn target_state() -> Arc<ManbaState> {
        let state = ManbaState::new();
        state
            .servers
            .add(Server {
                id: 10,
                addr: "1.1.1.1:8080".to_string(),
                max_qps: 250,
                ..Default::default()
            })
            .unwrap();
        state
            .clusters
            .add(Cluster {
                id: 20,
                name: "default.web.v1.8080.svc".to_string(),
                ..Default::default()
            })
            .unwrap();
        state
            .binds
            .add(Bind {
                cluster_id: 20,
                server_id: 10,
            })
            .unwrap();
        Arc::new(state)
    }

    #[tokio::test]
    async fn creates_everything_and_mirrors_into_current() {
        let current = Arc::new(ManbaState::new());
        let target = target_state();
        let gw = Arc::new(FakeAdminApi::new());

        let syncer = Syncer::new(current.clone(), target);
        let stats = solve(syncer, gw.clone(), 4).await.unwrap();

        assert_eq!(
            stats,
            Stats {
                create_ops: 3,
                update_ops: 0,
                delete_ops: 0
            }
        );
        assert_eq!(current.servers.len(), 1);
        assert_eq!(current.clusters.len(), 1);
        assert_eq!(gw.bind_count(), 1);
        assert_eq!(gw.list_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resync_of_identical_state_is_a_noop() {
        let current = Arc::new(ManbaState::new());
        let gw = Arc::new(FakeAdminApi::new());
        let stats = solve(Syncer::new(current.clone(), target_state()), gw.clone(), 2)
            .await
            .unwrap();
        assert_eq!(stats.create_ops, 3);

        // The mirrored current state now matches the target.
        let stats = solve(Syncer::new(current, target_state()), gw, 2)
            .await
            .unwrap();
        assert_eq!(stats, Stats::default());
    }

    #[tokio::test]
    async fn delete_runs_in_reverse_order() {
        let current = Arc::new(ManbaState::new());
        let gw = Arc::new(FakeAdminApi::new());
        solve(Syncer::new(current.clone(), target_state()), gw.clone(), 2)
            .await
            .unwrap();

        let empty = Arc::new(ManbaState::new());
        let stats = solve(Syncer::new(current.clone(), empty), gw.clone(), 2)
            .await
            .unwrap();
        assert_eq!(stats.delete_ops, 3);
        assert_eq!(gw.bind_count(), 0);
        assert!(gw.list_servers().await.unwrap().is_empty());
        assert!(current.servers.is_empty());
    }

    #[tokio::test]
    async fn create_writes_back_the_assigned_id() {
        let current = Arc::new(ManbaState::new());
        let target = Arc::new(ManbaState::new());
        target
            .servers
            .add(Server {
                id: 77,
                addr: "2.2.2.2:80".to_string(),
                ..Default::default()
            })
            .unwrap();

        let gw = Arc::new(FakeAdminApi::new());
        solve(Syncer::new(current.clone(), target), gw, 1)
            .await
            .unwrap();
        // Client-assigned ids survive the round trip into the mirror.
        assert_eq!(current.servers.get("2.2.2.2:80").unwrap().id, 77);
    }
}
