//! The diff engine.
//!
//! Compares a current and a target [`ManbaState`] and emits an ordered event
//! stream. Creates and updates run leaf-first (server, cluster, bind, api,
//! routing); deletes run in reverse. The producer quiesces between phases:
//! no event of one kind is emitted until every in-flight operation of the
//! previous kind has completed, which is what makes the fixed ordering safe
//! under a concurrent solver.

use crate::model::{Api, Bind, Cluster, Routing, Server};
use crate::state::{Collection, Entity, ManbaState, StoreError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, watch};

/// Events are buffered shallowly; the solver pool provides the parallelism.
pub(crate) const EVENT_BUFFER: usize = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Create => "create".fmt(f),
            Op::Update => "update".fmt(f),
            Op::Delete => "delete".fmt(f),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Server(Server),
    Cluster(Cluster),
    Bind(Bind),
    Api(Api),
    Routing(Routing),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Server(_) => Server::KIND,
            Item::Cluster(_) => Cluster::KIND,
            Item::Bind(_) => Bind::KIND,
            Item::Api(_) => Api::KIND,
            Item::Routing(_) => Routing::KIND,
        }
    }

    pub fn identifier(&self) -> String {
        match self {
            Item::Server(s) => s.identifier(),
            Item::Cluster(c) => c.identifier(),
            Item::Bind(b) => b.identifier(),
            Item::Api(a) => a.identifier(),
            Item::Routing(r) => r.identifier(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Event {
    pub op: Op,
    pub item: Item,
    pub old: Option<Item>,
}

/// Counts operations that have been queued but not yet completed by the
/// solver. The producer waits for zero between phases.
#[derive(Clone, Debug)]
pub(crate) struct InFlight(watch::Sender<usize>);

impl InFlight {
    fn new() -> Self {
        Self(watch::channel(0).0)
    }

    fn started(&self) {
        self.0.send_modify(|n| *n += 1);
    }

    pub(crate) fn done(&self) {
        self.0.send_modify(|n| *n -= 1);
    }

    async fn quiesced(&self) {
        // wait_for inspects the current value before suspending, so a
        // completion between phases cannot be missed.
        let _ = self.0.subscribe().wait_for(|n| *n == 0).await;
    }
}

/// Produces the event stream for one sync.
pub struct Syncer {
    pub(crate) current: Arc<ManbaState>,
    pub(crate) target: Arc<ManbaState>,
    pub(crate) in_flight: InFlight,
    pub(crate) abort: Arc<AtomicBool>,
}

impl Syncer {
    pub fn new(current: Arc<ManbaState>, target: Arc<ManbaState>) -> Self {
        Self {
            current,
            target,
            in_flight: InFlight::new(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs both passes, sending events to `tx`. Returns early (without
    /// error) when the channel closes or the abort flag is raised; store
    /// lookup failures abort the sync.
    pub(crate) async fn produce(&self, tx: mpsc::Sender<Event>) -> anyhow::Result<()> {
        if !self.create_update(&tx).await? {
            return Ok(());
        }
        self.delete(&tx).await?;
        Ok(())
    }

    async fn create_update(&self, tx: &mpsc::Sender<Event>) -> anyhow::Result<bool> {
        if !self
            .create_update_kind(tx, |s: &ManbaState| &s.servers, Item::Server)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .create_update_kind(tx, |s: &ManbaState| &s.clusters, Item::Cluster)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .create_update_kind(tx, |s: &ManbaState| &s.binds, Item::Bind)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .create_update_kind(tx, |s: &ManbaState| &s.apis, Item::Api)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .create_update_kind(tx, |s: &ManbaState| &s.routings, Item::Routing)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;
        Ok(true)
    }

    async fn delete(&self, tx: &mpsc::Sender<Event>) -> anyhow::Result<bool> {
        if !self
            .delete_kind(tx, |s: &ManbaState| &s.routings, Item::Routing)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .delete_kind(tx, |s: &ManbaState| &s.apis, Item::Api)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .delete_kind(tx, |s: &ManbaState| &s.binds, Item::Bind)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .delete_kind(tx, |s: &ManbaState| &s.clusters, Item::Cluster)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;

        if !self
            .delete_kind(tx, |s: &ManbaState| &s.servers, Item::Server)
            .await?
        {
            return Ok(false);
        }
        self.in_flight.quiesced().await;
        Ok(true)
    }

    async fn create_update_kind<T, F, W>(
        &self,
        tx: &mpsc::Sender<Event>,
        collection: F,
        wrap: W,
    ) -> anyhow::Result<bool>
    where
        T: Entity,
        F: Fn(&ManbaState) -> &Collection<T>,
        W: Fn(T) -> Item,
    {
        for entity in collection(&self.target).get_all() {
            if self.abort.load(Ordering::Acquire) {
                return Ok(false);
            }

            let event = match collection(&self.current).get(&entity.identifier()) {
                Err(StoreError::NotFound) => Some(Event {
                    op: Op::Create,
                    item: wrap(entity),
                    old: None,
                }),
                Ok(current) if current != entity => Some(Event {
                    op: Op::Update,
                    item: wrap(entity),
                    old: Some(wrap(current)),
                }),
                Ok(_) => None,
                Err(error) => {
                    anyhow::bail!("looking up {} '{}': {error}", T::KIND, entity.identifier())
                }
            };

            if let Some(event) = event {
                if !self.queue(tx, event).await {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn delete_kind<T, F, W>(
        &self,
        tx: &mpsc::Sender<Event>,
        collection: F,
        wrap: W,
    ) -> anyhow::Result<bool>
    where
        T: Entity,
        F: Fn(&ManbaState) -> &Collection<T>,
        W: Fn(T) -> Item,
    {
        for entity in collection(&self.current).get_all() {
            if self.abort.load(Ordering::Acquire) {
                return Ok(false);
            }

            let event = match collection(&self.target).get(&entity.identifier()) {
                Err(StoreError::NotFound) => Some(Event {
                    op: Op::Delete,
                    item: wrap(entity),
                    old: None,
                }),
                Ok(_) => None,
                Err(error) => {
                    anyhow::bail!("looking up {} '{}': {error}", T::KIND, entity.identifier())
                }
            };

            if let Some(event) = event {
                if !self.queue(tx, event).await {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Queues one event. A send on a closed channel means the solver is
    /// shutting down; that is benign and simply stops production.
    async fn queue(&self, tx: &mpsc::Sender<Event>, event: Event) -> bool {
        self.in_flight.started();
        if tx.send(event).await.is_err() {
            self.in_flight.done();
            tracing::debug!("event channel closed, stopping diff");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(clusters: &[(u64, &str)], servers: &[(u64, &str)]) -> Arc<ManbaState> {
        let state = ManbaState::new();
        for (id, name) in clusters {
            state
                .clusters
                .add(Cluster {
                    id: *id,
                    name: name.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }
        for (id, addr) in servers {
            state
                .servers
                .add(Server {
                    id: *id,
                    addr: addr.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }
        Arc::new(state)
    }

    async fn drain(syncer: &Syncer) -> Vec<Event> {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut events = Vec::new();
        // The consumer must run concurrently with the producer to service
        // the inter-phase barrier.
        let consumer = async {
            while let Some(event) = rx.recv().await {
                events.push(event);
                syncer.in_flight.done();
            }
        };
        let (produced, ()) = tokio::join!(syncer.produce(tx), consumer);
        produced.unwrap();
        events
    }

    #[tokio::test]
    async fn identical_states_produce_no_events() {
        let current = state_with(&[(1, "web")], &[(2, "1.1.1.1:80")]);
        let target = state_with(&[(1, "web")], &[(2, "1.1.1.1:80")]);
        let events = drain(&Syncer::new(current, target)).await;
        assert!(events.is_empty(), "unexpected events: {events:?}");
    }

    #[tokio::test]
    async fn creates_precede_deletes_in_dependency_order() {
        let current = state_with(&[(1, "old")], &[(2, "1.1.1.1:80")]);
        let target = state_with(&[(3, "new")], &[(2, "1.1.1.1:80")]);
        let events = drain(&Syncer::new(current, target)).await;

        let summary: Vec<(Op, &'static str, String)> = events
            .iter()
            .map(|e| (e.op, e.item.kind(), e.item.identifier()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Op::Create, "cluster", "new".to_string()),
                (Op::Delete, "cluster", "old".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn changed_entities_update_with_old_value() {
        let current = state_with(&[(1, "web")], &[]);
        let target = Arc::new(ManbaState::new());
        target
            .clusters
            .add(Cluster {
                id: 1,
                name: "web".to_string(),
                load_balance: crate::model::LoadBalance::IpHash,
                ..Default::default()
            })
            .unwrap();

        let events = drain(&Syncer::new(current, target)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::Update);
        assert!(matches!(
            events[0].old,
            Some(Item::Cluster(ref c)) if c.load_balance == crate::model::LoadBalance::RoundRobin
        ));
    }
}
