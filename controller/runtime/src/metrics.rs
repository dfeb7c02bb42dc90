use manba_ingress_controller_core::solver::Stats;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::{counter::Counter, family::Family};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OpLabels {
    op: OpKind,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum OpKind {
    Create,
    Update,
    Delete,
}

/// Sync-loop counters, registered under the admin server's registry.
#[derive(Clone, Debug)]
pub struct Metrics {
    syncs: Counter,
    sync_errors: Counter,
    sync_skips: Counter,
    ops: Family<OpLabels, Counter>,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let syncs = Counter::default();
        registry.register("sync", "Total sync attempts", syncs.clone());

        let sync_errors = Counter::default();
        registry.register("sync_errors", "Syncs that failed", sync_errors.clone());

        let sync_skips = Counter::default();
        registry.register(
            "sync_skips",
            "Syncs short-circuited by the content hash",
            sync_skips.clone(),
        );

        let ops = Family::<OpLabels, Counter>::default();
        registry.register("ops", "Gateway mutations applied", ops.clone());

        Self {
            syncs,
            sync_errors,
            sync_skips,
            ops,
        }
    }

    pub fn attempt(&self) {
        self.syncs.inc();
    }

    pub fn error(&self) {
        self.sync_errors.inc();
    }

    pub fn skip(&self) {
        self.sync_skips.inc();
    }

    pub fn applied(&self, stats: &Stats) {
        self.ops
            .get_or_create(&OpLabels { op: OpKind::Create })
            .inc_by(stats.create_ops as u64);
        self.ops
            .get_or_create(&OpLabels { op: OpKind::Update })
            .inc_by(stats.update_ops as u64);
        self.ops
            .get_or_create(&OpLabels { op: OpKind::Delete })
            .inc_by(stats.delete_ops as u64);
    }
}
