use crate::ShardId;
use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
};

/// Label for per-shard load metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ShardLabel {
    pub shard: String,
}

impl ShardLabel {
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard: shard.to_string(),
        }
    }
}

/// Metrics for the [Engine](super::Engine).
#[derive(Default)]
pub struct Metrics {
    /// Number of units created
    pub created: Counter,
    /// Number of units loaded
    pub loaded: Counter,
    /// Number of creations canceled
    pub canceled: Counter,
    /// Number of units removed
    pub removed: Counter,
    /// Number of live units
    pub live: Gauge,
    /// Number of pending creations
    pub pending: Gauge,
    /// Number of units known to the shard
    pub mapped: Gauge,
    /// Number of units owned by each shard (only populated on the primary)
    pub units_per_shard: Family<ShardLabel, Gauge>,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register("created", "Number of units created", metrics.created.clone());
        context.register("loaded", "Number of units loaded", metrics.loaded.clone());
        context.register(
            "canceled",
            "Number of creations canceled",
            metrics.canceled.clone(),
        );
        context.register("removed", "Number of units removed", metrics.removed.clone());
        context.register("live", "Number of live units", metrics.live.clone());
        context.register(
            "pending",
            "Number of pending creations",
            metrics.pending.clone(),
        );
        context.register(
            "mapped",
            "Number of units known to the shard",
            metrics.mapped.clone(),
        );
        context.register(
            "units_per_shard",
            "Number of units owned by each shard",
            metrics.units_per_shard.clone(),
        );
        metrics
    }
}
