use crate::ShardId;

/// Configuration for the shard [Engine](super::Engine)s.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// The number of shards (one engine each).
    pub shards: u32,

    /// The lowest shard units may be placed on.
    pub min_shard: ShardId,

    /// One past the highest shard units may be placed on.
    pub shard_limit: ShardId,

    /// The maximum size of each mailbox backlog.
    pub mailbox_size: usize,
}

impl Config {
    /// Panics if the placement range is empty or extends past the last shard.
    pub fn assert(&self) {
        assert!(
            self.min_shard < self.shard_limit,
            "invalid shard range [{}, {})",
            self.min_shard,
            self.shard_limit
        );
        assert!(
            self.shard_limit <= self.shards,
            "shard limit {} exceeds shard count {}",
            self.shard_limit,
            self.shards
        );
    }
}
