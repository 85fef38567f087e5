//! Per-shard view of the unit-to-shard mapping.
//!
//! Every shard holds an [Index]. Reads ([Index::resolve]) only consult the local cache. Writes are
//! funneled through the [PRIMARY_SHARD]: it is the only shard that may [Index::assign] or
//! [Index::release] a unit, and the only shard that tracks the load of each eligible shard. The
//! resulting decision is then replicated to all other shards with [Index::apply] and
//! [Index::evict].
//!
//! Once present in any cache, a mapping never changes until it is removed. Every deviation from
//! this protocol is treated as corruption of the index and panics.

use crate::{Identifier, ShardId, NULL_SHARD, PRIMARY_SHARD};
use std::collections::{btree_map::Entry, BTreeMap};

/// Mapping from unit to owning shard, as known by a single shard.
pub struct Index<I: Identifier> {
    shard: ShardId,

    /// Units known to this shard. Never contains [NULL_SHARD] outside of [Index::assign].
    mappings: BTreeMap<I, ShardId>,

    /// Number of units owned by each eligible shard (only populated on the primary).
    loads: Option<BTreeMap<ShardId, u32>>,
}

impl<I: Identifier> Index<I> {
    /// Create the index held by `shard`, placing units on shards in `[min_shard, shard_limit)`.
    pub fn new(shard: ShardId, min_shard: ShardId, shard_limit: ShardId) -> Self {
        assert!(
            min_shard < shard_limit,
            "invalid shard range [{min_shard}, {shard_limit})"
        );
        let loads = (shard == PRIMARY_SHARD)
            .then(|| (min_shard..shard_limit).map(|shard| (shard, 0)).collect());
        Self {
            shard,
            mappings: BTreeMap::new(),
            loads,
        }
    }

    /// The shard holding this index.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Whether this index makes placement decisions.
    pub fn is_primary(&self) -> bool {
        self.loads.is_some()
    }

    /// Returns the owner of `id`, if known to this shard.
    pub fn resolve(&self, id: &I) -> Option<ShardId> {
        let shard = *self.mappings.get(id)?;
        assert_ne!(shard, NULL_SHARD, "unit {id:?} mapped to null shard");
        Some(shard)
    }

    /// Returns the owner of `id`, if known to this shard, asserting that it matches
    /// an explicitly `requested` placement.
    pub fn lookup(&self, id: &I, requested: Option<ShardId>) -> Option<ShardId> {
        let shard = self.resolve(id)?;
        if let Some(requested) = requested {
            assert_eq!(
                shard, requested,
                "unit {id:?} placed on shard {shard} but requested on shard {requested}"
            );
        }
        Some(shard)
    }

    /// Choose the owner of a new unit (primary only).
    ///
    /// If no shard is `requested`, the least loaded eligible shard is chosen (lowest identifier
    /// on ties). The load of the chosen shard is incremented.
    pub fn assign(&mut self, id: I, requested: Option<ShardId>) -> ShardId {
        let loads = self
            .loads
            .as_mut()
            .expect("only the primary shard can assign units");
        let slot = match self.mappings.entry(id) {
            Entry::Occupied(entry) => panic!("unit {:?} already assigned", entry.key()),
            Entry::Vacant(entry) => entry.insert(NULL_SHARD),
        };
        let (shard, count) = match requested {
            Some(shard) => {
                let count = loads
                    .get_mut(&shard)
                    .unwrap_or_else(|| panic!("shard {shard} is not eligible for placement"));
                (shard, count)
            }
            None => {
                let (shard, count) = loads
                    .iter_mut()
                    .min_by_key(|(_, count)| **count)
                    .expect("no eligible shards");
                (*shard, count)
            }
        };
        *slot = shard;
        *count += 1;
        shard
    }

    /// Record a placement decided by the primary.
    pub fn apply(&mut self, id: I, shard: ShardId) {
        assert!(!self.is_primary(), "primary cannot apply a replicated placement");
        assert_ne!(shard, NULL_SHARD, "cannot apply null placement for unit {id:?}");
        match self.mappings.entry(id) {
            Entry::Occupied(entry) => panic!(
                "unit {:?} already mapped to shard {} on shard {}",
                entry.key(),
                entry.get(),
                self.shard
            ),
            Entry::Vacant(entry) => {
                entry.insert(shard);
            }
        }
    }

    /// Remove the mapping for `id` and decrement the load of its owner (primary only).
    pub fn release(&mut self, id: &I) -> ShardId {
        let loads = self
            .loads
            .as_mut()
            .expect("only the primary shard can release units");
        let shard = self
            .mappings
            .remove(id)
            .unwrap_or_else(|| panic!("unit {id:?} is not mapped"));
        assert_ne!(shard, NULL_SHARD, "unit {id:?} mapped to null shard");
        let count = loads
            .get_mut(&shard)
            .unwrap_or_else(|| panic!("shard {shard} is not eligible for placement"));
        assert!(*count > 0, "load of shard {shard} would underflow");
        *count -= 1;
        shard
    }

    /// Forget a mapping removed by the primary.
    pub fn evict(&mut self, id: &I) -> ShardId {
        let shard = self
            .mappings
            .remove(id)
            .unwrap_or_else(|| panic!("unit {id:?} is not mapped on shard {}", self.shard));
        assert_ne!(shard, NULL_SHARD, "unit {id:?} mapped to null shard");
        shard
    }

    /// Number of units known to this shard.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether no units are known to this shard.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Invoke `f` on every unit known to this shard.
    pub fn for_each(&self, mut f: impl FnMut(&I)) {
        self.mappings.keys().for_each(|id| f(id));
    }

    /// Number of units owned by each eligible shard (primary only).
    pub fn loads(&self) -> Option<&BTreeMap<ShardId, u32>> {
        self.loads.as_ref()
    }
}
