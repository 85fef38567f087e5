//! Assign units of work to shards and coordinate their creation.
//!
//! # Overview
//!
//! A sharded node runs one single-threaded worker per core (a "shard"). Each stable unit of work
//! (for example, a placement group) is owned by exactly one shard for its entire lifetime. This
//! crate provides the two pieces required to make that ownership consistent without locks:
//!
//! - [index::Index]: the per-shard view of the unit-to-shard mapping. Every shard keeps a local
//!   cache that can be read without coordination. All placement decisions are made by the
//!   [PRIMARY_SHARD], which also tracks how many units each eligible shard owns, and are then
//!   fanned out to every other shard.
//! - [coordinator::Coordinator]: the per-shard registry of live units and in-flight creations.
//!   Any number of callers may wait on a unit that does not exist yet; exactly one of them is
//!   told to create it and all of them observe the same outcome.
//!
//! Both are owned by a [shard::Engine], which processes requests from its [shard::Mailbox]
//! serially. Cross-shard effects (assignment, fan-out, removal) are expressed as messages, so no
//! state is ever shared between shards. The [dispatch::Dispatcher] ties the pieces together for
//! callers that simply want a unit, routing each request to the owning shard and invoking an
//! external [dispatch::Factory] when a unit must be built.
//!
//! # Failure Model
//!
//! Violations of the placement protocol (assigning a unit twice, committing a creation twice,
//! removing a unit that is not live, underflowing a load counter) are bugs in the caller or
//! corruption of the index. They are never returned as errors: the shard panics. The only
//! recoverable outcome is [Error::Canceled], returned to every waiter of a creation that was
//! aborted.
//!
//! # Status
//!
//! `commonware-placement` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use std::fmt::Debug;
use thiserror::Error;

pub mod coordinator;
pub mod dispatch;
pub mod index;
pub mod pg;
pub mod shard;

#[cfg(test)]
pub mod mocks;

/// Identifier of a shard (one per core).
pub type ShardId = u32;

/// Sentinel for a shard that has not been assigned.
pub const NULL_SHARD: ShardId = ShardId::MAX;

/// The shard that makes all placement decisions and tracks per-shard load.
pub const PRIMARY_SHARD: ShardId = 0;

/// Errors that can be observed by callers waiting on a unit.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("creation canceled")]
    Canceled,
}

/// Identifier of a unit tracked by the index and coordinator.
///
/// Identifiers are immutable, totally ordered, and cheap enough to clone into messages.
pub trait Identifier: Clone + Debug + Ord + Send + Sync + 'static {}

impl<T> Identifier for T where T: Clone + Debug + Ord + Send + Sync + 'static {}

/// A materialized unit owned by a [coordinator::Coordinator].
///
/// Callers only ever receive shared handles (`Arc<U>`) to a unit.
pub trait Unit: Send + Sync + 'static {}

impl<T> Unit for T where T: Send + Sync + 'static {}
