//! Per-shard registry of live units and in-flight creations.
//!
//! Each unit owned by a shard is in one of three states:
//!
//! ```txt
//! Absent --wait_for--> Creating --created--> Live --remove--> Absent
//!    |                    |
//!    |                    +--creation_canceled--> Absent
//!    |
//!    +--loaded--> Live
//! ```
//!
//! The first caller to [Coordinator::wait_for] an absent unit is told to create it. Every other
//! caller attaches to the same shared future, so a unit is never created twice and all waiters
//! observe the same outcome. A unit can never be both live and creating.

use crate::{Error, Identifier, Unit};
use futures::{
    channel::oneshot,
    future::{self, BoxFuture, Shared},
    FutureExt,
};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
};

/// Future resolving to a unit once its creation commits, or [Error::Canceled] if it is aborted.
pub type Waiter<U> = BoxFuture<'static, Result<Arc<U>, Error>>;

/// Bookkeeping for a unit that is being created.
struct Creation<U: Unit> {
    /// Resolves every waiter. Dropping it cancels them.
    sender: oneshot::Sender<Arc<U>>,
    receiver: Shared<oneshot::Receiver<Arc<U>>>,

    /// Whether some component has started building the unit.
    creating: bool,
}

impl<U: Unit> Creation<U> {
    fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender,
            receiver: receiver.shared(),
            creating: true,
        }
    }

    fn waiter(&self) -> Waiter<U> {
        self.receiver
            .clone()
            .map(|result| result.map_err(|_| Error::Canceled))
            .boxed()
    }
}

/// Live units and pending creations of a single shard.
pub struct Coordinator<I: Identifier, U: Unit> {
    live: BTreeMap<I, Arc<U>>,
    pending: BTreeMap<I, Creation<U>>,
}

impl<I: Identifier, U: Unit> Default for Coordinator<I, U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Identifier, U: Unit> Coordinator<I, U> {
    pub fn new() -> Self {
        Self {
            live: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Returns the unit if it is live.
    pub fn get(&self, id: &I) -> Option<Arc<U>> {
        self.live.get(id).cloned()
    }

    /// Returns a future for the unit and whether the caller can skip creating it.
    ///
    /// If the unit is absent, it transitions to creating and `false` is returned: the caller
    /// must build the unit and then call [Coordinator::created] or
    /// [Coordinator::creation_canceled]. Otherwise, `true` is returned and the future either
    /// is already resolved (live) or resolves with the in-flight creation.
    pub fn wait_for(&mut self, id: I) -> (Waiter<U>, bool) {
        if let Some(unit) = self.live.get(&id) {
            return (future::ready(Ok(unit.clone())).boxed(), true);
        }
        match self.pending.entry(id) {
            Entry::Occupied(entry) => (entry.get().waiter(), true),
            Entry::Vacant(entry) => (entry.insert(Creation::new()).waiter(), false),
        }
    }

    /// Mark a pending creation as actively being built.
    ///
    /// [Coordinator::wait_for] already sets the flag when it starts a creation. This is for a
    /// loader that attaches to a creation someone else started and must not build it again.
    pub fn set_creating(&mut self, id: &I) {
        let creation = self
            .pending
            .get_mut(id)
            .unwrap_or_else(|| panic!("unit {id:?} is not pending creation"));
        creation.creating = true;
    }

    /// Commit the creation of a unit, resolving all of its waiters.
    pub fn created(&mut self, id: I, unit: U) -> Arc<U> {
        let unit = Arc::new(unit);
        match self.live.entry(id) {
            Entry::Occupied(entry) => panic!("unit {:?} already live", entry.key()),
            Entry::Vacant(entry) => {
                if let Some(creation) = self.pending.remove(entry.key()) {
                    let _ = creation.sender.send(unit.clone());
                }
                entry.insert(unit.clone());
            }
        }
        unit
    }

    /// Register a unit that already exists (for example, read back from storage).
    pub fn loaded(&mut self, id: I, unit: U) -> Arc<U> {
        assert!(
            !self.pending.contains_key(&id),
            "unit {id:?} loaded while pending creation"
        );
        let unit = Arc::new(unit);
        match self.live.entry(id) {
            Entry::Occupied(entry) => panic!("unit {:?} already live", entry.key()),
            Entry::Vacant(entry) => {
                entry.insert(unit.clone());
            }
        }
        unit
    }

    /// Abort a pending creation, resolving all of its waiters with [Error::Canceled].
    pub fn creation_canceled(&mut self, id: &I) {
        self.pending
            .remove(id)
            .unwrap_or_else(|| panic!("unit {id:?} is not pending creation"));
    }

    /// Destroy a live unit.
    ///
    /// Outstanding handles keep the unit alive after it is removed.
    pub fn remove(&mut self, id: &I) -> Arc<U> {
        self.live
            .remove(id)
            .unwrap_or_else(|| panic!("unit {id:?} is not live"))
    }

    /// Number of live units.
    pub fn count(&self) -> usize {
        self.live.len()
    }

    /// All live units.
    pub fn units(&self) -> &BTreeMap<I, Arc<U>> {
        &self.live
    }

    /// All pending creations and whether they are being built.
    pub fn pending(&self) -> impl Iterator<Item = (&I, bool)> + '_ {
        self.pending
            .iter()
            .map(|(id, creation)| (id, creation.creating))
    }
}
