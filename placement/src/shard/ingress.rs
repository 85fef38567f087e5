use crate::{coordinator::Waiter, Identifier, ShardId, Unit};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use std::{collections::BTreeMap, sync::Arc};

/// Message types that can be sent to a shard [Engine](super::Engine).
pub enum Message<I: Identifier, U: Unit> {
    /// Return the owner of a unit known to this shard, asserting that it matches
    /// the requested placement (if any).
    Lookup {
        id: I,
        requested: Option<ShardId>,
        responder: oneshot::Sender<Option<ShardId>>,
    },

    /// Place a new unit and replicate the placement to all other shards (primary only).
    ///
    /// The responder is only resolved once every shard has applied the placement.
    Assign {
        id: I,
        requested: Option<ShardId>,
        responder: oneshot::Sender<ShardId>,
    },

    /// Record a placement made by the primary.
    Apply {
        id: I,
        shard: ShardId,
        responder: oneshot::Sender<()>,
    },

    /// Remove a placement and replicate the removal to all other shards (primary only).
    Release {
        id: I,
        responder: oneshot::Sender<ShardId>,
    },

    /// Forget a placement removed by the primary.
    Evict {
        id: I,
        responder: oneshot::Sender<()>,
    },

    /// Number of units known to this shard.
    MappedCount { responder: oneshot::Sender<usize> },

    /// All units known to this shard.
    Mapped { responder: oneshot::Sender<Vec<I>> },

    /// Number of units owned by each eligible shard (only answered by the primary).
    Loads {
        responder: oneshot::Sender<Option<BTreeMap<ShardId, u32>>>,
    },

    /// Get a live unit.
    Get {
        id: I,
        responder: oneshot::Sender<Option<Arc<U>>>,
    },

    /// Wait for a unit, starting its creation if it is absent.
    WaitFor {
        id: I,
        responder: oneshot::Sender<(Waiter<U>, bool)>,
    },

    /// Mark a pending creation as being built.
    SetCreating { id: I },

    /// Commit a pending creation.
    Created { id: I, unit: U },

    /// Register a unit that already exists.
    Loaded { id: I, unit: U },

    /// Abort a pending creation.
    CreationCanceled { id: I },

    /// Destroy a live unit.
    Remove { id: I },

    /// Number of live units.
    Count { responder: oneshot::Sender<usize> },

    /// All live units.
    Units { responder: oneshot::Sender<Vec<I>> },

    /// All pending creations and whether they are being built.
    Pending {
        responder: oneshot::Sender<Vec<(I, bool)>>,
    },
}

/// Ingress mailbox for a shard [Engine](super::Engine).
///
/// Index operations that require a placement decision are sent to the primary shard on behalf of
/// the shard this mailbox belongs to.
pub struct Mailbox<I: Identifier, U: Unit> {
    shard: ShardId,
    pub(super) sender: mpsc::Sender<Message<I, U>>,
    primary: mpsc::Sender<Message<I, U>>,
}

impl<I: Identifier, U: Unit> Clone for Mailbox<I, U> {
    fn clone(&self) -> Self {
        Self {
            shard: self.shard,
            sender: self.sender.clone(),
            primary: self.primary.clone(),
        }
    }
}

impl<I: Identifier, U: Unit> Mailbox<I, U> {
    pub(super) fn new(
        shard: ShardId,
        sender: mpsc::Sender<Message<I, U>>,
        primary: mpsc::Sender<Message<I, U>>,
    ) -> Self {
        Self {
            shard,
            sender,
            primary,
        }
    }

    /// The shard this mailbox delivers to.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    async fn ask<R>(&mut self, msg: impl FnOnce(oneshot::Sender<R>) -> Message<I, U>) -> R {
        let (tx, rx) = oneshot::channel();
        self.sender.send(msg(tx)).await.expect("mailbox closed");
        rx.await.expect("mailbox closed")
    }

    async fn tell(&mut self, msg: Message<I, U>) {
        self.sender.send(msg).await.expect("mailbox closed");
    }

    ////////////////////////////////////////
    // Index
    ////////////////////////////////////////

    /// Returns the owner of `id` if this shard knows it.
    pub async fn resolve(&mut self, id: I) -> Option<ShardId> {
        self.ask(|responder| Message::Lookup {
            id,
            requested: None,
            responder,
        })
        .await
    }

    /// Returns the owner of `id`, asking the primary to place it if this shard does not know it.
    ///
    /// If `requested` is provided, the unit is placed on that shard. Requesting a different shard
    /// than the one a unit is already placed on is fatal.
    ///
    /// Concurrent first placements of the same unit (from any shard) resolve to the same owner:
    /// the primary re-checks its index before assigning.
    pub async fn resolve_or_assign(&mut self, id: I, requested: Option<ShardId>) -> ShardId {
        let known = self
            .ask(|responder| Message::Lookup {
                id: id.clone(),
                requested,
                responder,
            })
            .await;
        if let Some(shard) = known {
            return shard;
        }

        let (tx, rx) = oneshot::channel();
        let msg = Message::Assign {
            id,
            requested,
            responder: tx,
        };
        self.primary.send(msg).await.expect("mailbox closed");
        rx.await.expect("mailbox closed")
    }

    /// Remove the placement of `id` from every shard. Returns the shard that owned it.
    pub async fn remove_mapping(&mut self, id: I) -> ShardId {
        let (tx, rx) = oneshot::channel();
        let msg = Message::Release { id, responder: tx };
        self.primary.send(msg).await.expect("mailbox closed");
        rx.await.expect("mailbox closed")
    }

    /// Number of units known to this shard (authoritative on the primary).
    pub async fn mapped_count(&mut self) -> usize {
        self.ask(|responder| Message::MappedCount { responder })
            .await
    }

    /// Invoke `f` on every unit known to this shard.
    pub async fn for_each_mapped(&mut self, f: impl FnMut(I)) {
        self.ask(|responder| Message::Mapped { responder })
            .await
            .into_iter()
            .for_each(f);
    }

    /// Number of units owned by each eligible shard, if this mailbox belongs to the primary.
    pub async fn loads(&mut self) -> Option<BTreeMap<ShardId, u32>> {
        self.ask(|responder| Message::Loads { responder }).await
    }

    pub(super) async fn apply(&mut self, id: I, shard: ShardId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let msg = Message::Apply {
            id,
            shard,
            responder: tx,
        };
        self.tell(msg).await;
        rx
    }

    pub(super) async fn evict(&mut self, id: I) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.tell(Message::Evict { id, responder: tx }).await;
        rx
    }

    ////////////////////////////////////////
    // Coordinator
    ////////////////////////////////////////

    /// Returns the unit if it is live on this shard.
    pub async fn get(&mut self, id: I) -> Option<Arc<U>> {
        self.ask(|responder| Message::Get { id, responder }).await
    }

    /// Returns a future for the unit and whether the caller can skip creating it.
    ///
    /// When `false` is returned, the caller is responsible for building the unit and reporting
    /// the outcome with [Mailbox::created] or [Mailbox::creation_canceled].
    pub async fn wait_for(&mut self, id: I) -> (Waiter<U>, bool) {
        self.ask(|responder| Message::WaitFor { id, responder })
            .await
    }

    /// Mark a pending creation as being built.
    pub async fn set_creating(&mut self, id: I) {
        self.tell(Message::SetCreating { id }).await;
    }

    /// Commit a pending creation.
    pub async fn created(&mut self, id: I, unit: U) {
        self.tell(Message::Created { id, unit }).await;
    }

    /// Register a unit that already exists.
    pub async fn loaded(&mut self, id: I, unit: U) {
        self.tell(Message::Loaded { id, unit }).await;
    }

    /// Abort a pending creation.
    pub async fn creation_canceled(&mut self, id: I) {
        self.tell(Message::CreationCanceled { id }).await;
    }

    /// Destroy a live unit.
    pub async fn remove(&mut self, id: I) {
        self.tell(Message::Remove { id }).await;
    }

    /// Number of live units on this shard.
    pub async fn count(&mut self) -> usize {
        self.ask(|responder| Message::Count { responder }).await
    }

    /// All live units on this shard.
    pub async fn units(&mut self) -> Vec<I> {
        self.ask(|responder| Message::Units { responder }).await
    }

    /// All pending creations on this shard and whether they are being built.
    pub async fn pending(&mut self) -> Vec<(I, bool)> {
        self.ask(|responder| Message::Pending { responder }).await
    }
}
