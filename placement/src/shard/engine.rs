use super::{
    metrics::{self, ShardLabel},
    Config, Mailbox, Message,
};
use crate::{
    coordinator::Coordinator, index::Index, Identifier, ShardId, Unit, PRIMARY_SHARD,
};
use commonware_macros::select;
use commonware_runtime::{Handle, Metrics, Spawner};
use futures::{
    channel::{mpsc, oneshot},
    future::join_all,
    StreamExt,
};
use tracing::{debug, info, trace};

/// Worker that exclusively owns the [Index] and [Coordinator] of one shard.
///
/// Messages are handled one at a time and a handler runs to completion before the next message
/// is received. On the primary, this means a placement decision and its replication to all other
/// shards can never interleave with another placement decision.
pub struct Engine<E: Spawner + Metrics, I: Identifier, U: Unit> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: E,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    shard: ShardId,
    index: Index<I>,
    coordinator: Coordinator<I, U>,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    mailbox_receiver: mpsc::Receiver<Message<I, U>>,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: metrics::Metrics,
}

impl<E: Spawner + Metrics, I: Identifier, U: Unit> Engine<E, I, U> {
    /// Creates the engine for `shard`. Returns the engine and a mailbox for sending messages to it.
    ///
    /// The primary is created without a `primary` mailbox, every other shard with the primary's.
    pub fn new(
        context: E,
        shard: ShardId,
        cfg: &Config,
        primary: Option<&Mailbox<I, U>>,
    ) -> (Self, Mailbox<I, U>) {
        let (sender, mailbox_receiver) = mpsc::channel(cfg.mailbox_size);
        let primary = match primary {
            Some(primary) => {
                assert_ne!(shard, PRIMARY_SHARD, "primary cannot forward to another primary");
                primary.sender.clone()
            }
            None => {
                assert_eq!(shard, PRIMARY_SHARD, "shard {shard} requires a primary");
                sender.clone()
            }
        };
        let mailbox = Mailbox::new(shard, sender, primary);
        let metrics = metrics::Metrics::init(context.clone());

        let result = Self {
            context,
            shard,
            index: Index::new(shard, cfg.min_shard, cfg.shard_limit),
            coordinator: Coordinator::new(),
            mailbox_receiver,
            metrics,
        };

        (result, mailbox)
    }

    /// Starts the engine. `peers` holds the mailboxes of all shards (this one may be included).
    pub fn start(self, peers: Vec<Mailbox<I, U>>) -> Handle<()> {
        self.context.clone().spawn(move |_| self.run(peers))
    }

    /// Inner run loop called by `start`.
    async fn run(mut self, peers: Vec<Mailbox<I, U>>) {
        let shard = self.shard;
        let mut peers: Vec<_> = peers
            .into_iter()
            .filter(|peer| peer.shard() != shard)
            .collect();
        let mut shutdown = self.context.stopped();

        loop {
            select! {
                // Handle shutdown signal
                _ = &mut shutdown => {
                    debug!(shard, "shutdown");
                    break;
                },

                // Handle mailbox messages
                mail = self.mailbox_receiver.next() => {
                    let Some(msg) = mail else {
                        debug!(shard, "mailbox closed");
                        break;
                    };
                    self.handle(msg, &mut peers).await;
                    self.metrics.live.set(self.coordinator.count() as i64);
                    self.metrics.pending.set(self.coordinator.pending().count() as i64);
                    self.metrics.mapped.set(self.index.len() as i64);
                },
            }
        }
    }

    ////////////////////////////////////////
    // Handling
    ////////////////////////////////////////

    async fn handle(&mut self, msg: Message<I, U>, peers: &mut [Mailbox<I, U>]) {
        match msg {
            Message::Lookup {
                id,
                requested,
                responder,
            } => {
                trace!(?id, "mailbox: lookup");
                let _ = responder.send(self.index.lookup(&id, requested));
            }
            Message::Assign {
                id,
                requested,
                responder,
            } => {
                trace!(?id, "mailbox: assign");
                let shard = self.handle_assign(id, requested, peers).await;
                let _ = responder.send(shard);
            }
            Message::Apply {
                id,
                shard,
                responder,
            } => {
                trace!(?id, shard, "mailbox: apply");
                self.index.apply(id, shard);
                let _ = responder.send(());
            }
            Message::Release { id, responder } => {
                trace!(?id, "mailbox: release");
                let shard = self.handle_release(id, peers).await;
                let _ = responder.send(shard);
            }
            Message::Evict { id, responder } => {
                trace!(?id, "mailbox: evict");
                self.index.evict(&id);
                let _ = responder.send(());
            }
            Message::MappedCount { responder } => {
                let _ = responder.send(self.index.len());
            }
            Message::Mapped { responder } => {
                let mut ids = Vec::with_capacity(self.index.len());
                self.index.for_each(|id| ids.push(id.clone()));
                let _ = responder.send(ids);
            }
            Message::Loads { responder } => {
                let _ = responder.send(self.index.loads().cloned());
            }
            Message::Get { id, responder } => {
                trace!(?id, "mailbox: get");
                let _ = responder.send(self.coordinator.get(&id));
            }
            Message::WaitFor { id, responder } => {
                trace!(?id, "mailbox: wait_for");
                self.assert_owned(&id);
                let (waiter, in_progress) = self.coordinator.wait_for(id.clone());
                if !in_progress {
                    debug!(?id, shard = self.shard, "creation started");
                }
                let _ = responder.send((waiter, in_progress));
            }
            Message::SetCreating { id } => {
                trace!(?id, "mailbox: set_creating");
                self.coordinator.set_creating(&id);
            }
            Message::Created { id, unit } => {
                trace!(?id, "mailbox: created");
                self.coordinator.created(id.clone(), unit);
                self.metrics.created.inc();
                debug!(?id, shard = self.shard, "unit created");
            }
            Message::Loaded { id, unit } => {
                trace!(?id, "mailbox: loaded");
                self.assert_owned(&id);
                self.coordinator.loaded(id.clone(), unit);
                self.metrics.loaded.inc();
                debug!(?id, shard = self.shard, "unit loaded");
            }
            Message::CreationCanceled { id } => {
                trace!(?id, "mailbox: creation_canceled");
                self.coordinator.creation_canceled(&id);
                self.metrics.canceled.inc();
                debug!(?id, shard = self.shard, "creation canceled");
            }
            Message::Remove { id } => {
                trace!(?id, "mailbox: remove");
                self.coordinator.remove(&id);
                self.metrics.removed.inc();
                debug!(?id, shard = self.shard, "unit removed");
            }
            Message::Count { responder } => {
                let _ = responder.send(self.coordinator.count());
            }
            Message::Units { responder } => {
                let _ = responder.send(self.coordinator.units().keys().cloned().collect());
            }
            Message::Pending { responder } => {
                let pending = self
                    .coordinator
                    .pending()
                    .map(|(id, creating)| (id.clone(), creating))
                    .collect();
                let _ = responder.send(pending);
            }
        }
    }

    /// Places a new unit and waits for every other shard to apply the placement.
    ///
    /// Returns the existing placement if the unit was placed after the caller looked it up.
    async fn handle_assign(
        &mut self,
        id: I,
        requested: Option<ShardId>,
        peers: &mut [Mailbox<I, U>],
    ) -> ShardId {
        // Another request may have placed the unit after the caller's lookup
        if let Some(shard) = self.index.lookup(&id, requested) {
            trace!(?id, shard, "already assigned");
            return shard;
        }
        let shard = self.index.assign(id.clone(), requested);
        self.metrics
            .units_per_shard
            .get_or_create(&ShardLabel::new(shard))
            .inc();
        info!(?id, shard, ?requested, "assigned unit");

        let mut acks = Vec::with_capacity(peers.len());
        for peer in peers.iter_mut() {
            acks.push(peer.apply(id.clone(), shard).await);
        }
        Self::await_acks(acks).await;
        shard
    }

    /// Removes a placement and waits for every other shard to forget it.
    async fn handle_release(&mut self, id: I, peers: &mut [Mailbox<I, U>]) -> ShardId {
        let shard = self.index.release(&id);
        self.metrics
            .units_per_shard
            .get_or_create(&ShardLabel::new(shard))
            .dec();
        info!(?id, shard, "released unit");

        let mut acks = Vec::with_capacity(peers.len());
        for peer in peers.iter_mut() {
            acks.push(peer.evict(id.clone()).await);
        }
        Self::await_acks(acks).await;
        shard
    }

    async fn await_acks(acks: Vec<oneshot::Receiver<()>>) {
        for ack in join_all(acks).await {
            ack.expect("mailbox closed");
        }
    }

    /// Panics if `id` is known to be owned by another shard.
    fn assert_owned(&self, id: &I) {
        if let Some(owner) = self.index.resolve(id) {
            assert_eq!(
                owner, self.shard,
                "unit {id:?} owned by shard {owner} routed to shard {}",
                self.shard
            );
        }
    }
}
