//! Route requests for units to their owning shard and build missing units.
//!
//! The [Dispatcher] is the entry point for callers that want a unit without caring where it
//! lives. It resolves (or assigns) the owner of the unit, forwards the request to the owner's
//! [Mailbox], and, if the request is the first for a unit that does not exist, builds the unit
//! with an external [Factory] before committing it. Concurrent requests for the same unit share
//! a single creation.

use crate::{shard::Mailbox, Error, Identifier, ShardId, Unit};
use commonware_runtime::{Metrics, Spawner};
use std::{future::Future, sync::Arc};
use tracing::{debug, warn};

/// Builds units on behalf of the [Dispatcher].
pub trait Factory<I: Identifier, U: Unit>: Clone + Send + 'static {
    /// Build unit `id` on `shard`.
    ///
    /// Returns `None` if the unit cannot be built, in which case every waiter observes
    /// [Error::Canceled].
    fn create(&mut self, shard: ShardId, id: I) -> impl Future<Output = Option<U>> + Send;
}

/// Routes requests to the shard owning each unit.
pub struct Dispatcher<E: Spawner + Metrics, I: Identifier, U: Unit, F: Factory<I, U>> {
    context: E,
    shards: Vec<Mailbox<I, U>>,
    factory: F,
}

impl<E: Spawner + Metrics, I: Identifier, U: Unit, F: Factory<I, U>> Clone
    for Dispatcher<E, I, U, F>
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            shards: self.shards.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<E: Spawner + Metrics, I: Identifier, U: Unit, F: Factory<I, U>> Dispatcher<E, I, U, F> {
    /// Create a dispatcher over the mailboxes of all shards (indexed by shard).
    pub fn new(context: E, shards: Vec<Mailbox<I, U>>, factory: F) -> Self {
        assert!(!shards.is_empty(), "no shards");
        Self {
            context,
            shards,
            factory,
        }
    }

    fn shard(&mut self, shard: ShardId) -> &mut Mailbox<I, U> {
        self.shards
            .get_mut(shard as usize)
            .unwrap_or_else(|| panic!("unknown shard {shard}"))
    }

    /// Returns unit `id`, creating it on its owner if it does not exist.
    ///
    /// `from` is the shard the request arrived on. If the unit has not been placed yet, it is
    /// placed on `requested` (or the least loaded shard).
    pub async fn get_or_create(
        &mut self,
        from: ShardId,
        id: I,
        requested: Option<ShardId>,
    ) -> Result<Arc<U>, Error> {
        let owner = self
            .shard(from)
            .resolve_or_assign(id.clone(), requested)
            .await;
        let mut mailbox = self.shard(owner).clone();
        let (waiter, in_progress) = mailbox.wait_for(id.clone()).await;
        if !in_progress {
            // The creation outlives this request so that other waiters are always resolved
            let mut factory = self.factory.clone();
            self.context
                .with_label("creation")
                .spawn(move |_| async move {
                    match factory.create(owner, id.clone()).await {
                        Some(unit) => {
                            debug!(?id, shard = owner, "built unit");
                            mailbox.created(id, unit).await;
                        }
                        None => {
                            warn!(?id, shard = owner, "failed to build unit");
                            mailbox.creation_canceled(id).await;
                        }
                    }
                });
        }
        waiter.await
    }

    /// Register a unit that already exists, placing it first if necessary.
    ///
    /// Returns the shard that owns the unit.
    pub async fn load(
        &mut self,
        from: ShardId,
        id: I,
        requested: Option<ShardId>,
        unit: U,
    ) -> ShardId {
        let owner = self
            .shard(from)
            .resolve_or_assign(id.clone(), requested)
            .await;
        self.shard(owner).loaded(id, unit).await;
        owner
    }

    /// Destroy a live unit and forget its placement on every shard.
    ///
    /// Returns the shard that owned the unit.
    pub async fn destroy(&mut self, from: ShardId, id: I) -> ShardId {
        let owner = self
            .shard(from)
            .resolve(id.clone())
            .await
            .unwrap_or_else(|| panic!("unit {id:?} is not mapped"));
        self.shard(owner).remove(id.clone()).await;
        let released = self.shard(from).remove_mapping(id).await;
        assert_eq!(released, owner, "placement changed while destroying unit");
        owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::{self, Pg},
        shard::{self, Config},
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use futures::future::join_all;

    const U1: u64 = 1;
    const U2: u64 = 2;

    fn setup(
        context: deterministic::Context,
        shards: u32,
    ) -> (
        Dispatcher<deterministic::Context, u64, Pg, mocks::Factory>,
        Vec<Mailbox<u64, Pg>>,
        mocks::Factory,
    ) {
        let cfg = Config {
            shards,
            min_shard: 0,
            shard_limit: shards,
            mailbox_size: 1024,
        };
        let mailboxes = shard::spawn(context.with_label("shards"), cfg);
        let factory = mocks::Factory::new(context.clone());
        let dispatcher = Dispatcher::new(
            context.with_label("dispatcher"),
            mailboxes.clone(),
            factory.clone(),
        );
        (dispatcher, mailboxes, factory)
    }

    #[test_traced]
    fn test_concurrent_requests_share_creation() {
        deterministic::Runner::default().start(|context| async move {
            let (dispatcher, mut mailboxes, factory) = setup(context.clone(), 3);
            assert_eq!(mailboxes[0].resolve_or_assign(U1, Some(1)).await, 1);

            let mut handles = Vec::new();
            for caller in 0..6u32 {
                let mut dispatcher = dispatcher.clone();
                let handle = context
                    .with_label(&format!("caller_{caller}"))
                    .spawn(move |_| async move {
                        dispatcher.get_or_create(caller % 3, U1, None).await
                    });
                handles.push(handle);
            }
            let units = join_all(handles)
                .await
                .into_iter()
                .map(|result| result.unwrap().unwrap())
                .collect::<Vec<_>>();

            assert_eq!(factory.attempts(), 1);
            assert!(units.iter().all(|unit| Arc::ptr_eq(unit, &units[0])));
            assert_eq!(units[0].id, U1);
            assert_eq!(units[0].shard, 1);
            assert_eq!(mailboxes[1].count().await, 1);
            assert!(mailboxes[1].pending().await.is_empty());
        });
    }

    #[test_traced]
    fn test_concurrent_requests_place_once() {
        deterministic::Runner::default().start(|context| async move {
            let (dispatcher, mut mailboxes, factory) = setup(context.clone(), 3);

            let mut handles = Vec::new();
            for caller in 0..6u32 {
                let mut dispatcher = dispatcher.clone();
                let handle = context
                    .with_label(&format!("caller_{caller}"))
                    .spawn(move |_| async move {
                        dispatcher.get_or_create(caller % 3, U2, None).await
                    });
                handles.push(handle);
            }
            let units = join_all(handles)
                .await
                .into_iter()
                .map(|result| result.unwrap().unwrap())
                .collect::<Vec<_>>();

            assert_eq!(factory.attempts(), 1);
            assert!(units.iter().all(|unit| Arc::ptr_eq(unit, &units[0])));
            assert_eq!(units[0].shard, 0);
            let loads = mailboxes[0].loads().await.unwrap();
            assert_eq!(loads.values().sum::<u32>(), 1);
            assert_eq!(loads[&0], 1);
        });
    }

    #[test_traced]
    fn test_failed_creation() {
        deterministic::Runner::default().start(|context| async move {
            let (mut dispatcher, mut mailboxes, factory) = setup(context.clone(), 2);
            factory.fail(U2);

            assert_eq!(
                dispatcher.get_or_create(1, U2, None).await.unwrap_err(),
                Error::Canceled
            );
            let owner = mailboxes[1].resolve(U2).await.unwrap();
            assert!(mailboxes[owner as usize].get(U2).await.is_none());
            assert!(mailboxes[owner as usize].pending().await.is_empty());

            // Retrying starts a new creation
            assert_eq!(
                dispatcher.get_or_create(0, U2, None).await.unwrap_err(),
                Error::Canceled
            );
            assert_eq!(factory.attempts(), 2);
        });
    }

    #[test_traced]
    fn test_load_and_destroy() {
        deterministic::Runner::default().start(|context| async move {
            let (mut dispatcher, mut mailboxes, factory) = setup(context.clone(), 3);
            assert_eq!(dispatcher.load(0, U2, Some(1), Pg::new(U2)).await, 1);

            // Loaded units are served without building them
            let unit = dispatcher.get_or_create(2, U2, None).await.unwrap();
            assert_eq!(unit.id, U2);
            assert_eq!(factory.attempts(), 0);

            assert_eq!(dispatcher.destroy(2, U2).await, 1);
            assert_eq!(mailboxes[1].count().await, 0);
            for mailbox in mailboxes.iter_mut() {
                assert_eq!(mailbox.resolve(U2).await, None);
            }
            assert_eq!(mailboxes[0].loads().await.unwrap()[&1], 0);

            // The unit can be created again after it is destroyed
            let unit = dispatcher.get_or_create(2, U2, None).await.unwrap();
            assert_eq!(unit.shard, 0);
            assert_eq!(factory.attempts(), 1);
        });
    }
}
