//! Mock units and factories for testing.

use crate::{dispatch, ShardId, NULL_SHARD};
use commonware_runtime::{deterministic, Clock};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Time taken by [Factory] to build a unit.
const BUILD_TIME: Duration = Duration::from_millis(10);

/// A placement group that only remembers where it was built.
#[derive(Debug, PartialEq, Eq)]
pub struct Pg {
    pub id: u64,
    pub shard: ShardId,
}

impl Pg {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            shard: NULL_SHARD,
        }
    }
}

/// Builds [Pg]s after a short delay, failing for selected identifiers.
#[derive(Clone)]
pub struct Factory {
    context: deterministic::Context,
    attempts: Arc<Mutex<usize>>,
    failing: Arc<Mutex<BTreeSet<u64>>>,
}

impl Factory {
    pub fn new(context: deterministic::Context) -> Self {
        Self {
            context,
            attempts: Arc::default(),
            failing: Arc::default(),
        }
    }

    /// Fail every future attempt to build `id`.
    pub fn fail(&self, id: u64) {
        self.failing.lock().unwrap().insert(id);
    }

    /// Number of build attempts so far.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl dispatch::Factory<u64, Pg> for Factory {
    async fn create(&mut self, shard: ShardId, id: u64) -> Option<Pg> {
        *self.attempts.lock().unwrap() += 1;
        self.context.sleep(BUILD_TIME).await;
        let fail = self.failing.lock().unwrap().contains(&id);
        (!fail).then_some(Pg { id, shard })
    }
}
