//! Run one [Engine] per shard and connect them through their [Mailbox]es.
//!
//! # Overview
//!
//! Each shard is served by an [Engine] that exclusively owns the shard's
//! [Index](crate::index::Index) and [Coordinator](crate::coordinator::Coordinator). No state is
//! shared between engines: every interaction, including those between shards, is a message.
//!
//! # Placement
//!
//! A [Mailbox::resolve_or_assign] first asks its own shard for the owner of a unit. If the shard
//! does not know the unit, the request is forwarded to the [PRIMARY_SHARD](crate::PRIMARY_SHARD),
//! which chooses the owner (the least loaded eligible shard, unless one is requested), then sends
//! the decision to every other shard and waits for all of them to apply it before responding. A
//! caller can therefore resolve the unit on any shard as soon as the request returns.
//!
//! Requests for the same unit may race to the primary from any shard. The primary checks its own
//! index first, so only the earliest request places the unit and the rest observe its placement.
//!
//! [Mailbox::remove_mapping] follows the same path to forget a placement everywhere.
//!
//! Only the primary ever waits on another engine, so the fan-out cannot deadlock.

mod config;
pub use config::Config;
mod engine;
pub use engine::Engine;
mod ingress;
pub use ingress::Mailbox;
pub(crate) use ingress::Message;
mod metrics;

use crate::{Identifier, Unit, PRIMARY_SHARD};
use commonware_runtime::{Metrics, Spawner};

/// Start one engine per shard, with shard 0 as primary.
///
/// Returns the mailboxes of all shards, indexed by shard.
pub fn spawn<E, I, U>(context: E, cfg: Config) -> Vec<Mailbox<I, U>>
where
    E: Spawner + Metrics,
    I: Identifier,
    U: Unit,
{
    cfg.assert();

    let (primary, primary_mailbox) = Engine::new(
        context.with_label(&format!("shard_{PRIMARY_SHARD}")),
        PRIMARY_SHARD,
        &cfg,
        None,
    );
    let mut engines = vec![primary];
    let mut mailboxes = vec![primary_mailbox.clone()];
    for shard in (PRIMARY_SHARD + 1)..cfg.shards {
        let (engine, mailbox) = Engine::new(
            context.with_label(&format!("shard_{shard}")),
            shard,
            &cfg,
            Some(&primary_mailbox),
        );
        engines.push(engine);
        mailboxes.push(mailbox);
    }
    for engine in engines {
        engine.start(mailboxes.clone());
    }
    mailboxes
}
