//! Placement group identifiers.

use std::{fmt, num::ParseIntError, str::FromStr};
use thiserror::Error;

/// Errors that can occur when parsing an [Id].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing '.' between pool and seed")]
    MissingSeparator,
    #[error("invalid pool: {0}")]
    InvalidPool(ParseIntError),
    #[error("invalid seed: {0}")]
    InvalidSeed(ParseIntError),
    #[error("invalid shard: {0}")]
    InvalidShard(ParseIntError),
}

/// Identifier of a placement group, optionally restricted to one shard of an
/// erasure-coded pool.
///
/// Rendered as `<pool>.<seed in hex>` with an `s<shard>` suffix when sharded (`1.1f`, `2.0s3`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    pub pool: u64,
    pub seed: u32,
    pub shard: Option<u8>,
}

impl Id {
    pub fn new(pool: u64, seed: u32) -> Self {
        Self {
            pool,
            seed,
            shard: None,
        }
    }

    pub fn sharded(pool: u64, seed: u32, shard: u8) -> Self {
        Self {
            pool,
            seed,
            shard: Some(shard),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:x}", self.pool, self.seed)?;
        if let Some(shard) = self.shard {
            write!(f, "s{shard}")?;
        }
        Ok(())
    }
}

impl FromStr for Id {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pool, rest) = s.split_once('.').ok_or(ParseError::MissingSeparator)?;
        let pool = pool.parse().map_err(ParseError::InvalidPool)?;
        let (seed, shard) = match rest.split_once('s') {
            Some((seed, shard)) => (seed, Some(shard.parse().map_err(ParseError::InvalidShard)?)),
            None => (rest, None),
        };
        let seed = u32::from_str_radix(seed, 16).map_err(ParseError::InvalidSeed)?;
        Ok(Self { pool, seed, shard })
    }
}
