// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod buffer;
mod cache;
mod dispatch;
mod file;
mod memory;
mod meter;
mod replica;
pub mod stream;
mod summary;

pub use buffer::{BufferStore, FlushSummary};
pub use cache::CacheStore;
pub use dispatch::initialize;
pub use file::{FileStore, FileStoreConfig, ORIGIN_META};
pub use memory::MemoryStore;
pub use meter::{MeterEvent, MeteredStore, Recorder};
pub use replica::ReplicaStore;
pub use summary::Summary;

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::block::Block;
use crate::errors::Error;
use crate::hash::{hex_id, is_hex_boundary, Code, Multihash};

/// A listing of blocks in ascending hex-id order. Errors are in-band
/// and terminal: after yielding an `Err` the stream closes.
pub type BlockStream = BoxStream<'static, Result<Block, Error>>;

/// Options bounding a listing.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Only emit ids hashed with this algorithm.
    pub algorithm: Option<Code>,
    /// Exclusive lower bound on the hex id; may be a partial prefix.
    pub after: Option<String>,
    /// Exclusive upper bound on the hex id; may be a partial prefix.
    pub before: Option<String>,
    /// Emit at most this many blocks.
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn algorithm(mut self, algorithm: Code) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn before(mut self, before: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(after) = &self.after {
            if !is_hex_boundary(after) {
                return Err(Error::InvalidArgument(format!(
                    "list bound `after` is not lowercase hex: {after:?}"
                )));
            }
        }
        if let Some(before) = &self.before {
            if !is_hex_boundary(before) {
                return Err(Error::InvalidArgument(format!(
                    "list bound `before` is not lowercase hex: {before:?}"
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidArgument(
                "list limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Metadata about a stored block, without its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockStat {
    pub id: Multihash,
    pub size: u64,
    pub stored_at: SystemTime,
}

impl BlockStat {
    pub fn hex_id(&self) -> String {
        hex_id(&self.id)
    }
}

/// The uniform asynchronous store protocol.
///
/// A store holds a set of blocks keyed by id. Mutations are
/// per-block: `put` is idempotent, `delete` reports presence, and no
/// atomicity is promised across blocks. Listings are streams in
/// ascending hex-id order with in-band terminal errors.
#[async_trait]
pub trait Store: Send + Sync {
    /// List stored blocks in ascending hex-id order, bounded by `opts`.
    fn list(&self, opts: ListOptions) -> BlockStream;

    /// Metadata for a block, or `None` if absent.
    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error>;

    /// The stored block, or `None` if absent. The returned block's id
    /// always equals the requested id.
    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error>;

    /// Store a block. Idempotent: putting an id that is already
    /// present returns the extant stored block and may discard the
    /// input content. The returned block is the canonical stored
    /// version with its `stored_at` populated.
    async fn put(&self, block: Block) -> Result<Block, Error>;

    /// Remove a block. True iff it was present.
    async fn delete(&self, id: &Multihash) -> Result<bool, Error>;

    /// Remove all blocks. The default emulates via list + delete;
    /// stores with a cheaper native path override it.
    async fn erase(&self) -> Result<(), Error> {
        let mut listing = self.list(ListOptions::default());
        while let Some(block) = listing.next().await {
            let block = block?;
            self.delete(block.id()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Store + ?Sized> Store for Arc<T> {
    fn list(&self, opts: ListOptions) -> BlockStream {
        (**self).list(opts)
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        (**self).stat(id).await
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        (**self).get(id).await
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        (**self).put(block).await
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        (**self).delete(id).await
    }

    async fn erase(&self) -> Result<(), Error> {
        (**self).erase().await
    }
}

/// Validated entry points layered over any [`Store`]. This is the
/// public facade: argument errors fail fast here, before any I/O.
#[async_trait]
pub trait StoreExt: Store {
    /// List with validated options.
    fn list_blocks(&self, opts: ListOptions) -> Result<BlockStream, Error> {
        opts.validate()?;
        Ok(self.list(opts))
    }

    /// `get` plus the id-match contract check. A store returning a
    /// block under the wrong id is a programming error in the store.
    async fn get_checked(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        match self.get(id).await? {
            Some(block) if block.id() != id => Err(Error::Other(format!(
                "store returned block {} for requested id {}",
                block.hex_id(),
                hex_id(id)
            ))),
            other => Ok(other),
        }
    }

    /// True iff a block with this id is present.
    async fn contains(&self, id: &Multihash) -> Result<bool, Error> {
        Ok(self.stat(id).await?.is_some())
    }

    /// Drive a bounded listing into an aggregate [`Summary`].
    async fn scan(&self, opts: ListOptions) -> Result<Summary, Error> {
        opts.validate()?;
        let mut summary = Summary::default();
        let mut listing = self.list(opts);
        while let Some(block) = listing.next().await {
            summary.update(block?.size());
        }
        Ok(summary)
    }
}

impl<T: Store + ?Sized> StoreExt for T {}
