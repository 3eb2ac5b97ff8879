// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::block::Block;
use crate::errors::Error;
use crate::hash::Multihash;

use super::stream::{merge, select};
use super::{BlockStat, BlockStream, ListOptions, Store, StoreExt};

/// Write-through staging layer.
///
/// Puts land in the `buffer` store until [`BufferStore::flush`] copies
/// them to `primary`; blocks over `max_block_size` skip the buffer and
/// go straight to primary. Reads see the union of both sides.
pub struct BufferStore {
    buffer: Arc<dyn Store>,
    primary: Arc<dyn Store>,
    max_block_size: Option<u64>,
}

/// What a flush moved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub flushed: usize,
    pub bytes: u64,
}

impl BufferStore {
    pub fn new(buffer: Arc<dyn Store>, primary: Arc<dyn Store>) -> BufferStore {
        BufferStore {
            buffer,
            primary,
            max_block_size: None,
        }
    }

    /// Blocks larger than this bypass the buffer.
    pub fn with_max_block_size(mut self, max_block_size: u64) -> BufferStore {
        self.max_block_size = Some(max_block_size);
        self
    }

    /// Copy buffered blocks (all of them, or the given subset) to the
    /// primary store, then drop them from the buffer. Not atomic: a
    /// crash mid-flush leaves blocks present on one or both sides and
    /// the next listing presents the union.
    pub async fn flush(&self, ids: Option<&[Multihash]>) -> Result<FlushSummary, Error> {
        let buffered: Vec<Block> = self
            .buffer
            .list(ListOptions::default())
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        let mut summary = FlushSummary::default();
        for block in buffered {
            if let Some(ids) = ids {
                if !ids.contains(block.id()) {
                    continue;
                }
            }
            let id = *block.id();
            let size = block.size();
            self.primary.put(block).await?;
            self.buffer.delete(&id).await?;
            summary.flushed += 1;
            summary.bytes += size;
        }
        Ok(summary)
    }

    /// Drop all buffered blocks without copying them anywhere.
    pub async fn clear(&self) -> Result<(), Error> {
        self.buffer.erase().await
    }
}

#[async_trait]
impl Store for BufferStore {
    fn list(&self, opts: ListOptions) -> BlockStream {
        let merged = merge(vec![
            self.buffer.list(opts.clone()),
            self.primary.list(opts.clone()),
        ]);
        select(opts, merged).boxed()
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        match self.buffer.stat(id).await? {
            Some(stat) => Ok(Some(stat)),
            None => self.primary.stat(id).await,
        }
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        match self.buffer.get(id).await? {
            Some(block) => Ok(Some(block)),
            None => self.primary.get(id).await,
        }
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        // Already durable: return the canonical stored version.
        if self.primary.contains(block.id()).await? {
            if let Some(extant) = self.primary.get(block.id()).await? {
                return Ok(extant);
            }
        }
        let buffered = self
            .max_block_size
            .map_or(true, |max| block.size() <= max);
        if buffered {
            self.buffer.put(block).await
        } else {
            self.primary.put(block).await
        }
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        let buffered = self.buffer.delete(id).await?;
        let primary = self.primary.delete(id).await?;
        Ok(buffered || primary)
    }

    async fn erase(&self) -> Result<(), Error> {
        self.buffer.erase().await?;
        self.primary.erase().await
    }
}
