// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use parking_lot::RwLock;

use crate::block::Block;
use crate::content::Content;
use crate::errors::Error;
use crate::hash::Multihash;

use super::stream::select;
use super::{BlockStat, BlockStream, ListOptions, Store};

/// The in-memory reference store: a sorted map from hex id to loaded
/// content behind a read-write lock. Cheap to clone; clones share the
/// same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    blocks: Arc<RwLock<BTreeMap<String, MemoryEntry>>>,
}

#[derive(Clone, Debug)]
struct MemoryEntry {
    id: Multihash,
    data: Bytes,
    stored_at: SystemTime,
}

impl MemoryEntry {
    fn to_block(&self) -> Block {
        Block::with_id(
            self.id,
            self.data.len() as u64,
            Content::inline(self.data.clone()),
        )
        .with_stored_at(self.stored_at)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn list(&self, opts: ListOptions) -> BlockStream {
        // Snapshot under the read lock; the listing does not observe
        // later mutations.
        let snapshot: Vec<Block> = {
            let blocks = self.blocks.read();
            blocks.values().map(MemoryEntry::to_block).collect()
        };
        select(opts, stream::iter(snapshot.into_iter().map(Ok))).boxed()
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        let hex = crate::hash::hex_id(id);
        Ok(self.blocks.read().get(&hex).map(|entry| BlockStat {
            id: entry.id,
            size: entry.data.len() as u64,
            stored_at: entry.stored_at,
        }))
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        let hex = crate::hash::hex_id(id);
        Ok(self.blocks.read().get(&hex).map(MemoryEntry::to_block))
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        // Load lazy content outside the lock; recomputes the size.
        let loaded = block.load().await?;
        let data = loaded.read_all().await?;
        if data.is_empty() {
            return Err(Error::invalid_block(loaded.hex_id(), "empty content"));
        }

        let hex = loaded.hex_id().to_string();
        let mut blocks = self.blocks.write();
        if let Some(extant) = blocks.get(&hex) {
            return Ok(extant.to_block());
        }
        let entry = MemoryEntry {
            id: *loaded.id(),
            data,
            stored_at: SystemTime::now(),
        };
        let stored = entry.to_block();
        blocks.insert(hex, entry);
        Ok(stored)
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        let hex = crate::hash::hex_id(id);
        Ok(self.blocks.write().remove(&hex).is_some())
    }

    async fn erase(&self) -> Result<(), Error> {
        self.blocks.write().clear();
        Ok(())
    }
}
