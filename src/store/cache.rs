// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::block::Block;
use crate::errors::Error;
use crate::hash::Multihash;

use super::stream::{merge, select};
use super::{BlockStat, BlockStream, ListOptions, Store};

/// Caching layer over a primary store.
///
/// Admitted blocks are copied into the `cache` store and tracked in a
/// priority map from id to `(tick, size)`; lower ticks are older. The
/// total of cached sizes never settles above `size_limit` — admission
/// reaps the oldest entries first. A read hit refreshes the entry's
/// tick, making eviction LRU.
pub struct CacheStore {
    primary: Arc<dyn Store>,
    cache: Arc<dyn Store>,
    size_limit: u64,
    max_block_size: Option<u64>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("size_limit", &self.size_limit)
            .field("max_block_size", &self.max_block_size)
            .finish()
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    by_tick: BTreeMap<u64, String>,
    total: u64,
    tick: u64,
}

struct CacheEntry {
    id: Multihash,
    tick: u64,
    size: u64,
}

impl CacheState {
    fn insert(&mut self, hex: String, id: Multihash, size: u64) {
        if let Some(old) = self.entries.remove(&hex) {
            self.by_tick.remove(&old.tick);
            self.total -= old.size;
        }
        let tick = self.next_tick();
        self.by_tick.insert(tick, hex.clone());
        self.entries.insert(hex, CacheEntry { id, tick, size });
        self.total += size;
    }

    fn touch(&mut self, hex: &str) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(hex) {
            self.by_tick.remove(&entry.tick);
            entry.tick = tick;
            self.by_tick.insert(tick, hex.to_string());
        }
    }

    fn remove(&mut self, hex: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(hex)?;
        self.by_tick.remove(&entry.tick);
        self.total -= entry.size;
        Some(entry)
    }

    /// Oldest entry, removed from the accounting immediately so a
    /// concurrent reap cannot free it twice.
    fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let (_, hex) = self.by_tick.pop_first()?;
        let entry = self.entries.remove(&hex)?;
        self.total -= entry.size;
        Some(entry)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

impl CacheStore {
    /// Assemble the layer and seed the priority map by scanning the
    /// cache store. Entries found over budget are reaped before the
    /// store is handed out.
    pub async fn open(
        primary: Arc<dyn Store>,
        cache: Arc<dyn Store>,
        size_limit: u64,
        max_block_size: Option<u64>,
    ) -> Result<CacheStore, Error> {
        if size_limit == 0 {
            return Err(Error::MisconfiguredStore(
                "cache size limit must be positive".into(),
            ));
        }
        let store = CacheStore {
            primary,
            cache,
            size_limit,
            max_block_size,
            state: Mutex::new(CacheState::default()),
        };

        {
            let mut listing = store.cache.list(ListOptions::default());
            let mut state = CacheState::default();
            while let Some(block) = listing.next().await {
                let block = block?;
                state.insert(block.hex_id().to_string(), *block.id(), block.size());
            }
            *store.state.lock() = state;
        }
        store.reap(0).await;

        Ok(store)
    }

    /// Bytes currently admitted to the cache.
    pub fn total_cached(&self) -> u64 {
        self.state.lock().total
    }

    /// Admission policy: cache the block if it fits, reaping older
    /// entries to make room. Failures are logged and ignored — the
    /// cache never gets in the way of the primary path.
    async fn maybe_cache(&self, block: &Block) -> Option<Block> {
        let size = block.size();
        if size > self.size_limit {
            return None;
        }
        if self.max_block_size.is_some_and(|max| size > max) {
            return None;
        }

        self.reap(size).await;
        match self.cache.put(block.clone()).await {
            Ok(stored) => {
                self.state
                    .lock()
                    .insert(block.hex_id().to_string(), *block.id(), size);
                Some(stored)
            }
            Err(e) => {
                warn!(id = block.hex_id(), "cache admission failed: {e}");
                None
            }
        }
    }

    /// Evict lowest-tick entries until `need` more bytes fit in the
    /// budget. Accounting happens under the state lock; the backing
    /// deletes happen between lock acquisitions.
    async fn reap(&self, need: u64) {
        loop {
            let victim = {
                let mut state = self.state.lock();
                if state.total + need <= self.size_limit {
                    break;
                }
                state.pop_oldest()
            };
            let Some(victim) = victim else { break };
            debug!(size = victim.size, "reaping cached block");
            if let Err(e) = self.cache.delete(&victim.id).await {
                warn!("failed to delete reaped block: {e}");
            }
        }
    }
}

#[async_trait]
impl Store for CacheStore {
    fn list(&self, opts: ListOptions) -> BlockStream {
        let merged = merge(vec![
            self.cache.list(opts.clone()),
            self.primary.list(opts.clone()),
        ]);
        select(opts, merged).boxed()
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        match self.cache.stat(id).await? {
            Some(stat) => Ok(Some(stat)),
            None => self.primary.stat(id).await,
        }
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        if let Some(hit) = self.cache.get(id).await? {
            self.state.lock().touch(hit.hex_id());
            return Ok(Some(hit));
        }
        match self.primary.get(id).await? {
            Some(block) => {
                self.maybe_cache(&block).await;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        let outgoing = match self.maybe_cache(&block).await {
            Some(cached) => Block::preferred(block, cached),
            None => block,
        };
        self.primary.put(outgoing).await
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        self.state.lock().remove(&crate::hash::hex_id(id));
        let cached = self.cache.delete(id).await?;
        let primary = self.primary.delete(id).await?;
        Ok(cached || primary)
    }

    async fn erase(&self) -> Result<(), Error> {
        self.cache.erase().await?;
        self.primary.erase().await?;
        *self.state.lock() = CacheState::default();
        Ok(())
    }
}
