// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::StreamExt;

use crate::block::Block;
use crate::errors::Error;
use crate::hash::Multihash;

use super::stream::{merge, select};
use super::{BlockStat, BlockStream, ListOptions, Store};

/// N-way replicated store.
///
/// Reads walk the replicas in order and return the first hit; writes
/// land on the first replica and fan out to the rest in parallel,
/// completing only when every replica holds the block. A failed
/// fan-out write fails the call without rolling back the replicas
/// that succeeded.
pub struct ReplicaStore {
    stores: Vec<Arc<dyn Store>>,
}

impl ReplicaStore {
    pub fn new(stores: Vec<Arc<dyn Store>>) -> Result<ReplicaStore, Error> {
        if stores.is_empty() {
            return Err(Error::MisconfiguredStore(
                "replica store needs at least one inner store".into(),
            ));
        }
        Ok(ReplicaStore { stores })
    }
}

#[async_trait]
impl Store for ReplicaStore {
    fn list(&self, opts: ListOptions) -> BlockStream {
        let listings = self
            .stores
            .iter()
            .map(|store| store.list(opts.clone()))
            .collect();
        select(opts, merge(listings)).boxed()
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        for store in &self.stores {
            if let Some(stat) = store.stat(id).await? {
                return Ok(Some(stat));
            }
        }
        Ok(None)
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        for store in &self.stores {
            if let Some(block) = store.get(id).await? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        let (first, rest) = self.stores.split_first().expect("validated non-empty");
        let stored = first.put(block.clone()).await?;
        // Prefer a loaded representation for the fan-out so lazy
        // content is not re-read once per replica.
        let copy = Block::preferred(block, stored.clone());
        try_join_all(rest.iter().map(|store| store.put(copy.clone()))).await?;
        Ok(stored)
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        let results = try_join_all(self.stores.iter().map(|store| store.delete(id))).await?;
        Ok(results.into_iter().any(|deleted| deleted))
    }

    async fn erase(&self) -> Result<(), Error> {
        try_join_all(self.stores.iter().map(|store| store.erase())).await?;
        Ok(())
    }
}
