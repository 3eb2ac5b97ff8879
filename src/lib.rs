// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Content-addressable block storage.
//!
//! Immutable byte sequences (blocks) are identified by the multihash
//! of their content, persisted through pluggable asynchronous stores
//! and composed through layers that add staging ([`BufferStore`]),
//! caching ([`CacheStore`]), replication ([`ReplicaStore`]) and
//! instrumentation ([`MeteredStore`]).
//!
//! ```no_run
//! use grove::{block_from_bytes, Code, MemoryStore, Store};
//!
//! # async fn demo() -> Result<(), grove::Error> {
//! let store = MemoryStore::default();
//! let block = block_from_bytes(&b"hello, blocks!"[..], Code::Sha2_256).unwrap();
//! let stored = store.put(block).await?;
//! assert!(store.get(stored.id()).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod block;
mod content;
mod errors;
mod hash;
mod store;

pub use block::{block_from_bytes, Block};
pub use content::{Content, ContentOpener, ContentStream};
pub use errors::Error;
pub use hash::{
    algorithm_by_name, algorithm_name, hex_id, is_hex_boundary, parse_hex_id, Code, Multihash,
    MultihashDigest, StreamHasher,
};
pub use store::{
    initialize, stream, BlockStat, BlockStream, BufferStore, CacheStore, FileStore,
    FileStoreConfig, FlushSummary, ListOptions, MemoryStore, MeterEvent, MeteredStore, Recorder,
    ReplicaStore, Store, StoreExt, Summary, ORIGIN_META,
};
