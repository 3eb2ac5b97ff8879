// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The block value: an immutable byte sequence addressed by the
//! multihash of its content.
//!
//! Blocks compare equal on `(id, size)` alone; the storage timestamp
//! and attached metadata are carried along but never participate in
//! equality or ordering. "Updating" a block means producing a new
//! value.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::content::{Content, ContentStream};
use crate::errors::Error;
use crate::hash::{hex_id, Code, Multihash, MultihashDigest, StreamHasher};

const READ_CHUNK: usize = 8 * 1024;

/// An immutable block of content identified by its multihash.
#[derive(Clone, Debug)]
pub struct Block {
    id: Multihash,
    hex: String,
    size: u64,
    stored_at: SystemTime,
    content: Content,
    meta: BTreeMap<String, String>,
}

impl Block {
    /// Trusted constructor: the caller asserts that `content` holds
    /// exactly `size` bytes hashing to `id`. Stores use this when
    /// returning blocks they already verified on the way in.
    pub fn with_id(id: Multihash, size: u64, content: Content) -> Block {
        debug_assert!(size > 0, "blocks are never empty");
        Block {
            hex: hex_id(&id),
            id,
            size,
            stored_at: SystemTime::now(),
            content,
            meta: BTreeMap::new(),
        }
    }

    /// Consume `source` into memory and produce a loaded block hashed
    /// with `code`. Returns `None` for an empty source; empty content
    /// is never a block.
    pub async fn read<R>(mut source: R, code: Code) -> Result<Option<Block>, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await?;
        if buf.is_empty() {
            return Ok(None);
        }
        let id = code.digest(&buf);
        let size = buf.len() as u64;
        Ok(Some(Block::with_id(id, size, Content::inline(buf.into()))))
    }

    /// Hash a file in one streaming pass and produce a lazy block whose
    /// reader opens a fresh file stream. Returns `None` for an empty
    /// file.
    pub async fn from_file(path: impl Into<PathBuf>, code: Code) -> Result<Option<Block>, Error> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        let size = metadata.len();
        if size == 0 {
            return Ok(None);
        }

        let mut file = tokio::fs::File::open(&path).await?;
        let mut hasher = StreamHasher::new(code)?;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
        }
        let id = hasher.finalize();

        let stored_at = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        let block = Block::with_id(id, size, file_content(path))
            .with_stored_at(stored_at);
        Ok(Some(block))
    }

    pub fn id(&self) -> &Multihash {
        &self.id
    }

    /// Canonical lowercase hex encoding of the id.
    pub fn hex_id(&self) -> &str {
        &self.hex
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stored_at(&self) -> SystemTime {
        self.stored_at
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Store-specific attributes. Never affect equality.
    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn with_stored_at(mut self, stored_at: SystemTime) -> Block {
        self.stored_at = stored_at;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Block {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// True iff the content is resident in memory.
    pub fn is_loaded(&self) -> bool {
        self.content.is_inline()
    }

    /// Open a fresh stream over the whole content.
    pub async fn open(&self) -> Result<ContentStream, Error> {
        self.content.open().await
    }

    /// Open a fresh stream over `[start, end)` of the content.
    /// `start` is inclusive, `end` exclusive, both within `[0, size]`.
    pub async fn open_range(&self, start: u64, end: u64) -> Result<ContentStream, Error> {
        if start >= self.size {
            return Err(Error::InvalidArgument(format!(
                "range start {start} out of bounds for block of {} bytes",
                self.size
            )));
        }
        if end == 0 || end > self.size {
            return Err(Error::InvalidArgument(format!(
                "range end {end} out of bounds for block of {} bytes",
                self.size
            )));
        }
        if start >= end {
            return Err(Error::InvalidArgument(format!(
                "range start {start} not before end {end}"
            )));
        }
        self.content.open_range(start, end).await
    }

    /// Re-read the content, counting bytes and recomputing the digest.
    /// Fails if either disagrees with the block's identity.
    pub async fn validate(&self) -> Result<(), Error> {
        let mut hasher = StreamHasher::for_id(&self.id)?;
        let mut stream = self.content.open().await?;
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut count = 0u64;
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            count += n as u64;
            hasher.update(&chunk[..n]);
        }
        if count != self.size {
            return Err(Error::invalid_block(
                &self.hex,
                format!("content is {count} bytes, declared {}", self.size),
            ));
        }
        let recomputed = hasher.finalize();
        if recomputed != self.id {
            return Err(Error::invalid_block(
                &self.hex,
                format!("content hashes to {}", hex_id(&recomputed)),
            ));
        }
        Ok(())
    }

    /// A loaded equivalent of this block: identity for loaded blocks,
    /// a full content read for lazy ones.
    pub async fn load(&self) -> Result<Block, Error> {
        if self.is_loaded() {
            return Ok(self.clone());
        }
        let bytes = self.content.read_all().await?;
        Ok(Block {
            id: self.id,
            hex: self.hex.clone(),
            size: self.size,
            stored_at: self.stored_at,
            content: Content::inline(bytes),
            meta: self.meta.clone(),
        })
    }

    /// Read the whole content into memory.
    pub async fn read_all(&self) -> Result<Bytes, Error> {
        self.content.read_all().await
    }

    /// Pick the preferred representation of the same block: the loaded
    /// one if either is loaded, otherwise `stored`.
    pub fn preferred(original: Block, stored: Block) -> Block {
        debug_assert_eq!(original, stored);
        if stored.is_loaded() || !original.is_loaded() {
            stored
        } else {
            original
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.size == other.size
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.size.hash(state);
    }
}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hex
            .cmp(&other.hex)
            .then_with(|| self.size.cmp(&other.size))
    }
}

/// Lazy content backed by a file path; every open is a fresh handle.
pub(crate) fn file_content(path: PathBuf) -> Content {
    Content::deferred(move || {
        let path = path.clone();
        async move {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(file) as ContentStream)
        }
        .boxed()
    })
}

/// Read `source` to its end, hash it and wrap it as a loaded block.
/// Convenience over [`Block::read`] for in-memory content.
pub fn block_from_bytes(data: impl Into<Bytes>, code: Code) -> Option<Block> {
    let data: Bytes = data.into();
    if data.is_empty() {
        return None;
    }
    let id = code.digest(&data);
    let size = data.len() as u64;
    Some(Block::with_id(id, size, Content::inline(data)))
}
