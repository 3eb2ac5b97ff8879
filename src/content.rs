// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block content readers.
//!
//! Content is either resident in memory (`Inline`) or produced on
//! demand by an opener that yields a fresh stream per call
//! (`Deferred`). Every open returns an independent reader; consumers
//! may open the same content concurrently.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::Error;

/// A fresh input stream over block content.
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Capability to open block content. Each call must produce a new
/// stream positioned at the start of the content.
pub trait ContentOpener: Send + Sync {
    fn open(&self) -> BoxFuture<'static, io::Result<ContentStream>>;
}

impl<F> ContentOpener for F
where
    F: Fn() -> BoxFuture<'static, io::Result<ContentStream>> + Send + Sync,
{
    fn open(&self) -> BoxFuture<'static, io::Result<ContentStream>> {
        (self)()
    }
}

/// Block content, loaded or lazy.
#[derive(Clone)]
pub enum Content {
    /// Content resident in memory.
    Inline(Bytes),
    /// Content produced on demand.
    Deferred(Arc<dyn ContentOpener>),
}

impl Content {
    pub fn inline(bytes: Bytes) -> Self {
        Content::Inline(bytes)
    }

    pub fn deferred(opener: impl ContentOpener + 'static) -> Self {
        Content::Deferred(Arc::new(opener))
    }

    /// True iff the content is resident in memory.
    pub fn is_inline(&self) -> bool {
        matches!(self, Content::Inline(_))
    }

    /// Open a fresh stream over the whole content.
    pub async fn open(&self) -> Result<ContentStream, Error> {
        match self {
            Content::Inline(bytes) => Ok(Box::new(io::Cursor::new(bytes.clone()))),
            Content::Deferred(opener) => Ok(opener.open().await?),
        }
    }

    /// Open a fresh stream over `[start, end)`. Bounds are validated by
    /// the caller against the block size; this only positions the
    /// stream. Deferred readers fall back to skip-and-bound.
    pub async fn open_range(&self, start: u64, end: u64) -> Result<ContentStream, Error> {
        match self {
            Content::Inline(bytes) => {
                let slice = bytes.slice(start as usize..end as usize);
                Ok(Box::new(io::Cursor::new(slice)))
            }
            Content::Deferred(opener) => {
                let mut stream = opener.open().await?;
                if start > 0 {
                    let skipped =
                        tokio::io::copy(&mut (&mut stream).take(start), &mut tokio::io::sink())
                            .await?;
                    if skipped < start {
                        return Err(Error::InvalidArgument(format!(
                            "range start {start} past end of content ({skipped} bytes)"
                        )));
                    }
                }
                Ok(Box::new(stream.take(end - start)))
            }
        }
    }

    /// Read the whole content into memory.
    pub async fn read_all(&self) -> Result<Bytes, Error> {
        match self {
            Content::Inline(bytes) => Ok(bytes.clone()),
            Content::Deferred(opener) => {
                let mut stream = opener.open().await?;
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Inline(bytes) => f.debug_tuple("Inline").field(&bytes.len()).finish(),
            Content::Deferred(_) => f.debug_tuple("Deferred").finish(),
        }
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        Content::Inline(bytes)
    }
}
