// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Instrumentation overlay.
//!
//! Wraps a store and reports wall-clock latency per operation plus
//! windowed byte counts for content flowing through `get` and `put`.
//! Events go to a caller-supplied recorder; a panicking recorder is
//! logged and ignored. Without a recorder the overlay is a plain
//! delegate — no wrapping, no timing.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::Stream;
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

use crate::block::Block;
use crate::content::{Content, ContentOpener, ContentStream};
use crate::errors::Error;
use crate::hash::Multihash;

use super::{BlockStat, BlockStream, ListOptions, Store};

/// Byte counts are reported at least this often while a stream is
/// being consumed, and once more when it closes.
const REPORT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub enum MeterEvent {
    /// One store operation completed.
    Method {
        label: Arc<str>,
        method: &'static str,
        elapsed: Duration,
        ok: bool,
    },
    /// Bytes read out of the store within one report window.
    BytesRead {
        label: Arc<str>,
        bytes: u64,
        elapsed: Duration,
    },
    /// Bytes written into the store within one report window.
    BytesWritten {
        label: Arc<str>,
        bytes: u64,
        elapsed: Duration,
    },
}

pub type Recorder = Arc<dyn Fn(&MeterEvent) + Send + Sync>;

/// Store wrapper emitting [`MeterEvent`]s to a recorder.
pub struct MeteredStore {
    inner: Arc<dyn Store>,
    label: Arc<str>,
    recorder: Option<Recorder>,
}

impl MeteredStore {
    pub fn new(inner: Arc<dyn Store>, label: impl Into<String>) -> MeteredStore {
        MeteredStore {
            inner,
            label: label.into().into(),
            recorder: None,
        }
    }

    pub fn with_recorder(
        mut self,
        recorder: impl Fn(&MeterEvent) + Send + Sync + 'static,
    ) -> MeteredStore {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    async fn timed<T>(
        &self,
        method: &'static str,
        fut: impl std::future::Future<Output = Result<T, Error>> + Send,
    ) -> Result<T, Error> {
        let Some(recorder) = &self.recorder else {
            return fut.await;
        };
        let start = Instant::now();
        let result = fut.await;
        record(
            recorder,
            &MeterEvent::Method {
                label: self.label.clone(),
                method,
                elapsed: start.elapsed(),
                ok: result.is_ok(),
            },
        );
        result
    }

    fn meter_content(&self, recorder: &Recorder, block: Block, written: bool) -> Block {
        let opener = MeterOpener {
            inner: block.content().clone(),
            label: self.label.clone(),
            recorder: recorder.clone(),
            written,
        };
        let mut wrapped = Block::with_id(*block.id(), block.size(), Content::deferred(opener))
            .with_stored_at(block.stored_at());
        for (key, value) in block.meta() {
            wrapped = wrapped.with_meta(key.clone(), value.clone());
        }
        wrapped
    }
}

fn record(recorder: &Recorder, event: &MeterEvent) {
    if catch_unwind(AssertUnwindSafe(|| recorder(event))).is_err() {
        warn!("meter recorder panicked; event dropped");
    }
}

#[async_trait]
impl Store for MeteredStore {
    fn list(&self, opts: ListOptions) -> BlockStream {
        let Some(recorder) = &self.recorder else {
            return self.inner.list(opts);
        };
        MeterListing {
            inner: self.inner.list(opts),
            label: self.label.clone(),
            recorder: recorder.clone(),
            started: Instant::now(),
            done: false,
        }
        .boxed()
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        self.timed("stat", self.inner.stat(id)).await
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        let found = self.timed("get", self.inner.get(id)).await?;
        let Some(recorder) = self.recorder.clone() else {
            return Ok(found);
        };
        Ok(found.map(|block| self.meter_content(&recorder, block, false)))
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        let block = match self.recorder.clone() {
            Some(recorder) => self.meter_content(&recorder, block, true),
            None => block,
        };
        self.timed("put", self.inner.put(block)).await
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        self.timed("delete", self.inner.delete(id)).await
    }

    async fn erase(&self) -> Result<(), Error> {
        self.timed("erase", self.inner.erase()).await
    }
}

/// Content wrapper opening metered readers.
struct MeterOpener {
    inner: Content,
    label: Arc<str>,
    recorder: Recorder,
    written: bool,
}

impl ContentOpener for MeterOpener {
    fn open(&self) -> BoxFuture<'static, io::Result<ContentStream>> {
        let inner = self.inner.clone();
        let label = self.label.clone();
        let recorder = self.recorder.clone();
        let written = self.written;
        async move {
            let stream = inner
                .open()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            let metered = MeterReader {
                inner: stream,
                label,
                recorder,
                written,
                window_start: Instant::now(),
                window_bytes: 0,
            };
            Ok(Box::new(metered) as ContentStream)
        }
        .boxed()
    }
}

struct MeterReader {
    inner: ContentStream,
    label: Arc<str>,
    recorder: Recorder,
    written: bool,
    window_start: Instant,
    window_bytes: u64,
}

impl MeterReader {
    fn flush_window(&mut self) {
        if self.window_bytes > 0 {
            let event = if self.written {
                MeterEvent::BytesWritten {
                    label: self.label.clone(),
                    bytes: self.window_bytes,
                    elapsed: self.window_start.elapsed(),
                }
            } else {
                MeterEvent::BytesRead {
                    label: self.label.clone(),
                    bytes: self.window_bytes,
                    elapsed: self.window_start.elapsed(),
                }
            };
            record(&self.recorder, &event);
        }
        self.window_bytes = 0;
        self.window_start = Instant::now();
    }
}

impl AsyncRead for MeterReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                this.window_bytes += n as u64;
                if n == 0 || this.window_start.elapsed() >= REPORT_WINDOW {
                    this.flush_window();
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl Drop for MeterReader {
    fn drop(&mut self) {
        // A cancelled read still reports what it consumed.
        self.flush_window();
    }
}

/// Listing wrapper reporting elapsed time once the stream closes.
struct MeterListing {
    inner: BlockStream,
    label: Arc<str>,
    recorder: Recorder,
    started: Instant,
    done: bool,
}

impl Stream for MeterListing {
    type Item = Result<Block, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.poll_next_unpin(cx);
        if let Poll::Ready(item) = &polled {
            let closing = matches!(item, None | Some(Err(_)));
            if closing && !this.done {
                this.done = true;
                record(
                    &this.recorder,
                    &MeterEvent::Method {
                        label: this.label.clone(),
                        method: "list",
                        elapsed: this.started.elapsed(),
                        ok: !matches!(item, Some(Err(_))),
                    },
                );
            }
        }
        polled
    }
}
