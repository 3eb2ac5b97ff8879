// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Combinators over sorted block listings.
//!
//! All three operate on streams in ascending hex-id order and preserve
//! it. Errors are in-band and terminal: the first `Err` from any input
//! is yielded downstream and every input is dropped, releasing
//! whatever the producers were holding.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::stream::Stream;
use futures::StreamExt;
use pin_project_lite::pin_project;

use crate::block::Block;
use crate::errors::Error;

use super::{BlockStream, ListOptions};

/// Filter a sorted listing by the given options: drop ids at or below
/// `after`, close at `before` or after `limit` emissions, and keep
/// only the requested algorithm. Never reorders.
pub fn select<S>(opts: ListOptions, input: S) -> SelectBlocks<S>
where
    S: Stream<Item = Result<Block, Error>>,
{
    SelectBlocks {
        inner: input,
        opts,
        emitted: 0,
        done: false,
    }
}

/// K-way merge of sorted listings into one sorted listing, dropping
/// duplicate ids. On ties the earliest input wins.
pub fn merge(inputs: Vec<BlockStream>) -> MergeBlocks {
    let heads = inputs.iter().map(|_| None).collect();
    MergeBlocks {
        inputs: inputs.into_iter().map(Some).collect(),
        heads,
        done: false,
    }
}

/// Blocks of `source` whose id does not appear in `dest`. Runs with
/// one buffered head per side; when `dest` drains first the rest of
/// `source` passes through.
pub fn missing(source: BlockStream, dest: BlockStream) -> MissingBlocks {
    MissingBlocks {
        source,
        dest,
        source_head: None,
        source_done: false,
        dest_head: None,
        dest_done: false,
        done: false,
    }
}

pin_project! {
    pub struct SelectBlocks<S> {
        #[pin]
        inner: S,
        opts: ListOptions,
        emitted: usize,
        done: bool,
    }
}

impl<S> Stream for SelectBlocks<S>
where
    S: Stream<Item = Result<Block, Error>>,
{
    type Item = Result<Block, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                None => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Some(Ok(block)) => {
                    if let Some(after) = &this.opts.after {
                        if block.hex_id() <= after.as_str() {
                            continue;
                        }
                    }
                    if let Some(before) = &this.opts.before {
                        if block.hex_id() >= before.as_str() {
                            *this.done = true;
                            return Poll::Ready(None);
                        }
                    }
                    if let Some(algorithm) = this.opts.algorithm {
                        if block.id().code() != u64::from(algorithm) {
                            continue;
                        }
                    }
                    *this.emitted += 1;
                    if let Some(limit) = this.opts.limit {
                        if *this.emitted >= limit {
                            *this.done = true;
                        }
                    }
                    return Poll::Ready(Some(Ok(block)));
                }
            }
        }
    }
}

pub struct MergeBlocks {
    inputs: Vec<Option<BlockStream>>,
    heads: Vec<Option<Block>>,
    done: bool,
}

impl Stream for MergeBlocks {
    type Item = Result<Block, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // Refill every missing head before comparing; a pending input
        // may still hold the smallest id.
        let mut pending = false;
        for i in 0..this.inputs.len() {
            if this.heads[i].is_some() {
                continue;
            }
            let Some(input) = this.inputs[i].as_mut() else {
                continue;
            };
            match input.poll_next_unpin(cx) {
                Poll::Pending => pending = true,
                Poll::Ready(None) => this.inputs[i] = None,
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    this.inputs.clear();
                    this.heads.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(block))) => this.heads[i] = Some(block),
            }
        }
        if pending {
            return Poll::Pending;
        }

        let mut min: Option<usize> = None;
        for (i, head) in this.heads.iter().enumerate() {
            if let Some(block) = head {
                match min {
                    Some(j) if this.heads[j].as_ref().expect("head set").hex_id()
                        <= block.hex_id() => {}
                    _ => min = Some(i),
                }
            }
        }
        match min {
            None => {
                this.done = true;
                Poll::Ready(None)
            }
            Some(i) => {
                let block = this.heads[i].take().expect("head set");
                for head in this.heads.iter_mut() {
                    if head.as_ref().is_some_and(|b| b.id() == block.id()) {
                        *head = None;
                    }
                }
                Poll::Ready(Some(Ok(block)))
            }
        }
    }
}

pub struct MissingBlocks {
    source: BlockStream,
    dest: BlockStream,
    source_head: Option<Block>,
    source_done: bool,
    dest_head: Option<Block>,
    dest_done: bool,
    done: bool,
}

impl Stream for MissingBlocks {
    type Item = Result<Block, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            if this.source_head.is_none() && !this.source_done {
                match ready!(this.source.poll_next_unpin(cx)) {
                    None => this.source_done = true,
                    Some(Err(e)) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Some(Ok(block)) => this.source_head = Some(block),
                }
            }
            let Some(source_head) = this.source_head.as_ref() else {
                this.done = true;
                return Poll::Ready(None);
            };

            if this.dest_done {
                return Poll::Ready(this.source_head.take().map(Ok));
            }
            if this.dest_head.is_none() {
                match ready!(this.dest.poll_next_unpin(cx)) {
                    None => {
                        this.dest_done = true;
                        continue;
                    }
                    Some(Err(e)) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Some(Ok(block)) => this.dest_head = Some(block),
                }
            }
            let dest_head = this.dest_head.as_ref().expect("dest head set");

            match source_head.hex_id().cmp(dest_head.hex_id()) {
                std::cmp::Ordering::Less => {
                    return Poll::Ready(this.source_head.take().map(Ok));
                }
                std::cmp::Ordering::Equal => {
                    this.source_head = None;
                    this.dest_head = None;
                }
                std::cmp::Ordering::Greater => {
                    this.dest_head = None;
                }
            }
        }
    }
}
