// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod subtests;

use std::sync::Arc;

use grove::{block_from_bytes, BufferStore, Code, ListOptions, MemoryStore, Store, StoreExt};

fn buffered() -> BufferStore {
    BufferStore::new(
        Arc::new(MemoryStore::default()),
        Arc::new(MemoryStore::default()),
    )
}

#[tokio::test]
async fn buffer_roundtrip() {
    subtests::roundtrip(&buffered()).await;
}

#[tokio::test]
async fn buffer_idempotent_put() {
    subtests::idempotent_put(&buffered()).await;
}

#[tokio::test]
async fn buffer_deletion() {
    subtests::deletion(&buffered()).await;
}

#[tokio::test]
async fn buffer_missing_is_none() {
    subtests::missing_is_none(&buffered()).await;
}

#[tokio::test]
async fn buffer_hash_integrity() {
    subtests::hash_integrity(&buffered()).await;
}

#[tokio::test]
async fn buffer_stat_reports_size() {
    subtests::stat_reports_size(&buffered()).await;
}

#[tokio::test]
async fn buffer_list_ordering() {
    subtests::list_ordering(&buffered()).await;
}

#[tokio::test]
async fn buffer_list_filters() {
    subtests::list_filters(&buffered()).await;
}

#[tokio::test]
async fn buffer_list_rejects_bad_options() {
    subtests::list_rejects_bad_options(&buffered()).await;
}

#[tokio::test]
async fn buffer_scan_summarizes() {
    subtests::scan_summarizes(&buffered()).await;
}

#[tokio::test]
async fn buffer_erase() {
    subtests::erase_empties_the_store(&buffered()).await;
}

#[tokio::test]
async fn small_blocks_stage_in_the_buffer() {
    let buffer = Arc::new(MemoryStore::default());
    let primary = Arc::new(MemoryStore::default());
    let store =
        BufferStore::new(buffer.clone(), primary.clone()).with_max_block_size(8);

    let large = block_from_bytes(&b"abcdefghij"[..], Code::Sha2_256).unwrap();
    store.put(large.clone()).await.unwrap();
    assert!(primary.contains(large.id()).await.unwrap());
    assert!(!buffer.contains(large.id()).await.unwrap());

    let small = block_from_bytes(&b"abc"[..], Code::Sha2_256).unwrap();
    store.put(small.clone()).await.unwrap();
    assert!(buffer.contains(small.id()).await.unwrap());
    assert!(!primary.contains(small.id()).await.unwrap());

    // Both visible through the layered store.
    assert!(store.get(large.id()).await.unwrap().is_some());
    assert!(store.get(small.id()).await.unwrap().is_some());

    let summary = store.flush(None).await.unwrap();
    assert_eq!(summary.flushed, 1);
    assert_eq!(summary.bytes, 3);
    assert!(primary.contains(small.id()).await.unwrap());
    assert!(!buffer.contains(small.id()).await.unwrap());
}

#[tokio::test]
async fn flush_can_move_a_subset() {
    let buffer = Arc::new(MemoryStore::default());
    let primary = Arc::new(MemoryStore::default());
    let store = BufferStore::new(buffer.clone(), primary.clone());

    let blocks = subtests::sample_blocks(4, 64, 23);
    for block in &blocks {
        store.put(block.clone()).await.unwrap();
    }

    let chosen = [*blocks[0].id(), *blocks[2].id()];
    let summary = store.flush(Some(&chosen)).await.unwrap();
    assert_eq!(summary.flushed, 2);

    assert!(primary.contains(blocks[0].id()).await.unwrap());
    assert!(primary.contains(blocks[2].id()).await.unwrap());
    assert!(buffer.contains(blocks[1].id()).await.unwrap());
    assert!(buffer.contains(blocks[3].id()).await.unwrap());
}

#[tokio::test]
async fn clear_drops_staged_blocks() {
    let buffer = Arc::new(MemoryStore::default());
    let primary = Arc::new(MemoryStore::default());
    let store = BufferStore::new(buffer.clone(), primary.clone());

    let block = block_from_bytes(&b"staged only"[..], Code::Sha2_256).unwrap();
    store.put(block.clone()).await.unwrap();
    store.clear().await.unwrap();

    assert!(store.get(block.id()).await.unwrap().is_none());
    assert!(!primary.contains(block.id()).await.unwrap());
}

#[tokio::test]
async fn put_returns_extant_primary_block() {
    let buffer = Arc::new(MemoryStore::default());
    let primary = Arc::new(MemoryStore::default());
    let store = BufferStore::new(buffer.clone(), primary.clone());

    let block = block_from_bytes(&b"already durable"[..], Code::Sha2_256).unwrap();
    primary.put(block.clone()).await.unwrap();

    store.put(block.clone()).await.unwrap();
    // The put short-circuited; nothing landed in the buffer.
    assert!(!buffer.contains(block.id()).await.unwrap());
}

#[tokio::test]
async fn listing_merges_both_sides_without_duplicates() {
    let buffer = Arc::new(MemoryStore::default());
    let primary = Arc::new(MemoryStore::default());
    let store = BufferStore::new(buffer.clone(), primary.clone());

    let blocks = subtests::sample_blocks(6, 64, 29);
    for block in &blocks[..3] {
        buffer.put(block.clone()).await.unwrap();
    }
    for block in &blocks[2..] {
        primary.put(block.clone()).await.unwrap();
    }

    let listed = subtests::collect_listing(&store, ListOptions::default()).await;
    assert_eq!(listed.len(), blocks.len());
    for pair in listed.windows(2) {
        assert!(pair[0].hex_id() < pair[1].hex_id());
    }
}
