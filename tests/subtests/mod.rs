// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Store-contract subtests shared by every backend's test file. Each
//! subtest assumes a fresh, empty store.

#![allow(dead_code)]

use futures::StreamExt;
use grove::{block_from_bytes, Block, Code, ListOptions, Store, StoreExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::AsyncReadExt;

/// Deterministic set of distinct blocks with sizes in `1..=max_size`.
pub fn sample_blocks(count: usize, max_size: usize, seed: u64) -> Vec<Block> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let size = rng.gen_range(1..=max_size);
            let mut data = vec![0u8; size];
            rng.fill(data.as_mut_slice());
            // A distinct prefix keeps accidental duplicates out even
            // for one-byte blocks.
            data[0] = (i % 256) as u8;
            block_from_bytes(data, Code::Sha2_256).unwrap()
        })
        .collect()
}

pub async fn read_back(block: &Block) -> Vec<u8> {
    let mut out = Vec::new();
    block
        .open()
        .await
        .unwrap()
        .read_to_end(&mut out)
        .await
        .unwrap();
    out
}

pub async fn collect_listing(store: &dyn Store, opts: ListOptions) -> Vec<Block> {
    store
        .list_blocks(opts)
        .unwrap()
        .map(|block| block.unwrap())
        .collect()
        .await
}

/// put then get returns the same bytes under the same id.
pub async fn roundtrip(store: &dyn Store) {
    let block = block_from_bytes(&b"hello, blocks!"[..], Code::Sha2_256).unwrap();
    let stored = store.put(block.clone()).await.unwrap();
    assert_eq!(stored, block);

    let fetched = store.get_checked(block.id()).await.unwrap().unwrap();
    assert_eq!(fetched, block);
    assert_eq!(fetched.size(), 14);
    assert_eq!(read_back(&fetched).await, b"hello, blocks!");
    fetched.validate().await.unwrap();
}

/// Storing the same id twice leaves one block and returns equal values.
pub async fn idempotent_put(store: &dyn Store) {
    let block = block_from_bytes(&b"stored once"[..], Code::Sha2_256).unwrap();
    let first = store.put(block.clone()).await.unwrap();
    let second = store.put(block.clone()).await.unwrap();
    assert_eq!(first, second);

    let matching = collect_listing(store, ListOptions::default())
        .await
        .into_iter()
        .filter(|b| b.id() == block.id())
        .count();
    assert_eq!(matching, 1);
}

pub async fn deletion(store: &dyn Store) {
    let block = block_from_bytes(&b"here and gone"[..], Code::Sha2_256).unwrap();
    store.put(block.clone()).await.unwrap();
    assert!(store.delete(block.id()).await.unwrap());
    assert!(store.get(block.id()).await.unwrap().is_none());
    assert!(store.stat(block.id()).await.unwrap().is_none());
    assert!(!store.delete(block.id()).await.unwrap());
}

pub async fn missing_is_none(store: &dyn Store) {
    let absent = block_from_bytes(&b"never stored"[..], Code::Sha2_256).unwrap();
    assert!(store.get(absent.id()).await.unwrap().is_none());
    assert!(store.stat(absent.id()).await.unwrap().is_none());
    assert!(!store.contains(absent.id()).await.unwrap());
}

/// Every block read back re-hashes to its id.
pub async fn hash_integrity(store: &dyn Store) {
    for block in sample_blocks(8, 512, 7) {
        store.put(block.clone()).await.unwrap();
        let fetched = store.get(block.id()).await.unwrap().unwrap();
        fetched.validate().await.unwrap();
    }
}

pub async fn stat_reports_size(store: &dyn Store) {
    let block = block_from_bytes(&b"sized content"[..], Code::Sha2_256).unwrap();
    store.put(block.clone()).await.unwrap();
    let stat = store.stat(block.id()).await.unwrap().unwrap();
    assert_eq!(&stat.id, block.id());
    assert_eq!(stat.size, block.size());
}

/// Listings are strictly ascending in hex id with no duplicates.
pub async fn list_ordering(store: &dyn Store) {
    let blocks = sample_blocks(20, 1024, 11);
    for block in &blocks {
        store.put(block.clone()).await.unwrap();
    }
    let listed = collect_listing(store, ListOptions::default()).await;
    assert_eq!(listed.len(), blocks.len());
    for pair in listed.windows(2) {
        assert!(pair[0].hex_id() < pair[1].hex_id());
    }
}

pub async fn list_filters(store: &dyn Store) {
    let mut blocks = sample_blocks(12, 256, 13);
    for block in &blocks {
        store.put(block.clone()).await.unwrap();
    }
    blocks.sort();

    let pivot = blocks[4].hex_id().to_string();
    for block in collect_listing(store, ListOptions::default().after(pivot.clone())).await {
        assert!(block.hex_id() > pivot.as_str());
    }
    for block in collect_listing(store, ListOptions::default().before(pivot.clone())).await {
        assert!(block.hex_id() < pivot.as_str());
    }

    let limited = collect_listing(store, ListOptions::default().limit(5)).await;
    assert_eq!(limited.len(), 5);

    for block in
        collect_listing(store, ListOptions::default().algorithm(Code::Sha2_256)).await
    {
        assert_eq!(block.id().code(), u64::from(Code::Sha2_256));
    }
    let none =
        collect_listing(store, ListOptions::default().algorithm(Code::Blake2b256)).await;
    assert!(none.is_empty());
}

pub async fn list_rejects_bad_options(store: &dyn Store) {
    assert!(store
        .list_blocks(ListOptions::default().after("XYZ"))
        .is_err());
    assert!(store
        .list_blocks(ListOptions::default().before("Uppercase"))
        .is_err());
    assert!(store.list_blocks(ListOptions::default().limit(0)).is_err());
}

pub async fn erase_empties_the_store(store: &dyn Store) {
    for block in sample_blocks(5, 64, 17) {
        store.put(block.clone()).await.unwrap();
    }
    store.erase().await.unwrap();
    let listed = collect_listing(store, ListOptions::default()).await;
    assert!(listed.is_empty());
}

pub async fn scan_summarizes(store: &dyn Store) {
    let blocks = sample_blocks(10, 128, 19);
    let expected_total: u64 = blocks.iter().map(|b| b.size()).sum();
    for block in &blocks {
        store.put(block.clone()).await.unwrap();
    }
    let summary = store.scan(ListOptions::default()).await.unwrap();
    assert_eq!(summary.count, blocks.len() as u64);
    assert_eq!(summary.total_size, expected_total);
    assert_eq!(summary.buckets.values().sum::<u64>(), summary.count);
}
