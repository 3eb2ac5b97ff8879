// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod subtests;

use futures::StreamExt;
use grove::{
    block_from_bytes, Code, Error, FileStore, FileStoreConfig, ListOptions, Store, StoreExt,
};
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> FileStore {
    FileStore::open(FileStoreConfig::new(dir.path().join("store")))
        .await
        .unwrap()
}

#[tokio::test]
async fn file_roundtrip() {
    let dir = TempDir::new().unwrap();
    subtests::roundtrip(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_idempotent_put() {
    let dir = TempDir::new().unwrap();
    subtests::idempotent_put(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_deletion() {
    let dir = TempDir::new().unwrap();
    subtests::deletion(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_missing_is_none() {
    let dir = TempDir::new().unwrap();
    subtests::missing_is_none(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_hash_integrity() {
    let dir = TempDir::new().unwrap();
    subtests::hash_integrity(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_stat_reports_size() {
    let dir = TempDir::new().unwrap();
    subtests::stat_reports_size(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_list_ordering() {
    let dir = TempDir::new().unwrap();
    subtests::list_ordering(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_list_filters() {
    let dir = TempDir::new().unwrap();
    subtests::list_filters(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_list_rejects_bad_options() {
    let dir = TempDir::new().unwrap();
    subtests::list_rejects_bad_options(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_scan_summarizes() {
    let dir = TempDir::new().unwrap();
    subtests::scan_summarizes(&open_store(&dir).await).await;
}

#[tokio::test]
async fn file_erase() {
    let dir = TempDir::new().unwrap();
    subtests::erase_empties_the_store(&open_store(&dir).await).await;
}

#[tokio::test]
async fn initializes_versioned_layout() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let root = store.root().to_path_buf();
    let meta = std::fs::read_to_string(root.join("meta.properties")).unwrap();
    assert!(meta.contains("version=1"));
    assert!(root.join("blocks").is_dir());
    assert!(root.join("landing").is_dir());
}

#[tokio::test]
async fn blocks_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let blocks = subtests::sample_blocks(100, 1024, 2);
    {
        let store = open_store(&dir).await;
        for block in &blocks {
            store.put(block.clone()).await.unwrap();
        }
    }

    let store = open_store(&dir).await;
    let listed = subtests::collect_listing(&store, ListOptions::default()).await;
    assert_eq!(listed.len(), blocks.len());
    for pair in listed.windows(2) {
        assert!(pair[0].hex_id() < pair[1].hex_id());
    }
    for block in &blocks {
        let fetched = store.get(block.id()).await.unwrap().unwrap();
        assert_eq!(
            subtests::read_back(&fetched).await,
            subtests::read_back(block).await
        );
    }
}

#[cfg(unix)]
#[tokio::test]
async fn block_files_are_read_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let block = block_from_bytes(&b"write protected"[..], Code::Sha2_256).unwrap();
    let stored = store.put(block).await.unwrap();

    let path = stored.meta().get(grove::ORIGIN_META).unwrap();
    let mode = std::fs::metadata(path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o444);
}

#[tokio::test]
async fn layout_uses_hex_prefix_directories() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let block = block_from_bytes(&b"sharded"[..], Code::Sha2_256).unwrap();
    let stored = store.put(block).await.unwrap();

    let hex = stored.hex_id();
    let expected = store
        .root()
        .join("blocks")
        .join(&hex[..8])
        .join(&hex[8..]);
    assert!(expected.is_file());
}

#[tokio::test]
async fn stale_landing_files_are_swept() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    {
        open_store(&dir).await;
    }
    let stale = root.join("landing").join("block.deadbeef.tmp");
    std::fs::write(&stale, b"half written").unwrap();

    FileStore::open(FileStoreConfig::new(&root)).await.unwrap();
    assert!(!stale.exists());
}

#[tokio::test]
async fn refuses_unversioned_layout_without_migration() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    std::fs::create_dir_all(root.join("1220aaaa")).unwrap();

    let err = FileStore::open(FileStoreConfig::new(&root)).await.unwrap_err();
    assert!(matches!(err, Error::IncompatibleLayout { .. }));
}

#[tokio::test]
async fn migrates_v0_layout_in_place() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");

    // Build a v1 store, then rewind it to the v0 shape: block
    // directories at the top level and no metadata file.
    let blocks = subtests::sample_blocks(10, 256, 3);
    {
        let store = FileStore::open(FileStoreConfig::new(&root)).await.unwrap();
        for block in &blocks {
            store.put(block.clone()).await.unwrap();
        }
    }
    for entry in std::fs::read_dir(root.join("blocks")).unwrap() {
        let entry = entry.unwrap();
        std::fs::rename(entry.path(), root.join(entry.file_name())).unwrap();
    }
    std::fs::remove_dir(root.join("blocks")).unwrap();
    std::fs::remove_dir(root.join("landing")).unwrap();
    std::fs::remove_file(root.join("meta.properties")).unwrap();

    let store = FileStore::open(FileStoreConfig::new(&root).auto_migrate(true))
        .await
        .unwrap();
    let listed = subtests::collect_listing(&store, ListOptions::default()).await;
    assert_eq!(listed.len(), blocks.len());
    assert!(root.join("meta.properties").is_file());
}

#[tokio::test]
async fn rejects_unknown_layout_version() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("meta.properties"), "version=9\n").unwrap();

    let err = FileStore::open(FileStoreConfig::new(&root)).await.unwrap_err();
    assert!(matches!(err, Error::IncompatibleLayout { .. }));
}

#[tokio::test]
async fn listing_skips_foreign_files() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let block = block_from_bytes(&b"legitimate"[..], Code::Sha2_256).unwrap();
    store.put(block.clone()).await.unwrap();

    let prefix_dir = store.root().join("blocks").join(&block.hex_id()[..8]);
    std::fs::write(prefix_dir.join("not-hex-at-all"), b"junk").unwrap();
    std::fs::write(store.root().join("blocks").join("README"), b"junk").unwrap();

    let listed = subtests::collect_listing(&store, ListOptions::default()).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), block.id());
}

#[tokio::test]
async fn listing_stops_early_when_dropped() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    for block in subtests::sample_blocks(30, 64, 5) {
        store.put(block).await.unwrap();
    }

    let mut listing = store.list_blocks(ListOptions::default()).unwrap();
    let first = listing.next().await.unwrap().unwrap();
    assert!(!first.hex_id().is_empty());
    // Dropping the stream cancels the walker; nothing to assert beyond
    // not hanging.
    drop(listing);
}

#[tokio::test]
async fn get_returns_lazy_blocks_with_origin() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let block = block_from_bytes(&b"lazy on disk"[..], Code::Sha2_256).unwrap();
    store.put(block.clone()).await.unwrap();

    let fetched = store.get(block.id()).await.unwrap().unwrap();
    assert!(!fetched.is_loaded());
    assert!(fetched.meta().contains_key(grove::ORIGIN_META));
    assert_eq!(subtests::read_back(&fetched).await, b"lazy on disk");
}
