// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! On-disk block store.
//!
//! Layout version "1":
//!
//! ```text
//! <root>/meta.properties            { version = "1" }
//! <root>/blocks/<hex[..8]>/<hex[8..]>
//! <root>/landing/block.<random>.tmp transient staging files
//! ```
//!
//! Two directory levels keep the fan-out of any single directory
//! within filesystem limits. Writes stage into `landing/` and publish
//! with a same-filesystem rename, so a stored block file is always
//! complete; a crash can only leave a stale landing file, which the
//! next open sweeps.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::block::{file_content, Block};
use crate::errors::Error;
use crate::hash::{hex_id, parse_hex_id, Multihash};

use super::stream::select;
use super::{BlockStat, BlockStream, ListOptions, Store};

const META_FILE: &str = "meta.properties";
const BLOCKS_DIR: &str = "blocks";
const LANDING_DIR: &str = "landing";
const VERSION_KEY: &str = "version";
const VERSION: &str = "1";
/// Directory-name length in hex chars; 8 chars bound the top level at
/// 2^32 subdirectories, far more than ever materializes.
const PREFIX_LEN: usize = 8;
const LIST_CHANNEL_CAP: usize = 16;

/// Meta key carrying the backing file path on blocks returned by this
/// store.
pub const ORIGIN_META: &str = "grove.store/origin";

#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    pub root: PathBuf,
    /// Convert an unversioned (v0) layout in place at open. Without
    /// it, opening a v0 root fails.
    pub auto_migrate: bool,
}

impl FileStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            auto_migrate: false,
        }
    }

    pub fn auto_migrate(mut self, auto_migrate: bool) -> Self {
        self.auto_migrate = auto_migrate;
        self
    }
}

/// Block store over a local directory tree.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: Arc<PathBuf>,
}

impl FileStore {
    /// Open (and if needed initialize or migrate) a store rooted at
    /// `config.root`.
    pub async fn open(config: FileStoreConfig) -> Result<FileStore, Error> {
        let root = config.root;
        tokio::fs::create_dir_all(&root).await?;

        let meta_path = root.join(META_FILE);
        match tokio::fs::read_to_string(&meta_path).await {
            Ok(text) => {
                let props = parse_properties(&text);
                match props.get(VERSION_KEY).map(String::as_str) {
                    Some(VERSION) => {}
                    declared => {
                        return Err(Error::IncompatibleLayout {
                            path: root,
                            reason: format!(
                                "unsupported layout version {declared:?}, expected {VERSION:?}"
                            ),
                        });
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if dir_is_empty(&root).await? {
                    write_meta(&meta_path).await?;
                } else if config.auto_migrate {
                    migrate_v0(&root).await?;
                    write_meta(&meta_path).await?;
                } else {
                    return Err(Error::IncompatibleLayout {
                        path: root,
                        reason: "unversioned (v0) layout; open with auto_migrate to convert"
                            .into(),
                    });
                }
            }
            Err(e) => return Err(e.into()),
        }

        tokio::fs::create_dir_all(root.join(BLOCKS_DIR)).await?;
        tokio::fs::create_dir_all(root.join(LANDING_DIR)).await?;
        sweep_landing(&root.join(LANDING_DIR)).await?;

        Ok(FileStore {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, hex: &str) -> Result<PathBuf, Error> {
        if hex.len() <= PREFIX_LEN {
            return Err(Error::InvalidArgument(format!(
                "id {hex:?} too short for a block path"
            )));
        }
        Ok(self
            .root
            .join(BLOCKS_DIR)
            .join(&hex[..PREFIX_LEN])
            .join(&hex[PREFIX_LEN..]))
    }

    fn stored_block(&self, id: Multihash, path: PathBuf, meta: &std::fs::Metadata) -> Block {
        let stored_at = meta.modified().unwrap_or_else(|_| SystemTime::now());
        Block::with_id(id, meta.len(), file_content(path.clone()))
            .with_stored_at(stored_at)
            .with_meta(ORIGIN_META, path.display().to_string())
    }
}

#[async_trait]
impl Store for FileStore {
    fn list(&self, opts: ListOptions) -> BlockStream {
        let store = self.clone();
        let walk_opts = opts.clone();
        let (tx, rx) = flume::bounded(LIST_CHANNEL_CAP);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = walk_blocks(&store, &walk_opts, &tx) {
                let _ = tx.send(Err(e));
            }
        });
        select(opts, rx.into_stream()).boxed()
    }

    async fn stat(&self, id: &Multihash) -> Result<Option<BlockStat>, Error> {
        let path = self.block_path(&hex_id(id))?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(BlockStat {
                id: *id,
                size: meta.len(),
                stored_at: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &Multihash) -> Result<Option<Block>, Error> {
        let path = self.block_path(&hex_id(id))?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(self.stored_block(*id, path, &meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, block: Block) -> Result<Block, Error> {
        let hex = block.hex_id().to_string();
        let target = self.block_path(&hex)?;
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            return Ok(self.stored_block(*block.id(), target, &meta));
        }

        let landing = self.root.join(LANDING_DIR);
        tokio::fs::create_dir_all(&landing).await?;
        let tmp = landing.join(landing_name());

        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut reader = block.open().await?;
        let copied = tokio::io::copy(&mut reader, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        if copied != block.size() {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::invalid_block(
                &hex,
                format!("content is {copied} bytes, declared {}", block.size()),
            ));
        }

        set_readonly(&tmp).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Same-filesystem rename publishes atomically; a concurrent
        // put of the same id races benignly since both files hold the
        // same bytes.
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            if tokio::fs::metadata(&target).await.is_err() {
                return Err(e.into());
            }
        }

        let meta = tokio::fs::metadata(&target).await?;
        Ok(self.stored_block(*block.id(), target, &meta))
    }

    async fn delete(&self, id: &Multihash) -> Result<bool, Error> {
        let path = self.block_path(&hex_id(id))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn erase(&self) -> Result<(), Error> {
        for dir in [BLOCKS_DIR, LANDING_DIR] {
            let path = self.root.join(dir);
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::create_dir_all(&path).await?;
        }
        Ok(())
    }
}

fn landing_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("block.{suffix}.tmp")
}

async fn set_readonly(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    let perms = {
        use std::os::unix::fs::PermissionsExt;
        std::fs::Permissions::from_mode(0o444)
    };
    #[cfg(not(unix))]
    let perms = {
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_readonly(true);
        perms
    };
    tokio::fs::set_permissions(path, perms).await
}

async fn dir_is_empty(path: &Path) -> io::Result<bool> {
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// Move v0 top-level block directories (`<root>/<hex8>/`) under
/// `blocks/`. Best-effort; concurrent access during migration is
/// undefined.
async fn migrate_v0(root: &Path) -> Result<(), Error> {
    let blocks = root.join(BLOCKS_DIR);
    tokio::fs::create_dir_all(&blocks).await?;
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_prefix_dir(name) || !entry.file_type().await?.is_dir() {
            continue;
        }
        debug!(dir = name, "migrating v0 block directory");
        tokio::fs::rename(entry.path(), blocks.join(name)).await?;
    }
    Ok(())
}

/// Remove stale staging files left behind by a crash.
async fn sweep_landing(landing: &Path) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(landing).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with("block.") && name.ends_with(".tmp") {
            debug!(file = name, "sweeping stale landing file");
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
    Ok(())
}

fn is_prefix_dir(name: &str) -> bool {
    name.len() == PREFIX_LEN && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    props
}

async fn write_meta(path: &Path) -> io::Result<()> {
    tokio::fs::write(path, format!("{VERSION_KEY}={VERSION}\n")).await
}

/// Blocking directory walk feeding the listing channel. Runs on a
/// worker thread; a failed send means the consumer dropped the stream
/// and the walk stops.
fn walk_blocks(
    store: &FileStore,
    opts: &ListOptions,
    tx: &flume::Sender<Result<Block, Error>>,
) -> Result<(), Error> {
    let blocks_dir = store.root.join(BLOCKS_DIR);
    let after_prefix = opts
        .after
        .as_deref()
        .map(|a| &a[..a.len().min(PREFIX_LEN)]);
    let before_prefix = opts
        .before
        .as_deref()
        .map(|b| &b[..b.len().min(PREFIX_LEN)]);

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(&blocks_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(entry = ?entry.file_name(), "skipping non-block entry");
            continue;
        };
        if !is_prefix_dir(name) || !entry.file_type()?.is_dir() {
            warn!(entry = name, "skipping non-block entry");
            continue;
        }
        dirs.push(name.to_string());
    }
    dirs.sort();

    for dir in dirs {
        // A directory bounds the first 8 hex chars of every id inside
        // it, so whole directories fall outside partial-prefix bounds.
        if let Some(after) = after_prefix {
            if dir.as_str() < after {
                continue;
            }
        }
        if let Some(before) = before_prefix {
            if dir.as_str() > before {
                break;
            }
        }

        let dir_path = blocks_dir.join(&dir);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(entry = ?entry.file_name(), "skipping non-block file");
                continue;
            };
            if !entry.file_type()?.is_file() {
                warn!(entry = name, "skipping non-block file");
                continue;
            }
            files.push(name.to_string());
        }
        files.sort();

        for file in files {
            let hex = format!("{dir}{file}");
            let id = match parse_hex_id(&hex) {
                Ok(id) => id,
                Err(_) => {
                    warn!(file = %hex, "skipping non-block file");
                    continue;
                }
            };
            if let Some(after) = opts.after.as_deref() {
                if hex.as_str() <= after {
                    continue;
                }
            }
            if let Some(before) = opts.before.as_deref() {
                if hex.as_str() >= before {
                    return Ok(());
                }
            }
            let path = dir_path.join(&file);
            let meta = std::fs::metadata(&path)?;
            let block = store.stored_block(id, path, &meta);
            if tx.send(Ok(block)).is_err() {
                // Listing cancelled downstream.
                return Ok(());
            }
        }
    }
    Ok(())
}
