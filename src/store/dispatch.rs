// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::errors::Error;

use super::{FileStore, FileStoreConfig, MemoryStore, Store};

/// Construct a store from a URI.
///
/// - `mem:-` — a fresh in-memory store.
/// - `file:///abs/path` — a file store rooted at the absolute path.
/// - `file://host/rel/path` — a file store rooted at the relative path
///   `host/rel/path`. Append `?auto-migrate=true` to convert a v0
///   layout in place.
///
/// Anything else is an [`Error::UnsupportedScheme`].
pub async fn initialize(uri: &str) -> Result<Arc<dyn Store>, Error> {
    let url = Url::parse(uri)
        .map_err(|e| Error::InvalidArgument(format!("malformed store uri {uri:?}: {e}")))?;
    match url.scheme() {
        "mem" => Ok(Arc::new(MemoryStore::default())),
        "file" => {
            let decoded = urlencoding::decode(url.path())
                .map_err(|e| Error::InvalidArgument(format!("undecodable path in {uri:?}: {e}")))?
                .into_owned();
            let root = match url.host_str() {
                // file://host/rel/path addresses a path relative to
                // the working directory, rooted at `host`.
                Some(host) if !host.is_empty() => {
                    PathBuf::from(host).join(decoded.trim_start_matches('/'))
                }
                _ => PathBuf::from(decoded),
            };
            let auto_migrate = url
                .query_pairs()
                .any(|(key, value)| key == "auto-migrate" && value == "true");
            let config = FileStoreConfig::new(root).auto_migrate(auto_migrate);
            Ok(Arc::new(FileStore::open(config).await?))
        }
        scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
    }
}
