// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use thiserror::Error;

/// Block storage error
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input, raised before any I/O happens.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A block's content does not match its identifier or declared size.
    #[error("invalid block {id}: {reason}")]
    InvalidBlock { id: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// On-disk layout version is unrecognized or requires migration.
    #[error("incompatible layout at {path:?}: {reason}")]
    IncompatibleLayout { path: PathBuf, reason: String },
    /// A composite store was assembled without its required parts.
    #[error("misconfigured store: {0}")]
    MisconfiguredStore(String),
    #[error("unsupported store scheme: {0}")]
    UnsupportedScheme(String),
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid_block(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidBlock {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}
