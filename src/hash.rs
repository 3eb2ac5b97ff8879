// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Multihash helpers: algorithm lookup, canonical hex identifiers and
//! incremental digests.
//!
//! Identifiers are self-describing multihashes. Their canonical string
//! form is the lowercase hex encoding of the binary multihash, which
//! sorts the same way as the underlying bytes and is what listing
//! boundaries (`after`/`before`) are expressed in.

use lazy_regex::regex_is_match;
use multihash_codetable::{Blake2b256, Blake2s256, Blake3_256, Sha2_256, Sha2_512, Sha3_256};
use multihash_derive::Hasher;

pub use multihash_codetable::{Code, Multihash, MultihashDigest};

use crate::errors::Error;

/// Algorithms with a registered name. Anything else in the code table
/// still round-trips through stores untouched; these are the ones that
/// can be requested by name when hashing new content.
const ALGORITHMS: &[(&str, Code)] = &[
    ("sha2-256", Code::Sha2_256),
    ("sha2-512", Code::Sha2_512),
    ("sha3-256", Code::Sha3_256),
    ("blake2b-256", Code::Blake2b256),
    ("blake2s-256", Code::Blake2s256),
    ("blake3-256", Code::Blake3_256),
];

/// Look up an algorithm code by its registered name, e.g. `sha2-256`.
pub fn algorithm_by_name(name: &str) -> Option<Code> {
    ALGORITHMS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
}

/// Name of a registered algorithm code, if known.
pub fn algorithm_name(code: Code) -> Option<&'static str> {
    ALGORITHMS
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
}

/// Canonical lowercase hex encoding of a multihash.
pub fn hex_id(id: &Multihash) -> String {
    hex::encode(id.to_bytes())
}

/// Decode a canonical hex identifier back into a multihash.
pub fn parse_hex_id(hex: &str) -> Result<Multihash, Error> {
    let bytes = hex::decode(hex)
        .map_err(|e| Error::InvalidArgument(format!("malformed hex id {hex:?}: {e}")))?;
    Multihash::from_bytes(&bytes)
        .map_err(|e| Error::InvalidArgument(format!("malformed multihash {hex:?}: {e}")))
}

/// True iff `s` is a valid listing boundary: possibly-partial lowercase
/// hex. Boundaries compare as strings, so odd lengths are fine.
pub fn is_hex_boundary(s: &str) -> bool {
    regex_is_match!("^[0-9a-f]*$", s)
}

/// Incremental digest over one of the registered algorithms.
///
/// `Code::digest` covers whole buffers; this exists for single-pass
/// hashing of streamed content where buffering the input would defeat
/// the point.
pub enum StreamHasher {
    Sha2_256(Sha2_256),
    Sha2_512(Sha2_512),
    Sha3_256(Sha3_256),
    Blake2b256(Blake2b256),
    Blake2s256(Blake2s256),
    Blake3_256(Blake3_256),
}

impl StreamHasher {
    pub fn new(code: Code) -> Result<Self, Error> {
        let hasher = match code {
            Code::Sha2_256 => StreamHasher::Sha2_256(Sha2_256::default()),
            Code::Sha2_512 => StreamHasher::Sha2_512(Sha2_512::default()),
            Code::Sha3_256 => StreamHasher::Sha3_256(Sha3_256::default()),
            Code::Blake2b256 => StreamHasher::Blake2b256(Blake2b256::default()),
            Code::Blake2s256 => StreamHasher::Blake2s256(Blake2s256::default()),
            Code::Blake3_256 => StreamHasher::Blake3_256(Blake3_256::default()),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "no streaming hasher for algorithm {other:?}"
                )))
            }
        };
        Ok(hasher)
    }

    /// Hasher for the algorithm of an existing id, used to re-verify
    /// content against it.
    pub fn for_id(id: &Multihash) -> Result<Self, Error> {
        let code = Code::try_from(id.code())
            .map_err(|_| Error::InvalidArgument(format!("unknown algorithm {:#x}", id.code())))?;
        Self::new(code)
    }

    pub fn update(&mut self, input: &[u8]) {
        match self {
            StreamHasher::Sha2_256(h) => h.update(input),
            StreamHasher::Sha2_512(h) => h.update(input),
            StreamHasher::Sha3_256(h) => h.update(input),
            StreamHasher::Blake2b256(h) => h.update(input),
            StreamHasher::Blake2s256(h) => h.update(input),
            StreamHasher::Blake3_256(h) => h.update(input),
        }
    }

    pub fn finalize(&mut self) -> Multihash {
        let (code, digest) = match self {
            StreamHasher::Sha2_256(h) => (Code::Sha2_256, h.finalize()),
            StreamHasher::Sha2_512(h) => (Code::Sha2_512, h.finalize()),
            StreamHasher::Sha3_256(h) => (Code::Sha3_256, h.finalize()),
            StreamHasher::Blake2b256(h) => (Code::Blake2b256, h.finalize()),
            StreamHasher::Blake2s256(h) => (Code::Blake2s256, h.finalize()),
            StreamHasher::Blake3_256(h) => (Code::Blake3_256, h.finalize()),
        };
        code.wrap(digest)
            .expect("digest length matches the code table")
    }
}
