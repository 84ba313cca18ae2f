// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Message digest computation.
//!
//! Every object ingested into the store is hashed with a default set of five
//! algorithms in a single streaming pass, and callers can schedule extra
//! algorithms into the same pass. The heterogeneous digest contexts are
//! driven through [`digest::DynDigest`] so that one write loop updates them
//! all in lock-step.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use digest::{Digest, DynDigest};
use md2::Md2;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512, Sha512_224, Sha512_256};

use crate::errors::{HashStoreError, Result};

/// Buffer size for streaming reads. One pass over the input updates every
/// scheduled digest context with each block.
pub(crate) const READ_BUFFER_SIZE: usize = 64 * 1024;

/// The closed set of digest algorithms the store understands.
///
/// The names used for parsing and display are the canonical dashed forms
/// ("SHA-256", not "sha256"). Matching is case-sensitive; callers that accept
/// looser spellings are responsible for normalizing them first.
#[allow(non_camel_case_types)]
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Algorithm {
    #[serde(rename = "MD2")]
    Md2,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA-1")]
    Sha1,
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
    #[serde(rename = "SHA-512/224")]
    Sha512_224,
    #[serde(rename = "SHA-512/256")]
    Sha512_256,
}

impl Algorithm {
    /// The algorithms computed for every stored object regardless of what
    /// the caller asks for.
    pub const DEFAULTS: [Algorithm; 5] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha384,
        Algorithm::Sha512,
    ];

    /// The canonical name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Md2 => "MD2",
            Algorithm::Md5 => "MD5",
            Algorithm::Sha1 => "SHA-1",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha384 => "SHA-384",
            Algorithm::Sha512 => "SHA-512",
            Algorithm::Sha512_224 => "SHA-512/224",
            Algorithm::Sha512_256 => "SHA-512/256",
        }
    }

    /// The length of this algorithm's digest in lower-case hex characters.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Md2 | Algorithm::Md5 => 32,
            Algorithm::Sha1 => 40,
            Algorithm::Sha512_224 => 56,
            Algorithm::Sha256 | Algorithm::Sha512_256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    /// Create a fresh digest context for this algorithm.
    pub(crate) fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            Algorithm::Md2 => Box::new(Md2::new()),
            Algorithm::Md5 => Box::new(Md5::new()),
            Algorithm::Sha1 => Box::new(Sha1::new()),
            Algorithm::Sha256 => Box::new(Sha256::new()),
            Algorithm::Sha384 => Box::new(Sha384::new()),
            Algorithm::Sha512 => Box::new(Sha512::new()),
            Algorithm::Sha512_224 => Box::new(Sha512_224::new()),
            Algorithm::Sha512_256 => Box::new(Sha512_256::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = HashStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "MD2" => Algorithm::Md2,
            "MD5" => Algorithm::Md5,
            "SHA-1" => Algorithm::Sha1,
            "SHA-256" => Algorithm::Sha256,
            "SHA-384" => Algorithm::Sha384,
            "SHA-512" => Algorithm::Sha512,
            "SHA-512/224" => Algorithm::Sha512_224,
            "SHA-512/256" => Algorithm::Sha512_256,
            _ => return Err(HashStoreError::UnsupportedAlgorithm(s.to_owned())),
        })
    }
}

/// A set of digest contexts updated in lock-step over one pass of input.
///
/// Construction schedules the five default algorithms plus any requested
/// extras; an extra equal to an algorithm already scheduled is coalesced
/// into the existing context rather than computed twice.
pub(crate) struct MultiDigester {
    contexts: Vec<(Algorithm, Box<dyn DynDigest>)>,
}

impl MultiDigester {
    pub fn new(extras: impl IntoIterator<Item = Algorithm>) -> Self {
        let mut algorithms: Vec<Algorithm> = Algorithm::DEFAULTS.to_vec();

        for extra in extras {
            if !algorithms.contains(&extra) {
                algorithms.push(extra);
            }
        }

        let contexts = algorithms.into_iter().map(|a| (a, a.hasher())).collect();
        MultiDigester { contexts }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, dc) in &mut self.contexts {
            dc.update(data);
        }
    }

    /// Consume the contexts and emit the digest map, with lower-case hex
    /// values keyed by algorithm.
    pub fn finish(self) -> BTreeMap<Algorithm, String> {
        self.contexts
            .into_iter()
            .map(|(a, dc)| (a, hex::encode(dc.finalize())))
            .collect()
    }
}

/// Compute the digest of everything readable from `reader`.
pub(crate) fn digest_of_reader(algorithm: Algorithm, reader: &mut impl Read) -> Result<String> {
    let mut dc = algorithm.hasher();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dc.update(&buf[..n]);
    }

    Ok(hex::encode(dc.finalize()))
}

/// Compute the digest of the file at `p` by streaming it.
pub(crate) fn digest_of_file(algorithm: Algorithm, p: impl AsRef<Path>) -> Result<String> {
    let mut f = fs::File::open(p)?;
    digest_of_reader(algorithm, &mut f)
}

/// One-shot digest of an identifier string, as used to derive reference and
/// metadata paths from pids.
pub(crate) fn hash_identifier(algorithm: Algorithm, s: &str) -> String {
    let mut dc = algorithm.hasher();
    dc.update(s.as_bytes());
    hex::encode(dc.finalize())
}
