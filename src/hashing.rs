//! Block-wise content hashing.
//!
//! Files are read in fixed-size blocks folded into one digest, so memory use
//! is bounded by the block size regardless of file size.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hasher as _;
use std::io::Read;
use std::path::Path;
use twox_hash::XxHash64;

use crate::config::HashAlgorithm;

/// A digest tagged with the algorithm that produced it.
///
/// Ordering is by algorithm then digest, so grouping by hash is stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ContentHash {
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.tag(), self.digest)
    }
}

impl HashAlgorithm {
    /// Short tag used in rendered digests.
    pub fn tag(&self) -> &'static str {
        match self {
            HashAlgorithm::Strong => "sha256",
            HashAlgorithm::Fast => "xxh64",
        }
    }
}

enum Folder {
    Sha256(Sha256),
    Xxh64(XxHash64),
}

impl Folder {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Strong => Folder::Sha256(Sha256::new()),
            HashAlgorithm::Fast => Folder::Xxh64(XxHash64::with_seed(0)),
        }
    }

    fn update(&mut self, block: &[u8]) {
        match self {
            Folder::Sha256(h) => h.update(block),
            Folder::Xxh64(h) => h.write(block),
        }
    }

    fn finish(self) -> String {
        match self {
            Folder::Sha256(h) => hex::encode(h.finalize()),
            Folder::Xxh64(h) => format!("{:016x}", h.finish()),
        }
    }
}

/// Hash everything `reader` yields.
pub fn hash_reader<R: Read>(
    mut reader: R,
    algorithm: HashAlgorithm,
    block_size: usize,
) -> std::io::Result<ContentHash> {
    let mut folder = Folder::new(algorithm);
    let mut block = vec![0u8; block_size.max(1)];
    loop {
        let n = reader.read(&mut block)?;
        if n == 0 {
            break;
        }
        folder.update(&block[..n]);
    }
    Ok(ContentHash {
        algorithm,
        digest: folder.finish(),
    })
}

/// Hash a file's contents.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm, block_size: usize) -> std::io::Result<ContentHash> {
    let file = std::fs::File::open(path)?;
    hash_reader(file, algorithm, block_size)
}
