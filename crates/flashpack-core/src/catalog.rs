//! Per-block digest catalog
//!
//! This module provides:
//! - Digest algorithms usable in a container (SHA-256, SHA-512)
//! - The ordered catalog of block digests
//! - A batching builder that hashes blocks (in parallel with the `parallel`
//!   feature) while keeping entries in emission order
//!
//! A consumer validates block *i* of a container against catalog entry *i*
//! while streaming, so entry order always equals block emission order.

use crate::error::{Error, Result};
use serde::Serialize;
use sha2::Digest;

// ============================================================================
// Digest Algorithm
// ============================================================================

/// Algorithm identifier stored in the security header for SHA-256
pub const ALG_ID_SHA256: u32 = 0x0000_800C;

/// Algorithm identifier stored in the security header for SHA-512
pub const ALG_ID_SHA512: u32 = 0x0000_800E;

/// Supported block digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DigestAlgorithm {
    /// SHA-256 (default)
    Sha256,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Digest length in bytes
    pub fn byte_length(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Identifier written to the security header
    pub fn id(&self) -> u32 {
        match self {
            DigestAlgorithm::Sha256 => ALG_ID_SHA256,
            DigestAlgorithm::Sha512 => ALG_ID_SHA512,
        }
    }

    /// Look up an algorithm by its header identifier
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            ALG_ID_SHA256 => Some(DigestAlgorithm::Sha256),
            ALG_ID_SHA512 => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Hash one block
    pub fn digest(&self, data: &[u8]) -> BlockDigest {
        let bytes = match self {
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        };
        BlockDigest(bytes)
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.to_lowercase();
        match s.as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(Error::Configuration(format!(
                "Unknown digest algorithm: {}",
                s
            ))),
        }
    }
}

// ============================================================================
// Digests and entries
// ============================================================================

/// Digest of a single data block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockDigest(pub Vec<u8>);

impl BlockDigest {
    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One catalog row: the digest of the block emitted at `index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Emission index of the block
    pub index: u64,
    /// Digest of the block bytes
    pub digest: BlockDigest,
}

/// Ordered digest table covering every data block of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    algorithm: DigestAlgorithm,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            entries: Vec::new(),
        }
    }

    /// Digest algorithm of every entry
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in emission order
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Entry for block `index`
    pub fn get(&self, index: u64) -> Option<&CatalogEntry> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    /// Append the digest of the next block
    ///
    /// Fails unless `index` is exactly the next emission index.
    pub fn push(&mut self, index: u64, digest: BlockDigest) -> Result<()> {
        let expected = self.entries.len() as u64;
        if index != expected {
            return Err(Error::Layout(format!(
                "catalog entry {} pushed out of order (expected {})",
                index, expected
            )));
        }
        if digest.0.len() != self.algorithm.byte_length() {
            return Err(Error::Layout(format!(
                "catalog entry {} has {} digest bytes, {} expects {}",
                index,
                digest.0.len(),
                self.algorithm,
                self.algorithm.byte_length()
            )));
        }
        self.entries.push(CatalogEntry { index, digest });
        Ok(())
    }

    /// Serialized size in bytes
    pub fn byte_size(&self) -> u64 {
        self.entries.len() as u64 * self.algorithm.byte_length() as u64
    }

    /// Serialize as concatenated digests
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size() as usize);
        for entry in &self.entries {
            out.extend_from_slice(entry.digest.as_bytes());
        }
        out
    }

    /// Parse concatenated digests
    pub fn from_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> Result<Self> {
        let len = algorithm.byte_length();
        if bytes.len() % len != 0 {
            return Err(Error::malformed(format!(
                "catalog size {} is not a multiple of the {} digest length {}",
                bytes.len(),
                algorithm,
                len
            )));
        }

        let entries = bytes
            .chunks_exact(len)
            .enumerate()
            .map(|(i, chunk)| CatalogEntry {
                index: i as u64,
                digest: BlockDigest(chunk.to_vec()),
            })
            .collect();

        Ok(Self { algorithm, entries })
    }

    /// Check one block against its entry
    pub fn verify_block(&self, index: u64, data: &[u8]) -> Result<()> {
        let entry = self.get(index).ok_or_else(|| {
            Error::malformed(format!(
                "block {} has no catalog entry ({} entries)",
                index,
                self.entries.len()
            ))
        })?;

        let actual = self.algorithm.digest(data);
        if actual != entry.digest {
            return Err(Error::DigestMismatch {
                index,
                expected: entry.digest.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects emitted blocks and appends their digests in order
///
/// Blocks are buffered up to the batch size, hashed together, then appended
/// by index. Memory is bounded by one batch.
pub struct CatalogBuilder {
    catalog: Catalog,
    batch: Vec<(u64, Vec<u8>)>,
    batch_size: usize,
    next_index: u64,
}

impl CatalogBuilder {
    /// Create a builder hashing `batch_size` blocks at a time
    pub fn new(algorithm: DigestAlgorithm, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            catalog: Catalog::new(algorithm),
            batch: Vec::with_capacity(batch_size),
            batch_size,
            next_index: 0,
        }
    }

    /// Index the next added block will receive
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Add the next emitted block and return its index
    pub fn add(&mut self, data: &[u8]) -> Result<u64> {
        let index = self.next_index;
        self.next_index += 1;
        self.batch.push((index, data.to_vec()));
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(index)
    }

    /// Append an already-known digest (copied from another catalog)
    pub fn add_digest(&mut self, digest: BlockDigest) -> Result<u64> {
        self.flush()?;
        let index = self.next_index;
        self.next_index += 1;
        self.catalog.push(index, digest)?;
        Ok(index)
    }

    /// Hash any buffered blocks
    pub fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.batch);
        for (index, digest) in hash_blocks(self.catalog.algorithm(), batch) {
            self.catalog.push(index, digest)?;
        }
        self.batch = Vec::with_capacity(self.batch_size);
        Ok(())
    }

    /// Finish and return the catalog
    pub fn finish(mut self) -> Result<Catalog> {
        self.flush()?;
        Ok(self.catalog)
    }
}

/// Hash a batch of indexed blocks, returning digests sorted by index
#[cfg(feature = "parallel")]
pub fn hash_blocks(algorithm: DigestAlgorithm, blocks: Vec<(u64, Vec<u8>)>) -> Vec<(u64, BlockDigest)> {
    use rayon::prelude::{IntoParallelIterator, ParallelIterator};

    let mut digests: Vec<(u64, BlockDigest)> = blocks
        .into_par_iter()
        .map(|(index, data)| (index, algorithm.digest(&data)))
        .collect();
    digests.sort_by_key(|(index, _)| *index);
    digests
}

/// Hash a batch of indexed blocks, returning digests sorted by index
#[cfg(not(feature = "parallel"))]
pub fn hash_blocks(algorithm: DigestAlgorithm, blocks: Vec<(u64, Vec<u8>)>) -> Vec<(u64, BlockDigest)> {
    let mut digests: Vec<(u64, BlockDigest)> = blocks
        .into_iter()
        .map(|(index, data)| (index, algorithm.digest(&data)))
        .collect();
    digests.sort_by_key(|(index, _)| *index);
    digests
}
