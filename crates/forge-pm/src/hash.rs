//! Named-algorithm file digests.
//!
//! Catalog entries declare integrity as `"ALGO:hexdigest"`, e.g.
//! `SHA-256:ee6796...`. The digest is computed over the staged file in fixed
//! chunks and compared case-insensitively. On mismatch the file is left in
//! the staging folder so a retry can resume or redo the download.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{ForgeError, Result};

const READ_BUFFER: usize = 64 * 1024;

/// Digest algorithms the catalog may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha1,
    Md5,
}

impl Algorithm {
    /// Parse the algorithm name used in checksum fields (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA-256" | "SHA256" => Some(Algorithm::Sha256),
            "SHA-1" | "SHA1" => Some(Algorithm::Sha1),
            "MD5" => Some(Algorithm::Md5),
            _ => None,
        }
    }

    /// Canonical field name.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha1 => "SHA-1",
            Algorithm::Md5 => "MD5",
        }
    }
}

/// A computed file digest, rendered as `"ALGO:hexdigest"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    algorithm: Algorithm,
    digest: String,
}

impl FileHash {
    /// Compute the named digest over a file, streaming in fixed chunks.
    pub fn compute(algorithm: Algorithm, path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer = vec![0u8; READ_BUFFER];

        let digest = match algorithm {
            Algorithm::Sha256 => hash_reader(Sha256::new(), &mut file, &mut buffer)?,
            Algorithm::Sha1 => hash_reader(Sha1::new(), &mut file, &mut buffer)?,
            Algorithm::Md5 => hash_reader(Md5::new(), &mut file, &mut buffer)?,
        };

        Ok(Self { algorithm, digest })
    }

    /// Verify a file against a declared `"ALGO:hex"` checksum field.
    /// Hex comparison is case-insensitive.
    pub fn verify(path: &Path, declared: &str) -> Result<()> {
        let (algo_name, expected_hex) = declared
            .split_once(':')
            .ok_or_else(|| ForgeError::InvalidChecksum(declared.to_string()))?;
        let algorithm = Algorithm::from_name(algo_name)
            .ok_or_else(|| ForgeError::InvalidChecksum(declared.to_string()))?;

        let actual = Self::compute(algorithm, path)?;
        if actual.digest.eq_ignore_ascii_case(expected_hex) {
            Ok(())
        } else {
            // The staged file is deliberately left in place for retries.
            Err(ForgeError::ChecksumMismatch {
                file: path.display().to_string(),
                expected: declared.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn digest_hex(&self) -> &str {
        &self.digest
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.digest)
    }
}

fn hash_reader<D: Digest>(mut hasher: D, reader: &mut impl Read, buffer: &mut [u8]) -> Result<String> {
    loop {
        let n = reader.read(buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
