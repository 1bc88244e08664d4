//! Checksum algorithms and incremental hashing.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::Error;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5 (32 hex characters).
    Md5,
    /// SHA-1 (40 hex characters).
    Sha1,
    /// SHA-224 (56 hex characters).
    Sha224,
    /// SHA-256 (64 hex characters).
    #[default]
    Sha256,
    /// SHA-384 (96 hex characters).
    Sha384,
    /// SHA-512 (128 hex characters).
    Sha512,
}

impl ChecksumAlgorithm {
    /// All algorithms, in ascending digest length.
    pub const ALL: [Self; 6] = [
        Self::Md5,
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
    ];

    /// Infers the algorithm from the length of a hex digest.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_core::ChecksumAlgorithm;
    ///
    /// assert_eq!(ChecksumAlgorithm::from_digest_len(64), Some(ChecksumAlgorithm::Sha256));
    /// assert_eq!(ChecksumAlgorithm::from_digest_len(10), None);
    /// ```
    #[must_use]
    pub fn from_digest_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.hex_len() == len)
    }

    /// Length of the hex digest produced by this algorithm.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha224 => 56,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Lowercase algorithm name, as used in registry property keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Creates a fresh incremental hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> Hasher {
        let inner = match self {
            Self::Md5 => HasherInner::Md5(Md5::new()),
            Self::Sha1 => HasherInner::Sha1(Sha1::new()),
            Self::Sha224 => HasherInner::Sha224(Sha224::new()),
            Self::Sha256 => HasherInner::Sha256(Sha256::new()),
            Self::Sha384 => HasherInner::Sha384(Sha384::new()),
            Self::Sha512 => HasherInner::Sha512(Sha512::new()),
        };
        Hasher { inner }
    }

    /// Computes the hex digest of a complete buffer.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "");
        Self::ALL
            .into_iter()
            .find(|algo| algo.as_str() == normalized)
            .ok_or_else(|| Error::UnsupportedChecksumAlgorithm {
                algorithm: s.to_string(),
            })
    }
}

#[derive(Clone)]
enum HasherInner {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Incremental hasher over one of the [`ChecksumAlgorithm`]s.
#[derive(Clone)]
pub struct Hasher {
    inner: HasherInner,
}

impl Hasher {
    /// Feeds more bytes into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherInner::Md5(h) => h.update(data),
            HasherInner::Sha1(h) => h.update(data),
            HasherInner::Sha224(h) => h.update(data),
            HasherInner::Sha256(h) => h.update(data),
            HasherInner::Sha384(h) => h.update(data),
            HasherInner::Sha512(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self.inner {
            HasherInner::Md5(h) => hex::encode(h.finalize()),
            HasherInner::Sha1(h) => hex::encode(h.finalize()),
            HasherInner::Sha224(h) => hex::encode(h.finalize()),
            HasherInner::Sha256(h) => hex::encode(h.finalize()),
            HasherInner::Sha384(h) => hex::encode(h.finalize()),
            HasherInner::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.inner {
            HasherInner::Md5(_) => ChecksumAlgorithm::Md5,
            HasherInner::Sha1(_) => ChecksumAlgorithm::Sha1,
            HasherInner::Sha224(_) => ChecksumAlgorithm::Sha224,
            HasherInner::Sha256(_) => ChecksumAlgorithm::Sha256,
            HasherInner::Sha384(_) => ChecksumAlgorithm::Sha384,
            HasherInner::Sha512(_) => ChecksumAlgorithm::Sha512,
        };
        f.debug_struct("Hasher").field("algorithm", &name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_from_digest_len() {
        assert_eq!(ChecksumAlgorithm::from_digest_len(32), Some(ChecksumAlgorithm::Md5));
        assert_eq!(ChecksumAlgorithm::from_digest_len(40), Some(ChecksumAlgorithm::Sha1));
        assert_eq!(ChecksumAlgorithm::from_digest_len(56), Some(ChecksumAlgorithm::Sha224));
        assert_eq!(ChecksumAlgorithm::from_digest_len(64), Some(ChecksumAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::from_digest_len(96), Some(ChecksumAlgorithm::Sha384));
        assert_eq!(ChecksumAlgorithm::from_digest_len(128), Some(ChecksumAlgorithm::Sha512));
        assert_eq!(ChecksumAlgorithm::from_digest_len(0), None);
        assert_eq!(ChecksumAlgorithm::from_digest_len(6), None);
        assert_eq!(ChecksumAlgorithm::from_digest_len(65), None);
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            ChecksumAlgorithm::Sha256.digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            ChecksumAlgorithm::Md5.digest(b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            ChecksumAlgorithm::Sha1.digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_digest_length_matches_algorithm() {
        for algo in ChecksumAlgorithm::ALL {
            assert_eq!(algo.digest(b"image").len(), algo.hex_len(), "{algo}");
        }
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("sha256".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha256);
        assert_eq!("SHA-512".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha512);
        assert_eq!("MD5".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Md5);

        let err = "blake3".parse::<ChecksumAlgorithm>().unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedChecksumAlgorithm { algorithm } if algorithm == "blake3"
        ));
    }
}
