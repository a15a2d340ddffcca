//! Content verification of written blocks.
//!
//! After each write the coordinator asks the verifier which written
//! blocks are now ready to check. The write job reads those blocks back
//! from storage and reports the outcome, which either promotes the bytes
//! to verified or returns them to the needed pool.

use sha1::{Digest, Sha1};

use crate::range::{IntervalSet, Range};

/// Decides when written bytes can be verified and checks them.
pub trait BlockVerifier: Send + Sync {
    /// Ranges of `written` that became verifiable, excluding anything
    /// already `verifying`.
    fn scan(&self, written: &IntervalSet, verifying: &IntervalSet, total_size: u64) -> Vec<Range>;

    /// Whether [`BlockVerifier::verify`] needs the block contents.
    fn needs_data(&self) -> bool {
        true
    }

    /// Checks one block returned by [`BlockVerifier::scan`].
    fn verify(&self, block: &Range, data: &[u8]) -> bool;
}

/// Accepts every written byte as soon as it lands.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVerification;

impl BlockVerifier for NoVerification {
    fn scan(&self, written: &IntervalSet, verifying: &IntervalSet, _total_size: u64) -> Vec<Range> {
        let mut ready = written.clone();
        ready.remove_set(verifying);
        ready.ranges().to_vec()
    }

    fn needs_data(&self) -> bool {
        false
    }

    fn verify(&self, _block: &Range, _data: &[u8]) -> bool {
        true
    }
}

/// Errors building a block verifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    /// Block size of zero
    #[error("Block size must be greater than zero")]
    ZeroBlockSize,

    /// Digest string is not 40 hex characters
    #[error("Invalid SHA-1 digest {digest:?}")]
    InvalidDigest {
        /// Offending digest
        digest: String,
    },

    /// Digest count does not match the number of blocks in the download
    #[error("Expected {expected} block digests, got {actual}")]
    DigestCount {
        /// Blocks in the download
        expected: u64,
        /// Digests supplied
        actual: usize,
    },
}

/// Verifies fixed-size blocks against known SHA-1 digests.
///
/// Block `i` covers `[i * block_size, (i + 1) * block_size - 1]`, with the
/// final block cut short at the end of the download.
#[derive(Debug, Clone)]
pub struct Sha1BlockVerifier {
    block_size: u64,
    digests: Vec<[u8; 20]>,
}

impl Sha1BlockVerifier {
    /// Creates a verifier for a download of `total_size` bytes.
    ///
    /// # Errors
    ///
    /// - `VerifierError::ZeroBlockSize` - If `block_size` is zero
    /// - `VerifierError::DigestCount` - If there is not one digest per block
    pub fn new(
        block_size: u64,
        total_size: u64,
        digests: Vec<[u8; 20]>,
    ) -> Result<Self, VerifierError> {
        if block_size == 0 {
            return Err(VerifierError::ZeroBlockSize);
        }
        let expected = total_size.div_ceil(block_size);
        if digests.len() as u64 != expected {
            return Err(VerifierError::DigestCount {
                expected,
                actual: digests.len(),
            });
        }
        Ok(Self {
            block_size,
            digests,
        })
    }

    /// Creates a verifier from hex-encoded digests.
    ///
    /// # Errors
    ///
    /// - `VerifierError::InvalidDigest` - If a digest is not valid hex SHA-1
    /// - `VerifierError::ZeroBlockSize` - If `block_size` is zero
    /// - `VerifierError::DigestCount` - If there is not one digest per block
    pub fn from_hex<S: AsRef<str>>(
        block_size: u64,
        total_size: u64,
        digests: &[S],
    ) -> Result<Self, VerifierError> {
        let parsed = digests
            .iter()
            .map(|digest| {
                let digest = digest.as_ref();
                hex::decode(digest)
                    .ok()
                    .and_then(|bytes| <[u8; 20]>::try_from(bytes).ok())
                    .ok_or_else(|| VerifierError::InvalidDigest {
                        digest: digest.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(block_size, total_size, parsed)
    }

    /// Computes block digests of known content.
    ///
    /// # Errors
    ///
    /// - `VerifierError::ZeroBlockSize` - If `block_size` is zero
    pub fn from_content(block_size: u64, content: &[u8]) -> Result<Self, VerifierError> {
        if block_size == 0 {
            return Err(VerifierError::ZeroBlockSize);
        }
        let chunk = usize::try_from(block_size).unwrap_or(usize::MAX);
        let digests = content
            .chunks(chunk)
            .map(|block| Sha1::digest(block).into())
            .collect();
        Self::new(block_size, content.len() as u64, digests)
    }

    /// Size of every block except possibly the last.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    fn block(&self, index: u64, total_size: u64) -> Range {
        let low = index * self.block_size;
        let high = (low + self.block_size - 1).min(total_size - 1);
        Range::new(low, high)
    }
}

impl BlockVerifier for Sha1BlockVerifier {
    fn scan(&self, written: &IntervalSet, verifying: &IntervalSet, total_size: u64) -> Vec<Range> {
        let mut ready = Vec::new();
        for range in written {
            let mut index = range.low().div_ceil(self.block_size);
            while index * self.block_size < total_size {
                let block = self.block(index, total_size);
                if block.high() > range.high() {
                    break;
                }
                if !verifying.overlaps(&block) {
                    ready.push(block);
                }
                index += 1;
            }
        }
        ready
    }

    fn verify(&self, block: &Range, data: &[u8]) -> bool {
        let index = block.low() / self.block_size;
        let Some(expected) = usize::try_from(index)
            .ok()
            .and_then(|i| self.digests.get(i))
        else {
            return false;
        };
        let actual: [u8; 20] = Sha1::digest(data).into();
        actual == *expected
    }
}
