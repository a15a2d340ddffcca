//! Sequential writer for one leased range.

use std::sync::Arc;

use super::{SwarmCoordinator, SwarmError, SwarmFile};
use crate::range::Range;
use crate::storage::SwarmStorage;

/// Writes consecutive chunks into one destination file.
///
/// Every chunk is marked pending before it is written and written once
/// storage accepted it. Blocks that become verifiable are checked before
/// [`WriteJob::write`] returns. Closing (explicitly or on drop) returns
/// any chunk caught mid-write to the leased state so the lease owner can
/// release it.
pub struct WriteJob {
    coordinator: Arc<SwarmCoordinator>,
    storage: Arc<dyn SwarmStorage>,
    file: SwarmFile,
    cursor: u64,
    in_flight: Option<Range>,
    verifying: Vec<Range>,
    closed: bool,
}

impl WriteJob {
    pub(crate) fn new(
        coordinator: Arc<SwarmCoordinator>,
        storage: Arc<dyn SwarmStorage>,
        file: SwarmFile,
        offset: u64,
    ) -> Self {
        Self {
            coordinator,
            storage,
            file,
            cursor: offset,
            in_flight: None,
            verifying: Vec::new(),
            closed: false,
        }
    }

    /// Aggregate offset the next chunk lands at.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Destination file.
    pub fn file(&self) -> &SwarmFile {
        &self.file
    }

    /// Writes as much of `data` as fits in the file.
    ///
    /// Returns the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - `SwarmError::WriteJobClosed` - If the job was already closed
    /// - `SwarmError::InvalidTransition` - If the target bytes are not leased
    /// - `SwarmError::Storage` - If storage rejected the write; the chunk is unpended
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, SwarmError> {
        if self.closed {
            return Err(SwarmError::WriteJobClosed);
        }

        let room = (self.file.end() + 1).saturating_sub(self.cursor);
        let length = (data.len() as u64).min(room);
        let Some(range) = Range::with_length(self.cursor, length) else {
            return Ok(0);
        };

        self.coordinator.pending(range)?;
        self.in_flight = Some(range);

        let relative = self.cursor - self.file.start();
        let chunk = &data[..length as usize];
        if let Err(e) = self.storage.write_at(&self.file, relative, chunk).await {
            self.in_flight = None;
            self.coordinator.unpending(range)?;
            return Err(e.into());
        }

        let blocks = self.coordinator.wrote(range)?;
        self.in_flight = None;
        self.cursor += length;

        self.verifying = blocks;
        self.verify_blocks().await;
        Ok(length as usize)
    }

    /// Closes the job. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(range) = self.in_flight.take() {
            if let Err(e) = self.coordinator.unpending(range) {
                tracing::warn!("Failed to unpend interrupted write {}: {}", range, e);
            }
        }
        for block in self.verifying.drain(..) {
            if let Err(e) = self.coordinator.abandon_verification(block) {
                tracing::warn!("Failed to abandon verification of {}: {}", block, e);
            }
        }
    }

    async fn verify_blocks(&mut self) {
        while let Some(&block) = self.verifying.first() {
            let passed = if self.coordinator.verifier().needs_data() {
                match self.read_block(&block).await {
                    Ok(data) => self.coordinator.verifier().verify(&block, &data),
                    Err(e) => {
                        tracing::warn!("Could not read back block {}: {}", block, e);
                        false
                    }
                }
            } else {
                self.coordinator.verifier().verify(&block, &[])
            };

            self.verifying.remove(0);
            if let Err(e) = self.coordinator.verified(block, passed) {
                tracing::warn!("Verification result for {} rejected: {}", block, e);
            }
        }
    }

    async fn read_block(&self, block: &Range) -> Result<Vec<u8>, SwarmError> {
        let mut data = Vec::with_capacity(block.length() as usize);
        for (file, relative) in self.coordinator.files().split(block) {
            let piece = self
                .storage
                .read_at(file, relative.low(), relative.length() as usize)
                .await?;
            data.extend_from_slice(&piece);
        }
        Ok(data)
    }
}

impl Drop for WriteJob {
    fn drop(&mut self) {
        self.close();
    }
}
