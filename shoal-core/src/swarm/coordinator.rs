//! Byte-range lease allocator shared by every source of a download.
//!
//! Each aggregate byte lives in exactly one state set:
//!
//! ```text
//! needed -> leased -> pending -> written -> verified
//!    ^        |          |          |
//!    +--------+          |          |  unlease / renew
//!             ^----------+          |  unpending
//!    ^------------------------------+  verification failed
//! ```
//!
//! All transitions happen under one lock and none of them perform I/O,
//! so the partition of the byte space can never be torn by interleaving.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, broadcast};

use super::selector::{ContiguousSelector, SelectionStrategy};
use super::verifier::{BlockVerifier, NoVerification};
use super::write_job::WriteJob;
use super::{LeaseState, SwarmError, SwarmFile, SwarmFileSystem};
use crate::config::SwarmConfig;
use crate::range::{IntervalSet, Range};
use crate::storage::SwarmStorage;

/// Lease table changes broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Bytes were handed to a source
    Leased(Range),
    /// Bytes returned to the needed pool
    Unleased(Range),
    /// Bytes reached storage
    Written(Range),
    /// Bytes passed verification
    Verified(Range),
    /// Bytes failed verification and must be downloaded again
    VerificationFailed(Range),
    /// Every byte of one destination file is verified
    FileCompleted { path: String },
    /// Every byte of the download is verified
    DownloadCompleted,
}

/// Byte counts per lease state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeaseSnapshot {
    pub total: u64,
    pub needed: u64,
    pub leased: u64,
    pub pending: u64,
    pub written: u64,
    pub verified: u64,
    pub lost: u64,
}

#[derive(Debug)]
struct LeaseTable {
    needed: IntervalSet,
    leased: IntervalSet,
    pending: IntervalSet,
    written: IntervalSet,
    // Subset of `written` already handed to a write job for verification
    verifying: IntervalSet,
    verified: IntervalSet,
    lost: u64,
    completed_files: Vec<bool>,
    completion_announced: bool,
}

impl LeaseTable {
    fn new(full: Range, file_count: usize) -> Self {
        Self {
            needed: IntervalSet::singleton(full),
            leased: IntervalSet::new(),
            pending: IntervalSet::new(),
            written: IntervalSet::new(),
            verifying: IntervalSet::new(),
            verified: IntervalSet::new(),
            lost: 0,
            completed_files: vec![false; file_count],
            completion_announced: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.needed.is_empty()
            && self.leased.is_empty()
            && self.pending.is_empty()
            && self.written.is_empty()
    }

    fn holds_completed(&self, range: &Range) -> bool {
        self.pending.overlaps(range)
            || self.written.overlaps(range)
            || self.verified.overlaps(range)
    }

    // Moves whatever part of `range` is leased back to needed.
    fn release(&mut self, range: Range) -> IntervalSet {
        let released = self.leased.intersect_range(&range);
        self.leased.remove(range);
        self.needed.add_set(&released);
        released
    }
}

/// Allocates disjoint byte ranges to sources and tracks their progress.
///
/// The coordinator is the only component that mutates lease state. It is
/// shared through an `Arc` between every source downloader of one
/// download, and never holds its lock across an `.await`.
pub struct SwarmCoordinator {
    files: SwarmFileSystem,
    table: Mutex<LeaseTable>,
    selector: Box<dyn SelectionStrategy>,
    verifier: Arc<dyn BlockVerifier>,
    lease_available: Notify,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl SwarmCoordinator {
    /// Creates a coordinator that trusts every written byte.
    pub fn new(files: SwarmFileSystem, config: &SwarmConfig) -> Self {
        Self::with_verifier(files, config, Arc::new(NoVerification))
    }

    /// Creates a coordinator that verifies written blocks with `verifier`.
    pub fn with_verifier(
        files: SwarmFileSystem,
        config: &SwarmConfig,
        verifier: Arc<dyn BlockVerifier>,
    ) -> Self {
        let table = LeaseTable::new(files.full_range(), files.files().len());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            files,
            table: Mutex::new(table),
            selector: Box::new(ContiguousSelector::new(
                config.max_lease_size.max(1),
                config.block_size.max(1),
            )),
            verifier,
            lease_available: Notify::new(),
            events,
        }
    }

    /// Replaces the lease selection strategy.
    pub fn with_selector(mut self, selector: Box<dyn SelectionStrategy>) -> Self {
        self.selector = selector;
        self
    }

    /// Destination file layout.
    pub fn files(&self) -> &SwarmFileSystem {
        &self.files
    }

    /// Total download size in bytes.
    pub fn total_size(&self) -> u64 {
        self.files.total_size()
    }

    pub(crate) fn verifier(&self) -> &Arc<dyn BlockVerifier> {
        &self.verifier
    }

    /// Receives lease table events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Woken whenever bytes return to the needed pool or the download completes.
    pub fn lease_available(&self) -> &Notify {
        &self.lease_available
    }

    /// Leases a portion of the needed bytes that `candidates` can supply.
    ///
    /// Returns `None` when no candidate byte is currently needed, which is
    /// not an error: another source may release bytes later. Always
    /// returns `None` once the download is complete.
    pub fn lease_portion(&self, candidates: &IntervalSet) -> Option<Range> {
        let mut table = self.table.lock();
        if table.is_complete() {
            return None;
        }

        let available = candidates.intersect(&table.needed);
        let range = self.selector.select(&available)?;
        table.needed.remove(range);
        table.leased.add(range);
        drop(table);

        tracing::trace!("Leased {}", range);
        self.emit(CoordinatorEvent::Leased(range));
        Some(range)
    }

    /// Leases a portion of any needed bytes.
    pub fn lease(&self) -> Option<Range> {
        self.lease_portion(&IntervalSet::singleton(self.files.full_range()))
    }

    /// Leases exactly `range`, or nothing if any byte of it is not needed.
    ///
    /// Used for sources that can only serve whole files.
    pub fn lease_exact(&self, range: Range) -> Option<Range> {
        let mut table = self.table.lock();
        if table.is_complete() || !table.needed.contains(&range) {
            return None;
        }
        table.needed.remove(range);
        table.leased.add(range);
        drop(table);

        tracing::trace!("Leased exact {}", range);
        self.emit(CoordinatorEvent::Leased(range));
        Some(range)
    }

    /// Shrinks lease `old` to `new`, returning the difference to the needed pool.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidRenewal` - If `new` is not inside `old`; nothing is changed
    pub fn renew_lease(&self, old: Range, new: Range) -> Result<Range, SwarmError> {
        if !old.contains(&new) {
            return Err(SwarmError::InvalidRenewal { old, new });
        }

        let mut released = IntervalSet::new();
        {
            let mut table = self.table.lock();
            if old.low() < new.low() {
                released.add_set(&table.release(Range::new(old.low(), new.low() - 1)));
            }
            if new.high() < old.high() {
                released.add_set(&table.release(Range::new(new.high() + 1, old.high())));
            }
        }

        tracing::trace!("Renewed lease {} as {}", old, new);
        self.announce_released(&released);
        Ok(new)
    }

    /// Returns leased bytes of `range` to the needed pool.
    ///
    /// Bytes that are already needed are left alone.
    ///
    /// # Errors
    ///
    /// - `SwarmError::UnleaseCompleted` - If any byte is pending, written or verified; nothing is changed
    pub fn unlease(&self, range: Range) -> Result<(), SwarmError> {
        let released = {
            let mut table = self.table.lock();
            if table.holds_completed(&range) {
                return Err(SwarmError::UnleaseCompleted { range });
            }
            table.release(range)
        };

        tracing::trace!("Unleased {}", range);
        self.announce_released(&released);
        Ok(())
    }

    /// Marks leased bytes as handed to a write job.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidTransition` - If any byte of `range` is not leased
    pub fn pending(&self, range: Range) -> Result<(), SwarmError> {
        let mut table = self.table.lock();
        if !table.leased.contains(&range) {
            return Err(SwarmError::InvalidTransition {
                range,
                expected: LeaseState::Leased,
            });
        }
        table.leased.remove(range);
        table.pending.add(range);
        Ok(())
    }

    /// Returns pending bytes to the leased state after an aborted write.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidTransition` - If any byte of `range` is not pending
    pub fn unpending(&self, range: Range) -> Result<(), SwarmError> {
        let mut table = self.table.lock();
        if !table.pending.contains(&range) {
            return Err(SwarmError::InvalidTransition {
                range,
                expected: LeaseState::Pending,
            });
        }
        table.pending.remove(range);
        table.leased.add(range);
        Ok(())
    }

    /// Marks pending bytes as written.
    ///
    /// Returns the blocks that became ready for verification. The caller
    /// owns them and must report each through [`SwarmCoordinator::verified`]
    /// or [`SwarmCoordinator::abandon_verification`].
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidTransition` - If any byte of `range` is not pending
    pub fn wrote(&self, range: Range) -> Result<Vec<Range>, SwarmError> {
        let blocks = {
            let mut table = self.table.lock();
            if !table.pending.contains(&range) {
                return Err(SwarmError::InvalidTransition {
                    range,
                    expected: LeaseState::Pending,
                });
            }
            table.pending.remove(range);
            table.written.add(range);

            let total = self.files.total_size();
            let blocks = self.verifier.scan(&table.written, &table.verifying, total);
            for block in &blocks {
                table.verifying.add(*block);
            }
            blocks
        };

        tracing::trace!("Wrote {}, {} block(s) ready to verify", range, blocks.len());
        self.emit(CoordinatorEvent::Written(range));
        Ok(blocks)
    }

    /// Records the verification outcome of a block returned by `wrote`.
    ///
    /// A failed block goes back to the needed pool and counts as lost.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidTransition` - If `block` is not awaiting verification
    pub fn verified(&self, block: Range, passed: bool) -> Result<(), SwarmError> {
        let mut completed_files = Vec::new();
        let mut download_completed = false;
        {
            let mut table = self.table.lock();
            if !table.verifying.contains(&block) {
                return Err(SwarmError::InvalidTransition {
                    range: block,
                    expected: LeaseState::Written,
                });
            }
            table.verifying.remove(block);
            table.written.remove(block);

            if passed {
                table.verified.add(block);
                for (index, file) in self.files.files().iter().enumerate() {
                    if !table.completed_files[index]
                        && file.range().overlaps(&block)
                        && table.verified.contains(&file.range())
                    {
                        table.completed_files[index] = true;
                        completed_files.push(file.path().to_string());
                    }
                }
                if table.is_complete() && !table.completion_announced {
                    table.completion_announced = true;
                    download_completed = true;
                }
            } else {
                table.needed.add(block);
                table.lost += block.length();
            }
        }

        if passed {
            tracing::trace!("Verified {}", block);
            self.emit(CoordinatorEvent::Verified(block));
        } else {
            tracing::warn!("Block {} failed verification", block);
            self.emit(CoordinatorEvent::VerificationFailed(block));
            self.lease_available.notify_waiters();
        }

        for path in completed_files {
            tracing::info!("File {} completed", path);
            self.emit(CoordinatorEvent::FileCompleted { path });
        }
        if download_completed {
            tracing::info!("Download completed: {} bytes", self.files.total_size());
            self.emit(CoordinatorEvent::DownloadCompleted);
            self.lease_available.notify_waiters();
        }
        Ok(())
    }

    /// Returns a block whose verification was interrupted to the needed pool.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidTransition` - If `block` is not awaiting verification
    pub fn abandon_verification(&self, block: Range) -> Result<(), SwarmError> {
        {
            let mut table = self.table.lock();
            if !table.verifying.contains(&block) {
                return Err(SwarmError::InvalidTransition {
                    range: block,
                    expected: LeaseState::Written,
                });
            }
            table.verifying.remove(block);
            table.written.remove(block);
            table.needed.add(block);
        }

        tracing::debug!("Abandoned verification of {}", block);
        self.announce_released(&IntervalSet::singleton(block));
        Ok(())
    }

    /// Destination file that owns the low byte of `range`.
    ///
    /// # Errors
    ///
    /// - `SwarmError::OutOfBounds` - If `range` starts past the end of the download
    pub fn swarm_file(&self, range: &Range) -> Result<SwarmFile, SwarmError> {
        self.files
            .file_at(range.low())
            .cloned()
            .ok_or(SwarmError::OutOfBounds {
                offset: range.low(),
                total: self.files.total_size(),
            })
    }

    /// Whether every byte is verified and nothing is outstanding.
    pub fn is_complete(&self) -> bool {
        self.table.lock().is_complete()
    }

    /// Whether any byte of `candidates` still has to be verified.
    pub fn has_outstanding(&self, candidates: &IntervalSet) -> bool {
        let mut outstanding = candidates.intersect_range(&self.files.full_range());
        outstanding.remove_set(&self.table.lock().verified);
        !outstanding.is_empty()
    }

    /// Opens a write job starting at aggregate `offset`.
    ///
    /// # Errors
    ///
    /// - `SwarmError::OutOfBounds` - If `offset` is past the end of the download
    pub fn new_write_job(
        self: &Arc<Self>,
        offset: u64,
        storage: Arc<dyn SwarmStorage>,
    ) -> Result<WriteJob, SwarmError> {
        let file = self
            .files
            .file_at(offset)
            .cloned()
            .ok_or(SwarmError::OutOfBounds {
                offset,
                total: self.files.total_size(),
            })?;
        Ok(WriteJob::new(Arc::clone(self), storage, file, offset))
    }

    /// Returns every leased and pending byte to the needed pool.
    ///
    /// Used on shutdown once no writer can still be running. Returns the
    /// number of bytes released.
    pub fn release_all_leases(&self) -> u64 {
        let released = {
            let mut table = self.table.lock();
            let mut released = std::mem::take(&mut table.leased);
            released.add_set(&std::mem::take(&mut table.pending));
            table.needed.add_set(&released);
            released
        };

        let bytes = released.byte_count();
        if bytes > 0 {
            tracing::debug!("Released {} outstanding leased bytes", bytes);
        }
        self.announce_released(&released);
        bytes
    }

    /// Byte counts per state.
    pub fn snapshot(&self) -> LeaseSnapshot {
        let table = self.table.lock();
        LeaseSnapshot {
            total: self.files.total_size(),
            needed: table.needed.byte_count(),
            leased: table.leased.byte_count(),
            pending: table.pending.byte_count(),
            written: table.written.byte_count(),
            verified: table.verified.byte_count(),
            lost: table.lost,
        }
    }

    /// Bytes of the download that are currently needed.
    pub fn needed_ranges(&self) -> IntervalSet {
        self.table.lock().needed.clone()
    }

    /// Bytes that passed verification.
    pub fn amount_verified(&self) -> u64 {
        self.table.lock().verified.byte_count()
    }

    /// Bytes discarded after failing verification.
    pub fn amount_lost(&self) -> u64 {
        self.table.lock().lost
    }

    fn announce_released(&self, released: &IntervalSet) {
        if released.is_empty() {
            return;
        }
        for range in released {
            self.emit(CoordinatorEvent::Unleased(*range));
        }
        self.lease_available.notify_waiters();
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for SwarmCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmCoordinator")
            .field("files", &self.files)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use proptest::prelude::*;

    use super::*;
    use crate::swarm::Sha1BlockVerifier;

    fn config(max_lease_size: u64) -> SwarmConfig {
        SwarmConfig {
            max_lease_size,
            block_size: 1,
            ..SwarmConfig::default()
        }
    }

    fn coordinator(total: u64, max_lease_size: u64) -> SwarmCoordinator {
        let files = SwarmFileSystem::single("file.bin", total).unwrap();
        SwarmCoordinator::new(files, &config(max_lease_size))
    }

    fn complete(coordinator: &SwarmCoordinator, range: Range) {
        coordinator.pending(range).unwrap();
        for block in coordinator.wrote(range).unwrap() {
            coordinator.verified(block, true).unwrap();
        }
    }

    #[test]
    fn test_lease_respects_candidates() {
        let coordinator = coordinator(1000, 1000);
        let candidates = IntervalSet::singleton(Range::new(200, 299));

        assert_eq!(
            coordinator.lease_portion(&candidates),
            Some(Range::new(200, 299))
        );
        assert_eq!(coordinator.lease_portion(&candidates), None);
        assert_eq!(coordinator.lease(), Some(Range::new(0, 199)));
        assert_eq!(coordinator.lease(), Some(Range::new(300, 999)));
        assert_eq!(coordinator.lease(), None);
        assert!(!coordinator.is_complete());
    }

    #[test]
    fn test_lease_capped_by_max_size() {
        let coordinator = coordinator(1000, 300);
        assert_eq!(coordinator.lease(), Some(Range::new(0, 299)));
        assert_eq!(coordinator.lease(), Some(Range::new(300, 599)));
    }

    #[test]
    fn test_lease_exact_requires_all_needed() {
        let coordinator = coordinator(1000, 100);
        assert_eq!(coordinator.lease(), Some(Range::new(0, 99)));

        assert_eq!(coordinator.lease_exact(Range::new(0, 999)), None);
        assert_eq!(
            coordinator.lease_exact(Range::new(100, 999)),
            Some(Range::new(100, 999))
        );
    }

    #[test]
    fn test_renew_lease_returns_both_ends() {
        let coordinator = coordinator(1000, 1000);
        let lease = coordinator.lease().unwrap();

        let renewed = coordinator
            .renew_lease(lease, Range::new(100, 199))
            .unwrap();
        assert_eq!(renewed, Range::new(100, 199));

        let needed = coordinator.needed_ranges();
        assert_eq!(
            needed.ranges(),
            &[Range::new(0, 99), Range::new(200, 999)]
        );
        assert_eq!(coordinator.snapshot().leased, 100);
    }

    #[test]
    fn test_renew_lease_rejects_growth_without_mutation() {
        let coordinator = coordinator(1000, 500);
        let lease = coordinator.lease().unwrap();
        let before = coordinator.snapshot();

        let result = coordinator.renew_lease(lease, Range::new(0, 600));
        assert!(matches!(result, Err(SwarmError::InvalidRenewal { .. })));
        assert_eq!(coordinator.snapshot(), before);
    }

    #[test]
    fn test_unlease_is_noop_for_free_bytes() {
        let coordinator = coordinator(1000, 100);
        let lease = coordinator.lease().unwrap();

        coordinator.unlease(lease).unwrap();
        coordinator.unlease(lease).unwrap();
        coordinator.unlease(Range::new(500, 999)).unwrap();

        assert_eq!(coordinator.snapshot().needed, 1000);
    }

    #[test]
    fn test_unlease_of_completed_bytes_fails_without_mutation() {
        let coordinator = coordinator(1000, 200);
        let lease = coordinator.lease().unwrap();
        complete(&coordinator, Range::new(0, 99));
        let before = coordinator.snapshot();

        let result = coordinator.unlease(lease);
        assert!(matches!(result, Err(SwarmError::UnleaseCompleted { .. })));
        assert_eq!(coordinator.snapshot(), before);

        coordinator.unlease(Range::new(100, 199)).unwrap();
        assert_eq!(coordinator.snapshot().leased, 0);
    }

    #[test]
    fn test_completion_gating() {
        let coordinator = coordinator(100, 100);
        let lease = coordinator.lease().unwrap();
        complete(&coordinator, lease);

        assert!(coordinator.is_complete());
        assert_eq!(coordinator.lease(), None);
        assert_eq!(
            coordinator.lease_portion(&IntervalSet::singleton(Range::new(0, u64::MAX))),
            None
        );
        assert_eq!(coordinator.lease_exact(Range::new(0, 99)), None);
    }

    #[test]
    fn test_transitions_require_source_state() {
        let coordinator = coordinator(1000, 100);
        assert!(coordinator.pending(Range::new(0, 9)).is_err());

        let lease = coordinator.lease().unwrap();
        coordinator.pending(Range::new(0, 9)).unwrap();
        assert!(coordinator.wrote(Range::new(0, 19)).is_err());
        coordinator.unpending(Range::new(0, 9)).unwrap();
        assert_eq!(coordinator.snapshot().leased, lease.length());
        assert!(coordinator.verified(Range::new(0, 9), true).is_err());
    }

    #[test]
    fn test_failed_verification_returns_bytes() {
        let content = vec![1u8; 200];
        let files = SwarmFileSystem::single("file.bin", 200).unwrap();
        let verifier = Arc::new(Sha1BlockVerifier::from_content(100, &content).unwrap());
        let coordinator = SwarmCoordinator::with_verifier(files, &config(200), verifier);

        let lease = coordinator.lease().unwrap();
        coordinator.pending(lease).unwrap();
        let blocks = coordinator.wrote(lease).unwrap();
        assert_eq!(blocks, vec![Range::new(0, 99), Range::new(100, 199)]);

        coordinator.verified(blocks[0], true).unwrap();
        coordinator.verified(blocks[1], false).unwrap();

        assert_eq!(coordinator.amount_verified(), 100);
        assert_eq!(coordinator.amount_lost(), 100);
        assert_eq!(coordinator.lease(), Some(Range::new(100, 199)));
    }

    #[test]
    fn test_events_announce_completion() {
        let files = SwarmFileSystem::new([("a", 50), ("b", 50)]).unwrap();
        let coordinator = SwarmCoordinator::new(files, &config(100));
        let mut events = coordinator.subscribe();

        let lease = coordinator.lease().unwrap();
        complete(&coordinator, lease);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&CoordinatorEvent::FileCompleted {
            path: "a".to_string()
        }));
        assert!(seen.contains(&CoordinatorEvent::FileCompleted {
            path: "b".to_string()
        }));
        assert_eq!(seen.last(), Some(&CoordinatorEvent::DownloadCompleted));
    }

    #[test]
    fn test_release_all_leases() {
        let coordinator = coordinator(1000, 100);
        let first = coordinator.lease().unwrap();
        let _second = coordinator.lease().unwrap();
        coordinator.pending(first).unwrap();

        assert_eq!(coordinator.release_all_leases(), 200);
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.leased + snapshot.pending, 0);
        assert_eq!(snapshot.needed, 1000);
    }

    #[test]
    fn test_has_outstanding() {
        let coordinator = coordinator(1000, 100);
        let source = IntervalSet::singleton(Range::new(0, 99));
        assert!(coordinator.has_outstanding(&source));

        let lease = coordinator.lease_portion(&source).unwrap();
        assert!(coordinator.has_outstanding(&source));
        complete(&coordinator, lease);
        assert!(!coordinator.has_outstanding(&source));
        assert!(!coordinator.has_outstanding(&IntervalSet::singleton(Range::new(5000, 6000))));
    }

    fn assert_partition(coordinator: &SwarmCoordinator) {
        let table = coordinator.table.lock();
        let sets = [
            &table.needed,
            &table.leased,
            &table.pending,
            &table.written,
            &table.verified,
        ];

        let mut union = IntervalSet::new();
        let mut total = 0;
        for set in sets {
            total += set.byte_count();
            union.add_set(set);
        }
        assert_eq!(total, coordinator.total_size(), "sets overlap");
        assert_eq!(union.ranges(), &[coordinator.files().full_range()]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Lease(u64, u64),
        Renew(usize, u64, u64),
        Unlease(usize),
        Complete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..1000, 1u64..300).prop_map(|(low, len)| Op::Lease(low, len)),
            (any::<usize>(), 0u64..50, 0u64..50).prop_map(|(i, a, b)| Op::Renew(i, a, b)),
            any::<usize>().prop_map(Op::Unlease),
            any::<usize>().prop_map(Op::Complete),
        ]
    }

    proptest! {
        #[test]
        fn test_partition_holds_under_any_sequence(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let coordinator = coordinator(1000, 128);
            let mut leases: Vec<Range> = Vec::new();

            for op in ops {
                match op {
                    Op::Lease(low, len) => {
                        let candidates = IntervalSet::singleton(Range::new(low, (low + len).min(999)));
                        if let Some(lease) = coordinator.lease_portion(&candidates) {
                            for held in &leases {
                                prop_assert!(!held.overlaps(&lease), "double lease");
                            }
                            leases.push(lease);
                        }
                    }
                    Op::Renew(i, cut_low, cut_high) if !leases.is_empty() => {
                        let index = i % leases.len();
                        let old = leases[index];
                        let low = old.low() + cut_low.min(old.length() - 1);
                        let high = old.high().saturating_sub(cut_high).max(low);
                        leases[index] = coordinator.renew_lease(old, Range::new(low, high)).unwrap();
                    }
                    Op::Unlease(i) if !leases.is_empty() => {
                        let lease = leases.swap_remove(i % leases.len());
                        coordinator.unlease(lease).unwrap();
                    }
                    Op::Complete(i) if !leases.is_empty() => {
                        let lease = leases.swap_remove(i % leases.len());
                        complete(&coordinator, lease);
                    }
                    _ => {}
                }
                assert_partition(&coordinator);
            }
        }
    }

    #[test]
    fn test_partition_holds_across_threads() {
        let coordinator = Arc::new(coordinator(100_000, 97));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    let mut step = worker;
                    while let Some(lease) = coordinator.lease() {
                        step += 1;
                        match step % 3 {
                            0 => coordinator.unlease(lease).unwrap(),
                            1 => held.push(lease),
                            _ => complete(&coordinator, lease),
                        }
                    }
                    for lease in held {
                        complete(&coordinator, lease);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        // Some leases were unleased and never picked up again
        while let Some(lease) = coordinator.lease() {
            complete(&coordinator, lease);
        }
        assert_partition(&coordinator);
        assert!(coordinator.is_complete());
        assert_eq!(coordinator.amount_verified(), 100_000);
    }
}
