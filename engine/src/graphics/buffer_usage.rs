use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bitvec::vec::BitVec;

use emugpu_core::div_round_up_64;

use super::gpu::GPUBackend;
use super::*;
use crate::Mutex;

/// Which slots to consider when checking for overlapping usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageScope {
    Slot(usize),
    All,
}

struct SlotUsage<B: GPUBackend> {
    fence: Option<Arc<FenceWrapper<B>>>,
    read: BitVec,
    write: BitVec,
}

/// Tracks which command buffer slots use which parts of a buffer and the
/// fences of those slots.
///
/// A tracker of size zero only carries fences and is used as a plain waitable.
pub struct BufferUsageTracker<B: GPUBackend> {
    size: u64,
    granularity: u64,
    granules: usize,
    slots: Mutex<Vec<SlotUsage<B>>>,
}

impl<B: GPUBackend> BufferUsageTracker<B> {
    pub fn new(size: u64, granularity: u64) -> Self {
        assert_ne!(granularity, 0, "Buffer usage granularity must not be zero");
        Self {
            size,
            granularity,
            granules: div_round_up_64(size, granularity) as usize,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// A tracker without a buffer, only used to collect fences.
    pub fn waitable() -> Self {
        Self::new(0, 1)
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn granule_range(&self, offset: u64, size: u64) -> Option<Range<usize>> {
        if size == 0 || offset >= self.size {
            return None;
        }
        let end = offset.saturating_add(size).min(self.size);
        let start = (offset / self.granularity) as usize;
        let end = div_round_up_64(end, self.granularity) as usize;
        Some(start..end)
    }

    fn slot_mut(slots: &mut Vec<SlotUsage<B>>, slot: usize, granules: usize) -> &mut SlotUsage<B> {
        if slots.len() <= slot {
            slots.resize_with(slot + 1, || SlotUsage {
                fence: None,
                read: BitVec::repeat(false, granules),
                write: BitVec::repeat(false, granules),
            });
        }
        &mut slots[slot]
    }

    /// Marks the range as read or written by the command buffer in `slot`.
    pub fn add_use(&self, slot: usize, offset: u64, size: u64, write: bool) {
        let range = match self.granule_range(offset, size) {
            Some(range) => range,
            None => return,
        };
        let mut slots = self.slots.lock();
        let usage = Self::slot_mut(&mut slots, slot, self.granules);
        if write {
            usage.write[range].fill(true);
        } else {
            usage.read[range].fill(true);
        }
    }

    /// Makes the tracker wait for `fence` on behalf of `slot` until the slot is reclaimed.
    pub fn associate_fence(&self, slot: usize, fence: &Arc<FenceWrapper<B>>) {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, slot, self.granules).fence = Some(fence.clone());
    }

    /// Forgets the fence and the usage of a slot. Called once the slot's fence signalled.
    pub fn remove_slot(&self, slot: usize) {
        let mut slots = self.slots.lock();
        if let Some(usage) = slots.get_mut(slot) {
            usage.fence = None;
            usage.read.fill(false);
            usage.write.fill(false);
        }
    }

    pub fn has_fences(&self) -> bool {
        self.slots.lock().iter().any(|usage| usage.fence.is_some())
    }

    /// Whether a command buffer in `scope` uses any part of the range.
    /// With `write` only writes count, otherwise reads and writes both do.
    pub fn overlaps_with(&self, scope: UsageScope, offset: u64, size: u64, write: bool) -> bool {
        let range = match self.granule_range(offset, size) {
            Some(range) => range,
            None => return false,
        };
        let slots = self.slots.lock();
        let overlaps = |usage: &SlotUsage<B>| {
            usage.write[range.clone()].any() || (!write && usage.read[range.clone()].any())
        };
        match scope {
            UsageScope::Slot(slot) => slots.get(slot).map_or(false, overlaps),
            UsageScope::All => slots.iter().any(overlaps),
        }
    }

    /// Waits for the fences of every slot whose usage overlaps `range`, or of every
    /// associated slot if `range` is `None`. The lock is not held while waiting.
    pub fn wait_for_fences(&self, range: Option<(u64, u64)>, timeout: Option<Duration>) -> bool {
        let granules = match range {
            Some((offset, size)) => match self.granule_range(offset, size) {
                Some(granules) => Some(granules),
                None => return true,
            },
            None => None,
        };

        let mut fences = Vec::<Arc<FenceWrapper<B>>>::new();
        {
            let slots = self.slots.lock();
            for usage in slots.iter() {
                let fence = match &usage.fence {
                    Some(fence) => fence,
                    None => continue,
                };
                if let Some(granules) = &granules {
                    if !usage.read[granules.clone()].any() && !usage.write[granules.clone()].any() {
                        continue;
                    }
                }
                if !fences.iter().any(|existing| Arc::ptr_eq(existing, fence)) {
                    fences.push(fence.clone());
                }
            }
        }

        FenceWrapper::wait_all(&fences, timeout)
    }
}

#[cfg(test)]
mod test {
    use emugpu_null::{NullBackend, NullDevice};

    use super::super::gpu::{Device as _, Queue as _, Submission};
    use super::*;

    fn tracker(size: u64) -> BufferUsageTracker<NullBackend> {
        BufferUsageTracker::new(size, 4096)
    }

    #[test]
    fn overlap_uses_granules() {
        let tracker = tracker(65536);
        tracker.add_use(0, 100, 10, false);
        assert!(tracker.overlaps_with(UsageScope::Slot(0), 4000, 10, false));
        assert!(!tracker.overlaps_with(UsageScope::Slot(0), 4096, 10, false));
        assert!(!tracker.overlaps_with(UsageScope::Slot(0), 0, 4096, true));
        assert!(!tracker.overlaps_with(UsageScope::Slot(1), 0, 4096, false));

        tracker.add_use(3, 8192, 1, true);
        assert!(tracker.overlaps_with(UsageScope::All, 8192 + 4095, 1, true));
        assert!(!tracker.overlaps_with(UsageScope::Slot(0), 8192, 1, true));

        tracker.remove_slot(3);
        assert!(!tracker.overlaps_with(UsageScope::All, 8192, 1, false));
    }

    #[test]
    fn out_of_bounds_ranges_are_clamped() {
        let tracker = tracker(10000);
        tracker.add_use(1, 9000, 1 << 20, true);
        assert!(tracker.overlaps_with(UsageScope::Slot(1), 8192, 1, true));
        tracker.add_use(1, 20000, 16, true);
        assert!(!tracker.overlaps_with(UsageScope::Slot(1), 20000, 16, false));
    }

    #[test]
    fn unsubmitted_fences_do_not_block() {
        let device = NullDevice::default();
        let fence = Arc::new(FenceWrapper::<NullBackend>::new(&device).unwrap());
        let tracker = tracker(4096);
        tracker.associate_fence(0, &fence);
        assert!(tracker.has_fences());
        assert!(!tracker.wait_for_fences(None, None));
    }

    #[test]
    fn waits_only_for_overlapping_slots() {
        let device = NullDevice::default();
        let busy = Arc::new(FenceWrapper::<NullBackend>::new(&device).unwrap());
        let done = Arc::new(FenceWrapper::<NullBackend>::new(&device).unwrap());
        for fence in [&done, &busy] {
            unsafe {
                device
                    .queue()
                    .submit(&Submission {
                        command_buffers: &[],
                        wait_semaphores: &[],
                        signal_semaphores: &[],
                        fence: Some(fence.handle()),
                    })
                    .unwrap();
            }
            fence.mark_submitted();
        }
        device.complete_next();

        let tracker = tracker(65536);
        tracker.add_use(0, 0, 4096, true);
        tracker.associate_fence(0, &done);
        tracker.add_use(1, 32768, 4096, false);
        tracker.associate_fence(1, &busy);

        assert!(tracker.wait_for_fences(Some((0, 4096)), Some(Duration::ZERO)));
        assert!(!tracker.wait_for_fences(Some((32768, 1)), Some(Duration::ZERO)));
        assert!(!tracker.wait_for_fences(None, Some(Duration::ZERO)));

        device.complete_all();
        assert!(tracker.wait_for_fences(None, Some(Duration::ZERO)));
    }
}
