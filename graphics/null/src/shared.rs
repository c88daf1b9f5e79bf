use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;

pub(crate) struct FenceState {
    pub(crate) signalled: AtomicBool,
}

pub(crate) struct TimelineState {
    pub(crate) value: AtomicU64,
}

pub(crate) struct PendingSubmission {
    pub(crate) fence: Option<Arc<FenceState>>,
    pub(crate) timeline_signals: SmallVec<[(Arc<TimelineState>, u64); 2]>,
}

pub(crate) struct NullState {
    pub(crate) pending: VecDeque<PendingSubmission>,
    pub(crate) auto_complete: bool,
    pub(crate) submitted: u64,
    pub(crate) completed: u64,
    pub(crate) failing_submits: u32,
    pub(crate) failing_heaps: u32,
    pub(crate) failing_fence_waits: u32,
    pub(crate) heap_budget: Option<u64>,
    pub(crate) heap_bytes: u64,
    pub(crate) live_heaps: u32,
}

/// State every object of one null device points at. All signal operations
/// happen under `state`, so waiters blocked on `condvar` never miss one.
pub(crate) struct NullShared {
    pub(crate) state: Mutex<NullState>,
    pub(crate) condvar: Condvar,
}

impl NullShared {
    pub(crate) fn new(auto_complete: bool) -> Self {
        Self {
            state: Mutex::new(NullState {
                pending: VecDeque::new(),
                auto_complete,
                submitted: 0,
                completed: 0,
                failing_submits: 0,
                failing_heaps: 0,
                failing_fence_waits: 0,
                heap_budget: None,
                heap_bytes: 0,
                live_heaps: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn complete_front(&self, guard: &mut MutexGuard<NullState>) -> bool {
        let submission = if let Some(submission) = guard.pending.pop_front() {
            submission
        } else {
            return false;
        };
        if let Some(fence) = submission.fence {
            fence.signalled.store(true, Ordering::Release);
        }
        for (timeline, value) in submission.timeline_signals {
            timeline.value.fetch_max(value, Ordering::AcqRel);
        }
        guard.completed += 1;
        self.condvar.notify_all();
        true
    }

    /// Blocks until `condition` holds or `timeout` elapsed. Returns the final value of `condition`.
    pub(crate) fn wait_until<F: Fn() -> bool>(&self, condition: F, timeout: Option<Duration>) -> bool {
        let mut guard = self.state.lock();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if condition() {
                return true;
            }
            match deadline {
                None => self.condvar.wait(&mut guard),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                        return condition();
                    }
                }
            }
        }
    }
}
