use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, trace, warn};

use super::gpu::{Device as _, FenceValuePairRef, GPUBackend, SemaphoreRef, TimelineSemaphore as _};
use super::*;
use crate::Mutex;

/// The side that records guest commands into command buffers.
pub trait CommandFlusher: Send + Sync {
    /// Submits everything recorded so far.
    fn flush_all_commands(&self);

    fn supports_interrupt(&self) -> bool {
        false
    }

    /// Runs `action` on the command issuing thread at its next safe point and
    /// returns once it ran.
    fn interrupt(&self, action: Box<dyn FnOnce() + Send>) {
        action();
    }
}

enum SyncPointWaitable<B: GPUBackend> {
    Fences(Arc<BufferUsageTracker<B>>),
    TimelineValue(u64),
}

struct SyncPointState<B: GPUBackend> {
    /// Dropped once the point is confirmed.
    waitable: Option<SyncPointWaitable<B>>,
    signalled: bool,
}

struct SyncPoint<B: GPUBackend> {
    id: u64,
    flush_id: u64,
    state: Mutex<SyncPointState<B>>,
}

impl<B: GPUBackend> SyncPoint<B> {
    /// Lazily created points are not submitted until the next flush.
    #[inline(always)]
    fn needs_flush(&self, current_flush_id: u64) -> bool {
        self.flush_id >= current_flush_id
    }
}

struct FlushState {
    flush_id: AtomicU64,
    flusher: Arc<dyn CommandFlusher>,
}

impl FlushState {
    #[inline(always)]
    fn current(&self) -> u64 {
        self.flush_id.load(Ordering::Acquire)
    }

    fn flush(&self) {
        self.flusher.flush_all_commands();
        self.flush_id.fetch_add(1, Ordering::AcqRel);
    }
}

struct SyncPointList<B: GPUBackend> {
    points: VecDeque<Arc<SyncPoint<B>>>,
    /// Every id below this was confirmed and dropped.
    first_retained: u64,
    last_created: Option<u64>,
    timeline_value: u64,
}

/// Maps guest synchronization ids onto host completion.
pub struct SyncPointManager<B: GPUBackend> {
    pool: Arc<CommandBufferPool<B>>,
    flush: Arc<FlushState>,
    timeline: Option<B::TimelineSemaphore>,
    settings: SyncPointSettings,
    points: Mutex<SyncPointList<B>>,
    last_confirmed: AtomicU64,
}

impl<B: GPUBackend> SyncPointManager<B> {
    pub fn new(pool: &Arc<CommandBufferPool<B>>, flusher: Arc<dyn CommandFlusher>, settings: &SyncPointSettings) -> Result<Self, GraphicsError> {
        let device = pool.device();
        let timeline = if settings.prefer_timeline_semaphores && device.supports_timeline_semaphores() {
            let semaphore = unsafe { device.create_timeline_semaphore(0) }
                .map_err(|source| GraphicsError::ObjectCreation { object: "timeline semaphore", source })?;
            Some(semaphore)
        } else {
            None
        };
        debug!("Sync points use {}", if timeline.is_some() { "a timeline semaphore" } else { "fences" });

        Ok(Self {
            pool: pool.clone(),
            flush: Arc::new(FlushState {
                flush_id: AtomicU64::new(0),
                flusher,
            }),
            timeline,
            settings: settings.clone(),
            points: Mutex::new(SyncPointList {
                points: VecDeque::new(),
                first_retained: 0,
                last_created: None,
                timeline_value: 0,
            }),
            last_confirmed: AtomicU64::new(0),
        })
    }

    #[inline(always)]
    pub fn uses_timeline_semaphore(&self) -> bool {
        self.timeline.is_some()
    }

    /// Marks the point where all previously recorded commands were flushed.
    pub fn register_flush(&self) {
        self.flush.flush_id.fetch_add(1, Ordering::AcqRel);
    }

    /// Creates the sync point `id`, ids have to increase strictly.
    ///
    /// Strict points flush everything and submit a dedicated command buffer right away.
    /// Otherwise the point waits for all command buffers in use and is only submitted
    /// with the next flush. Without any command buffer in use it falls back to a strict point.
    pub fn create(&self, id: u64, strict: bool) -> Result<(), GraphicsError> {
        let mut list = self.points.lock();
        if let Some(last_created) = list.last_created {
            assert!(id > last_created, "Sync point {} created after sync point {}", id, last_created);
        }

        let flush_id = self.flush.current();
        let waitable = if strict || !self.flush.flusher.supports_interrupt() {
            self.create_strict(&mut list)?
        } else {
            let tracker = Arc::new(BufferUsageTracker::waitable());
            if self.pool.associate_in_use(&tracker) == 0 {
                trace!("No command buffer in use for sync point {}, submitting one", id);
                self.create_strict(&mut list)?
            } else {
                SyncPointWaitable::Fences(tracker)
            }
        };

        list.points.push_back(Arc::new(SyncPoint {
            id,
            flush_id,
            state: Mutex::new(SyncPointState {
                waitable: Some(waitable),
                signalled: false,
            }),
        }));
        list.last_created = Some(id);
        Ok(())
    }

    fn create_strict(&self, list: &mut SyncPointList<B>) -> Result<SyncPointWaitable<B>, GraphicsError> {
        self.flush.flush();
        let mut recorder = self.pool.rent()?;
        match &self.timeline {
            Some(timeline) => {
                list.timeline_value += 1;
                let value = list.timeline_value;
                let signal = [SemaphoreRef::Timeline(FenceValuePairRef { semaphore: timeline, value })];
                self.pool.submit(recorder, &[], &signal)?;
                Ok(SyncPointWaitable::TimelineValue(value))
            }
            None => {
                let tracker = Arc::new(BufferUsageTracker::waitable());
                recorder.add_waitable(&tracker);
                self.pool.submit(recorder, &[], &[])?;
                Ok(SyncPointWaitable::Fences(tracker))
            }
        }
    }

    fn is_reached(&self, waitable: &SyncPointWaitable<B>, timeout: Option<Duration>) -> bool {
        match waitable {
            SyncPointWaitable::Fences(tracker) => tracker.wait_for_fences(None, timeout),
            SyncPointWaitable::TimelineValue(value) => {
                let timeline = match &self.timeline {
                    Some(timeline) => timeline,
                    None => return true,
                };
                let result = if timeout == Some(Duration::ZERO) {
                    timeline.value().map(|current| current >= *value)
                } else {
                    timeline.await_value(*value, timeout)
                };
                result.unwrap_or_else(|e| {
                    error!("Checking the sync point timeline semaphore failed: {}", e);
                    false
                })
            }
        }
    }

    fn confirm(&self, id: u64) {
        self.last_confirmed.fetch_max(id, Ordering::AcqRel);
    }

    /// Highest sync point id known to be reached. Never decreases.
    pub fn get_current(&self) -> u64 {
        let list = self.points.lock();
        let mut last = self.last_confirmed.load(Ordering::Acquire);
        for point in list.points.iter() {
            if point.id <= last {
                continue;
            }
            // Someone is blocked waiting on this point, it can be confirmed by them.
            let mut state = match point.state.try_lock() {
                Some(state) => state,
                None => continue,
            };
            let reached = state.signalled
                || state
                    .waitable
                    .as_ref()
                    .map_or(true, |waitable| self.is_reached(waitable, Some(Duration::ZERO)));
            if reached {
                state.signalled = true;
                last = point.id;
            }
        }
        self.confirm(last);
        self.last_confirmed.load(Ordering::Acquire)
    }

    /// Blocks until the first sync point at or after `id` was reached, flushing first
    /// if it was never submitted.
    ///
    /// Gives up after the configured timeout, logs an error and returns false.
    /// Waiting for an id past the last created point returns false right away.
    pub fn wait(&self, id: u64) -> bool {
        let point = {
            let list = self.points.lock();
            if id < list.first_retained {
                return true;
            }
            match list.points.iter().find(|point| point.id >= id) {
                Some(point) => point.clone(),
                None => {
                    warn!("Waiting for sync point {} which was never created (last: {:?})", id, list.last_created);
                    return false;
                }
            }
        };

        if point.needs_flush(self.flush.current()) {
            let flush = self.flush.clone();
            let flush_id = point.flush_id;
            let action = move || {
                // Another flush may have happened before we got to run.
                if flush_id >= flush.current() {
                    flush.flush();
                }
            };
            if self.flush.flusher.supports_interrupt() {
                self.flush.flusher.interrupt(Box::new(action));
            } else {
                action();
            }
        }

        let mut state = point.state.lock();
        if state.signalled {
            return true;
        }
        let reached = match &state.waitable {
            Some(waitable) => self.is_reached(waitable, Some(self.settings.wait_timeout())),
            None => true,
        };
        if reached {
            state.signalled = true;
            drop(state);
            self.confirm(point.id);
            true
        } else {
            error!(
                "Sync point {} (waiting for {}) was not reached within {} ms, continuing anyway",
                point.id, id, self.settings.wait_timeout_ms
            );
            false
        }
    }

    /// Drops reached points from the front. Returns the number of dropped points.
    pub fn cleanup(&self) -> usize {
        let mut list = self.points.lock();
        let current_flush_id = self.flush.current();
        let mut removed = 0;
        while let Some(front) = list.points.front().cloned() {
            if front.needs_flush(current_flush_id) {
                break;
            }
            {
                let mut state = match front.state.try_lock() {
                    Some(state) => state,
                    None => break,
                };
                let reached = state.signalled
                    || state
                        .waitable
                        .as_ref()
                        .map_or(true, |waitable| self.is_reached(waitable, Some(Duration::ZERO)));
                if !reached {
                    break;
                }
                state.signalled = true;
                state.waitable = None;
            }
            list.points.pop_front();
            list.first_retained = front.id + 1;
            self.confirm(front.id);
            removed += 1;
        }
        if removed != 0 {
            trace!("Dropped {} reached sync points", removed);
        }
        removed
    }

    pub fn retained_count(&self) -> usize {
        self.points.lock().points.len()
    }
}
