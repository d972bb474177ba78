use crate::{
    command::CommandBufferData,
    device::DeviceError,
    hal_api::HalApi,
    resource::Buffer,
    signal::Signal,
    SubmissionIndex,
};

use smallvec::SmallVec;

use std::sync::{atomic::Ordering, Arc};

pub(crate) type WorkDoneSignal = Signal<Result<(), DeviceError>>;

/// A command submission still in flight on the GPU.
pub(crate) struct ActiveSubmission<A: HalApi> {
    /// The index of the submission we track.
    ///
    /// When `Device::fence`'s value is greater than or equal to this, our queue
    /// submission has completed.
    pub index: SubmissionIndex,

    /// Command buffers used by this submission, and the encoder that owns them.
    ///
    /// They also keep every resource they reference alive until the GPU is
    /// done with it.
    pub command_buffers: SmallVec<[CommandBufferData<A>; 1]>,

    /// Buffers to be mapped once this submission has completed.
    pub mapped: Vec<Arc<Buffer<A>>>,

    /// Signals to resolve once this submission has completed.
    pub work_done: SmallVec<[WorkDoneSignal; 1]>,
}

/// Resource tracking for a device.
///
/// ## Host mapping buffers
///
/// A buffer cannot be mapped until all active queue submissions that use it
/// have completed. To that end:
///
/// -   Each buffer's `submission_index` records the index of the most recent
///     queue submission that uses that buffer.
///
/// -   When the user calls `Buffer::map_async`, the buffer is added to
///     `self.mapped`.
///
/// -   When `Device::poll` is called, [`triage_mapped`] moves each buffer in
///     `self.mapped` to the [`ActiveSubmission::mapped`] list of the submission
///     that last used it, or to `ready_to_map` if that submission has
///     completed already.
///
/// -   [`triage_submissions`] moves the buffers of completed submissions to
///     `ready_to_map`, from where the device performs the mappings.
///
/// [`triage_mapped`]: LifetimeTracker::triage_mapped
/// [`triage_submissions`]: LifetimeTracker::triage_submissions
pub(crate) struct LifetimeTracker<A: HalApi> {
    /// Buffers for which a call to [`Buffer::map_async`] has succeeded, but
    /// which haven't been examined by `triage_mapped` yet to decide when they
    /// can be mapped.
    mapped: Vec<Arc<Buffer<A>>>,

    /// Resources used by queue submissions still in flight. One entry per
    /// submission, with older submissions appearing before younger.
    active: Vec<ActiveSubmission<A>>,

    /// Buffers the user has asked us to map, and which are not used by any
    /// queue submission still in flight.
    ready_to_map: Vec<Arc<Buffer<A>>>,
}

impl<A: HalApi> LifetimeTracker<A> {
    pub fn new() -> Self {
        Self {
            mapped: Vec::new(),
            active: Vec::new(),
            ready_to_map: Vec::new(),
        }
    }

    /// Return true if there are no queue submissions still in flight.
    pub fn queue_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Start tracking resources associated with a new queue submission.
    pub fn track_submission(
        &mut self,
        index: SubmissionIndex,
        command_buffers: SmallVec<[CommandBufferData<A>; 1]>,
    ) {
        self.active.push(ActiveSubmission {
            index,
            command_buffers,
            mapped: Vec::new(),
            work_done: SmallVec::new(),
        });
    }

    pub(crate) fn map(&mut self, buffer: &Arc<Buffer<A>>) {
        self.mapped.push(Arc::clone(buffer));
    }

    /// Attach `signal` to the most recent submission.
    ///
    /// Returns `false` if nothing is in flight, in which case the caller
    /// resolves the signal itself.
    pub fn add_work_done_signal(&mut self, signal: WorkDoneSignal) -> bool {
        match self.active.last_mut() {
            Some(active) => {
                active.work_done.push(signal);
                true
            }
            None => false,
        }
    }

    /// Sort out the consequences of completed submissions.
    ///
    /// Removes every submission whose index is at most `last_done` and
    /// returns them, oldest first. The buffers waiting on them become ready
    /// to map.
    #[must_use]
    pub fn triage_submissions(
        &mut self,
        last_done: SubmissionIndex,
    ) -> SmallVec<[ActiveSubmission<A>; 4]> {
        profiling::scope!("triage_submissions");

        let done_count = self
            .active
            .iter()
            .position(|a| a.index > last_done)
            .unwrap_or(self.active.len());

        let mut done = SmallVec::new();
        for mut a in self.active.drain(..done_count) {
            log::trace!("Active submission {} is done", a.index);
            self.ready_to_map.append(&mut a.mapped);
            done.push(a);
        }
        done
    }

    /// Determine which buffers are ready to map, and which must wait for the
    /// GPU.
    pub(crate) fn triage_mapped(&mut self) {
        if self.mapped.is_empty() {
            return;
        }

        for buffer in self.mapped.drain(..) {
            let submit_index = buffer.submission_index.load(Ordering::Acquire);
            match self.active.iter_mut().find(|a| a.index == submit_index) {
                Some(active) => active.mapped.push(buffer),
                None => self.ready_to_map.push(buffer),
            }
        }
    }

    pub(crate) fn take_ready_to_map(&mut self) -> Vec<Arc<Buffer<A>>> {
        std::mem::take(&mut self.ready_to_map)
    }

    /// Forget everything, as the device is gone.
    ///
    /// Returns the pending map requests and the submissions that were in
    /// flight, so the caller can fail their signals without this lock held.
    pub(crate) fn drain_all(&mut self) -> (Vec<Arc<Buffer<A>>>, Vec<ActiveSubmission<A>>) {
        let mut buffers = std::mem::take(&mut self.mapped);
        buffers.append(&mut self.ready_to_map);
        let mut active = std::mem::take(&mut self.active);
        for a in active.iter_mut() {
            buffers.append(&mut a.mapped);
        }
        (buffers, active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Tracker = LifetimeTracker<hal::api::Noop>;

    #[test]
    fn work_done_waits_for_the_latest_submission() {
        let mut tracker = Tracker::new();
        assert!(tracker.queue_empty());
        assert!(!tracker.add_work_done_signal(Signal::new()));

        tracker.track_submission(1, SmallVec::new());
        tracker.track_submission(2, SmallVec::new());
        let signal = Signal::new();
        assert!(tracker.add_work_done_signal(signal.clone()));

        let done = tracker.triage_submissions(1);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].index, 1);
        assert!(done[0].work_done.is_empty());
        assert!(!tracker.queue_empty());

        let done = tracker.triage_submissions(5);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].work_done.len(), 1);
        assert!(tracker.queue_empty());
    }

    #[test]
    fn draining_returns_in_flight_submissions() {
        let mut tracker = Tracker::new();
        tracker.track_submission(3, SmallVec::new());
        tracker.add_work_done_signal(Signal::new());
        let (buffers, active) = tracker.drain_all();
        assert!(buffers.is_empty());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].work_done.len(), 1);
        assert!(tracker.queue_empty());
        assert!(tracker.take_ready_to_map().is_empty());
    }
}
