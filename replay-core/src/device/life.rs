/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::{collections::VecDeque, mem};

use hal::{Device as _, DeviceError};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    device::queue::NestedTarget,
    pool::{Handle, ResourcePool},
    SubmissionIndex,
};

/// Pooled objects that belong to a single native submission, in the order
/// they were acquired.
pub(crate) struct SubmissionResources<A: hal::Api> {
    pub command_buffers: SmallVec<[Handle<A::CommandBuffer>; 4]>,
    pub nested: Vec<Handle<NestedTarget<A>>>,
    pub memory: Vec<Handle<A::Memory>>,
    pub query_sets: Vec<Handle<A::QuerySet>>,
    pub sessions: SmallVec<[Handle<A::SamplingSession>; 4]>,
    /// Log items that were queued for this submission.
    pub log_item_count: usize,
}

impl<A: hal::Api> Default for SubmissionResources<A> {
    fn default() -> Self {
        Self {
            command_buffers: SmallVec::new(),
            nested: Vec::new(),
            memory: Vec::new(),
            query_sets: Vec::new(),
            sessions: SmallVec::new(),
            log_item_count: 0,
        }
    }
}

impl<A: hal::Api> SubmissionResources<A> {
    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
            && self.nested.is_empty()
            && self.memory.is_empty()
            && self.query_sets.is_empty()
            && self.sessions.is_empty()
            && self.log_item_count == 0
    }
}

pub(crate) struct PendingSubmission<A: hal::Api> {
    pub index: SubmissionIndex,
    pub fence: Handle<A::Fence>,
    pub resources: SubmissionResources<A>,
}

#[derive(Clone, Debug, Error)]
pub enum WaitIdleError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("{0} submissions are still pending after the queue went idle")]
    StuckGpu(usize),
}

/// Tracks native submissions until their fence signals.
///
/// Submissions are kept in FIFO order: oldest come first. Only the oldest
/// one is ever polled, so resources are released in the order they were
/// acquired.
pub(crate) struct SubmissionTracker<A: hal::Api> {
    /// Resources acquired for the submission that is being assembled.
    pub next: SubmissionResources<A>,
    pending: VecDeque<PendingSubmission<A>>,
    last_index: SubmissionIndex,
}

impl<A: hal::Api> SubmissionTracker<A> {
    pub fn new() -> Self {
        Self {
            next: SubmissionResources::default(),
            pending: VecDeque::new(),
            last_index: 0,
        }
    }

    /// Moves everything acquired so far into a pending submission guarded by `fence`.
    pub fn track_submission(&mut self, fence: Handle<A::Fence>) -> SubmissionIndex {
        self.last_index += 1;
        let resources = mem::take(&mut self.next);
        log::trace!(
            "Tracking submission {} with {} command buffers and {} log items",
            self.last_index,
            resources.command_buffers.len(),
            resources.log_item_count
        );
        self.pending.push_back(PendingSubmission {
            index: self.last_index,
            fence,
            resources,
        });
        self.last_index
    }

    /// Pops the oldest submission if its fence has signaled.
    pub fn retire_next(
        &mut self,
        device: &A::Device,
        fences: &ResourcePool<A::Fence>,
    ) -> Result<Option<PendingSubmission<A>>, DeviceError> {
        let fence = match self.pending.front() {
            Some(submission) => fences.get(submission.fence),
            None => return Ok(None),
        };
        if unsafe { device.get_fence_status(fence)? } {
            let submission = self.pending.pop_front();
            if let Some(ref submission) = submission {
                log::trace!("Submission {} is done", submission.index);
            }
            Ok(submission)
        } else {
            Ok(None)
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn last_index(&self) -> SubmissionIndex {
        self.last_index
    }
}
