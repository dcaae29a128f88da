use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use hal::{Device as _, DeviceError};
use thiserror::Error;

use crate::{
    counters::MemoryCounters,
    settings::{Granularity, ProfilerSettings},
};

mod life;
pub mod queue;
mod replay;

pub use life::WaitIdleError;
pub use queue::{FrameState, PoolUsage, Queue, QueueStats, QueueSubmitError, SubmitInfo};

#[derive(Debug, Error)]
pub enum CreateQueueError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to open the queue log")]
    Log(#[from] std::io::Error),
}

/// A device wrapped for profiling.
///
/// The device owns the frame counter that every one of its queues follows,
/// and the profiler settings they all share.
pub struct Device<A: hal::Api> {
    pub(crate) raw: A::Device,
    pub(crate) settings: ProfilerSettings,
    pub(crate) properties: hal::DeviceProperties,
    pub(crate) perf: hal::PerfExperimentProperties,
    frame_id: AtomicU64,
    queue_count: AtomicUsize,
    memory: MemoryCounters,
}

impl<A: hal::Api> Device<A> {
    pub fn new(raw: A::Device, settings: ProfilerSettings) -> Result<Arc<Self>, DeviceError> {
        let (properties, perf) = unsafe { (raw.properties(), raw.perf_experiment_properties()?) };
        log::info!(
            "Profiling at {:?} granularity from frame {}",
            settings.granularity,
            settings.start_frame
        );
        Ok(Arc::new(Self {
            raw,
            settings,
            properties,
            perf,
            frame_id: AtomicU64::new(0),
            queue_count: AtomicUsize::new(0),
            memory: MemoryCounters::default(),
        }))
    }

    pub fn raw(&self) -> &A::Device {
        &self.raw
    }

    pub fn settings(&self) -> &ProfilerSettings {
        &self.settings
    }

    pub fn memory_counters(&self) -> &MemoryCounters {
        &self.memory
    }

    /// Index of the frame being recorded.
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    pub(crate) fn increment_frame_id(&self) -> u64 {
        let frame_id = self.frame_id.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("Starting frame {}", frame_id);
        frame_id
    }

    pub fn logging_enabled(&self, granularity: Granularity) -> bool {
        self.settings.logging_enabled(granularity, self.frame_id())
    }

    /// Returns `true` if anything is sampled during the current frame.
    pub fn sampling_enabled(&self) -> bool {
        self.logging_enabled(Granularity::Draw)
            || self.logging_enabled(Granularity::CmdBuf)
            || self.logging_enabled(Granularity::Frame)
    }

    pub fn create_queue(
        self: &Arc<Self>,
        queue_type: hal::QueueType,
    ) -> Result<Queue<A>, CreateQueueError> {
        profiling::scope!("create_queue");
        let index = self.queue_count.fetch_add(1, Ordering::Relaxed);
        let raw = unsafe { self.raw.create_queue(queue_type)? };
        let writer = match self.settings.log_directory {
            Some(ref dir) => Some(crate::logging::LogWriter::create(
                dir,
                &format!("queue{}.ron", index),
            )?),
            None => None,
        };
        let queue = Queue::new(Arc::clone(self), raw, queue_type, index, writer)?;
        log::debug!("Created {:?} queue {}", queue_type, index);
        Ok(queue)
    }
}
