use std::{mem::ManuallyDrop, sync::Arc};

use hal::{CommandBuffer as _, Device as _, DeviceError, Queue as _, SamplingSession as _};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    command::RecordedCommandBuffer,
    device::{
        life::{PendingSubmission, SubmissionTracker, WaitIdleError},
        Device,
    },
    logging::{LogItem, LogItemKind, LogQueue, LogRecord, LogWriter, QueueCallId},
    pool::{Handle, ResourcePool},
    sampling::{self, SessionManager},
    settings::Granularity,
    SubmissionIndex,
};

const TARGET_ALLOC_SIZE: hal::MemoryAddress = 2 * 1024 * 1024;
const TARGET_SUBALLOC_SIZE: hal::MemoryAddress = 64 * 1024;
const NESTED_ALLOC_SIZE: hal::MemoryAddress = 4 * 1024;
const MIN_MEMORY_BLOCK_SIZE: hal::MemoryAddress = 4 * 1024 * 1024;
const MEMORY_HEAP: hal::GpuHeap = hal::GpuHeap::GartCacheable;

fn align_to(value: hal::MemoryAddress, alignment: hal::MemoryAddress) -> hal::MemoryAddress {
    let alignment = alignment.max(1);
    (value + alignment - 1) / alignment * alignment
}

/// A nested command buffer with the allocator backing it.
pub(crate) struct NestedTarget<A: hal::Api> {
    pub allocator: A::CommandAllocator,
    pub cmd_buf: A::CommandBuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// No frame sample is open.
    Idle,
    Open,
    /// The frame sample has been ended, the next one is not open yet.
    Closing,
}

/// Application-side submission.
pub struct SubmitInfo<'a, A: hal::Api> {
    pub command_buffers: &'a [&'a RecordedCommandBuffer<A>],
    /// Either `None`, or exactly one entry per command buffer.
    pub command_buffer_infos: Option<&'a [hal::CommandBufferInfo<'a, A>]>,
    pub memory_refs: &'a [hal::MemoryRef<'a, A>],
    /// Signaled once every command buffer of this submission has executed.
    pub fence: Option<&'a A::Fence>,
}

#[derive(Clone, Debug, Error)]
pub enum QueueSubmitError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("command buffer {0} is nested and can only be executed by another command buffer")]
    NestedCommandBuffer(usize),
    #[error("{infos} command buffer infos were provided for {command_buffers} command buffers")]
    InfoCountMismatch { command_buffers: usize, infos: usize },
    #[error("command buffer {0} presents, but it is not the last one of the submission")]
    MisplacedPresent(usize),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolUsage {
    pub available: usize,
    pub busy: usize,
}

impl PoolUsage {
    fn of<T>(pool: &ResourcePool<T>) -> Self {
        Self {
            available: pool.available_count(),
            busy: pool.busy_count(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub command_buffers: PoolUsage,
    pub nested_command_buffers: PoolUsage,
    pub memory_blocks: PoolUsage,
    pub query_sets: PoolUsage,
    pub sessions: PoolUsage,
    pub fences: PoolUsage,
    pub pending_submissions: usize,
    /// Log items waiting for their submission to retire.
    pub queued_log_items: usize,
    pub flushed_log_items: usize,
}

struct MemoryCursor<A: hal::Api> {
    block: Handle<A::Memory>,
    offset: hal::MemoryAddress,
}

/// A queue that replays application command buffers with sampling commands
/// around them, and logs the results once the GPU is done.
pub struct Queue<A: hal::Api> {
    pub(super) device: Arc<Device<A>>,
    pub(super) raw: A::Queue,
    queue_type: hal::QueueType,
    index: usize,
    allocator: ManuallyDrop<A::CommandAllocator>,
    pub(super) command_buffers: ResourcePool<A::CommandBuffer>,
    pub(super) nested: ResourcePool<NestedTarget<A>>,
    memory: ResourcePool<A::Memory>,
    memory_block_size: hal::MemoryAddress,
    /// Block that query memory is suballocated from.
    current_memory: Option<MemoryCursor<A>>,
    pub(super) query_sets: ResourcePool<A::QuerySet>,
    fences: ResourcePool<A::Fence>,
    pub(super) sessions: SessionManager<A>,
    pub(super) life: SubmissionTracker<A>,
    pub(super) log_items: LogQueue<A>,
    log_writer: Option<LogWriter>,
    flushed_log_items: usize,
    frame: FrameState,
    frame_item: Option<LogItem<A>>,
    profiling_clocks: bool,
    pub(super) command_buffer_count: u64,
}

impl<A: hal::Api> Queue<A> {
    pub(super) fn new(
        device: Arc<Device<A>>,
        raw: A::Queue,
        queue_type: hal::QueueType,
        index: usize,
        log_writer: Option<LogWriter>,
    ) -> Result<Self, DeviceError> {
        let allocator = unsafe {
            device
                .raw
                .create_command_allocator(&hal::CommandAllocatorDescriptor {
                    label: Some("profiler targets"),
                    heap: hal::GpuHeap::GartUswc,
                    alloc_size: TARGET_ALLOC_SIZE,
                    suballoc_size: TARGET_SUBALLOC_SIZE,
                    auto_memory_reuse: true,
                })?
        };
        let sessions = match SessionManager::new(&device.perf, &device.settings) {
            Ok(sessions) => sessions,
            Err(e) => {
                unsafe { device.raw.destroy_command_allocator(allocator) };
                return Err(e);
            }
        };

        let fragment_size = device.properties.fragment_size;
        let trace = &sessions.config().trace;
        let trace_size = if trace.enable {
            align_to(trace.gpu_memory_limit + fragment_size, fragment_size)
        } else {
            0
        };
        log::debug!(
            "Queue {} reports {} counter values per sample",
            index,
            sessions.reported_counter_count()
        );

        Ok(Self {
            raw,
            queue_type,
            index,
            allocator: ManuallyDrop::new(allocator),
            command_buffers: ResourcePool::new("command buffer"),
            nested: ResourcePool::new("nested command buffer"),
            memory: ResourcePool::new("memory block"),
            memory_block_size: MIN_MEMORY_BLOCK_SIZE.max(trace_size),
            current_memory: None,
            query_sets: ResourcePool::new("query set"),
            fences: ResourcePool::new("fence"),
            sessions,
            life: SubmissionTracker::new(),
            log_items: LogQueue::new(),
            log_writer,
            flushed_log_items: 0,
            frame: FrameState::Idle,
            frame_item: None,
            profiling_clocks: false,
            command_buffer_count: 0,
            device,
        })
    }

    pub fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    pub fn queue_type(&self) -> hal::QueueType {
        self.queue_type
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame
    }

    pub fn sample_config(&self) -> &hal::SampleConfig {
        self.sessions.config()
    }

    pub fn reported_counter_count(&self) -> usize {
        self.sessions.reported_counter_count()
    }

    /// Routes the records of subsequently retired submissions to `writer`.
    pub fn set_log_writer(&mut self, writer: Option<LogWriter>) -> Option<LogWriter> {
        std::mem::replace(&mut self.log_writer, writer)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            command_buffers: PoolUsage::of(&self.command_buffers),
            nested_command_buffers: PoolUsage::of(&self.nested),
            memory_blocks: PoolUsage::of(&self.memory),
            query_sets: PoolUsage::of(&self.query_sets),
            sessions: PoolUsage {
                available: self.sessions.available_count(),
                busy: self.sessions.busy_count(),
            },
            fences: PoolUsage::of(&self.fences),
            pending_submissions: self.life.pending_count(),
            queued_log_items: self.log_items.len(),
            flushed_log_items: self.flushed_log_items,
        }
    }

    /// Runs `acquire`, and if it runs out of memory, runs it once more after
    /// the queue has drained and its resources were reclaimed.
    fn acquire_or_drain<T, F>(&mut self, what: &str, mut acquire: F) -> Result<T, DeviceError>
    where
        F: FnMut(&mut Self) -> Result<T, DeviceError>,
    {
        match acquire(self) {
            Err(DeviceError::OutOfMemory) | Err(DeviceError::OutOfGpuMemory) => {
                log::warn!(
                    "Out of memory creating a {}, waiting for queue {} to drain",
                    what,
                    self.index
                );
                unsafe { self.raw.wait_idle()? };
                self.process_idle_submits();
                acquire(self)
            }
            other => other,
        }
    }

    pub(super) fn acquire_command_buffer(
        &mut self,
    ) -> Result<Handle<A::CommandBuffer>, DeviceError> {
        let handle = self.acquire_or_drain("command buffer", |queue| {
            let device = &queue.device.raw;
            let allocator = &*queue.allocator;
            let queue_type = queue.queue_type;
            queue.command_buffers.acquire(|| unsafe {
                device.create_command_buffer(&hal::CommandBufferDescriptor {
                    label: Some("profiler target"),
                    allocator,
                    queue_type,
                    nested: false,
                })
            })
        })?;
        self.life.next.command_buffers.push(handle);
        Ok(handle)
    }

    pub(super) fn acquire_nested(&mut self) -> Result<Handle<NestedTarget<A>>, DeviceError> {
        let handle = self.acquire_or_drain("nested command buffer", |queue| {
            let device = &queue.device.raw;
            let queue_type = queue.queue_type;
            queue.nested.acquire(|| unsafe {
                let allocator =
                    device.create_command_allocator(&hal::CommandAllocatorDescriptor {
                        label: Some("profiler nested"),
                        heap: hal::GpuHeap::GartUswc,
                        alloc_size: NESTED_ALLOC_SIZE,
                        suballoc_size: NESTED_ALLOC_SIZE,
                        auto_memory_reuse: true,
                    })?;
                match device.create_command_buffer(&hal::CommandBufferDescriptor {
                    label: Some("profiler nested target"),
                    allocator: &allocator,
                    queue_type,
                    nested: true,
                }) {
                    Ok(cmd_buf) => Ok(NestedTarget { allocator, cmd_buf }),
                    Err(e) => {
                        device.destroy_command_allocator(allocator);
                        Err(e)
                    }
                }
            })
        })?;
        self.life.next.nested.push(handle);
        Ok(handle)
    }

    pub(super) fn acquire_session(&mut self) -> Result<Handle<A::SamplingSession>, DeviceError> {
        let handle = self.acquire_or_drain("sampling session", |queue| {
            queue.sessions.acquire(&queue.device.raw)
        })?;
        self.life.next.sessions.push(handle);
        Ok(handle)
    }

    fn acquire_fence(&mut self) -> Result<Handle<A::Fence>, DeviceError> {
        self.acquire_or_drain("fence", |queue| {
            let device = &queue.device.raw;
            queue.fences.acquire(|| unsafe { device.create_fence() })
        })
    }

    fn acquire_memory_block(&mut self) -> Result<Handle<A::Memory>, DeviceError> {
        self.acquire_or_drain("memory block", |queue| {
            let device = &queue.device.raw;
            let counters = queue.device.memory_counters();
            let size = queue.memory_block_size;
            let alignment = queue.device.properties.fragment_size;
            queue.memory.acquire(|| unsafe {
                let memory = device.create_memory(&hal::MemoryDescriptor {
                    label: Some("profiler queries"),
                    size,
                    alignment,
                    heap: MEMORY_HEAP,
                })?;
                counters.allocated(MEMORY_HEAP, size);
                Ok(memory)
            })
        })
    }

    /// Carves `requirements` out of the current memory block, switching to
    /// a new block when it doesn't fit.
    fn suballocate(
        &mut self,
        requirements: hal::MemoryRequirements,
    ) -> Result<(Handle<A::Memory>, hal::MemoryAddress), DeviceError> {
        if requirements.size > self.memory_block_size {
            log::error!(
                "Query memory of {} bytes exceeds the block size",
                requirements.size
            );
            return Err(DeviceError::OutOfGpuMemory);
        }
        let block_size = self.memory_block_size;
        let fits = |cursor: &MemoryCursor<A>| {
            align_to(cursor.offset, requirements.alignment) + requirements.size <= block_size
        };
        let mut cursor = match self.current_memory.take() {
            Some(cursor) if fits(&cursor) => cursor,
            stale => {
                if let Some(cursor) = stale {
                    // a full block retires with the submission being assembled
                    self.life.next.memory.push(cursor.block);
                }
                MemoryCursor {
                    block: self.acquire_memory_block()?,
                    offset: 0,
                }
            }
        };
        let block = cursor.block;
        let offset = align_to(cursor.offset, requirements.alignment);
        cursor.offset = offset + requirements.size;
        self.current_memory = Some(cursor);
        Ok((block, offset))
    }

    /// Acquires a pipeline statistics query set, bound to fresh memory.
    pub(super) fn acquire_query_set(&mut self) -> Result<Handle<A::QuerySet>, DeviceError> {
        let handle = self.acquire_or_drain("query set", |queue| {
            let device = &queue.device.raw;
            queue.query_sets.acquire(|| unsafe {
                device.create_query_set(&hal::QuerySetDescriptor {
                    label: Some("pipeline statistics"),
                    ty: hal::QueryType::PipelineStatistics,
                    count: 1,
                })
            })
        })?;
        self.life.next.query_sets.push(handle);

        let requirements = unsafe {
            self.device
                .raw
                .query_set_memory_requirements(self.query_sets.get(handle))
        };
        let (block, offset) = self.suballocate(requirements)?;
        unsafe {
            self.device.raw.bind_query_set_memory(
                self.query_sets.get_mut(handle),
                Some((self.memory.get(block), offset)),
            )?;
        }
        Ok(handle)
    }

    pub(super) fn add_log_item(&mut self, item: LogItem<A>) {
        self.log_items.push(item);
        self.life.next.log_item_count += 1;
    }

    fn log_queue_call(&mut self, call: QueueCallId) {
        if self.device.logging_enabled(Granularity::Draw)
            || self.device.logging_enabled(Granularity::CmdBuf)
        {
            let item = LogItem::new(self.device.frame_id(), LogItemKind::QueueCall(call));
            self.add_log_item(item);
        }
    }

    /// Submits target command buffers to the native queue.
    ///
    /// With `release`, everything acquired since the last tracked submission
    /// is handed to a new fence-tracked submission.
    fn internal_submit(
        &mut self,
        command_buffers: &[Handle<A::CommandBuffer>],
        infos: Option<&[hal::CommandBufferInfo<A>]>,
        memory_refs: &[hal::MemoryRef<A>],
        fence: Option<&A::Fence>,
        release: bool,
    ) -> Result<Option<SubmissionIndex>, DeviceError> {
        // Nothing reaches the native queue unless it can be tracked.
        let tracking = if release {
            Some(self.acquire_fence()?)
        } else {
            None
        };
        let submitted = {
            let pool = &self.command_buffers;
            let raw_command_buffers = command_buffers
                .iter()
                .map(|&handle| pool.get(handle))
                .collect::<SmallVec<[_; 4]>>();
            let submit_info = hal::SubmitInfo {
                command_buffers: &raw_command_buffers,
                command_buffer_infos: infos,
                memory_refs,
                fence,
            };
            unsafe { self.raw.submit(&submit_info) }
        };
        if let Err(e) = submitted {
            if let Some(fence) = tracking {
                self.fences.cancel(fence);
            }
            return Err(e);
        }
        let fence = match tracking {
            Some(fence) => fence,
            None => return Ok(None),
        };

        let associated = unsafe {
            self.raw
                .associate_fence_with_last_submit(self.fences.get(fence))
        };
        let index = self.life.track_submission(fence);
        associated?;
        Ok(Some(index))
    }

    /// Replays and submits `info`, splitting it into several native
    /// submissions if batches are broken up.
    pub fn submit(&mut self, info: &SubmitInfo<A>) -> Result<(), QueueSubmitError> {
        profiling::scope!("submit");
        let count = info.command_buffers.len();
        if let Some(infos) = info.command_buffer_infos {
            if infos.len() != count {
                return Err(QueueSubmitError::InfoCountMismatch {
                    command_buffers: count,
                    infos: infos.len(),
                });
            }
        }
        if let Some(index) = info.command_buffers.iter().position(|cb| cb.is_nested()) {
            return Err(QueueSubmitError::NestedCommandBuffer(index));
        }
        if let Some(index) = info
            .command_buffers
            .iter()
            .position(|cb| cb.contains_present())
        {
            if index + 1 != count {
                return Err(QueueSubmitError::MisplacedPresent(index));
            }
        }

        self.log_queue_call(QueueCallId::Submit);
        self.start_sampling()?;

        let frame_logging = self.device.logging_enabled(Granularity::Frame);
        let batch_size = if self.device.settings.break_submit_batches {
            1
        } else {
            count.max(1)
        };
        let mut begin_new_frame = false;
        let mut start = 0;
        loop {
            let end = (start + batch_size).min(count);
            let mut targets = SmallVec::<[Handle<A::CommandBuffer>; 4]>::new();
            let mut infos = Vec::new();
            // Within a logged frame, everything is released together at its end.
            let mut release = !frame_logging;

            for index in start..end {
                let recorded = info.command_buffers[index];
                if recorded.contains_present() && frame_logging {
                    if let Some(target) = self.end_frame()? {
                        targets.push(target);
                        if info.command_buffer_infos.is_some() {
                            infos.push(hal::CommandBufferInfo::placeholder());
                        }
                        release = true;
                    }
                }
                targets.push(self.replay(recorded)?);
                if let Some(list) = info.command_buffer_infos {
                    infos.push(list[index].clone());
                }
                if recorded.contains_present() {
                    self.device.increment_frame_id();
                    begin_new_frame = true;
                }
            }

            let fence = if end == count { info.fence } else { None };
            self.internal_submit(
                &targets,
                info.command_buffer_infos.map(|_| infos.as_slice()),
                info.memory_refs,
                fence,
                release,
            )?;

            start = end;
            if start >= count {
                break;
            }
        }

        if begin_new_frame {
            let sampling = self.device.sampling_enabled();
            self.begin_next_frame(sampling)?;
        } else if !frame_logging {
            self.process_idle_submits();
        }
        Ok(())
    }

    /// Switches to profiling clocks, and opens a frame sample if needed,
    /// when sampling starts before the first present.
    fn start_sampling(&mut self) -> Result<(), DeviceError> {
        if self.frame != FrameState::Idle || !self.device.sampling_enabled() {
            return Ok(());
        }
        if self.device.logging_enabled(Granularity::Frame) || !self.profiling_clocks {
            self.begin_next_frame(true)?;
        }
        Ok(())
    }

    fn set_profiling_clocks(&mut self, enable: bool) {
        if self.profiling_clocks == enable {
            return;
        }
        let mode = if enable {
            hal::ClockMode::Profiling
        } else {
            hal::ClockMode::Default
        };
        match unsafe { self.device.raw.set_clock_mode(mode) } {
            Ok(()) => self.profiling_clocks = enable,
            Err(e) => log::warn!("Failed to set {:?} clocks: {}", mode, e),
        }
    }

    fn begin_next_frame(&mut self, sampling: bool) -> Result<(), DeviceError> {
        self.process_idle_submits();
        self.frame = FrameState::Idle;
        if sampling {
            self.set_profiling_clocks(true);
            if self.device.logging_enabled(Granularity::Frame) {
                return self.begin_frame();
            }
        } else {
            self.set_profiling_clocks(false);
        }
        Ok(())
    }

    /// Submits a command buffer that opens the frame sample.
    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        let target = self.acquire_command_buffer()?;
        let session = self.acquire_session()?;
        let timestamps = self.device.properties.supports_timestamps;
        let mut item = LogItem::new(self.device.frame_id(), LogItemKind::Frame);
        {
            let cmd_buf = self.command_buffers.get_mut(target);
            unsafe {
                cmd_buf.begin()?;
                self.sessions.get_mut(session).begin(cmd_buf)?;
                self.sessions
                    .begin_samples(session, cmd_buf, &mut item.sample, timestamps)?;
                cmd_buf.end()?;
            }
        }
        self.internal_submit(&[target], None, &[], None, false)?;

        log::debug!("Opened frame {} on queue {}", item.frame_id, self.index);
        self.frame_item = Some(item);
        self.frame = FrameState::Open;
        Ok(())
    }

    /// Records a command buffer that closes the frame sample, if one is open.
    fn end_frame(&mut self) -> Result<Option<Handle<A::CommandBuffer>>, DeviceError> {
        let item = match self.frame_item.take() {
            Some(item) => item,
            None => return Ok(None),
        };
        let target = match self.acquire_command_buffer() {
            Ok(target) => target,
            Err(e) => {
                self.frame_item = Some(item);
                return Err(e);
            }
        };
        let recorded = {
            let cmd_buf = self.command_buffers.get_mut(target);
            let sessions = &mut self.sessions;
            let slot = &item.sample;
            unsafe {
                cmd_buf.begin().and_then(|()| {
                    if let Some(session) = slot.session {
                        sessions.end_samples(cmd_buf, slot);
                        sessions.get_mut(session).end(cmd_buf)?;
                    }
                    cmd_buf.end()
                })
            }
        };
        if let Err(e) = recorded {
            // the target stays with the submission being assembled
            self.frame_item = Some(item);
            return Err(e);
        }

        log::debug!("Closing frame {} on queue {}", item.frame_id, self.index);
        self.add_log_item(item);
        self.frame = FrameState::Closing;
        Ok(Some(target))
    }

    fn finish_frame(&mut self) -> Result<(), DeviceError> {
        if self.device.logging_enabled(Granularity::Frame) {
            if let Some(target) = self.end_frame()? {
                self.internal_submit(&[target], None, &[], None, true)?;
            }
        }
        self.device.increment_frame_id();
        let sampling = self.device.sampling_enabled();
        self.begin_next_frame(sampling)
    }

    pub fn present_direct(&mut self, info: &hal::PresentDirectInfo<A>) -> Result<(), DeviceError> {
        profiling::scope!("present_direct");
        self.log_queue_call(QueueCallId::PresentDirect);
        let presented = unsafe { self.raw.present_direct(info) };
        let next = self.finish_frame();
        presented.and(next)
    }

    pub fn present_swap_chain(
        &mut self,
        info: &hal::PresentSwapChainInfo<A>,
    ) -> Result<(), DeviceError> {
        profiling::scope!("present_swap_chain");
        self.log_queue_call(QueueCallId::PresentSwapChain);
        let presented = unsafe { self.raw.present_swap_chain(info) };
        let next = self.finish_frame();
        presented.and(next)
    }

    pub fn wait_idle(&mut self) -> Result<(), WaitIdleError> {
        self.log_queue_call(QueueCallId::WaitIdle);
        unsafe { self.raw.wait_idle()? };
        self.process_idle_submits();
        match self.life.pending_count() {
            0 => Ok(()),
            pending => Err(WaitIdleError::StuckGpu(pending)),
        }
    }

    pub fn signal_semaphore(&mut self, semaphore: &A::Semaphore) -> Result<(), DeviceError> {
        self.log_queue_call(QueueCallId::SignalSemaphore);
        unsafe { self.raw.signal_semaphore(semaphore) }
    }

    pub fn wait_semaphore(&mut self, semaphore: &A::Semaphore) -> Result<(), DeviceError> {
        self.log_queue_call(QueueCallId::WaitSemaphore);
        unsafe { self.raw.wait_semaphore(semaphore) }
    }

    pub fn delay(&mut self, delay_ms: f32) -> Result<(), DeviceError> {
        self.log_queue_call(QueueCallId::Delay);
        unsafe { self.raw.delay(delay_ms) }
    }

    pub fn remap_virtual_memory_pages(
        &mut self,
        ranges: &[hal::VirtualMemoryRemapRange<A>],
        do_not_wait: bool,
        fence: Option<&A::Fence>,
    ) -> Result<(), DeviceError> {
        self.log_queue_call(QueueCallId::RemapVirtualMemoryPages);
        unsafe {
            self.raw
                .remap_virtual_memory_pages(ranges, do_not_wait, fence)
        }
    }

    pub fn copy_virtual_memory_page_mappings(
        &mut self,
        ranges: &[hal::VirtualMemoryCopyRange<A>],
        do_not_wait: bool,
    ) -> Result<(), DeviceError> {
        self.log_queue_call(QueueCallId::CopyVirtualMemoryPageMappings);
        unsafe {
            self.raw
                .copy_virtual_memory_page_mappings(ranges, do_not_wait)
        }
    }

    /// Retires every submission whose fence has signaled, oldest first,
    /// stopping at the first one that is still executing.
    pub fn process_idle_submits(&mut self) {
        profiling::scope!("process_idle_submits");
        loop {
            let submission = match self.life.retire_next(&self.device.raw, &self.fences) {
                Ok(Some(submission)) => submission,
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to query the status of queue {}: {}", self.index, e);
                    break;
                }
            };
            self.retire(submission);
        }
    }

    fn retire(&mut self, submission: PendingSubmission<A>) {
        let PendingSubmission {
            index,
            fence,
            resources,
        } = submission;
        // Results live in the sessions and query sets recycled below.
        self.flush_log_items(resources.log_item_count);

        let device = &self.device.raw;
        self.command_buffers
            .reclaim(&resources.command_buffers, |_| {});
        self.nested.reclaim(&resources.nested, |nested| unsafe {
            if let Err(e) = nested.cmd_buf.reset() {
                log::warn!("Failed to reset a nested command buffer: {}", e);
            }
            if let Err(e) = device.reset_command_allocator(&mut nested.allocator) {
                log::warn!("Failed to reset a nested command allocator: {}", e);
            }
        });
        self.query_sets.reclaim(&resources.query_sets, |set| unsafe {
            if let Err(e) = device.bind_query_set_memory(set, None) {
                log::warn!("Failed to unbind query set memory: {}", e);
            }
        });
        self.memory.reclaim(&resources.memory, |_| {});
        self.sessions.reclaim(&resources.sessions);
        self.fences.reclaim(&[fence], |_| {});
        log::trace!("Reclaimed submission {} of queue {}", index, self.index);
    }

    fn flush_log_items(&mut self, count: usize) {
        let Queue {
            ref device,
            ref sessions,
            ref query_sets,
            ref mut log_items,
            ref mut log_writer,
            ..
        } = *self;
        let mut flushed = 0;
        for item in log_items.take_front(count) {
            if let Some(ref mut writer) = *log_writer {
                writer.add(&make_record(&item, sessions, query_sets, &device.raw));
            }
            flushed += 1;
        }
        self.flushed_log_items += flushed;
    }
}

fn make_record<A: hal::Api>(
    item: &LogItem<A>,
    sessions: &SessionManager<A>,
    query_sets: &ResourcePool<A::QuerySet>,
    device: &A::Device,
) -> LogRecord {
    let mut record = LogRecord::new(item.frame_id, item.kind);
    record.counters = sessions.counter_values(item);
    record.trace_size = sessions.trace_size(item);
    record.timing = sessions.timing(item);
    if sampling::has_valid_sample(item, hal::SampleType::Query) {
        if let Some(query) = item.sample.query {
            match unsafe { device.get_query_results(query_sets.get(query)) } {
                Ok(stats) => record.pipeline_stats = stats,
                Err(e) => log::warn!("Failed to read pipeline statistics: {}", e),
            }
        }
    }
    record
}

impl<A: hal::Api> Drop for Queue<A> {
    fn drop(&mut self) {
        profiling::scope!("Queue::drop");
        log::trace!("Dropping queue {}", self.index);

        // An open frame or a failed submission leaves resources untracked.
        if !self.life.next.is_empty() {
            match self.acquire_fence() {
                Ok(fence) => {
                    if let Err(e) = unsafe {
                        self.raw
                            .associate_fence_with_last_submit(self.fences.get(fence))
                    } {
                        log::warn!("Failed to associate the teardown fence: {}", e);
                    }
                    self.life.track_submission(fence);
                }
                Err(e) => log::error!("Failed to create the teardown fence: {}", e),
            }
        }
        if let Err(e) = unsafe { self.raw.wait_idle() } {
            log::error!("Failed to wait for queue {} to go idle: {}", self.index, e);
        }
        self.process_idle_submits();

        let pending = self.life.pending_count();
        if pending != 0 || !self.life.next.is_empty() {
            log::error!(
                "Queue {} is dropped with {} submissions in flight, leaking their resources",
                self.index,
                pending
            );
            return;
        }
        // Older blocks have all retired, the current one is last in line.
        if let Some(cursor) = self.current_memory.take() {
            self.memory.reclaim(&[cursor.block], |_| {});
        }

        let device = &self.device.raw;
        let counters = self.device.memory_counters();
        let block_size = self.memory_block_size;
        unsafe {
            self.command_buffers
                .dispose(|cmd_buf| device.destroy_command_buffer(cmd_buf));
            self.nested.dispose(|nested| {
                device.destroy_command_buffer(nested.cmd_buf);
                device.destroy_command_allocator(nested.allocator);
            });
            self.query_sets.dispose(|set| device.destroy_query_set(set));
            self.memory.dispose(|memory| {
                device.destroy_memory(memory);
                counters.freed(MEMORY_HEAP, block_size);
            });
            self.fences.dispose(|fence| device.destroy_fence(fence));
            self.sessions.dispose(device);
            device.destroy_command_allocator(ManuallyDrop::take(&mut self.allocator));
        }
    }
}
