//! Software backend that simulates an asynchronous GPU.
//!
//! Submitted work never retires on its own. The owner of a [`Gpu`] handle
//! decides when (and in which order) submissions complete, which makes the
//! fence-driven logic above this layer deterministic to test.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;

use crate::{ClockMode, DeviceError, MemoryAddress, SampleId, SampleType};

type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Device = Device;
    type Queue = Queue;

    type CommandAllocator = CommandAllocator;
    type CommandBuffer = CommandBuffer;
    type SamplingSession = SamplingSession;

    type Fence = Fence;
    type Memory = Memory;
    type QuerySet = QuerySet;
    type Pipeline = Resource;
    type Semaphore = Resource;
    type SwapChain = Resource;
}

/// Kinds of objects the device can be told to fail creating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Allocation {
    CommandAllocator,
    CommandBuffer,
    Fence,
    Memory,
    QuerySet,
    SamplingSession,
}

/// A command as seen by the simulated GPU.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    BindPipeline(u64),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    DrawIndirect {
        memory: u64,
        offset: MemoryAddress,
        draw_count: u32,
    },
    Dispatch([u32; 3]),
    DispatchIndirect {
        memory: u64,
        offset: MemoryAddress,
    },
    CopyMemory {
        src: u64,
        dst: u64,
        region_count: usize,
    },
    FillMemory {
        dst: u64,
        value: u32,
    },
    Barrier,
    InsertDebugMarker(String),
    BeginDebugMarker(String),
    EndDebugMarker,
    BeginQuery(u64),
    EndQuery(u64),
    ExecuteNested(Vec<SubmittedBuffer>),
    Present {
        swap_chain: u64,
        image_index: u32,
    },
    BeginSession(u64),
    EndSession(u64),
    BeginSample {
        session: u64,
        sample: SampleId,
        ty: SampleType,
    },
    EndSample {
        session: u64,
        sample: SampleId,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmittedBuffer {
    pub id: u64,
    pub nested: bool,
    pub ops: Vec<Op>,
}

impl SubmittedBuffer {
    pub fn draw_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| match **op {
                Op::Draw { .. } | Op::DrawIndexed { .. } | Op::DrawIndirect { .. } => true,
                _ => false,
            })
            .count()
    }

    pub fn has_session_begin(&self) -> bool {
        self.ops.iter().any(|op| match *op {
            Op::BeginSession(_) => true,
            _ => false,
        })
    }

    pub fn has_session_end(&self) -> bool {
        self.ops.iter().any(|op| match *op {
            Op::EndSession(_) => true,
            _ => false,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub serial: u64,
    pub command_buffers: Vec<SubmittedBuffer>,
    /// Validity of each command buffer info entry, if any were supplied.
    pub infos: Option<Vec<bool>>,
    pub memory_ref_count: usize,
    /// Whether a caller fence was attached to this submission.
    pub has_fence: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueueEvent {
    Submit(u64),
    WaitIdle,
    SignalSemaphore(u64),
    WaitSemaphore(u64),
    PresentDirect,
    PresentSwapChain(u32),
    Delay,
    RemapVirtualMemory(usize),
    CopyVirtualMemoryMappings(usize),
}

#[derive(Debug, Default)]
struct State {
    last_serial: u64,
    /// Every serial up to this one has retired.
    retired_through: u64,
    retired_out_of_order: FxHashSet<u64>,
    submissions: Vec<Submission>,
    events: Vec<QueueEvent>,
    failures: FxHashMap<Allocation, usize>,
    recording_failures: usize,
    live: FxHashMap<Allocation, isize>,
    resets: FxHashMap<Allocation, usize>,
    bound_query_sets: isize,
    clock_modes: Vec<ClockMode>,
    lost: bool,
}

impl State {
    fn is_retired(&self, serial: u64) -> bool {
        serial <= self.retired_through || self.retired_out_of_order.contains(&serial)
    }

    fn retire(&mut self, serial: u64) {
        if serial > self.last_serial || self.is_retired(serial) {
            return;
        }
        self.retired_out_of_order.insert(serial);
        while self.retired_out_of_order.remove(&(self.retired_through + 1)) {
            self.retired_through += 1;
        }
    }

    fn allocate(&mut self, what: Allocation) -> DeviceResult<()> {
        if let Some(count) = self.failures.get_mut(&what) {
            if *count > 0 {
                *count -= 1;
                log::debug!("Simulating a failure to create {:?}", what);
                return Err(match what {
                    Allocation::Memory => DeviceError::OutOfGpuMemory,
                    _ => DeviceError::OutOfMemory,
                });
            }
        }
        *self.live.entry(what).or_insert(0) += 1;
        Ok(())
    }

    fn free(&mut self, what: Allocation) {
        *self.live.entry(what).or_insert(0) -= 1;
    }
}

/// Test-side control over the simulated GPU.
#[derive(Clone, Debug)]
pub struct Gpu {
    state: Arc<Mutex<State>>,
}

impl Gpu {
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.state.lock().events.clone()
    }

    pub fn last_serial(&self) -> u64 {
        self.state.lock().last_serial
    }

    /// Serials of the submissions that have not retired yet, oldest first.
    pub fn in_flight(&self) -> Vec<u64> {
        let state = self.state.lock();
        (1..=state.last_serial)
            .filter(|&serial| !state.is_retired(serial))
            .collect()
    }

    /// Retires the oldest submission still in flight.
    pub fn retire_next(&self) -> Option<u64> {
        let mut state = self.state.lock();
        let serial = (state.retired_through + 1..=state.last_serial)
            .find(|&serial| !state.is_retired(serial))?;
        state.retire(serial);
        Some(serial)
    }

    /// Retires a single submission, regardless of the ones before it.
    pub fn retire(&self, serial: u64) {
        self.state.lock().retire(serial);
    }

    pub fn retire_all(&self) {
        let mut state = self.state.lock();
        state.retired_out_of_order.clear();
        state.retired_through = state.last_serial;
    }

    /// Makes the next `count` creations of `what` fail.
    pub fn fail_allocations(&self, what: Allocation, count: usize) {
        self.state.lock().failures.insert(what, count);
    }

    /// Makes the next `count` command buffer recordings fail to begin.
    pub fn fail_recordings(&self, count: usize) {
        self.state.lock().recording_failures = count;
    }

    /// Makes every fence status query report a lost device.
    pub fn set_lost(&self, lost: bool) {
        self.state.lock().lost = lost;
    }

    pub fn live_objects(&self, what: Allocation) -> isize {
        self.state.lock().live.get(&what).cloned().unwrap_or(0)
    }

    pub fn reset_count(&self, what: Allocation) -> usize {
        self.state.lock().resets.get(&what).cloned().unwrap_or(0)
    }

    pub fn bound_query_sets(&self) -> isize {
        self.state.lock().bound_query_sets
    }

    /// Every clock mode the device was switched to, in order.
    pub fn clock_modes(&self) -> Vec<ClockMode> {
        self.state.lock().clock_modes.clone()
    }
}

/// Plain object identified by id only.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Resource(pub u64);

#[derive(Debug)]
pub struct CommandAllocator {
    id: u64,
}

#[derive(Debug)]
pub struct CommandBuffer {
    id: u64,
    state: Arc<Mutex<State>>,
    nested: bool,
    recording: bool,
    ops: Vec<Op>,
}

impl CommandBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    fn snapshot(&self) -> SubmittedBuffer {
        SubmittedBuffer {
            id: self.id,
            nested: self.nested,
            ops: self.ops.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Fence {
    id: u64,
    serial: Mutex<Option<u64>>,
}

#[derive(Debug)]
pub struct Memory {
    id: u64,
    size: MemoryAddress,
    heap: crate::GpuHeap,
}

impl Memory {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> MemoryAddress {
        self.size
    }

    pub fn heap(&self) -> crate::GpuHeap {
        self.heap
    }
}

#[derive(Debug)]
pub struct QuerySet {
    id: u64,
    binding: Option<(u64, MemoryAddress)>,
}

#[derive(Debug)]
struct Sample {
    id: SampleId,
    ty: SampleType,
    counter_count: usize,
    trace_size: MemoryAddress,
}

#[derive(Debug)]
pub struct SamplingSession {
    id: u64,
    active: bool,
    finished: bool,
    samples: Vec<Sample>,
}

#[derive(Debug)]
pub struct Device {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicU64>,
    properties: crate::DeviceProperties,
    perf: crate::PerfExperimentProperties,
}

impl Device {
    pub fn new(perf: crate::PerfExperimentProperties) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            properties: crate::DeviceProperties {
                fragment_size: 0x1000,
                supports_timestamps: true,
            },
            perf,
        }
    }

    pub fn gpu(&self) -> Gpu {
        Gpu {
            state: Arc::clone(&self.state),
        }
    }

    fn make_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct Queue {
    state: Arc<Mutex<State>>,
}

impl crate::Device<Api> for Device {
    unsafe fn properties(&self) -> crate::DeviceProperties {
        self.properties.clone()
    }
    unsafe fn perf_experiment_properties(&self) -> DeviceResult<crate::PerfExperimentProperties> {
        Ok(self.perf.clone())
    }
    unsafe fn set_clock_mode(&self, mode: ClockMode) -> DeviceResult<()> {
        self.state.lock().clock_modes.push(mode);
        Ok(())
    }

    unsafe fn create_queue(&self, _queue_type: crate::QueueType) -> DeviceResult<Queue> {
        Ok(Queue {
            state: Arc::clone(&self.state),
        })
    }

    unsafe fn create_command_allocator(
        &self,
        _desc: &crate::CommandAllocatorDescriptor,
    ) -> DeviceResult<CommandAllocator> {
        self.state.lock().allocate(Allocation::CommandAllocator)?;
        Ok(CommandAllocator { id: self.make_id() })
    }
    unsafe fn reset_command_allocator(&self, allocator: &mut CommandAllocator) -> DeviceResult<()> {
        log::trace!("Resetting command allocator {}", allocator.id);
        let mut state = self.state.lock();
        *state
            .resets
            .entry(Allocation::CommandAllocator)
            .or_insert(0) += 1;
        Ok(())
    }
    unsafe fn destroy_command_allocator(&self, _allocator: CommandAllocator) {
        self.state.lock().free(Allocation::CommandAllocator);
    }

    unsafe fn create_command_buffer(
        &self,
        desc: &crate::CommandBufferDescriptor<Api>,
    ) -> DeviceResult<CommandBuffer> {
        self.state.lock().allocate(Allocation::CommandBuffer)?;
        Ok(CommandBuffer {
            id: self.make_id(),
            state: Arc::clone(&self.state),
            nested: desc.nested,
            recording: false,
            ops: Vec::new(),
        })
    }
    unsafe fn destroy_command_buffer(&self, _cmd_buf: CommandBuffer) {
        self.state.lock().free(Allocation::CommandBuffer);
    }

    unsafe fn create_fence(&self) -> DeviceResult<Fence> {
        self.state.lock().allocate(Allocation::Fence)?;
        Ok(Fence {
            id: self.make_id(),
            serial: Mutex::new(None),
        })
    }
    unsafe fn destroy_fence(&self, _fence: Fence) {
        self.state.lock().free(Allocation::Fence);
    }
    unsafe fn get_fence_status(&self, fence: &Fence) -> DeviceResult<bool> {
        let state = self.state.lock();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        Ok(match *fence.serial.lock() {
            Some(serial) => state.is_retired(serial),
            None => false,
        })
    }

    unsafe fn create_memory(&self, desc: &crate::MemoryDescriptor) -> DeviceResult<Memory> {
        self.state.lock().allocate(Allocation::Memory)?;
        Ok(Memory {
            id: self.make_id(),
            size: desc.size,
            heap: desc.heap,
        })
    }
    unsafe fn destroy_memory(&self, _memory: Memory) {
        self.state.lock().free(Allocation::Memory);
    }

    unsafe fn create_query_set(&self, _desc: &crate::QuerySetDescriptor) -> DeviceResult<QuerySet> {
        self.state.lock().allocate(Allocation::QuerySet)?;
        Ok(QuerySet {
            id: self.make_id(),
            binding: None,
        })
    }
    unsafe fn destroy_query_set(&self, set: QuerySet) {
        let mut state = self.state.lock();
        if set.binding.is_some() {
            state.bound_query_sets -= 1;
        }
        state.free(Allocation::QuerySet);
    }
    unsafe fn query_set_memory_requirements(&self, _set: &QuerySet) -> crate::MemoryRequirements {
        crate::MemoryRequirements {
            size: 0x100,
            alignment: 0x100,
        }
    }
    unsafe fn bind_query_set_memory(
        &self,
        set: &mut QuerySet,
        binding: Option<(&Memory, MemoryAddress)>,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let binding = binding.map(|(memory, offset)| (memory.id, offset));
        match (set.binding.is_some(), binding.is_some()) {
            (false, true) => state.bound_query_sets += 1,
            (true, false) => state.bound_query_sets -= 1,
            _ => {}
        }
        set.binding = binding;
        Ok(())
    }
    unsafe fn get_query_results(
        &self,
        set: &QuerySet,
    ) -> DeviceResult<Option<crate::PipelineStatistics>> {
        Ok(set.binding.map(|(_, offset)| crate::PipelineStatistics {
            ia_vertices: 3,
            ia_primitives: 1,
            vs_invocations: 3,
            ps_invocations: offset + 1,
            cs_invocations: 0,
        }))
    }

    unsafe fn create_sampling_session(
        &self,
        _desc: &crate::SamplingSessionDescriptor,
    ) -> DeviceResult<SamplingSession> {
        self.state.lock().allocate(Allocation::SamplingSession)?;
        Ok(SamplingSession {
            id: self.make_id(),
            active: false,
            finished: false,
            samples: Vec::new(),
        })
    }
    unsafe fn destroy_sampling_session(&self, _session: SamplingSession) {
        self.state.lock().free(Allocation::SamplingSession);
    }
}

impl crate::Queue<Api> for Queue {
    unsafe fn submit(&mut self, info: &crate::SubmitInfo<Api>) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        state.last_serial += 1;
        let serial = state.last_serial;
        if let Some(fence) = info.fence {
            *fence.serial.lock() = Some(serial);
        }
        let command_buffers = info
            .command_buffers
            .iter()
            .map(|cmd_buf| cmd_buf.snapshot())
            .collect();
        state.submissions.push(Submission {
            serial,
            command_buffers,
            infos: info
                .command_buffer_infos
                .map(|infos| infos.iter().map(|info| info.is_valid).collect()),
            memory_ref_count: info.memory_refs.len(),
            has_fence: info.fence.is_some(),
        });
        state.events.push(QueueEvent::Submit(serial));
        Ok(())
    }
    unsafe fn associate_fence_with_last_submit(&mut self, fence: &Fence) -> DeviceResult<()> {
        let serial = self.state.lock().last_serial;
        log::trace!("Fence {} tracks submission {}", fence.id, serial);
        *fence.serial.lock() = Some(serial);
        Ok(())
    }
    unsafe fn wait_idle(&mut self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.retired_out_of_order.clear();
        state.retired_through = state.last_serial;
        state.events.push(QueueEvent::WaitIdle);
        Ok(())
    }

    unsafe fn signal_semaphore(&mut self, semaphore: &Resource) -> DeviceResult<()> {
        self.state
            .lock()
            .events
            .push(QueueEvent::SignalSemaphore(semaphore.0));
        Ok(())
    }
    unsafe fn wait_semaphore(&mut self, semaphore: &Resource) -> DeviceResult<()> {
        self.state
            .lock()
            .events
            .push(QueueEvent::WaitSemaphore(semaphore.0));
        Ok(())
    }

    unsafe fn present_direct(&mut self, _info: &crate::PresentDirectInfo<Api>) -> DeviceResult<()> {
        self.state.lock().events.push(QueueEvent::PresentDirect);
        Ok(())
    }
    unsafe fn present_swap_chain(
        &mut self,
        info: &crate::PresentSwapChainInfo<Api>,
    ) -> DeviceResult<()> {
        self.state
            .lock()
            .events
            .push(QueueEvent::PresentSwapChain(info.image_index));
        Ok(())
    }
    unsafe fn delay(&mut self, _delay_ms: f32) -> DeviceResult<()> {
        self.state.lock().events.push(QueueEvent::Delay);
        Ok(())
    }

    unsafe fn remap_virtual_memory_pages(
        &mut self,
        ranges: &[crate::VirtualMemoryRemapRange<Api>],
        _do_not_wait: bool,
        fence: Option<&Fence>,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if let Some(fence) = fence {
            *fence.serial.lock() = Some(state.last_serial);
        }
        state
            .events
            .push(QueueEvent::RemapVirtualMemory(ranges.len()));
        Ok(())
    }
    unsafe fn copy_virtual_memory_page_mappings(
        &mut self,
        ranges: &[crate::VirtualMemoryCopyRange<Api>],
        _do_not_wait: bool,
    ) -> DeviceResult<()> {
        self.state
            .lock()
            .events
            .push(QueueEvent::CopyVirtualMemoryMappings(ranges.len()));
        Ok(())
    }
}

impl crate::CommandBuffer<Api> for CommandBuffer {
    unsafe fn begin(&mut self) -> DeviceResult<()> {
        {
            let mut state = self.state.lock();
            if state.recording_failures > 0 {
                state.recording_failures -= 1;
                log::debug!("Simulating a failure to begin command buffer {}", self.id);
                return Err(DeviceError::OutOfMemory);
            }
        }
        self.ops.clear();
        self.recording = true;
        Ok(())
    }
    unsafe fn end(&mut self) -> DeviceResult<()> {
        self.recording = false;
        Ok(())
    }
    unsafe fn reset(&mut self) -> DeviceResult<()> {
        self.ops.clear();
        self.recording = false;
        Ok(())
    }

    unsafe fn bind_pipeline(&mut self, _bind_point: crate::PipelineBindPoint, pipeline: &Resource) {
        self.ops.push(Op::BindPipeline(pipeline.0));
    }

    unsafe fn draw(
        &mut self,
        _first_vertex: u32,
        vertex_count: u32,
        _first_instance: u32,
        instance_count: u32,
    ) {
        self.ops.push(Op::Draw {
            vertex_count,
            instance_count,
        });
    }
    unsafe fn draw_indexed(
        &mut self,
        _first_index: u32,
        index_count: u32,
        _vertex_offset: i32,
        _first_instance: u32,
        instance_count: u32,
    ) {
        self.ops.push(Op::DrawIndexed {
            index_count,
            instance_count,
        });
    }
    unsafe fn draw_indirect(&mut self, memory: &Memory, offset: MemoryAddress, draw_count: u32) {
        self.ops.push(Op::DrawIndirect {
            memory: memory.id,
            offset,
            draw_count,
        });
    }
    unsafe fn dispatch(&mut self, count: [u32; 3]) {
        self.ops.push(Op::Dispatch(count));
    }
    unsafe fn dispatch_indirect(&mut self, memory: &Memory, offset: MemoryAddress) {
        self.ops.push(Op::DispatchIndirect {
            memory: memory.id,
            offset,
        });
    }

    unsafe fn copy_memory(&mut self, src: &Memory, dst: &Memory, regions: &[crate::MemoryCopy]) {
        self.ops.push(Op::CopyMemory {
            src: src.id,
            dst: dst.id,
            region_count: regions.len(),
        });
    }
    unsafe fn fill_memory(&mut self, dst: &Memory, _range: crate::MemoryRange, value: u32) {
        self.ops.push(Op::FillMemory { dst: dst.id, value });
    }
    unsafe fn barrier(&mut self, _barrier: &crate::Barrier) {
        self.ops.push(Op::Barrier);
    }

    unsafe fn insert_debug_marker(&mut self, label: &str) {
        self.ops.push(Op::InsertDebugMarker(label.to_string()));
    }
    unsafe fn begin_debug_marker(&mut self, group_label: &str) {
        self.ops.push(Op::BeginDebugMarker(group_label.to_string()));
    }
    unsafe fn end_debug_marker(&mut self) {
        self.ops.push(Op::EndDebugMarker);
    }

    unsafe fn begin_query(&mut self, set: &QuerySet) {
        self.ops.push(Op::BeginQuery(set.id));
    }
    unsafe fn end_query(&mut self, set: &QuerySet) {
        self.ops.push(Op::EndQuery(set.id));
    }

    unsafe fn execute_nested(&mut self, nested: &[&CommandBuffer]) {
        self.ops.push(Op::ExecuteNested(
            nested.iter().map(|cmd_buf| cmd_buf.snapshot()).collect(),
        ));
    }
    unsafe fn present(&mut self, info: &crate::PresentSwapChainInfo<Api>) {
        self.ops.push(Op::Present {
            swap_chain: info.swap_chain.0,
            image_index: info.image_index,
        });
    }
}

impl crate::SamplingSession<Api> for SamplingSession {
    unsafe fn begin(&mut self, cmd_buf: &mut CommandBuffer) -> DeviceResult<()> {
        self.active = true;
        self.finished = false;
        cmd_buf.ops.push(Op::BeginSession(self.id));
        Ok(())
    }
    unsafe fn end(&mut self, cmd_buf: &mut CommandBuffer) -> DeviceResult<()> {
        self.active = false;
        self.finished = true;
        cmd_buf.ops.push(Op::EndSession(self.id));
        Ok(())
    }

    unsafe fn begin_sample(
        &mut self,
        cmd_buf: &mut CommandBuffer,
        ty: SampleType,
        config: &crate::SampleConfig,
    ) -> DeviceResult<SampleId> {
        if !self.active {
            return Err(DeviceError::Lost);
        }
        let id = SampleId(self.samples.len() as u32);
        self.samples.push(Sample {
            id,
            ty,
            counter_count: config.counters.len(),
            trace_size: config.trace.gpu_memory_limit,
        });
        cmd_buf.ops.push(Op::BeginSample {
            session: self.id,
            sample: id,
            ty,
        });
        Ok(id)
    }
    unsafe fn end_sample(&mut self, cmd_buf: &mut CommandBuffer, sample: SampleId) {
        cmd_buf.ops.push(Op::EndSample {
            session: self.id,
            sample,
        });
    }

    unsafe fn is_ready(&self) -> bool {
        self.finished
    }
    unsafe fn sample_results(&self, sample: SampleId) -> Option<crate::SampleResults> {
        if !self.finished {
            return None;
        }
        let sample = self.samples.iter().find(|s| s.id == sample)?;
        let base = u64::from(sample.id.0);
        match sample.ty {
            SampleType::Cumulative => Some(crate::SampleResults::Counters(
                (0..sample.counter_count as u64).map(|i| base * 100 + i).collect(),
            )),
            SampleType::Trace => Some(crate::SampleResults::Trace {
                size: sample.trace_size,
            }),
            SampleType::Timing => Some(crate::SampleResults::Timing {
                begin: base * 1000,
                end: base * 1000 + 500,
            }),
            SampleType::None | SampleType::Query => None,
        }
    }
    unsafe fn reset(&mut self) -> DeviceResult<()> {
        self.active = false;
        self.finished = false;
        self.samples.clear();
        Ok(())
    }
}
