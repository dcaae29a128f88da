/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/*! This library describes the internal unsafe GPU abstraction used by the
 *  replay profiler. It covers only what a profiling queue needs:
 *  - Fully unsafe: zero overhead, zero validation.
 *  - Compile-time backend selection via traits.
 *  - Objects are passed by references and returned by value. No IDs.
 *  - Completion is only observable by polling fences.
 *  - Sampling sessions record their own commands into command buffers.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
)]

pub mod soft;

use std::{fmt, ops::Range};

use bitflags::bitflags;
use thiserror::Error;

pub type Label<'a> = Option<&'a str>;
pub type MemoryAddress = u64;
pub type MemoryRange = Range<MemoryAddress>;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("out of GPU memory")]
    OutOfGpuMemory,
    #[error("device is lost")]
    Lost,
}

pub trait Api: Clone + Sized {
    type Device: Device<Self>;
    type Queue: Queue<Self>;

    type CommandAllocator: fmt::Debug + Send;
    type CommandBuffer: CommandBuffer<Self>;
    type SamplingSession: SamplingSession<Self>;

    type Fence: fmt::Debug + Send + Sync;
    type Memory: fmt::Debug + Send + Sync;
    type QuerySet: fmt::Debug + Send + Sync;
    type Pipeline: fmt::Debug + Send + Sync;
    type Semaphore: fmt::Debug + Send + Sync;
    type SwapChain: fmt::Debug + Send + Sync;
}

pub trait Device<A: Api> {
    unsafe fn properties(&self) -> DeviceProperties;
    unsafe fn perf_experiment_properties(&self) -> Result<PerfExperimentProperties, DeviceError>;
    /// Pins (or releases) the engine and memory clocks.
    unsafe fn set_clock_mode(&self, mode: ClockMode) -> Result<(), DeviceError>;

    unsafe fn create_queue(&self, queue_type: QueueType) -> Result<A::Queue, DeviceError>;

    unsafe fn create_command_allocator(
        &self,
        desc: &CommandAllocatorDescriptor,
    ) -> Result<A::CommandAllocator, DeviceError>;
    /// Returns all the command memory of the allocator back to it.
    ///
    /// No command buffer created from it may be pending execution.
    unsafe fn reset_command_allocator(
        &self,
        allocator: &mut A::CommandAllocator,
    ) -> Result<(), DeviceError>;
    unsafe fn destroy_command_allocator(&self, allocator: A::CommandAllocator);

    unsafe fn create_command_buffer(
        &self,
        desc: &CommandBufferDescriptor<A>,
    ) -> Result<A::CommandBuffer, DeviceError>;
    unsafe fn destroy_command_buffer(&self, cmd_buf: A::CommandBuffer);

    unsafe fn create_fence(&self) -> Result<A::Fence, DeviceError>;
    unsafe fn destroy_fence(&self, fence: A::Fence);
    /// Returns `true` once all the work the fence is associated with has retired.
    ///
    /// A fence that was never submitted is reported as not signaled.
    unsafe fn get_fence_status(&self, fence: &A::Fence) -> Result<bool, DeviceError>;

    unsafe fn create_memory(&self, desc: &MemoryDescriptor) -> Result<A::Memory, DeviceError>;
    unsafe fn destroy_memory(&self, memory: A::Memory);

    unsafe fn create_query_set(
        &self,
        desc: &QuerySetDescriptor,
    ) -> Result<A::QuerySet, DeviceError>;
    unsafe fn destroy_query_set(&self, set: A::QuerySet);
    unsafe fn query_set_memory_requirements(&self, set: &A::QuerySet) -> MemoryRequirements;
    /// Binds the query results to a range of `memory`, or unbinds them with `None`.
    unsafe fn bind_query_set_memory(
        &self,
        set: &mut A::QuerySet,
        binding: Option<(&A::Memory, MemoryAddress)>,
    ) -> Result<(), DeviceError>;
    /// Returns `None` if the results are not available yet.
    unsafe fn get_query_results(
        &self,
        set: &A::QuerySet,
    ) -> Result<Option<PipelineStatistics>, DeviceError>;

    unsafe fn create_sampling_session(
        &self,
        desc: &SamplingSessionDescriptor,
    ) -> Result<A::SamplingSession, DeviceError>;
    unsafe fn destroy_sampling_session(&self, session: A::SamplingSession);
}

pub trait Queue<A: Api> {
    unsafe fn submit(&mut self, info: &SubmitInfo<A>) -> Result<(), DeviceError>;
    /// Makes `fence` signal once everything submitted so far on this queue has retired.
    ///
    /// Waiting on such a fence from the host is not supported, only polling is.
    unsafe fn associate_fence_with_last_submit(&mut self, fence: &A::Fence)
        -> Result<(), DeviceError>;
    unsafe fn wait_idle(&mut self) -> Result<(), DeviceError>;

    unsafe fn signal_semaphore(&mut self, semaphore: &A::Semaphore) -> Result<(), DeviceError>;
    unsafe fn wait_semaphore(&mut self, semaphore: &A::Semaphore) -> Result<(), DeviceError>;

    unsafe fn present_direct(&mut self, info: &PresentDirectInfo<A>) -> Result<(), DeviceError>;
    unsafe fn present_swap_chain(
        &mut self,
        info: &PresentSwapChainInfo<A>,
    ) -> Result<(), DeviceError>;
    unsafe fn delay(&mut self, delay_ms: f32) -> Result<(), DeviceError>;

    unsafe fn remap_virtual_memory_pages(
        &mut self,
        ranges: &[VirtualMemoryRemapRange<A>],
        do_not_wait: bool,
        fence: Option<&A::Fence>,
    ) -> Result<(), DeviceError>;
    unsafe fn copy_virtual_memory_page_mappings(
        &mut self,
        ranges: &[VirtualMemoryCopyRange<A>],
        do_not_wait: bool,
    ) -> Result<(), DeviceError>;
}

pub trait CommandBuffer<A: Api>: fmt::Debug + Send {
    unsafe fn begin(&mut self) -> Result<(), DeviceError>;
    unsafe fn end(&mut self) -> Result<(), DeviceError>;
    /// Discards all recorded commands, keeping the buffer usable.
    unsafe fn reset(&mut self) -> Result<(), DeviceError>;

    unsafe fn bind_pipeline(&mut self, bind_point: PipelineBindPoint, pipeline: &A::Pipeline);

    unsafe fn draw(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    );
    unsafe fn draw_indexed(
        &mut self,
        first_index: u32,
        index_count: u32,
        vertex_offset: i32,
        first_instance: u32,
        instance_count: u32,
    );
    unsafe fn draw_indirect(&mut self, memory: &A::Memory, offset: MemoryAddress, draw_count: u32);
    unsafe fn dispatch(&mut self, count: [u32; 3]);
    unsafe fn dispatch_indirect(&mut self, memory: &A::Memory, offset: MemoryAddress);

    unsafe fn copy_memory(&mut self, src: &A::Memory, dst: &A::Memory, regions: &[MemoryCopy]);
    unsafe fn fill_memory(&mut self, dst: &A::Memory, range: MemoryRange, value: u32);
    unsafe fn barrier(&mut self, barrier: &Barrier);

    unsafe fn insert_debug_marker(&mut self, label: &str);
    unsafe fn begin_debug_marker(&mut self, group_label: &str);
    unsafe fn end_debug_marker(&mut self);

    unsafe fn begin_query(&mut self, set: &A::QuerySet);
    unsafe fn end_query(&mut self, set: &A::QuerySet);

    /// Note: every buffer in `nested` has to be created with `nested: true`.
    unsafe fn execute_nested(&mut self, nested: &[&A::CommandBuffer]);
    unsafe fn present(&mut self, info: &PresentSwapChainInfo<A>);
}

/// A heavyweight measurement object that records its own commands.
pub trait SamplingSession<A: Api>: fmt::Debug + Send {
    unsafe fn begin(&mut self, cmd_buf: &mut A::CommandBuffer) -> Result<(), DeviceError>;
    unsafe fn end(&mut self, cmd_buf: &mut A::CommandBuffer) -> Result<(), DeviceError>;

    /// Opens a sample of type `ty`, using `config` for counter and trace setup.
    unsafe fn begin_sample(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        ty: SampleType,
        config: &SampleConfig,
    ) -> Result<SampleId, DeviceError>;
    unsafe fn end_sample(&mut self, cmd_buf: &mut A::CommandBuffer, sample: SampleId);

    /// Returns `true` once the results of every sample are available.
    unsafe fn is_ready(&self) -> bool;
    unsafe fn sample_results(&self, sample: SampleId) -> Option<SampleResults>;
    /// Forgets all samples, making the session reusable.
    unsafe fn reset(&mut self) -> Result<(), DeviceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub enum QueueType {
    Universal,
    Compute,
    Dma,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub enum GpuHeap {
    Local,
    Invisible,
    GartUswc,
    GartCacheable,
}

impl GpuHeap {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            Self::Local => 0,
            Self::Invisible => 1,
            Self::GartUswc => 2,
            Self::GartCacheable => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockMode {
    Default,
    /// Stable clocks for repeatable measurements.
    Profiling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub enum HwPipePoint {
    Top,
    PostIndexFetch,
    PreRasterization,
    PostPixelShader,
    PostCompute,
    Bottom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentMode {
    Windowed,
    Fullscreen,
}

bitflags!(
    /// Pipeline stages a barrier waits on or blocks.
    pub struct PipelineStage: u32 {
        const TOP = 0x1;
        const FETCH_INDIRECT = 0x2;
        const VERTEX = 0x4;
        const PIXEL = 0x8;
        const COMPUTE = 0x10;
        const COPY = 0x20;
        const BOTTOM = 0x40;
    }
);

bitflags!(
    /// Memory accesses a barrier makes available or visible.
    pub struct MemoryAccess: u32 {
        const INDIRECT = 0x1;
        const SHADER_READ = 0x2;
        const SHADER_WRITE = 0x4;
        const COPY_SRC = 0x8;
        const COPY_DST = 0x10;
        const HOST_READ = 0x20;
        /// The combination of all read-only accesses.
        const READ_ALL = Self::INDIRECT.bits | Self::SHADER_READ.bits | Self::COPY_SRC.bits | Self::HOST_READ.bits;
        /// The combination of all write accesses.
        const WRITE_ALL = Self::SHADER_WRITE.bits | Self::COPY_DST.bits;
    }
);

bitflags!(
    /// Shader stages a trace or counter sample is restricted to.
    pub struct ShaderMask: u32 {
        const PS = 0x1;
        const VS = 0x2;
        const GS = 0x4;
        const ES = 0x8;
        const HS = 0x10;
        const LS = 0x20;
        const CS = 0x40;
    }
);

#[derive(Clone, Debug, PartialEq)]
pub struct Barrier {
    pub src_stages: PipelineStage,
    pub dst_stages: PipelineStage,
    pub src_access: MemoryAccess,
    pub dst_access: MemoryAccess,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryCopy {
    pub src_offset: MemoryAddress,
    pub dst_offset: MemoryAddress,
    pub size: MemoryAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: MemoryAddress,
    pub alignment: MemoryAddress,
}

#[derive(Clone, Debug)]
pub struct DeviceProperties {
    /// Granularity of GPU memory allocations.
    pub fragment_size: MemoryAddress,
    pub supports_timestamps: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpuBlockProperties {
    pub instance_count: u32,
    pub max_event_id: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerfExperimentProperties {
    pub shader_engine_count: u32,
    pub supports_trace: bool,
    /// Indexed by the hardware block id.
    pub blocks: Vec<GpuBlockProperties>,
}

#[derive(Clone, Debug)]
pub struct CommandAllocatorDescriptor<'a> {
    pub label: Label<'a>,
    pub heap: GpuHeap,
    pub alloc_size: MemoryAddress,
    pub suballoc_size: MemoryAddress,
    /// Reuse command memory automatically once the GPU is done with it.
    pub auto_memory_reuse: bool,
}

#[derive(Debug)]
pub struct CommandBufferDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub allocator: &'a A::CommandAllocator,
    pub queue_type: QueueType,
    pub nested: bool,
}

#[derive(Clone, Debug)]
pub struct MemoryDescriptor<'a> {
    pub label: Label<'a>,
    pub size: MemoryAddress,
    pub alignment: MemoryAddress,
    pub heap: GpuHeap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryType {
    PipelineStatistics,
}

#[derive(Clone, Debug)]
pub struct QuerySetDescriptor<'a> {
    pub label: Label<'a>,
    pub ty: QueryType,
    pub count: u32,
}

#[derive(Clone, Debug)]
pub struct SamplingSessionDescriptor<'a> {
    pub label: Label<'a>,
}

/// Per-command-buffer submission details.
#[derive(Debug)]
pub struct CommandBufferInfo<'a, A: Api> {
    /// Placeholder entries keep the list parallel to the command buffers.
    pub is_valid: bool,
    pub frame_begin: bool,
    pub frame_end: bool,
    pub primary_memory: Option<&'a A::Memory>,
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for CommandBufferInfo<'_, A> {
    fn clone(&self) -> Self {
        Self {
            is_valid: self.is_valid,
            frame_begin: self.frame_begin,
            frame_end: self.frame_end,
            primary_memory: self.primary_memory,
        }
    }
}

impl<A: Api> CommandBufferInfo<'_, A> {
    pub fn placeholder() -> Self {
        Self {
            is_valid: false,
            frame_begin: false,
            frame_end: false,
            primary_memory: None,
        }
    }
}

#[derive(Debug)]
pub struct MemoryRef<'a, A: Api> {
    pub memory: &'a A::Memory,
    pub read_only: bool,
}

impl<A: Api> Clone for MemoryRef<'_, A> {
    fn clone(&self) -> Self {
        Self {
            memory: self.memory,
            read_only: self.read_only,
        }
    }
}

#[derive(Debug)]
pub struct SubmitInfo<'a, A: Api> {
    pub command_buffers: &'a [&'a A::CommandBuffer],
    /// Either `None`, or exactly one entry per command buffer.
    pub command_buffer_infos: Option<&'a [CommandBufferInfo<'a, A>]>,
    pub memory_refs: &'a [MemoryRef<'a, A>],
    pub fence: Option<&'a A::Fence>,
}

#[derive(Debug)]
pub struct PresentDirectInfo<'a, A: Api> {
    pub src_image: &'a A::Memory,
    pub mode: PresentMode,
}

#[derive(Debug)]
pub struct PresentSwapChainInfo<'a, A: Api> {
    pub swap_chain: &'a A::SwapChain,
    pub image_index: u32,
}

#[derive(Debug)]
pub struct VirtualMemoryRemapRange<'a, A: Api> {
    pub virtual_memory: &'a A::Memory,
    pub virtual_offset: MemoryAddress,
    /// `None` unmaps the range.
    pub real_memory: Option<&'a A::Memory>,
    pub real_offset: MemoryAddress,
    pub size: MemoryAddress,
}

#[derive(Debug)]
pub struct VirtualMemoryCopyRange<'a, A: Api> {
    pub src: &'a A::Memory,
    pub src_offset: MemoryAddress,
    pub dst: &'a A::Memory,
    pub dst_offset: MemoryAddress,
    pub size: MemoryAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub enum SampleType {
    None,
    Cumulative,
    Trace,
    Timing,
    Query,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub struct SampleId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub struct PerfCounterId {
    pub block: u32,
    pub event_id: u32,
    pub instance: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub sample_internal_operations: bool,
    pub cache_flush_on_counter_collection: bool,
    pub use_shader_mask: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceConfig {
    pub enable: bool,
    pub gpu_memory_limit: MemoryAddress,
    pub suppress_instruction_tokens: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleTiming {
    pub pre_sample: HwPipePoint,
    pub post_sample: HwPipePoint,
}

/// What a sampling session measures, shared by every session of a queue.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleConfig {
    pub ty: SampleType,
    pub flags: SampleFlags,
    pub shader_mask: ShaderMask,
    /// One entry per counter per block instance.
    pub counters: Vec<PerfCounterId>,
    pub trace: TraceConfig,
    pub timing: SampleTiming,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            ty: SampleType::None,
            flags: SampleFlags::default(),
            shader_mask: ShaderMask::empty(),
            counters: Vec::new(),
            trace: TraceConfig::default(),
            timing: SampleTiming {
                pre_sample: HwPipePoint::Bottom,
                post_sample: HwPipePoint::Bottom,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub enum SampleResults {
    /// One value per entry of `SampleConfig::counters`.
    Counters(Vec<u64>),
    Trace { size: MemoryAddress },
    Timing { begin: u64, end: u64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "trace", derive(serde::Serialize))]
#[cfg_attr(feature = "replay", derive(serde::Deserialize))]
pub struct PipelineStatistics {
    pub ia_vertices: u64,
    pub ia_primitives: u64,
    pub vs_invocations: u64,
    pub ps_invocations: u64,
    pub cs_invocations: u64,
}
