//! Application-side command buffers.
//!
//! Commands are recorded into a token list instead of a native command
//! buffer. A queue replays the list into a command buffer of its own at
//! submission time, and is free to insert measurement commands while
//! doing so.

use std::sync::Arc;

use hal::{CommandBuffer as _, DeviceError};
use serde::{Deserialize, Serialize};

/// Commands that get bracketed with samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallId {
    Draw,
    DrawIndexed,
    DrawIndirect,
    Dispatch,
    DispatchIndirect,
}

pub enum Command<A: hal::Api> {
    BindPipeline {
        bind_point: hal::PipelineBindPoint,
        pipeline: Arc<A::Pipeline>,
    },
    Draw {
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    },
    DrawIndexed {
        first_index: u32,
        index_count: u32,
        vertex_offset: i32,
        first_instance: u32,
        instance_count: u32,
    },
    DrawIndirect {
        memory: Arc<A::Memory>,
        offset: hal::MemoryAddress,
        draw_count: u32,
    },
    Dispatch([u32; 3]),
    DispatchIndirect {
        memory: Arc<A::Memory>,
        offset: hal::MemoryAddress,
    },
    CopyMemory {
        src: Arc<A::Memory>,
        dst: Arc<A::Memory>,
        regions: Vec<hal::MemoryCopy>,
    },
    FillMemory {
        dst: Arc<A::Memory>,
        range: hal::MemoryRange,
        value: u32,
    },
    Barrier(hal::Barrier),
    InsertDebugMarker(String),
    PushDebugGroup(String),
    PopDebugGroup,
    ExecuteNested(Vec<Arc<RecordedCommandBuffer<A>>>),
    Present {
        swap_chain: Arc<A::SwapChain>,
        image_index: u32,
    },
}

impl<A: hal::Api> Command<A> {
    pub fn call_id(&self) -> Option<CallId> {
        Some(match *self {
            Command::Draw { .. } => CallId::Draw,
            Command::DrawIndexed { .. } => CallId::DrawIndexed,
            Command::DrawIndirect { .. } => CallId::DrawIndirect,
            Command::Dispatch(_) => CallId::Dispatch,
            Command::DispatchIndirect { .. } => CallId::DispatchIndirect,
            _ => return None,
        })
    }
}

/// Hooks a replay calls around every sampled command.
pub(crate) trait Instrument<A: hal::Api> {
    unsafe fn begin_call(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        call: CallId,
    ) -> Result<(), DeviceError>;

    unsafe fn end_call(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        call: CallId,
    ) -> Result<(), DeviceError>;

    /// Emits the native command buffers that were prepared for the next
    /// `ExecuteNested` command of the replayed list.
    unsafe fn execute_nested(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        nested: &[Arc<RecordedCommandBuffer<A>>],
    ) -> Result<(), DeviceError>;
}

/// Replays without adding anything.
pub(crate) struct Passthrough;

impl<A: hal::Api> Instrument<A> for Passthrough {
    unsafe fn begin_call(&mut self, _: &mut A::CommandBuffer, _: CallId) -> Result<(), DeviceError> {
        Ok(())
    }

    unsafe fn end_call(&mut self, _: &mut A::CommandBuffer, _: CallId) -> Result<(), DeviceError> {
        Ok(())
    }

    unsafe fn execute_nested(
        &mut self,
        _: &mut A::CommandBuffer,
        nested: &[Arc<RecordedCommandBuffer<A>>],
    ) -> Result<(), DeviceError> {
        log::warn!(
            "Skipping {} command buffers nested into a nested command buffer",
            nested.len()
        );
        Ok(())
    }
}

/// A command buffer recorded by the application.
pub struct RecordedCommandBuffer<A: hal::Api> {
    label: Option<String>,
    nested: bool,
    commands: Vec<Command<A>>,
    contains_present: bool,
}

impl<A: hal::Api> std::fmt::Debug for RecordedCommandBuffer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RecordedCommandBuffer")
            .field("label", &self.label)
            .field("nested", &self.nested)
            .field("commands", &self.commands.len())
            .field("contains_present", &self.contains_present)
            .finish()
    }
}

impl<A: hal::Api> RecordedCommandBuffer<A> {
    pub fn new(label: hal::Label) -> Self {
        Self {
            label: label.map(str::to_string),
            nested: false,
            commands: Vec::new(),
            contains_present: false,
        }
    }

    /// Creates a command buffer that can only be executed from another one.
    pub fn new_nested(label: hal::Label) -> Self {
        Self {
            nested: true,
            ..Self::new(label)
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn contains_present(&self) -> bool {
        self.contains_present
    }

    pub fn commands(&self) -> &[Command<A>] {
        &self.commands
    }

    /// Number of commands a replay brackets with samples.
    pub fn sampled_call_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| command.call_id().is_some())
            .count()
    }

    /// Nested command buffers, in execution order.
    pub fn nested_command_buffers(&self) -> impl Iterator<Item = &Arc<RecordedCommandBuffer<A>>> {
        self.commands
            .iter()
            .filter_map(|command| match *command {
                Command::ExecuteNested(ref list) => Some(list.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn bind_pipeline(&mut self, bind_point: hal::PipelineBindPoint, pipeline: Arc<A::Pipeline>) {
        self.commands.push(Command::BindPipeline {
            bind_point,
            pipeline,
        });
    }

    pub fn draw(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    ) {
        self.commands.push(Command::Draw {
            first_vertex,
            vertex_count,
            first_instance,
            instance_count,
        });
    }

    pub fn draw_indexed(
        &mut self,
        first_index: u32,
        index_count: u32,
        vertex_offset: i32,
        first_instance: u32,
        instance_count: u32,
    ) {
        self.commands.push(Command::DrawIndexed {
            first_index,
            index_count,
            vertex_offset,
            first_instance,
            instance_count,
        });
    }

    pub fn draw_indirect(
        &mut self,
        memory: Arc<A::Memory>,
        offset: hal::MemoryAddress,
        draw_count: u32,
    ) {
        self.commands.push(Command::DrawIndirect {
            memory,
            offset,
            draw_count,
        });
    }

    pub fn dispatch(&mut self, count: [u32; 3]) {
        self.commands.push(Command::Dispatch(count));
    }

    pub fn dispatch_indirect(&mut self, memory: Arc<A::Memory>, offset: hal::MemoryAddress) {
        self.commands
            .push(Command::DispatchIndirect { memory, offset });
    }

    pub fn copy_memory(
        &mut self,
        src: Arc<A::Memory>,
        dst: Arc<A::Memory>,
        regions: &[hal::MemoryCopy],
    ) {
        self.commands.push(Command::CopyMemory {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    pub fn fill_memory(&mut self, dst: Arc<A::Memory>, range: hal::MemoryRange, value: u32) {
        self.commands
            .push(Command::FillMemory { dst, range, value });
    }

    pub fn barrier(&mut self, barrier: hal::Barrier) {
        self.commands.push(Command::Barrier(barrier));
    }

    pub fn insert_debug_marker(&mut self, label: &str) {
        self.commands
            .push(Command::InsertDebugMarker(label.to_string()));
    }

    pub fn push_debug_group(&mut self, label: &str) {
        self.commands
            .push(Command::PushDebugGroup(label.to_string()));
    }

    pub fn pop_debug_group(&mut self) {
        self.commands.push(Command::PopDebugGroup);
    }

    pub fn execute_nested(&mut self, nested: Vec<Arc<RecordedCommandBuffer<A>>>) {
        debug_assert!(nested.iter().all(|cmd_buf| cmd_buf.is_nested()));
        self.commands.push(Command::ExecuteNested(nested));
    }

    pub fn present(&mut self, swap_chain: Arc<A::SwapChain>, image_index: u32) {
        self.contains_present = true;
        self.commands.push(Command::Present {
            swap_chain,
            image_index,
        });
    }

    /// Re-emits the recorded commands into `cmd_buf`, which must be recording.
    pub(crate) unsafe fn replay<I: Instrument<A>>(
        &self,
        cmd_buf: &mut A::CommandBuffer,
        instrument: &mut I,
    ) -> Result<(), DeviceError> {
        profiling::scope!("replay");
        log::trace!(
            "Replaying {:?} with {} commands",
            self.label,
            self.commands.len()
        );
        for command in self.commands.iter() {
            let call = command.call_id();
            if let Some(call) = call {
                instrument.begin_call(cmd_buf, call)?;
            }
            match *command {
                Command::BindPipeline {
                    bind_point,
                    ref pipeline,
                } => cmd_buf.bind_pipeline(bind_point, pipeline),
                Command::Draw {
                    first_vertex,
                    vertex_count,
                    first_instance,
                    instance_count,
                } => cmd_buf.draw(first_vertex, vertex_count, first_instance, instance_count),
                Command::DrawIndexed {
                    first_index,
                    index_count,
                    vertex_offset,
                    first_instance,
                    instance_count,
                } => cmd_buf.draw_indexed(
                    first_index,
                    index_count,
                    vertex_offset,
                    first_instance,
                    instance_count,
                ),
                Command::DrawIndirect {
                    ref memory,
                    offset,
                    draw_count,
                } => cmd_buf.draw_indirect(memory, offset, draw_count),
                Command::Dispatch(count) => cmd_buf.dispatch(count),
                Command::DispatchIndirect { ref memory, offset } => {
                    cmd_buf.dispatch_indirect(memory, offset)
                }
                Command::CopyMemory {
                    ref src,
                    ref dst,
                    ref regions,
                } => cmd_buf.copy_memory(src, dst, regions),
                Command::FillMemory {
                    ref dst,
                    ref range,
                    value,
                } => cmd_buf.fill_memory(dst, range.clone(), value),
                Command::Barrier(ref barrier) => cmd_buf.barrier(barrier),
                Command::InsertDebugMarker(ref label) => cmd_buf.insert_debug_marker(label),
                Command::PushDebugGroup(ref label) => cmd_buf.begin_debug_marker(label),
                Command::PopDebugGroup => cmd_buf.end_debug_marker(),
                Command::ExecuteNested(ref nested) => instrument.execute_nested(cmd_buf, nested)?,
                Command::Present {
                    ref swap_chain,
                    image_index,
                } => cmd_buf.present(&hal::PresentSwapChainInfo {
                    swap_chain,
                    image_index,
                }),
            }
            if let Some(call) = call {
                instrument.end_call(cmd_buf, call)?;
            }
        }
        Ok(())
    }
}
