use std::{sync::Arc, vec};

use hal::{CommandBuffer as _, DeviceError, SamplingSession as _};
use smallvec::SmallVec;

use crate::{
    command::{CallId, Command, Instrument, Passthrough, RecordedCommandBuffer},
    device::{
        life::SubmissionResources,
        queue::{NestedTarget, Queue},
    },
    logging::{LogItem, LogItemKind, LogQueue},
    pool::{Handle, ResourcePool},
    sampling::SessionManager,
    settings::Granularity,
};

/// Samples every draw and dispatch of a replayed command buffer.
struct DrawSampler<'a, A: hal::Api> {
    sessions: &'a mut SessionManager<A>,
    /// `None` unless sampling at draw granularity.
    session: Option<Handle<A::SamplingSession>>,
    query_pool: &'a ResourcePool<A::QuerySet>,
    query_sets: vec::IntoIter<Handle<A::QuerySet>>,
    nested_pool: &'a ResourcePool<NestedTarget<A>>,
    /// Prepared targets, one list per `ExecuteNested` command.
    nested: vec::IntoIter<Vec<Handle<NestedTarget<A>>>>,
    log_items: &'a mut LogQueue<A>,
    next: &'a mut SubmissionResources<A>,
    frame_id: u64,
    command_buffer: u64,
    call_index: u32,
    timestamps: bool,
    current: Option<LogItem<A>>,
}

impl<A: hal::Api> Instrument<A> for DrawSampler<'_, A> {
    unsafe fn begin_call(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        call: CallId,
    ) -> Result<(), DeviceError> {
        let session = match self.session {
            Some(session) => session,
            None => return Ok(()),
        };
        let mut item = LogItem::new(
            self.frame_id,
            LogItemKind::DrawOrDispatch {
                call,
                command_buffer: self.command_buffer,
                index: self.call_index,
            },
        );
        self.call_index += 1;
        self.sessions
            .begin_samples(session, cmd_buf, &mut item.sample, self.timestamps)?;
        if let Some(query) = self.query_sets.next() {
            cmd_buf.begin_query(self.query_pool.get(query));
            item.sample.query = Some(query);
        }
        self.current = Some(item);
        Ok(())
    }

    unsafe fn end_call(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        _call: CallId,
    ) -> Result<(), DeviceError> {
        let item = match self.current.take() {
            Some(item) => item,
            None => return Ok(()),
        };
        if let Some(query) = item.sample.query {
            cmd_buf.end_query(self.query_pool.get(query));
        }
        self.sessions.end_samples(cmd_buf, &item.sample);
        self.log_items.push(item);
        self.next.log_item_count += 1;
        Ok(())
    }

    unsafe fn execute_nested(
        &mut self,
        cmd_buf: &mut A::CommandBuffer,
        nested: &[Arc<RecordedCommandBuffer<A>>],
    ) -> Result<(), DeviceError> {
        let handles = self.nested.next().unwrap_or_default();
        debug_assert_eq!(handles.len(), nested.len());
        let nested_pool = self.nested_pool;
        let raw = handles
            .iter()
            .map(|&handle| &nested_pool.get(handle).cmd_buf)
            .collect::<SmallVec<[_; 4]>>();
        cmd_buf.execute_nested(&raw);
        Ok(())
    }
}

impl<A: hal::Api> Queue<A> {
    /// Replays `recorded` into a target command buffer, bracketing it the
    /// way the current granularity asks for.
    ///
    /// Everything the replay needs is acquired up front, so that running out
    /// of memory can still drain the queue.
    pub(super) fn replay(
        &mut self,
        recorded: &RecordedCommandBuffer<A>,
    ) -> Result<Handle<A::CommandBuffer>, DeviceError> {
        profiling::scope!("Queue::replay");
        let per_draw = self.device.logging_enabled(Granularity::Draw);
        let per_command_buffer = self.device.logging_enabled(Granularity::CmdBuf);

        let target = self.acquire_command_buffer()?;
        let session = if per_draw || per_command_buffer {
            Some(self.acquire_session()?)
        } else {
            None
        };
        let mut query_sets = Vec::new();
        if per_draw && self.device.settings.pipeline_stats {
            let count = recorded.sampled_call_count();
            query_sets.reserve(count);
            for _ in 0..count {
                query_sets.push(self.acquire_query_set()?);
            }
        }
        let nested = self.prepare_nested(recorded)?;

        let ordinal = self.command_buffer_count;
        self.command_buffer_count += 1;
        let frame_id = self.device.frame_id();
        let timestamps = self.device.properties.supports_timestamps;

        let Queue {
            command_buffers: ref mut targets,
            ref mut sessions,
            query_sets: ref query_pool,
            nested: ref nested_pool,
            ref mut log_items,
            ref mut life,
            ..
        } = *self;
        let cmd_buf = targets.get_mut(target);
        let mut item = LogItem::new(frame_id, LogItemKind::CommandBuffer(ordinal));
        unsafe {
            cmd_buf.begin()?;
            if let Some(session) = session {
                sessions.get_mut(session).begin(cmd_buf)?;
                if per_command_buffer {
                    sessions.begin_samples(session, cmd_buf, &mut item.sample, timestamps)?;
                }
            }

            {
                let mut sampler = DrawSampler {
                    sessions: &mut *sessions,
                    session: if per_draw { session } else { None },
                    query_pool,
                    query_sets: query_sets.into_iter(),
                    nested_pool,
                    nested: nested.into_iter(),
                    log_items: &mut *log_items,
                    next: &mut life.next,
                    frame_id,
                    command_buffer: ordinal,
                    call_index: 0,
                    timestamps,
                    current: None,
                };
                recorded.replay(cmd_buf, &mut sampler)?;
            }

            if let Some(session) = session {
                if per_command_buffer {
                    sessions.end_samples(cmd_buf, &item.sample);
                }
                sessions.get_mut(session).end(cmd_buf)?;
            }
            cmd_buf.end()?;
        }

        if per_command_buffer {
            log_items.push(item);
            life.next.log_item_count += 1;
        }
        Ok(target)
    }

    /// Replays the nested command buffers `recorded` executes into targets of their own.
    fn prepare_nested(
        &mut self,
        recorded: &RecordedCommandBuffer<A>,
    ) -> Result<Vec<Vec<Handle<NestedTarget<A>>>>, DeviceError> {
        let mut prepared = Vec::new();
        for command in recorded.commands() {
            let list = match *command {
                Command::ExecuteNested(ref list) => list,
                _ => continue,
            };
            let mut handles = Vec::with_capacity(list.len());
            for nested in list {
                let handle = self.acquire_nested()?;
                let target = &mut self.nested.get_mut(handle).cmd_buf;
                unsafe {
                    target.begin()?;
                    nested.replay(target, &mut Passthrough)?;
                    target.end()?;
                }
                handles.push(handle);
            }
            prepared.push(handles);
        }
        Ok(prepared)
    }
}
