/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::{
    collections::VecDeque,
    fmt,
    fs,
    io::{self, Write as _},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{command::CallId, pool::Handle};

/// Queue entry points that are logged at draw and command buffer granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueCallId {
    Submit,
    WaitIdle,
    SignalSemaphore,
    WaitSemaphore,
    PresentDirect,
    PresentSwapChain,
    Delay,
    RemapVirtualMemoryPages,
    CopyVirtualMemoryPageMappings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogItemKind {
    QueueCall(QueueCallId),
    /// A sampled draw or dispatch, `index` counts the calls of its command buffer.
    DrawOrDispatch {
        call: CallId,
        command_buffer: u64,
        index: u32,
    },
    /// A sampled command buffer, numbered in replay order.
    CommandBuffer(u64),
    Frame,
}

/// Where the measurements of a log item live until its submission retires.
pub struct SampleSlot<A: hal::Api> {
    pub session: Option<Handle<A::SamplingSession>>,
    /// Counter or trace sample.
    pub sample: Option<hal::SampleId>,
    pub timing: Option<hal::SampleId>,
    /// Pipeline statistics query.
    pub query: Option<Handle<A::QuerySet>>,
}

impl<A: hal::Api> SampleSlot<A> {
    pub fn empty() -> Self {
        Self {
            session: None,
            sample: None,
            timing: None,
            query: None,
        }
    }
}

impl<A: hal::Api> Clone for SampleSlot<A> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            sample: self.sample,
            timing: self.timing,
            query: self.query,
        }
    }
}

impl<A: hal::Api> fmt::Debug for SampleSlot<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SampleSlot")
            .field("session", &self.session)
            .field("sample", &self.sample)
            .field("timing", &self.timing)
            .field("query", &self.query)
            .finish()
    }
}

/// A recorded event, written out once the GPU work it describes has retired.
pub struct LogItem<A: hal::Api> {
    pub frame_id: u64,
    pub kind: LogItemKind,
    pub sample: SampleSlot<A>,
}

impl<A: hal::Api> LogItem<A> {
    pub fn new(frame_id: u64, kind: LogItemKind) -> Self {
        Self {
            frame_id,
            kind,
            sample: SampleSlot::empty(),
        }
    }
}

impl<A: hal::Api> Clone for LogItem<A> {
    fn clone(&self) -> Self {
        Self {
            frame_id: self.frame_id,
            kind: self.kind,
            sample: self.sample.clone(),
        }
    }
}

impl<A: hal::Api> fmt::Debug for LogItem<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LogItem")
            .field("frame_id", &self.frame_id)
            .field("kind", &self.kind)
            .field("sample", &self.sample)
            .finish()
    }
}

/// Log items in submission order, waiting for their submission to retire.
pub(crate) struct LogQueue<A: hal::Api> {
    items: VecDeque<LogItem<A>>,
}

impl<A: hal::Api> LogQueue<A> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: LogItem<A>) {
        self.items.push_back(item);
    }

    /// Removes the `count` oldest items.
    pub fn take_front(&mut self, count: usize) -> std::collections::vec_deque::Drain<LogItem<A>> {
        debug_assert!(count <= self.items.len());
        let count = count.min(self.items.len());
        self.items.drain(..count)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// One line of the persisted log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub frame: u64,
    pub kind: LogItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_size: Option<u64>,
    /// Begin and end timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<(u64, u64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_stats: Option<hal::PipelineStatistics>,
}

impl LogRecord {
    pub fn new(frame: u64, kind: LogItemKind) -> Self {
        Self {
            frame,
            kind,
            counters: None,
            trace_size: None,
            timing: None,
            pipeline_stats: None,
        }
    }
}

/// Appends log records to a RON list.
pub struct LogWriter {
    sink: Box<dyn io::Write + Send>,
    written: usize,
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("written", &self.written)
            .finish()
    }
}

impl LogWriter {
    pub fn new(mut sink: Box<dyn io::Write + Send>) -> Result<Self, io::Error> {
        sink.write_all(b"[\n")?;
        Ok(Self { sink, written: 0 })
    }

    pub fn create(directory: &Path, name: &str) -> Result<Self, io::Error> {
        let path = directory.join(name);
        log::info!("Logging into '{:?}'", path);
        Self::new(Box::new(io::BufWriter::new(fs::File::create(path)?)))
    }

    pub fn add(&mut self, record: &LogRecord) {
        match ron::ser::to_string(record) {
            Ok(string) => {
                if let Err(e) = writeln!(self.sink, "{},", string) {
                    log::warn!("Log write failure: {:?}", e);
                    return;
                }
                self.written += 1;
            }
            Err(e) => {
                log::warn!("RON serialization failure: {:?}", e);
            }
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.sink.write_all(b"]\n");
        let _ = self.sink.flush();
    }
}

/// An in-memory log destination that can be inspected while in use.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    /// Parses the records written so far, the list may still be open.
    pub fn records(&self) -> Result<Vec<LogRecord>, ron::Error> {
        let mut text = self.contents();
        if !text.trim_end().ends_with(']') {
            text.push(']');
        }
        ron::de::from_str(&text)
    }
}

impl io::Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_produces_a_ron_list() {
        let sink = MemorySink::new();
        let mut writer = LogWriter::new(Box::new(sink.clone())).unwrap();
        writer.add(&LogRecord::new(0, LogItemKind::QueueCall(QueueCallId::Submit)));
        let mut record = LogRecord::new(
            1,
            LogItemKind::DrawOrDispatch {
                call: CallId::Draw,
                command_buffer: 3,
                index: 0,
            },
        );
        record.timing = Some((10, 20));
        writer.add(&record);
        assert_eq!(writer.written(), 2);

        let open = sink.records().unwrap();
        assert_eq!(open.len(), 2);
        drop(writer);
        let closed = sink.records().unwrap();
        assert_eq!(closed, open);
        assert_eq!(closed[1].timing, Some((10, 20)));
        assert_eq!(closed[1].counters, None);
    }

    #[test]
    fn queue_drains_oldest_first() {
        let mut queue = LogQueue::<hal::soft::Api>::new();
        for frame in 0..3 {
            queue.push(LogItem::new(frame, LogItemKind::Frame));
        }
        let frames = queue.take_front(2).map(|item| item.frame_id).collect::<Vec<_>>();
        assert_eq!(frames, vec![0, 1]);
        assert_eq!(queue.len(), 1);
    }
}
