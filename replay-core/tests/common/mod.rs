use std::sync::Arc;

use replay_core::{
    command::RecordedCommandBuffer,
    device::{Device, Queue, QueueSubmitError, SubmitInfo},
    hal::{self, soft},
    logging::{LogRecord, LogWriter, MemorySink},
    settings::{Granularity, ProfilerSettings},
};

pub struct TestParameters {
    pub settings: ProfilerSettings,
    pub perf: hal::PerfExperimentProperties,
}

impl Default for TestParameters {
    fn default() -> Self {
        Self {
            settings: ProfilerSettings::default(),
            perf: hal::PerfExperimentProperties {
                shader_engine_count: 2,
                supports_trace: true,
                blocks: vec![
                    hal::GpuBlockProperties {
                        instance_count: 1,
                        max_event_id: 16,
                    },
                    hal::GpuBlockProperties {
                        instance_count: 3,
                        max_event_id: 16,
                    },
                ],
            },
        }
    }
}

impl TestParameters {
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.settings.granularity = granularity;
        self
    }

    /// Keeps every frame out of the logging window.
    pub fn no_sampling(mut self) -> Self {
        self.settings.start_frame = u64::MAX;
        self
    }

    pub fn settings(mut self, update: impl FnOnce(&mut ProfilerSettings)) -> Self {
        update(&mut self.settings);
        self
    }
}

pub struct TestingContext {
    pub device: Arc<Device<soft::Api>>,
    pub gpu: soft::Gpu,
    pub queue: Queue<soft::Api>,
    pub log: MemorySink,
}

impl TestingContext {
    pub fn submit(
        &mut self,
        command_buffers: &[&RecordedCommandBuffer<soft::Api>],
    ) -> Result<(), QueueSubmitError> {
        self.queue.submit(&SubmitInfo {
            command_buffers,
            command_buffer_infos: None,
            memory_refs: &[],
            fence: None,
        })
    }

    /// Lets the GPU finish everything and reclaims what it used.
    pub fn retire_all(&mut self) {
        self.gpu.retire_all();
        self.queue.process_idle_submits();
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.log.records().unwrap()
    }

    pub fn present(&mut self) -> Result<(), hal::DeviceError> {
        let swap_chain = soft::Resource(100);
        self.queue.present_swap_chain(&hal::PresentSwapChainInfo {
            swap_chain: &swap_chain,
            image_index: 0,
        })
    }
}

pub fn initialize_test(parameters: TestParameters, test_function: impl FnOnce(TestingContext)) {
    let _ = env_logger::builder().is_test(true).try_init();

    let raw = soft::Device::new(parameters.perf);
    let gpu = raw.gpu();
    let device = Device::new(raw, parameters.settings).unwrap();
    let mut queue = device.create_queue(hal::QueueType::Universal).unwrap();
    let log = MemorySink::new();
    queue.set_log_writer(Some(LogWriter::new(Box::new(log.clone())).unwrap()));

    test_function(TestingContext {
        device,
        gpu,
        queue,
        log,
    });
}

pub fn draws(count: u32) -> RecordedCommandBuffer<soft::Api> {
    let mut cmd_buf = RecordedCommandBuffer::new(Some("draws"));
    cmd_buf.bind_pipeline(
        hal::PipelineBindPoint::Graphics,
        Arc::new(soft::Resource(1)),
    );
    for i in 0..count {
        cmd_buf.draw(0, 3 * (i + 1), 0, 1);
    }
    cmd_buf
}

pub fn presenting(count: u32) -> RecordedCommandBuffer<soft::Api> {
    let mut cmd_buf = draws(count);
    cmd_buf.present(Arc::new(soft::Resource(100)), 0);
    cmd_buf
}
