use hal::{Device as _, DeviceError, SampleType, SamplingSession as _};

use crate::{
    logging::{LogItem, SampleSlot},
    pool::{Handle, PoolState, ResourcePool},
    settings::ProfilerSettings,
};

/// Builds the sample configuration every session of a queue shares.
///
/// Global counters take precedence over thread traces. Timing samples are
/// requested separately and never show up in the configured type.
pub fn build_config(
    perf: &hal::PerfExperimentProperties,
    settings: &ProfilerSettings,
) -> Result<hal::SampleConfig, DeviceError> {
    let counters = &settings.global_perf_counters;
    let ty = if !counters.is_empty() {
        SampleType::Cumulative
    } else if settings.trace.enabled {
        SampleType::Trace
    } else {
        SampleType::None
    };

    let mut config = hal::SampleConfig {
        ty,
        flags: hal::SampleFlags {
            sample_internal_operations: true,
            cache_flush_on_counter_collection: settings.cache_flush_on_counter_collection,
            use_shader_mask: true,
        },
        shader_mask: hal::ShaderMask::all(),
        ..Default::default()
    };

    match ty {
        SampleType::Cumulative => {
            let total = counters
                .iter()
                .map(|counter| instance_count(perf, counter.block))
                .sum::<u32>() as usize;
            config
                .counters
                .try_reserve_exact(total)
                .map_err(|_| DeviceError::OutOfMemory)?;
            for counter in counters {
                let instances = instance_count(perf, counter.block);
                if instances == 0 {
                    log::warn!(
                        "Counter {:?} names block {} which has no instances",
                        counter.name,
                        counter.block
                    );
                }
                config
                    .counters
                    .extend((0..instances).map(|instance| hal::PerfCounterId {
                        block: counter.block,
                        event_id: counter.event_id,
                        instance,
                    }));
            }
        }
        SampleType::Trace => {
            config.trace = hal::TraceConfig {
                enable: true,
                gpu_memory_limit: settings.trace.buffer_size
                    * hal::MemoryAddress::from(perf.shader_engine_count),
                suppress_instruction_tokens: settings.trace.token_mask != 0xFFFF,
            };
        }
        _ => {}
    }

    log::debug!(
        "Sampling {:?} with {} counter instances",
        config.ty,
        config.counters.len()
    );
    Ok(config)
}

fn instance_count(perf: &hal::PerfExperimentProperties, block: u32) -> u32 {
    perf.blocks
        .get(block as usize)
        .map_or(0, |props| props.instance_count)
}

/// Returns `true` if `item` carries a sample of type `ty`.
pub fn has_valid_sample<A: hal::Api>(item: &LogItem<A>, ty: SampleType) -> bool {
    let slot = &item.sample;
    match ty {
        SampleType::Cumulative | SampleType::Trace => {
            slot.session.is_some() && slot.sample.is_some()
        }
        SampleType::Timing => slot.session.is_some() && slot.timing.is_some(),
        SampleType::Query => slot.query.is_some(),
        SampleType::None => false,
    }
}

/// Owns the sampling configuration of a queue and its pooled sessions.
pub struct SessionManager<A: hal::Api> {
    config: hal::SampleConfig,
    /// Block instances behind each configured global counter.
    counter_groups: Vec<usize>,
    per_instance: bool,
    pool: ResourcePool<A::SamplingSession>,
}

impl<A: hal::Api> SessionManager<A> {
    pub fn new(
        perf: &hal::PerfExperimentProperties,
        settings: &ProfilerSettings,
    ) -> Result<Self, DeviceError> {
        Ok(Self {
            config: build_config(perf, settings)?,
            counter_groups: settings
                .global_perf_counters
                .iter()
                .map(|counter| instance_count(perf, counter.block) as usize)
                .collect(),
            per_instance: settings.global_perf_counter_per_instance,
            pool: ResourcePool::new("sampling session"),
        })
    }

    pub fn config(&self) -> &hal::SampleConfig {
        &self.config
    }

    /// Returns `true` if sessions collect counters or traces.
    pub fn has_perf_experiment(&self) -> bool {
        self.config.ty != SampleType::None
    }

    /// Number of counter values a log record reports.
    pub fn reported_counter_count(&self) -> usize {
        if self.per_instance {
            self.config.counters.len()
        } else {
            self.counter_groups.len()
        }
    }

    pub fn acquire(
        &mut self,
        device: &A::Device,
    ) -> Result<Handle<A::SamplingSession>, DeviceError> {
        self.pool.acquire(|| unsafe {
            device.create_sampling_session(&hal::SamplingSessionDescriptor {
                label: Some("profiling session"),
            })
        })
    }

    /// Resets retired sessions and makes them available again.
    pub fn reclaim(&mut self, handles: &[Handle<A::SamplingSession>]) {
        self.pool.reclaim(handles, |session| {
            if let Err(e) = unsafe { session.reset() } {
                log::warn!("Failed to reset sampling session: {}", e);
            }
        });
    }

    pub fn get_mut(&mut self, handle: Handle<A::SamplingSession>) -> &mut A::SamplingSession {
        self.pool.get_mut(handle)
    }

    pub fn state(&self, handle: Handle<A::SamplingSession>) -> PoolState {
        self.pool.state(handle)
    }

    pub fn available_count(&self) -> usize {
        self.pool.available_count()
    }

    pub fn busy_count(&self) -> usize {
        self.pool.busy_count()
    }

    /// Opens the configured sample, and a timing sample if `timing` is set,
    /// recording their ids into `slot`.
    pub unsafe fn begin_samples(
        &mut self,
        handle: Handle<A::SamplingSession>,
        cmd_buf: &mut A::CommandBuffer,
        slot: &mut SampleSlot<A>,
        timing: bool,
    ) -> Result<(), DeviceError> {
        let session = self.pool.get_mut(handle);
        slot.session = Some(handle);
        if self.config.ty != SampleType::None {
            slot.sample = Some(session.begin_sample(cmd_buf, self.config.ty, &self.config)?);
        }
        if timing {
            slot.timing = Some(session.begin_sample(cmd_buf, SampleType::Timing, &self.config)?);
        }
        Ok(())
    }

    pub unsafe fn end_samples(&mut self, cmd_buf: &mut A::CommandBuffer, slot: &SampleSlot<A>) {
        let session = match slot.session {
            Some(handle) => self.pool.get_mut(handle),
            None => return,
        };
        if let Some(timing) = slot.timing {
            session.end_sample(cmd_buf, timing);
        }
        if let Some(sample) = slot.sample {
            session.end_sample(cmd_buf, sample);
        }
    }

    /// Counter values of `item`, summed over block instances unless
    /// per-instance reporting is enabled.
    pub fn counter_values(&self, item: &LogItem<A>) -> Option<Vec<u64>> {
        if self.config.ty != SampleType::Cumulative
            || !has_valid_sample(item, SampleType::Cumulative)
        {
            return None;
        }
        let values = match self.results(item.sample.session?, item.sample.sample?)? {
            hal::SampleResults::Counters(values) => values,
            _ => return None,
        };
        if self.per_instance {
            return Some(values);
        }
        let mut offset = 0;
        let sums = self
            .counter_groups
            .iter()
            .map(|&instances| {
                let end = (offset + instances).min(values.len());
                let sum = values[offset.min(end)..end].iter().sum();
                offset = end;
                sum
            })
            .collect();
        Some(sums)
    }

    pub fn trace_size(&self, item: &LogItem<A>) -> Option<hal::MemoryAddress> {
        if self.config.ty != SampleType::Trace || !has_valid_sample(item, SampleType::Trace) {
            return None;
        }
        match self.results(item.sample.session?, item.sample.sample?)? {
            hal::SampleResults::Trace { size } => Some(size),
            _ => None,
        }
    }

    pub fn timing(&self, item: &LogItem<A>) -> Option<(u64, u64)> {
        if !has_valid_sample(item, SampleType::Timing) {
            return None;
        }
        match self.results(item.sample.session?, item.sample.timing?)? {
            hal::SampleResults::Timing { begin, end } => Some((begin, end)),
            _ => None,
        }
    }

    fn results(
        &self,
        handle: Handle<A::SamplingSession>,
        sample: hal::SampleId,
    ) -> Option<hal::SampleResults> {
        let session = self.pool.get(handle);
        unsafe {
            if !session.is_ready() {
                log::warn!("Session {:?} is not ready after retiring", handle);
                return None;
            }
            session.sample_results(sample)
        }
    }

    pub fn dispose(&mut self, device: &A::Device) {
        self.pool
            .dispose(|session| unsafe { device.destroy_sampling_session(session) });
    }
}
