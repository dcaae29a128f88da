use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scope that sampling brackets are placed around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// Every draw and dispatch.
    Draw,
    /// Every replayed command buffer.
    CmdBuf,
    /// Everything between two presents.
    Frame,
}

/// A counter to collect from every instance of a hardware block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCounter {
    pub name: String,
    pub block: u32,
    pub event_id: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub enabled: bool,
    /// Trace memory per shader engine, in bytes.
    pub buffer_size: u64,
    /// Only `0xFFFF` keeps instruction tokens.
    pub token_mask: u16,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_size: 1024 * 1024,
            token_mask: 0xFFFF,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerSettings {
    pub granularity: Granularity,
    pub start_frame: u64,
    /// `None` logs every frame from `start_frame` on.
    pub frame_count: Option<u64>,
    /// Forward every command buffer in its own native submission.
    pub break_submit_batches: bool,
    pub cache_flush_on_counter_collection: bool,
    pub global_perf_counters: Vec<GlobalCounter>,
    /// Report one value per block instance instead of a sum per counter.
    pub global_perf_counter_per_instance: bool,
    pub trace: TraceSettings,
    /// Bracket sampled draws and dispatches with pipeline statistics queries.
    pub pipeline_stats: bool,
    /// Directory the per-queue logs are written into.
    pub log_directory: Option<PathBuf>,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            granularity: Granularity::Draw,
            start_frame: 0,
            frame_count: None,
            break_submit_batches: false,
            cache_flush_on_counter_collection: false,
            global_perf_counters: Vec::new(),
            global_perf_counter_per_instance: false,
            trace: TraceSettings::default(),
            pipeline_stats: false,
            log_directory: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read the settings file")]
    Io(#[from] io::Error),
    #[error("failed to parse the settings: {0}")]
    Parse(#[from] ron::Error),
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

impl ProfilerSettings {
    pub fn from_ron(text: &str) -> Result<Self, SettingsError> {
        Ok(ron::de::from_str(text)?)
    }

    /// Builds the settings from the `REPLAY_PROFILER_*` environment variables.
    ///
    /// `REPLAY_PROFILER_CONFIG` names a RON file that is loaded first,
    /// the other variables override its values.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match lookup("REPLAY_PROFILER_CONFIG") {
            Some(path) => {
                log::info!("Loading profiler settings from '{}'", path);
                Self::from_ron(&fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };

        if let Some(value) = lookup("REPLAY_PROFILER_GRANULARITY") {
            settings.granularity = match value.to_lowercase().as_str() {
                "draw" => Granularity::Draw,
                "cmdbuf" => Granularity::CmdBuf,
                "frame" => Granularity::Frame,
                _ => return Err(invalid("REPLAY_PROFILER_GRANULARITY", value)),
            };
        }
        if let Some(value) = lookup("REPLAY_PROFILER_START_FRAME") {
            settings.start_frame = parse_int("REPLAY_PROFILER_START_FRAME", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_FRAME_COUNT") {
            settings.frame_count = Some(parse_int("REPLAY_PROFILER_FRAME_COUNT", value)?);
        }
        if let Some(value) = lookup("REPLAY_PROFILER_BREAK_SUBMIT_BATCHES") {
            settings.break_submit_batches = parse_bool("REPLAY_PROFILER_BREAK_SUBMIT_BATCHES", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_CACHE_FLUSH") {
            settings.cache_flush_on_counter_collection =
                parse_bool("REPLAY_PROFILER_CACHE_FLUSH", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_PER_INSTANCE") {
            settings.global_perf_counter_per_instance =
                parse_bool("REPLAY_PROFILER_PER_INSTANCE", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_TRACE") {
            settings.trace.enabled = parse_bool("REPLAY_PROFILER_TRACE", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_TRACE_BUFFER_SIZE") {
            settings.trace.buffer_size = parse_int("REPLAY_PROFILER_TRACE_BUFFER_SIZE", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_TRACE_TOKEN_MASK") {
            let digits = value.trim_start_matches("0x");
            settings.trace.token_mask = u16::from_str_radix(digits, 16)
                .map_err(|_| invalid("REPLAY_PROFILER_TRACE_TOKEN_MASK", value.clone()))?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_PIPELINE_STATS") {
            settings.pipeline_stats = parse_bool("REPLAY_PROFILER_PIPELINE_STATS", value)?;
        }
        if let Some(value) = lookup("REPLAY_PROFILER_LOG_DIR") {
            settings.log_directory = Some(PathBuf::from(value));
        }

        Ok(settings)
    }

    /// Returns `true` if `granularity` is being logged during frame `frame_id`.
    pub fn logging_enabled(&self, granularity: Granularity, frame_id: u64) -> bool {
        self.granularity == granularity
            && frame_id >= self.start_frame
            && self
                .frame_count
                .map_or(true, |count| frame_id - self.start_frame < count)
    }
}

fn invalid(name: &'static str, value: String) -> SettingsError {
    SettingsError::InvalidValue { name, value }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, SettingsError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_int(name: &'static str, value: String) -> Result<u64, SettingsError> {
    value.parse().map_err(|_| invalid(name, value))
}
