//! Simulation data sources and the time-shifting crowd reader.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{AgentRecord, Crowd};
use crate::format::FormatError;
use crate::selector::{AgentSelector, SelectorError};

#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing cache or file is missing. Readers degrade this to an
    /// empty result.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

// ============================================================================
// Frames
// ============================================================================

/// Maps an evaluation time to a cached frame: `floor(time + offset)` clamped
/// to `range`.
pub fn frame_for_time(time: f64, offset: f64, range: (i64, i64)) -> i64 {
    let frame = (time + offset).floor();
    if frame.is_nan() {
        return range.0;
    }
    (frame as i64).clamp(range.0, range.1)
}

/// Yields the agent records of one cached frame.
pub trait SimulationSource: Send + Sync {
    /// First and last cached frame, or `None` for an empty cache.
    fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError>;

    fn records_at(&self, frame: i64) -> Result<Vec<AgentRecord>, SourceError>;
}

/// An in-memory simulation cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameCache {
    pub frames: BTreeMap<i64, Vec<AgentRecord>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_frame(&mut self, frame: i64, records: Vec<AgentRecord>) {
        self.frames.insert(frame, records);
    }
}

impl SimulationSource for FrameCache {
    fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError> {
        let first = self.frames.keys().next().copied();
        let last = self.frames.keys().next_back().copied();
        Ok(first.zip(last))
    }

    fn records_at(&self, frame: i64) -> Result<Vec<AgentRecord>, SourceError> {
        Ok(self.frames.get(&frame).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Options shared by the crowd and cloth readers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderOptions {
    /// Added to the evaluation time before the frame lookup.
    pub time_offset: f64,
    /// Agent id selection expression; `None` keeps every agent.
    pub agent_ids: Option<String>,
    pub invert: bool,
}

impl ReaderOptions {
    pub fn with_time_offset(mut self, time_offset: f64) -> Self {
        self.time_offset = time_offset;
        self
    }

    pub fn with_agent_ids(mut self, expression: impl Into<String>) -> Self {
        self.agent_ids = Some(expression.into());
        self
    }
}

/// Reads one crowd frame from a [`SimulationSource`].
pub struct CrowdReader {
    source: Arc<dyn SimulationSource>,
    options: ReaderOptions,
}

impl CrowdReader {
    pub fn new(source: Arc<dyn SimulationSource>, options: ReaderOptions) -> Self {
        Self { source, options }
    }

    /// The crowd at `time`. A missing source yields an empty crowd and a
    /// warning; a malformed selector is an error.
    pub fn read(&self, time: f64) -> Result<Crowd, SelectorError> {
        let selector = match &self.options.agent_ids {
            Some(expression) => AgentSelector::parse(expression)?,
            None => AgentSelector::all(),
        };

        let records = match self.load(time) {
            Ok(records) => records,
            Err(SourceError::Unavailable(reason)) => {
                log::warn!("Crowd source unavailable ({}); reading an empty crowd", reason);
                return Ok(Crowd::empty());
            }
            Err(err) => {
                log::warn!("Failed to read crowd source: {}; reading an empty crowd", err);
                return Ok(Crowd::empty());
            }
        };

        let present: Vec<i64> = records.iter().map(|r| r.agent_id).collect();
        let selected = selector.select(&present, self.options.invert);
        Ok(Crowd::from_records(
            records.into_iter().filter(|r| selected.contains(&r.agent_id)),
        ))
    }

    fn load(&self, time: f64) -> Result<Vec<AgentRecord>, SourceError> {
        let Some(range) = self.source.frame_range()? else {
            return Ok(Vec::new());
        };
        let frame = frame_for_time(time, self.options.time_offset, range);
        log::debug!("Reading crowd frame {} for time {}", frame, time);
        self.source.records_at(frame)
    }
}
