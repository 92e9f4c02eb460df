//! Per-device context for the query engine.
//!
//! Everything that used to be tempting to make global lives here: the
//! result-staging pool, counter-slot occupancy, driver statistics, the
//! occlusion nesting depth and the last programmed render condition. One
//! context per device channel; operations take the command sink and memory
//! collaborators as explicit arguments.

use crate::alloc::ResultPool;
use crate::cmd::CondMode;
use crate::perf::{self, PerfCounter, SlotTable};
use crate::query::QueryKind;
use crate::stats::{DriverStat, DriverStats};

/// Device capabilities and engine tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCaps {
    /// Multiprocessor count; sizes performance-counter readback records.
    pub mp_count: u32,
    /// Whether the device class exposes the performance-counter block.
    pub has_perf_counters: bool,
    /// Platform tick rate reported by disjoint-timestamp queries.
    pub timestamp_ticks_per_second: u64,
    /// Chunk size the result-staging pool grows by.
    pub staging_chunk_bytes: u32,
    /// Growth cap for the pool.
    pub max_staging_chunks: usize,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            mp_count: 8,
            has_perf_counters: true,
            timestamp_ticks_per_second: 1_000_000_000,
            staging_chunk_bytes: 4096,
            max_staging_chunks: 64,
        }
    }
}

/// Last render condition programmed through this context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderCondition {
    /// Id of the predicate query, `None` when disabled.
    pub query_id: Option<u32>,
    /// GPU-side comparison mode, `None` before the first programming.
    pub mode: Option<CondMode>,
}

/// Capability-discovery record for one enumerable counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterInfo {
    pub name: &'static str,
    /// Kind to pass to `create_query` for this counter.
    pub kind: QueryKind,
    pub max_value: u64,
    pub uses_byte_units: bool,
}

/// Query-engine state for one device context.
pub struct DeviceContext {
    pub(crate) caps: DeviceCaps,
    pub(crate) pool: ResultPool,
    pub(crate) slots: SlotTable,
    pub(crate) occlusion_active: u32,
    pub(crate) cond: RenderCondition,
    pub(crate) next_query_id: u32,
    stats: DriverStats,
}

impl DeviceContext {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            pool: ResultPool::new(caps.staging_chunk_bytes, caps.max_staging_chunks),
            slots: SlotTable::default(),
            occlusion_active: 0,
            cond: RenderCondition::default(),
            next_query_id: 1,
            stats: DriverStats::new(),
        }
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// CPU-side driver statistics; the rest of the driver bumps these.
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// The render condition currently programmed (engine's view).
    pub fn render_condition(&self) -> RenderCondition {
        self.cond
    }

    /// The readback microcode this context's perf queries launch. Device
    /// models upload it once and reference it by address.
    pub fn readback_microcode(&self) -> &'static [u64] {
        &perf::READBACK_MICROCODE
    }

    /// Bytes currently free in the result-staging pool.
    pub fn pool_free_bytes(&self) -> u32 {
        self.pool.free_bytes()
    }

    /// Number of enumerable counters (driver statistics plus, when the
    /// device supports them, performance counters).
    pub fn counter_count(&self) -> usize {
        let mut count = DriverStat::COUNT;
        if self.caps.has_perf_counters {
            count += PerfCounter::COUNT;
        }
        count
    }

    /// Describe one enumerable counter. Out-of-range indices are not an
    /// error; the caller gets `None`.
    pub fn counter_info(&self, index: usize) -> Option<CounterInfo> {
        if let Some(stat) = DriverStat::from_index(index) {
            return Some(CounterInfo {
                name: stat.name(),
                kind: QueryKind::DriverStatistic(stat),
                max_value: u64::MAX,
                uses_byte_units: stat.uses_byte_units(),
            });
        }
        if !self.caps.has_perf_counters {
            return None;
        }
        let counter = PerfCounter::from_index(index - DriverStat::COUNT)?;
        Some(CounterInfo {
            name: counter.name(),
            kind: QueryKind::Performance(counter),
            max_value: counter.max_value(),
            uses_byte_units: false,
        })
    }

    /// All enumerable counters, in index order.
    pub fn enumerate_counters(&self) -> Vec<CounterInfo> {
        (0..self.counter_count())
            .map(|i| self.counter_info(i).expect("index within counter_count"))
            .collect()
    }
}
