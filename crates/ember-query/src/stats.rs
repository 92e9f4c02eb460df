//! CPU-side driver statistics.
//!
//! These counters never touch the device: the rest of the driver bumps them
//! as it runs and a [`DriverStatistic`](crate::QueryKind::DriverStatistic)
//! query reports either the current value (gauges) or the delta between end
//! and begin (event counters).

use std::sync::atomic::{AtomicU64, Ordering};

/// One driver statistic. The first [`GAUGE_COUNT`](Self::GAUGE_COUNT)
/// variants are gauges (current totals, reported absolutely); the rest count
/// events and are reported as begin/end deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum DriverStat {
    TexObjCount = 0,
    TexObjBytes,
    BufObjCount,
    BufObjBytesVideo,
    BufObjBytesSystem,

    TexTransfersRead,
    TexTransfersWritten,
    TexCopyCount,
    BufTransfersRead,
    BufTransfersWritten,
    BufCopyBytes,
    QuerySyncCount,
    GpuSerializeCount,
    SubmitCount,
}

impl DriverStat {
    pub const COUNT: usize = 14;
    pub const GAUGE_COUNT: usize = 5;

    pub const ALL: [DriverStat; Self::COUNT] = [
        DriverStat::TexObjCount,
        DriverStat::TexObjBytes,
        DriverStat::BufObjCount,
        DriverStat::BufObjBytesVideo,
        DriverStat::BufObjBytesSystem,
        DriverStat::TexTransfersRead,
        DriverStat::TexTransfersWritten,
        DriverStat::TexCopyCount,
        DriverStat::BufTransfersRead,
        DriverStat::BufTransfersWritten,
        DriverStat::BufCopyBytes,
        DriverStat::QuerySyncCount,
        DriverStat::GpuSerializeCount,
        DriverStat::SubmitCount,
    ];

    pub fn from_index(index: usize) -> Option<DriverStat> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            DriverStat::TexObjCount => "drv-tex_obj_current_count",
            DriverStat::TexObjBytes => "drv-tex_obj_current_bytes",
            DriverStat::BufObjCount => "drv-buf_obj_current_count",
            DriverStat::BufObjBytesVideo => "drv-buf_obj_current_bytes_vid",
            DriverStat::BufObjBytesSystem => "drv-buf_obj_current_bytes_sys",
            DriverStat::TexTransfersRead => "drv-tex_transfers_rd",
            DriverStat::TexTransfersWritten => "drv-tex_transfers_wr",
            DriverStat::TexCopyCount => "drv-tex_copy_count",
            DriverStat::BufTransfersRead => "drv-buf_transfers_rd",
            DriverStat::BufTransfersWritten => "drv-buf_transfers_wr",
            DriverStat::BufCopyBytes => "drv-buf_copy_bytes",
            DriverStat::QuerySyncCount => "drv-query_sync_count",
            DriverStat::GpuSerializeCount => "drv-gpu_serialize_count",
            DriverStat::SubmitCount => "drv-submit_count",
        }
    }

    /// Gauges report a current total at end; counters report a delta.
    pub fn is_gauge(self) -> bool {
        (self as usize) < Self::GAUGE_COUNT
    }

    pub fn uses_byte_units(self) -> bool {
        self.name().contains("bytes")
    }
}

/// Shared counter storage, cheap to bump from the hot path.
#[derive(Debug, Default)]
pub struct DriverStats {
    values: [AtomicU64; DriverStat::COUNT],
}

impl DriverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stat: DriverStat) -> u64 {
        self.values[stat as usize].load(Ordering::Relaxed)
    }

    pub fn add(&self, stat: DriverStat, delta: u64) {
        self.values[stat as usize].fetch_add(delta, Ordering::Relaxed);
    }

    pub fn sub(&self, stat: DriverStat, delta: u64) {
        self.values[stat as usize].fetch_sub(delta, Ordering::Relaxed);
    }
}
