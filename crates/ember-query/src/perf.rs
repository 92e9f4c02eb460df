//! Multiprocessor performance counters: the counter-slot multiplexer and the
//! per-counter hardware configurations.
//!
//! The device exposes eight counter slots split into two signal domains of
//! four. Each performance query needs one slot per configured channel while
//! active; with more logical queries than slots, the multiplexer grants and
//! revokes slots on begin/end and reprograms surviving siblings, because the
//! domain multiplexer is shared state.
//!
//! Counter readback does not go through the report path: ending a query
//! launches a small fixed microcode program that stores every slot's raw
//! value plus a trailing sequence tag, one block per multiprocessor.

use tracing::warn;

use crate::cmd::{Access, CmdSink, Method};
use crate::metric::MetricOp;
use crate::query::Query;

/// Counter slots per signal domain.
pub const SLOTS_PER_DOMAIN: usize = 4;
/// Total counter slots on the device.
pub const SLOT_COUNT: usize = 8;

/// Words per multiprocessor in the readback record: eight slot counters, a
/// 64-bit clock, the sequence tag, and the processor id.
pub const BLOCK_WORDS: u32 = 12;
pub const BLOCK_BYTES: u32 = BLOCK_WORDS * 4;
/// Byte offset of the sequence tag within a block.
pub const TAG_OFFSET: u32 = 40;

/// Each of the five 5-bit source lanes advances by the slot index within the
/// domain, so identical channel configs land on distinct lanes.
const SRC_LANE_ROTATE: u32 = 0x0210_8421;

/// The readback microcode, an opaque immutable blob loaded once per device
/// context and referenced by address at launch time.
pub static READBACK_MICROCODE: [u64; 8] = [
    0x2042_0042_7042_0047,
    0x2800_4000_0000_1de4,
    0x2c00_0000_0c00_9c04,
    0x9400_0000_0001_07c5,
    0x2c00_0001_4000_9c04,
    0x9400_0000_8000_87a5,
    0x9400_0000_a001_07a5,
    0x8000_0000_0000_1de7,
];

/// One of the two independent halves of the slot array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    A,
    B,
}

impl Domain {
    pub fn index(self) -> usize {
        match self {
            Domain::A => 0,
            Domain::B => 1,
        }
    }

    fn slot_base(self) -> u8 {
        (self.index() * SLOTS_PER_DOMAIN) as u8
    }
}

/// Signal group feeding a counter slot. Groups are bound to a domain: the
/// warp-scheduler-adjacent groups multiplex through domain A, the memory
/// system through domain B.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalGroup {
    User,
    Launch,
    Issue,
    Exec,
    LdSt,
    Branch,
    Warp,
    L1,
    Mem,
}

impl SignalGroup {
    pub fn select(self) -> u32 {
        match self {
            SignalGroup::User => 0x00,
            SignalGroup::Launch => 0x01,
            SignalGroup::Issue => 0x02,
            SignalGroup::Exec => 0x03,
            SignalGroup::LdSt => 0x04,
            SignalGroup::Branch => 0x05,
            SignalGroup::Warp => 0x10,
            SignalGroup::L1 => 0x11,
            SignalGroup::Mem => 0x12,
        }
    }
}

/// How a slot combines its selected source signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CounterMode {
    /// Combine via a 16-input logic function.
    LogicOp = 0x1,
    /// Six-bit population count per cycle.
    B6 = 0x2,
}

/// One configured counter channel: bound to exactly one slot while active.
#[derive(Clone, Copy, Debug)]
pub struct ChannelCfg {
    pub domain: Domain,
    pub sig_group: SignalGroup,
    /// Signal mask or logic function, depending on `mode`.
    pub func: u16,
    pub mode: CounterMode,
    /// Source selection for up to five signals within the group.
    pub src_sel: u32,
}

impl ChannelCfg {
    const fn a(sig_group: SignalGroup, func: u16, src_sel: u32) -> Self {
        Self {
            domain: Domain::A,
            sig_group,
            func,
            mode: CounterMode::B6,
            src_sel,
        }
    }

    const fn b(sig_group: SignalGroup, func: u16, src_sel: u32) -> Self {
        Self {
            domain: Domain::B,
            sig_group,
            func,
            mode: CounterMode::B6,
            src_sel,
        }
    }

    const fn b_logic(sig_group: SignalGroup, func: u16, src_sel: u32) -> Self {
        Self {
            domain: Domain::B,
            sig_group,
            func,
            mode: CounterMode::LogicOp,
            src_sel,
        }
    }
}

/// The function/mode word programmed into a slot; zero disables counting.
pub fn function_word(func: u16, mode: CounterMode) -> u32 {
    (u32::from(func) << 4) | u32::from(mode as u8)
}

/// Static configuration of one performance counter or metric.
#[derive(Debug)]
pub struct PerfCounterCfg {
    pub channels: &'static [ChannelCfg],
    pub op: MetricOp,
    /// `(numerator, denominator)` normalization applied to the reduced value.
    pub norm: [u16; 2],
}

/// The performance counters and derived metrics this device exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum PerfCounter {
    ProfTrigger0 = 0,
    ProfTrigger1,
    WarpsLaunched,
    ThreadsLaunched,
    BlocksLaunched,
    InstIssued1,
    InstIssued2,
    InstExecuted,
    SharedLoads,
    SharedStores,
    LocalLoads,
    LocalStores,
    GlobalLoadRequests,
    GlobalStoreRequests,
    L1GlobalLoadHits,
    L1GlobalLoadMisses,
    GlobalStoreTransactions,
    Branches,
    DivergentBranches,
    ActiveWarps,
    ActiveCycles,
    MetricInstPerClock,
    MetricInstPerActiveCycle,
    MetricInstReplayOverhead,
    MetricOccupancy,
    MetricMpEfficiency,
}

impl PerfCounter {
    pub const COUNT: usize = 26;

    pub const ALL: [PerfCounter; Self::COUNT] = [
        PerfCounter::ProfTrigger0,
        PerfCounter::ProfTrigger1,
        PerfCounter::WarpsLaunched,
        PerfCounter::ThreadsLaunched,
        PerfCounter::BlocksLaunched,
        PerfCounter::InstIssued1,
        PerfCounter::InstIssued2,
        PerfCounter::InstExecuted,
        PerfCounter::SharedLoads,
        PerfCounter::SharedStores,
        PerfCounter::LocalLoads,
        PerfCounter::LocalStores,
        PerfCounter::GlobalLoadRequests,
        PerfCounter::GlobalStoreRequests,
        PerfCounter::L1GlobalLoadHits,
        PerfCounter::L1GlobalLoadMisses,
        PerfCounter::GlobalStoreTransactions,
        PerfCounter::Branches,
        PerfCounter::DivergentBranches,
        PerfCounter::ActiveWarps,
        PerfCounter::ActiveCycles,
        PerfCounter::MetricInstPerClock,
        PerfCounter::MetricInstPerActiveCycle,
        PerfCounter::MetricInstReplayOverhead,
        PerfCounter::MetricOccupancy,
        PerfCounter::MetricMpEfficiency,
    ];

    pub fn from_index(index: usize) -> Option<PerfCounter> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PerfCounter::ProfTrigger0 => "prof_trigger_00",
            PerfCounter::ProfTrigger1 => "prof_trigger_01",
            PerfCounter::WarpsLaunched => "warps_launched",
            PerfCounter::ThreadsLaunched => "threads_launched",
            PerfCounter::BlocksLaunched => "blocks_launched",
            PerfCounter::InstIssued1 => "inst_issued1",
            PerfCounter::InstIssued2 => "inst_issued2",
            PerfCounter::InstExecuted => "inst_executed",
            PerfCounter::SharedLoads => "shared_load",
            PerfCounter::SharedStores => "shared_store",
            PerfCounter::LocalLoads => "local_load",
            PerfCounter::LocalStores => "local_store",
            PerfCounter::GlobalLoadRequests => "gld_request",
            PerfCounter::GlobalStoreRequests => "gst_request",
            PerfCounter::L1GlobalLoadHits => "l1_global_load_hit",
            PerfCounter::L1GlobalLoadMisses => "l1_global_load_miss",
            PerfCounter::GlobalStoreTransactions => "global_store_transaction",
            PerfCounter::Branches => "branch",
            PerfCounter::DivergentBranches => "divergent_branch",
            PerfCounter::ActiveWarps => "active_warps",
            PerfCounter::ActiveCycles => "active_cycles",
            PerfCounter::MetricInstPerClock => "metric-ipc",
            PerfCounter::MetricInstPerActiveCycle => "metric-ipac",
            PerfCounter::MetricInstReplayOverhead => "metric-inst_replay_overhead",
            PerfCounter::MetricOccupancy => "metric-achieved_occupancy",
            PerfCounter::MetricMpEfficiency => "metric-sm_efficiency",
        }
    }

    /// Largest value the counter can report; percentage metrics are
    /// pre-scaled to 0..=100.
    pub fn max_value(self) -> u64 {
        match self {
            PerfCounter::MetricOccupancy | PerfCounter::MetricMpEfficiency => 100,
            _ => u64::MAX,
        }
    }

    pub fn config(self) -> &'static PerfCounterCfg {
        &CONFIGS[self as usize]
    }
}

static CONFIGS: [PerfCounterCfg; PerfCounter::COUNT] = [
    // prof_trigger_00
    cfg1(&[ChannelCfg::a(SignalGroup::User, 0x0001, 0x0000_0000)]),
    // prof_trigger_01
    cfg1(&[ChannelCfg::a(SignalGroup::User, 0x0001, 0x0000_0004)]),
    // warps_launched
    cfg1(&[ChannelCfg::a(SignalGroup::Launch, 0x0001, 0x0000_0004)]),
    // threads_launched
    cfg1(&[ChannelCfg::a(SignalGroup::Launch, 0x003f, 0x398a_4188)]),
    // blocks_launched
    cfg1(&[ChannelCfg::b(SignalGroup::Warp, 0x0001, 0x0000_001c)]),
    // inst_issued1
    cfg1(&[ChannelCfg::a(SignalGroup::Issue, 0x0001, 0x0000_0004)]),
    // inst_issued2
    cfg1(&[ChannelCfg::a(SignalGroup::Issue, 0x0001, 0x0000_0008)]),
    // inst_executed
    cfg1(&[ChannelCfg::a(SignalGroup::Exec, 0x0003, 0x0000_0398)]),
    // shared_load
    cfg1(&[ChannelCfg::a(SignalGroup::LdSt, 0x0001, 0x0000_0000)]),
    // shared_store
    cfg1(&[ChannelCfg::a(SignalGroup::LdSt, 0x0001, 0x0000_0004)]),
    // local_load
    cfg1(&[ChannelCfg::a(SignalGroup::LdSt, 0x0001, 0x0000_0008)]),
    // local_store
    cfg1(&[ChannelCfg::a(SignalGroup::LdSt, 0x0001, 0x0000_000c)]),
    // gld_request
    cfg1(&[ChannelCfg::a(SignalGroup::LdSt, 0x0001, 0x0000_0010)]),
    // gst_request
    cfg1(&[ChannelCfg::a(SignalGroup::LdSt, 0x0001, 0x0000_0014)]),
    // l1_global_load_hit
    cfg1(&[ChannelCfg::b(SignalGroup::L1, 0x0001, 0x0000_0010)]),
    // l1_global_load_miss
    cfg1(&[ChannelCfg::b(SignalGroup::L1, 0x0001, 0x0000_0014)]),
    // global_store_transaction
    cfg1(&[ChannelCfg::b(SignalGroup::Mem, 0x0001, 0x0000_0004)]),
    // branch
    cfg1(&[ChannelCfg::a(SignalGroup::Branch, 0x0001, 0x0000_000c)]),
    // divergent_branch
    cfg1(&[ChannelCfg::a(SignalGroup::Branch, 0x0001, 0x0000_0010)]),
    // active_warps (bit 0 alternates for odd warp counts, hence the /2 in
    // the occupancy normalization)
    cfg1(&[ChannelCfg::b(SignalGroup::Warp, 0x003f, 0x3148_3104)]),
    // active_cycles
    cfg1(&[ChannelCfg::b(SignalGroup::Warp, 0x0001, 0x0000_0000)]),
    // metric-ipc: instructions over raw clock, one scheduler counted, times
    // four schedulers per multiprocessor
    PerfCounterCfg {
        channels: &[
            ChannelCfg::a(SignalGroup::Exec, 0x0003, 0x0000_0398),
            ChannelCfg::b_logic(SignalGroup::Warp, 0xffff, 0x0000_0000),
        ],
        op: MetricOp::SumOverOneProcessor,
        norm: [4, 1],
    },
    // metric-ipac: instructions over active cycles
    PerfCounterCfg {
        channels: &[
            ChannelCfg::a(SignalGroup::Exec, 0x0003, 0x0000_0398),
            ChannelCfg::b(SignalGroup::Warp, 0x0001, 0x0000_0000),
        ],
        op: MetricOp::AverageOfRatios,
        norm: [4, 1],
    },
    // metric-inst_replay_overhead: (issued - executed) / issued, percent
    PerfCounterCfg {
        channels: &[
            ChannelCfg::a(SignalGroup::Issue, 0x0003, 0x0000_0104),
            ChannelCfg::a(SignalGroup::Exec, 0x0003, 0x0000_0398),
        ],
        op: MetricOp::RelativeSumSum,
        norm: [100, 1],
    },
    // metric-achieved_occupancy: active warps per active cycle over the
    // 64-warp capacity, percent
    PerfCounterCfg {
        channels: &[
            ChannelCfg::b(SignalGroup::Warp, 0x003f, 0x3148_3104),
            ChannelCfg::b(SignalGroup::Warp, 0x0001, 0x0000_0000),
        ],
        op: MetricOp::AverageOfRatios,
        norm: [200, 64],
    },
    // metric-sm_efficiency: active cycles over raw clock, percent
    PerfCounterCfg {
        channels: &[
            ChannelCfg::b(SignalGroup::Warp, 0x0001, 0x0000_0000),
            ChannelCfg::b_logic(SignalGroup::Warp, 0xffff, 0x0000_0000),
        ],
        op: MetricOp::RatioToProcessorZero,
        norm: [100, 1],
    },
];

const fn cfg1(channels: &'static [ChannelCfg]) -> PerfCounterCfg {
    PerfCounterCfg {
        channels,
        op: MetricOp::Sum,
        norm: [1, 1],
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SlotOwner {
    pub query_id: u32,
    pub func: u16,
    pub mode: CounterMode,
}

/// Per-device-context slot occupancy. All multiplexer state lives here;
/// nothing is process-global.
#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    owners: [Option<SlotOwner>; SLOT_COUNT],
    active: [u8; 2],
    global_enabled: bool,
}

impl SlotTable {
    pub fn active_in(&self, domain: Domain) -> u8 {
        self.active[domain.index()]
    }

    pub fn owner_of(&self, slot: u8) -> Option<u32> {
        self.owners[slot as usize].map(|o| o.query_id)
    }

    fn first_free(&self, domain: Domain) -> Option<u8> {
        let base = domain.slot_base();
        (base..base + SLOTS_PER_DOMAIN as u8).find(|&s| self.owners[s as usize].is_none())
    }
}

/// Grant slots and program the counters for a beginning performance query.
///
/// On over-subscription the query is left without slots: it measures nothing
/// and will report zero. The command stream is never aborted for a counter.
pub(crate) fn query_begin(
    slots: &mut SlotTable,
    sink: &mut dyn CmdSink,
    q: &mut Query,
    counter: PerfCounter,
    mp_count: u32,
) {
    let cfg = counter.config();

    let mut needed = [0u8; 2];
    for ch in cfg.channels {
        needed[ch.domain.index()] += 1;
    }
    if slots.active[0] + needed[0] > SLOTS_PER_DOMAIN as u8
        || slots.active[1] + needed[1] > SLOTS_PER_DOMAIN as u8
    {
        warn!(
            counter = counter.name(),
            "not enough free performance-counter slots; query will report zero"
        );
        return;
    }

    sink.reserve(SLOT_COUNT * 4 + 6);

    if !slots.global_enabled {
        slots.global_enabled = true;
        sink.emit_header(Method::PM_GLOBAL_ENABLE, 1);
        sink.emit_word(1);
    }

    // Clear the per-processor completion tags before the device can rewrite
    // them; result polling compares these against the query's sequence.
    if let Some(region) = q.region() {
        for p in 0..mp_count {
            region.write_u32(p * BLOCK_BYTES + TAG_OFFSET, 0);
        }
    }

    for (i, ch) in cfg.channels.iter().enumerate() {
        let d = ch.domain.index();
        if slots.active[d] == 0 {
            let mut live = 1u32 << d;
            if slots.active[1 - d] > 0 {
                live |= 1 << (1 - d);
            }
            sink.emit_header(Method::PM_MULTIPLEX_ENABLE, 1);
            sink.emit_word(live);
        }
        slots.active[d] += 1;

        let slot = slots
            .first_free(ch.domain)
            .expect("headroom was checked per domain");
        slots.owners[slot as usize] = Some(SlotOwner {
            query_id: q.id(),
            func: ch.func,
            mode: ch.mode,
        });
        q.slots[i] = Some(slot);

        sink.emit_header(Method::pm_signal_select(slot), 1);
        sink.emit_word(ch.sig_group.select());
        sink.emit_header(Method::pm_source_select(slot), 1);
        sink.emit_word(
            ch.src_sel
                .wrapping_add(SRC_LANE_ROTATE.wrapping_mul(u32::from(slot & 3))),
        );
        sink.emit_header(Method::pm_function(slot), 1);
        sink.emit_word(function_word(ch.func, ch.mode));
        sink.emit_header(Method::pm_set_zero(slot), 1);
        sink.emit_word(0);
    }
}

/// Stop counting for an ending query, launch the readback microcode, and
/// reprogram surviving siblings.
///
/// Every configured slot's function register is cleared first so no slot
/// double-counts across the readback boundary; clearing one function register
/// disturbs the domain multiplexer, so siblings still owned by other active
/// queries are reprogrammed afterwards.
pub(crate) fn query_end(
    slots: &mut SlotTable,
    sink: &mut dyn CmdSink,
    q: &mut Query,
    mp_count: u32,
) {
    sink.reserve(SLOT_COUNT * 2);
    for slot in 0..SLOT_COUNT as u8 {
        if slots.owners[slot as usize].is_some() {
            sink.emit_header(Method::pm_function(slot), 1);
            sink.emit_word(0);
        }
    }

    for slot in 0..SLOT_COUNT {
        if let Some(owner) = slots.owners[slot] {
            if owner.query_id == q.id() {
                slots.active[slot / SLOTS_PER_DOMAIN] -= 1;
                slots.owners[slot] = None;
            }
        }
    }

    // The slot indices stay recorded on the query: result readback uses them
    // to pick this query's words out of each per-processor block.
    if let Some(region) = q.region() {
        sink.reference_buffer(region.buffer(), Access::WRITE | Access::STAGING);
        sink.emit_header(Method::PM_LAUNCH_READBACK, 4);
        sink.emit_address(region.device_address());
        sink.emit_word(q.sequence());
        sink.emit_word(mp_count);
    }

    sink.reserve(SLOT_COUNT * 2);
    for slot in 0..SLOT_COUNT as u8 {
        if let Some(owner) = slots.owners[slot as usize] {
            sink.emit_header(Method::pm_function(slot), 1);
            sink.emit_word(function_word(owner.func, owner.mode));
        }
    }
}

/// Whether every per-processor block carries the query's sequence tag.
pub(crate) fn is_complete(q: &Query, mp_count: u32) -> bool {
    let Some(region) = q.region() else {
        return true;
    };
    (0..mp_count).all(|p| region.read_u32(p * BLOCK_BYTES + TAG_OFFSET) == q.sequence())
}

/// Gather this query's raw samples, one row per multiprocessor.
pub(crate) fn collect_samples(q: &Query, mp_count: u32) -> Vec<[u32; 4]> {
    let Some(region) = q.region() else {
        return Vec::new();
    };
    (0..mp_count)
        .map(|p| {
            let mut row = [0u32; 4];
            for (c, slot) in q.slots.iter().enumerate() {
                // A channel that never got a slot contributes zero: the
                // over-subscribed query measured nothing.
                if let Some(word) = slot {
                    row[c] = region.read_u32(p * BLOCK_BYTES + u32::from(*word) * 4);
                }
            }
            row
        })
        .collect()
}
