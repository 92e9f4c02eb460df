//! Query objects and their lifecycle.
//!
//! A query asks the device to measure something between `begin` and `end`
//! without stalling the CPU. Completion is detected by comparing a
//! GPU-written sequence token against the query's expected sequence (or a
//! fence, for 64-bit results whose sentinel cannot be trusted across
//! pipeline reordering). Occlusion queries rotate through fresh sub-windows
//! of their storage each cycle so a stale completion write can never race a
//! re-initialized window.

use tracing::{debug, warn};

use crate::alloc::{ReleaseWhen, ResultRegion};
use crate::backend::{DeviceError, DeviceMemory, FenceRef};
use crate::cmd::{event, Access, CmdSink, Method, COUNTER_SAMPLES_PASSED, SEMAPHORE_ACQUIRE_EQUAL};
use crate::context::DeviceContext;
use crate::error::QueryError;
use crate::metric;
use crate::perf::{self, PerfCounter};
use crate::stats::DriverStat;

/// Storage sizing for occlusion queries: a 256-byte region rotated through
/// 32-byte windows.
const OCCLUSION_REGION_BYTES: u32 = 256;
const OCCLUSION_WINDOW_BYTES: u32 = 32;

/// Vertex streams / stream-output buffer slots addressable by reports.
const MAX_STREAMS: u8 = 4;

/// What a query measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    /// Samples that passed the depth/stencil test.
    OcclusionCounter,
    /// Whether any sample passed.
    OcclusionPredicate,
    /// Primitives the pipeline generated on a vertex stream.
    PrimitivesGenerated { stream: u8 },
    /// Primitives actually written to stream output.
    PrimitivesEmitted { stream: u8 },
    /// Written and generated counts for one stream, together.
    TransformFeedbackStats { stream: u8 },
    /// Whether stream output dropped primitives for lack of space.
    TransformFeedbackOverflowPredicate { stream: u8 },
    /// GPU time between begin and end.
    TimeElapsed,
    /// Raw GPU clock at end; end-only.
    Timestamp,
    /// Clock calibration: tick rate plus a discontinuity flag.
    TimestampDisjoint,
    /// Signals once all previously submitted work has finished; end-only.
    GpuFinished,
    /// Ten per-stage counters over the begin/end range.
    PipelineStatistics,
    /// Current byte offset of a stream-output buffer; end-only, the buffer
    /// slot is supplied via [`DeviceContext::save_stream_output_offset`].
    TransformFeedbackBufferOffset,
    /// A CPU-side driver counter; never touches the device.
    DriverStatistic(DriverStat),
    /// A multiprocessor performance counter or derived metric.
    Performance(PerfCounter),
}

impl QueryKind {
    fn stream(self) -> Option<u8> {
        match self {
            QueryKind::PrimitivesGenerated { stream }
            | QueryKind::PrimitivesEmitted { stream }
            | QueryKind::TransformFeedbackStats { stream }
            | QueryKind::TransformFeedbackOverflowPredicate { stream } => Some(stream),
            _ => None,
        }
    }

    /// Kinds that measure an instant rather than a range reject `begin`.
    fn supports_begin(self) -> bool {
        !matches!(
            self,
            QueryKind::Timestamp | QueryKind::GpuFinished | QueryKind::TransformFeedbackBufferOffset
        )
    }
}

/// Lifecycle state; see the module docs for the transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    /// Freshly created, or result consumed: safe to begin again.
    Ready,
    /// Between begin and end.
    Active,
    /// Ended; the device owes a completion write.
    Ended,
    /// Ended and a non-blocking poll already kicked a submit.
    Flushed,
}

/// A decoded query result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryResult {
    /// The device has not produced the result yet (non-blocking poll only).
    NotReady,
    Unsigned(u64),
    Boolean(bool),
    StreamOutStats { written: u64, generated: u64 },
    TimestampDisjoint { ticks_per_second: u64, disjoint: bool },
    /// Per-stage deltas, in the order of
    /// [`event::PIPELINE_STAGES`](crate::cmd::event::PIPELINE_STAGES).
    PipelineStatistics([u64; 10]),
}

/// Result storage: either a pooled staging region the device writes, or a
/// plain CPU-side value for driver statistics.
#[derive(Debug)]
pub(crate) enum QueryStorage {
    None,
    Region(ResultRegion),
    Value(u64),
}

/// A logical query object. Created and destroyed through a
/// [`DeviceContext`]; the caller owns the object in between.
pub struct Query {
    id: u32,
    kind: QueryKind,
    state: QueryState,
    sequence: u32,
    /// Bytes per rotation window; zero for non-rotating kinds.
    rotate: u32,
    /// Current window offset within the region. `None` until the first
    /// rotation primes it (rotation advances before use).
    window: Option<u32>,
    is_64bit: bool,
    /// Occlusion nesting depth captured at begin.
    nesting: u32,
    /// Stream-output buffer slot, set late for buffer-offset queries.
    tfb_buffer: u8,
    storage: QueryStorage,
    /// Hardware counter slots owned by an active performance query; kept
    /// after end so readback can locate this query's words per block.
    pub(crate) slots: [Option<u8>; 4],
    /// Completion fence for 64-bit results.
    fence: Option<FenceRef>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("rotate", &self.rotate)
            .field("window", &self.window)
            .field("is_64bit", &self.is_64bit)
            .field("nesting", &self.nesting)
            .field("tfb_buffer", &self.tfb_buffer)
            .field("storage", &self.storage)
            .field("slots", &self.slots)
            .field("fence", &self.fence.is_some())
            .finish()
    }
}

impl Query {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub(crate) fn nesting(&self) -> u32 {
        self.nesting
    }

    /// The query's current result region, when it has pooled storage.
    pub fn region(&self) -> Option<&ResultRegion> {
        match &self.storage {
            QueryStorage::Region(r) => Some(r),
            _ => None,
        }
    }

    /// Byte offset of the current rotation window within the region (zero
    /// for non-rotating kinds).
    pub fn window_base(&self) -> u32 {
        self.window.unwrap_or(0)
    }

    fn rec_u32(&self, offset: u32) -> u32 {
        self.region()
            .map_or(0, |r| r.read_u32(self.window_base() + offset))
    }

    fn rec_u64(&self, offset: u32) -> u64 {
        self.region()
            .map_or(0, |r| r.read_u64(self.window_base() + offset))
    }

    fn stored_value(&self) -> u64 {
        match self.storage {
            QueryStorage::Value(v) => v,
            _ => 0,
        }
    }
}

/// Emit a result report: the device writes the record for `ev` at the given
/// offset inside the query's current window, tagged with the sequence.
fn emit_report(sink: &mut dyn CmdSink, q: &Query, offset: u32, ev: u32) {
    let Some(region) = q.region() else {
        return;
    };
    sink.reserve(5);
    sink.reference_buffer(region.buffer(), Access::WRITE | Access::STAGING);
    sink.emit_header(Method::REPORT, 4);
    sink.emit_address(region.device_address() + u64::from(q.window_base() + offset));
    sink.emit_word(q.sequence);
    sink.emit_word(ev);
}

/// Emit a GPU-side stall until the query's sequence lands in memory.
///
/// Overflow predicates compare a report that carries no sequence of its own;
/// their end path writes an extra timestamp report at +0x20 for exactly this
/// wait.
pub(crate) fn emit_sequence_wait(sink: &mut dyn CmdSink, q: &Query) {
    let Some(region) = q.region() else {
        return;
    };
    let offset = match q.kind {
        QueryKind::TransformFeedbackOverflowPredicate { .. } => 0x20,
        _ => 0,
    };
    sink.reserve(5);
    sink.reference_buffer(region.buffer(), Access::READ | Access::STAGING);
    sink.emit_header(Method::SEMAPHORE, 4);
    sink.emit_address(region.device_address() + u64::from(q.window_base() + offset));
    sink.emit_word(q.sequence);
    sink.emit_word(SEMAPHORE_ACQUIRE_EQUAL);
}

impl DeviceContext {
    /// Create a query of `kind`, or fail with
    /// [`QueryError::InvalidQueryType`] when the kind is outside this
    /// device's capabilities, or [`QueryError::OutOfStagingMemory`] when no
    /// result storage is available.
    pub fn create_query(
        &mut self,
        mem: &mut dyn DeviceMemory,
        kind: QueryKind,
    ) -> Result<Query, QueryError> {
        if let Some(stream) = kind.stream() {
            if stream >= MAX_STREAMS {
                debug!(?kind, stream, "stream index out of range");
                return Err(QueryError::InvalidQueryType);
            }
        }

        let (space, rotate, is_64bit) = match kind {
            QueryKind::OcclusionCounter | QueryKind::OcclusionPredicate => {
                (OCCLUSION_REGION_BYTES, OCCLUSION_WINDOW_BYTES, false)
            }
            QueryKind::PipelineStatistics => (512, 0, true),
            QueryKind::TransformFeedbackStats { .. }
            | QueryKind::TransformFeedbackOverflowPredicate { .. } => (64, 0, true),
            QueryKind::PrimitivesGenerated { .. } | QueryKind::PrimitivesEmitted { .. } => {
                (32, 0, true)
            }
            QueryKind::TimeElapsed
            | QueryKind::Timestamp
            | QueryKind::TimestampDisjoint
            | QueryKind::GpuFinished => (32, 0, false),
            QueryKind::TransformFeedbackBufferOffset => (16, 0, false),
            QueryKind::DriverStatistic(_) => (0, 0, true),
            QueryKind::Performance(_) => {
                if !self.caps.has_perf_counters || self.caps.mp_count == 0 {
                    debug!(?kind, "performance counters not supported on this device");
                    return Err(QueryError::InvalidQueryType);
                }
                (perf::BLOCK_BYTES * self.caps.mp_count, 0, false)
            }
        };

        let storage = if space > 0 {
            QueryStorage::Region(self.pool.allocate(mem, space)?)
        } else {
            QueryStorage::Value(0)
        };

        let id = self.next_query_id;
        self.next_query_id += 1;

        let q = Query {
            id,
            kind,
            state: QueryState::Ready,
            sequence: 0,
            rotate,
            // Rotating queries advance before use; everyone else sits at the
            // region base for their whole life.
            window: if rotate > 0 { None } else { Some(0) },
            is_64bit,
            nesting: 0,
            tfb_buffer: 0,
            storage,
            slots: [None; 4],
            fence: None,
        };

        if rotate == 0 && !is_64bit {
            // Initialize the completion sentinel so a poll before any end
            // cannot read stale memory as "done".
            if let Some(r) = q.region() {
                r.write_u32(0, 0);
            }
        }
        Ok(q)
    }

    /// Destroy a query, ending it first if still active. Storage goes back
    /// to the pool; if the device may still write it, the release is
    /// deferred onto the most recent fence.
    pub fn destroy_query(
        &mut self,
        mem: &mut dyn DeviceMemory,
        sink: &mut dyn CmdSink,
        mut q: Query,
    ) {
        if q.state == QueryState::Active {
            self.end_query(mem, sink, &mut q);
        }
        let state = q.state;
        if let QueryStorage::Region(region) = std::mem::replace(&mut q.storage, QueryStorage::None)
        {
            let when = if state == QueryState::Ready {
                ReleaseWhen::Now
            } else {
                ReleaseWhen::AfterFence(mem.current_fence())
            };
            self.pool.release(region, when);
        }
    }

    /// Advance a rotating query to its next window, hopping to a fresh
    /// region when the current one is used up (older windows may still be in
    /// flight, so the old region is released through the fence).
    fn advance_window(&mut self, mem: &mut dyn DeviceMemory, q: &mut Query) {
        let Some(region_len) = q.region().map(|r| r.len()) else {
            return;
        };
        q.window = match q.window {
            None => Some(0),
            Some(w) if w + q.rotate >= region_len => {
                match self.pool.allocate(mem, region_len) {
                    Ok(fresh) => {
                        let old = std::mem::replace(&mut q.storage, QueryStorage::Region(fresh));
                        let when = if q.state == QueryState::Ready {
                            ReleaseWhen::Now
                        } else {
                            ReleaseWhen::AfterFence(mem.current_fence())
                        };
                        if let QueryStorage::Region(old) = old {
                            self.pool.release(old, when);
                        }
                        Some(0)
                    }
                    Err(_) => {
                        warn!("result staging exhausted; reusing the last rotation window");
                        Some(w)
                    }
                }
            }
            Some(w) => Some(w + q.rotate),
        };
    }

    /// Start measuring.
    ///
    /// Fails with [`QueryError::InvalidQueryType`] for end-only kinds.
    /// Occlusion queries move to a fresh window and re-initialize its
    /// CPU-visible words before any command is emitted, so a previous
    /// cycle's completion write cannot race the initialization.
    pub fn begin_query(
        &mut self,
        mem: &mut dyn DeviceMemory,
        sink: &mut dyn CmdSink,
        q: &mut Query,
    ) -> Result<(), QueryError> {
        if !q.kind.supports_begin() {
            return Err(QueryError::InvalidQueryType);
        }

        if q.rotate > 0 {
            self.advance_window(mem, q);
            let w = q.window_base();
            if let Some(r) = q.region() {
                r.write_u32(w, q.sequence); // previous sequence: not yet done
                r.write_u32(w + 4, 1); // initial render condition: draw
                r.write_u32(w + 16, q.sequence.wrapping_add(1)); // compare operand
                r.write_u32(w + 20, 0); // begin count until a chain report lands
            }
        }
        q.sequence = q.sequence.wrapping_add(1);

        match q.kind {
            QueryKind::OcclusionCounter | QueryKind::OcclusionPredicate => {
                q.nesting = self.occlusion_active;
                self.occlusion_active += 1;
                if q.nesting > 0 {
                    // Overlapping occlusion regions compose: capture the
                    // enclosing counter value as this query's baseline.
                    emit_report(sink, q, 0x10, event::SAMPLE_COUNT);
                } else {
                    sink.reserve(4);
                    sink.emit_header(Method::COUNTER_RESET, 1);
                    sink.emit_word(COUNTER_SAMPLES_PASSED);
                    sink.emit_header(Method::SAMPLE_COUNT_ENABLE, 1);
                    sink.emit_word(1);
                }
            }
            QueryKind::PrimitivesGenerated { stream } => {
                emit_report(sink, q, 0x10, event::for_stream(event::GENERATED_PRIMS, stream));
            }
            QueryKind::PrimitivesEmitted { stream } => {
                emit_report(
                    sink,
                    q,
                    0x10,
                    event::for_stream(event::STREAM_VERTICES_WRITTEN, stream),
                );
            }
            QueryKind::TransformFeedbackStats { stream } => {
                emit_report(
                    sink,
                    q,
                    0x20,
                    event::for_stream(event::STREAM_VERTICES_WRITTEN, stream),
                );
                emit_report(
                    sink,
                    q,
                    0x30,
                    event::for_stream(event::STREAM_PRIMS_NEEDED, stream),
                );
            }
            QueryKind::TransformFeedbackOverflowPredicate { stream } => {
                emit_report(
                    sink,
                    q,
                    0x10,
                    event::for_stream(event::STREAM_PRIMS_DROPPED, stream),
                );
            }
            QueryKind::TimeElapsed | QueryKind::TimestampDisjoint => {
                emit_report(sink, q, 0x10, event::TIMESTAMP);
            }
            QueryKind::PipelineStatistics => {
                for (i, ev) in event::PIPELINE_STAGES.iter().enumerate() {
                    emit_report(sink, q, 0xc0 + i as u32 * 0x10, *ev);
                }
            }
            QueryKind::DriverStatistic(stat) => {
                // Gauges report the current total at end; counters report the
                // delta from here.
                let base = if stat.is_gauge() { 0 } else { self.stats().get(stat) };
                q.storage = QueryStorage::Value(base);
            }
            QueryKind::Performance(counter) => {
                perf::query_begin(&mut self.slots, sink, q, counter, self.caps.mp_count);
            }
            QueryKind::Timestamp
            | QueryKind::GpuFinished
            | QueryKind::TransformFeedbackBufferOffset => unreachable!(),
        }

        q.state = QueryState::Active;
        Ok(())
    }

    /// Stop measuring and ask the device to write the final record.
    ///
    /// Legal without a prior `begin` for instantaneous kinds; the rotation
    /// and sequence bump that `begin` would have done happen here instead.
    pub fn end_query(&mut self, mem: &mut dyn DeviceMemory, sink: &mut dyn CmdSink, q: &mut Query) {
        let was_active = q.state == QueryState::Active;
        if !was_active {
            if q.rotate > 0 {
                self.advance_window(mem, q);
            }
            q.sequence = q.sequence.wrapping_add(1);
        }
        q.state = QueryState::Ended;

        match q.kind {
            QueryKind::OcclusionCounter | QueryKind::OcclusionPredicate => {
                emit_report(sink, q, 0, event::SAMPLE_COUNT);
                if was_active {
                    self.occlusion_active -= 1;
                    if self.occlusion_active == 0 {
                        sink.reserve(2);
                        sink.emit_header(Method::SAMPLE_COUNT_ENABLE, 1);
                        sink.emit_word(0);
                    }
                }
            }
            QueryKind::PrimitivesGenerated { stream } => {
                emit_report(sink, q, 0, event::for_stream(event::GENERATED_PRIMS, stream));
            }
            QueryKind::PrimitivesEmitted { stream } => {
                emit_report(
                    sink,
                    q,
                    0,
                    event::for_stream(event::STREAM_VERTICES_WRITTEN, stream),
                );
            }
            QueryKind::TransformFeedbackStats { stream } => {
                emit_report(
                    sink,
                    q,
                    0,
                    event::for_stream(event::STREAM_VERTICES_WRITTEN, stream),
                );
                emit_report(
                    sink,
                    q,
                    0x10,
                    event::for_stream(event::STREAM_PRIMS_NEEDED, stream),
                );
            }
            QueryKind::TransformFeedbackOverflowPredicate { stream } => {
                emit_report(
                    sink,
                    q,
                    0,
                    event::for_stream(event::STREAM_PRIMS_DROPPED, stream),
                );
                // The dropped-count report writes no sequence; pair it with a
                // timestamp report that does, for waits and completion.
                emit_report(sink, q, 0x20, event::TIMESTAMP);
            }
            QueryKind::Timestamp | QueryKind::TimestampDisjoint | QueryKind::TimeElapsed => {
                emit_report(sink, q, 0, event::TIMESTAMP);
            }
            QueryKind::GpuFinished => {
                emit_report(sink, q, 0, event::GPU_FINISHED);
            }
            QueryKind::PipelineStatistics => {
                for (i, ev) in event::PIPELINE_STAGES.iter().enumerate() {
                    emit_report(sink, q, i as u32 * 0x10, *ev);
                }
            }
            QueryKind::TransformFeedbackBufferOffset => {
                emit_report(
                    sink,
                    q,
                    0,
                    event::for_stream(event::STREAM_BUFFER_OFFSET, q.tfb_buffer),
                );
            }
            QueryKind::DriverStatistic(stat) => {
                let base = q.stored_value();
                q.storage = QueryStorage::Value(self.stats().get(stat).wrapping_sub(base));
                return;
            }
            QueryKind::Performance(_) => {
                perf::query_end(&mut self.slots, sink, q, self.caps.mp_count);
            }
        }

        if q.is_64bit {
            // Memory polling is unreliable for these kinds; completion is
            // detected through the fence instead.
            q.fence = Some(mem.current_fence());
        }
    }

    fn query_complete(&self, q: &Query) -> bool {
        match q.kind {
            QueryKind::Performance(_) => perf::is_complete(q, self.caps.mp_count),
            _ if q.is_64bit => q.fence.as_ref().is_some_and(|f| f.signalled()),
            _ => q.rec_u32(0) == q.sequence,
        }
    }

    /// Fetch the result.
    ///
    /// Returns [`QueryResult::NotReady`] when `wait` is false and the device
    /// has not caught up; that path also submits buffered commands, at most
    /// once per end, so a caller polling in a loop without ever submitting
    /// cannot wait on an empty pipe forever. With `wait` the call blocks on
    /// the memory/fence primitive. Device failures are hard errors.
    pub fn query_result(
        &mut self,
        mem: &mut dyn DeviceMemory,
        sink: &mut dyn CmdSink,
        q: &mut Query,
        wait: bool,
    ) -> Result<QueryResult, DeviceError> {
        if let QueryKind::DriverStatistic(_) = q.kind {
            q.state = QueryState::Ready;
            return Ok(QueryResult::Unsigned(q.stored_value()));
        }

        if q.state != QueryState::Ready && self.query_complete(q) {
            q.state = QueryState::Ready;
        }

        if q.state != QueryState::Ready {
            if !wait {
                if q.state != QueryState::Flushed {
                    q.state = QueryState::Flushed;
                    sink.submit();
                }
                return Ok(QueryResult::NotReady);
            }
            if let Some(region) = q.region() {
                mem.wait_readable(region.buffer())?;
            }
            self.stats().add(DriverStat::QuerySyncCount, 1);
            q.state = QueryState::Ready;
        }

        Ok(self.decode(q))
    }

    fn decode(&self, q: &Query) -> QueryResult {
        match q.kind {
            QueryKind::GpuFinished => QueryResult::Boolean(true),
            QueryKind::OcclusionCounter => {
                QueryResult::Unsigned(u64::from(q.rec_u32(4).wrapping_sub(q.rec_u32(20))))
            }
            QueryKind::OcclusionPredicate => QueryResult::Boolean(q.rec_u32(4) != q.rec_u32(20)),
            QueryKind::PrimitivesGenerated { .. } | QueryKind::PrimitivesEmitted { .. } => {
                QueryResult::Unsigned(q.rec_u64(0).wrapping_sub(q.rec_u64(16)))
            }
            QueryKind::TransformFeedbackStats { .. } => QueryResult::StreamOutStats {
                written: q.rec_u64(0).wrapping_sub(q.rec_u64(0x20)),
                generated: q.rec_u64(0x10).wrapping_sub(q.rec_u64(0x30)),
            },
            QueryKind::TransformFeedbackOverflowPredicate { .. } => {
                QueryResult::Boolean(q.rec_u64(0) != q.rec_u64(16))
            }
            QueryKind::Timestamp => QueryResult::Unsigned(q.rec_u64(8)),
            QueryKind::TimestampDisjoint => QueryResult::TimestampDisjoint {
                ticks_per_second: self.caps.timestamp_ticks_per_second,
                disjoint: q.rec_u64(8) != q.rec_u64(24),
            },
            QueryKind::TimeElapsed => {
                QueryResult::Unsigned(q.rec_u64(8).wrapping_sub(q.rec_u64(24)))
            }
            QueryKind::PipelineStatistics => {
                let mut out = [0u64; 10];
                for (i, slot) in out.iter_mut().enumerate() {
                    let i = i as u32;
                    *slot = q
                        .rec_u64(i * 0x10)
                        .wrapping_sub(q.rec_u64(0xc0 + i * 0x10));
                }
                QueryResult::PipelineStatistics(out)
            }
            QueryKind::TransformFeedbackBufferOffset => {
                QueryResult::Unsigned(u64::from(q.rec_u32(4)))
            }
            QueryKind::DriverStatistic(_) => QueryResult::Unsigned(q.stored_value()),
            QueryKind::Performance(counter) => {
                let cfg = counter.config();
                let samples = perf::collect_samples(q, self.caps.mp_count);
                QueryResult::Unsigned(metric::reduce(
                    cfg.op,
                    &samples,
                    cfg.channels.len(),
                    cfg.norm,
                ))
            }
        }
    }

    /// End a stream-output buffer-offset query against `buffer_index`,
    /// emitting a one-time serialize first when the caller still owes one.
    pub fn save_stream_output_offset(
        &mut self,
        mem: &mut dyn DeviceMemory,
        sink: &mut dyn CmdSink,
        q: &mut Query,
        buffer_index: u8,
        serialize: &mut bool,
    ) {
        if *serialize {
            *serialize = false;
            sink.reserve(2);
            sink.emit_header(Method::SERIALIZE, 1);
            sink.emit_word(0);
            self.stats().add(DriverStat::GpuSerializeCount, 1);
        }
        q.tfb_buffer = buffer_index.min(MAX_STREAMS - 1);
        self.end_query(mem, sink, q);
    }

    /// Feed four words of the query's record into the command stream as
    /// inline data (e.g. indirect draw parameters taken from a query).
    pub fn emit_query_inline(&self, sink: &mut dyn CmdSink, q: &Query, result_offset: u32) {
        if let Some(region) = q.region() {
            sink.emit_inline(
                region.buffer(),
                region.offset_in_buffer() + q.window_base() + result_offset,
                4,
            );
        }
    }
}
