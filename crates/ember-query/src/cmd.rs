//! Device command vocabulary for the EmberGPU query and counter units, plus
//! the [`CmdSink`] boundary the engine emits through.
//!
//! The engine never encodes hardware registers bit-for-bit. Each command is an
//! opaque `(method, words...)` tuple whose semantics are documented here; how
//! a sink packs them into a real command stream (or interprets them in a
//! simulator) is entirely its own business.

use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::StagingBuffer;

/// A command-stream method selector.
///
/// Methods address a unit on the device; the words following the header are
/// that method's operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Method(pub u16);

impl Method {
    /// Write a result report. Operands: address high, address low, sequence,
    /// report event selector (see [`event`]).
    pub const REPORT: Method = Method(0x0400);
    /// Stall the channel until memory matches. Operands: address high,
    /// address low, payload, trigger word (see [`SEMAPHORE_ACQUIRE_EQUAL`]).
    pub const SEMAPHORE: Method = Method(0x0410);
    /// Point the conditional-render unit at a result record. Operands:
    /// address high, address low, condition mode (see [`CondMode`]).
    pub const COND_ADDRESS: Method = Method(0x0420);
    /// Set the conditional-render mode without an address (immediate form,
    /// used to force "always render"). One operand: condition mode.
    pub const COND_MODE: Method = Method(0x0428);
    /// Reset one of the fixed-function counters to zero. One operand: the
    /// counter selector (see [`COUNTER_SAMPLES_PASSED`]).
    pub const COUNTER_RESET: Method = Method(0x0430);
    /// Enable (1) or disable (0) sample-count accumulation.
    pub const SAMPLE_COUNT_ENABLE: Method = Method(0x0434);
    /// Drain outstanding work before reordering-sensitive reads. No operands
    /// beyond the immediate zero.
    pub const SERIALIZE: Method = Method(0x0438);

    /// Turn the multiprocessor performance-counter block on for this context.
    /// One operand: nonzero to enable.
    pub const PM_GLOBAL_ENABLE: Method = Method(0x0500);
    /// Reprogram the counter-domain multiplexer. One operand: bitmask of
    /// signal domains that now have at least one live slot (bit 0 = domain A,
    /// bit 1 = domain B).
    pub const PM_MULTIPLEX_ENABLE: Method = Method(0x0504);
    /// Launch the fixed readback microcode. Operands: record address high,
    /// record address low, sequence, multiprocessor count.
    pub const PM_LAUNCH_READBACK: Method = Method(0x05a0);

    /// Select the signal group feeding a counter slot. One operand.
    pub const fn pm_signal_select(slot: u8) -> Method {
        Method(0x0510 + slot as u16 * 4)
    }

    /// Select the source lanes within the slot's signal group. One operand.
    pub const fn pm_source_select(slot: u8) -> Method {
        Method(0x0530 + slot as u16 * 4)
    }

    /// Program a slot's function/mode register. One operand:
    /// `(function << 4) | mode`; zero disables counting on the slot.
    pub const fn pm_function(slot: u8) -> Method {
        Method(0x0550 + slot as u16 * 4)
    }

    /// Reset a slot's accumulator to zero. One operand (ignored).
    pub const fn pm_set_zero(slot: u8) -> Method {
        Method(0x0570 + slot as u16 * 4)
    }
}

/// Trigger word for [`Method::SEMAPHORE`]: resume when the 32-bit value at
/// the semaphore address equals the payload.
pub const SEMAPHORE_ACQUIRE_EQUAL: u32 = 0x0000_1001;

/// Counter selector for [`Method::COUNTER_RESET`]: the samples-passed
/// (occlusion) counter.
pub const COUNTER_SAMPLES_PASSED: u32 = 0x0000_0001;

/// Report event selectors for [`Method::REPORT`].
///
/// A report event names what the device writes into the result record when
/// the command drains: 32-bit events write `{ sequence, value, timestamp }`,
/// 64-bit events write `{ value: u64, timestamp: u64 }`. The low bits encode
/// the report format and are meaningful to the device only.
pub mod event {
    /// Write the current GPU clock (and the sequence, for completion
    /// polling); the value field is zero.
    pub const TIMESTAMP: u32 = 0x0000_5002;
    /// Samples that passed the depth/stencil test since the last counter
    /// reset (32-bit).
    pub const SAMPLE_COUNT: u32 = 0x0100_f002;
    /// Stream-output primitives dropped for lack of buffer space (64-bit,
    /// does not write a sequence).
    pub const STREAM_PRIMS_DROPPED: u32 = 0x0300_5002;
    /// Stream-output vertices actually written (64-bit).
    pub const STREAM_VERTICES_WRITTEN: u32 = 0x0580_5002;
    /// Stream-output primitives the geometry front end produced (64-bit).
    pub const STREAM_PRIMS_NEEDED: u32 = 0x0680_5002;
    /// Primitives generated by the pipeline for a vertex stream (64-bit).
    pub const GENERATED_PRIMS: u32 = 0x0900_5002;
    /// Current byte offset of a stream-output buffer (32-bit).
    pub const STREAM_BUFFER_OFFSET: u32 = 0x0d00_5002;
    /// Semaphore-style release once all prior work has finished; writes the
    /// sequence only.
    pub const GPU_FINISHED: u32 = 0x1000_f010;

    // Pipeline-statistics events, one per stage, in the documented result
    // order (all 64-bit).
    pub const VFETCH_VERTICES: u32 = 0x0080_1002;
    pub const VFETCH_PRIMS: u32 = 0x0180_1002;
    pub const VP_LAUNCHES: u32 = 0x0280_2002;
    pub const GP_LAUNCHES: u32 = 0x0380_6002;
    pub const GP_PRIMS_OUT: u32 = 0x0480_6002;
    pub const RAST_PRIMS_IN: u32 = 0x0780_4002;
    pub const RAST_PRIMS_OUT: u32 = 0x0880_4002;
    pub const ROP_PIXELS: u32 = 0x0980_a002;
    pub const TCP_LAUNCHES: u32 = 0x0d80_8002;
    pub const TEP_LAUNCHES: u32 = 0x0e80_9002;

    /// The ten pipeline-statistics events in result order.
    pub const PIPELINE_STAGES: [u32; 10] = [
        VFETCH_VERTICES,
        VFETCH_PRIMS,
        VP_LAUNCHES,
        GP_LAUNCHES,
        GP_PRIMS_OUT,
        RAST_PRIMS_IN,
        RAST_PRIMS_OUT,
        ROP_PIXELS,
        TCP_LAUNCHES,
        TEP_LAUNCHES,
    ];

    /// Rebind a per-stream event to a specific vertex stream or buffer slot.
    pub const fn for_stream(ev: u32, stream: u8) -> u32 {
        ev | ((stream as u32) << 5)
    }
}

/// GPU-side condition modes programmed by [`Method::COND_ADDRESS`] /
/// [`Method::COND_MODE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CondMode {
    /// Render unconditionally.
    Always = 1,
    /// Render when the 64-bit result at the condition address is nonzero.
    ResNonZero = 2,
    /// Render when the two report words at the condition address compare
    /// equal.
    Equal = 3,
    /// Render when they differ.
    NotEqual = 4,
}

bitflags! {
    /// How a referenced buffer will be accessed by subsequently emitted
    /// commands. Sinks use this for residency and write-hazard tracking.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Access: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// The buffer lives in the CPU-visible staging aperture.
        const STAGING = 1 << 2;
    }
}

/// Boundary between the query engine and the command-stream emitter.
///
/// The engine reserves space, emits `(header, operands...)` tuples and
/// buffer references, and occasionally kicks a submit. Implementations may
/// encode into a real hardware ring, forward over IPC, or interpret the
/// commands directly (the test device does the latter). Like the rest of the
/// driver, emission is infallible: a sink that runs out of space must grow or
/// flush internally on `reserve`.
pub trait CmdSink {
    /// Guarantee space for `words` command words before the next header.
    fn reserve(&mut self, words: usize);

    /// Begin a command: `len` operand words follow.
    fn emit_header(&mut self, method: Method, len: u16);

    /// Emit one operand word.
    fn emit_word(&mut self, word: u32);

    /// Emit a 64-bit device address as two operand words (high, then low).
    fn emit_address(&mut self, addr: u64);

    /// Declare that following commands access `buf`. Must precede the
    /// command that carries the buffer's address.
    fn reference_buffer(&mut self, buf: &Arc<StagingBuffer>, access: Access);

    /// Feed `words` command words fetched from `buf` at `byte_offset`
    /// directly into the stream (no prefetch), e.g. a query result consumed
    /// as indirect draw parameters.
    fn emit_inline(&mut self, buf: &Arc<StagingBuffer>, byte_offset: u32, words: u32);

    /// Submit everything buffered so far to the device.
    fn submit(&mut self);
}

/// Sink that swallows every command. Useful for headless operation and for
/// exercising the engine's CPU-side state machine alone.
#[derive(Debug, Default)]
pub struct NullSink {
    submits: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `submit` calls observed.
    pub fn submits(&self) -> u64 {
        self.submits
    }
}

impl CmdSink for NullSink {
    fn reserve(&mut self, _words: usize) {}

    fn emit_header(&mut self, _method: Method, _len: u16) {}

    fn emit_word(&mut self, _word: u32) {}

    fn emit_address(&mut self, _addr: u64) {}

    fn reference_buffer(&mut self, _buf: &Arc<StagingBuffer>, _access: Access) {}

    fn emit_inline(&mut self, _buf: &Arc<StagingBuffer>, _byte_offset: u32, _words: u32) {}

    fn submit(&mut self) {
        self.submits += 1;
    }
}
