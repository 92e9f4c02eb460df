//! Simulated EmberGPU device for integration tests.
//!
//! [`SimGpu`] is a [`CmdSink`] that decodes the engine's command vocabulary
//! and executes it against host memory: report commands write result records
//! from configurable counter feeds, the readback launch stores per-processor
//! blocks, condition/semaphore/counter commands are logged for assertions.
//! [`SimMemory`] hands out staging buffers from the same address space.
//!
//! Commands queue at emission and run when the test calls [`SimDevice::run`]
//! (or implicitly inside a blocking `wait_readable`), so "GPU lags CPU" is
//! observable.

// Not every test binary touches every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use ember_query::cmd::event;
use ember_query::{
    Access, CmdSink, CondMode, DeviceError, DeviceMemory, FenceRef, HostFence, Method,
    StagingBuffer,
};

/// Slot-counter feed: one row of eight raw counter values per multiprocessor.
pub type PmCounts = Vec<[u32; 8]>;

#[derive(Debug, Clone)]
enum SimCmd {
    Report { addr: u64, seq: u32, ev: u32 },
    LaunchReadback { addr: u64, seq: u32, mp_count: u32 },
}

#[derive(Default)]
pub struct SimState {
    next_address: u64,
    buffers: Vec<Arc<StagingBuffer>>,
    pending: Vec<SimCmd>,

    /// Per-event FIFO of values fed to report commands.
    values: HashMap<u32, VecDeque<u64>>,
    /// Raw slot counters per multiprocessor for the readback microcode.
    pub pm_counts: PmCounts,
    /// GPU clock fed to timestamp fields.
    pub timestamp: u64,

    // Observability for assertions.
    pub submits: u32,
    pub cond: Option<(Option<u64>, u32)>,
    pub waits: Vec<(u64, u32)>,
    pub slot_funcs: [u32; 8],
    pub slot_sig_sel: [u32; 8],
    pub multiplex_masks: Vec<u32>,
    pub pm_global_enables: u32,
    pub sample_count_enabled: bool,
    pub counter_resets: u32,
    pub serializes: u32,
    pub inline_fetches: Vec<(u64, u32, u32)>,

    fence: Option<Arc<HostFence>>,
}

impl SimState {
    fn buffer_containing(&self, addr: u64) -> Option<Arc<StagingBuffer>> {
        self.buffers.iter().find(|b| b.contains(addr)).cloned()
    }

    fn pop_value(&mut self, ev: u32) -> u64 {
        self.values
            .get_mut(&ev)
            .and_then(|q| q.pop_front())
            .unwrap_or(0)
    }

    fn write_report(&mut self, addr: u64, seq: u32, ev: u32) {
        let Some(buf) = self.buffer_containing(addr) else {
            panic!("report to unmapped address {addr:#x}");
        };
        let off = (addr - buf.device_address()) as u32;

        // Mask the stream rebinding bits to classify the event.
        match ev & !(0x3 << 5) {
            event::TIMESTAMP => {
                buf.write_u32(off, seq);
                buf.write_u32(off + 4, 0);
                buf.write_u64(off + 8, self.timestamp);
            }
            event::SAMPLE_COUNT | event::STREAM_BUFFER_OFFSET | event::GPU_FINISHED => {
                let value = self.pop_value(ev) as u32;
                buf.write_u32(off, seq);
                buf.write_u32(off + 4, value);
                buf.write_u64(off + 8, self.timestamp);
            }
            // Everything else reports a 64-bit value and no sequence.
            _ => {
                let value = self.pop_value(ev);
                buf.write_u64(off, value);
                buf.write_u64(off + 8, self.timestamp);
            }
        }
    }

    fn run_pending(&mut self) {
        for cmd in std::mem::take(&mut self.pending) {
            match cmd {
                SimCmd::Report { addr, seq, ev } => self.write_report(addr, seq, ev),
                SimCmd::LaunchReadback {
                    addr,
                    seq,
                    mp_count,
                } => {
                    let Some(buf) = self.buffer_containing(addr) else {
                        panic!("readback to unmapped address {addr:#x}");
                    };
                    let base = (addr - buf.device_address()) as u32;
                    for p in 0..mp_count {
                        let block = base + p * 48;
                        let row = self
                            .pm_counts
                            .get(p as usize)
                            .copied()
                            .unwrap_or([0; 8]);
                        for (i, v) in row.iter().enumerate() {
                            buf.write_u32(block + i as u32 * 4, *v);
                        }
                        buf.write_u64(block + 32, self.timestamp);
                        buf.write_u32(block + 40, seq);
                        buf.write_u32(block + 44, p);
                    }
                }
            }
        }
    }
}

/// Shared handle to the simulated device.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        let state = SimState {
            next_address: 0x4000_0000,
            timestamp: 1_000,
            ..SimState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn memory(&self) -> SimMemory {
        SimMemory {
            state: Arc::clone(&self.state),
        }
    }

    pub fn sink(&self) -> SimGpu {
        SimGpu {
            state: Arc::clone(&self.state),
            decode: None,
        }
    }

    /// Feed `values` to successive reports of `ev`, in order.
    pub fn feed(&self, ev: u32, values: &[u64]) {
        let mut state = self.state.lock().unwrap();
        state.values.entry(ev).or_default().extend(values);
    }

    pub fn set_pm_counts(&self, counts: PmCounts) {
        self.state.lock().unwrap().pm_counts = counts;
    }

    /// Execute everything emitted so far and signal the current fence.
    pub fn run(&self) {
        let fence = {
            let mut state = self.state.lock().unwrap();
            state.run_pending();
            state.fence.take()
        };
        if let Some(fence) = fence {
            fence.signal();
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn submits(&self) -> u32 {
        self.state.lock().unwrap().submits
    }
}

/// Staging allocator half of the simulated device.
pub struct SimMemory {
    state: Arc<Mutex<SimState>>,
}

impl DeviceMemory for SimMemory {
    fn allocate_mapped(&mut self, len_bytes: u32) -> Result<Arc<StagingBuffer>, DeviceError> {
        let mut state = self.state.lock().unwrap();
        let buf = Arc::new(StagingBuffer::new(state.next_address, len_bytes));
        state.next_address += u64::from(buf.len_bytes()).max(4096);
        state.buffers.push(Arc::clone(&buf));
        Ok(buf)
    }

    fn wait_readable(&mut self, _buf: &StagingBuffer) -> Result<(), DeviceError> {
        // Blocking wait: let the device catch up, completions and all.
        let fence = {
            let mut state = self.state.lock().unwrap();
            state.run_pending();
            state.fence.take()
        };
        if let Some(fence) = fence {
            fence.signal();
        }
        Ok(())
    }

    fn current_fence(&self) -> FenceRef {
        let mut state = self.state.lock().unwrap();
        if state.fence.is_none() {
            state.fence = Some(HostFence::new());
        }
        state.fence.clone().unwrap()
    }
}

/// Command-stream half of the simulated device.
pub struct SimGpu {
    state: Arc<Mutex<SimState>>,
    decode: Option<(Method, u16, Vec<u32>)>,
}

impl SimGpu {
    fn finalize(&mut self, method: Method, words: Vec<u32>) {
        let addr_of = |w: &[u32]| (u64::from(w[0]) << 32) | u64::from(w[1]);
        let mut state = self.state.lock().unwrap();
        match method {
            Method::REPORT => state.pending.push(SimCmd::Report {
                addr: addr_of(&words),
                seq: words[2],
                ev: words[3],
            }),
            Method::PM_LAUNCH_READBACK => state.pending.push(SimCmd::LaunchReadback {
                addr: addr_of(&words),
                seq: words[2],
                mp_count: words[3],
            }),
            Method::SEMAPHORE => state.waits.push((addr_of(&words), words[2])),
            Method::COND_ADDRESS => state.cond = Some((Some(addr_of(&words)), words[2])),
            Method::COND_MODE => state.cond = Some((None, words[0])),
            Method::COUNTER_RESET => state.counter_resets += 1,
            Method::SAMPLE_COUNT_ENABLE => state.sample_count_enabled = words[0] != 0,
            Method::SERIALIZE => state.serializes += 1,
            Method::PM_GLOBAL_ENABLE => state.pm_global_enables += 1,
            Method::PM_MULTIPLEX_ENABLE => state.multiplex_masks.push(words[0]),
            Method(raw) => {
                let slot = |base: u16| ((raw - base) / 4) as usize;
                if (0x0510..0x0530).contains(&raw) {
                    state.slot_sig_sel[slot(0x0510)] = words[0];
                } else if (0x0530..0x0550).contains(&raw) {
                    // Source select: decoded but not asserted on.
                } else if (0x0550..0x0570).contains(&raw) {
                    state.slot_funcs[slot(0x0550)] = words[0];
                } else if (0x0570..0x0590).contains(&raw) {
                    // Slot accumulator reset.
                } else {
                    panic!("unknown method {raw:#x}");
                }
            }
        }
    }
}

impl CmdSink for SimGpu {
    fn reserve(&mut self, _words: usize) {}

    fn emit_header(&mut self, method: Method, len: u16) {
        assert!(self.decode.is_none(), "previous command not finished");
        if len == 0 {
            self.finalize(method, Vec::new());
        } else {
            self.decode = Some((method, len, Vec::new()));
        }
    }

    fn emit_word(&mut self, word: u32) {
        let (method, len, mut words) = self.decode.take().expect("word outside a command");
        words.push(word);
        if words.len() as u16 == len {
            self.finalize(method, words);
        } else {
            self.decode = Some((method, len, words));
        }
    }

    fn emit_address(&mut self, addr: u64) {
        self.emit_word((addr >> 32) as u32);
        self.emit_word(addr as u32);
    }

    fn reference_buffer(&mut self, buf: &Arc<StagingBuffer>, _access: Access) {
        let mut state = self.state.lock().unwrap();
        if !state
            .buffers
            .iter()
            .any(|b| Arc::ptr_eq(b, buf))
        {
            state.buffers.push(Arc::clone(buf));
        }
    }

    fn emit_inline(&mut self, buf: &Arc<StagingBuffer>, byte_offset: u32, words: u32) {
        self.state.lock().unwrap().inline_fetches.push((
            buf.device_address(),
            byte_offset,
            words,
        ));
    }

    fn submit(&mut self) {
        self.state.lock().unwrap().submits += 1;
    }
}

/// `CondMode` wire values, for asserting on `SimState::cond`.
pub fn cond_word(mode: CondMode) -> u32 {
    mode as u32
}
