//! Collaborator boundary for device memory and fences.
//!
//! The query engine consumes these traits; it never owns the device. A real
//! driver backs them with kernel buffer objects and channel fences, the tests
//! back them with plain host memory and manually signalled fences, and the
//! in-crate [`SystemMemory`] implementation is a self-contained fallback for
//! CPU-only operation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Hard device failures surfaced from result readback.
///
/// These indicate the device context itself is unusable, unlike "not ready"
/// which is an ordinary poll outcome.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to allocate {len} bytes of mapped staging memory")]
    AllocationFailed { len: u32 },

    #[error("wait for buffer readability failed: {0}")]
    WaitFailed(&'static str),
}

/// A GPU-visible, CPU-mapped staging buffer.
///
/// The CPU writes initialization patterns and polls completion sentinels; the
/// device (or its simulation) appends result records concurrently. Words are
/// stored as atomics so that single-writer publication needs no locks: the
/// writer releases, the poller acquires.
pub struct StagingBuffer {
    device_address: u64,
    words: Box<[AtomicU32]>,
}

impl StagingBuffer {
    /// `len_bytes` is rounded up to a whole number of 32-bit words.
    pub fn new(device_address: u64, len_bytes: u32) -> Self {
        let words = (len_bytes as usize).div_ceil(4);
        let words = (0..words).map(|_| AtomicU32::new(0)).collect::<Vec<_>>();
        Self {
            device_address,
            words: words.into_boxed_slice(),
        }
    }

    pub fn device_address(&self) -> u64 {
        self.device_address
    }

    pub fn len_bytes(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    /// Whether `addr` falls inside this buffer's device-address range.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.device_address && addr < self.device_address + u64::from(self.len_bytes())
    }

    pub fn read_u32(&self, byte_offset: u32) -> u32 {
        self.words[byte_offset as usize / 4].load(Ordering::Acquire)
    }

    pub fn write_u32(&self, byte_offset: u32, value: u32) {
        self.words[byte_offset as usize / 4].store(value, Ordering::Release);
    }

    /// Little-endian pair read: low word first.
    pub fn read_u64(&self, byte_offset: u32) -> u64 {
        let lo = self.read_u32(byte_offset);
        let hi = self.read_u32(byte_offset + 4);
        (u64::from(hi) << 32) | u64::from(lo)
    }

    pub fn write_u64(&self, byte_offset: u32, value: u64) {
        self.write_u32(byte_offset, value as u32);
        self.write_u32(byte_offset + 4, (value >> 32) as u32);
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("device_address", &self.device_address)
            .field("len_bytes", &self.len_bytes())
            .finish()
    }
}

/// An opaque completion signal for previously submitted work.
///
/// Used two ways: polled for result availability (64-bit-result queries whose
/// sentinels cannot be trusted across pipeline reordering), and as a hook for
/// deferred resource release once the device can no longer touch a region.
pub trait Fence: Send + Sync {
    fn signalled(&self) -> bool;

    /// Run `work` once the fence signals. If it already has, run it now.
    fn on_signal(&self, work: Box<dyn FnOnce() + Send>);
}

pub type FenceRef = Arc<dyn Fence>;

/// A fence signalled by the host (device model, test harness, ...).
///
/// Completion callbacks queued before the signal run inside [`signal`], in
/// queue order.
///
/// [`signal`]: HostFence::signal
#[derive(Default)]
pub struct HostFence {
    state: Mutex<HostFenceState>,
}

#[derive(Default)]
struct HostFenceState {
    signalled: bool,
    work: Vec<Box<dyn FnOnce() + Send>>,
}

impl HostFence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        let work = {
            let mut state = self.state.lock().unwrap();
            state.signalled = true;
            std::mem::take(&mut state.work)
        };
        for w in work {
            w();
        }
    }
}

impl Fence for HostFence {
    fn signalled(&self) -> bool {
        self.state.lock().unwrap().signalled
    }

    fn on_signal(&self, work: Box<dyn FnOnce() + Send>) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.signalled {
                state.work.push(work);
                return;
            }
        }
        work();
    }
}

/// A fence that is always signalled; deferred work runs immediately.
#[derive(Debug, Default)]
pub struct ImmediateFence;

impl Fence for ImmediateFence {
    fn signalled(&self) -> bool {
        true
    }

    fn on_signal(&self, work: Box<dyn FnOnce() + Send>) {
        work();
    }
}

/// Boundary to the driver's buffer/fence machinery.
pub trait DeviceMemory {
    /// Allocate a CPU-mapped, GPU-visible buffer. The mapping is live for
    /// the buffer's whole lifetime.
    fn allocate_mapped(&mut self, len_bytes: u32) -> Result<Arc<StagingBuffer>, DeviceError>;

    /// Block until every previously submitted write to `buf` is visible to
    /// the CPU. Cooperative wait, not a spin.
    fn wait_readable(&mut self, buf: &StagingBuffer) -> Result<(), DeviceError>;

    /// The fence that will signal once all currently buffered work
    /// completes. Deferred releases attach here.
    fn current_fence(&self) -> FenceRef;
}

/// Self-contained [`DeviceMemory`] over host allocations.
///
/// Addresses are handed out from a bump cursor in a private aperture; the
/// current fence defaults to [`ImmediateFence`] so deferred work runs at
/// once. Device models that pipeline work can install a real fence via
/// [`set_current_fence`].
///
/// [`set_current_fence`]: SystemMemory::set_current_fence
pub struct SystemMemory {
    next_address: u64,
    fence: FenceRef,
}

impl SystemMemory {
    const APERTURE_BASE: u64 = 0x1000_0000;

    pub fn new() -> Self {
        Self {
            next_address: Self::APERTURE_BASE,
            fence: Arc::new(ImmediateFence),
        }
    }

    pub fn set_current_fence(&mut self, fence: FenceRef) {
        self.fence = fence;
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMemory for SystemMemory {
    fn allocate_mapped(&mut self, len_bytes: u32) -> Result<Arc<StagingBuffer>, DeviceError> {
        let buf = Arc::new(StagingBuffer::new(self.next_address, len_bytes));
        // Keep allocations page-separated so address-range lookups stay
        // unambiguous.
        self.next_address += u64::from(buf.len_bytes().max(4096));
        Ok(buf)
    }

    fn wait_readable(&mut self, _buf: &StagingBuffer) -> Result<(), DeviceError> {
        Ok(())
    }

    fn current_fence(&self) -> FenceRef {
        Arc::clone(&self.fence)
    }
}
