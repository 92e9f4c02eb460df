//! Result-storage pool.
//!
//! Queries park their result records in small fixed-size regions of
//! CPU-mapped staging memory. The pool carves regions out of page-sized
//! chunks obtained from the [`DeviceMemory`] collaborator and grows by whole
//! chunks up to a cap. Releasing a region that previously submitted commands
//! may still write is deferred onto a fence instead of performed immediately;
//! the free list is shared with those deferred callbacks behind a mutex whose
//! only job is the list push itself.

use std::sync::{Arc, Mutex};

use crate::backend::{DeviceMemory, FenceRef, StagingBuffer};
use crate::error::QueryError;

/// A region of staging memory owned by exactly one query at a time.
#[derive(Debug)]
pub struct ResultRegion {
    buffer: Arc<StagingBuffer>,
    base: u32,
    len: u32,
}

impl ResultRegion {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn buffer(&self) -> &Arc<StagingBuffer> {
        &self.buffer
    }

    /// Device address of the region's first byte.
    pub fn device_address(&self) -> u64 {
        self.buffer.device_address() + u64::from(self.base)
    }

    /// Byte offset of the region within its backing buffer.
    pub fn offset_in_buffer(&self) -> u32 {
        self.base
    }

    pub fn read_u32(&self, byte_offset: u32) -> u32 {
        debug_assert!(byte_offset < self.len);
        self.buffer.read_u32(self.base + byte_offset)
    }

    pub fn write_u32(&self, byte_offset: u32, value: u32) {
        debug_assert!(byte_offset < self.len);
        self.buffer.write_u32(self.base + byte_offset, value);
    }

    pub fn read_u64(&self, byte_offset: u32) -> u64 {
        debug_assert!(byte_offset + 8 <= self.len);
        self.buffer.read_u64(self.base + byte_offset)
    }

    pub fn write_u64(&self, byte_offset: u32, value: u64) {
        debug_assert!(byte_offset + 8 <= self.len);
        self.buffer.write_u64(self.base + byte_offset, value);
    }
}

/// When a released region becomes reusable.
pub enum ReleaseWhen {
    /// No submitted command can still write the region.
    Now,
    /// The device may still write it; recycle once the fence signals.
    AfterFence(FenceRef),
}

#[derive(Debug)]
struct FreeRegion {
    buffer: Arc<StagingBuffer>,
    base: u32,
    len: u32,
}

/// Pool of result-staging regions.
pub struct ResultPool {
    chunk_bytes: u32,
    max_chunks: usize,
    chunks: usize,
    free: Arc<Mutex<Vec<FreeRegion>>>,
}

impl ResultPool {
    pub fn new(chunk_bytes: u32, max_chunks: usize) -> Self {
        debug_assert!(chunk_bytes % 4 == 0);
        Self {
            chunk_bytes,
            max_chunks,
            chunks: 0,
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Carve out a region of exactly `len` bytes.
    ///
    /// First-fit over the free list, splitting the remainder back; grows by
    /// one chunk from `mem` when nothing fits. Fails with
    /// [`QueryError::OutOfStagingMemory`] once the growth cap is reached or
    /// the collaborator refuses the allocation.
    pub fn allocate(
        &mut self,
        mem: &mut dyn DeviceMemory,
        len: u32,
    ) -> Result<ResultRegion, QueryError> {
        debug_assert!(len > 0 && len % 4 == 0);
        if len > self.chunk_bytes {
            return Err(QueryError::OutOfStagingMemory);
        }

        if let Some(region) = self.take_first_fit(len) {
            return Ok(region);
        }

        if self.chunks >= self.max_chunks {
            return Err(QueryError::OutOfStagingMemory);
        }
        let buffer = mem
            .allocate_mapped(self.chunk_bytes)
            .map_err(|_| QueryError::OutOfStagingMemory)?;
        self.chunks += 1;
        self.free.lock().unwrap().push(FreeRegion {
            buffer,
            base: 0,
            len: self.chunk_bytes,
        });

        self.take_first_fit(len).ok_or(QueryError::OutOfStagingMemory)
    }

    fn take_first_fit(&mut self, len: u32) -> Option<ResultRegion> {
        let mut free = self.free.lock().unwrap();
        let idx = free.iter().position(|r| r.len >= len)?;
        let entry = &mut free[idx];

        let region = ResultRegion {
            buffer: Arc::clone(&entry.buffer),
            base: entry.base,
            len,
        };
        if entry.len == len {
            free.swap_remove(idx);
        } else {
            entry.base += len;
            entry.len -= len;
        }
        Some(region)
    }

    /// Return a region to the pool, immediately or once its last writer's
    /// fence signals.
    pub fn release(&mut self, region: ResultRegion, when: ReleaseWhen) {
        let entry = FreeRegion {
            buffer: region.buffer,
            base: region.base,
            len: region.len,
        };
        match when {
            ReleaseWhen::Now => self.free.lock().unwrap().push(entry),
            ReleaseWhen::AfterFence(fence) => {
                let free = Arc::clone(&self.free);
                fence.on_signal(Box::new(move || {
                    free.lock().unwrap().push(entry);
                }));
            }
        }
    }

    /// Number of free regions currently on the list (coalescing is not
    /// performed; adjacent frees stay separate entries).
    pub fn free_regions(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// Total free bytes across the list.
    pub fn free_bytes(&self) -> u32 {
        self.free.lock().unwrap().iter().map(|r| r.len).sum()
    }
}
