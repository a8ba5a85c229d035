//! The memory pool is the single point where back-end-specific memory
//! enters the dataplane. Workers advertise the allocator kinds they can
//! consume; the batcher asks the pool for buffers drawn from that list.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::buffer::{AllocatorKind, Buffer, BufferStorage};
use crate::{ServerError, TensorMetadata};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no registered allocator among the requested candidates")]
    AllocatorUnavailable,

    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}

impl From<PoolError> for ServerError {
    fn from(err: PoolError) -> Self {
        ServerError::ResourceExhausted(err.to_string())
    }
}

/// One memory provider. `chunk` carries the per-request extent so segmented
/// providers can size their chunks; contiguous providers ignore it.
pub trait Allocator: Send {
    fn kind(&self) -> AllocatorKind;
    fn get(&mut self, size: usize, chunk: usize) -> Result<Buffer, PoolError>;
    fn put(&mut self, buffer: Buffer);
}

/// Plain host memory with free-list reuse keyed by exact size.
#[derive(Default)]
pub struct CpuAllocator {
    free: HashMap<usize, Vec<Vec<u8>>>,
}

impl CpuAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for CpuAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Cpu
    }

    fn get(&mut self, size: usize, _chunk: usize) -> Result<Buffer, PoolError> {
        let storage = match self.free.get_mut(&size).and_then(Vec::pop) {
            Some(mut v) => {
                v.fill(0);
                v
            }
            None => vec![0u8; size],
        };
        Ok(Buffer::new(AllocatorKind::Cpu, BufferStorage::Cpu(storage)))
    }

    fn put(&mut self, buffer: Buffer) {
        if let BufferStorage::Cpu(v) = buffer.into_storage() {
            self.free.entry(v.len()).or_default().push(v);
        }
    }
}

/// Page-locked host memory for device DMA. Pinnable bytes are a scarce
/// kernel resource, so the provider is capped.
pub struct PinnedAllocator {
    capacity: usize,
    in_use: usize,
}

impl PinnedAllocator {
    pub const DEFAULT_CAPACITY: usize = 256 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, in_use: 0 }
    }
}

impl Default for PinnedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for PinnedAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::CpuPinned
    }

    fn get(&mut self, size: usize, _chunk: usize) -> Result<Buffer, PoolError> {
        let available = self.capacity - self.in_use;
        if size > available {
            return Err(PoolError::OutOfMemory {
                requested: size,
                available,
            });
        }
        self.in_use += size;
        Ok(Buffer::new(
            AllocatorKind::CpuPinned,
            BufferStorage::CpuPinned(vec![0u8; size]),
        ))
    }

    fn put(&mut self, buffer: Buffer) {
        self.in_use = self.in_use.saturating_sub(buffer.len());
    }
}

/// Device memory, host-shadowed like the pinned provider.
pub struct RocmAllocator {
    capacity: usize,
    in_use: usize,
}

impl RocmAllocator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, in_use: 0 }
    }
}

impl Allocator for RocmAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::RocmDevice
    }

    fn get(&mut self, size: usize, _chunk: usize) -> Result<Buffer, PoolError> {
        let available = self.capacity - self.in_use;
        if size > available {
            return Err(PoolError::OutOfMemory {
                requested: size,
                available,
            });
        }
        self.in_use += size;
        Ok(Buffer::new(
            AllocatorKind::RocmDevice,
            BufferStorage::RocmDevice(vec![0u8; size]),
        ))
    }

    fn put(&mut self, buffer: Buffer) {
        self.in_use = self.in_use.saturating_sub(buffer.len());
    }
}

/// Batch-major segmented tensor buffers: one chunk per batch slot.
#[derive(Default)]
pub struct VartAllocator;

impl VartAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl Allocator for VartAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::VartTensor
    }

    fn get(&mut self, size: usize, chunk: usize) -> Result<Buffer, PoolError> {
        let chunk_len = if chunk == 0 { size.max(1) } else { chunk };
        let mut chunks = Vec::new();
        let mut remaining = size;
        while remaining > 0 {
            let n = chunk_len.min(remaining);
            chunks.push(vec![0u8; n]);
            remaining -= n;
        }
        Ok(Buffer::new(
            AllocatorKind::VartTensor,
            BufferStorage::VartTensor { chunk_len, chunks },
        ))
    }

    fn put(&mut self, _buffer: Buffer) {}
}

/// Hands out buffers from an ordered list of candidate allocator kinds and
/// accepts them back for reuse. Internally synchronized; callers see a
/// free-threaded pool.
pub struct MemoryPool {
    allocators: Mutex<HashMap<AllocatorKind, Box<dyn Allocator>>>,
}

impl MemoryPool {
    /// Pool with the host-side providers registered.
    pub fn new() -> Self {
        let pool = Self::empty();
        pool.register(Box::new(CpuAllocator::new()));
        pool.register(Box::new(PinnedAllocator::new()));
        pool
    }

    pub fn empty() -> Self {
        Self {
            allocators: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, allocator: Box<dyn Allocator>) {
        let mut allocators = self.allocators.lock();
        allocators.insert(allocator.kind(), allocator);
    }

    /// Get a buffer of `batch_size` times the tensor's byte extent from the
    /// first candidate that is registered and can satisfy the allocation.
    pub fn get(
        &self,
        candidates: &[AllocatorKind],
        tensor: &TensorMetadata,
        batch_size: usize,
    ) -> Result<Buffer, PoolError> {
        let chunk = tensor.shape.numel() * tensor.dtype.size();
        let size = chunk * batch_size;

        let mut allocators = self.allocators.lock();
        let mut last_oom = None;
        for kind in candidates {
            let Some(allocator) = allocators.get_mut(kind) else {
                continue;
            };
            match allocator.get(size, chunk) {
                Ok(buffer) => return Ok(buffer),
                Err(err @ PoolError::OutOfMemory { .. }) => last_oom = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_oom.unwrap_or(PoolError::AllocatorUnavailable))
    }

    /// Return a buffer for reuse. Buffers from unregistered providers are
    /// simply dropped.
    pub fn put(&self, buffer: Buffer) {
        let mut allocators = self.allocators.lock();
        if let Some(allocator) = allocators.get_mut(&buffer.allocator()) {
            allocator.put(buffer);
        }
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}
