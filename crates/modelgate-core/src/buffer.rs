//! Buffers are the handles the memory pool loans out for request and
//! response tensor data. The variant set is closed and small, so a tagged
//! enum is used instead of trait objects; the hot path branches on kind.

/// Tag identifying which memory provider a buffer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    Cpu,
    CpuPinned,
    RocmDevice,
    VartTensor,
}

impl std::fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AllocatorKind::Cpu => "cpu",
            AllocatorKind::CpuPinned => "cpu_pinned",
            AllocatorKind::RocmDevice => "rocm_device",
            AllocatorKind::VartTensor => "vart_tensor",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub(crate) enum BufferStorage {
    /// Contiguous host bytes.
    Cpu(Vec<u8>),
    /// Page-locked host bytes for DMA. Allocation is shadowed on the host;
    /// a real build pins through the driver.
    CpuPinned(Vec<u8>),
    /// Device memory, host-shadowed placeholder (real impl = device
    /// pointer + drop).
    RocmDevice(Vec<u8>),
    /// Accelerator tensor buffer with batch-major chunking: element
    /// `offset` lives in chunk `offset / chunk_len`.
    VartTensor { chunk_len: usize, chunks: Vec<Vec<u8>> },
}

#[derive(Debug)]
pub struct Buffer {
    allocator: AllocatorKind,
    storage: BufferStorage,
}

impl Buffer {
    pub(crate) fn new(allocator: AllocatorKind, storage: BufferStorage) -> Self {
        Self { allocator, storage }
    }

    pub fn allocator(&self) -> AllocatorKind {
        self.allocator
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            BufferStorage::Cpu(v) | BufferStorage::CpuPinned(v) | BufferStorage::RocmDevice(v) => {
                v.len()
            }
            BufferStorage::VartTensor { chunks, .. } => chunks.iter().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of the bytes starting at `offset`. For the segmented variant the
    /// offset is translated into a chunk index plus an intra-chunk offset,
    /// so the returned slice ends at the chunk boundary.
    pub fn data(&self, offset: usize) -> &[u8] {
        match &self.storage {
            BufferStorage::Cpu(v) | BufferStorage::CpuPinned(v) | BufferStorage::RocmDevice(v) => {
                &v[offset..]
            }
            BufferStorage::VartTensor { chunk_len, chunks } => {
                let chunk = offset / chunk_len;
                &chunks[chunk][offset % chunk_len..]
            }
        }
    }

    pub fn data_mut(&mut self, offset: usize) -> &mut [u8] {
        match &mut self.storage {
            BufferStorage::Cpu(v) | BufferStorage::CpuPinned(v) | BufferStorage::RocmDevice(v) => {
                &mut v[offset..]
            }
            BufferStorage::VartTensor { chunk_len, chunks } => {
                let chunk = offset / *chunk_len;
                &mut chunks[chunk][offset % *chunk_len..]
            }
        }
    }

    /// Copy `src` into the buffer at `offset`, crossing chunk boundaries if
    /// the variant is segmented. Returns the offset past the written bytes.
    pub fn write_bytes(&mut self, src: &[u8], offset: usize) -> usize {
        let mut written = 0;
        while written < src.len() {
            let dst = self.data_mut(offset + written);
            let n = dst.len().min(src.len() - written);
            dst[..n].copy_from_slice(&src[written..written + n]);
            written += n;
        }
        offset + src.len()
    }

    /// Write one plain value. Returns the offset past it.
    pub fn write<T: bytemuck::Pod>(&mut self, value: T, offset: usize) -> usize {
        self.write_bytes(bytemuck::bytes_of(&value), offset)
    }

    /// Write a string with a trailing nul, advancing by `len + 1`.
    pub fn write_str(&mut self, value: &str, offset: usize) -> usize {
        let end = self.write_bytes(value.as_bytes(), offset);
        self.write_bytes(&[0u8], end)
    }

    /// Read one plain value back out; tolerates unaligned storage.
    pub fn read<T: bytemuck::Pod>(&self, offset: usize) -> T {
        bytemuck::pod_read_unaligned(&self.data(offset)[..std::mem::size_of::<T>()])
    }

    pub(crate) fn into_storage(self) -> BufferStorage {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_values() {
        let mut buf = Buffer::new(AllocatorKind::Cpu, BufferStorage::Cpu(vec![0u8; 16]));
        let next = buf.write(41u32, 0);
        assert_eq!(next, 4);
        let next = buf.write(7u64, next);
        assert_eq!(next, 12);
        assert_eq!(buf.read::<u32>(0), 41);
        assert_eq!(buf.read::<u64>(4), 7);
    }

    #[test]
    fn write_str_appends_nul() {
        let mut buf = Buffer::new(AllocatorKind::Cpu, BufferStorage::Cpu(vec![0xff; 8]));
        let next = buf.write_str("abc", 1);
        assert_eq!(next, 5);
        assert_eq!(&buf.data(1)[..4], b"abc\0");
    }

    #[test]
    fn segmented_offset_translation() {
        let storage = BufferStorage::VartTensor {
            chunk_len: 4,
            chunks: vec![vec![0u8; 4], vec![0u8; 4], vec![0u8; 4]],
        };
        let mut buf = Buffer::new(AllocatorKind::VartTensor, storage);
        assert_eq!(buf.len(), 12);

        // Offset 6 lands in the second chunk, two bytes in.
        buf.write(0xabu8, 6);
        assert_eq!(buf.data(4)[2], 0xab);
        assert_eq!(buf.data(6).len(), 2);

        // A write spanning two chunks is stitched together.
        buf.write_bytes(&[1, 2, 3, 4], 2);
        assert_eq!(buf.data(0), &[0, 0, 1, 2]);
        assert_eq!(&buf.data(4)[..2], &[3, 4]);
    }
}
