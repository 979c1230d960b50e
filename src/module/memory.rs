//! Linear memory access
//!
//! A module's linear memory may grow during any call into the module, which
//! detaches every view taken before the call. Views here borrow the module,
//! so the borrow checker refuses to keep one alive across a module call:
//! re-derive the view from freshly queried offsets after every call.

use crate::error::{HostError, HostResult};

/// Size of one linear memory page
pub const PAGE_SIZE: usize = 65536;

/// Byte-addressable memory owned by a computational module.
pub trait LinearMemory {
    /// Current size in bytes.
    fn size(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// Callers go through [`MemoryView`], which checks bounds first.
    fn read_at(&self, offset: usize, dst: &mut [u8]);

    /// Copy `src` into memory starting at `offset`.
    fn write_at(&mut self, offset: usize, src: &[u8]);
}

fn check_range(offset: usize, len: usize, size: usize) -> HostResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(HostError::OutOfBounds { offset, len, size }),
    }
}

/// Read-only window into linear memory, valid until the next module call.
pub struct MemoryView<'m, M: LinearMemory + ?Sized> {
    memory: &'m M,
    offset: usize,
    len: usize,
}

impl<'m, M: LinearMemory + ?Sized> MemoryView<'m, M> {
    /// Derive a view over `len` bytes at `offset` of the memory as it is now.
    pub fn new(memory: &'m M, offset: usize, len: usize) -> HostResult<Self> {
        check_range(offset, len, memory.size())?;
        Ok(Self {
            memory,
            offset,
            len,
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the viewed bytes into `dst`, which must be exactly `len()` long
    pub fn copy_to(&self, dst: &mut [u8]) -> HostResult<()> {
        if dst.len() != self.len {
            return Err(HostError::LengthMismatch {
                expected: self.len,
                actual: dst.len(),
            });
        }
        self.memory.read_at(self.offset, dst);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.memory.read_at(self.offset, &mut out);
        out
    }
}

/// Writable window into linear memory, valid until the next module call.
pub struct MemoryViewMut<'m, M: LinearMemory + ?Sized> {
    memory: &'m mut M,
    offset: usize,
    len: usize,
}

impl<'m, M: LinearMemory + ?Sized> MemoryViewMut<'m, M> {
    pub fn new(memory: &'m mut M, offset: usize, len: usize) -> HostResult<Self> {
        check_range(offset, len, memory.size())?;
        Ok(Self {
            memory,
            offset,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Overwrite the viewed bytes with `src`, which must be exactly `len()` long
    pub fn copy_from(&mut self, src: &[u8]) -> HostResult<()> {
        if src.len() != self.len {
            return Err(HostError::LengthMismatch {
                expected: self.len,
                actual: src.len(),
            });
        }
        self.memory.write_at(self.offset, src);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.memory.read_at(self.offset, &mut out);
        out
    }
}

/// Read a NUL-terminated byte string starting at `offset`.
///
/// Scans up to the end of current memory instead of a fixed window, so blobs
/// of any length are accepted.
pub fn read_nul_terminated<M: LinearMemory + ?Sized>(
    memory: &M,
    offset: usize,
) -> HostResult<Vec<u8>> {
    const CHUNK: usize = 4096;

    let size = memory.size();
    check_range(offset, 0, size)?;

    let mut out = Vec::new();
    let mut cursor = offset;
    let mut chunk = [0u8; CHUNK];
    while cursor < size {
        let len = CHUNK.min(size - cursor);
        let view = MemoryView::new(memory, cursor, len)?;
        view.copy_to(&mut chunk[..len])?;
        if let Some(end) = chunk[..len].iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..end]);
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..len]);
        cursor += len;
    }
    Err(HostError::UnterminatedState)
}

/// Growable in-process linear memory with a bump allocator.
///
/// Behaves like a wasm memory: whole pages, grows but never shrinks, and
/// growth may move the backing storage.
#[derive(Debug, Clone)]
pub struct HeapMemory {
    bytes: Vec<u8>,
    heap_top: usize,
}

/// Bytes reserved below the heap so that offset 0 is never handed out
const HEAP_BASE: usize = 1024;

impl Default for HeapMemory {
    fn default() -> Self {
        Self::with_pages(1)
    }
}

impl HeapMemory {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            bytes: vec![0; pages.max(1) * PAGE_SIZE],
            heap_top: HEAP_BASE,
        }
    }

    pub fn pages(&self) -> usize {
        self.bytes.len() / PAGE_SIZE
    }

    /// Grow by `pages`, returning the previous page count
    pub fn grow(&mut self, pages: usize) -> usize {
        let previous = self.pages();
        self.bytes.resize((previous + pages) * PAGE_SIZE, 0);
        previous
    }

    /// Reserve `size` bytes aligned to `align`, growing memory if needed
    pub fn alloc(&mut self, size: usize, align: usize) -> usize {
        let align = align.max(1);
        let start = self.heap_top.div_ceil(align) * align;
        let end = start + size;
        if end > self.bytes.len() {
            let needed = end.div_ceil(PAGE_SIZE) - self.pages();
            self.grow(needed);
        }
        self.heap_top = end;
        start
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl LinearMemory for HeapMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        dst.copy_from_slice(&self.bytes[offset..offset + dst.len()]);
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) {
        self.bytes[offset..offset + src.len()].copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_rejects_out_of_bounds() {
        let memory = HeapMemory::with_pages(1);
        assert!(MemoryView::new(&memory, 0, PAGE_SIZE).is_ok());
        assert_eq!(
            MemoryView::new(&memory, PAGE_SIZE - 4, 8).err(),
            Some(HostError::OutOfBounds {
                offset: PAGE_SIZE - 4,
                len: 8,
                size: PAGE_SIZE,
            })
        );
        // Overflowing offset + len must not wrap into a valid range
        assert!(MemoryView::new(&memory, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_view_rederived_after_growth_sees_same_bytes() {
        let mut memory = HeapMemory::with_pages(1);
        let ptr = memory.alloc(4, 4);
        MemoryViewMut::new(&mut memory, ptr, 4)
            .unwrap()
            .copy_from(&[1, 2, 3, 4])
            .unwrap();

        // Allocation past the first page grows (and may move) the storage
        let big = memory.alloc(PAGE_SIZE * 2, 8);
        assert!(memory.pages() >= 3);
        assert!(big + PAGE_SIZE * 2 <= memory.size());

        let view = MemoryView::new(&memory, ptr, 4).unwrap();
        assert_eq!(view.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_length_mismatch() {
        let mut memory = HeapMemory::default();
        let mut view = MemoryViewMut::new(&mut memory, 2048, 4).unwrap();
        assert_eq!(
            view.copy_from(&[0; 3]),
            Err(HostError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_alloc_never_returns_null() {
        let mut memory = HeapMemory::default();
        let a = memory.alloc(20, 4);
        let b = memory.alloc(1, 1);
        assert!(a >= HEAP_BASE);
        assert_eq!(a % 4, 0);
        assert_eq!(b, a + 20);
    }

    #[test]
    fn test_read_nul_terminated_spans_chunks() {
        let mut memory = HeapMemory::with_pages(1);
        let text = vec![b'a'; 5000];
        let ptr = memory.alloc(text.len() + 1, 1);
        memory.write_at(ptr, &text);
        memory.write_at(ptr + text.len(), &[0]);

        let read = read_nul_terminated(&memory, ptr).unwrap();
        assert_eq!(read.len(), 5000);
    }

    #[test]
    fn test_read_nul_terminated_missing_terminator() {
        let mut memory = HeapMemory::with_pages(1);
        let end = memory.size();
        memory.bytes_mut()[end - 8..].fill(b'x');
        assert_eq!(
            read_nul_terminated(&memory, end - 8),
            Err(HostError::UnterminatedState)
        );
    }
}
