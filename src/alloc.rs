//! Bump-pointer file-space allocator.
//!
//! Every structural block in a file this crate writes — the superblock,
//! the root symbol table entry, local-heap header and contents, B-tree
//! nodes, SNOD slots, global-heap blocks, object headers, and dataset data
//! blocks — gets its offset from here, and only from here. Addresses are
//! handed out in non-decreasing order, which is what makes the output
//! reproducible: the same sequence of `allocate` calls always yields the
//! same file layout.

use crate::error::Error;
use crate::fixed::round_up;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    Superblock,
    RootSte,
    LocalHeapHeader,
    LocalHeapContents,
    BTreeNode,
    SnodBlock,
    GlobalHeapBlock,
    ObjectHeader,
    DataBlock,
}

#[derive(Debug, Clone, Copy)]
pub struct AllocRecord {
    pub kind: AllocKind,
    pub offset: u64,
    pub size: u64,
}

pub struct FileSpaceAllocator {
    watermark: u64,
    max_file_size: Option<u64>,
    records: Vec<AllocRecord>,
    block_size: u64,
    snod_block_size: u64,
}

impl FileSpaceAllocator {
    pub fn new(block_size: u64, snod_block_size: u64, max_file_size: Option<u64>) -> Self {
        FileSpaceAllocator {
            watermark: 0,
            max_file_size,
            records: Vec::new(),
            block_size,
            snod_block_size,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn records(&self) -> &[AllocRecord] {
        &self.records
    }

    pub fn allocate(&mut self, kind: AllocKind, size: u64, alignment: u64) -> Result<AllocRecord, Error> {
        let offset = round_up(self.watermark, alignment.max(1));
        let end = offset
            .checked_add(size)
            .ok_or_else(|| Error::invariant("allocation size overflows a u64 file offset"))?;
        if let Some(cap) = self.max_file_size {
            if end > cap {
                return Err(Error::invariant(format!(
                    "allocating {} bytes at {:?} would exceed the configured file-size cap of {} bytes",
                    size, kind, cap
                )));
            }
        }
        let record = AllocRecord { kind, offset, size };
        self.records.push(record);
        self.watermark = end;
        Ok(record)
    }

    /// Allocates the first global-heap block. Block-size aligned.
    pub fn allocate_first_global_heap_block(&mut self) -> Result<AllocRecord, Error> {
        let size = self.block_size;
        self.allocate(AllocKind::GlobalHeapBlock, size, size)
    }

    /// Allocates a fresh, standard-size global-heap block, used when the
    /// current block is declared full.
    pub fn allocate_next_global_heap_block(&mut self) -> Result<AllocRecord, Error> {
        let size = self.block_size;
        self.allocate(AllocKind::GlobalHeapBlock, size, size)
    }

    /// Allocates a larger contiguous global-heap block, replacing the
    /// current one, to hold a single object that would never fit in a
    /// standard-size block.
    pub fn expand_global_heap_block(&mut self, new_size: u64) -> Result<AllocRecord, Error> {
        self.allocate(AllocKind::GlobalHeapBlock, new_size, self.block_size)
    }

    /// Allocates one fixed-size SNOD slot.
    pub fn allocate_next_snod_storage(&mut self) -> Result<AllocRecord, Error> {
        let size = self.snod_block_size;
        self.allocate(AllocKind::SnodBlock, size, 8)
    }

    /// Allocates a new, larger local-heap contents region. The caller is
    /// responsible for copying the old contents into it; the old region is
    /// abandoned (this allocator never relocates or frees records).
    pub fn expand_local_heap_contents(&mut self, current_size: u64) -> Result<AllocRecord, Error> {
        let new_size = current_size.saturating_mul(2).max(8);
        self.allocate(AllocKind::LocalHeapContents, new_size, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_never_overlap() {
        let mut alloc = FileSpaceAllocator::new(4096, 328, None);
        let a = alloc.allocate(AllocKind::Superblock, 57, 1).unwrap();
        let b = alloc.allocate(AllocKind::RootSte, 40, 1).unwrap();
        let c = alloc.allocate(AllocKind::LocalHeapHeader, 32, 8).unwrap();
        for (r1, r2) in [(a, b), (b, c)] {
            assert!(r1.offset + r1.size <= r2.offset);
        }
    }

    #[test]
    fn offsets_never_decrease() {
        let mut alloc = FileSpaceAllocator::new(4096, 328, None);
        let mut last = 0;
        for _ in 0..10 {
            let r = alloc.allocate(AllocKind::SnodBlock, 328, 8).unwrap();
            assert!(r.offset >= last);
            last = r.offset;
        }
    }

    #[test]
    fn exceeding_the_file_size_cap_is_fatal() {
        let mut alloc = FileSpaceAllocator::new(4096, 328, Some(100));
        assert!(alloc.allocate(AllocKind::DataBlock, 200, 8).is_err());
    }
}
