//! The local heap: a packed, null-terminated byte store for link names,
//! one per group.
//!
//! Append-only from the writer's point of view, with a single free-block
//! record tracking the tail of unused space. Growth doubles the contents
//! region in place (a fresh, larger allocation; the old one is abandoned,
//! matching `FileSpaceAllocator::expand_local_heap_contents`).

use crate::alloc::FileSpaceAllocator;
use crate::error::Error;
use crate::fixed::round_up;
use std::io::Write;

/// `freeListOffset`'s "contents are full, there is no free space" sentinel.
const FREE_LIST_FULL: u64 = 1;

pub struct LocalHeapWriter {
    pub header_offset: u64,
    pub contents_offset: u64,
    contents_size: u64,
    contents: Vec<u8>,
    free_list_offset: u64,
    length_size: u8,
}

impl LocalHeapWriter {
    /// Creates a new heap over an already-allocated header/contents pair.
    /// The first 8 bytes of the contents are reserved for the empty string,
    /// matching the convention that a group's own (unnamed) entry resolves
    /// to offset 0. The free-block record occupies two `length_size`-wide
    /// words (spec.md §4.3), so the contents region must have room for at
    /// least that much beyond the reserved prefix to start out non-full.
    pub fn new(header_offset: u64, contents_offset: u64, contents_size: u64, length_size: u8) -> Self {
        let mut heap = LocalHeapWriter {
            header_offset,
            contents_offset,
            contents_size,
            contents: vec![0u8; contents_size as usize],
            free_list_offset: FREE_LIST_FULL,
            length_size,
        };
        let free_record_size = 2 * length_size as u64;
        if contents_size > 8 && contents_size - 8 >= free_record_size {
            heap.write_free_block_record(8, contents_size - 8);
            heap.free_list_offset = 8;
        } else {
            heap.free_list_offset = FREE_LIST_FULL;
        }
        heap
    }

    pub fn contents_size(&self) -> u64 {
        self.contents_size
    }

    fn write_free_block_record(&mut self, at: u64, size: u64) {
        let at = at as usize;
        let w = self.length_size as usize;
        self.contents[at..at + w].copy_from_slice(&FREE_LIST_FULL.to_le_bytes()[..w]);
        self.contents[at + w..at + 2 * w].copy_from_slice(&size.to_le_bytes()[..w]);
    }

    /// Appends `bytes` plus a null terminator, 8-byte aligned, and returns
    /// the offset the caller should persist as the link-name-offset.
    pub fn add_to_heap(&mut self, bytes: &[u8], allocator: &mut FileSpaceAllocator) -> Result<u64, Error> {
        let required = round_up(bytes.len() as u64 + 1, 8);
        let free_record_size = 2 * self.length_size as u64;

        let mut cur = if self.free_list_offset != FREE_LIST_FULL {
            self.free_list_offset
        } else {
            self.contents_size
        };

        while cur + required > self.contents_size {
            let record = allocator.expand_local_heap_contents(self.contents_size)?;
            let mut grown = vec![0u8; record.size as usize];
            grown[..self.contents.len()].copy_from_slice(&self.contents);
            self.contents = grown;
            self.contents_size = record.size;
            self.contents_offset = record.offset;
        }

        let cur_usize = cur as usize;
        self.contents[cur_usize..cur_usize + bytes.len()].copy_from_slice(bytes);
        self.contents[cur_usize + bytes.len()] = 0;
        for b in &mut self.contents[cur_usize + bytes.len() + 1..cur_usize + required as usize] {
            *b = 0;
        }

        let new_free = cur + required;
        if self.contents_size - new_free >= free_record_size {
            self.write_free_block_record(new_free, self.contents_size - new_free);
            self.free_list_offset = new_free;
        } else if new_free == self.contents_size {
            self.free_list_offset = FREE_LIST_FULL;
        } else {
            self.free_list_offset = new_free;
        }

        Ok(cur)
    }

    /// Reads the null-terminated string starting at `offset`.
    pub fn parse_string_at_offset(&self, offset: u64) -> Result<String, Error> {
        let offset = offset as usize;
        if offset >= self.contents.len() {
            return Err(Error::bounds(
                "local-heap offset is beyond the contents region",
                Some(self.contents_offset + offset as u64),
            ));
        }
        let end = self.contents[offset..]
            .iter()
            .position(|b| *b == 0)
            .map(|p| offset + p)
            .unwrap_or(self.contents.len());
        Ok(String::from_utf8_lossy(&self.contents[offset..end]).into_owned())
    }

    pub fn write_header_to<W: Write>(&self, w: &mut W, offset_size: u8, length_size: u8) -> Result<(), Error> {
        w.write_all(b"HEAP")?;
        w.write_all(&[0u8; 4])?; // version 0, reserved[3]
        crate::fixed::write(w, length_size, self.contents_size)?;
        crate::fixed::write(w, length_size, self.free_list_offset)?;
        crate::fixed::write(w, offset_size, self.contents_offset)?;
        Ok(())
    }

    pub fn write_contents_to<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(&self.contents)?;
        Ok(())
    }
}

/// Resolves a local-heap offset to the name stored there — the
/// `datasetNameForLinkNameOffset` callback the B-tree insert algorithm
/// needs to keep SNOD entries sorted by name rather than by offset.
pub trait NameResolver {
    fn name_for_link_offset(&self, offset: u64) -> Result<String, Error>;
}

impl NameResolver for LocalHeapWriter {
    fn name_for_link_offset(&self, offset: u64) -> Result<String, Error> {
        self.parse_string_at_offset(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{AllocKind, FileSpaceAllocator};

    fn new_heap() -> (LocalHeapWriter, FileSpaceAllocator) {
        let mut allocator = FileSpaceAllocator::new(4096, 328, None);
        let header = allocator.allocate(AllocKind::LocalHeapHeader, 32, 8).unwrap();
        let contents = allocator.allocate(AllocKind::LocalHeapContents, 88, 8).unwrap();
        (LocalHeapWriter::new(header.offset, contents.offset, 88, 8), allocator)
    }

    #[test]
    fn round_trips_a_single_name() {
        let (mut heap, mut allocator) = new_heap();
        let offset = heap.add_to_heap(b"alpha", &mut allocator).unwrap();
        assert_eq!(heap.parse_string_at_offset(offset).unwrap(), "alpha");
    }

    #[test]
    fn grows_when_the_contents_region_fills_up() {
        let (mut heap, mut allocator) = new_heap();
        let mut offsets = Vec::new();
        for i in 0..20 {
            let name = format!("name-number-{:03}", i);
            offsets.push((name.clone(), heap.add_to_heap(name.as_bytes(), &mut allocator).unwrap()));
        }
        assert!(heap.contents_size() > 88);
        for (name, offset) in offsets {
            assert_eq!(heap.parse_string_at_offset(offset).unwrap(), name);
        }
    }
}
