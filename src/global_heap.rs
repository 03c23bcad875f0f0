//! The global heap: fixed-size blocks of reference-counted, shared
//! variable-length objects (variable-length strings, region references).
//!
//! Write side (`GlobalHeapWriter`) fills one block at a time, rolling over
//! to a fresh block when the current one has no room left for both the new
//! object and a closing null terminator. Read side (`GlobalHeapCache`) is a
//! caller-fed cache: nothing in this module reaches back into an I/O stream
//! on its own — a miss is reported, the caller supplies the block's bytes
//! via `feed_block`, and the lookup is retried.

use crate::alloc::FileSpaceAllocator;
use crate::error::Error;
use crate::fixed::pad8;
use std::collections::HashMap;
use std::io::Write;

/// A 16-byte reference into a global-heap block, embedded by user-level
/// datatypes that need to point at a shared variable-length object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeapId {
    pub object_size: u32,
    pub block_offset: u64,
    pub object_id: u32,
}

impl GlobalHeapId {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(&self.object_size.to_le_bytes())?;
        w.write_all(&self.block_offset.to_le_bytes())?;
        w.write_all(&self.object_id.to_le_bytes())?;
        Ok(())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 16 {
            return Err(Error::bounds("a global heap id is 16 bytes", None));
        }
        Ok(GlobalHeapId {
            object_size: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            block_offset: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            object_id: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }
}

struct BlockWriter {
    offset: u64,
    size: u64,
    objects: Vec<(u32, Vec<u8>)>,
    next_id: u32,
}

impl BlockWriter {
    fn used_size(&self) -> u64 {
        16 + self
            .objects
            .iter()
            .map(|(_, data)| 16 + data.len() as u64 + pad8(data.len()) as u64)
            .sum::<u64>()
    }
}

pub struct GlobalHeapWriter {
    blocks: Vec<BlockWriter>,
    block_size: u64,
}

impl GlobalHeapWriter {
    pub fn new(block_size: u64) -> Self {
        GlobalHeapWriter { blocks: Vec::new(), block_size }
    }

    fn ensure_first_block(&mut self, allocator: &mut FileSpaceAllocator) -> Result<(), Error> {
        if self.blocks.is_empty() {
            let record = allocator.allocate_first_global_heap_block()?;
            self.blocks.push(BlockWriter {
                offset: record.offset,
                size: record.size,
                objects: Vec::new(),
                next_id: 1,
            });
        }
        Ok(())
    }

    /// Adds `bytes` as a new shared object, rolling over to a new block
    /// (or, for an object too large for any standard block, expanding one)
    /// as needed.
    pub fn add_to_heap(&mut self, bytes: &[u8], allocator: &mut FileSpaceAllocator) -> Result<GlobalHeapId, Error> {
        self.ensure_first_block(allocator)?;

        let new_req = 16 + bytes.len() as u64 + pad8(bytes.len()) as u64;
        // An object whose header+data+terminator could never fit in a
        // standard-size block, even empty, needs a block grown to fit it
        // (Design Notes §9(iv)): rollover to a same-size block would never
        // terminate.
        let oversized = new_req + 16 > self.block_size;

        let cur = self.blocks.last().unwrap();
        if cur.used_size() + new_req + 16 > cur.size {
            if oversized {
                let existing = cur.used_size() - 16;
                let new_size = 16 + existing + new_req + 16;
                let record = allocator.expand_global_heap_block(new_size)?;
                let old = self.blocks.pop().unwrap();
                self.blocks.push(BlockWriter {
                    offset: record.offset,
                    size: record.size,
                    objects: old.objects,
                    next_id: old.next_id,
                });
            } else {
                let record = allocator.allocate_next_global_heap_block()?;
                self.blocks.push(BlockWriter {
                    offset: record.offset,
                    size: record.size,
                    objects: Vec::new(),
                    next_id: 1,
                });
            }
        }

        let block = self.blocks.last_mut().unwrap();
        if block.next_id > 0xFFFF {
            return Err(Error::invariant("global heap object id would exceed 0xFFFF"));
        }
        let id = block.next_id;
        block.next_id += 1;
        block.objects.push((id, bytes.to_vec()));

        Ok(GlobalHeapId { object_size: bytes.len() as u32, block_offset: block.offset, object_id: id })
    }

    pub fn block_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.blocks.iter().map(|b| b.offset)
    }

    pub fn write_block_to<W: Write>(&self, offset: u64, w: &mut W) -> Result<(), Error> {
        let block = self
            .blocks
            .iter()
            .find(|b| b.offset == offset)
            .ok_or_else(|| Error::invariant("no global heap block at that offset"))?;

        w.write_all(b"GCOL")?;
        w.write_all(&[1, 0, 0, 0])?; // version 1, reserved
        w.write_all(&block.size.to_le_bytes())?;

        let mut written: u64 = 16;
        for (id, data) in &block.objects {
            w.write_all(&(*id as u16).to_le_bytes())?;
            w.write_all(&0u16.to_le_bytes())?; // reference count
            w.write_all(&0u32.to_le_bytes())?; // reserved
            w.write_all(&(data.len() as u64).to_le_bytes())?;
            w.write_all(data)?;
            let pad = pad8(data.len());
            w.write_all(&vec![0u8; pad])?;
            written += 16 + data.len() as u64 + pad as u64;
        }

        let free_space = block.size - written - 16;
        w.write_all(&0u16.to_le_bytes())?; // null terminator object id
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&free_space.to_le_bytes())?;
        w.write_all(&vec![0u8; free_space as usize])?;
        Ok(())
    }
}

/// A single loaded global-heap block, indexed by object id for `O(1)`
/// lookups after the first parse.
struct LoadedBlock {
    objects: HashMap<u32, Vec<u8>>,
}

/// Caller-fed cache over global-heap blocks read from the file.
///
/// The core never owns or reaches into an I/O stream: a cache miss is
/// surfaced to the caller as `None`/`Err`, and the caller is expected to
/// position its own reader at the block offset, read the bytes, and call
/// `feed_block`.
#[derive(Default)]
pub struct GlobalHeapCache {
    blocks: HashMap<u64, LoadedBlock>,
}

impl GlobalHeapCache {
    pub fn new() -> Self {
        GlobalHeapCache { blocks: HashMap::new() }
    }

    pub fn is_resident(&self, block_offset: u64) -> bool {
        self.blocks.contains_key(&block_offset)
    }

    /// Parses a raw `GCOL` block and makes its objects available for
    /// lookup under `block_offset`.
    pub fn feed_block(&mut self, block_offset: u64, raw: &[u8]) -> Result<(), Error> {
        let objects = parse_block(raw, block_offset)?;
        self.blocks.insert(block_offset, LoadedBlock { objects });
        Ok(())
    }

    /// Returns the bytes of `object_id` inside the block at `block_offset`.
    /// The block must already be resident (see `feed_block`); object id 0
    /// (the null terminator) is never a valid request.
    pub fn get_data_bytes(&self, block_offset: u64, object_id: u32) -> Result<&[u8], Error> {
        if object_id == 0 {
            return Err(Error::invariant("global heap object id 0 is the null terminator, not a real object"));
        }
        let block = self.blocks.get(&block_offset).ok_or_else(|| {
            Error::invariant("global heap block is not resident in the cache; call feed_block first")
        })?;
        block
            .objects
            .get(&object_id)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::integrity(format!("global heap object {} not found in block", object_id), Some(block_offset)))
    }

    /// Convenience wrapper around `feed_block` + `get_data_bytes` for
    /// callers happy to supply a loader closure, matching the
    /// `lazyLoadGlobalHeapBlock` collaborator the format's read path
    /// expects.
    pub fn get_data_bytes_with<F>(&mut self, block_offset: u64, object_id: u32, mut loader: F) -> Result<&[u8], Error>
    where
        F: FnMut(u64) -> Result<Vec<u8>, Error>,
    {
        if !self.is_resident(block_offset) {
            let raw = loader(block_offset)?;
            self.feed_block(block_offset, &raw)?;
        }
        self.get_data_bytes(block_offset, object_id)
    }
}

fn parse_block(raw: &[u8], block_offset: u64) -> Result<HashMap<u32, Vec<u8>>, Error> {
    if raw.len() < 16 || &raw[0..4] != b"GCOL" {
        return Err(Error::format("bad global heap collection signature", Some(block_offset)));
    }
    if raw[4] != 1 {
        return Err(Error::format(format!("unsupported global heap version {}", raw[4]), Some(block_offset)));
    }
    let total_size = u64::from_le_bytes(raw[8..16].try_into().unwrap());
    if total_size as usize > raw.len() {
        return Err(Error::bounds("global heap block shorter than its declared size", Some(block_offset)));
    }

    let mut objects = HashMap::new();
    let mut pos = 16usize;
    loop {
        if pos + 16 > total_size as usize {
            return Err(Error::integrity("global heap block has no null terminator", Some(block_offset)));
        }
        let id = u16::from_le_bytes(raw[pos..pos + 2].try_into().unwrap()) as u32;
        let _ref_count = u16::from_le_bytes(raw[pos + 2..pos + 4].try_into().unwrap());
        let size = u64::from_le_bytes(raw[pos + 8..pos + 16].try_into().unwrap());
        pos += 16;
        if id == 0 {
            break;
        }
        if pos + size as usize > total_size as usize {
            return Err(Error::bounds("global heap object runs past the block", Some(block_offset)));
        }
        if objects.contains_key(&id) {
            return Err(Error::integrity(format!("duplicate global heap object id {}", id), Some(block_offset)));
        }
        objects.insert(id, raw[pos..pos + size as usize].to_vec());
        pos += size as usize + pad8(size as usize);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::FileSpaceAllocator;

    #[test]
    fn writes_and_reads_back_a_small_object() {
        let mut allocator = FileSpaceAllocator::new(4096, 328, None);
        let mut heap = GlobalHeapWriter::new(4096);
        let id = heap.add_to_heap(b"hello, heap", &mut allocator).unwrap();

        let mut buf = Vec::new();
        heap.write_block_to(id.block_offset, &mut buf).unwrap();

        let mut cache = GlobalHeapCache::new();
        cache.feed_block(id.block_offset, &buf).unwrap();
        assert_eq!(cache.get_data_bytes(id.block_offset, id.object_id).unwrap(), b"hello, heap");
    }

    #[test]
    fn rolls_over_to_a_new_block_when_full() {
        let mut allocator = FileSpaceAllocator::new(4096, 328, None);
        let mut heap = GlobalHeapWriter::new(4096);
        let mut ids = Vec::new();
        for _ in 0..300 {
            ids.push(heap.add_to_heap(&[0u8; 8], &mut allocator).unwrap());
        }
        let distinct_blocks: std::collections::HashSet<_> = ids.iter().map(|id| id.block_offset).collect();
        assert!(distinct_blocks.len() >= 2, "300 small objects in 4096-byte blocks must roll over");

        let mut last = ids[0].block_offset;
        for id in &ids {
            assert!(id.block_offset >= last, "block offsets must never decrease");
            last = id.block_offset;
        }
    }

    #[test]
    fn object_zero_is_rejected() {
        let cache = GlobalHeapCache::new();
        assert!(cache.get_data_bytes(0, 0).is_err());
    }
}
