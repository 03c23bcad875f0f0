//! `Hdf5Writer`: the in-memory builder that owns an allocator, the root
//! group's local heap and B-tree, and the file's global heap, and flushes
//! them to a `Write + Seek` sink on `close`.
//!
//! Mirrors the data/control flow spec.md §2 describes for a write: append
//! the link name, insert (offset, object-header-address) into the group's
//! B-tree, reserve any new structural block through the allocator, and at
//! close serialize every allocated record to its assigned offset.

use crate::alloc::{AllocKind, FileSpaceAllocator};
use crate::btree::GroupBTreeWriter;
use crate::error::Error;
use crate::fixed;
use crate::global_heap::GlobalHeapWriter;
use crate::local_heap::LocalHeapWriter;
use crate::object_header;
use crate::snod::Snod;
use crate::ste::SteCache;
use crate::superblock::{self, SuperblockWriter};
use crate::Hdf5Dtype;
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};

/// Tunable parameters for a new file. Defaults match the canonical values
/// spec.md §3/§9 calls out (groupLeafNodeK=4, groupInternalNodeK=16, a
/// 4 KiB global-heap block, an 88-byte initial local-heap contents region).
pub struct WriterConfig {
    pub offset_size: u8,
    pub length_size: u8,
    pub group_leaf_node_k: u16,
    pub group_internal_node_k: u16,
    pub global_heap_block_size: u64,
    pub initial_local_heap_size: u64,
    /// Capacity planned for a group's B-tree node, in leaf entries (each
    /// entry addressing one SNOD of up to `2 * group_leaf_node_k`
    /// children). The node is allocated once at this size; see the
    /// B-tree-node-split open question in DESIGN.md.
    pub max_btree_entries: usize,
    pub max_file_size: Option<u64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            offset_size: 8,
            length_size: 8,
            group_leaf_node_k: 4,
            group_internal_node_k: 16,
            global_heap_block_size: 4096,
            initial_local_heap_size: 88,
            max_btree_entries: 64,
            max_file_size: None,
        }
    }
}

struct GroupIndex {
    local_heap: LocalHeapWriter,
    btree: GroupBTreeWriter,
    subgroups: HashMap<String, GroupIndex>,
}

pub struct Hdf5Writer {
    config: WriterConfig,
    allocator: FileSpaceAllocator,
    global_heap: GlobalHeapWriter,
    root: GroupIndex,
    /// Object headers and raw dataset payloads, written verbatim to their
    /// allocator-assigned offset at close.
    pending_blocks: Vec<(u64, Vec<u8>)>,
}

impl Hdf5Writer {
    pub fn new(config: WriterConfig) -> Result<Self, Error> {
        let snod_block_size = Snod::slot_size(config.offset_size, config.group_leaf_node_k);
        let mut allocator = FileSpaceAllocator::new(config.global_heap_block_size, snod_block_size, config.max_file_size);

        allocator.allocate(AllocKind::Superblock, superblock::fixed_prefix_size(config.offset_size), 1)?;
        let ste_size = crate::ste::SymbolTableEntry::serialized_size(config.offset_size);
        allocator.allocate(AllocKind::RootSte, ste_size, 1)?;

        let root = new_group_index(&mut allocator, &config)?;

        Ok(Hdf5Writer {
            global_heap: GlobalHeapWriter::new(config.global_heap_block_size),
            allocator,
            root,
            config,
            pending_blocks: Vec::new(),
        })
    }

    /// Creates a dataset at `group_path` (slash-separated, empty for the
    /// root group), writing its dataspace/datatype/layout/fill-value
    /// object header and raw payload, and indexing it by `name` in that
    /// group's B-tree.
    pub fn create_dataset(
        &mut self,
        group_path: &str,
        name: &str,
        dimensions: &[u64],
        dtype: Hdf5Dtype,
        data: &[u8],
    ) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::invariant("a dataset name must not be empty"));
        }

        let data_record = self.allocator.allocate(AllocKind::DataBlock, data.len() as u64, 8)?;
        let header_bytes =
            object_header::build_dataset_header(dimensions, dtype, data_record.offset, data.len() as u64)?;
        let header_record = self.allocator.allocate(AllocKind::ObjectHeader, header_bytes.len() as u64, 8)?;

        self.pending_blocks.push((data_record.offset, data.to_vec()));
        self.pending_blocks.push((header_record.offset, header_bytes));

        let group = navigate_mut(&mut self.root, group_path)?;
        let link_name_offset = group.local_heap.add_to_heap(name.as_bytes(), &mut self.allocator)?;
        group.btree.add_dataset(&mut self.allocator, &group.local_heap, link_name_offset, header_record.offset, name)?;
        Ok(())
    }

    /// Creates a nested group named `name` under `parent_path`
    /// (slash-separated, empty for the root group).
    pub fn create_group(&mut self, parent_path: &str, name: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::invariant("a group name must not be empty"));
        }

        let child = new_group_index(&mut self.allocator, &self.config)?;
        let header_bytes = object_header::build_group_header(child.btree.node_offset, child.local_heap.header_offset)?;
        let header_record = self.allocator.allocate(AllocKind::ObjectHeader, header_bytes.len() as u64, 8)?;
        self.pending_blocks.push((header_record.offset, header_bytes));

        let parent = navigate_mut(&mut self.root, parent_path)?;
        let link_name_offset = parent.local_heap.add_to_heap(name.as_bytes(), &mut self.allocator)?;
        parent.btree.add_dataset(&mut self.allocator, &parent.local_heap, link_name_offset, header_record.offset, name)?;
        parent.subgroups.insert(name.to_string(), child);
        Ok(())
    }

    /// Adds `bytes` as a shared global-heap object, for callers building
    /// variable-length-typed payloads that embed a `GlobalHeapId`.
    pub fn add_global_heap_bytes(&mut self, bytes: &[u8]) -> Result<crate::global_heap::GlobalHeapId, Error> {
        self.global_heap.add_to_heap(bytes, &mut self.allocator)
    }

    /// Serializes every allocated record to its assigned offset: the
    /// superblock, the root group's (and every subgroup's) local heap,
    /// B-tree node, and SNODs, every global-heap block, and every pending
    /// object header / dataset payload.
    pub fn close<W: Write + Seek>(&mut self, w: &mut W) -> Result<(), Error> {
        let superblock = SuperblockWriter {
            offset_size: self.config.offset_size,
            length_size: self.config.length_size,
            group_leaf_node_k: self.config.group_leaf_node_k,
            group_internal_node_k: self.config.group_internal_node_k,
            base_address: 0,
            end_of_file_address: self.allocator.watermark(),
            root_ste: crate::ste::SymbolTableEntry {
                link_name_offset: 0,
                object_header_offset: fixed::undefined(self.config.offset_size),
                cache: SteCache::Group {
                    btree_offset: self.root.btree.node_offset,
                    local_heap_offset: self.root.local_heap.header_offset,
                },
            },
        };
        let mut buf = Vec::new();
        superblock.write_to(&mut buf)?;
        write_at(w, 0, &buf)?;

        write_group(w, &self.root, &self.config)?;

        for offset in self.global_heap.block_offsets().collect::<Vec<_>>() {
            let mut buf = Vec::new();
            self.global_heap.write_block_to(offset, &mut buf)?;
            write_at(w, offset, &buf)?;
        }

        for (offset, bytes) in &self.pending_blocks {
            write_at(w, *offset, bytes)?;
        }

        Ok(())
    }
}

fn navigate_mut<'a>(root: &'a mut GroupIndex, path: &str) -> Result<&'a mut GroupIndex, Error> {
    let mut current = root;
    if path.is_empty() {
        return Ok(current);
    }
    for segment in path.split('/') {
        current = current
            .subgroups
            .get_mut(segment)
            .ok_or_else(|| Error::invariant(format!("no such group: {:?}", segment)))?;
    }
    Ok(current)
}

fn new_group_index(allocator: &mut FileSpaceAllocator, config: &WriterConfig) -> Result<GroupIndex, Error> {
    let btree_slot_size = GroupBTreeWriter::slot_size(config.offset_size, config.length_size, config.max_btree_entries);
    let node_record = allocator.allocate(AllocKind::BTreeNode, btree_slot_size, 8)?;

    let header_record = allocator.allocate(AllocKind::LocalHeapHeader, 8 + 2 * config.length_size as u64 + config.offset_size as u64, 8)?;
    let contents_record = allocator.allocate(AllocKind::LocalHeapContents, config.initial_local_heap_size, 8)?;

    Ok(GroupIndex {
        local_heap: LocalHeapWriter::new(header_record.offset, contents_record.offset, contents_record.size, config.length_size),
        btree: GroupBTreeWriter::new(node_record.offset, config.max_btree_entries, config.group_leaf_node_k),
        subgroups: HashMap::new(),
    })
}

fn write_group<W: Write + Seek>(w: &mut W, group: &GroupIndex, config: &WriterConfig) -> Result<(), Error> {
    let mut header_buf = Vec::new();
    group.local_heap.write_header_to(&mut header_buf, config.offset_size, config.length_size)?;
    write_at(w, group.local_heap.header_offset, &header_buf)?;

    let mut contents_buf = Vec::new();
    group.local_heap.write_contents_to(&mut contents_buf)?;
    write_at(w, group.local_heap.contents_offset, &contents_buf)?;

    let slot_size = GroupBTreeWriter::slot_size(config.offset_size, config.length_size, config.max_btree_entries);
    let mut node_buf = Vec::new();
    group.btree.write_node_to(&mut node_buf, config.offset_size, config.length_size, slot_size)?;
    write_at(w, group.btree.node_offset, &node_buf)?;

    if !group.btree.is_empty() {
        for offset in group.btree.snod_offsets().collect::<Vec<_>>() {
            let mut snod_buf = Vec::new();
            group.btree.write_snod_to(offset, &mut snod_buf, config.offset_size)?;
            write_at(w, offset, &snod_buf)?;
        }
    }

    for child in group.subgroups.values() {
        write_group(w, child, config)?;
    }
    Ok(())
}

fn write_at<W: Write + Seek>(w: &mut W, offset: u64, bytes: &[u8]) -> Result<(), Error> {
    w.seek(SeekFrom::Start(offset))?;
    w.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn s1_empty_group_file_has_an_empty_btree_and_a_canonical_local_heap() {
        let mut writer = Hdf5Writer::new(WriterConfig::default()).unwrap();
        assert!(writer.root.btree.is_empty());
        assert_eq!(writer.root.local_heap.contents_size(), 88);

        let mut buf = Cursor::new(Vec::new());
        writer.close(&mut buf).unwrap();
        let contents = buf.into_inner();

        let superblock = crate::parse::superblock(&contents).unwrap().1;
        let node = crate::parse::hdf5_node(
            &contents[superblock.root_group_symbol_table_entry.address_of_btree as usize..],
            8,
            8,
        )
        .unwrap()
        .1;
        assert!(node.entries.is_empty());
    }

    #[test]
    fn s2_inserting_one_dataset_round_trips_through_the_parser() {
        let mut writer = Hdf5Writer::new(WriterConfig::default()).unwrap();
        writer.create_dataset("", "alpha", &[3], Hdf5Dtype::F64, &[0u8; 24]).unwrap();

        let mut buf = Cursor::new(Vec::new());
        writer.close(&mut buf).unwrap();
        let contents = buf.into_inner();

        let superblock = crate::parse::superblock(&contents).unwrap().1;
        assert_eq!(superblock.offset_size, 8);

        let mut visited = std::collections::HashSet::new();
        let entries = crate::btree::read_group_recursive(
            &contents,
            superblock.root_group_symbol_table_entry.address_of_btree,
            8,
            8,
            &mut visited,
        )
        .unwrap();
        assert_eq!(entries.len(), 1);

        let heap = crate::parse::local_heap(
            &contents[superblock.root_group_symbol_table_entry.address_of_name_heap as usize..],
            8,
            8,
        )
        .unwrap()
        .1;
        let name_start = (entries[0].link_name_offset + heap.address_of_data_segment) as usize;
        let name: String = contents[name_start..]
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        assert_eq!(name, "alpha");
    }

    #[test]
    fn s3_nine_datasets_in_order_split_into_two_snods() {
        let mut writer = Hdf5Writer::new(WriterConfig::default()).unwrap();
        for i in 1..=9 {
            let name = format!("d{}", i);
            writer.create_dataset("", &name, &[1], Hdf5Dtype::I32, &[0u8; 4]).unwrap();
        }
        assert_eq!(writer.root.btree.snod_offsets().count(), 2);
    }

    #[test]
    fn nested_group_header_points_back_at_its_own_btree_and_heap() {
        let mut writer = Hdf5Writer::new(WriterConfig::default()).unwrap();
        writer.create_group("", "subgroup").unwrap();
        writer.create_dataset("subgroup", "beta", &[2], Hdf5Dtype::I64, &[0u8; 16]).unwrap();

        let mut buf = Cursor::new(Vec::new());
        writer.close(&mut buf).unwrap();
        let contents = buf.into_inner();
        let superblock = crate::parse::superblock(&contents).unwrap().1;

        let mut visited = std::collections::HashSet::new();
        let root_entries = crate::btree::read_group_recursive(
            &contents,
            superblock.root_group_symbol_table_entry.address_of_btree,
            8,
            8,
            &mut visited,
        )
        .unwrap();
        assert_eq!(root_entries.len(), 1);

        let (_, object_header) = crate::parse::object_header(&contents[root_entries[0].object_header_address as usize..]).unwrap();
        assert_eq!(object_header.total_number_of_header_messages, 1);
    }
}
