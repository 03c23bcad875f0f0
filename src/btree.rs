//! The group B-tree: a version-1 B-tree (node type 0) indexing a group's
//! children. This is the hardest subsystem in the repository — see
//! spec.md §4.6 for the full algorithm; this module implements the read
//! side (recursive descent with cycle detection, generalized to any
//! depth) and the write side (the single-node-regime insert + SNOD split
//! the spec scopes as canonical; see `DESIGN.md` for the B-tree-node-split
//! open question).

use crate::alloc::{AllocKind, FileSpaceAllocator};
use crate::error::Error;
use crate::local_heap::NameResolver;
use crate::parse;
use crate::snod::{self, Snod};
use crate::ste::{SteCache, SymbolTableEntry};
use std::collections::HashSet;
use std::io::Write;

// ---------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------

/// Recursively descends a group B-tree starting at `offset`, collecting
/// every symbol table entry found in the leaf SNODs. Detects cycles by
/// offset: any node offset revisited during the same descent is fatal.
pub fn read_group_recursive(
    contents: &[u8],
    offset: u64,
    offset_size: u8,
    length_size: u8,
    visited: &mut HashSet<u64>,
) -> Result<Vec<parse::SymbolTableEntry>, Error> {
    if offset as usize >= contents.len() {
        return Err(Error::bounds("B-tree node offset is beyond the end of the file", Some(offset)));
    }
    if !visited.insert(offset) {
        return Err(Error::integrity(format!("cycle detected: B-tree node at offset {} visited twice", offset), Some(offset)));
    }

    let node = parse::hdf5_node(&contents[offset as usize..], offset_size, length_size)?.1;

    let mut out = Vec::new();
    for entry in &node.entries {
        if entry.child_pointer as usize >= contents.len() {
            return Err(Error::bounds("B-tree child pointer is beyond the end of the file", Some(entry.child_pointer)));
        }
        if node.node_level == 0 {
            let table = parse::symbol_table(&contents[entry.child_pointer as usize..], offset_size)?.1;
            out.extend(table.entries);
        } else {
            out.extend(read_group_recursive(contents, entry.child_pointer, offset_size, length_size, visited)?);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------

struct LeafEntry {
    max_key: u64,
    max_name: String,
    snod_offset: u64,
    snod: Snod,
}

/// Builds a single group B-tree node (level 0) over a growing set of
/// SNODs, splitting an SNOD once it overflows `2 * group_leaf_node_k`
/// entries.
///
/// B-tree-node split — raising the tree past level 0 when the node's own
/// entry capacity is exceeded — is out of scope here; see DESIGN.md. The
/// node is allocated once, sized for `max_entries` children.
pub struct GroupBTreeWriter {
    pub node_offset: u64,
    max_entries: usize,
    group_leaf_node_k: u16,
    entries: Vec<LeafEntry>,
}

impl GroupBTreeWriter {
    pub fn new(node_offset: u64, max_entries: usize, group_leaf_node_k: u16) -> Self {
        GroupBTreeWriter { node_offset, max_entries, group_leaf_node_k, entries: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The on-disk size of a B-tree node slot sized for `max_entries`
    /// children, for the given offset/length widths.
    pub fn slot_size(offset_size: u8, length_size: u8, max_entries: usize) -> u64 {
        let header = 4 + 1 + 1 + 2 + 2 * offset_size as u64;
        let leading_key = length_size as u64;
        let entry = offset_size as u64 + length_size as u64;
        header + leading_key + max_entries as u64 * entry
    }

    /// Inserts a new link into the tree, resolving placement by the
    /// *name* the new and existing entries' link-name-offsets resolve to
    /// (not by the numeric offset itself) — this is the asymmetry spec.md
    /// §4.6 calls out deliberately.
    pub fn add_dataset(
        &mut self,
        allocator: &mut FileSpaceAllocator,
        names: &impl NameResolver,
        link_name_offset: u64,
        object_header_offset: u64,
        dataset_name: &str,
    ) -> Result<(), Error> {
        let ste = SymbolTableEntry { link_name_offset, object_header_offset, cache: SteCache::None };

        if self.entries.is_empty() {
            if self.max_entries == 0 {
                return Err(Error::invariant("B-tree node has no room for any entries"));
            }
            let record = allocator.allocate_next_snod_storage()?;
            let mut snod = Snod::new();
            snod.insert(0, ste);
            self.entries.push(LeafEntry {
                max_key: link_name_offset,
                max_name: dataset_name.to_string(),
                snod_offset: record.offset,
                snod,
            });
            return Ok(());
        }

        // Find the smallest index whose stored max-name is >= the new
        // name; fall back to the last index (the new entry belongs at the
        // tail of the last SNOD).
        let idx = self
            .entries
            .iter()
            .position(|e| e.max_name.as_str() >= dataset_name)
            .unwrap_or(self.entries.len() - 1);

        let pos = {
            let snod = &self.entries[idx].snod;
            let mut pos = snod.entries.len();
            for (i, existing) in snod.entries.iter().enumerate() {
                let existing_name = names.name_for_link_offset(existing.link_name_offset)?;
                if existing_name.as_str() >= dataset_name {
                    pos = i;
                    break;
                }
            }
            pos
        };
        self.entries[idx].snod.insert(pos, ste);
        self.recompute_max(idx, names)?;

        if self.entries[idx].snod.entries.len() > snod::max_entries(self.group_leaf_node_k) {
            self.split_snod(idx, allocator, names)?;
        }

        Ok(())
    }

    fn recompute_max(&mut self, idx: usize, names: &impl NameResolver) -> Result<(), Error> {
        let (name, key) = max_name_in(&self.entries[idx].snod, names)?;
        self.entries[idx].max_name = name;
        self.entries[idx].max_key = key;
        Ok(())
    }

    /// §4.6.1: moves entries `[4, end)` of the overflowing SNOD into a
    /// freshly allocated SNOD, recomputes both halves' max-name keys, and
    /// inserts the new B-tree entry immediately after the original —
    /// sliding it further if a defensive check finds the ordering broken.
    fn split_snod(&mut self, idx: usize, allocator: &mut FileSpaceAllocator, names: &impl NameResolver) -> Result<(), Error> {
        if self.entries.len() >= self.max_entries {
            return Err(Error::invariant(
                "group B-tree node is full; splitting the node itself (raising tree level) is not supported",
            ));
        }

        let right_snod = self.entries[idx].snod.split(self.group_leaf_node_k);
        self.recompute_max(idx, names)?;

        let right_offset = allocator.allocate_next_snod_storage()?.offset;
        let (right_name, right_key) = max_name_in(&right_snod, names)?;

        self.entries.insert(idx + 1, LeafEntry {
            max_key: right_key,
            max_name: right_name,
            snod_offset: right_offset,
            snod: right_snod,
        });

        let mut i = idx + 1;
        while i + 1 < self.entries.len() && self.entries[i].max_name > self.entries[i + 1].max_name {
            self.entries.swap(i, i + 1);
            i += 1;
        }
        Ok(())
    }

    pub fn snod_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.snod_offset)
    }

    pub fn write_snod_to<W: Write>(&self, offset: u64, w: &mut W, offset_size: u8) -> Result<(), Error> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.snod_offset == offset)
            .ok_or_else(|| Error::invariant("no SNOD at that offset"))?;
        entry.snod.write_to(w, offset_size, Snod::slot_size(offset_size, self.group_leaf_node_k))
    }

    pub fn write_node_to<W: Write>(&self, w: &mut W, offset_size: u8, length_size: u8, slot_size: u64) -> Result<(), Error> {
        w.write_all(b"TREE")?;
        w.write_all(&[0])?; // node type 0: group index
        w.write_all(&[0])?; // node level 0: this writer never raises the tree
        w.write_all(&(self.entries.len() as u16).to_le_bytes())?;
        crate::fixed::write(w, offset_size, crate::fixed::undefined(offset_size))?; // left sibling
        crate::fixed::write(w, offset_size, crate::fixed::undefined(offset_size))?; // right sibling

        let leading_key = self.entries.first().map(|e| e.max_key).unwrap_or(0);
        crate::fixed::write(w, length_size, leading_key)?;

        let mut written = 4 + 1 + 1 + 2 + 2 * offset_size as u64 + length_size as u64;
        for entry in &self.entries {
            crate::fixed::write(w, offset_size, entry.snod_offset)?;
            crate::fixed::write(w, length_size, entry.max_key)?;
            written += offset_size as u64 + length_size as u64;
        }

        if written > slot_size {
            return Err(Error::invariant("B-tree node contents overflow its allocated slot"));
        }
        w.write_all(&vec![0u8; (slot_size - written) as usize])?;
        Ok(())
    }
}

fn max_name_in(snod: &Snod, names: &impl NameResolver) -> Result<(String, u64), Error> {
    let mut best: Option<(String, u64)> = None;
    for entry in &snod.entries {
        let name = names.name_for_link_offset(entry.link_name_offset)?;
        match &best {
            Some((best_name, _)) if best_name >= &name => {}
            _ => best = Some((name, entry.link_name_offset)),
        }
    }
    best.ok_or_else(|| Error::invariant("cannot compute the max-name key of an empty SNOD"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::FileSpaceAllocator;
    use crate::local_heap::LocalHeapWriter;

    fn setup() -> (GroupBTreeWriter, FileSpaceAllocator, LocalHeapWriter) {
        let mut allocator = FileSpaceAllocator::new(4096, 328, None);
        let node = allocator.allocate(AllocKind::BTreeNode, GroupBTreeWriter::slot_size(8, 8, 64), 8).unwrap();
        let header = allocator.allocate(AllocKind::LocalHeapHeader, 32, 8).unwrap();
        let contents = allocator.allocate(AllocKind::LocalHeapContents, 88, 8).unwrap();
        let heap = LocalHeapWriter::new(header.offset, contents.offset, 88, 8);
        (GroupBTreeWriter::new(node.offset, 64, 4), allocator, heap)
    }

    #[test]
    fn single_insert_creates_one_leaf_entry_with_one_snod() {
        let (mut tree, mut allocator, mut heap) = setup();
        let offset = heap.add_to_heap(b"alpha", &mut allocator).unwrap();
        tree.add_dataset(&mut allocator, &heap, offset, 5000, "alpha").unwrap();
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.entries[0].snod.entries.len(), 1);
        assert_eq!(tree.entries[0].snod.entries[0].link_name_offset, offset);
    }

    /// S6: a B-tree node whose own child pointer loops back to itself must
    /// be rejected rather than recursing forever.
    #[test]
    fn a_node_pointing_at_itself_is_a_fatal_cycle() {
        let offset_size = 8u8;
        let length_size = 8u8;
        let mut contents = vec![0u8; 256];

        let node_offset = 0u64;
        let mut node = Vec::new();
        node.extend_from_slice(b"TREE");
        node.push(0); // node type 0: group index
        node.push(1); // node level 1: entries point at other B-tree nodes
        node.extend_from_slice(&1u16.to_le_bytes()); // entries used
        crate::fixed::write(&mut node, offset_size, crate::fixed::undefined(offset_size)).unwrap();
        crate::fixed::write(&mut node, offset_size, crate::fixed::undefined(offset_size)).unwrap();
        crate::fixed::write(&mut node, length_size, 0).unwrap(); // leading key
        crate::fixed::write(&mut node, offset_size, node_offset).unwrap(); // child points at itself
        crate::fixed::write(&mut node, length_size, 0).unwrap();
        contents[..node.len()].copy_from_slice(&node);

        let mut visited = HashSet::new();
        let result = read_group_recursive(&contents, node_offset, offset_size, length_size, &mut visited);
        assert!(result.is_err());
    }

    #[test]
    fn nine_inserts_in_order_trigger_one_snod_split() {
        let (mut tree, mut allocator, mut heap) = setup();
        for i in 1..=9 {
            let name = format!("d{}", i);
            let offset = heap.add_to_heap(name.as_bytes(), &mut allocator).unwrap();
            tree.add_dataset(&mut allocator, &heap, offset, 10_000 + i, &name).unwrap();
        }
        assert_eq!(tree.entries.len(), 2);
        assert_eq!(tree.entries[0].snod.entries.len(), 4);
        assert_eq!(tree.entries[1].snod.entries.len(), 5);
        assert_eq!(tree.entries[0].max_name, "d4");
        assert_eq!(tree.entries[1].max_name, "d9");
    }
}
