//! The superblock: the first bytes of an HDF5 v0 file. Fixes
//! `offsetSize`/`lengthSize` for every other component and carries the
//! root group's entry point.

use crate::error::Error;
use crate::fixed;
use crate::ste::SymbolTableEntry;
use std::io::Write;

pub const SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

/// Fixed prefix size (signature through `driverInfoAddress`), before the
/// root symbol table entry. Derived from `offsetSize` rather than
/// hard-coded.
pub fn fixed_prefix_size(offset_size: u8) -> u64 {
    8 + 1 + 1 + 1 + 1 + 1 + 1 + 1 + 1 + 2 + 2 + 4 + 4 * offset_size as u64
}

pub struct SuperblockWriter {
    pub offset_size: u8,
    pub length_size: u8,
    pub group_leaf_node_k: u16,
    pub group_internal_node_k: u16,
    pub base_address: u64,
    pub end_of_file_address: u64,
    pub root_ste: SymbolTableEntry,
}

impl SuperblockWriter {
    /// Writes the fixed prefix and the embedded root symbol table entry in
    /// one contiguous pass; on disk these occupy the adjacent `Superblock`
    /// and `RootSte` allocation records.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(SIGNATURE)?;
        w.write_all(&[0])?; // superblock version 0
        w.write_all(&[0])?; // file free-space storage version 0
        w.write_all(&[0])?; // root group symbol table entry version 0
        w.write_all(&[0])?; // reserved
        w.write_all(&[0])?; // shared header message format version 0
        w.write_all(&[self.offset_size])?;
        w.write_all(&[self.length_size])?;
        w.write_all(&[0])?; // reserved
        w.write_all(&self.group_leaf_node_k.to_le_bytes())?;
        w.write_all(&self.group_internal_node_k.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?; // file consistency flags

        fixed::write(w, self.offset_size, self.base_address)?;
        fixed::write(w, self.offset_size, fixed::undefined(self.offset_size))?; // free-space address
        fixed::write(w, self.offset_size, self.end_of_file_address)?;
        fixed::write(w, self.offset_size, fixed::undefined(self.offset_size))?; // driver info address

        self.root_ste.write_to(w, self.offset_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ste::SteCache;

    #[test]
    fn writes_the_canonical_v0_signature() {
        let sb = SuperblockWriter {
            offset_size: 8,
            length_size: 8,
            group_leaf_node_k: 4,
            group_internal_node_k: 16,
            base_address: 0,
            end_of_file_address: 2048,
            root_ste: SymbolTableEntry {
                link_name_offset: 0,
                object_header_offset: fixed::undefined(8),
                cache: SteCache::Group { btree_offset: 96, local_heap_offset: 136 },
            },
        };
        let mut buf = Vec::new();
        sb.write_to(&mut buf).unwrap();
        assert_eq!(&buf[0..8], SIGNATURE);
        assert_eq!(buf.len() as u64, fixed_prefix_size(8) + SymbolTableEntry::serialized_size(8));
    }
}
