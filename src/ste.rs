//! Symbol Table Entry: the record inside an SNOD (or the root STE embedded
//! in the superblock) that resolves a link name to an object.

use crate::error::Error;
use crate::fixed;
use std::io::Write;

/// `cacheType`'s interpretation of the 16-byte scratch pad. Exactly one of
/// the two ever applies; a `None`-cached entry writes 16 zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteCache {
    None,
    Group { btree_offset: u64, local_heap_offset: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct SymbolTableEntry {
    pub link_name_offset: u64,
    pub object_header_offset: u64,
    pub cache: SteCache,
}

impl SymbolTableEntry {
    pub fn write_to<W: Write>(&self, w: &mut W, offset_size: u8) -> Result<(), Error> {
        fixed::write(w, offset_size, self.link_name_offset)?;
        fixed::write(w, offset_size, self.object_header_offset)?;
        match self.cache {
            SteCache::None => {
                w.write_all(&0u32.to_le_bytes())?;
                w.write_all(&0u32.to_le_bytes())?;
                w.write_all(&[0u8; 16])?;
            }
            SteCache::Group { btree_offset, local_heap_offset } => {
                w.write_all(&1u32.to_le_bytes())?;
                w.write_all(&0u32.to_le_bytes())?;
                fixed::write(w, offset_size, btree_offset)?;
                fixed::write(w, offset_size, local_heap_offset)?;
                let pad = 16usize.saturating_sub(2 * offset_size as usize);
                w.write_all(&vec![0u8; pad])?;
            }
        }
        Ok(())
    }

    /// Serialized size of one entry for a given offset width: two
    /// addresses, the u32 cache type, the u32 reserved field, and the
    /// fixed 16-byte scratch pad.
    pub fn serialized_size(offset_size: u8) -> u64 {
        2 * offset_size as u64 + 4 + 4 + 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_cache_writes_zeroed_scratch_pad() {
        let ste = SymbolTableEntry { link_name_offset: 8, object_header_offset: 200, cache: SteCache::None };
        let mut buf = Vec::new();
        ste.write_to(&mut buf, 8).unwrap();
        assert_eq!(buf.len(), SymbolTableEntry::serialized_size(8) as usize);
        assert_eq!(&buf[16..20], &0u32.to_le_bytes());
        assert_eq!(&buf[24..40], &[0u8; 16]);
    }

    #[test]
    fn group_cache_embeds_btree_and_heap_offsets() {
        let ste = SymbolTableEntry {
            link_name_offset: 0,
            object_header_offset: 0,
            cache: SteCache::Group { btree_offset: 96, local_heap_offset: 136 },
        };
        let mut buf = Vec::new();
        ste.write_to(&mut buf, 8).unwrap();
        assert_eq!(&buf[16..20], &1u32.to_le_bytes());
        assert_eq!(fixed::read(8, &buf[24..32]).unwrap(), 96);
        assert_eq!(fixed::read(8, &buf[32..40]).unwrap(), 136);
    }
}
