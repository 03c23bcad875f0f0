//! Minimal object-header construction.
//!
//! The object-header message catalog is an external collaborator per
//! spec.md §1 — full attribute/link-message support lives outside this
//! crate's core. This module writes exactly the messages the
//! infrastructure layer itself needs to produce a working, readable file:
//! a dataspace/datatype/layout/fill-value set for a dataset, or a single
//! symbol-table message for a non-root group. Layouts mirror
//! `parse::header` on the read side field-for-field.

use crate::error::Error;
use crate::Hdf5Dtype;
use std::io::Write;

fn header_message<W: Write>(w: &mut W, message_type: u16, payload: &[u8]) -> Result<(), Error> {
    w.write_all(&message_type.to_le_bytes())?;
    w.write_all(&(payload.len() as u16).to_le_bytes())?;
    w.write_all(&[0])?; // flags
    w.write_all(&[0, 0, 0])?; // reserved
    w.write_all(payload)?;
    Ok(())
}

fn wrap_object_header(messages: &[u8], message_count: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + messages.len());
    out.push(1); // version
    out.push(0); // reserved
    out.extend_from_slice(&message_count.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // reference count
    out.extend_from_slice(&(messages.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]); // pad
    out.extend_from_slice(messages);
    out
}

/// A minimal object header for a non-root group: one symbol-table message
/// pointing at the group's own B-tree and local heap.
pub fn build_group_header(btree_address: u64, local_heap_address: u64) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&btree_address.to_le_bytes());
    payload.extend_from_slice(&local_heap_address.to_le_bytes());

    let mut messages = Vec::new();
    header_message(&mut messages, 0x11, &payload)?;
    Ok(wrap_object_header(&messages, 1))
}

fn dtype_class_and_size(dtype: Hdf5Dtype) -> (u8, u32) {
    match dtype {
        Hdf5Dtype::I32 => (0, 4),
        Hdf5Dtype::I64 => (0, 8),
        Hdf5Dtype::F32 => (1, 4),
        Hdf5Dtype::F64 => (1, 8),
    }
}

/// A minimal object header for a dataset: dataspace, datatype, fill value,
/// and a contiguous data layout pointing at `data_address`/`data_size`.
pub fn build_dataset_header(
    dimensions: &[u64],
    dtype: Hdf5Dtype,
    data_address: u64,
    data_size: u64,
) -> Result<Vec<u8>, Error> {
    let mut messages = Vec::new();

    // Dataspace (version 1, simple, no max-dimensions).
    let mut dataspace = Vec::new();
    dataspace.push(1); // version
    dataspace.push(dimensions.len() as u8); // dimensionality
    dataspace.push(0); // flags: no max-dimensions
    dataspace.push(0); // reserved "ty"
    dataspace.extend_from_slice(&[0u8; 4]); // reserved
    for d in dimensions {
        dataspace.extend_from_slice(&d.to_le_bytes());
    }
    header_message(&mut messages, 0x1, &dataspace)?;

    // Datatype.
    let (class, size) = dtype_class_and_size(dtype);
    let mut datatype = Vec::new();
    datatype.push((1u8 << 4) | class); // version 1
    datatype.extend_from_slice(&[0u8; 3]); // class bitfield
    datatype.extend_from_slice(&size.to_le_bytes());
    datatype.extend_from_slice(&0u16.to_le_bytes()); // bit offset
    datatype.extend_from_slice(&((size * 8) as u16).to_le_bytes()); // bit precision
    header_message(&mut messages, 0x3, &datatype)?;

    // Fill value (version 2, not defined).
    let fill_value = vec![2u8, 0, 0, 0];
    header_message(&mut messages, 0x5, &fill_value)?;

    // Data layout (version 3, contiguous).
    let mut layout = Vec::new();
    layout.push(3); // version
    layout.push(1); // layout class: contiguous
    layout.extend_from_slice(&data_address.to_le_bytes());
    layout.extend_from_slice(&data_size.to_le_bytes());
    layout.extend_from_slice(&[0u8; 6]); // reserved
    header_message(&mut messages, 0x8, &layout)?;

    Ok(wrap_object_header(&messages, 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_header_round_trips_through_the_parser() {
        let bytes = build_group_header(96, 136).unwrap();
        let (remaining, header) = crate::parse::object_header(&bytes).unwrap();
        assert_eq!(header.total_number_of_header_messages, 1);
        let (_, message) = crate::parse::header_message(remaining).unwrap();
        match message {
            crate::parse::header::Message::SymbolTable(st) => {
                assert_eq!(st.btree_address, 96);
                assert_eq!(st.local_heap_address, 136);
            }
            other => panic!("expected a symbol table message, got {:?}", other),
        }
    }

    #[test]
    fn dataset_header_round_trips_through_the_parser() {
        let bytes = build_dataset_header(&[3, 4], Hdf5Dtype::F64, 4096, 96).unwrap();
        let (mut remaining, header) = crate::parse::object_header(&bytes).unwrap();
        assert_eq!(header.total_number_of_header_messages, 4);
        let mut saw_layout = false;
        for _ in 0..header.total_number_of_header_messages {
            let (rest, message) = crate::parse::header_message(remaining).unwrap();
            remaining = rest;
            if let crate::parse::header::Message::DataLayout(layout) = message {
                assert_eq!(layout.address, 4096);
                assert_eq!(layout.size, 96);
                saw_layout = true;
            }
        }
        assert!(saw_layout);
    }
}
