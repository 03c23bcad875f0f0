//! A small demo CLI: builds an HDF5 v0 file in memory with
//! `hdf5_core::Hdf5Writer`, writes it to the path given on the command
//! line (or `demo.h5`), then reopens it with `hdf5_core::open` and prints
//! what it found.

use hdf5_core::{Hdf5Dtype, WriterConfig};
use std::io::Cursor;

fn main() -> Result<(), hdf5_core::Error> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "demo.h5".to_string());

    let mut writer = hdf5_core::Hdf5Writer::new(WriterConfig::default())?;
    let samples: Vec<f64> = (0..8).map(|i| i as f64).collect();
    let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
    writer.create_dataset("", "samples", &[samples.len() as u64], Hdf5Dtype::F64, &bytes)?;

    let mut buf = Cursor::new(Vec::new());
    writer.close(&mut buf)?;
    std::fs::write(&path, buf.into_inner())?;

    let file = hdf5_core::open(&path)?;
    println!("{:#?}", file);
    println!("samples: {:?}", file.view::<f64>("samples"));

    Ok(())
}
