fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filename = std::env::args().nth(1).expect("Need a file path to open");
    let file = hdf5_core::open(&filename)?;
    println!("{:?}: {:#?}", filename, file);
    Ok(())
}
