#[cfg(not(windows))]
mod fuzz {
    use std::io::{self, Cursor, Read, Seek, SeekFrom};

    use honggfuzz::fuzz;
    use sparsedisc::format::sparse::SparseDiscReader;

    /// Images may describe discs far larger than the input.
    const MAX_READ: u64 = 1024 * 1024;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let reader = Cursor::new(data);
                if let Ok(mut disc_reader) = SparseDiscReader::new(reader) {
                    for block in 0..disc_reader.block_count().min(1024) {
                        let _ = disc_reader.phys_block_addr(block);
                    }

                    let _ = io::copy(&mut (&mut disc_reader).take(MAX_READ), &mut io::sink());

                    if disc_reader.seek(SeekFrom::End(-(MAX_READ as i64))).is_ok() {
                        let _ = io::copy(&mut (&mut disc_reader).take(MAX_READ), &mut io::sink());
                    }
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
