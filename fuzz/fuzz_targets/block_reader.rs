#![no_main]
use std::io::Cursor;

use common::traits::Compressor;
use compression::BlockCompressor;
use libfuzzer_sys::fuzz_target;
use trace_format::{decode_call_block, decode_meta_command, BlockReader};

fuzz_target!(|data: &[u8]| {
    let Ok(reader) = BlockReader::open(Cursor::new(data)) else {
        return;
    };
    let mut reader = reader.with_max_block_size(1 << 20);
    let compressor = BlockCompressor::for_type(reader.file_header().compression_type());
    let compressor = compressor.as_ref().map(|c| c as &dyn Compressor);

    while let Ok(Some(block)) = reader.next_block() {
        let _ = decode_meta_command(&block, compressor);
        let _ = decode_call_block(&block, compressor);
    }
});
