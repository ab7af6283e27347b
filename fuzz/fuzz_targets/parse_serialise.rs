#![no_main]
use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use rpc_runtime::{frame_to_vec, read_frame, DEFAULT_MAX_FRAME_SIZE};

fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(data);
    if let Ok(payload) = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE) {
        let consumed = cursor.position() as usize;
        let reframed = frame_to_vec(&payload);
        assert_eq!(&data[..consumed], reframed.as_slice());
    }
});
