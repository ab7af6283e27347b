#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rpc_runtime::{validate_datagram_frame, DEFAULT_MAX_FRAME_SIZE};

fuzz_target!(|data: &[u8]| {
    let direct = validate_datagram_frame(data, DEFAULT_MAX_FRAME_SIZE);

    let shared = Bytes::copy_from_slice(data);
    let via_bytes = validate_datagram_frame(&shared, DEFAULT_MAX_FRAME_SIZE);

    match (direct, via_bytes) {
        (Ok(a), Ok(b)) => assert_eq!(a, b, "validation diverged between &[u8] and Bytes-backed slice"),
        (Err(_), Err(_)) => {}
        _ => panic!("validation diverged between &[u8] and Bytes-backed slice"),
    }
});
