//! Fuzz target for pkt-line decoding and the ref advertisement parser.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for line in kit_git::pktline::decode(data) {
        if line.is_err() {
            break;
        }
    }

    let _ = kit_git::protocol::parse_advertisement(data);
    let _ = kit_git::protocol::split_pack_response(data);
});
