//! Fuzz target for pack parsing and delta resolution.
//!
//! Arbitrary bytes are resealed with a valid trailer so the fuzzer gets
//! past checksum verification into entry decoding.

#![no_main]

use kit_git::{resolve_pack, PackParser};
use kit_storage::MemoryStore;
use libfuzzer_sys::fuzz_target;
use sha1::{Digest, Sha1};

fuzz_target!(|data: &[u8]| {
    // Raw input: almost always rejected by the checksum.
    let _ = PackParser::new(data).parse();

    let mut sealed = data.to_vec();
    sealed.extend_from_slice(&Sha1::digest(data));
    if let Ok(pack) = PackParser::new(&sealed).parse() {
        let store = MemoryStore::new();
        let _ = resolve_pack(&pack, &store);
    }
});
