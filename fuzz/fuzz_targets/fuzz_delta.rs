//! Fuzz target for delta application.
//!
//! The first byte picks how much of the input is the base.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(rest.len());
    let (base, delta) = rest.split_at(split);

    if let Ok(out) = kit_git::apply_delta(base, delta) {
        if let Ok(parsed) = kit_git::Delta::parse(delta) {
            assert_eq!(out.len() as u64, parsed.result_size);
        }
    }
});
