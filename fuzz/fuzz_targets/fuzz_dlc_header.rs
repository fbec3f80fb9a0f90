//! Fuzz target for DLC descriptor header parsing.
//!
//! Arbitrary byte images must be rejected with an error, never a panic, and
//! anything accepted must load as a container with the same descriptors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snpe_rt::network::{parse_header, NetworkContainer};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = parse_header(data) {
        assert!(header.payload_offset <= data.len());
        let network = NetworkContainer::load(data).expect("parsed header must load");
        assert_eq!(network.inputs(), header.inputs.as_slice());
        assert_eq!(network.outputs(), header.outputs.as_slice());
    }
});
