//! Fuzz target for RISC OS path splitting
//!
//! Share-relative paths arrive straight from the network.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sharefs_files::names::split_path;

fuzz_target!(|data: &[u8]| {
    if let Ok((share, elements)) = split_path(data) {
        assert!(!share.is_empty());
        assert!(elements.iter().all(|e| !e.contains('/') && e != ".." && e != "."));
    }
});
