//! Fuzz target for data-port frame parsing
//!
//! Tests that the frame parser and the payload decoders handle arbitrary
//! input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sharefs_files::ObjectInfo;
use sharefs_files::catalogue::Trailer;
use sharefs_wire::Frame;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::parse(data) else {
        return;
    };

    let _ = frame.opcode();
    let _ = frame.wire_error();

    // Walk the payload the way the request handlers do
    let mut r = frame.reader();
    let _ = r.word();
    let _ = r.lenient_string();
    let _ = ObjectInfo::decode(&mut frame.reader());

    // Catalogue replies: length, tag, entries, trailer
    let mut r = frame.reader();
    if let (Ok(len), Ok(_)) = (r.word(), r.word()) {
        if r.counted(len as usize).is_ok() {
            let _ = Trailer::decode(&mut r);
        }
    }
});
