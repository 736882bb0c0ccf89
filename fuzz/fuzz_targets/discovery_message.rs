//! Fuzz target for discovery and secure-port messages
//!
//! Anything that decodes must encode again without error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sharefs_discovery::{DiscoveryMessage, SecureReply, SecureRequest};

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = DiscoveryMessage::decode(data) {
        let _ = msg.encode();
    }
    if let Ok(req) = SecureRequest::decode(data) {
        let _ = req.encode();
    }
    if let Ok(reply) = SecureReply::decode(data) {
        let _ = reply.encode();
    }
});
