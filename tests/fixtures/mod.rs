//! Test fixtures

pub mod two_peer;

pub use two_peer::{RawClient, TwoPeerFixture, allocate_ports, loopback_config, wait_for};
