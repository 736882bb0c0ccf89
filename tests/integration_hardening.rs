//! Integration tests for hostile and malformed traffic
//!
//! Tests for:
//! - Garbage datagrams on the data port
//! - Requests the server cannot decode
//! - Retransmitted catalogue continuations
//! - Handles and paths that reach outside what a peer may touch
//! - Writes the share mask or an object's mode forbids
//! - Print jobs past the spool limit

use sharefs_files::catalogue::{CHUNK_LIMIT, FINAL_MARKER, FIRST_MARKER, MARKER_CYCLE, Trailer};
use sharefs_core::{NodeError, PrinterConfig, node::print_share_name};
use sharefs_files::{ObjectInfo, Presentation};
use sharefs_integration_tests::fixtures::two_peer::SERVER_HOST;
use sharefs_integration_tests::fixtures::{RawClient, TwoPeerFixture};
use sharefs_wire::{Command, Frame, FrameBuilder, Opcode, error_code};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::net::Ipv4Addr;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(500);

/// Open `path` for reading over `raw`, returning the handle
async fn open_read(raw: &RawClient, id: u32, path: &[u8]) -> u32 {
    let reply = raw
        .call(
            &FrameBuilder::request(Command::Request, id, Opcode::OpenRead)
                .string(path)
                .build(),
        )
        .await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Reply, "open of {path:?} failed");
    let mut r = frame.reader();
    ObjectInfo::decode(&mut r).unwrap();
    r.word().unwrap()
}

/// Assert `result` is an `E` reply carrying `code`
fn assert_remote<T: std::fmt::Debug>(result: sharefs_core::Result<T>, code: u32, what: &str) {
    match result {
        Err(NodeError::Remote { code: got, .. }) => assert_eq!(got, code, "{what}"),
        other => panic!("{what}: expected remote error {code:#x}, got {other:?}"),
    }
}

/// Assert the server still lists the share root
async fn assert_still_serving(raw: &RawClient, id: u32) {
    let reply = raw
        .call(
            &FrameBuilder::request(Command::SimpleRequest, id, Opcode::Catalogue)
                .string(b"docs")
                .build(),
        )
        .await;
    assert_eq!(Frame::parse(&reply).unwrap().command(), Command::SimpleReply);
}

// ============================================================================
// Malformed Traffic
// ============================================================================

#[tokio::test]
async fn test_garbage_datagrams_ignored() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture.add_share(Presentation::Suffix).await.unwrap();
    let raw = fixture.raw().await.unwrap();

    raw.send(&[]).await;
    raw.send(b"A\x01").await;
    raw.send(b"Zjunkjunk").await;
    raw.send(&[0xFF; 1500]).await;
    // Write data nobody is waiting for
    raw.send(
        &FrameBuilder::new(Command::WriteData, 0x777)
            .word(0)
            .bytes(&[0u8; 64])
            .build(),
    )
    .await;
    assert!(raw.recv(QUIET).await.is_none());

    assert_still_serving(&raw, 0x10).await;

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_undecodable_requests_get_errors() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture.add_share(Presentation::Suffix).await.unwrap();
    let raw = fixture.raw().await.unwrap();

    // No opcode word at all
    let reply = raw.call(&FrameBuilder::new(Command::Request, 0x20).build()).await;
    assert_eq!(Frame::parse(&reply).unwrap().command(), Command::Error);

    // Unknown opcode
    let reply = raw
        .call(&FrameBuilder::new(Command::Request, 0x21).word(0x42).build())
        .await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Error);
    assert_eq!(frame.wire_error().unwrap().code, error_code::NOT_FOUND);

    // Read with a truncated argument list
    let reply = raw
        .call(
            &FrameBuilder::request(Command::SimpleRequest, 0x22, Opcode::Read)
                .word(4)
                .build(),
        )
        .await;
    assert_eq!(Frame::parse(&reply).unwrap().command(), Command::Error);

    // Read on a handle that was never issued
    let reply = raw
        .call(
            &FrameBuilder::request(Command::SimpleRequest, 0x23, Opcode::Read)
                .words(&[0x9999, 0, 16])
                .build(),
        )
        .await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Error);
    assert_eq!(frame.wire_error().unwrap().code, error_code::NOT_FOUND);

    assert_still_serving(&raw, 0x24).await;

    fixture.cleanup().await;
}

// ============================================================================
// Catalogue Retransmits
// ============================================================================

#[tokio::test]
async fn test_stale_continuation_is_silent() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture.add_share(Presentation::Suffix).await.unwrap();
    let big = fixture.share_dir().join("big");
    fs::create_dir(&big).unwrap();
    for i in 0..200 {
        fs::write(big.join(format!("document_file_{i:03}")), b"x").unwrap();
    }
    let raw = fixture.raw().await.unwrap();

    let reply = raw
        .call(
            &FrameBuilder::request(Command::SimpleRequest, 0x30, Opcode::Catalogue)
                .string(b"docs.big")
                .build(),
        )
        .await;
    let frame = Frame::parse(&reply).unwrap();
    let mut r = frame.reader();
    let first_len = r.word().unwrap() as usize;
    r.word().unwrap();
    r.counted(first_len).unwrap();
    let trailer = Trailer::decode(&mut r).unwrap();
    assert_eq!(trailer.marker, FIRST_MARKER);

    let continue_with = |id: u32, echo: u32| {
        FrameBuilder::request(Command::SimpleRequest, id, Opcode::CatalogueContinue)
            .words(&[trailer.dir_handle, echo, CHUNK_LIMIT as u32])
            .build()
    };

    let reply = raw.call(&continue_with(0x31, FIRST_MARKER)).await;
    let frame = Frame::parse(&reply).unwrap();
    let mut r = frame.reader();
    let len = r.word().unwrap() as usize;
    r.word().unwrap();
    r.counted(len).unwrap();
    assert_eq!(r.word().unwrap(), MARKER_CYCLE[0]);

    // The same request again, as if our reply had been lost
    raw.send(&continue_with(0x31, FIRST_MARKER)).await;
    assert!(raw.recv_id(0x31, QUIET).await.is_none());

    // Another peer has nothing pending for this directory
    let other = RawClient::bind_from(Ipv4Addr::new(127, 0, 0, 5), fixture.server_data_addr())
        .await
        .unwrap();
    let reply = other.call(&continue_with(0x32, MARKER_CYCLE[0])).await;
    let frame = Frame::parse(&reply).unwrap();
    let mut r = frame.reader();
    assert_eq!(r.word().unwrap(), 0);
    r.word().unwrap();
    assert_eq!(r.word().unwrap(), FINAL_MARKER);

    // The right echo still moves the listing on
    let reply = raw.call(&continue_with(0x33, MARKER_CYCLE[0])).await;
    assert_eq!(Frame::parse(&reply).unwrap().command(), Command::SimpleReply);

    fixture.cleanup().await;
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_foreign_handle_rejected() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture.add_share(Presentation::Suffix).await.unwrap();
    fs::write(fixture.share_dir().join("mine"), b"private").unwrap();
    let owner = fixture.raw().await.unwrap();
    let handle = open_read(&owner, 0x40, b"docs.mine").await;

    let intruder = RawClient::bind_from(Ipv4Addr::new(127, 0, 0, 6), fixture.server_data_addr())
        .await
        .unwrap();
    for (id, frame) in [
        (
            0x41,
            FrameBuilder::request(Command::SimpleRequest, 0x41, Opcode::Read)
                .words(&[handle, 0, 7])
                .build(),
        ),
        (
            0x42,
            FrameBuilder::request(Command::Request, 0x42, Opcode::Close)
                .word(handle)
                .build(),
        ),
    ] {
        let reply = intruder.call(&frame).await;
        let frame = Frame::parse(&reply).unwrap();
        assert_eq!(frame.command(), Command::Error, "request {id:#x} was served");
    }

    // Owner's handle survived the intruder's close
    let reply = owner
        .call(
            &FrameBuilder::request(Command::SimpleRequest, 0x43, Opcode::Read)
                .words(&[handle, 0, 7])
                .build(),
        )
        .await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::SimpleReply);
    let mut r = frame.reader();
    assert_eq!(r.word().unwrap(), 7);
    r.word().unwrap();
    assert_eq!(r.counted(7).unwrap(), b"private");

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_symlink_escape_rejected() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture.add_share(Presentation::Suffix).await.unwrap();
    let outside = tempfile::tempdir().unwrap();
    fs::write(outside.path().join("secret"), b"top secret").unwrap();
    std::os::unix::fs::symlink(outside.path(), fixture.share_dir().join("escape")).unwrap();

    let inside = fixture.share_dir().join("real");
    fs::create_dir(&inside).unwrap();
    fs::write(inside.join("note"), b"fine").unwrap();
    std::os::unix::fs::symlink(&inside, fixture.share_dir().join("alias")).unwrap();

    let raw = fixture.raw().await.unwrap();
    let reply = raw
        .call(
            &FrameBuilder::request(Command::Request, 0x50, Opcode::OpenRead)
                .string(b"docs.escape.secret")
                .build(),
        )
        .await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Error);
    assert_eq!(frame.wire_error().unwrap().code, error_code::ACCESS_VIOLATION);

    // Parent references never leave the share either
    let reply = raw
        .call(
            &FrameBuilder::request(Command::Request, 0x51, Opcode::OpenRead)
                .string(b"docs.^.docs")
                .build(),
        )
        .await;
    assert_eq!(Frame::parse(&reply).unwrap().command(), Command::Error);

    // A link that stays inside resolves
    open_read(&raw, 0x52, b"docs.alias.note").await;

    assert_still_serving(&raw, 0x53).await;

    fixture.cleanup().await;
}

// ============================================================================
// Write Access
// ============================================================================

#[tokio::test]
async fn test_read_only_share_refuses_writes() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture
        .add_share_masked(Presentation::Truncate, 0o555)
        .await
        .unwrap();
    let dir = fixture.share_dir();
    fs::write(dir.join("report,fff"), b"a,b,c\n").unwrap();
    fs::create_dir(dir.join("sub")).unwrap();
    let client = fixture.share_client();
    let violation = error_code::ACCESS_VIOLATION;

    assert_remote(client.settype("docs.report", 0xC85).await, violation, "settype");
    assert_remote(client.create("docs.new").await, violation, "create");
    assert_remote(client.create("docs.report").await, violation, "create over");
    assert_remote(client.create_directory("docs.letters").await, violation, "mkdir");
    assert_remote(client.setmode("docs.report", 0x33).await, violation, "setmode");
    assert_remote(client.delete("docs.report").await, violation, "delete");
    assert_remote(client.rename("docs.report", "docs.moved").await, violation, "rename");
    assert_remote(client.open_for_update("docs.report").await, violation, "open rw");

    let mut names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["report,fff", "sub"]);
    assert_eq!(fs::read(dir.join("report,fff")).unwrap(), b"a,b,c\n");

    // Reads still work and the failed settype left no handle behind
    assert_eq!(client.get("docs.report").await.unwrap(), b"a,b,c\n");
    assert_eq!(fixture.server.manager().handle_count(), 0);

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_write_targets_checked_individually() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    fixture.add_share(Presentation::Suffix).await.unwrap();
    let dir = fixture.share_dir();

    let locked = dir.join("locked");
    fs::write(&locked, b"keep").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o444)).unwrap();

    let outside = tempfile::tempdir().unwrap();
    let secret = outside.path().join("secret");
    fs::write(&secret, b"top secret!!!").unwrap();
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();
    std::os::unix::fs::symlink(&secret, dir.join("escape")).unwrap();

    let client = fixture.share_client();
    let violation = error_code::ACCESS_VIOLATION;
    for path in ["docs.locked", "docs.escape"] {
        assert_remote(client.create(path).await, violation, path);
        assert_remote(client.setmode(path, 0x33).await, violation, path);
        assert_remote(client.delete(path).await, violation, path);
        assert_remote(client.rename(path, "docs.moved").await, violation, path);
    }

    assert_eq!(fs::read(&locked).unwrap(), b"keep");
    assert_eq!(fs::metadata(&locked).unwrap().permissions().mode() & 0o777, 0o444);
    assert_eq!(fs::read(&secret).unwrap(), b"top secret!!!");
    assert_eq!(fs::metadata(&secret).unwrap().permissions().mode() & 0o777, 0o600);

    // A writable neighbour is unaffected
    client.put("docs.fresh", b"new").await.unwrap();
    client.delete("docs.fresh").await.unwrap();

    fixture.cleanup().await;
}

// ============================================================================
// Print Spool
// ============================================================================

#[tokio::test]
async fn test_oversized_print_job_refused() {
    let fixture = TwoPeerFixture::new().await.unwrap();
    let spool = fixture.share_dir().with_file_name("spool");
    fs::create_dir_all(&spool).unwrap();
    fixture
        .server
        .add_printer(PrinterConfig::new("Laser", &spool))
        .await
        .unwrap();
    let job = format!("{}.job", print_share_name(SERVER_HOST));
    let raw = fixture.raw().await.unwrap();

    let reply = raw
        .call(
            &FrameBuilder::request(Command::Request, 0x60, Opcode::CreateFile)
                .string(job.as_bytes())
                .build(),
        )
        .await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Reply);
    let mut r = frame.reader();
    ObjectInfo::decode(&mut r).unwrap();
    let handle = r.word().unwrap();

    let set_length = |id: u32, len: u32| {
        FrameBuilder::request(Command::Request, id, Opcode::SetLength)
            .words(&[handle, len])
            .build()
    };

    let reply = raw.call(&set_length(0x61, 0xFFFF_FFFF)).await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Error);
    assert_eq!(frame.wire_error().unwrap().code, error_code::DISC_FULL);

    let reply = raw.call(&set_length(0x62, 16)).await;
    let frame = Frame::parse(&reply).unwrap();
    assert_eq!(frame.command(), Command::Reply);
    assert_eq!(frame.reader().word().unwrap(), 16);

    let reply = raw
        .call(
            &FrameBuilder::request(Command::Request, 0x63, Opcode::Close)
                .word(handle)
                .build(),
        )
        .await;
    assert_eq!(Frame::parse(&reply).unwrap().command(), Command::Reply);

    fixture.cleanup().await;
}
