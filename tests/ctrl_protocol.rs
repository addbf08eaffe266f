use std::sync::Arc;

use uuid::Uuid;

use snapstore::ctrl::{encode_initiate, encode_next_portion, encode_next_portion_multidev};
use snapstore::{BlkRange, CtrlChannel, DevId, MemDevProvider, OutMsg, SnapCtx, SnapError};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ctx() -> SnapCtx {
    SnapCtx::new(Arc::new(MemDevProvider))
}

/// Drain the outbound queue; panics if nothing is queued (read would block).
fn drain(ch: &CtrlChannel) -> Vec<OutMsg> {
    assert!(ch.poll().readable, "expected queued notifications");
    let mut buf = [0u8; 1024];
    let n = ch.read(&mut buf).expect("read");
    OutMsg::decode_all(&buf[..n]).expect("decode outbound")
}

fn some_ranges() -> Vec<BlkRange> {
    vec![
        BlkRange { ofs: 2048, cnt: 128 },
        BlkRange { ofs: 8192, cnt: 64 },
        BlkRange { ofs: 0, cnt: 8 },
    ]
}

// -------- scenario A: INITIATE an in-memory snapstore --------

#[test]
fn initiate_mem_store_acknowledges_and_consumes_all() {
    init_logs();
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    let cmd = encode_initiate(&id, 1 << 20, DevId::new(0, 0), &[]);
    let consumed = ch.write(&ctx, &cmd).expect("write initiate");
    assert_eq!(consumed, cmd.len(), "full command length reported consumed");

    assert_eq!(drain(&ch), vec![OutMsg::Acknowledge { result: 0 }]);
    assert!(ctx.store(&id).is_ok(), "snapstore exists for the uuid");
}

#[test]
fn initiate_twice_fails_with_exists() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    let cmd = encode_initiate(&id, 1 << 20, DevId::new(8, 0), &[DevId::new(8, 16)]);
    ch.write(&ctx, &cmd).expect("first initiate");
    assert_eq!(drain(&ch), vec![OutMsg::Acknowledge { result: 0 }]);

    let err = ch.write(&ctx, &cmd).unwrap_err();
    assert_eq!(err, SnapError::AlreadyExists);
    assert_eq!(
        drain(&ch),
        vec![OutMsg::Acknowledge {
            result: SnapError::AlreadyExists.wire_code()
        }]
    );
}

// -------- scenario B: NEXT_PORTION for an unknown snapstore --------

#[test]
fn next_portion_unknown_uuid_returns_failure_not_count() {
    init_logs();
    let ctx = ctx();
    let ch = ctx.open_channel();

    let cmd = encode_next_portion(&Uuid::new_v4(), &some_ranges());
    let err = ch.write(&ctx, &cmd).unwrap_err();
    assert_eq!(err, SnapError::NoDevice);
    assert_eq!(err.code(), -19);

    // the daemon still gets an answer: ACKNOWLEDGE with the failure code
    assert_eq!(
        drain(&ch),
        vec![OutMsg::Acknowledge {
            result: SnapError::NoDevice.wire_code()
        }]
    );
}

// -------- growth path end to end --------

#[test]
fn next_portion_extends_a_file_store() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    ch.write(&ctx, &encode_initiate(&id, 1 << 20, DevId::new(8, 0), &[]))
        .expect("initiate");
    ch.write(&ctx, &encode_next_portion(&id, &some_ranges()))
        .expect("next portion");

    assert_eq!(
        drain(&ch),
        vec![
            OutMsg::Acknowledge { result: 0 },
            OutMsg::Acknowledge { result: 0 }
        ]
    );

    let store = ctx.store(&id).expect("store");
    let g = store.lock().unwrap();
    assert_eq!(g.capacity_sectors(), 128 + 64 + 8);
    let pool = g.file().expect("file backing").pool();
    assert_eq!(pool.len(), 1, "one portion, one descriptor");
}

#[test]
fn next_portion_multidev_targets_one_device() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    let devs = [DevId::new(8, 1), DevId::new(8, 2)];
    ch.write(&ctx, &encode_initiate(&id, 1 << 20, DevId::new(-1, -1), &devs))
        .expect("initiate multidev");
    ch.write(
        &ctx,
        &encode_next_portion_multidev(&id, DevId::new(8, 1), &some_ranges()),
    )
    .expect("next portion multidev");

    assert_eq!(
        drain(&ch),
        vec![
            OutMsg::Acknowledge { result: 0 },
            OutMsg::Acknowledge { result: 0 }
        ]
    );

    let store = ctx.store(&id).expect("store");
    let g = store.lock().unwrap();
    assert_eq!(g.capacity_sectors(), 200);
    assert_eq!(g.dev_set(), &devs);
}

#[test]
fn next_portion_on_mem_store_is_rejected() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    ch.write(&ctx, &encode_initiate(&id, 1 << 20, DevId::new(0, 0), &[]))
        .expect("initiate mem");
    let err = ch
        .write(&ctx, &encode_next_portion(&id, &some_ranges()))
        .unwrap_err();
    assert_eq!(err, SnapError::NoDevice);
}

// -------- packed commands --------

#[test]
fn packed_commands_are_consumed_in_one_write() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    let mut packed = encode_initiate(&id, 1 << 20, DevId::new(8, 0), &[]);
    packed.extend_from_slice(&encode_next_portion(&id, &some_ranges()));

    let consumed = ch.write(&ctx, &packed).expect("packed write");
    assert_eq!(consumed, packed.len());
    assert_eq!(
        drain(&ch),
        vec![
            OutMsg::Acknowledge { result: 0 },
            OutMsg::Acknowledge { result: 0 }
        ]
    );
}

#[test]
fn packed_commands_stop_at_first_failure() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    let mut packed = encode_initiate(&id, 1 << 20, DevId::new(8, 0), &[]);
    // second command names a snapstore that does not exist
    packed.extend_from_slice(&encode_next_portion(&Uuid::new_v4(), &some_ranges()));

    let err = ch.write(&ctx, &packed).unwrap_err();
    assert_eq!(err, SnapError::NoDevice);

    // first command completed, second answered with its failure
    assert_eq!(
        drain(&ch),
        vec![
            OutMsg::Acknowledge { result: 0 },
            OutMsg::Acknowledge {
                result: SnapError::NoDevice.wire_code()
            }
        ]
    );
}

// -------- bounds checking --------

#[test]
fn truncated_initiate_fails_at_every_cut() {
    init_logs();
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    let full = encode_initiate(
        &id,
        1 << 20,
        DevId::new(8, 0),
        &[DevId::new(8, 16), DevId::new(8, 32)],
    );

    // keep the opcode intact, truncate anywhere in the payload
    for cut in 4..full.len() {
        let err = ch.write(&ctx, &full[..cut]).unwrap_err();
        assert_eq!(err, SnapError::InvalidArgument, "cut={}", cut);
        assert_eq!(drain(&ch), vec![OutMsg::Invalid], "cut={}", cut);
        assert!(ctx.store(&id).is_err(), "no snapstore from a torn command");
    }

    // untruncated, the same bytes succeed
    ch.write(&ctx, &full).expect("full command");
    assert_eq!(drain(&ch), vec![OutMsg::Acknowledge { result: 0 }]);
}

#[test]
fn truncated_next_portion_fails_at_every_cut() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    ch.write(&ctx, &encode_initiate(&id, 1 << 20, DevId::new(8, 0), &[]))
        .expect("initiate");
    drain(&ch);

    let full = encode_next_portion(&id, &some_ranges());
    for cut in 4..full.len() {
        let err = ch.write(&ctx, &full[..cut]).unwrap_err();
        assert_eq!(err, SnapError::InvalidArgument, "cut={}", cut);
        assert_eq!(drain(&ch), vec![OutMsg::Invalid], "cut={}", cut);
    }

    ch.write(&ctx, &full).expect("full command");
    assert_eq!(drain(&ch), vec![OutMsg::Acknowledge { result: 0 }]);
    let store = ctx.store(&id).expect("store");
    assert_eq!(store.lock().unwrap().capacity_sectors(), 200);
}

#[test]
fn truncated_next_portion_multidev_fails_at_every_cut() {
    let ctx = ctx();
    let ch = ctx.open_channel();
    let id = Uuid::new_v4();

    ch.write(&ctx, &encode_initiate(&id, 1 << 20, DevId::new(-1, -1), &[]))
        .expect("initiate");
    drain(&ch);

    let full = encode_next_portion_multidev(&id, DevId::new(8, 5), &some_ranges());
    for cut in 4..full.len() {
        let err = ch.write(&ctx, &full[..cut]).unwrap_err();
        assert_eq!(err, SnapError::InvalidArgument, "cut={}", cut);
        assert_eq!(drain(&ch), vec![OutMsg::Invalid], "cut={}", cut);
    }

    ch.write(&ctx, &full).expect("full command");
    assert_eq!(drain(&ch), vec![OutMsg::Acknowledge { result: 0 }]);
}

// -------- dispatch edges --------

#[test]
fn unknown_opcode_is_logged_and_ignored() {
    let ctx = ctx();
    let ch = ctx.open_channel();

    let mut buf = 0x77u32.to_le_bytes().to_vec();
    buf.extend_from_slice(&[0xAA; 20]);

    // the opcode word is consumed, nothing else happens
    assert_eq!(ch.write(&ctx, &buf).expect("write"), 4);
    assert!(!ch.poll().readable, "no outbound message for unknown opcode");
}

#[test]
fn fragment_shorter_than_an_opcode_consumes_nothing() {
    let ctx = ctx();
    let ch = ctx.open_channel();

    assert_eq!(ch.write(&ctx, &[0x21, 0x00]).expect("write"), 0);
    assert!(!ch.poll().readable);
}

// -------- channel lifetime --------

#[test]
fn channel_leaves_the_registry_on_last_drop() {
    let ctx = ctx();
    assert_eq!(ctx.channels().len(), 0);

    let ch = ctx.open_channel();
    assert_eq!(ctx.channels().len(), 1);

    let second_owner = Arc::clone(&ch);
    drop(ch);
    assert_eq!(ctx.channels().len(), 1, "still one strong owner left");

    drop(second_owner);
    assert_eq!(ctx.channels().len(), 0, "deregistered on last release");

    ctx.channels().done();
}
