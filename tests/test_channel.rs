// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel engine integration tests: framing, rendezvous, closure, drain,
// barriers, select, and the fan-out topology.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libcsp::{recv_select, sched, send_select, spawn, spawn_with_channel, Channel, StackSpec};

// ========== Framing ==========

#[test]
fn hello_world_rendezvous() {
    let c = Channel::make(false);

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut buf = [0u8; 32];
            let n = c.recv(&mut buf);
            (n, buf)
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    let sent = c.send(b"hello world!\0");
    assert_eq!(sent, 13);

    receiver.wait();
    let (n, buf) = receiver.ret().expect("ret");
    assert_eq!(n, 13);
    assert_eq!(&buf[..13], b"hello world!\0");
}

#[test]
fn message_larger_than_buffer_arrives_whole() {
    // 100-byte message through 32-byte files: several chunks per message.
    let c = Channel::make(false);
    let data: Vec<u8> = (0..100).map(|i| (i % 256) as u8).collect();
    let expect = data.clone();

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut buf = [0u8; 128];
            let n = c.recv(&mut buf);
            buf[..n].to_vec()
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    assert_eq!(c.send(&data), 100);
    receiver.wait();
    assert_eq!(receiver.ret().expect("ret"), expect);
}

#[test]
fn messages_arrive_in_send_order() {
    let c = Channel::with_capacity(true, 128);
    for word in [&b"one"[..], b"two", b"three"] {
        assert_eq!(c.send(word), word.len());
    }

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut out = Vec::new();
            let mut buf = [0u8; 16];
            loop {
                let n = c.recv(&mut buf);
                if n == 0 {
                    break;
                }
                out.push(buf[..n].to_vec());
            }
            out
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    c.close();
    receiver.wait();
    let got = receiver.ret().expect("ret");
    assert_eq!(got, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
}

#[test]
fn short_destination_keeps_stream_framed() {
    let c = Channel::with_capacity(true, 64);
    assert_eq!(c.send(b"0123456789"), 10);
    assert_eq!(c.send(b"next"), 4);
    c.close();

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut small = [0u8; 4];
            let first = c.recv(&mut small);
            let mut buf = [0u8; 16];
            let second = c.recv(&mut buf);
            (first, small, second, buf)
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    receiver.wait();
    let (first, small, second, buf) = receiver.ret().expect("ret");
    // The 10-byte message is consumed whole even though only 4 bytes fit.
    assert_eq!(first, 10);
    assert_eq!(&small, b"0123");
    assert_eq!(second, 4);
    assert_eq!(&buf[..4], b"next");
}

// ========== Rendezvous ==========

#[test]
fn unbuffered_send_blocks_until_recv() {
    let c = Channel::make(false);
    let sent_flag = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&sent_flag);
    let sender = spawn_with_channel(
        StackSpec::DEFAULT,
        move |_: (), c: &Channel| {
            c.send(b"data");
            flag.store(true, Ordering::SeqCst);
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn sender");

    thread::sleep(Duration::from_millis(50));
    assert!(
        !sent_flag.load(Ordering::SeqCst),
        "send completed with no receiver"
    );

    let mut buf = [0u8; 8];
    assert_eq!(c.recv(&mut buf), 4);
    sender.wait();
    assert!(sent_flag.load(Ordering::SeqCst));
}

#[test]
fn barrier_meets_both_sides() {
    let c = Channel::make(false);
    let passed = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&passed);
    let peer = spawn_with_channel(
        StackSpec::DEFAULT,
        move |_: (), c: &Channel| {
            c.recv_sync();
            flag.store(true, Ordering::SeqCst);
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn peer");

    thread::sleep(Duration::from_millis(50));
    assert!(!passed.load(Ordering::SeqCst), "barrier passed without a peer");

    c.send_sync();
    peer.wait();
    assert!(passed.load(Ordering::SeqCst));
}

#[test]
fn pingpong_counter_reaches_twenty() {
    let c = Channel::make(false);

    let pong = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut buf = [0u8; 4];
            loop {
                if c.recv(&mut buf) == 0 {
                    break;
                }
                let v = u32::from_ne_bytes(buf) + 1;
                if c.send(&v.to_ne_bytes()) == 0 {
                    break;
                }
            }
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn ponger");

    let mut value: u32 = 1;
    let mut last = 0;
    for _ in 0..10 {
        assert_ne!(c.send(&value.to_ne_bytes()), 0);
        let mut buf = [0u8; 4];
        assert_ne!(c.recv(&mut buf), 0);
        last = u32::from_ne_bytes(buf);
        value = last + 1;
    }
    assert_eq!(last, 20);

    c.close();
    pong.wait();
}

// ========== Closure ==========

#[test]
fn close_unblocks_parked_receiver() {
    let c = Channel::make(false);

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut buf = [0u8; 8];
            c.recv(&mut buf)
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    // Let the receiver park on the empty channel first.
    thread::sleep(Duration::from_millis(50));
    c.close();

    receiver.wait();
    assert_eq!(receiver.ret(), Some(0));
}

#[test]
fn close_unblocks_parked_sender() {
    let c = Channel::make(false);

    let sender = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| c.send(b"stranded"),
        Arc::clone(&c),
        (),
    )
    .expect("spawn sender");

    thread::sleep(Duration::from_millis(50));
    c.close();

    sender.wait();
    assert_eq!(sender.ret(), Some(0));
}

#[test]
fn buffered_message_survives_close() {
    let c = Channel::make(true);
    assert_eq!(c.send(&[0x42u8; 20]), 20);
    c.close();

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut buf = [0u8; 32];
            let first = c.recv(&mut buf);
            let second = c.recv(&mut buf);
            (first, second)
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    receiver.wait();
    assert_eq!(receiver.ret(), Some((20, 0)));
}

#[test]
fn post_close_drain_delivers_every_complete_message() {
    let c = Channel::with_capacity(true, 128);
    assert_eq!(c.send(b"alpha"), 5);
    assert_eq!(c.send(b"beta"), 4);
    assert_eq!(c.send(b"gamma"), 5);
    c.close();

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut out = Vec::new();
            let mut buf = [0u8; 16];
            loop {
                let n = c.recv(&mut buf);
                if n == 0 {
                    break;
                }
                out.push(buf[..n].to_vec());
            }
            out
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    receiver.wait();
    let got = receiver.ret().expect("ret");
    assert_eq!(
        got,
        vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]
    );
}

#[test]
fn short_tail_after_close_is_unreadable() {
    // A 40-byte message cannot fully land in a 32-byte file without a
    // reader; close strands the tail and the receiver must see 0.
    let c = Channel::make(true);

    let sender = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| c.send(&[0xEEu8; 40]),
        Arc::clone(&c),
        (),
    )
    .expect("spawn sender");

    // Sender parks with a partial payload committed.
    thread::sleep(Duration::from_millis(50));
    c.close();
    sender.wait();
    let partial = sender.ret().expect("ret");
    assert!(partial < 40);

    let mut buf = [0u8; 64];
    assert_eq!(c.recv(&mut buf), 0);
}

// ========== Try variants and select ==========

#[test]
fn try_recv_roundtrip() {
    let c = Channel::make(true);
    assert_eq!(c.try_send(b"ping"), 4);

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let mut buf = [0u8; 8];
            loop {
                let n = c.try_recv(&mut buf);
                if n != 0 {
                    return buf[..n].to_vec();
                }
                sched::yield_now();
            }
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    receiver.wait();
    assert_eq!(receiver.ret().expect("ret"), b"ping".to_vec());
}

#[test]
fn send_select_picks_the_free_channel() {
    let a = Channel::with_capacity(true, 16);
    let b = Channel::with_capacity(true, 16);
    // Fill `a` so only `b` can take the next message.
    assert_eq!(a.try_send(&[0u8; 12]), 12);

    let winner = send_select(&[a.as_ref(), b.as_ref()], b"pick me");
    assert_eq!(winner, 1);
}

#[test]
fn recv_select_picks_the_ready_channel() {
    let a = Channel::make(true);
    let b = Channel::make(true);
    assert_eq!(b.send(b"here"), 4);

    let receiver = spawn(
        StackSpec::DEFAULT,
        move |(a, b): (Arc<Channel>, Arc<Channel>)| {
            let mut buf = [0u8; 8];
            let winner = recv_select(&[a.as_ref(), b.as_ref()], &mut buf);
            (winner, buf[..4].to_vec())
        },
        (Arc::clone(&a), Arc::clone(&b)),
    )
    .expect("spawn receiver");

    receiver.wait();
    let (winner, data) = receiver.ret().expect("ret");
    assert_eq!(winner, 1);
    assert_eq!(data, b"here".to_vec());
}

// ========== Drop ==========

#[test]
fn drop_next_discards_one_message() {
    let c = Channel::with_capacity(true, 64);
    assert_eq!(c.send(b"discard me"), 10);
    assert_eq!(c.send(b"keep"), 4);

    let receiver = spawn_with_channel(
        StackSpec::DEFAULT,
        |_: (), c: &Channel| {
            let dropped = c.drop_next();
            let mut buf = [0u8; 8];
            let n = c.recv(&mut buf);
            (dropped, n, buf)
        },
        Arc::clone(&c),
        (),
    )
    .expect("spawn receiver");

    receiver.wait();
    let (dropped, n, buf) = receiver.ret().expect("ret");
    assert_eq!(dropped, 10);
    assert_eq!(n, 4);
    assert_eq!(&buf[..4], b"keep");
}

// ========== Ownership ==========

#[test]
fn set_owner_moves_the_creator_side() {
    let c = Channel::make(true);
    assert_eq!(c.creator(), sched::active_pid());

    // Hand the creator side to another party: this process then reads the
    // file it used to write, turning the channel into a loopback.
    assert_eq!(c.send(b"loop"), 4);
    let other = thread::spawn(|| thread::current().id())
        .join()
        .expect("join");
    c.set_owner(other);
    assert_eq!(c.creator(), other);

    let mut buf = [0u8; 8];
    assert_eq!(c.recv(&mut buf), 4);
    assert_eq!(&buf[..4], b"loop");
}

// ========== Fan-out topology ==========

#[test]
fn plexer_fans_out_in_order_with_sentinel() {
    const STREAMS: usize = 3;
    const PER_STREAM: usize = 4;
    const WIRE: usize = 8; // id i32 + seq u32

    fn encode(id: i32, seq: u32) -> [u8; WIRE] {
        let mut w = [0u8; WIRE];
        w[..4].copy_from_slice(&id.to_ne_bytes());
        w[4..].copy_from_slice(&seq.to_ne_bytes());
        w
    }

    fn decode(w: &[u8; WIRE]) -> (i32, u32) {
        let mut id = [0u8; 4];
        id.copy_from_slice(&w[..4]);
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&w[4..]);
        (i32::from_ne_bytes(id), u32::from_ne_bytes(seq))
    }

    let control = Channel::make(true);
    let streams: Vec<Arc<Channel>> = (0..STREAMS).map(|_| Channel::make(true)).collect();

    let plexer = spawn_with_channel(
        StackSpec::DEFAULT,
        |streams: Vec<Arc<Channel>>, c: &Channel| {
            for s in &streams {
                s.set_owner(sched::active_pid());
            }
            let mut wire = [0u8; WIRE];
            loop {
                if c.recv(&mut wire) == 0 {
                    break;
                }
                let (id, _) = decode(&wire);
                if id == -1 {
                    for s in &streams {
                        s.send(&wire);
                    }
                    break;
                }
                streams[id as usize].send(&wire);
            }
        },
        Arc::clone(&control),
        streams.clone(),
    )
    .expect("spawn plexer");

    let workers: Vec<_> = streams
        .iter()
        .map(|s| {
            spawn_with_channel(
                StackSpec::DEFAULT,
                |_: (), c: &Channel| {
                    let mut seen = Vec::new();
                    let mut wire = [0u8; WIRE];
                    loop {
                        if c.recv(&mut wire) == 0 {
                            break;
                        }
                        let (id, seq) = decode(&wire);
                        seen.push((id, seq));
                        if id == -1 {
                            break;
                        }
                    }
                    seen
                },
                Arc::clone(s),
                (),
            )
            .expect("spawn worker")
        })
        .collect();

    for seq in 0..(STREAMS * PER_STREAM) as u32 {
        let id = (seq as usize % STREAMS) as i32;
        assert_ne!(control.send(&encode(id, seq)), 0);
    }
    assert_ne!(control.send(&encode(-1, 0)), 0);

    plexer.wait();
    for (i, w) in workers.iter().enumerate() {
        w.wait();
        let seen = w.ret().expect("ret");
        // Every packet for this stream, in send order, then the sentinel.
        assert_eq!(seen.len(), PER_STREAM + 1);
        let mut prev_seq = None;
        for &(id, seq) in &seen[..PER_STREAM] {
            assert_eq!(id, i as i32);
            if let Some(p) = prev_seq {
                assert!(seq > p, "stream {i} saw packets out of order");
            }
            prev_seq = Some(seq);
        }
        assert_eq!(seen[PER_STREAM].0, -1);
    }
}
