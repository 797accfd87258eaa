// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Packet plexer: a fan-out process receives tagged packets on a control
// channel and forwards each to the stream its id selects. A packet with
// id -1 is the shutdown sentinel and goes to every stream.

use std::sync::Arc;

use libcsp::{sched, spawn_with_channel, Channel, StackSpec};

const STREAM_COUNT: usize = 5;
const PACKET_DATA: [&str; 5] = ["packet_1", "packet_2", "packet_3", "packet_4", "packet_5"];

const PACKET_WIRE: usize = 4 + 8;

#[derive(Clone, Copy)]
struct Packet {
    id: i32,
    data: [u8; 8],
}

impl Packet {
    fn named(id: i32, name: &str) -> Packet {
        let mut data = [0u8; 8];
        data[..name.len().min(8)].copy_from_slice(&name.as_bytes()[..name.len().min(8)]);
        Packet { id, data }
    }

    fn encode(&self) -> [u8; PACKET_WIRE] {
        let mut wire = [0u8; PACKET_WIRE];
        wire[..4].copy_from_slice(&self.id.to_ne_bytes());
        wire[4..].copy_from_slice(&self.data);
        wire
    }

    fn decode(wire: &[u8; PACKET_WIRE]) -> Packet {
        let mut id = [0u8; 4];
        id.copy_from_slice(&wire[..4]);
        let mut data = [0u8; 8];
        data.copy_from_slice(&wire[4..]);
        Packet {
            id: i32::from_ne_bytes(id),
            data,
        }
    }
}

fn packet_plexer(streams: Vec<Arc<Channel>>, c: &Channel) {
    // Adopt the creator side of every stream so this process and each
    // handler land on opposite files.
    for s in &streams {
        s.set_owner(sched::active_pid());
    }

    let mut wire = [0u8; PACKET_WIRE];
    loop {
        if c.recv(&mut wire) == 0 {
            break;
        }
        let p = Packet::decode(&wire);
        if p.id == -1 {
            // Shutdown: everyone gets the sentinel.
            for s in &streams {
                s.send(&wire);
            }
            break;
        }
        if (p.id as usize) < streams.len() {
            streams[p.id as usize].send(&wire);
        }
    }
    c.close();
    println!("plexer: done");
}

fn packet_handler(index: usize, c: &Channel) {
    let mut wire = [0u8; PACKET_WIRE];
    loop {
        if c.recv(&mut wire) == 0 {
            break;
        }
        let p = Packet::decode(&wire);
        println!(
            "handler {index}: received packet {{ {}, {} }}",
            p.id,
            String::from_utf8_lossy(&p.data)
        );
        if p.id == -1 {
            break;
        }
    }
    c.close();
}

fn main() {
    let control = Channel::make(true);
    let streams: Vec<Arc<Channel>> = (0..STREAM_COUNT).map(|_| Channel::make(true)).collect();

    let plexer = spawn_with_channel(
        StackSpec::DEFAULT,
        packet_plexer,
        Arc::clone(&control),
        streams.clone(),
    )
    .expect("spawn plexer");

    let handlers: Vec<_> = streams
        .iter()
        .enumerate()
        .map(|(i, s)| {
            spawn_with_channel(StackSpec::DEFAULT, packet_handler, Arc::clone(s), i)
                .expect("spawn handler")
        })
        .collect();

    for round in 0..PACKET_DATA.len() * STREAM_COUNT {
        let p = Packet::named(
            (round % STREAM_COUNT) as i32,
            PACKET_DATA[round % PACKET_DATA.len()],
        );
        control.send(&p.encode());
    }

    let sentinel = Packet::named(-1, "");
    control.send(&sentinel.encode());

    plexer.wait();
    for h in &handlers {
        h.wait();
    }
    println!("all streams drained");
}
