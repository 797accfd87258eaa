// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ping-pong counter over one unbuffered channel: the parent sends a value,
// the peer increments and returns it, until the parent closes the channel.

use std::sync::Arc;

use libcsp::{spawn_with_channel, Channel, StackSpec};

const ROUNDS: u32 = 10;

fn ponger(_: (), c: &Channel) -> u32 {
    let mut buf = [0u8; 4];
    let mut last = 0;
    loop {
        if c.recv(&mut buf) == 0 {
            break;
        }
        last = u32::from_ne_bytes(buf) + 1;
        println!("2nd: got value, replying with {last}");
        if c.send(&last.to_ne_bytes()) == 0 {
            break;
        }
    }
    last
}

fn main() {
    println!("starting ping-pong");
    let c = Channel::make(false);
    let pong = spawn_with_channel(StackSpec::DEFAULT, ponger, Arc::clone(&c), ())
        .expect("spawn ponger");

    let mut value: u32 = 1;
    let mut last = 0;
    for _ in 0..ROUNDS {
        if c.send(&value.to_ne_bytes()) == 0 {
            break;
        }
        let mut buf = [0u8; 4];
        if c.recv(&mut buf) == 0 {
            break;
        }
        last = u32::from_ne_bytes(buf);
        println!("1st: got value {last}");
        value = last + 1;
    }

    c.close();
    pong.wait();
    println!("final value: {last}");
}
