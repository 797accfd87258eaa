// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Hello-world rendezvous: the parent drops a greeting into a buffered
// channel before the receiver even exists, spawns a process to pick it up,
// and meets it at a barrier on a second, unbuffered channel.

use std::sync::Arc;

use libcsp::{spawn, spawn_with_channel, Channel, StackSpec};

fn print_greeting(tag: &'static str, c: &Channel) {
    println!("{tag}");
    let mut buf = [0u8; 32];
    println!("trying to recv");
    let n = c.recv(&mut buf);
    println!("{}", String::from_utf8_lossy(&buf[..n]));
}

fn hello(arg: &'static str) {
    println!("{arg}");
}

fn main() {
    let c = Channel::make(true);
    let greeting = b"hello world!\0";
    c.send(greeting);

    let printer = spawn_with_channel(StackSpec::DEFAULT, print_greeting, Arc::clone(&c), "test")
        .expect("spawn printer");
    let plain = spawn(StackSpec::DEFAULT, hello, "yippeee").expect("spawn hello");

    // Barrier on an unbuffered channel so main outlives the printer.
    let barrier = Channel::make(false);
    let b = Arc::clone(&barrier);
    let waiter = spawn(StackSpec::DEFAULT, move |_: ()| b.recv_sync(), ()).expect("spawn waiter");

    println!("synchronize main");
    barrier.send_sync();

    printer.wait();
    plain.wait();
    waiter.wait();
    println!("end of main");
}
