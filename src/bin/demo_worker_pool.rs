// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Worker pool: each worker announces how many jobs it wants on its jobs
// channel, receives that many job indices, runs them, and pushes the
// results to its results channel. The parent farms out the whole job table
// to every worker and collects the results.

use std::sync::Arc;

use libcsp::{spawn_with_channel, Channel, StackSpec};

type Job = fn() -> i32;

fn task1() -> i32 {
    println!("task1");
    1
}

fn task2() -> i32 {
    println!("task2");
    2
}

fn task3() -> i32 {
    println!("task3");
    3
}

const TASKS: [Job; 3] = [task1, task2, task3];
const WORKERS: usize = 2;

fn jobber(results: Arc<Channel>, jobs: &Channel) {
    let want = TASKS.len() as u32;
    jobs.send(&want.to_ne_bytes());

    for _ in 0..want {
        let mut buf = [0u8; 4];
        if jobs.recv(&mut buf) == 0 {
            break;
        }
        let index = u32::from_ne_bytes(buf) as usize;
        let retval = TASKS[index]();
        results.send(&retval.to_ne_bytes());
    }
}

fn main() {
    let jobs: Vec<Arc<Channel>> = (0..WORKERS).map(|_| Channel::make(true)).collect();
    let results: Vec<Arc<Channel>> = (0..WORKERS).map(|_| Channel::make(true)).collect();

    let workers: Vec<_> = (0..WORKERS)
        .map(|i| {
            spawn_with_channel(
                StackSpec::DEFAULT,
                jobber,
                Arc::clone(&jobs[i]),
                Arc::clone(&results[i]),
            )
            .expect("spawn worker")
        })
        .collect();

    let mut total_jobs = 0usize;
    for c in &jobs {
        let mut buf = [0u8; 4];
        c.recv(&mut buf);
        total_jobs += u32::from_ne_bytes(buf) as usize;
    }
    println!("workers want {total_jobs} jobs");

    for c in &jobs {
        for index in 0..TASKS.len() as u32 {
            c.send(&index.to_ne_bytes());
        }
    }

    let mut collected = Vec::new();
    for i in 0..total_jobs {
        let mut buf = [0u8; 4];
        results[i % WORKERS].recv(&mut buf);
        collected.push(i32::from_ne_bytes(buf));
    }

    for w in &workers {
        w.wait();
    }
    collected.sort_unstable();
    println!("results: {collected:?}");
}
