// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Communicating sequential processes on host threads: spawn lightweight
// processes, connect them with synchronous or buffered byte channels, and
// let them rendezvous the way goroutines do.

pub mod ring;
pub use ring::RingBuffer;

pub mod sched;
pub use sched::{Pid, ProcHandle};

pub mod channel;
pub use channel::{recv_select, send_select, Channel};

pub mod process;
pub use process::{spawn, spawn_with_channel, Process, ProcessFlags, SpawnError, StackSpec};
