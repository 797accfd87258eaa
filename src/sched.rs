// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Scheduler façade: the only module that talks to the host kernel.
// The runtime needs six things from a scheduler — who am I, sleep me,
// wake him, yield, am I in an interrupt handler, and make a process —
// and this module maps each onto the host thread layer.

use std::io;
use std::thread::{self, JoinHandle, Thread};

use log::debug;

/// Identity of a host process.
pub type Pid = thread::ThreadId;

/// Handle to a host process, held by a channel while that party is parked.
#[derive(Clone, Debug)]
pub struct ProcHandle {
    thread: Thread,
}

impl ProcHandle {
    pub fn pid(&self) -> Pid {
        self.thread.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.thread.name()
    }
}

/// Handle of the currently active process.
pub fn active() -> ProcHandle {
    ProcHandle {
        thread: thread::current(),
    }
}

pub fn active_pid() -> Pid {
    thread::current().id()
}

/// Suspend the calling process until another party wakes it.
///
/// A wake that lands before the sleep is not lost: the host keeps the wake
/// token and the next `sleep_self` returns immediately. The host may also
/// resume a sleeper spuriously, so callers must re-check their wait
/// condition on every return.
pub fn sleep_self() {
    thread::park();
}

/// Mark another process runnable.
pub fn wake(h: &ProcHandle) {
    h.thread.unpark();
}

/// Hand the CPU to another runnable process, if any.
///
/// Host threads carry no kernel-style priority levels, so this also stands
/// in for "switch to the woken party's priority" after a wake.
pub fn yield_now() {
    thread::yield_now();
}

/// Whether the caller runs inside an interrupt handler.
///
/// Host threads never do. The channel protocol keeps its no-park branches
/// behind this probe so its contract matches kernels where the answer can
/// be yes.
pub fn is_interrupt_context() -> bool {
    false
}

/// Create a host process with the given name and stack size, running
/// `entry` to completion.
pub fn spawn_host<F>(name: String, stack_size: usize, entry: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    debug!("sched: creating process {name} with {stack_size} byte stack");
    thread::Builder::new()
        .name(name)
        .stack_size(stack_size)
        .spawn(entry)
}
