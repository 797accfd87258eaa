// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process contexts: a user function running on its own host process with a
// preserved return value. The context outlives the host process, so the
// spawner can read the result at any point after the function returns.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use bitflags::bitflags;
use log::{debug, trace};
use thiserror::Error;

use crate::channel::Channel;
use crate::sched::{self, Pid};

bitflags! {
    /// Process status word. A stopped process has `RUNNING` cleared.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ProcessFlags: u16 {
        const SKIP = 1 << 0;
        const RUNNING = 1 << 1;
    }
}

/// Stack request for a spawned process.
///
/// The host scheduler owns the actual stack region; the context lives on
/// the heap and stays valid after the host process exits.
#[derive(Clone, Copy, Debug)]
pub struct StackSpec {
    pub size: usize,
}

impl StackSpec {
    /// Default stack for CSP processes.
    pub const DEFAULT: StackSpec = StackSpec { size: 64 * 1024 };

    /// Smallest stack the factory accepts.
    pub const MIN_SIZE: usize = 4 * 1024;

    pub const fn with_size(size: usize) -> StackSpec {
        StackSpec { size }
    }
}

impl Default for StackSpec {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Factory failures. Every other error mode of the runtime is a zero-byte
/// return on the channel surface; only process creation reports through
/// `Result`.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("stack of {0} bytes is too small for a process")]
    StackTooSmall(usize),
    #[error("host scheduler rejected the process: {0}")]
    Rejected(#[from] io::Error),
}

struct Context<R> {
    flags: Mutex<ProcessFlags>,
    stopped: Condvar,
    retval: Mutex<Option<R>>,
    pid: Mutex<Option<Pid>>,
    join: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

/// Handle to a CSP process context.
///
/// Clones share one context. The context persists after the process stops
/// and keeps the user function's return value for [`ret`](Process::ret).
pub struct Process<R> {
    ctx: Arc<Context<R>>,
}

impl<R> Clone for Process<R> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<R> std::fmt::Debug for Process<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.ctx.name)
            .field("flags", &*lock(&self.ctx.flags))
            .finish()
    }
}

static PROCESS_COUNT: AtomicUsize = AtomicUsize::new(0);

fn next_name() -> String {
    format!("csp-{}", PROCESS_COUNT.fetch_add(1, Ordering::Relaxed))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn a process running `f(args)`.
pub fn spawn<A, R, F>(stack: StackSpec, f: F, args: A) -> Result<Process<R>, SpawnError>
where
    F: FnOnce(A) -> R + Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    spawn_inner(stack, move || f(args))
}

/// Spawn a process running `f(args, &channel)`.
///
/// The channel-carrying arity of the dispatcher; the channel rides along
/// pinned and is handed to the function by reference.
pub fn spawn_with_channel<A, R, F>(
    stack: StackSpec,
    f: F,
    channel: Arc<Channel>,
    args: A,
) -> Result<Process<R>, SpawnError>
where
    F: FnOnce(A, &Channel) -> R + Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    spawn_inner(stack, move || f(args, &channel))
}

fn spawn_inner<R, F>(stack: StackSpec, body: F) -> Result<Process<R>, SpawnError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if stack.size < StackSpec::MIN_SIZE {
        return Err(SpawnError::StackTooSmall(stack.size));
    }
    let name = next_name();
    let ctx = Arc::new(Context {
        flags: Mutex::new(ProcessFlags::RUNNING),
        stopped: Condvar::new(),
        retval: Mutex::new(None),
        pid: Mutex::new(None),
        join: Mutex::new(None),
        name: name.clone(),
    });
    let tramp = Arc::clone(&ctx);
    let join = sched::spawn_host(name, stack.size, move || dispatch(tramp, body))?;
    *lock(&ctx.pid) = Some(join.thread().id());
    *lock(&ctx.join) = Some(join);
    Ok(Process { ctx })
}

/// Dispatch trampoline: run the user function, preserve its return value,
/// flip the status to stopped, and let the host process exit.
fn dispatch<R, F: FnOnce() -> R>(ctx: Arc<Context<R>>, body: F) {
    // Waiters are released even if the user function panics.
    struct Stop<'a, R>(&'a Context<R>);
    impl<R> Drop for Stop<'_, R> {
        fn drop(&mut self) {
            let mut flags = lock(&self.0.flags);
            flags.remove(ProcessFlags::RUNNING);
            self.0.stopped.notify_all();
        }
    }

    trace!("{}: dispatching", ctx.name);
    let stop = Stop(&ctx);
    let ret = body();
    *lock(&ctx.retval) = Some(ret);
    drop(stop);
    debug!("{}: stopped", ctx.name);
}

impl<R> Process<R> {
    /// Whether the process is still running.
    ///
    /// Yields once while it is, so a polling caller cannot starve a
    /// cooperatively scheduled peer.
    pub fn running(&self) -> bool {
        if lock(&self.ctx.flags).contains(ProcessFlags::RUNNING) {
            sched::yield_now();
            true
        } else {
            false
        }
    }

    /// Block until the process stops.
    pub fn wait(&self) {
        let mut flags = lock(&self.ctx.flags);
        while flags.contains(ProcessFlags::RUNNING) {
            flags = self
                .ctx
                .stopped
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Tear the process down from outside.
    ///
    /// The host cannot destroy a thread preemptively: the status flips to
    /// stopped and the host handle is reaped, but a function that never
    /// returns keeps its thread. Error paths only; the normal lifecycle is
    /// self-termination through the trampoline.
    pub fn kill(&self) {
        let mut flags = lock(&self.ctx.flags);
        flags.remove(ProcessFlags::RUNNING);
        self.ctx.stopped.notify_all();
        drop(flags);
        let _ = lock(&self.ctx.join).take();
        debug!("{}: killed", self.ctx.name);
    }

    /// Generated debug name of the process.
    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    /// Host identity, once the process has been created.
    pub fn pid(&self) -> Option<Pid> {
        *lock(&self.ctx.pid)
    }
}

impl<R: Clone> Process<R> {
    /// Return value of the user function; `None` until the process stops.
    ///
    /// Readable any number of times — the context preserves the value.
    pub fn ret(&self) -> Option<R> {
        lock(&self.ctx.retval).clone()
    }
}
