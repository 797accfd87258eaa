// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bidirectional two-party channel with Go-like blocking semantics.
//
// A channel owns one ring buffer per direction ("channel files"). Messages
// travel as a u32 length prefix followed by the payload, possibly in
// several chunks when the buffer is smaller than the message. All channel
// state sits behind a single mutex standing in for the interrupt mask of a
// uniprocessor kernel: held across every state mutation, released at every
// suspension point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use log::{debug, trace};

use crate::ring::{RingBuffer, DEFAULT_CAPACITY};
use crate::sched::{self, Pid, ProcHandle};

/// Width of the length prefix framing every message.
pub const LEN_PREFIX: usize = std::mem::size_of::<u32>();

bitflags! {
    /// Channel flag word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ChannelFlags: u32 {
        const CLOSED = 1 << 0;
        const BUFFERED = 1 << 1;
        const SEND_READY = 1 << 2;
        const RECV_READY = 1 << 3;
    }
}

/// Which blocked-party slot a parked process occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// A party waiting for the peer to read (a blocked sender).
    Read,
    /// A party waiting for the peer to write (a blocked receiver).
    Write,
}

/// One directed half of a channel.
struct ChannelFile {
    rb: RingBuffer,
}

struct ChannelState {
    creator: Pid,
    flags: ChannelFlags,
    read_blocked: Option<ProcHandle>,
    write_blocked: Option<ProcHandle>,
    files: [ChannelFile; 2],
}

impl ChannelState {
    fn is_creator(&self) -> bool {
        self.creator == sched::active_pid()
    }

    /// Index of the file the calling party sends into.
    fn send_idx(&self) -> usize {
        self.is_creator() as usize
    }

    /// Index of the file the calling party receives from — the one the
    /// peer sends into. Distinct per party; this is what makes the two
    /// files a bidirectional pipe.
    fn recv_idx(&self) -> usize {
        !self.is_creator() as usize
    }

    fn closed(&self) -> bool {
        self.flags.contains(ChannelFlags::CLOSED)
    }

    fn buffered(&self) -> bool {
        self.flags.contains(ChannelFlags::BUFFERED)
    }

    fn slot(&self, s: Slot) -> &Option<ProcHandle> {
        match s {
            Slot::Read => &self.read_blocked,
            Slot::Write => &self.write_blocked,
        }
    }

    fn slot_mut(&mut self, s: Slot) -> &mut Option<ProcHandle> {
        match s {
            Slot::Read => &mut self.read_blocked,
            Slot::Write => &mut self.write_blocked,
        }
    }
}

/// Destination of a receive: the caller's buffer or the discard sink.
enum Dest<'a> {
    Buf(&'a mut [u8]),
    Discard,
}

/// A synchronous, optionally buffered byte channel between exactly two
/// parties: the creator and one peer.
///
/// Unbuffered channels rendezvous — a send blocks until a receive meets it
/// and vice versa, as with an unbuffered Go channel. Buffered channels
/// move bytes as long as there is space or data, blocking only on a full
/// or empty buffer. Either party may [`close`](Channel::close); a closed
/// channel still hands the receiver every complete message it buffered.
pub struct Channel {
    state: Mutex<ChannelState>,
}

impl Channel {
    /// Create a channel owned by the calling process.
    ///
    /// The channel is handed out pinned behind an [`Arc`]; both parties
    /// address the same allocation for its whole lifetime.
    pub fn make(buffered: bool) -> Arc<Channel> {
        Self::with_capacity(buffered, DEFAULT_CAPACITY)
    }

    /// Create a channel with an explicit per-direction buffer capacity.
    pub fn with_capacity(buffered: bool, capacity: usize) -> Arc<Channel> {
        let flags = if buffered {
            ChannelFlags::BUFFERED
        } else {
            ChannelFlags::empty()
        };
        let c = Arc::new(Channel {
            state: Mutex::new(ChannelState {
                creator: sched::active_pid(),
                flags,
                read_blocked: None,
                write_blocked: None,
                files: [
                    ChannelFile {
                        rb: RingBuffer::new(capacity),
                    },
                    ChannelFile {
                        rb: RingBuffer::new(capacity),
                    },
                ],
            }),
        });
        debug!(
            "channel {:p}: created, buffered={buffered}, capacity={capacity}",
            Arc::as_ptr(&c)
        );
        c
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        // A panicking user process must not wedge the peer's operations.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the channel. Idempotent; either party may close.
    ///
    /// Both blocked slots are woken so a parked party re-observes the flag
    /// instead of sleeping on a channel that can no longer progress.
    pub fn close(&self) {
        let mut st = self.lock_state();
        st.flags.insert(ChannelFlags::CLOSED);
        let read = st.read_blocked.take();
        let write = st.write_blocked.take();
        drop(st);
        debug!("channel {:p}: closed", self as *const Channel);
        if let Some(h) = read {
            sched::wake(&h);
        }
        if let Some(h) = write {
            sched::wake(&h);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed()
    }

    pub fn is_buffered(&self) -> bool {
        self.lock_state().buffered()
    }

    /// The party currently holding the creator side.
    pub fn creator(&self) -> Pid {
        self.lock_state().creator
    }

    /// Reassign the creator side to `pid`.
    ///
    /// Needed when the process that made a channel hands both ends to other
    /// parties: the forwarding party adopts the creator side so the two
    /// remaining users land on opposite files.
    pub fn set_owner(&self, pid: Pid) {
        self.lock_state().creator = pid;
    }

    // ------------------------------------------------------------------
    // Parking and waking
    // ------------------------------------------------------------------

    /// Park the calling process in `slot` until a waker takes it out.
    ///
    /// The state lock is released while asleep and re-acquired before
    /// returning. Wakers always clear the slot before waking, so a resume
    /// that finds the caller still registered is spurious and goes back to
    /// sleep — unless the channel closed, in which case the slot is vacated
    /// and control returns to let the caller re-observe the flag.
    fn park_in<'a>(
        &'a self,
        mut st: MutexGuard<'a, ChannelState>,
        slot: Slot,
    ) -> MutexGuard<'a, ChannelState> {
        let me = sched::active();
        trace!(
            "channel {:p}: {:?} parks in {slot:?}",
            self as *const Channel,
            me.pid()
        );
        *st.slot_mut(slot) = Some(me.clone());
        loop {
            drop(st);
            sched::sleep_self();
            st = self.lock_state();
            let still_parked = st.slot(slot).as_ref().is_some_and(|h| h.pid() == me.pid());
            if !still_parked {
                break;
            }
            if st.closed() {
                *st.slot_mut(slot) = None;
                break;
            }
        }
        trace!(
            "channel {:p}: {:?} resumes",
            self as *const Channel,
            me.pid()
        );
        st
    }

    /// Wake the party parked in `slot`, if any, and yield so it can run.
    fn wake_other<'a>(
        &'a self,
        mut st: MutexGuard<'a, ChannelState>,
        slot: Slot,
    ) -> MutexGuard<'a, ChannelState> {
        let woken = st.slot_mut(slot).take();
        drop(st);
        if let Some(h) = woken {
            trace!(
                "channel {:p}: waking {:?} from {slot:?}",
                self as *const Channel,
                h.pid()
            );
            sched::wake(&h);
            sched::yield_now();
        }
        self.lock_state()
    }

    /// Wake the party parked in `slot` on the way out of an operation.
    fn wake_and_release(&self, mut st: MutexGuard<'_, ChannelState>, slot: Slot) {
        let woken = st.slot_mut(slot).take();
        drop(st);
        if let Some(h) = woken {
            sched::wake(&h);
        }
    }

    /// Rendezvous gate: on an unbuffered channel a sender and a receiver
    /// must meet before any bytes move. The first party to arrive parks in
    /// its own slot; the second pops and wakes it, then both proceed.
    fn synchronize<'a>(
        &'a self,
        st: MutexGuard<'a, ChannelState>,
        sender: bool,
    ) -> MutexGuard<'a, ChannelState> {
        if st.buffered() {
            return st;
        }
        let (other, mine) = if sender {
            (Slot::Write, Slot::Read)
        } else {
            (Slot::Read, Slot::Write)
        };
        if st.slot(other).is_some() {
            self.wake_other(st, other)
        } else if st.closed() {
            // No peer can arrive any more; fall through to the flag checks.
            st
        } else {
            self.park_in(st, mine)
        }
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Send a message, blocking until the whole payload is committed.
    ///
    /// Returns `data.len()` on success and 0 if the channel is closed or
    /// the caller sits in interrupt context; a close mid-transfer returns
    /// the bytes committed so far. An empty `data` is the barrier: the
    /// rendezvous gate completes and no bytes move.
    pub fn send(&self, data: &[u8]) -> usize {
        let mut st = self.lock_state();
        if st.closed() {
            debug!(
                "channel {:p}: send on closed channel",
                self as *const Channel
            );
            return 0;
        }
        st = self.synchronize(st, true);
        if data.is_empty() {
            return 0;
        }
        self.send_locked(st, data)
    }

    /// Zero-byte send half of the barrier primitive.
    pub fn send_sync(&self) {
        let _ = self.send(&[]);
    }

    fn send_locked<'a>(&'a self, mut st: MutexGuard<'a, ChannelState>, data: &[u8]) -> usize {
        let idx = st.send_idx();
        let prefix = (data.len() as u32).to_ne_bytes();

        // The prefix commits atomically: park until the buffer can take all
        // of it at once, never leaving a torn length on the wire.
        loop {
            if st.closed() {
                return 0;
            }
            if st.files[idx].rb.free() >= LEN_PREFIX {
                st.files[idx].rb.add(&prefix);
                break;
            }
            if sched::is_interrupt_context() {
                return 0;
            }
            st = self.park_in(st, Slot::Read);
        }
        trace!(
            "channel {:p} <- prefix for {} bytes",
            self as *const Channel,
            data.len()
        );

        let mut sent = 0;
        loop {
            if st.closed() {
                trace!(
                    "channel {:p}: closed mid-send at {sent}/{}",
                    self as *const Channel,
                    data.len()
                );
                return sent;
            }
            if st.files[idx].rb.free() != 0 {
                let chunk = st.files[idx].rb.add(&data[sent..]);
                if chunk != 0 {
                    sent += chunk;
                    trace!(
                        "channel {:p} <- {chunk} bytes ({sent}/{})",
                        self as *const Channel,
                        data.len()
                    );
                    // A fresh chunk is readable: hand the peer the CPU.
                    st = self.wake_other(st, Slot::Write);
                    if sent == data.len() {
                        return sent;
                    }
                    continue;
                }
            }
            if sched::is_interrupt_context() {
                return 0;
            }
            st = self.park_in(st, Slot::Read);
        }
    }

    /// Non-blocking send: commits the prefix and the whole payload together
    /// or leaves the buffer untouched and returns 0.
    pub fn try_send(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut st = self.lock_state();
        if st.closed() {
            return 0;
        }
        let idx = st.send_idx();
        let rb = &mut st.files[idx].rb;
        if rb.free() < LEN_PREFIX + data.len() {
            return 0;
        }
        rb.add(&(data.len() as u32).to_ne_bytes());
        rb.add(data);
        trace!(
            "channel {:p} <- {} bytes (try)",
            self as *const Channel,
            data.len()
        );
        self.wake_and_release(st, Slot::Write);
        data.len()
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Receive the next message into `buf`, blocking until it is complete.
    ///
    /// Returns the message length, or 0 when the channel is closed and
    /// holds no further complete message. A destination shorter than the
    /// message receives what fits; the excess is discarded so the stream
    /// stays framed.
    pub fn recv(&self, buf: &mut [u8]) -> usize {
        let mut st = self.lock_state();
        if st.closed() && st.files[st.recv_idx()].rb.is_empty() {
            debug!(
                "channel {:p}: recv on drained closed channel",
                self as *const Channel
            );
            return 0;
        }
        st = self.synchronize(st, false);
        self.recv_locked(st, Dest::Buf(buf))
    }

    /// Zero-byte receive half of the barrier primitive.
    pub fn recv_sync(&self) {
        let mut st = self.lock_state();
        if st.closed() && st.files[st.recv_idx()].rb.is_empty() {
            return;
        }
        st = self.synchronize(st, false);
        drop(st);
    }

    /// Receive into `buf` and view the message bytes; `None` on a
    /// zero-byte result.
    pub fn recv_msg<'a>(&self, buf: &'a mut [u8]) -> Option<&'a [u8]> {
        match self.recv(buf) {
            0 => None,
            n => Some(&buf[..n.min(buf.len())]),
        }
    }

    /// Discard the next message without copying it out. Blocks exactly
    /// like [`recv`](Channel::recv); returns the number of bytes dropped.
    pub fn drop_next(&self) -> usize {
        let mut st = self.lock_state();
        if st.closed() && st.files[st.recv_idx()].rb.is_empty() {
            return 0;
        }
        st = self.synchronize(st, false);
        self.recv_locked(st, Dest::Discard)
    }

    fn recv_locked<'a>(&'a self, mut st: MutexGuard<'a, ChannelState>, mut dest: Dest<'_>) -> usize {
        let idx = st.recv_idx();

        // Wait for a whole length prefix.
        let mut prefix = [0u8; LEN_PREFIX];
        loop {
            if st.files[idx].rb.peek(&mut prefix) == LEN_PREFIX {
                break;
            }
            if st.closed() {
                // Nothing complete will ever arrive.
                return 0;
            }
            if sched::is_interrupt_context() {
                return 0;
            }
            st = self.park_in(st, Slot::Write);
        }
        st.files[idx].rb.drop_bytes(LEN_PREFIX);
        let len = u32::from_ne_bytes(prefix) as usize;
        trace!(
            "channel {:p} -> expecting {len} bytes",
            self as *const Channel
        );
        if len == 0 {
            return 0;
        }

        let mut got = 0;
        loop {
            // Drain-after-close: a complete buffered message is delivered,
            // a short in-flight tail is unreadable.
            if st.closed() && (st.files[idx].rb.is_empty() || len - got > st.files[idx].rb.used())
            {
                return if got == len { got } else { 0 };
            }
            if !st.files[idx].rb.is_empty() {
                let chunk = {
                    let rb = &mut st.files[idx].rb;
                    match &mut dest {
                        Dest::Buf(buf) if got < buf.len() => {
                            let end = buf.len().min(len);
                            rb.get(&mut buf[got..end])
                        }
                        _ => rb.drop_bytes(len - got),
                    }
                };
                if chunk != 0 {
                    got += chunk;
                    trace!(
                        "channel {:p} -> {chunk} bytes ({got}/{len})",
                        self as *const Channel
                    );
                    // Space freed up: hand a blocked sender the CPU.
                    st = self.wake_other(st, Slot::Read);
                    if got == len {
                        return got;
                    }
                    continue;
                }
            }
            if sched::is_interrupt_context() {
                return 0;
            }
            st = self.park_in(st, Slot::Write);
        }
    }

    /// Non-blocking receive: returns a complete message or nothing.
    pub fn try_recv(&self, buf: &mut [u8]) -> usize {
        let mut st = self.lock_state();
        let idx = st.recv_idx();
        if st.closed() && st.files[idx].rb.is_empty() {
            return 0;
        }
        let mut prefix = [0u8; LEN_PREFIX];
        let len = {
            let rb = &mut st.files[idx].rb;
            if rb.peek(&mut prefix) < LEN_PREFIX {
                return 0;
            }
            let len = u32::from_ne_bytes(prefix) as usize;
            if rb.used() < LEN_PREFIX + len {
                return 0;
            }
            rb.drop_bytes(LEN_PREFIX);
            let take = len.min(buf.len());
            let n = rb.get(&mut buf[..take]);
            if n < len {
                rb.drop_bytes(len - n);
            }
            len
        };
        trace!("channel {:p} -> {len} bytes (try)", self as *const Channel);
        self.wake_and_release(st, Slot::Read);
        len
    }
}

// ----------------------------------------------------------------------
// Select
// ----------------------------------------------------------------------

/// Try each channel in order until one accepts the message; returns the
/// index of the winner.
///
/// This is a busy loop with a yield between full scans and no timeout.
/// Callers wanting fairness rotate the slice themselves.
pub fn send_select(channels: &[&Channel], data: &[u8]) -> usize {
    loop {
        for (i, c) in channels.iter().enumerate() {
            if c.try_send(data) != 0 {
                return i;
            }
        }
        sched::yield_now();
    }
}

/// Try each channel in order until one yields a message; returns the index
/// of the winner. Same looping contract as [`send_select`].
pub fn recv_select(channels: &[&Channel], buf: &mut [u8]) -> usize {
    loop {
        for (i, c) in channels.iter().enumerate() {
            if c.try_recv(buf) != 0 {
                return i;
            }
        }
        sched::yield_now();
    }
}
