//! Bounded-time access to a blocking [`PinPort`].
//!
//! A wedged I²C transaction must not hang a poller or a command task
//! forever.  Every operation is handed to one worker thread that owns the
//! real port; callers wait at most `timeout` for the answer.
//!
//! ```text
//!   caller ──try_send(Request)──▶ [queue; depth 8] ──▶ worker ──▶ inner port
//!     ▲                                                   │
//!     └──────── recv_timeout(reply, timeout) ◀────────────┘
//! ```
//!
//! A full queue is reported as [`HardwareError::Busy`], a late answer as
//! [`HardwareError::Timeout`].  A timed-out operation has no effect on the
//! hardware: the worker skips requests abandoned while queued, and a write
//! that completes after its caller gave up is rolled back to the level read
//! just before it.
//!
//! Caller and worker race on one `Ticket` per request.  Whoever moves it
//! out of `PENDING` first decides the outcome.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::addressing::Channel;
use crate::app::ports::PinPort;
use crate::drivers::task_pin::{self, Core};
use crate::error::HardwareError;

const QUEUE_DEPTH: usize = 8;
const WORKER_PRIORITY: u8 = 7;
const WORKER_STACK_KB: usize = 4;

enum Op {
    Read,
    Write(bool),
}

const PENDING: u8 = 0;
const DONE: u8 = 1;
const ABANDONED: u8 = 2;

/// Per-request handshake between the waiting caller and the worker.
#[derive(Default)]
struct Ticket(AtomicU8);

impl Ticket {
    fn settle(&self, to: u8) -> bool {
        self.0
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::Acquire) == ABANDONED
    }
}

struct Request {
    channel: Channel,
    op: Op,
    ticket: Arc<Ticket>,
    reply: SyncSender<Result<bool, HardwareError>>,
}

pub struct GuardedPins {
    tx: SyncSender<Request>,
    timeout: Duration,
}

impl GuardedPins {
    /// Move `inner` onto a dedicated worker thread.
    pub fn spawn(inner: Arc<dyn PinPort>, timeout: Duration) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        task_pin::spawn_on_core(
            Core::Pro,
            WORKER_PRIORITY,
            WORKER_STACK_KB,
            "hw_io\0",
            move || worker(inner.as_ref(), &rx),
        )?;
        info!("HW: I/O worker up, timeout {:?}", timeout);
        Ok(Self { tx, timeout })
    }

    fn call(&self, channel: Channel, op: Op) -> Result<bool, HardwareError> {
        let (reply, answer) = mpsc::sync_channel(1);
        let ticket = Arc::new(Ticket::default());
        let request = Request {
            channel,
            op,
            ticket: ticket.clone(),
            reply,
        };
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(HardwareError::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(HardwareError::WorkerGone),
        }
        match answer.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) if ticket.settle(ABANDONED) => {
                warn!("HW {}: no answer within {:?}", channel, self.timeout);
                Err(HardwareError::Timeout)
            }
            // The worker settled first; its answer is already on the way.
            Err(RecvTimeoutError::Timeout) => answer.recv().unwrap_or(Err(HardwareError::WorkerGone)),
            Err(RecvTimeoutError::Disconnected) => Err(HardwareError::WorkerGone),
        }
    }
}

fn worker(inner: &dyn PinPort, rx: &Receiver<Request>) {
    // Ends when every GuardedPins handle is dropped.
    while let Ok(req) = rx.recv() {
        if req.ticket.is_abandoned() {
            debug!("HW {}: caller gave up while queued, skipped", req.channel);
            continue;
        }
        let (result, previous) = match req.op {
            Op::Read => (inner.read(req.channel), None),
            Op::Write(value) => match inner.read(req.channel) {
                Ok(previous) => (inner.write(req.channel, value).map(|()| value), Some(previous)),
                Err(e) => (Err(e), None),
            },
        };
        if req.ticket.settle(DONE) {
            let _ = req.reply.try_send(result);
        } else if let (Ok(value), Some(previous)) = (result, previous) {
            if value != previous {
                undo(inner, req.channel, previous);
            }
        }
    }
    info!("HW: I/O worker exiting");
}

/// Restore the level a late write replaced.
fn undo(inner: &dyn PinPort, channel: Channel, previous: bool) {
    match inner.write(channel, previous) {
        Ok(()) => warn!("HW {}: late write undone, back at {}", channel, u8::from(previous)),
        Err(e) => warn!("HW {}: late write could not be undone: {}", channel, e),
    }
}

impl PinPort for GuardedPins {
    fn read(&self, channel: Channel) -> Result<bool, HardwareError> {
        self.call(channel, Op::Read)
    }

    fn write(&self, channel: Channel, value: bool) -> Result<(), HardwareError> {
        self.call(channel, Op::Write(value)).map(|_| ())
    }
}
