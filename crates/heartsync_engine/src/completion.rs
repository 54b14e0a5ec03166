//! One-shot completion signals.

use crate::engine::Job;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Worker-internal follow-ups fired by a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// The running push resolved.
    PushSettled,
    /// A zone fetch started by the coarse fetch of the given account epoch
    /// resolved.
    ZoneFetched(u64),
}

/// Where the outcome of an operation goes.
///
/// A completion is consumed by [`Completion::complete`], so each one
/// resolves at most once.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Reply to a waiting caller.
    Reply(oneshot::Sender<bool>),
    /// One half of a split batch.
    Join(Arc<Join>),
    /// Feed the outcome back into the worker queue.
    ///
    /// Holds a weak sender so pending work never keeps a dropped engine alive.
    Signal(mpsc::WeakUnboundedSender<Job>, Signal),
    /// Nobody is waiting.
    Detached,
}

impl Completion {
    /// Creates a reply completion and the [`Ack`] the caller awaits.
    pub fn reply() -> (Self, Ack) {
        let (tx, rx) = oneshot::channel();
        (Completion::Reply(tx), Ack { rx })
    }

    /// Resolves the completion.
    pub fn complete(self, ok: bool) {
        match self {
            Completion::Reply(tx) => {
                let _ = tx.send(ok);
            }
            Completion::Join(join) => join.resolve(ok),
            Completion::Signal(jobs, signal) => {
                if let Some(jobs) = jobs.upgrade() {
                    let _ = jobs.send(Job::Signal(signal, ok));
                }
            }
            Completion::Detached => {}
        }
    }

    /// Splits into two completions that resolve `self` once both have
    /// resolved, with the conjunction of their outcomes.
    pub fn split(self) -> (Self, Self) {
        let join = Arc::new(Join {
            remaining: AtomicUsize::new(2),
            ok: AtomicBool::new(true),
            parent: Mutex::new(Some(self)),
        });
        (Completion::Join(Arc::clone(&join)), Completion::Join(join))
    }
}

impl Completion {
    /// Splits into `n` completions that resolve `self` once all have resolved.
    ///
    /// With `n == 0` the completion resolves successfully right away.
    pub fn fan_out(self, n: usize) -> Vec<Self> {
        match n {
            0 => {
                self.complete(true);
                Vec::new()
            }
            1 => vec![self],
            _ => {
                let (first, second) = self.split();
                let mut out = first.fan_out(n / 2);
                out.extend(second.fan_out(n - n / 2));
                out
            }
        }
    }
}

/// Resolves every completion in `waiters` with `ok`.
pub(crate) fn complete_all(waiters: Vec<Completion>, ok: bool) {
    for waiter in waiters {
        waiter.complete(ok);
    }
}

/// Shared state of a split pair.
#[derive(Debug)]
pub(crate) struct Join {
    remaining: AtomicUsize,
    ok: AtomicBool,
    parent: Mutex<Option<Completion>>,
}

impl Join {
    fn resolve(&self, ok: bool) {
        if !ok {
            self.ok.store(false, Ordering::SeqCst);
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(parent) = self.parent.lock().take() {
                parent.complete(self.ok.load(Ordering::SeqCst));
            }
        }
    }
}

/// Resolves to the outcome of an engine operation.
///
/// The operation is queued when the `Ack` is created; dropping it does not
/// cancel anything. Resolves to `false` if the engine stops first.
#[derive(Debug)]
#[must_use = "dropping an Ack ignores the outcome but does not cancel the operation"]
pub struct Ack {
    rx: oneshot::Receiver<bool>,
}

impl Future for Ack {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.unwrap_or(false))
    }
}
