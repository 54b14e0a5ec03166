//! Device-to-device message channel.

use crate::message::Payload;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A link to the paired device.
///
/// `send` is best effort and drops the payload when the peer is not
/// reachable. `transfer` queues the payload until it can be delivered.
/// Every subscriber receives every delivered payload, in delivery order.
pub trait MessageChannel: Send + Sync {
    /// Delivers `payload` now if the peer is reachable.
    ///
    /// Returns false if the payload was dropped.
    fn send(&self, payload: Payload) -> bool;

    /// Delivers `payload` now, or queues it until the peer is reachable.
    fn transfer(&self, payload: Payload);

    /// Registers a receiver for payloads sent by the peer.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Payload>;

    /// Returns true if the peer is currently reachable.
    fn is_reachable(&self) -> bool;
}

#[derive(Default)]
struct Endpoint {
    subscribers: Vec<mpsc::UnboundedSender<Payload>>,
    /// Transfers waiting for this endpoint to become reachable.
    queued: VecDeque<Payload>,
}

impl Endpoint {
    fn deliver(&mut self, payload: Payload) {
        self.subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
    }
}

struct Link {
    reachable: bool,
    endpoints: [Endpoint; 2],
}

/// One end of an in-process channel pair.
///
/// Both ends share the reachability flag. Payloads queued with
/// [`transfer`](MessageChannel::transfer) are flushed in order when the link
/// becomes reachable again.
#[derive(Clone)]
pub struct LocalChannel {
    link: Arc<Mutex<Link>>,
    side: usize,
}

impl LocalChannel {
    /// Creates two connected, reachable ends.
    pub fn pair() -> (Self, Self) {
        let link = Arc::new(Mutex::new(Link {
            reachable: true,
            endpoints: [Endpoint::default(), Endpoint::default()],
        }));
        (
            Self {
                link: Arc::clone(&link),
                side: 0,
            },
            Self { link, side: 1 },
        )
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    /// Changes reachability. Becoming reachable flushes queued transfers.
    pub fn set_reachable(&self, reachable: bool) {
        let mut link = self.link.lock();
        link.reachable = reachable;
        if reachable {
            for endpoint in &mut link.endpoints {
                while let Some(payload) = endpoint.queued.pop_front() {
                    endpoint.deliver(payload);
                }
            }
        }
        tracing::debug!(reachable, "channel reachability changed");
    }

    /// Returns the number of transfers waiting for the peer.
    pub fn queued_transfers(&self) -> usize {
        self.link.lock().endpoints[self.peer()].queued.len()
    }
}

impl MessageChannel for LocalChannel {
    fn send(&self, payload: Payload) -> bool {
        let mut link = self.link.lock();
        if !link.reachable {
            tracing::debug!("peer unreachable, message dropped");
            return false;
        }
        let peer = self.peer();
        link.endpoints[peer].deliver(payload);
        true
    }

    fn transfer(&self, payload: Payload) {
        let mut link = self.link.lock();
        let peer = self.peer();
        if link.reachable {
            link.endpoints[peer].deliver(payload);
        } else {
            link.endpoints[peer].queued.push_back(payload);
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Payload> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.link.lock().endpoints[self.side].subscribers.push(tx);
        rx
    }

    fn is_reachable(&self) -> bool {
        self.link.lock().reachable
    }
}

impl fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChannel")
            .field("side", &self.side)
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WatchMessage;

    #[test]
    fn send_reaches_every_peer_subscriber() {
        let (watch, phone) = LocalChannel::pair();
        let mut first = phone.subscribe();
        let mut second = phone.subscribe();
        let mut own = watch.subscribe();

        assert!(watch.send(WatchMessage::WorkoutStarted.to_payload()));

        assert_eq!(first.try_recv().unwrap(), WatchMessage::WorkoutStarted.to_payload());
        assert_eq!(second.try_recv().unwrap(), WatchMessage::WorkoutStarted.to_payload());
        assert!(own.try_recv().is_err());
    }

    #[test]
    fn send_is_dropped_when_unreachable() {
        let (watch, phone) = LocalChannel::pair();
        let mut rx = phone.subscribe();
        watch.set_reachable(false);

        assert!(!watch.send(WatchMessage::WorkoutStarted.to_payload()));
        watch.set_reachable(true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transfer_is_queued_until_reachable() {
        let (watch, phone) = LocalChannel::pair();
        let mut rx = phone.subscribe();
        phone.set_reachable(false);

        watch.transfer(WatchMessage::WorkoutStarted.to_payload());
        watch.transfer(WatchMessage::WorkoutStopped.to_payload());
        assert_eq!(watch.queued_transfers(), 2);
        assert!(rx.try_recv().is_err());

        phone.set_reachable(true);
        assert_eq!(watch.queued_transfers(), 0);
        assert_eq!(rx.try_recv().unwrap(), WatchMessage::WorkoutStarted.to_payload());
        assert_eq!(rx.try_recv().unwrap(), WatchMessage::WorkoutStopped.to_payload());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let (watch, phone) = LocalChannel::pair();
        drop(phone.subscribe());
        let mut rx = phone.subscribe();
        assert!(watch.send(WatchMessage::WorkoutStopped.to_payload()));
        assert!(rx.try_recv().is_ok());
        assert_eq!(watch.link.lock().endpoints[1].subscribers.len(), 1);
    }
}
