//! In-process event bus with string-keyed channels
//!
//! Producers emit raw payloads under a [`ChannelName`]; consumers hold a
//! [`Subscription`] covering one or more channels. A subscription is a
//! revocable capability: dropping it (or calling [`Subscription::unsubscribe`])
//! removes it from every channel exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use skein_protocol::{ChannelKind, ChannelName};
use tokio::sync::{Notify, mpsc};

/// One payload delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Bus-wide sequence number. A logical event published on both its
    /// generic and scoped channel carries the same number on each.
    pub seq: u64,
    /// The channel the payload arrived on
    pub channel: ChannelName,
    /// Raw payload text
    pub payload: String,
}

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BusInner {
    channels: Mutex<HashMap<ChannelName, Vec<Listener>>>,
    next_listener: AtomicU64,
    next_sequence: AtomicU64,
    activity: Notify,
}

/// A cheaply cloneable handle to the bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a set of channels. Deliveries from all of them arrive on
    /// the returned subscription in emission order.
    pub fn subscribe(&self, channels: &[ChannelName]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        {
            let mut map = self.inner.channels.lock();
            for channel in channels {
                map.entry(channel.clone()).or_default().push(Listener {
                    id,
                    tx: tx.clone(),
                });
            }
        }

        tracing::trace!(
            "subscription {} opened on {}",
            id,
            channels.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
        );

        Subscription {
            id,
            channels: channels.to_vec(),
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Emit a payload on a single channel. Returns the sequence number.
    pub fn emit(&self, channel: &ChannelName, payload: impl Into<String>) -> u64 {
        let payload = payload.into();
        let seq = {
            let mut map = self.inner.channels.lock();
            let seq = self.next_sequence();
            deliver(&mut map, channel, seq, &payload);
            seq
        };
        self.inner.activity.notify_one();
        seq
    }

    /// Publish one logical event on the generic channel of `kind` and, when a
    /// session id is known, on the matching scoped channel. Both deliveries
    /// share a sequence number so consumers can drop the duplicate.
    pub fn publish(&self, kind: ChannelKind, session_id: Option<&str>, payload: impl Into<String>) -> u64 {
        let payload = payload.into();
        // Numbering under the channel lock keeps every channel's delivery
        // order equal to sequence order
        let seq = {
            let mut map = self.inner.channels.lock();
            let seq = self.next_sequence();
            deliver(&mut map, &ChannelName::generic(kind), seq, &payload);
            if let Some(id) = session_id {
                deliver(&mut map, &ChannelName::scoped(kind, id), seq, &payload);
            }
            seq
        };
        self.inner.activity.notify_one();
        seq
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map(|listeners| listeners.iter().filter(|l| !l.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Wait until something has been emitted since the last wake-up
    pub async fn notified(&self) {
        self.inner.activity.notified().await;
    }

    fn next_sequence(&self) -> u64 {
        self.inner.next_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn deliver(map: &mut HashMap<ChannelName, Vec<Listener>>, channel: &ChannelName, seq: u64, payload: &str) {
    let Some(listeners) = map.get_mut(channel) else {
        return;
    };
    listeners.retain(|listener| {
        listener
            .tx
            .send(Delivery {
                seq,
                channel: channel.clone(),
                payload: payload.to_string(),
            })
            .is_ok()
    });
    if listeners.is_empty() {
        map.remove(channel);
    }
}

/// A live subscription to one or more channels
pub struct Subscription {
    id: u64,
    channels: Vec<ChannelName>,
    rx: mpsc::UnboundedReceiver<Delivery>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// The channels this subscription covers
    pub fn channels(&self) -> &[ChannelName] {
        &self.channels
    }

    /// Take the next already-delivered payload without waiting
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next payload
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Take everything delivered so far
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(d) = self.try_next() {
            out.push(d);
        }
        out
    }

    /// Release the subscription
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut map = inner.channels.lock();
        for channel in &self.channels {
            if let Some(listeners) = map.get_mut(channel) {
                listeners.retain(|l| l.id != self.id);
                if listeners.is_empty() {
                    map.remove(channel);
                }
            }
        }
        tracing::trace!("subscription {} released", self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_only_matching_channel() {
        let bus = EventBus::new();
        let mut generic = bus.subscribe(&ChannelName::generic_triple());
        let mut scoped = bus.subscribe(&ChannelName::scoped_triple("abc"));

        bus.emit(&ChannelName::generic(ChannelKind::Output), "one");

        assert_eq!(generic.try_next().map(|d| d.payload), Some("one".to_string()));
        assert!(scoped.try_next().is_none());
    }

    #[test]
    fn test_triple_preserves_cross_channel_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(&ChannelName::generic_triple());

        bus.emit(&ChannelName::generic(ChannelKind::Output), "a");
        bus.emit(&ChannelName::generic(ChannelKind::Error), "b");
        bus.emit(&ChannelName::generic(ChannelKind::Complete), "true");

        let kinds: Vec<ChannelKind> = sub.drain().iter().map(|d| d.channel.kind()).collect();
        assert_eq!(
            kinds,
            vec![ChannelKind::Output, ChannelKind::Error, ChannelKind::Complete]
        );
    }

    #[test]
    fn test_publish_shares_sequence_across_generic_and_scoped() {
        let bus = EventBus::new();
        let mut generic = bus.subscribe(&ChannelName::generic_triple());
        let mut scoped = bus.subscribe(&ChannelName::scoped_triple("abc"));

        let seq = bus.publish(ChannelKind::Output, Some("abc"), "{}");

        let g = generic.try_next().unwrap();
        let s = scoped.try_next().unwrap();
        assert_eq!(g.seq, seq);
        assert_eq!(s.seq, seq);
        assert_eq!(s.channel.as_str(), "agent-output:abc");
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let bus = EventBus::new();
        let a = bus.emit(&ChannelName::generic(ChannelKind::Output), "x");
        let b = bus.publish(ChannelKind::Output, None, "y");
        assert!(b > a);
    }

    #[test]
    fn test_drop_unsubscribes_every_channel() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&ChannelName::generic_triple());
        for name in ChannelName::generic_triple() {
            assert_eq!(bus.subscriber_count(&name), 1);
        }
        sub.unsubscribe();
        for name in ChannelName::generic_triple() {
            assert_eq!(bus.subscriber_count(&name), 0);
        }
    }

    #[test]
    fn test_unsubscribe_leaves_other_subscribers() {
        let bus = EventBus::new();
        let first = bus.subscribe(&ChannelName::generic_triple());
        let mut second = bus.subscribe(&ChannelName::generic_triple());
        drop(first);

        let output = ChannelName::generic(ChannelKind::Output);
        assert_eq!(bus.subscriber_count(&output), 1);
        bus.emit(&output, "still here");
        assert!(second.try_next().is_some());
    }

    #[test]
    fn test_concurrent_publishers_deliver_in_sequence_order() {
        let bus = EventBus::new();
        let mut generic = bus.subscribe(&ChannelName::generic_triple());
        let mut scoped = bus.subscribe(&ChannelName::scoped_triple("s0"));

        let publishers: Vec<_> = (0..4)
            .map(|n| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    let session = format!("s{}", n);
                    for _ in 0..5_000 {
                        bus.publish(ChannelKind::Output, Some(&session), "{}");
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }

        let seqs: Vec<u64> = generic.drain().iter().map(|d| d.seq).collect();
        assert_eq!(seqs.len(), 20_000);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));

        let scoped_seqs: Vec<u64> = scoped.drain().iter().map(|d| d.seq).collect();
        assert_eq!(scoped_seqs.len(), 5_000);
        assert!(scoped_seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_next_waits_for_delivery() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(&ChannelName::scoped_triple("s1"));
        let producer = bus.clone();
        tokio::spawn(async move {
            producer.publish(ChannelKind::Complete, Some("s1"), "true");
        });
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.channel.kind(), ChannelKind::Complete);
    }
}
