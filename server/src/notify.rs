//! Ranking change notifications
//!
//! Two independent channels leave the server when a city's ranking moves:
//! - a best-effort UDP multicast line naming the city's new top hotel,
//!   received by anyone who joined the group;
//! - a directed push of the city's full ranked list, delivered only to the
//!   connections that subscribed to that city.

use crate::error::NotifyError;
use crate::lock;
use crate::session::Outbox;
use log::{debug, info};
use shared::{encode, eq_ignore_case, LocalRank, Message};
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex, Weak};

/// Frames a subscriber may have waiting before it counts as not reading.
pub const MAX_PENDING_PUSHES: usize = 32;

/// One-to-many, fire-and-forget announcement channel.
pub trait Broadcaster: Send + Sync {
    fn announce(&self, line: &str);
}

pub struct MulticastBroadcaster {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl MulticastBroadcaster {
    pub fn new(group: Ipv4Addr, port: u16, ttl: u32) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(ttl)?;
        info!("Announcing top hotel changes to {}:{}", group, port);
        Ok(Self {
            socket,
            target: SocketAddrV4::new(group, port),
        })
    }
}

impl Broadcaster for MulticastBroadcaster {
    fn announce(&self, line: &str) {
        match self.socket.send_to(line.as_bytes(), self.target) {
            Ok(_) => debug!("Multicast: {}", line),
            Err(e) => debug!("Multicast send to {} failed: {}", self.target, e),
        }
    }
}

/// Receiver of directed rank updates for the cities it subscribed to.
pub trait RankSubscriber: Send + Sync {
    fn on_rank_changed(&self, rank: &LocalRank) -> Result<(), NotifyError>;
}

/// Delivers rank updates as unsolicited frames on a client connection.
pub struct OutboxSubscriber {
    outbox: Weak<Outbox>,
}

impl OutboxSubscriber {
    pub fn new(outbox: Weak<Outbox>) -> Self {
        Self { outbox }
    }
}

impl RankSubscriber for OutboxSubscriber {
    fn on_rank_changed(&self, rank: &LocalRank) -> Result<(), NotifyError> {
        let outbox = self.outbox.upgrade().ok_or(NotifyError::Closed)?;
        let frame = encode(&Message::LocalRankChanged(rank.clone()))?;
        outbox.offer(frame, MAX_PENDING_PUSHES)
    }
}

struct Subscription {
    cities: Vec<String>,
    subscriber: Arc<dyn RankSubscriber>,
}

impl Subscription {
    fn wants(&self, city: &str) -> bool {
        self.cities.iter().any(|c| eq_ignore_case(c, city))
    }
}

/// Subscriber id to cities of interest.
#[derive(Default)]
pub struct SubscriberHub {
    subscriptions: Mutex<HashMap<u64, Subscription>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` under `id`, replacing any previous subscription
    /// with the same id.
    pub fn subscribe(&self, id: u64, cities: Vec<String>, subscriber: Arc<dyn RankSubscriber>) {
        debug!("Subscriber {} follows {:?}", id, cities);
        lock(&self.subscriptions).insert(id, Subscription { cities, subscriber });
    }

    /// Removing an unknown id is a no-op. Returns whether anything was removed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        lock(&self.subscriptions).remove(&id).is_some()
    }

    pub fn is_subscribed(&self, id: u64) -> bool {
        lock(&self.subscriptions).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `rank` to every subscriber of its city and returns how many
    /// deliveries succeeded.
    ///
    /// Delivery runs over a copy of the matching subscribers, outside the
    /// lock. Subscribers that failed are removed afterwards, unless they were
    /// replaced by a fresh subscription in the meantime.
    pub fn notify(&self, rank: &LocalRank) -> usize {
        let targets: Vec<(u64, Arc<dyn RankSubscriber>)> = lock(&self.subscriptions)
            .iter()
            .filter(|(_, subscription)| subscription.wants(&rank.city))
            .map(|(id, subscription)| (*id, Arc::clone(&subscription.subscriber)))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, subscriber) in targets {
            match subscriber.on_rank_changed(rank) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("Dropping subscriber {}: {}", id, e);
                    failed.push((id, subscriber));
                }
            }
        }

        if !failed.is_empty() {
            let mut subscriptions = lock(&self.subscriptions);
            for (id, subscriber) in failed {
                let same = subscriptions
                    .get(&id)
                    .map_or(false, |current| Arc::ptr_eq(&current.subscriber, &subscriber));
                if same {
                    subscriptions.remove(&id);
                }
            }
        }

        delivered
    }
}
