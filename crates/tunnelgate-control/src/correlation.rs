//! Correlation store
//!
//! Matches replies arriving on a tunnel to the inbound call that is waiting
//! for them. Entries are keyed by `peerID:requestID` and never outlive the
//! store's TTL, whether or not anyone consumed them.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use tunnelgate_proto::DEFAULT_CORRELATION_TTL;

use crate::error::GatewayError;

/// Key of a correlation entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub peer_id: String,
    pub request_id: String,
}

impl CorrelationKey {
    pub fn new(peer_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            request_id: request_id.into(),
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.peer_id, self.request_id)
    }
}

enum Slot {
    /// A caller is waiting; depositing wakes it
    Waiting(oneshot::Sender<String>),
    /// The reply arrived with nobody waiting
    Arrived(String),
}

struct CorrelationEntry {
    slot: Slot,
    expires_at: Instant,
    /// Identifies the waiter that owns a `Waiting` slot
    token: u64,
}

impl CorrelationEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// What happened to a deposited reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    /// Handed to a waiting caller
    Delivered,
    /// Nobody was waiting; kept until the TTL evicts it
    Orphaned,
}

/// In-process, TTL-bounded correlation store
#[derive(Clone)]
pub struct CorrelationStore {
    entries: Arc<DashMap<CorrelationKey, CorrelationEntry>>,
    ttl: Duration,
    next_token: Arc<AtomicU64>,
}

impl CorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register interest in a reply before the request is sent
    ///
    /// If the reply already arrived (and has not expired) the returned
    /// handle resolves immediately.
    pub fn expect(&self, peer_id: &str, request_id: &str) -> PendingReply {
        let key = CorrelationKey::new(peer_id, request_id);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let early_reply = match &occupied.get().slot {
                    Slot::Arrived(_) if !occupied.get().is_expired(now) => true,
                    Slot::Waiting(_) => {
                        warn!(key = %key, "Duplicate wait for correlation key, replacing waiter");
                        false
                    }
                    Slot::Arrived(_) => false,
                };

                if early_reply {
                    let (_, entry) = occupied.remove_entry();
                    if let Slot::Arrived(body) = entry.slot {
                        trace!(key = %key, "Reply arrived before wait");
                        let _ = tx.send(body);
                    }
                } else {
                    occupied.insert(CorrelationEntry {
                        slot: Slot::Waiting(tx),
                        expires_at: now + self.ttl,
                        token,
                    });
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CorrelationEntry {
                    slot: Slot::Waiting(tx),
                    expires_at: now + self.ttl,
                    token,
                });
            }
        }

        PendingReply {
            key,
            token,
            rx,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Block until the reply for `peer_id:request_id` arrives or `timeout` elapses
    pub async fn await_reply(
        &self,
        peer_id: &str,
        request_id: &str,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        self.expect(peer_id, request_id).wait(timeout).await
    }

    /// Hand a reply to its waiter, or keep it until the TTL runs out
    pub fn deposit(&self, peer_id: &str, request_id: &str, body: String) -> DepositOutcome {
        let key = CorrelationKey::new(peer_id, request_id);

        let body = match self.entries.remove(&key) {
            Some((_, CorrelationEntry { slot: Slot::Waiting(tx), .. })) => match tx.send(body) {
                Ok(()) => {
                    debug!(key = %key, "Reply delivered to waiting caller");
                    return DepositOutcome::Delivered;
                }
                // Waiter gave up between removal and send
                Err(body) => body,
            },
            Some((_, CorrelationEntry { slot: Slot::Arrived(_), .. })) => {
                debug!(key = %key, "Duplicate reply, keeping the latest");
                body
            }
            None => body,
        };

        debug!(key = %key, ttl = ?self.ttl, "No caller waiting, holding reply until TTL");
        self.entries.insert(
            key,
            CorrelationEntry {
                slot: Slot::Arrived(body),
                expires_at: Instant::now() + self.ttl,
                token: 0,
            },
        );
        DepositOutcome::Orphaned
    }

    /// Remove every expired entry, returning how many were evicted
    pub fn evict_expired(&self) -> usize {
        evict_expired(&self.entries)
    }

    /// Periodically evict expired entries until the store is dropped
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    debug!("Correlation store dropped, reaper exiting");
                    break;
                };
                let evicted = evict_expired(&entries);
                if evicted > 0 {
                    debug!(evicted, remaining = entries.len(), "Evicted expired correlation entries");
                }
            }
        })
    }

    /// Number of live (waiting or unconsumed) entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}

fn evict_expired(entries: &DashMap<CorrelationKey, CorrelationEntry>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|key, entry| {
        let keep = !entry.is_expired(now);
        if !keep {
            trace!(key = %key, "Evicting expired correlation entry");
        }
        keep
    });
    before.saturating_sub(entries.len())
}

/// A caller's claim on one reply
///
/// Dropping it withdraws the waiter; a reply arriving afterwards is kept as
/// an orphan and evicted by the TTL.
pub struct PendingReply {
    key: CorrelationKey,
    token: u64,
    rx: oneshot::Receiver<String>,
    entries: Weak<DashMap<CorrelationKey, CorrelationEntry>>,
}

impl PendingReply {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the reply body
    pub async fn wait(mut self, timeout: Duration) -> Result<String, GatewayError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(body)) => Ok(body),
            // Sender dropped: the entry was evicted or replaced
            Ok(Err(_)) | Err(_) => Err(GatewayError::ReplyTimeout {
                peer_id: self.key.peer_id.clone(),
                request_id: self.key.request_id.clone(),
                timeout,
            }),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.upgrade() {
            let token = self.token;
            entries.remove_if(&self.key, |_, entry| {
                entry.token == token && matches!(entry.slot, Slot::Waiting(_))
            });
        }
    }
}
